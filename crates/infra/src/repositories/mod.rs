pub mod impls;

pub use impls::*;
