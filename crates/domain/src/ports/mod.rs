use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod counters;
pub mod event_log;
pub mod notify;
pub mod rankables;
pub mod rollups;
pub mod users;
