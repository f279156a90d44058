use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

/// Startup gate for the durable record store: a cheap TCP reachability
/// probe before any repository is wired up.
#[derive(Debug, Clone)]
pub struct SurrealAdapter {
    config: DbConfig,
}

impl SurrealAdapter {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let address = socket_address(&self.config.endpoint)?;
        let connect = timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| DbError::Unavailable("record store connect timed out".to_string()))?;
        connect
            .map_err(|err| DbError::Unavailable(format!("record store connect failed: {err}")))?;
        tracing::debug!(
            endpoint = self.config.endpoint,
            namespace = self.config.namespace,
            database = self.config.database,
            "record store health check succeeded"
        );
        Ok(())
    }
}

fn socket_address(endpoint: &str) -> Result<String, DbError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let parsed = Url::parse(&normalized)
        .map_err(|err| DbError::Unavailable(format!("invalid endpoint '{endpoint}': {err}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| DbError::Unavailable(format!("missing host in endpoint '{endpoint}'")))?;
    // the url crate would default ws:// to 80; surreal listens on 8000
    let port = parsed.port().unwrap_or(match parsed.scheme() {
        "wss" | "https" => 443,
        _ => 8000,
    });
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_endpoints_default_to_ws_and_port_8000() {
        assert_eq!(socket_address("127.0.0.1").unwrap(), "127.0.0.1:8000");
        assert_eq!(socket_address("ws://db.internal").unwrap(), "db.internal:8000");
    }

    #[test]
    fn explicit_ports_are_kept() {
        assert_eq!(
            socket_address("ws://127.0.0.1:9100").unwrap(),
            "127.0.0.1:9100"
        );
    }
}
