//! Target connection check.
//!
//! [`test_connection`] is the standalone check behind the "test connection"
//! action: it opens a single connection, runs `SELECT 1` and reports the
//! outcome as data. Expected failures never surface as errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::core::TargetWriter;
use crate::error::{MigrateError, Result};
use crate::target::MysqlWriter;

/// MySQL: access denied for user.
const ER_ACCESS_DENIED: u16 = 1045;
/// MySQL: access denied for user to database.
const ER_DBACCESS_DENIED: u16 = 1044;
/// MySQL: unknown database.
const ER_BAD_DB: u16 = 1049;

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Authentication,
    UnknownDatabase,
    /// Host unreachable, refused, or the handshake broke.
    Network(String),
    Timeout(Duration),
    /// Any other server-side rejection.
    Server(String),
}

impl ConnectFailure {
    pub fn from_mysql(err: &mysql_async::Error, config: &ConnectionConfig) -> Self {
        match err {
            mysql_async::Error::Server(e) => match e.code {
                ER_ACCESS_DENIED | ER_DBACCESS_DENIED => ConnectFailure::Authentication,
                ER_BAD_DB => ConnectFailure::UnknownDatabase,
                _ => ConnectFailure::Server(e.message.clone()),
            },
            other => ConnectFailure::Network(format!(
                "cannot reach {}:{}: {}",
                config.host, config.port, other
            )),
        }
    }

    /// Operator-facing description. Never includes the password.
    pub fn message(&self, config: &ConnectionConfig) -> String {
        match self {
            ConnectFailure::Authentication => format!(
                "authentication failed for user '{}'",
                config.user
            ),
            ConnectFailure::UnknownDatabase => {
                format!("unknown database '{}'", config.database)
            }
            ConnectFailure::Network(m) => m.clone(),
            ConnectFailure::Timeout(d) => format!(
                "no response from {}:{} within {}s",
                config.host,
                config.port,
                d.as_secs_f64()
            ),
            ConnectFailure::Server(m) => format!("server rejected connection: {}", m),
        }
    }
}

/// Result of a connection test, shaped for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    /// "success" or "error".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConnectionTestResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".into(),
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Check the target within `timeout`. Never mutates target state.
///
/// Returns `Err` only for a config that fails validation; every connection
/// failure comes back as a `status: "error"` result.
pub async fn test_connection(
    config: &ConnectionConfig,
    timeout: Duration,
) -> Result<ConnectionTestResult> {
    config.validate()?;

    let result = match MysqlWriter::connect(config, 1, timeout).await {
        Ok(writer) => {
            writer.close().await;
            ConnectionTestResult::success(format!("Connected to {}", config.redacted()))
        }
        Err(MigrateError::Connectivity(message)) => ConnectionTestResult::error(message),
        Err(e) => ConnectionTestResult::error(e.to_string()),
    };

    if result.is_success() {
        info!("Connection test succeeded for {}", config.redacted());
    } else {
        warn!(
            "Connection test failed for {}: {}",
            config.redacted(),
            result.message.as_deref().unwrap_or_default()
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_async::ServerError;
    use std::time::Instant;

    fn config(port: u32) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".into(),
            port,
            user: "grafana".into(),
            password: "hunter2".into(),
            database: "grafana".into(),
        }
    }

    fn server(code: u16) -> mysql_async::Error {
        mysql_async::Error::Server(ServerError {
            code,
            message: "denied".into(),
            state: "28000".into(),
        })
    }

    #[test]
    fn test_failure_classification() {
        let c = config(3306);
        assert_eq!(
            ConnectFailure::from_mysql(&server(1045), &c),
            ConnectFailure::Authentication
        );
        assert_eq!(
            ConnectFailure::from_mysql(&server(1044), &c),
            ConnectFailure::Authentication
        );
        assert_eq!(
            ConnectFailure::from_mysql(&server(1049), &c),
            ConnectFailure::UnknownDatabase
        );
        assert!(matches!(
            ConnectFailure::from_mysql(&server(1130), &c),
            ConnectFailure::Server(_)
        ));
        let io: mysql_async::Error =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(
            ConnectFailure::from_mysql(&io, &c),
            ConnectFailure::Network(_)
        ));
    }

    #[test]
    fn test_messages_never_leak_password() {
        let c = config(3306);
        for failure in [
            ConnectFailure::Authentication,
            ConnectFailure::UnknownDatabase,
            ConnectFailure::Timeout(Duration::from_secs(5)),
        ] {
            assert!(!failure.message(&c).contains("hunter2"));
        }
        assert_eq!(
            ConnectFailure::UnknownDatabase.message(&c),
            "unknown database 'grafana'"
        );
    }

    #[test]
    fn test_result_serialization() {
        let json = serde_json::to_value(ConnectionTestResult::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": "nope"}));
    }

    #[tokio::test]
    async fn test_unreachable_port_returns_error_within_timeout() {
        let timeout = Duration::from_secs(3);
        let start = Instant::now();
        let result = test_connection(&config(1), timeout).await.unwrap();
        assert_eq!(result.status, "error");
        assert!(start.elapsed() < timeout + Duration::from_secs(2));
        assert!(!result.message.unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut c = config(3306);
        c.host = "  ".into();
        assert!(matches!(
            test_connection(&c, Duration::from_secs(1)).await,
            Err(MigrateError::Validation(_))
        ));
    }
}
