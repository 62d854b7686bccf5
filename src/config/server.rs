//! # Server Configuration
//!
//! HTTP and webhook server settings loaded from environment variables.

use super::{env_var_opt, env_var_or_default};
use std::path::PathBuf;
use std::str::FromStr;

/// How the webhook server obtains its serving certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Generate a CA and serving certificate locally
    #[default]
    SelfSigned,
    /// Request a serving certificate from the cluster signer
    ClusterIssued,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "self-signed" | "selfsigned" => Ok(Self::SelfSigned),
            "cluster-issued" | "clusterissued" | "csr" => Ok(Self::ClusterIssued),
            other => Err(format!("unknown TLS mode '{other}'")),
        }
    }
}

/// HTTP server configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server port for metrics and health probes
    pub metrics_port: u16,
    /// HTTPS port for admission webhooks
    pub webhook_port: u16,
    /// Server startup timeout (seconds)
    /// How long to wait for server to be ready before giving up
    pub startup_timeout_secs: u64,
    /// Server readiness poll interval (milliseconds)
    /// How often to check if server is ready during startup
    pub poll_interval_ms: u64,
    /// Certificate source when no files are supplied
    pub tls_mode: TlsMode,
    /// Externally supplied serving certificate (PEM)
    pub tls_cert_file: Option<PathBuf>,
    /// Externally supplied serving key (PEM)
    pub tls_key_file: Option<PathBuf>,
    /// Externally supplied CA bundle (PEM)
    pub tls_ca_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            tls_mode: TlsMode::default(),
            tls_cert_file: None,
            tls_key_file: None,
            tls_ca_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            webhook_port: env_var_or_default("WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            tls_mode: env_var_opt("TLS_MODE")
                .and_then(|v| match v.parse() {
                    Ok(mode) => Some(mode),
                    Err(e) => {
                        tracing::warn!("Ignoring TLS_MODE: {}", e);
                        None
                    }
                })
                .unwrap_or_default(),
            tls_cert_file: env_var_opt("TLS_CERT_FILE").map(PathBuf::from),
            tls_key_file: env_var_opt("TLS_KEY_FILE").map(PathBuf::from),
            tls_ca_file: env_var_opt("TLS_CA_FILE").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_mode_parsing() {
        assert_eq!("self-signed".parse::<TlsMode>(), Ok(TlsMode::SelfSigned));
        assert_eq!(
            "Cluster-Issued".parse::<TlsMode>(),
            Ok(TlsMode::ClusterIssued)
        );
        assert!("acme".parse::<TlsMode>().is_err());
    }
}
