use crate::error::{KeywardenError, Result};
use reqwest::{Certificate, Client};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the HTTP transport used for identity and vault calls
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    /// PEM trust anchor added to the client's root store
    pub truststore: Option<PathBuf>,
    /// TLS priority string. Not interpreted here; forwarded to transports
    /// that understand it.
    pub priority_string: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            user_agent: format!("keywarden/{}", env!("CARGO_PKG_VERSION")),
            truststore: None,
            priority_string: None,
        }
    }
}

/// Create a properly configured HTTP client with timeouts and trust anchors
pub fn create_http_client(config: &NetworkConfig) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(&config.user_agent);

    if let Some(path) = &config.truststore {
        let pem = std::fs::read(path).map_err(|e| {
            KeywardenError::config(format!(
                "Failed to read truststore '{}': {}",
                path.display(),
                e
            ))
        })?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| KeywardenError::tls(format!("Invalid truststore certificate: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| KeywardenError::network(format!("Failed to create HTTP client: {}", e)))
}

/// Network error classification for identity endpoint calls
pub fn classify_network_error(error: &reqwest::Error, host: &str) -> KeywardenError {
    if error.is_timeout() {
        return KeywardenError::connection_timeout(format!(
            "Request to identity endpoint '{}' timed out",
            host
        ));
    }

    if error.is_connect() {
        return KeywardenError::network(format!(
            "Failed to connect to identity endpoint '{}': {}",
            host, error
        ));
    }

    let error_msg = error.to_string().to_lowercase();
    if error_msg.contains("ssl") || error_msg.contains("tls") || error_msg.contains("certificate") {
        return KeywardenError::tls(format!(
            "TLS error when contacting identity endpoint '{}': {}",
            host, error
        ));
    }

    if error.is_request() {
        return KeywardenError::invalid_url(format!(
            "Invalid request to identity endpoint '{}': {}",
            host, error
        ));
    }

    KeywardenError::network(format!(
        "Network error when contacting identity endpoint '{}': {}",
        host, error
    ))
}

/// Check if an error is transient and worth retrying.
///
/// Connection failures, timeouts and 5xx-class responses are transient;
/// authentication rejections, protocol and configuration errors are not.
pub fn is_retryable_error(error: &KeywardenError) -> bool {
    match error {
        KeywardenError::ConnectionTimeout(_) => true,
        KeywardenError::NetworkError(_) => true,
        KeywardenError::HttpError(e) => e.is_timeout() || e.is_connect(),
        _ => false,
    }
}
