//! Key provider construction from an options bag
//!
//! The factory validates the vendor-specific options, builds a
//! [`ServicePrincipalCredentials`] instance and wraps it in a shared key
//! provider. The key-retrieval protocol against the vault is the vault
//! client's concern; the contract here covers identity and authorization.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::auth::credentials::{Credentials, ServicePrincipalConfig, ServicePrincipalCredentials};
use crate::auth::token::{AccessToken, ResourceScope};
use crate::error::{KeywardenError, Result};
use crate::utils::network::{create_http_client, NetworkConfig};

/// Option keys understood by [`AzureKeyProviderFactory`]
pub const OPT_TENANT_ID: &str = "azure_tenant_id";
pub const OPT_CLIENT_ID: &str = "azure_client_id";
pub const OPT_CLIENT_SECRET: &str = "azure_client_secret";
/// Path to a PEM bundle with the client certificate and its private key
pub const OPT_CLIENT_CERTIFICATE: &str = "azure_client_certificate";
/// Vault resource URI tokens are requested for, e.g. `https://myvault.vault.azure.net`
pub const OPT_VAULT_ENDPOINT: &str = "azure_vault_endpoint";
/// Identity authority override, e.g. `https://login.microsoftonline.us`
pub const OPT_AUTHORITY: &str = "azure_authority";
pub const OPT_TRUSTSTORE: &str = "azure_truststore";
pub const OPT_PRIORITY_STRING: &str = "azure_priority_string";

/// Shared resources supplied by the encryption subsystem.
pub trait EncryptionContext: Send + Sync {
    /// HTTP transport shared by providers constructed in this context.
    fn http_client(&self) -> Client;
}

/// Default context owning a client built from a [`NetworkConfig`].
pub struct SystemContext {
    client: Client,
}

impl SystemContext {
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            client: create_http_client(network)?,
        })
    }
}

impl EncryptionContext for SystemContext {
    fn http_client(&self) -> Client {
        self.client.clone()
    }
}

/// A vault-backed source of encryption keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Human-readable provider name for diagnostics.
    fn get_name(&self) -> &str;

    /// Bearer token authorizing requests against the provider's vault.
    async fn vault_token(&self) -> Result<AccessToken>;
}

/// Key provider for Azure Key Vault, authorized by service-principal
/// credentials. Shared between the factory caller and the encryption
/// subsystem; lives until the last holder releases it.
pub struct AzureKeyProvider {
    name: String,
    credentials: Arc<dyn Credentials>,
    vault_scope: ResourceScope,
}

impl AzureKeyProvider {
    pub fn new(credentials: Arc<dyn Credentials>, vault_endpoint: &str) -> Self {
        Self {
            name: format!("AzureKeyProvider[{}]", vault_endpoint),
            credentials,
            vault_scope: ResourceScope::new(vault_endpoint),
        }
    }
}

#[async_trait]
impl KeyProvider for AzureKeyProvider {
    fn get_name(&self) -> &str {
        &self.name
    }

    async fn vault_token(&self) -> Result<AccessToken> {
        self.credentials.get_token(&self.vault_scope).await
    }
}

/// Constructs key providers from an options bag; stateless.
pub trait KeyProviderFactory: Send + Sync {
    fn get_provider(
        &self,
        context: &dyn EncryptionContext,
        options: &HashMap<String, String>,
    ) -> Result<Arc<dyn KeyProvider>>;
}

pub struct AzureKeyProviderFactory;

fn require_option<'a>(options: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    options
        .get(key)
        .map(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| KeywardenError::config(format!("Option '{}' is required", key)))
}

fn apply_authority(config: &mut ServicePrincipalConfig, authority: &str) -> Result<()> {
    let url = Url::parse(authority)
        .map_err(|e| KeywardenError::config(format!("Invalid authority '{}': {}", authority, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| KeywardenError::config(format!("Authority '{}' has no host", authority)))?;

    config.is_secured = url.scheme() != "http";
    config.authority_host = host.to_string();
    config.port = url.port_or_known_default().unwrap_or(443);
    Ok(())
}

impl KeyProviderFactory for AzureKeyProviderFactory {
    /// Validate the options, construct the credentials and wrap them in a
    /// shared provider. No network call occurs here; the first token
    /// exchange is deferred until the provider is used.
    fn get_provider(
        &self,
        context: &dyn EncryptionContext,
        options: &HashMap<String, String>,
    ) -> Result<Arc<dyn KeyProvider>> {
        let tenant_id = require_option(options, OPT_TENANT_ID)?;
        let client_id = require_option(options, OPT_CLIENT_ID)?;
        let vault_endpoint = require_option(options, OPT_VAULT_ENDPOINT)?;

        let client_secret = options.get(OPT_CLIENT_SECRET).filter(|v| !v.is_empty());
        let certificate_path = options.get(OPT_CLIENT_CERTIFICATE).filter(|v| !v.is_empty());

        // The credentials constructor checks this too, but here the message
        // can name the offending option keys.
        match (&client_secret, &certificate_path) {
            (Some(_), Some(_)) => {
                return Err(KeywardenError::config(format!(
                    "Options '{}' and '{}' are mutually exclusive",
                    OPT_CLIENT_SECRET, OPT_CLIENT_CERTIFICATE
                )))
            }
            (None, None) => {
                return Err(KeywardenError::config(format!(
                    "One of '{}' or '{}' is required",
                    OPT_CLIENT_SECRET, OPT_CLIENT_CERTIFICATE
                )))
            }
            _ => {}
        }

        let client_certificate = certificate_path
            .map(|path| {
                std::fs::read_to_string(path).map_err(|e| {
                    KeywardenError::config(format!(
                        "Failed to read client certificate '{}': {}",
                        path, e
                    ))
                })
            })
            .transpose()?;

        let mut config = ServicePrincipalConfig {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.cloned(),
            client_certificate,
            ..Default::default()
        };

        if let Some(authority) = options.get(OPT_AUTHORITY).filter(|v| !v.is_empty()) {
            apply_authority(&mut config, authority)?;
        }

        let truststore = options.get(OPT_TRUSTSTORE).filter(|v| !v.is_empty());
        let priority_string = options.get(OPT_PRIORITY_STRING).filter(|v| !v.is_empty());

        // A dedicated transport is only needed when the options carry their
        // own TLS settings; otherwise the context's shared client serves.
        let credentials = if truststore.is_some() || priority_string.is_some() {
            config.network.truststore = truststore.map(PathBuf::from);
            config.network.priority_string = priority_string.cloned();
            ServicePrincipalCredentials::new(config)?
        } else {
            ServicePrincipalCredentials::with_http_client(config, context.http_client())?
        };

        debug!(
            credentials = %credentials,
            vault = vault_endpoint,
            "Constructed Azure key provider"
        );

        Ok(Arc::new(AzureKeyProvider::new(
            Arc::new(credentials),
            vault_endpoint,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MockCredentials;
    use chrono::{Duration, Utc};
    use std::io::Write;

    fn base_options() -> HashMap<String, String> {
        HashMap::from([
            (OPT_TENANT_ID.to_string(), "tenant-1".to_string()),
            (OPT_CLIENT_ID.to_string(), "client-1".to_string()),
            (OPT_CLIENT_SECRET.to_string(), "secret-1".to_string()),
            (
                OPT_VAULT_ENDPOINT.to_string(),
                "https://keys.vault.azure.net".to_string(),
            ),
        ])
    }

    fn context() -> SystemContext {
        SystemContext::new(&NetworkConfig::default()).unwrap()
    }

    #[test]
    fn test_get_provider_with_secret_options() {
        let provider = AzureKeyProviderFactory
            .get_provider(&context(), &base_options())
            .unwrap();
        assert!(provider.get_name().contains("keys.vault.azure.net"));
    }

    #[test]
    fn test_missing_tenant_fails_fast() {
        let mut options = base_options();
        options.remove(OPT_TENANT_ID);

        let result = AzureKeyProviderFactory.get_provider(&context(), &options);
        match result {
            Err(KeywardenError::ConfigError(msg)) => assert!(msg.contains(OPT_TENANT_ID)),
            Err(other) => panic!("expected config error, got {:?}", other),
            Ok(_) => panic!("expected config error, got a provider"),
        }
    }

    #[test]
    fn test_ambiguous_material_fails_fast() {
        let mut options = base_options();
        options.insert(OPT_CLIENT_CERTIFICATE.to_string(), "/tmp/cert.pem".to_string());

        let result = AzureKeyProviderFactory.get_provider(&context(), &options);
        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
    }

    #[test]
    fn test_missing_material_fails_fast() {
        let mut options = base_options();
        options.remove(OPT_CLIENT_SECRET);

        let result = AzureKeyProviderFactory.get_provider(&context(), &options);
        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
    }

    #[test]
    fn test_unreadable_certificate_fails_fast() {
        let mut options = base_options();
        options.remove(OPT_CLIENT_SECRET);
        options.insert(
            OPT_CLIENT_CERTIFICATE.to_string(),
            "/nonexistent/cert.pem".to_string(),
        );

        let result = AzureKeyProviderFactory.get_provider(&context(), &options);
        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_certificate_contents_fail_fast() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a pem bundle").unwrap();

        let mut options = base_options();
        options.remove(OPT_CLIENT_SECRET);
        options.insert(
            OPT_CLIENT_CERTIFICATE.to_string(),
            file.path().to_string_lossy().into_owned(),
        );

        let result = AzureKeyProviderFactory.get_provider(&context(), &options);
        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
    }

    #[test]
    fn test_authority_override_parsing() {
        let mut config = ServicePrincipalConfig::default();

        apply_authority(&mut config, "http://localhost:8080").unwrap();
        assert_eq!(config.authority_host, "localhost");
        assert_eq!(config.port, 8080);
        assert!(!config.is_secured);

        apply_authority(&mut config, "https://login.microsoftonline.us").unwrap();
        assert_eq!(config.authority_host, "login.microsoftonline.us");
        assert_eq!(config.port, 443);
        assert!(config.is_secured);

        let result = apply_authority(&mut config, "not a url");
        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
    }

    #[test]
    fn test_provider_delegates_to_credentials() {
        let mut mock = MockCredentials::new();
        mock.expect_get_token()
            .withf(|scope| scope.as_str() == "https://keys.vault.azure.net")
            .returning(|_| Ok(AccessToken::new("tok-1", Utc::now() + Duration::hours(1))));

        let provider = AzureKeyProvider::new(Arc::new(mock), "https://keys.vault.azure.net");
        let token = tokio_test::block_on(provider.vault_token()).unwrap();
        assert_eq!(token.token, "tok-1");
    }
}
