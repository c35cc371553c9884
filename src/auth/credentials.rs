//! Service-principal credentials for Azure Entra ID
//!
//! This module implements the OAuth2 client-credentials grant against the
//! Entra ID token endpoint, with either a shared client secret or a signed
//! client assertion derived from an X.509 certificate. Downstream key
//! providers depend only on the [`Credentials`] contract, never on the
//! concrete flow.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use crate::auth::assertion::{AssertionSigner, CertificateSigner};
use crate::auth::token::{parse_token_response, AccessToken, ResourceScope};
use crate::error::{KeywardenError, Result};
use crate::utils::network::{classify_network_error, create_http_client, NetworkConfig};
use crate::utils::retry::{retry_with_backoff, RetryOptions};

#[cfg(test)]
use mockall::automock;

const SERVICE_PRINCIPAL_NAME: &str = "ServicePrincipalCredentials";
const DEFAULT_AUTHORITY_HOST: &str = "login.microsoftonline.com";
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Cached tokens are renewed this long before their actual expiry.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

/// Credential capability consumed by key providers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Credentials: Send + Sync {
    /// Human-readable credential name for diagnostics.
    fn get_name(&self) -> &str;

    /// Unconditionally run the authentication flow for `resource` and
    /// replace the cached token with the result.
    async fn refresh(&self, resource: &ResourceScope) -> Result<AccessToken>;

    /// Return the cached token while it is valid for `resource`;
    /// refresh otherwise.
    async fn get_token(&self, resource: &ResourceScope) -> Result<AccessToken>;
}

/// Configuration for [`ServicePrincipalCredentials`].
///
/// Exactly one of `client_secret` and `client_certificate` must be set.
/// The endpoint fields default to the public Entra ID authority and can be
/// overridden per instance.
#[derive(Clone)]
pub struct ServicePrincipalConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// PEM bundle holding the client certificate and its private key
    pub client_certificate: Option<String>,
    pub authority_host: String,
    pub port: u16,
    pub is_secured: bool,
    pub network: NetworkConfig,
    pub retry: RetryOptions,
}

impl Default for ServicePrincipalConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            client_certificate: None,
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            port: 443,
            is_secured: true,
            network: NetworkConfig::default(),
            retry: RetryOptions::default(),
        }
    }
}

impl fmt::Debug for ServicePrincipalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field(
                "client_certificate",
                &self.client_certificate.as_ref().map(|_| "<redacted>"),
            )
            .field("authority_host", &self.authority_host)
            .field("port", &self.port)
            .field("is_secured", &self.is_secured)
            .finish()
    }
}

/// The authentication material, fixed at construction.
enum AuthFlow {
    ClientSecret(Zeroizing<String>),
    ClientAssertion(Arc<dyn AssertionSigner>),
}

impl AuthFlow {
    fn describe(&self) -> &'static str {
        match self {
            AuthFlow::ClientSecret(_) => "client secret",
            AuthFlow::ClientAssertion(_) => "client assertion",
        }
    }
}

/// Service-principal credentials speaking the OAuth2 client-credentials
/// dialect of the Entra ID v2.0 token endpoint.
pub struct ServicePrincipalCredentials {
    tenant_id: String,
    client_id: String,
    flow: AuthFlow,
    token_endpoint: Url,
    client: Client,
    retry: RetryOptions,
    cached: Mutex<Option<(ResourceScope, AccessToken)>>,
}

impl ServicePrincipalCredentials {
    /// Build credentials that own their HTTP client, configured from
    /// `config.network` (timeouts, truststore).
    pub fn new(config: ServicePrincipalConfig) -> Result<Self> {
        let client = create_http_client(&config.network)?;
        Self::with_http_client(config, client)
    }

    /// Build credentials on a shared HTTP transport. `config.network` is
    /// not consulted in this form; the transport settings belong to whoever
    /// built `client`.
    pub fn with_http_client(config: ServicePrincipalConfig, client: Client) -> Result<Self> {
        let flow = match (&config.client_secret, &config.client_certificate) {
            (Some(secret), None) => AuthFlow::ClientSecret(Zeroizing::new(secret.clone())),
            (None, Some(pem)) => AuthFlow::ClientAssertion(Arc::new(CertificateSigner::from_pem(
                config.client_id.clone(),
                pem,
            )?)),
            (Some(_), Some(_)) => {
                return Err(KeywardenError::config(
                    "Both client_secret and client_certificate are set; exactly one is required",
                ))
            }
            (None, None) => {
                return Err(KeywardenError::config(
                    "One of client_secret or client_certificate is required",
                ))
            }
        };
        Self::assemble(config, flow, client)
    }

    /// Build credentials around an external assertion signer, for setups
    /// where the private key never leaves its keystore.
    pub fn with_assertion_signer(
        config: ServicePrincipalConfig,
        signer: Arc<dyn AssertionSigner>,
        client: Client,
    ) -> Result<Self> {
        if config.client_secret.is_some() || config.client_certificate.is_some() {
            return Err(KeywardenError::config(
                "An assertion signer cannot be combined with inline secret or certificate material",
            ));
        }
        Self::assemble(config, AuthFlow::ClientAssertion(signer), client)
    }

    fn assemble(config: ServicePrincipalConfig, flow: AuthFlow, client: Client) -> Result<Self> {
        if config.tenant_id.is_empty() {
            return Err(KeywardenError::config("tenant_id is required"));
        }
        if config.client_id.is_empty() {
            return Err(KeywardenError::config("client_id is required"));
        }

        let scheme = if config.is_secured { "https" } else { "http" };
        let endpoint = format!(
            "{}://{}:{}/{}/oauth2/v2.0/token",
            scheme, config.authority_host, config.port, config.tenant_id
        );
        let token_endpoint = Url::parse(&endpoint).map_err(|e| {
            KeywardenError::config(format!("Malformed token endpoint '{}': {}", endpoint, e))
        })?;

        Ok(Self {
            tenant_id: config.tenant_id,
            client_id: config.client_id,
            flow,
            token_endpoint,
            client,
            retry: config.retry,
            cached: Mutex::new(None),
        })
    }

    /// The composed token endpoint URL.
    pub fn token_endpoint(&self) -> &str {
        self.token_endpoint.as_str()
    }

    fn host(&self) -> &str {
        self.token_endpoint.host_str().unwrap_or(DEFAULT_AUTHORITY_HOST)
    }

    async fn run_flow(&self, resource: &ResourceScope) -> Result<AccessToken> {
        match &self.flow {
            AuthFlow::ClientSecret(secret) => self.refresh_with_secret(resource, secret).await,
            AuthFlow::ClientAssertion(signer) => {
                self.refresh_with_assertion(resource, signer.as_ref()).await
            }
        }
    }

    async fn refresh_with_secret(
        &self,
        resource: &ResourceScope,
        secret: &str,
    ) -> Result<AccessToken> {
        debug!(
            host = self.host(),
            tenant = %self.tenant_id,
            "Refreshing access token via client secret flow"
        );
        let scope = resource.as_scope();
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", secret),
            ("scope", scope.as_str()),
        ];
        self.post_token_request(&params, "client secret").await
    }

    async fn refresh_with_assertion(
        &self,
        resource: &ResourceScope,
        signer: &dyn AssertionSigner,
    ) -> Result<AccessToken> {
        debug!(
            host = self.host(),
            tenant = %self.tenant_id,
            "Refreshing access token via client assertion flow"
        );
        // The assertion audience is the token endpoint itself.
        let assertion = signer.sign(self.token_endpoint.as_str())?;
        let scope = resource.as_scope();
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
            ("scope", scope.as_str()),
        ];
        self.post_token_request(&params, "client assertion").await
    }

    /// POST the form to the token endpoint through the retry executor and
    /// parse the response. 5xx responses and transport failures are retried;
    /// a 4xx rejection short-circuits after a single attempt.
    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
        flow: &str,
    ) -> Result<AccessToken> {
        let host = self.host();
        let result = retry_with_backoff(
            || async move {
                let response = self
                    .client
                    .post(self.token_endpoint.clone())
                    .form(params)
                    .send()
                    .await
                    .map_err(|e| classify_network_error(&e, host))?;

                let status = response.status();
                if status.is_server_error() {
                    return Err(KeywardenError::network(format!(
                        "Identity endpoint '{}' returned HTTP {}",
                        host, status
                    )));
                }
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(KeywardenError::authentication(format!(
                        "{} flow rejected by '{}': HTTP {}: {}",
                        flow, host, status, body
                    )));
                }

                let received_at = Utc::now();
                let body = response
                    .text()
                    .await
                    .map_err(|e| classify_network_error(&e, host))?;
                parse_token_response(&body, received_at)
            },
            self.retry.clone(),
        )
        .await;

        result.map_err(|e| match e {
            e @ KeywardenError::AuthenticationError(_) | e @ KeywardenError::ProtocolError(_) => e,
            other => KeywardenError::authentication(format!(
                "{} flow against '{}' failed: {}",
                flow, host, other
            )),
        })
    }
}

#[async_trait]
impl Credentials for ServicePrincipalCredentials {
    fn get_name(&self) -> &str {
        SERVICE_PRINCIPAL_NAME
    }

    /// Every call performs a fresh token exchange; the cached token is
    /// replaced wholesale on success and left untouched on failure.
    async fn refresh(&self, resource: &ResourceScope) -> Result<AccessToken> {
        let token = self.run_flow(resource).await?;
        let mut cached = self.cached.lock().await;
        *cached = Some((resource.clone(), token.clone()));
        Ok(token)
    }

    /// Cache policy: a cached token is reused while it matches `resource`
    /// and is not within the expiry slack. Concurrent callers serialize on
    /// the cache lock, so one exchange satisfies all of them and an expired
    /// token is never returned.
    async fn get_token(&self, resource: &ResourceScope) -> Result<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some((scope, token)) = cached.as_ref() {
            if scope == resource
                && !token.expires_within(ChronoDuration::seconds(TOKEN_EXPIRY_SLACK_SECS))
            {
                return Ok(token.clone());
            }
        }

        let token = self.run_flow(resource).await?;
        *cached = Some((resource.clone(), token.clone()));
        Ok(token)
    }
}

impl fmt::Display for ServicePrincipalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[tenant={}, client={}]",
            SERVICE_PRINCIPAL_NAME, self.tenant_id, self.client_id
        )
    }
}

impl fmt::Debug for ServicePrincipalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("flow", &self.flow.describe())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish()
    }
}
