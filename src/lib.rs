//! keywarden - Azure Key Vault credential provider
//!
//! A service-principal credential provider that obtains and keeps fresh an
//! OAuth2 bearer access token, backing key providers that fetch encryption
//! keys from Azure Key Vault.

pub mod auth;
pub mod error;
pub mod provider;
pub mod utils;

// Re-export commonly used types
pub use auth::credentials::{Credentials, ServicePrincipalConfig, ServicePrincipalCredentials};
pub use auth::token::{AccessToken, ResourceScope};
pub use error::{KeywardenError, Result};
pub use provider::factory::{AzureKeyProviderFactory, KeyProvider, KeyProviderFactory};
