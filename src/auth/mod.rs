//! Authentication module for Azure Entra ID
//!
//! This module provides service-principal authentication against the
//! Entra ID token endpoint using the OAuth2 client-credentials grant,
//! with either a client secret or a certificate-derived client assertion.

pub mod assertion;
pub mod credentials;
pub mod token;

pub use assertion::*;
pub use credentials::*;
pub use token::*;
