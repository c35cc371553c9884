//! Utility functions module
//!
//! This module contains retry logic and HTTP transport configuration
//! shared by the credential providers.

pub mod network;
pub mod retry;

pub use network::*;
pub use retry::*;
