//! Key provider factory for vault-backed encryption keys
//!
//! This module provides the factory contract through which the encryption
//! subsystem obtains a key provider whose vault requests are authorized by
//! service-principal credentials.

pub mod factory;

pub use factory::*;
