//! sn-core: Core types, errors and configuration for selnet
//!
//! This crate provides the shared types, the error taxonomy and the
//! configuration structures used by the reactor and the `selnet` binary.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::NetError;
pub use types::SessionStatus;
