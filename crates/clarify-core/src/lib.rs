//! Clarify core: the clarification record types, the classified error
//! taxonomy, the cancellation context and configuration shared by every
//! entry store backend.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{ClarifyConfig, StorageConfig};
pub use context::Context;
pub use error::{Result, StoreError};
pub use types::*;
