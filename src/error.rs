//! Error types for the actor runtime.
//!
//! Errors inside a message handler never reach this type: they are caught
//! by the dispatcher. Everything here is returned from setup and control
//! calls (launch, send, start).

use crate::MPMC::Structs::message::Address;
use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Module errors
    // =========================================================================
    #[error("Module not found: {name}, tried: {tried}")]
    ModuleNotFound { name: String, tried: String },

    #[error("Invalid module path: {path}, reason: {reason}")]
    InvalidModulePath { path: String, reason: String },

    #[error("Module table full: {max} modules registered")]
    ModuleTableFull { max: usize },

    #[error("Module already registered: {name}")]
    ModuleExists { name: String },

    // =========================================================================
    // Service errors
    // =========================================================================
    #[error("Service init failed: {module}, reason: {reason}")]
    ServiceInitFailed { module: String, reason: String },

    #[error("Service not found: {address}")]
    ServiceNotFound { address: Address },

    #[error("Service name not found: {name}")]
    NameNotFound { name: String },

    #[error("Name already bound: {name} -> {address}")]
    NameConflict { name: String, address: Address },

    #[error("Invalid service name: {name:?}, reason: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Handle space exhausted: {live} live services")]
    HandleSpaceExhausted { live: usize },

    // =========================================================================
    // Scheduler errors
    // =========================================================================
    #[error("Coroutine spawn failed: {reason}")]
    CoroutineSpawn { reason: String },

    #[error("Failed to spawn {role} thread: {source}")]
    ThreadSpawn {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Runtime already started")]
    AlreadyStarted,

    // =========================================================================
    // Process errors
    // =========================================================================
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("Daemon error: {reason}")]
    Daemon { reason: String },

    #[error("Signal handler error: {reason}")]
    Signal { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the error a send returns when the destination is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ServiceNotFound { .. } | Error::NameNotFound { .. }
        )
    }
}
