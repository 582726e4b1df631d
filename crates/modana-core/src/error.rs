//! Crate-wide error type.
//!
//! Each service has its own error enum; [`Error`] wraps them for callers
//! that drive several services at once.

use crate::command::CommandError;
use crate::communicator::CommunicatorError;
use crate::config::ConfigError;
use crate::datastore::DataStoreError;
use crate::extension::{ExtensionError, InitError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Communicator(#[from] CommunicatorError),

    #[error(transparent)]
    DataStore(#[from] DataStoreError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for modana operations.
pub type Result<T> = std::result::Result<T, Error>;
