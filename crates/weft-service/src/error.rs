//! Service error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("codec error: {0}")]
    Core(#[from] weft_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] weft_transport::TransportError),

    /// The registration step for this interface type never ran
    #[error("{0} is not a registered interface type")]
    UnregisteredInterface(&'static str),

    #[error("interface {0} is already registered")]
    DuplicateInterface(&'static str),

    #[error("operation not valid for a service {0}")]
    RoleMismatch(&'static str),

    #[error("service host is not running")]
    NotStarted,

    #[error("service host is already running")]
    AlreadyRunning,

    #[error("configuration error: {0}")]
    Config(String),
}
