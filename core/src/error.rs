use thiserror::Error;

/// Failures talking to the key/value substrate.
#[derive(Error, Debug)]
pub enum SubstrateError {
    #[error("substrate unavailable: {0}")]
    Unavailable(String),
    #[error("key {0} not found")]
    NotFound(String),
    #[error("substrate response could not be decoded: {0}")]
    Decode(String),
}

impl SubstrateError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self { SubstrateError::Unavailable(err.to_string()) }
}

/// Errors surfaced by the registration core. `Invalid` carries the
/// human-readable message returned to the caller.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("{0}")]
    Invalid(String),
    #[error("resource not found")]
    NotFound,
    #[error("node {0} is not registered")]
    UnknownNode(String),
    #[error("health for node {0} has lapsed")]
    HealthLapsed(String),
    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

/// Errors surfaced by the query core and subscription manager.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0}")]
    Invalid(String),
    #[error("not found")]
    NotFound,
    #[error("subscription {0} not found")]
    SubscriptionNotFound(uuid::Uuid),
    #[error("subscription {0} is not persistent")]
    NotPersistent(uuid::Uuid),
    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}
