use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    /// The user supplied certificate secret or CA configmap is absent or lacks a field.
    #[error("SourceMaterialMissing: {0}")]
    SourceMaterialMissing(String),

    #[error("StoreReadFailed: {0}")]
    StoreReadFailed(#[source] StoreError),

    #[error("StoreWriteFailed: {0}")]
    StoreWriteFailed(#[source] StoreError),

    /// A built document failed its own consistency checks. Programming error.
    #[error("InvariantViolation: {0}")]
    InvariantViolation(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        match self {
            StdError::JsonSerializationError(_) => "jsonserializationerror",
            StdError::KubeError(_) => "kubeerror",
            StdError::FinalizerError(_) => "finalizererror",
            StdError::MetadataMissing(_) => "metadatamissing",
            StdError::SourceMaterialMissing(_) => "sourcematerialmissing",
            StdError::StoreReadFailed(_) => "storereadfailed",
            StdError::StoreWriteFailed(_) => "storewritefailed",
            StdError::InvariantViolation(_) => "invariantviolation",
        }
        .to_string()
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    /// The leaf cause, regardless of whether a requeue was attached.
    pub fn std_error(&self) -> &StdError {
        match self {
            Error::StdError(e) => e,
            Error::ErrorWithRequeue(e) => &e.error,
        }
    }
}

impl From<StdError> for Error {
    fn from(e: StdError) -> Self {
        Error::StdError(e)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_label_ignores_requeue_wrapper() {
        let plain = Error::StdError(StdError::SourceMaterialMissing("ca.crt".into()));
        let requeued = Error::ErrorWithRequeue(ErrorWithRequeue::new(
            StdError::SourceMaterialMissing("ca.crt".into()),
            Duration::from_secs(10),
        ));

        assert_eq!(plain.metric_label(), "sourcematerialmissing");
        assert_eq!(requeued.metric_label(), plain.metric_label());
        assert!(matches!(
            requeued.std_error(),
            StdError::SourceMaterialMissing(_)
        ));
    }
}
