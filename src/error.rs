//! # Errors
//!
//! Error taxonomy shared by the store synchronizer, the lease tracker and the
//! reconciler.
//!
//! Every variant maps to a stable [`Error::reason`] string. The reconciler is the
//! only place that turns an error into a user-visible condition, and it uses that
//! string as the condition reason.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Target object, lease or backend role path is absent
    #[error("{0} not found")]
    NotFound(String),

    /// Stale write rejected by the store (resourceVersion mismatch)
    #[error("conflict writing {0}: the object has been modified")]
    Conflict(String),

    /// Create rejected because the object already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Any other store failure
    #[error("store request failed: {message}")]
    Store { message: String, transient: bool },

    /// Transport failure or unavailable response from the credential backend
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend payload could not be decoded into the expected shape
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// Backend rejected the request with a non-retryable status
    #[error("backend rejected request with status {status}: {message}")]
    Backend { status: u16, message: String },

    /// Bounded retry loop exceeded its timeout
    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The request object failed validation
    #[error("invalid request: {0}")]
    Validation(String),

    /// Backend login failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable reason string, used as the condition reason on failure
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::Store { .. } => "StoreError",
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::MalformedResponse(_) => "MalformedResponse",
            Error::Backend { .. } => "BackendError",
            Error::RetryExhausted { .. } => "RetryExhausted",
            Error::Validation(_) => "InvalidRequest",
            Error::Authentication(_) => "AuthenticationFailed",
            Error::Serialization(_) => "SerializationError",
        }
    }

    /// Whether an immediate in-process retry may succeed
    ///
    /// Used by the bounded polling loops. NotFound is deliberately excluded:
    /// an object deleted out from under a writer aborts the loop.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Conflict(_) | Error::BackendUnavailable(_) => true,
            Error::Store { transient, .. } => *transient,
            Error::Backend { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the controller should re-drive the request on its backoff schedule
    ///
    /// Malformed responses, invalid requests and auth failures will fail the same
    /// way again until something outside the controller changes, so they wait for
    /// a spec change instead.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::MalformedResponse(_)
            | Error::Validation(_)
            | Error::Authentication(_)
            | Error::Serialization(_) => false,
            Error::RetryExhausted { .. } | Error::NotFound(_) | Error::AlreadyExists(_) => true,
            other => other.is_transient() || matches!(other, Error::Store { .. } | Error::Backend { .. }),
        }
    }

    /// Failure raised by the credential backend or its login
    #[must_use]
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable(_)
                | Error::MalformedResponse(_)
                | Error::Backend { .. }
                | Error::Authentication(_)
        )
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Map a kube client error for the object identified by `what`
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(api_err) => match api_err.code {
                404 => Error::NotFound(what.to_string()),
                409 if api_err.reason == "AlreadyExists" => Error::AlreadyExists(what.to_string()),
                409 => Error::Conflict(what.to_string()),
                code => Error::Store {
                    message: format!("{what}: {} ({code})", api_err.message),
                    transient: code == 429 || code >= 500,
                },
            },
            other => Error::Store {
                message: format!("{what}: {other}"),
                transient: true,
            },
        }
    }
}
