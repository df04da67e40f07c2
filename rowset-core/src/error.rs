use thiserror::Error;

/// Missing or inconsistent wiring detected at a structural call site: an
/// undeclared primary component, an absent collaborator, an unknown sort
/// direction, an unresolvable join key. Always fatal, never retried.
///
/// Carried inside the crate [`Error`](crate::Error) and recoverable by
/// downcast:
///
/// ```rust,ignore
/// let error = collection.set_primary(primary).unwrap_err();
/// assert!(error.is::<ConfigurationError>());
/// ```
#[derive(Debug, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(String);

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A well-formed call handed malformed data: an item that cannot carry the
/// declared key, a value that cannot act as a key, a cascade resolver
/// producing the wrong shape. Fatal at the call site.
#[derive(Debug, Error)]
#[error("data error: {0}")]
pub struct DataError(String);

impl DataError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
