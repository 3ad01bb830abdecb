//! Unified error taxonomy for the query gateway.
//!
//! Every failure on the request path maps to one of these variants; the
//! HTTP layer decides the status code, this crate only classifies. Errors
//! discovered after streaming has begun can no longer change the response
//! status and are handled inside the stream loop instead.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The named-query source was missing or malformed. Non-fatal: the
    /// registry falls back to empty.
    #[error("query configuration: {0}")]
    ConfigLoad(anyhow::Error),

    /// Malformed request body or parameters, rejected before any backend
    /// contact.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown named query, rejected before any backend contact.
    #[error("query not found")]
    QueryNotFound,

    /// The circuit breaker is rejecting calls to the backend.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// The backend call failed, including deadline expiry. Counted as a
    /// circuit breaker failure.
    #[error("query execution failed: {0}")]
    Backend(anyhow::Error),

    /// Column/value arity mismatch while mapping a row mid-stream.
    #[error("column count does not match for row mapping ({columns} columns, {values} values)")]
    RowMapping { columns: usize, values: usize },
}

impl From<tokio_postgres::Error> for GatewayError {
    fn from(err: tokio_postgres::Error) -> Self {
        GatewayError::Backend(err.into())
    }
}

impl GatewayError {
    /// True for errors that never reached the backend.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            GatewayError::BadRequest(_) | GatewayError::QueryNotFound
        )
    }
}
