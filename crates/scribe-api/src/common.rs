// Shared helpers for HTTP handlers

use axum::http::StatusCode;

use scribe_core::Error;

/// Map platform errors onto HTTP statuses, logging the server-side ones.
pub fn http_error(err: Error) -> StatusCode {
    match err {
        Error::Validation(msg) => {
            tracing::debug!("Rejected request: {}", msg);
            StatusCode::BAD_REQUEST
        }
        Error::Authorization(msg) => {
            tracing::debug!("Denied request: {}", msg);
            StatusCode::FORBIDDEN
        }
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(msg) => {
            tracing::debug!("Conflicting request: {}", msg);
            StatusCode::CONFLICT
        }
        Error::Storage(msg) => {
            tracing::error!("Storage error: {}", msg);
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Internal(e) => {
            tracing::error!("Internal error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            http_error(Error::validation("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            http_error(Error::authorization("x")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(http_error(Error::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(http_error(Error::conflict("x")), StatusCode::CONFLICT);
        assert_eq!(
            http_error(Error::storage("x")),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
