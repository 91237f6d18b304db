// Shared helpers for HTTP routes

use axum::http::StatusCode;
use genrelay_core::PoolError;

/// Map a pool error to its HTTP status
///
/// Queue-full is the backpressure signal and becomes 429 so clients know to
/// back off and retry.
pub fn pool_error_status(error: &PoolError) -> StatusCode {
    match error {
        PoolError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        PoolError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        PoolError::ShuttingDown(_) => StatusCode::SERVICE_UNAVAILABLE,
        PoolError::ShutdownTimeout => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_queue_full_maps_to_429() {
        let err = PoolError::QueueFull {
            pool: "agent".into(),
            capacity: 10,
        };
        assert_eq!(pool_error_status(&err), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            pool_error_status(&PoolError::TaskNotFound(Uuid::now_v7())),
            StatusCode::NOT_FOUND
        );
    }
}
