use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_state::StoreError;
use tracing::warn;

/// A store failure rendered as an HTTP error with a JSON `ErrorBody`.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StoreError::LeaseNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Compacted { .. } => StatusCode::GONE,
            StoreError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            StoreError::Unavailable(_) | StoreError::Protocol(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, "Store request failed");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(StoreError::LeaseNotFound(1)).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(StoreError::Compacted {
                requested: 1,
                compacted: 4
            })
            .status(),
            StatusCode::GONE
        );
        assert_eq!(ApiError(StoreError::Closed).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError(StoreError::InvalidArgument("ttl".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
