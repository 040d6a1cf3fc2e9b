use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

use crate::error::RoomError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = self.0.downcast_ref::<RoomError>() {
            return (
                err.status(),
                Json(json!({
                    "success": false,
                    "error": { "code": err.code(), "message": err.to_string() },
                })),
            )
                .into_response();
        }

        tracing::error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": { "code": "INTERNAL_ERROR", "message": self.0.to_string() },
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
