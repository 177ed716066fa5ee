//! Error type returned by every HTTP handler.
//!
//! [`ServerError`] implements [`IntoResponse`] so failures always reach the
//! caller as a JSON body. Internal failures are logged in full and reported
//! with a generic message; file paths and SQL never leave the process.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use convo_core::error::ErrorCode;
use convo_core::runner::{MigrationError, MigrationReport};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed body, unknown collection, unsupported action.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Another run holds the migration lock.
    #[error("migration already running: lock held by {holder} until {expires_at}")]
    Locked {
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Loading conversations failed part way; the partial report is returned.
    #[error("failed to load conversations: {message}")]
    Load {
        message: String,
        report: Box<MigrationReport>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest(_) => ErrorCode::InvalidEnumValue,
            Self::Locked { .. } => ErrorCode::LockContention,
            Self::Load { .. } => ErrorCode::StoreUnavailable,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let code = self.code().code();
        match self {
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message, "errorCode": code })),
            )
                .into_response(),
            Self::Locked { holder, expires_at } => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": format!("migration already running (lock held by {holder})"),
                    "errorCode": code,
                    "holder": holder,
                    "expiresAt": expires_at,
                })),
            )
                .into_response(),
            Self::Load { message, report } => {
                error!(error = %message, scanned = report.records_scanned, "migration load failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "failed to load conversations",
                        "errorCode": code,
                        "report": report,
                    })),
                )
                    .into_response()
            }
            Self::Internal(message) => {
                error!(message = %message, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error", "errorCode": code })),
                )
                    .into_response()
            }
        }
    }
}

impl From<MigrationError> for ServerError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Locked { holder, expires_at } => Self::Locked { holder, expires_at },
            MigrationError::Load { source, report } => Self::Load {
                message: source.to_string(),
                report,
            },
            other @ MigrationError::Lock(_) => Self::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = ?err, "converting anyhow error to ServerError::Internal");
        Self::Internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn bad_request_is_400_with_message() {
        let response = ServerError::BadRequest("unknown collection 'fax'".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unknown collection 'fax'");
    }

    #[tokio::test]
    async fn locked_is_409_naming_the_holder() {
        let response = ServerError::Locked {
            holder: "cli:7".into(),
            expires_at: Utc::now(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["holder"], "cli:7");
        assert_eq!(body["errorCode"], "E5001");
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ServerError::Internal("/secret/path.db: disk I/O".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal server error");
    }
}
