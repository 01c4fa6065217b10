use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stepwise_core::error::{ErrorKind, StepwiseError};

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// Failure envelope, rendered with the status derived from its kind.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub kind: ErrorKind,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    kind: ErrorKind,
}

impl ApiError {
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Body shared by HTTP errors and terminal stream errors.
    pub fn body(&self) -> Value {
        serde_json::to_value(ErrorBody {
            success: false,
            error: &self.message,
            kind: self.kind,
        })
        .unwrap_or(Value::Null)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState | ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::ProviderError => StatusCode::BAD_GATEWAY,
        ErrorKind::StreamError | ErrorKind::ExecutionFailed | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<StepwiseError> for ApiError {
    fn from(e: StepwiseError) -> Self {
        let kind = e.kind();
        Self {
            status: status_for(kind),
            message: e.to_string(),
            kind,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

/// JSON request body. An empty body yields `T::default()`; unreadable or
/// malformed bodies are rejected with the error envelope.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|e| {
            ApiError::from(StepwiseError::Validation(format!(
                "unreadable request body: {e}"
            )))
        })?;
        parse_body(&bytes).map(JsonBody)
    }
}

fn parse_body<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| {
        StepwiseError::Validation(format!("invalid JSON request body: {e}")).into()
    })
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Body of execute and stream requests.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(default = "empty_object", alias = "inputData")]
    pub input: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuspendBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeBody {
    #[serde(default = "empty_object")]
    pub resume_data: Value,
    /// Re-enter at this step instead of the saved cursor.
    #[serde(default)]
    pub step_id: Option<String>,
}

impl Default for ExecuteBody {
    fn default() -> Self {
        Self {
            input: empty_object(),
        }
    }
}

impl Default for ResumeBody {
    fn default() -> Self {
        Self {
            resume_data: empty_object(),
            step_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_body_shape() {
        let err = ApiError::from(StepwiseError::WorkflowNotFound("w".into()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(
            err.body(),
            json!({"success": false, "error": "Workflow not found: w", "kind": "NotFound"})
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidState), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::ExecutionFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_request_bodies_default() {
        let body: ExecuteBody = serde_json::from_value(json!({})).unwrap();
        assert_eq!(body.input, json!({}));
        let body: ResumeBody =
            serde_json::from_value(json!({"resumeData": {"extra": "c"}, "stepId": "writing"}))
                .unwrap();
        assert_eq!(body.resume_data, json!({"extra": "c"}));
        assert_eq!(body.step_id.as_deref(), Some("writing"));
    }

    #[test]
    fn test_empty_body_is_default() {
        let body: ExecuteBody = parse_body(b"").unwrap();
        assert_eq!(body.input, json!({}));
        let body: ResumeBody = parse_body(b"  \n").unwrap();
        assert_eq!(body.resume_data, json!({}));
        assert!(body.step_id.is_none());
        let body: SuspendBody = parse_body(b"").unwrap();
        assert!(body.reason.is_none());
    }

    #[test]
    fn test_malformed_body_is_validation_error() {
        let err = parse_body::<ExecuteBody>(b"{not json").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert_eq!(err.body()["success"], false);
        assert!(err.message.contains("invalid JSON request body"));
    }
}
