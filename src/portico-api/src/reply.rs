use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use portico_errors::ControlError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// Largest request body the API accepts.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Failure answered as `{"message", "status"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let body = json!({ "message": self.message, "status": self.status.as_u16() });
        simple(self.status, Bytes::from(body.to_string()), "application/json")
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(kind = err.kind(), "{err}");
        }
        Self::new(status, err.to_string())
    }
}

pub type ApiResult = Result<Response<Full<Bytes>>, ApiError>;

pub fn simple(status: StatusCode, body: Bytes, content_type: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

pub fn json_reply<T: Serialize>(status: StatusCode, value: &T) -> ApiResult {
    let body = serde_json::to_vec(value).map_err(|e| {
        error!("could not encode response: {e}");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "could not encode response")
    })?;
    Ok(simple(status, Bytes::from(body), "application/json"))
}

pub fn ok<T: Serialize>(value: &T) -> ApiResult {
    json_reply(StatusCode::OK, value)
}

/// Reads a bounded body and decodes it as JSON.
pub async fn read_json<T: DeserializeOwned>(body: Incoming) -> Result<T, ApiError> {
    let bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("request body exceeds {MAX_BODY_BYTES} bytes"),
            ));
        }
        Err(e) => {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, format!("could not read request body: {e}")));
        }
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))
}
