//! Small response helpers shared by the gateway API and the device server

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

pub type HttpResponse = Response<Full<Bytes>>;

/// Largest request body either server will read
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .expect("static response should not fail"),
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")),
    }
}

pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

/// `{"error": message}` with an optional machine-readable code
pub fn error_response(status: StatusCode, code: Option<&str>, message: impl std::fmt::Display) -> HttpResponse {
    let body = match code {
        Some(code) => json!({ "error": message.to_string(), "code": code }),
        None => json!({ "error": message.to_string() }),
    };
    json_response(status, &body)
}

pub fn not_found() -> HttpResponse {
    text_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Collect and decode a JSON request body
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, String> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| format!("failed to read body: {e}"))?
        .to_bytes();
    if body.len() > MAX_BODY_BYTES {
        return Err(format!("body exceeds {MAX_BODY_BYTES} bytes"));
    }
    serde_json::from_slice(&body).map_err(|e| format!("invalid JSON body: {e}"))
}
