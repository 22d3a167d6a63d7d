//! JSON envelope used by application endpoints
//!
//! `{"success": bool, "data": T?, "error": {"code", "message"}?}`

use reqwest::Response;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{AuthError, ErrorCode, Result};

#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Read a response and return the envelope's `data`.
///
/// Fails with the server's error code when `success` is false, and with
/// `INVALID_RESPONSE` when a successful envelope carries no data.
pub async fn read_data<T: DeserializeOwned>(response: Response) -> Result<T> {
    let (status, body) = read_body(response).await?;
    parse_envelope::<T>(status, &body)?
        .ok_or_else(|| AuthError::invalid_response("response envelope has no data").with_status(status))
}

/// Read a response whose envelope carries no meaningful data.
pub async fn read_ack(response: Response) -> Result<()> {
    let (status, body) = read_body(response).await?;
    parse_envelope::<serde_json::Value>(status, &body).map(|_| ())
}

async fn read_body(response: Response) -> Result<(u16, String)> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::new(ErrorCode::NetworkError, format!("reading response body: {e}")))?;
    Ok((status, body))
}

/// Decode an envelope body received with `status`.
pub fn parse_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<Option<T>> {
    let envelope: ApiEnvelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if (200..300).contains(&status) => {
            return Err(AuthError::invalid_response(format!("invalid response envelope: {e}")).with_status(status));
        }
        Err(_) => {
            return Err(AuthError::new(ErrorCode::RequestFailed, format!("server returned {status}"))
                .with_status(status));
        }
    };

    if envelope.success {
        return Ok(envelope.data);
    }

    let err = match envelope.error {
        Some(body) => {
            let message = if body.message.is_empty() { body.code.clone() } else { body.message };
            AuthError::new(ErrorCode::from(body.code.as_str()), message)
        }
        None => AuthError::new(ErrorCode::RequestFailed, format!("request failed with status {status}")),
    };
    Err(err.with_status(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Data {
        value: u32,
    }

    #[test]
    fn success_returns_data() {
        let data: Option<Data> = parse_envelope(200, r#"{"success":true,"data":{"value":7}}"#).unwrap();
        assert_eq!(data.unwrap().value, 7);
    }

    #[test]
    fn success_without_data_is_none() {
        let data: Option<Data> = parse_envelope(200, r#"{"success":true}"#).unwrap();
        assert!(data.is_none());
    }

    #[test]
    fn failure_carries_server_code_and_status() {
        let err = parse_envelope::<Data>(
            401,
            r#"{"success":false,"error":{"code":"INVALID_CREDENTIALS","message":"wrong password"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Other("INVALID_CREDENTIALS".into()));
        assert_eq!(err.message, "wrong password");
        assert_eq!(err.status_code, Some(401));
    }

    #[test]
    fn failure_without_error_body_is_request_failed() {
        let err = parse_envelope::<Data>(500, r#"{"success":false}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::RequestFailed);
    }

    #[test]
    fn non_json_error_page_is_request_failed() {
        let err = parse_envelope::<Data>(502, "<html>Bad Gateway</html>").unwrap_err();
        assert_eq!(err.code, ErrorCode::RequestFailed);
        assert_eq!(err.status_code, Some(502));
    }

    #[test]
    fn non_json_success_is_invalid_response() {
        let err = parse_envelope::<Data>(200, "ok").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResponse);
    }
}
