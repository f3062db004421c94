//! REST client for a remote persistence gateway.

mod client;

pub use client::RemoteStorage;

use serde::Deserialize;

/// Error body returned by the gateway on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Human-readable message from an error response body, falling back to the
/// raw text when the body is not the gateway's JSON error shape.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_field() {
        assert_eq!(
            error_message(r#"{"error":"unprocessable","message":"Column 0 is full"}"#),
            "Column 0 is full"
        );
        assert_eq!(error_message(r#"{"error":"not found"}"#), "not found");
    }

    #[test]
    fn test_error_message_falls_back_to_text() {
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(""), "");
    }
}
