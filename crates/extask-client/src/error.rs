//! Mapping of HTTP failures onto [`ServiceError`].

use extask_core::ServiceError;
use reqwest::StatusCode;
use serde::Deserialize;

/// Error body the engine sends with non-2xx responses.
#[derive(Debug, Deserialize)]
struct EngineErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Classify a non-success response.
pub(crate) fn classify_response(status: StatusCode, path: &str, body: &str) -> ServiceError {
    if status == StatusCode::NOT_FOUND {
        return ServiceError::NotFound(path.to_string());
    }

    match serde_json::from_str::<EngineErrorBody>(body) {
        Ok(err) => ServiceError::Rejected {
            status: status.as_u16(),
            kind: err.kind,
            message: err.message,
        },
        Err(_) => ServiceError::Rejected {
            status: status.as_u16(),
            kind: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: body.trim().to_string(),
        },
    }
}

/// Classify a failure to get any response at all.
pub(crate) fn classify_transport(err: reqwest::Error) -> ServiceError {
    if err.is_decode() {
        ServiceError::Protocol(err.to_string())
    } else {
        ServiceError::Transport(err.to_string())
    }
}
