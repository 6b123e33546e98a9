use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const CONFIG_MISSING_FRAME_RATE: &str = "CONFIG_MISSING_FRAME_RATE";
pub const CONFIG_INVALID_FRAME_RATE: &str = "CONFIG_INVALID_FRAME_RATE";
pub const CONFIG_MISSING_OUTPUT_PATH: &str = "CONFIG_MISSING_OUTPUT_PATH";
pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
pub const METADATA_UNAVAILABLE: &str = "METADATA_UNAVAILABLE";
pub const METADATA_INSUFFICIENT: &str = "METADATA_INSUFFICIENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    /// A required parameter is absent or malformed. Never downgraded.
    Configuration,
    /// The missing-metadata policy was `error` and the timeline was unusable.
    Metadata,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn configuration(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Configuration,
        }
    }

    pub fn metadata(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Metadata,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                kind: Some(self.kind),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<CodedErrorKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Envelope for any failure; uncoded errors are reported as `INTERNAL`.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                kind: None,
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_json::json;

    use super::*;

    #[test]
    fn coded_error_is_found_through_context_layers() {
        let error = Err::<(), _>(CodedError::configuration(
            CONFIG_MISSING_FRAME_RATE,
            "frame rate is required",
        ))
        .context("processing tape.avi")
        .unwrap_err();

        let coded = find_coded_error(&error).expect("coded error should be in the chain");
        assert_eq!(coded.code, CONFIG_MISSING_FRAME_RATE);
        assert_eq!(coded.kind, CodedErrorKind::Configuration);
    }

    #[test]
    fn envelope_serializes_code_kind_and_details() {
        let error = CodedError::metadata(METADATA_UNAVAILABLE, "no rows")
            .with_details(json!({ "media": "tape.avi" }));
        let value = serde_json::to_value(error.envelope()).unwrap();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["code"], json!("METADATA_UNAVAILABLE"));
        assert_eq!(value["error"]["kind"], json!("metadata"));
        assert_eq!(value["error"]["details"]["media"], json!("tape.avi"));
    }

    #[test]
    fn uncoded_errors_fall_back_to_internal() {
        let envelope = envelope_for(&anyhow::anyhow!("disk full"));
        assert_eq!(envelope.error.code, "INTERNAL");
        assert!(envelope.error.kind.is_none());
    }
}
