//! Input validation: turn a raw [`JobRequest`] into a [`ConversionJob`].
//!
//! Everything here is pure, so a malformed job fails before the server is
//! even asked to start and before any network call is made.

use crate::error::WorkerError;
use crate::job::{ConversionJob, JobRequest};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Validate the job and decode its file payload.
pub fn prepare_job(request: &JobRequest, default_filename: &str) -> Result<ConversionJob, WorkerError> {
    let input = match &request.input {
        Some(input) if !input.is_empty() => input,
        _ => {
            return Err(WorkerError::MissingInput {
                detail: "job has no input".to_string(),
            })
        }
    };

    let encoded = input
        .file_content_base64
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| WorkerError::MissingInput {
            detail: "file_content_base64 is missing or empty".to_string(),
        })?;

    let file_bytes = decode_base64(encoded)?;

    let filename = input
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_filename)
        .to_string();

    debug!(
        filename = %filename,
        bytes = file_bytes.len(),
        "Decoded job input"
    );

    Ok(ConversionJob {
        id: request.display_id(),
        file_bytes,
        filename,
        options: input.options.clone().unwrap_or_default(),
    })
}

/// Decode standard base64, ignoring embedded whitespace (line-wrapped
/// encoders are common). An empty result is an error.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, WorkerError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| WorkerError::DecodeError {
            detail: e.to_string(),
        })?;
    if bytes.is_empty() {
        return Err(WorkerError::DecodeError {
            detail: "decoded file content is empty".to_string(),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(v: serde_json::Value) -> JobRequest {
        JobRequest::from_value(v).unwrap()
    }

    #[test]
    fn decodes_payload_and_keeps_filename() {
        let job = prepare_job(
            &request(json!({"id": "j1", "input": {"file_content_base64": "SGVsbG8=", "filename": "a.txt"}})),
            "uploaded_file",
        )
        .unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.file_bytes, b"Hello");
        assert_eq!(job.filename, "a.txt");
        assert!(job.options.is_empty());
    }

    #[test]
    fn default_filename_when_absent_or_blank() {
        let job = prepare_job(
            &request(json!({"input": {"file_content_base64": "SGVsbG8=", "filename": "  "}})),
            "uploaded_file",
        )
        .unwrap();
        assert_eq!(job.filename, "uploaded_file");
    }

    #[test]
    fn missing_input_variants() {
        for v in [
            json!({}),
            json!({"input": null}),
            json!({"input": {}}),
            json!({"input": {"filename": "a.pdf"}}),
            json!({"input": {"file_content_base64": ""}}),
        ] {
            let err = prepare_job(&request(v.clone()), "f").unwrap_err();
            assert!(
                matches!(err, WorkerError::MissingInput { .. }),
                "{v} gave {err:?}"
            );
        }
    }

    #[test]
    fn malformed_base64_is_decode_error() {
        let err = prepare_job(
            &request(json!({"input": {"file_content_base64": "not base64!!"}})),
            "f",
        )
        .unwrap_err();
        assert!(matches!(err, WorkerError::DecodeError { .. }));
    }

    #[test]
    fn padding_only_payload_is_decode_error() {
        let err = decode_base64("====").unwrap_err();
        assert!(matches!(err, WorkerError::DecodeError { .. }));
    }

    #[test]
    fn whitespace_only_payload_decodes_to_nothing() {
        let err = decode_base64(" \n ").unwrap_err();
        assert!(err.to_string().contains("empty"), "got: {err}");
    }

    #[test]
    fn whitespace_wrapped_payload_decodes() {
        assert_eq!(decode_base64("SGVs\nbG8=\n").unwrap(), b"Hello");
    }
}
