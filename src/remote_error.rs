//! Structured JSON error bodies returned by well-behaved services.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire shape: `{errorCode, errorName, errorInstanceId, parameters}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    pub error_code: String,
    pub error_name: String,
    #[serde(default)]
    pub error_instance_id: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl RemoteError {
    /// Best-effort decode of an error response body. Returns `None` when the
    /// body is not a recognizable remote error; callers fall back to the bare
    /// status.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let decoded: Self = serde_json::from_slice(body).ok()?;
        if decoded.error_code.is_empty() && decoded.error_name.is_empty() {
            return None;
        }
        Some(decoded)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error_name, self.error_code)?;
        if !self.error_instance_id.is_empty() {
            write!(f, " instance {}", self.error_instance_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_error_body() {
        let body = br#"{
            "errorCode": "CONFLICT",
            "errorName": "Recipe:AlreadyExists",
            "errorInstanceId": "0bd2a7ea-cd23-4406-b57f-3e94f4f86123",
            "parameters": {"recipe": "pie"}
        }"#;
        let err = RemoteError::from_body(body).unwrap();
        assert_eq!(err.error_code, "CONFLICT");
        assert_eq!(err.error_name, "Recipe:AlreadyExists");
        assert_eq!(err.parameters.get("recipe").unwrap(), "pie");
        let rendered = err.to_string();
        assert!(rendered.contains("Recipe:AlreadyExists"));
        assert!(rendered.contains("CONFLICT"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let body = br#"{"errorCode": "INTERNAL", "errorName": "Default:Internal"}"#;
        let err = RemoteError::from_body(body).unwrap();
        assert_eq!(err.error_instance_id, "");
        assert!(err.parameters.is_empty());
    }

    #[test]
    fn rejects_non_error_bodies() {
        assert!(RemoteError::from_body(b"not json").is_none());
        assert!(RemoteError::from_body(b"{}").is_none());
        assert!(RemoteError::from_body(b"{\"message\": \"nope\"}").is_none());
    }
}
