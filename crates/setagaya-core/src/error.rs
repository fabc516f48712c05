use serde::Serialize;

/// Error taxonomy for the controller. Variants line up with the propagation
/// policy: background loops log-and-continue on `Transient`/`FeatureUnavailable`,
/// the retry policy short-circuits on `is_exempt()`, and the orchestrator
/// aggregates everything else into a single composite per collection.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("feature unavailable: {0}")]
    FeatureUnavailable(String),

    #[error("wrong engine type: {0}")]
    WrongEngineType(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Serialize for ControllerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl ControllerError {
    /// Errors exempt from retry: callers must not re-attempt the operation
    /// that produced them. `FileNotFound` is the canonical example.
    pub fn is_exempt(&self) -> bool {
        matches!(self, ControllerError::FileNotFound(_))
    }

    /// Errors the retry policy should retry. Transport-level and driver
    /// transients are retryable; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControllerError::Transient(_) | ControllerError::Http(_))
    }

    /// `409` from an engine on a second trigger is absorbed as success, not
    /// a failure, but some call sites still need to recognize it as the
    /// "already triggered" state rather than an error to surface.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, ControllerError::StateConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ControllerError::Validation("plan missing test file".to_string());
        assert_eq!(err.to_string(), "validation error: plan missing test file");
    }

    #[test]
    fn file_not_found_is_exempt() {
        let err = ControllerError::FileNotFound("plan.jmx".to_string());
        assert!(err.is_exempt());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_is_retryable_not_exempt() {
        let err = ControllerError::Transient("connection reset".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_exempt());
    }

    #[test]
    fn feature_unavailable_is_neither() {
        let err = ControllerError::FeatureUnavailable("pod metrics".to_string());
        assert!(!err.is_exempt());
        assert!(!err.is_retryable());
    }

    #[test]
    fn state_conflict_is_recognized() {
        let err = ControllerError::StateConflict("engine already triggered".to_string());
        assert!(err.is_state_conflict());
        assert!(!err.is_exempt());
        assert!(!err.is_retryable());
    }

    #[test]
    fn serialize_produces_string() {
        let err = ControllerError::NotFound("run 42".to_string());
        let json = serde_json::to_string(&err).expect("serialize should succeed");
        assert_eq!(json, "\"not found: run 42\"");
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ControllerError = io_err.into();
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn serde_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: ControllerError = json_err.into();
        assert!(err.to_string().contains("serialization error"));
    }
}
