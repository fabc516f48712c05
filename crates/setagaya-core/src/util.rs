use crate::error::ControllerError;

/// Folds a batch of per-engine/per-plan errors into one composite
/// `ControllerError`. The composite keeps the most meaningful variant
/// rather than collapsing everything to `Internal`: callers need to detect
/// that an aggregated trigger failure "wraps FileNotFound".
pub fn aggregate_errors(errors: Vec<ControllerError>) -> Option<ControllerError> {
    if errors.is_empty() {
        return None;
    }
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    let joined = messages.join("; ");

    if errors.iter().any(|e| matches!(e, ControllerError::FileNotFound(_))) {
        return Some(ControllerError::FileNotFound(joined));
    }
    if errors.iter().any(|e| matches!(e, ControllerError::Transient(_) | ControllerError::Http(_))) {
        return Some(ControllerError::Transient(joined));
    }
    Some(ControllerError::Internal(joined))
}
