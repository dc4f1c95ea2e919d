use core::fmt;

/// Outcome of the last state-producing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    Success,
    Error,
    #[default]
    NoState,
}

/// What the last state-producing call was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Reason {
    #[default]
    NoReason,
    ReadAndParse,
    SourceInvalid,
    PathInvalid,
    MergeResult,
}

/// Status and reason of a context. Every state-producing call overwrites both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationState {
    pub status: StatusCode,
    pub reason: Reason,
}

impl OperationState {
    pub const NONE: Self = Self::new(StatusCode::NoState, Reason::NoReason);

    pub const fn new(status: StatusCode, reason: Reason) -> Self {
        Self { status, reason }
    }

    pub const fn success(reason: Reason) -> Self {
        Self::new(StatusCode::Success, reason)
    }

    pub const fn error(reason: Reason) -> Self {
        Self::new(StatusCode::Error, reason)
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == StatusCode::Error
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.status, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_no_state() {
        assert_eq!(OperationState::default(), OperationState::NONE);
        assert!(!OperationState::NONE.is_success());
        assert!(!OperationState::NONE.is_error());
    }

    #[test]
    fn display_joins_status_and_reason() {
        assert_eq!(OperationState::error(Reason::PathInvalid).to_string(), "Error/PathInvalid");
    }
}
