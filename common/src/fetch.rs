const HTTP_OK: u16 = 200;

/// Result of one secure GET. Callers cannot tell a rejected request from an
/// unreachable server; both are `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(String),
    Failed,
}

impl FetchOutcome {
    /// Only an exact 200 with a fully read body counts as success.
    pub fn from_status(status: u16, read_body: impl FnOnce() -> Option<String>) -> Self {
        if status != HTTP_OK {
            return Self::Failed;
        }

        match read_body() {
            Some(body) => Self::Success(body),
            None => Self::Failed,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Success(body) => Some(body),
            Self::Failed => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status_returns_body() {
        let outcome = FetchOutcome::from_status(200, || Some("{}".to_string()));
        assert_eq!(outcome, FetchOutcome::Success("{}".to_string()));
        assert_eq!(outcome.body(), Some("{}"));
    }

    #[test]
    fn non_ok_status_never_reads_body() {
        for status in [201, 204, 301, 404, 500] {
            let outcome = FetchOutcome::from_status(status, || panic!("body read for {status}"));
            assert_eq!(outcome, FetchOutcome::Failed);
        }
    }

    #[test]
    fn unreadable_body_is_failure() {
        let outcome = FetchOutcome::from_status(200, || None);
        assert!(!outcome.is_success());
    }
}
