//! Mapping of replay results onto queue actions.

/// What the engine does with a mutation after one replay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    /// The server applied the write; drop it from the queue.
    Applied,
    /// Try again later, subject to backoff and the attempt limit.
    Retry,
    /// The server refused the write for good; dead-letter it.
    Reject,
}

/// How HTTP statuses are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponsePolicy {
    /// 2xx is applied; 408, 425, 429 and 5xx are retried; every other
    /// status is rejected.
    #[default]
    StatusAware,
    /// Any received response counts as applied, regardless of status.
    AnyResponse,
}

impl ResponsePolicy {
    /// Classifies a response status.
    #[must_use]
    pub fn classify(self, status: u16) -> ReplayVerdict {
        match self {
            ResponsePolicy::AnyResponse => ReplayVerdict::Applied,
            ResponsePolicy::StatusAware => match status {
                200..=299 => ReplayVerdict::Applied,
                _ if self.is_retryable_status(status) => ReplayVerdict::Retry,
                _ => ReplayVerdict::Reject,
            },
        }
    }

    /// Returns true for statuses that signal a transient server condition.
    #[must_use]
    pub fn is_retryable_status(self, status: u16) -> bool {
        matches!(status, 408 | 425 | 429 | 500..=599)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_aware_classification() {
        let p = ResponsePolicy::StatusAware;
        assert_eq!(p.classify(200), ReplayVerdict::Applied);
        assert_eq!(p.classify(201), ReplayVerdict::Applied);
        assert_eq!(p.classify(204), ReplayVerdict::Applied);
        assert_eq!(p.classify(500), ReplayVerdict::Retry);
        assert_eq!(p.classify(503), ReplayVerdict::Retry);
        assert_eq!(p.classify(429), ReplayVerdict::Retry);
        assert_eq!(p.classify(408), ReplayVerdict::Retry);
        assert_eq!(p.classify(400), ReplayVerdict::Reject);
        assert_eq!(p.classify(404), ReplayVerdict::Reject);
        assert_eq!(p.classify(409), ReplayVerdict::Reject);
        assert_eq!(p.classify(422), ReplayVerdict::Reject);
        assert_eq!(p.classify(302), ReplayVerdict::Reject);
    }

    #[test]
    fn any_response_applies_everything() {
        let p = ResponsePolicy::AnyResponse;
        for status in [200, 302, 404, 500] {
            assert_eq!(p.classify(status), ReplayVerdict::Applied);
        }
    }
}
