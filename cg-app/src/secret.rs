//! Webhook shared-secret verification.

/// Result of checking an inbound secret header against the configured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    /// No secret is configured; validation is skipped.
    Open,
    Accepted,
    Rejected,
}

/// Decides whether an inbound webhook call may proceed.
///
/// A blank or absent configured secret means "open mode": every call is
/// accepted without a check. That is a deliberate operational choice for
/// deployments that terminate auth upstream, not a security guarantee, and
/// the server logs it loudly at startup. With a secret configured the policy
/// is fail-closed: a missing or mismatched header value is rejected.
pub struct SecretPolicy {
    expected: Option<String>,
}

impl SecretPolicy {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            expected: secret
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
        }
    }

    pub fn is_open(&self) -> bool {
        self.expected.is_none()
    }

    pub fn check(&self, provided: Option<&str>) -> SecretCheck {
        let Some(expected) = self.expected.as_deref() else {
            return SecretCheck::Open;
        };
        match provided.map(str::trim) {
            Some(value) if constant_time_eq(expected, value) => SecretCheck::Accepted,
            _ => SecretCheck::Rejected,
        }
    }
}

/// Compare in time independent of the first mismatch position. The length
/// difference is folded into the accumulator so short inputs don't return
/// early either.
pub(crate) fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let mut diff = left_bytes.len() ^ right_bytes.len();
    let max_len = left_bytes.len().max(right_bytes.len());
    for index in 0..max_len {
        let l = left_bytes.get(index).copied().unwrap_or(0);
        let r = right_bytes.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::{SecretCheck, SecretPolicy, constant_time_eq};

    #[test]
    fn constant_time_eq_rejects_different_lengths_and_values() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("abcd", "abc"));
        assert!(!constant_time_eq("abc", "abx"));
        assert!(!constant_time_eq("xbc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("", "a"));
    }

    #[test]
    fn configured_secret_accepts_only_the_exact_value() {
        let policy = SecretPolicy::new(Some("hook-secret".to_string()));
        assert!(!policy.is_open());
        assert_eq!(policy.check(Some("hook-secret")), SecretCheck::Accepted);
        assert_eq!(policy.check(Some(" hook-secret ")), SecretCheck::Accepted);
        assert_eq!(policy.check(Some("hook-secre")), SecretCheck::Rejected);
        assert_eq!(policy.check(Some("hook-secret2")), SecretCheck::Rejected);
        assert_eq!(policy.check(Some("")), SecretCheck::Rejected);
        assert_eq!(policy.check(None), SecretCheck::Rejected);
    }

    #[test]
    fn blank_configured_secret_means_open_mode() {
        for secret in [None, Some(String::new()), Some("   ".to_string())] {
            let policy = SecretPolicy::new(secret);
            assert!(policy.is_open());
            assert_eq!(policy.check(None), SecretCheck::Open);
            assert_eq!(policy.check(Some("anything")), SecretCheck::Open);
        }
    }

    #[test]
    fn configured_secret_is_trimmed_before_comparison() {
        let policy = SecretPolicy::new(Some("  hook-secret  ".to_string()));
        assert_eq!(policy.check(Some("hook-secret")), SecretCheck::Accepted);
    }
}
