//! Maps a failure message to a [`FailureType`].
//!
//! Review failures reach the worker as text: a provider error rendered into a
//! degradation chain, or an orchestration error. Markers are matched
//! case-insensitively, retryable ones first, so a chain that mixes an
//! authentication failure with a rate limit stays retryable.

use super::task::FailureType;

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "http 429"];

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "http 408", "http 504"];

const NETWORK_MARKERS: &[&str] = &[
    "request failed",
    "connection",
    "network",
    "dns",
    "broken pipe",
];

const AUTHENTICATION_MARKERS: &[&str] = &[
    "authentication",
    "unauthorized",
    "forbidden",
    "permission denied",
    "http 401",
    "http 403",
];

const VALIDATION_MARKERS: &[&str] = &[
    "invalid request",
    "validation",
    "http 400",
    "http 422",
];

/// Classifies a failure message. Unrecognized messages are `Unknown`.
pub fn classify_failure(message: &str) -> FailureType {
    let message = message.to_ascii_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|m| message.contains(m));

    if matches(RATE_LIMIT_MARKERS) {
        FailureType::RateLimit
    } else if matches(TIMEOUT_MARKERS) {
        FailureType::Timeout
    } else if matches(NETWORK_MARKERS) {
        FailureType::NetworkError
    } else if matches(AUTHENTICATION_MARKERS) {
        FailureType::AuthenticationError
    } else if matches(VALIDATION_MARKERS) {
        FailureType::ValidationError
    } else {
        FailureType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn test_provider_errors_classify() {
        let cases = [
            (ProviderError::RateLimited("quota".into()), FailureType::RateLimit),
            (ProviderError::Timeout("60s".into()), FailureType::Timeout),
            (
                ProviderError::RequestFailed("connection refused".into()),
                FailureType::NetworkError,
            ),
            (
                ProviderError::Authentication("bad key".into()),
                FailureType::AuthenticationError,
            ),
            (
                ProviderError::Api { code: 403, message: "nope".into() },
                FailureType::AuthenticationError,
            ),
            (
                ProviderError::InvalidRequest("prompt too long".into()),
                FailureType::ValidationError,
            ),
            (
                ProviderError::Api { code: 400, message: "bad".into() },
                FailureType::ValidationError,
            ),
            (
                ProviderError::Api { code: 404, message: "missing".into() },
                FailureType::Unknown,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(classify_failure(&err.to_string()), expected, "{}", err);
        }
    }

    #[test]
    fn test_mixed_chain_stays_retryable() {
        let message = "All AI providers failed. Degradation chain: \
            [Primary provider 'openai' failed: authentication failed: bad key, \
            Fallback provider 'anthropic' failed: rate limit exceeded: slow down]";
        assert_eq!(classify_failure(message), FailureType::RateLimit);
    }

    #[test]
    fn test_primary_auth_with_skipped_fallback_is_permanent() {
        let message = "All AI providers failed. Degradation chain: \
            [Primary provider 'openai' failed: authentication failed: bad key, \
            Fallback skipped: provider 'openai' is same as primary or unavailable]";
        assert_eq!(classify_failure(message), FailureType::AuthenticationError);
    }

    #[test]
    fn test_unrecognized_is_unknown() {
        assert_eq!(classify_failure(""), FailureType::Unknown);
        assert_eq!(
            classify_failure("Failed to parse provider response: expected value"),
            FailureType::Unknown
        );
    }
}
