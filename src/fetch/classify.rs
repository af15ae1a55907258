//! Response classification shared by both channels

use crate::fetch::{FailureKind, FetchOutcome};

/// Body fragments that only appear on bot-challenge pages
pub const CHALLENGE_MARKERS: &[&str] = &[
    "<title>Just a moment...</title>",
    "challenge-platform",
    "Verifying you are human",
    "cf-chl-",
    "Attention Required! | Cloudflare",
];

/// Response header set by the edge when a request was mitigated
pub const MITIGATION_HEADER: &str = "cf-mitigated";

/// Returns true if `body` looks like a bot-challenge page
pub fn is_challenge(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Classifies a completed HTTP exchange
///
/// | Condition | Outcome |
/// |-----------|---------|
/// | Mitigation header or challenge marker in body | Blocked |
/// | HTTP 404, 410 | Failed(NotFound) |
/// | HTTP 429, 5xx | Failed(Transient) |
/// | Other non-2xx | Failed(Rejected) |
/// | 2xx with empty body | Failed(Transient) |
/// | 2xx | Success |
///
/// Challenges are checked first because edges serve them with 403 or 503.
pub fn classify_response(status_code: u16, mitigated: bool, body: String) -> FetchOutcome {
    if mitigated || is_challenge(&body) {
        return FetchOutcome::blocked(Some(body), Some(status_code));
    }

    match status_code {
        404 | 410 => FetchOutcome::failed(
            FailureKind::NotFound,
            Some(status_code),
            format!("HTTP {}", status_code),
        ),
        429 | 500..=599 => FetchOutcome::failed(
            FailureKind::Transient,
            Some(status_code),
            format!("HTTP {}", status_code),
        ),
        200..=299 if body.trim().is_empty() => {
            FetchOutcome::failed(FailureKind::Transient, Some(status_code), "empty body")
        }
        200..=299 => FetchOutcome::success(body, status_code),
        _ => FetchOutcome::failed(
            FailureKind::Rejected,
            Some(status_code),
            format!("HTTP {}", status_code),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchStatus;

    #[test]
    fn test_is_challenge() {
        assert!(is_challenge("<html><title>Just a moment...</title></html>"));
        assert!(is_challenge("<script src='/cdn-cgi/challenge-platform/x.js'>"));
        assert!(!is_challenge("<html><title>Tax Lawyers</title></html>"));
    }

    #[test]
    fn test_challenge_wins_over_status() {
        let outcome = classify_response(403, false, "Verifying you are human".into());
        assert_eq!(outcome.status, FetchStatus::Blocked);
        assert_eq!(outcome.failure, Some(FailureKind::Challenge));

        let outcome = classify_response(503, false, "<title>Just a moment...</title>".into());
        assert_eq!(outcome.status, FetchStatus::Blocked);
    }

    #[test]
    fn test_mitigation_header_blocks() {
        let outcome = classify_response(200, true, "<html>looks fine</html>".into());
        assert_eq!(outcome.status, FetchStatus::Blocked);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            classify_response(404, false, String::new()).failure,
            Some(FailureKind::NotFound)
        );
        assert_eq!(
            classify_response(410, false, String::new()).failure,
            Some(FailureKind::NotFound)
        );
        assert!(classify_response(503, false, String::new()).is_transient());
        assert!(classify_response(429, false, String::new()).is_transient());
        assert_eq!(
            classify_response(401, false, "nope".into()).failure,
            Some(FailureKind::Rejected)
        );
        assert!(classify_response(200, false, "  ".into()).is_transient());
        assert!(classify_response(200, false, "<html></html>".into()).is_success());
    }
}
