//! Two-stage probe classification: HTTP code/latency → status/sub_status,
//! then optional content verification on 2xx bodies.
//!
//! Grounded on the teacher's `HttpMonitor::classify_http_error` status-code
//! table, generalized from its Claude-specific `bot_challenge`/`overloaded`
//! sub-statuses to the stratified taxonomy this service persists.

use std::time::Duration;

/// Overall availability class. `1` is green, `2` is yellow (degraded),
/// `0` is red (unavailable) — matching the integer encoding persisted in
/// `ProbeRecord::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum Status {
    Red = 0,
    Green = 1,
    Yellow = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStatus {
    None,
    SlowLatency,
    RateLimit,
    ServerError,
    ClientError,
    AuthError,
    InvalidRequest,
    NetworkError,
    ContentMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: Status,
    pub sub_status: SubStatus,
}

impl Classification {
    fn new(status: Status, sub_status: SubStatus) -> Self {
        debug_assert!(compatible(status, sub_status), "invalid status/sub_status pair");
        Self { status, sub_status }
    }
}

fn compatible(status: Status, sub: SubStatus) -> bool {
    match status {
        Status::Green => matches!(sub, SubStatus::None),
        Status::Yellow => matches!(sub, SubStatus::SlowLatency | SubStatus::RateLimit),
        Status::Red => !matches!(sub, SubStatus::None),
    }
}

/// Stage 1: transport/HTTP-code classification. `http_status = 0` denotes a
/// transport-level failure (timeout, connection refused, TLS error, etc.) —
/// the caller passes 0 when the request never got a response.
pub fn classify_stage1(http_status: u16, latency: Duration, slow_latency: Option<Duration>) -> Classification {
    match http_status {
        0 => Classification::new(Status::Red, SubStatus::NetworkError),
        200..=299 => match slow_latency {
            Some(slow) if slow > Duration::ZERO && latency > slow => {
                Classification::new(Status::Yellow, SubStatus::SlowLatency)
            }
            _ => Classification::new(Status::Green, SubStatus::None),
        },
        300..=399 => Classification::new(Status::Green, SubStatus::None),
        400 => Classification::new(Status::Red, SubStatus::InvalidRequest),
        401 | 403 => Classification::new(Status::Red, SubStatus::AuthError),
        429 => Classification::new(Status::Red, SubStatus::RateLimit),
        500..=599 => Classification::new(Status::Red, SubStatus::ServerError),
        _ => Classification::new(Status::Red, SubStatus::ClientError),
    }
}

/// Stage 2: content verification. Only meaningful for 2xx responses (stage 1
/// ∈ {Green, Yellow}); the caller must not invoke this for 429/reds or for
/// an empty `success_contains`.
pub fn verify_stage2(stage1: Classification, body_text: &str, success_contains: &str) -> Classification {
    if success_contains.is_empty() {
        return stage1;
    }
    if !matches!(stage1.status, Status::Green | Status::Yellow) {
        return stage1;
    }
    if body_text.is_empty() || !body_text.contains(success_contains) {
        return Classification::new(Status::Red, SubStatus::ContentMismatch);
    }
    stage1
}

/// Whether stage 2 should run at all for a given stage-1 classification:
/// skipped for 429 and all other reds, per §4.2.
pub fn needs_content_check(stage1: Classification, success_contains: &str) -> bool {
    !success_contains.is_empty() && matches!(stage1.status, Status::Green | Status::Yellow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_2xx_is_green() {
        let c = classify_stage1(200, Duration::from_millis(200), Some(Duration::from_secs(5)));
        assert_eq!(c.status, Status::Green);
        assert_eq!(c.sub_status, SubStatus::None);
    }

    #[test]
    fn slow_2xx_is_yellow_slow_latency() {
        let c = classify_stage1(200, Duration::from_millis(6000), Some(Duration::from_secs(5)));
        assert_eq!(c.status, Status::Yellow);
        assert_eq!(c.sub_status, SubStatus::SlowLatency);
    }

    #[test]
    fn redirect_is_green() {
        let c = classify_stage1(302, Duration::from_millis(10), None);
        assert_eq!(c.status, Status::Green);
    }

    #[test]
    fn unauthorized_is_auth_error() {
        let c = classify_stage1(401, Duration::from_millis(10), None);
        assert_eq!(c.status, Status::Red);
        assert_eq!(c.sub_status, SubStatus::AuthError);
    }

    #[test]
    fn rate_limited_is_rate_limit() {
        let c = classify_stage1(429, Duration::from_millis(10), None);
        assert_eq!(c.sub_status, SubStatus::RateLimit);
    }

    #[test]
    fn transport_failure_is_network_error() {
        let c = classify_stage1(0, Duration::from_millis(0), None);
        assert_eq!(c.sub_status, SubStatus::NetworkError);
    }

    #[test]
    fn content_mismatch_downgrades_fast_200() {
        let stage1 = classify_stage1(200, Duration::from_millis(200), Some(Duration::from_secs(5)));
        let final_class = verify_stage2(stage1, r#"{"error":"bad"}"#, "choices");
        assert_eq!(final_class.status, Status::Red);
        assert_eq!(final_class.sub_status, SubStatus::ContentMismatch);
    }

    #[test]
    fn content_match_keeps_stage1_verdict() {
        let stage1 = classify_stage1(200, Duration::from_millis(200), Some(Duration::from_secs(5)));
        let final_class = verify_stage2(stage1, r#"{"choices":[{"message":"hi"}]}"#, "choices");
        assert_eq!(final_class.status, Status::Green);
    }

    #[test]
    fn stage2_skipped_for_rate_limit() {
        let stage1 = classify_stage1(429, Duration::from_millis(10), None);
        assert!(!needs_content_check(stage1, "choices"));
    }

    #[test]
    fn auth_errors_are_not_counted_as_content_issues() {
        let stage1 = classify_stage1(401, Duration::from_millis(10), None);
        assert_eq!(verify_stage2(stage1, "", "choices").sub_status, SubStatus::AuthError);
    }
}
