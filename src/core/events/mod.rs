//! Streak → event state machine.
//!
//! Generalized from the incident lifecycle transition function used by the
//! pack's uptime checker (`resolve_transition` in
//! `Humans-Not-Required-watchpost`): consecutive same-class samples drive
//! up/down transitions, with `auth_error`/`invalid_request` excluded from
//! counting toward an outage since they signal misconfiguration rather than
//! the target actually being down.

use std::collections::HashMap;

use crate::config::MonitorKey;
use crate::core::probe::{ProbeResult, Status, SubStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorLevel {
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct MonitorState {
    pub last_status: MonitorLevel,
    pub consecutive_down: u32,
    pub consecutive_up: u32,
    pub current_event_id: Option<u64>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            last_status: MonitorLevel::Unknown,
            consecutive_down: 0,
            consecutive_up: 0,
            current_event_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Down,
    Up,
}

/// Coarse-grained severity derived from the sub_status that triggered the
/// event (§4.5) — downstream notifiers use this to pick urgency/formatting
/// without having to know the full sub_status taxonomy themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// A down event's severity reflects how bad the triggering sub_status is.
/// Recovery never creates a new row (see [`Transition`]), so there is no
/// separate "up severity" to derive.
fn severity_for(sub_status: SubStatus) -> EventSeverity {
    match sub_status {
        SubStatus::ServerError | SubStatus::NetworkError => EventSeverity::Critical,
        _ => EventSeverity::Warning,
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub monitor_key: MonitorKey,
    pub kind: EventKind,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
    pub severity: EventSeverity,
    pub trigger_sub_status: SubStatus,
}

/// What a caller must do in response to `EventDetector::observe` returning
/// `Some(_)`. A down→up recovery never inserts a second row — it closes the
/// row opened by the matching down transition (§4.5: "closes the current
/// event").
#[derive(Debug, Clone)]
pub enum Transition {
    /// A new outage just opened. Insert it with `Store::append_event`, then
    /// report the assigned row id back via `EventDetector::record_event_id`
    /// so the later recovery knows which row to close.
    Opened(Event),
    /// The currently open outage just recovered. Call
    /// `Store::close_event(event_id, closed_at)` on the named row — `None`
    /// means no open row id was ever recorded for this monitor (e.g. the
    /// detector was rebuilt after a restart mid-outage), so there is nothing
    /// to close.
    Closed { event_id: Option<u64>, closed_at: i64 },
}

/// Whether a red sample counts toward an outage streak. Auth/invalid-request
/// reds indicate misconfiguration, not the target being down (§4.5).
fn counts_as_outage(sub_status: SubStatus) -> bool {
    !matches!(sub_status, SubStatus::AuthError | SubStatus::InvalidRequest)
}

fn counts_as_up(status: Status) -> bool {
    matches!(status, Status::Green | Status::Yellow)
}

pub struct EventDetector {
    down_threshold: u32,
    up_threshold: u32,
    states: HashMap<MonitorKey, MonitorState>,
}

impl EventDetector {
    pub fn new(down_threshold: u32, up_threshold: u32) -> Self {
        Self {
            down_threshold,
            up_threshold,
            states: HashMap::new(),
        }
    }

    pub fn state_of(&self, key: &MonitorKey) -> MonitorState {
        self.states.get(key).cloned().unwrap_or_default()
    }

    /// Feeds one probe result for `key` at `timestamp_s`, returning a
    /// [`Transition`] if this sample triggered a down/up boundary. Must be
    /// called after the corresponding `ProbeRecord` is durably saved (§4.5).
    pub fn observe(&mut self, key: &MonitorKey, result: &ProbeResult, timestamp_s: i64) -> Option<Transition> {
        let state = self.states.entry(key.clone()).or_default();

        let is_up = counts_as_up(result.status);
        let is_outage = result.status == Status::Red && counts_as_outage(result.sub_status);

        if is_up {
            state.consecutive_up += 1;
            state.consecutive_down = 0;
        } else if is_outage {
            state.consecutive_down += 1;
            state.consecutive_up = 0;
        } else {
            // red but excluded from outage counting (auth/invalid_request):
            // resets the down streak without advancing the up streak either.
            state.consecutive_down = 0;
        }

        match state.last_status {
            MonitorLevel::Unknown if is_up => {
                state.last_status = MonitorLevel::Up;
                None
            }
            MonitorLevel::Up if is_outage && state.consecutive_down >= self.down_threshold => {
                state.last_status = MonitorLevel::Down;
                state.current_event_id = None;
                Some(Transition::Opened(Event {
                    monitor_key: key.clone(),
                    kind: EventKind::Down,
                    opened_at: timestamp_s,
                    closed_at: None,
                    severity: severity_for(result.sub_status),
                    trigger_sub_status: result.sub_status,
                }))
            }
            MonitorLevel::Down if is_up && state.consecutive_up >= self.up_threshold => {
                state.last_status = MonitorLevel::Up;
                let event_id = state.current_event_id.take();
                Some(Transition::Closed { event_id, closed_at: timestamp_s })
            }
            _ => None,
        }
    }

    /// Records the store-assigned row id for the event just opened for
    /// `key`, so the later recovery closes that row instead of inserting a
    /// new one. Call this right after `Store::append_event` succeeds for a
    /// `Transition::Opened`.
    pub fn record_event_id(&mut self, key: &MonitorKey, event_id: u64) {
        if let Some(state) = self.states.get_mut(key) {
            state.current_event_id = Some(event_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::probe::ProbeResult;

    fn key() -> MonitorKey {
        MonitorKey {
            provider: "anthropic".into(),
            service: "messages".into(),
            channel: "messages".into(),
        }
    }

    fn result(status: Status, sub_status: SubStatus) -> ProbeResult {
        ProbeResult {
            status,
            sub_status,
            latency_ms: 100,
            http_status: match status {
                Status::Green => 200,
                Status::Yellow => 200,
                Status::Red => 500,
            },
        }
    }

    #[test]
    fn first_green_opens_up_state_without_event() {
        let mut detector = EventDetector::new(3, 2);
        let event = detector.observe(&key(), &result(Status::Green, SubStatus::None), 1);
        assert!(event.is_none());
        assert_eq!(detector.state_of(&key()).last_status, MonitorLevel::Up);
    }

    #[test]
    fn three_consecutive_auth_errors_do_not_open_an_event() {
        let mut detector = EventDetector::new(3, 2);
        detector.observe(&key(), &result(Status::Green, SubStatus::None), 0);
        for t in 1..=3 {
            let event = detector.observe(&key(), &result(Status::Red, SubStatus::AuthError), t);
            assert!(event.is_none());
        }
        assert_eq!(detector.state_of(&key()).last_status, MonitorLevel::Up);
    }

    #[test]
    fn three_consecutive_server_errors_open_a_down_event() {
        let mut detector = EventDetector::new(3, 2);
        detector.observe(&key(), &result(Status::Green, SubStatus::None), 0);
        let mut opened = None;
        for t in 1..=3 {
            opened = detector.observe(&key(), &result(Status::Red, SubStatus::ServerError), t);
        }
        let event = match opened.expect("third consecutive red should open an event") {
            Transition::Opened(event) => event,
            other => panic!("expected Transition::Opened, got {other:?}"),
        };
        assert_eq!(event.kind, EventKind::Down);
        assert_eq!(event.severity, EventSeverity::Critical);
        assert_eq!(detector.state_of(&key()).last_status, MonitorLevel::Down);
    }

    #[test]
    fn rate_limit_outage_is_warning_not_critical() {
        let mut detector = EventDetector::new(3, 2);
        detector.observe(&key(), &result(Status::Green, SubStatus::None), 0);
        let mut opened = None;
        for t in 1..=3 {
            opened = detector.observe(&key(), &result(Status::Red, SubStatus::RateLimit), t);
        }
        let event = match opened.expect("rate limit streak should open an event") {
            Transition::Opened(event) => event,
            other => panic!("expected Transition::Opened, got {other:?}"),
        };
        assert_eq!(event.severity, EventSeverity::Warning);
    }

    #[test]
    fn two_consecutive_ups_close_the_original_event_by_id() {
        let mut detector = EventDetector::new(3, 2);
        detector.observe(&key(), &result(Status::Green, SubStatus::None), 0);
        for t in 1..=3 {
            detector.observe(&key(), &result(Status::Red, SubStatus::ServerError), t);
        }
        // Simulates the caller recording the real store-assigned row id
        // after inserting the just-opened event.
        detector.record_event_id(&key(), 42);

        detector.observe(&key(), &result(Status::Green, SubStatus::None), 4);
        let closed = detector.observe(&key(), &result(Status::Green, SubStatus::None), 5);
        match closed.expect("second consecutive up should close the event") {
            Transition::Closed { event_id, closed_at } => {
                assert_eq!(event_id, Some(42));
                assert_eq!(closed_at, 5);
            }
            other => panic!("expected Transition::Closed, got {other:?}"),
        }
    }

    #[test]
    fn recovery_with_no_tracked_id_closes_nothing() {
        let mut detector = EventDetector::new(3, 2);
        detector.observe(&key(), &result(Status::Green, SubStatus::None), 0);
        for t in 1..=3 {
            detector.observe(&key(), &result(Status::Red, SubStatus::ServerError), t);
        }
        // No `record_event_id` call — simulates a detector rebuilt mid-outage.
        detector.observe(&key(), &result(Status::Green, SubStatus::None), 4);
        let closed = detector.observe(&key(), &result(Status::Green, SubStatus::None), 5);
        match closed.expect("second consecutive up should still report a transition") {
            Transition::Closed { event_id, .. } => assert_eq!(event_id, None),
            other => panic!("expected Transition::Closed, got {other:?}"),
        }
    }
}
