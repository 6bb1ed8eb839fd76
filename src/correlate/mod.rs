//! Correlates the single in-flight request with its eventual response. The
//! session loop resolves the slot from inbound events and races it against
//! the deadline returned by [`Correlator::deadline`]; there is no polling.

use std::time::Duration;
use tokio::time::Instant;

/// Which logical request the slot is waiting on. Standard requests resolve on
/// an inbound response; connect/disconnect resolve on lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLabel {
    Standard,
    Connect,
    Disconnect,
}

#[derive(Debug)]
struct PendingRequest {
    label: RequestLabel,
    /// Present only for latency-timed requests (ping).
    started: Option<Instant>,
    deadline: Instant,
}

/// A matched response, with elapsed whole milliseconds when timed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub text: String,
    pub elapsed_ms: Option<u64>,
}

/// Holds at most one [`PendingRequest`]. The dispatcher's input gating
/// guarantees `begin` is never called while a request is outstanding.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: Option<PendingRequest>,
}

impl Correlator {
    pub fn begin(&mut self, label: RequestLabel, timed: bool, budget: Duration) {
        debug_assert!(self.pending.is_none(), "request already outstanding");
        let now = Instant::now();
        self.pending = Some(PendingRequest {
            label,
            started: timed.then_some(now),
            deadline: now + budget,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn label(&self) -> Option<RequestLabel> {
        self.pending.as_ref().map(|p| p.label)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Matches an inbound response against the outstanding request, clearing
    /// the slot. Returns `None` when nothing is pending.
    pub fn resolve(&mut self, text: &str) -> Option<Matched> {
        let pending = self.pending.take()?;
        Some(Matched {
            text: text.to_string(),
            elapsed_ms: pending.started.map(|s| round_ms(s.elapsed())),
        })
    }

    /// Clears the slot without a response (lifecycle resolution or wait
    /// expiry), restoring the single-outstanding-request invariant.
    pub fn clear(&mut self) -> Option<RequestLabel> {
        self.pending.take().map(|p| p.label)
    }
}

fn round_ms(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64() * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_clears_the_slot() {
        let mut correlator = Correlator::default();
        correlator.begin(RequestLabel::Standard, false, Duration::from_secs(5));
        assert!(correlator.is_pending());

        let matched = correlator.resolve("unlocked").expect("pending");
        assert_eq!(matched.text, "unlocked");
        assert_eq!(matched.elapsed_ms, None);
        assert!(!correlator.is_pending());
        assert!(correlator.resolve("late").is_none());
    }

    #[test]
    fn clear_reports_the_label() {
        let mut correlator = Correlator::default();
        correlator.begin(RequestLabel::Disconnect, false, Duration::from_secs(5));
        assert_eq!(correlator.label(), Some(RequestLabel::Disconnect));
        assert_eq!(correlator.clear(), Some(RequestLabel::Disconnect));
        assert_eq!(correlator.clear(), None);
    }

    #[test]
    fn deadline_tracks_the_budget() {
        let mut correlator = Correlator::default();
        assert!(correlator.deadline().is_none());
        let before = Instant::now();
        correlator.begin(RequestLabel::Standard, false, Duration::from_millis(500));
        let deadline = correlator.deadline().expect("pending");
        assert!(deadline >= before + Duration::from_millis(500));
        assert!(deadline <= Instant::now() + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_request_reports_whole_milliseconds() {
        let mut correlator = Correlator::default();
        correlator.begin(RequestLabel::Standard, true, Duration::from_secs(5));
        tokio::time::advance(Duration::from_millis(120)).await;
        let matched = correlator.resolve("pong").expect("pending");
        assert_eq!(matched.elapsed_ms, Some(120));
    }

    #[test]
    fn round_ms_rounds_to_nearest() {
        assert_eq!(round_ms(Duration::from_micros(120_400)), 120);
        assert_eq!(round_ms(Duration::from_micros(120_600)), 121);
    }
}
