//! Wait predicates as pollable state machines.
//!
//! Every predicate exposes a single observation method taking the relevant
//! inputs (and, where deadlines matter, the current time), so the logic is
//! unit-testable without real sleeps. The async drivers in `reb::mod` feed
//! them once per control-plane tick.

use std::time::{Duration, Instant};

/// Outcome of one quiesce observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuiesceVerdict {
    /// Keep observing.
    Waiting,
    /// The required number of consecutive quiet ticks was seen.
    Quiet,
}

/// Requires N consecutive quiet observations; any activity resets the count.
#[derive(Debug)]
pub struct QuiesceGate {
    required: u32,
    consecutive: u32,
}

impl QuiesceGate {
    /// `window / tick` quiet ticks are required (at least one).
    pub fn new(window: Duration, tick: Duration) -> Self {
        let required = (window.as_millis() / tick.as_millis().max(1)) as u32 + 1;
        Self {
            required,
            consecutive: 0,
        }
    }

    /// Feed one observation: was local inbound activity seen since the last
    /// tick, and do all peers report quiescent transport queues?
    pub fn observe(&mut self, local_activity: bool, peers_quiet: bool) -> QuiesceVerdict {
        if local_activity || !peers_quiet {
            self.consecutive = 0;
            return QuiesceVerdict::Waiting;
        }
        self.consecutive += 1;
        if self.consecutive >= self.required {
            QuiesceVerdict::Quiet
        } else {
            QuiesceVerdict::Waiting
        }
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// The wait-ack deadline: `dest_retry_time` extended by a per-ten-targets
/// grace, clamped to `clamp * dest_retry_time`.
#[derive(Debug, Clone, Copy)]
pub struct AckWaitBudget {
    deadline: Duration,
}

impl AckWaitBudget {
    pub fn new(
        dest_retry_time: Duration,
        grace_per10: Duration,
        clamp: u32,
        num_targets: usize,
    ) -> Self {
        let extended = dest_retry_time + grace_per10 * (num_targets as u32 / 10);
        let max = dest_retry_time * clamp.max(1);
        Self {
            deadline: extended.min(max),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn expired(&self, started: Instant, now: Instant) -> bool {
        now.duration_since(started) >= self.deadline
    }
}

/// Push-notification quorum: how many peers must have pushed a stage before
/// a phase proceeds without polling the stragglers.
#[derive(Debug, Clone, Copy)]
pub struct PushQuorum {
    peers: usize,
    /// Early stages are too short for a wait loop; require everyone and let
    /// the caller fall back to polling immediately.
    require_all: bool,
}

impl PushQuorum {
    pub fn new(peers: usize, require_all: bool) -> Self {
        Self { peers, require_all }
    }

    /// Minimum number of peers that must have pushed:
    /// `ceil(peers/2) + 1`, capped at the peer count.
    pub fn required(&self) -> usize {
        if self.require_all {
            self.peers
        } else {
            ((self.peers + 1) / 2 + 1).min(self.peers)
        }
    }

    /// `missing` peers have not pushed yet; is the quorum satisfied?
    pub fn satisfied(&self, missing: usize) -> bool {
        let pushed = self.peers.saturating_sub(missing);
        pushed >= self.required()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiesce_requires_consecutive_quiet() {
        let mut gate = QuiesceGate::new(Duration::from_secs(6), Duration::from_secs(2));
        // required = 4
        for _ in 0..3 {
            assert_eq!(gate.observe(false, true), QuiesceVerdict::Waiting);
        }
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Quiet);
    }

    #[test]
    fn test_quiesce_resets_on_activity() {
        let mut gate = QuiesceGate::new(Duration::from_secs(4), Duration::from_secs(2));
        // required = 3
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Waiting);
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Waiting);
        // user PUT lands mid-fin: count restarts
        assert_eq!(gate.observe(true, true), QuiesceVerdict::Waiting);
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Waiting);
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Waiting);
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Quiet);
    }

    #[test]
    fn test_quiesce_peers_not_quiet_resets() {
        let mut gate = QuiesceGate::new(Duration::from_secs(2), Duration::from_secs(2));
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Waiting);
        assert_eq!(gate.observe(false, false), QuiesceVerdict::Waiting);
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Waiting);
        assert_eq!(gate.observe(false, true), QuiesceVerdict::Quiet);
    }

    #[test]
    fn test_ack_budget_extension_and_clamp() {
        let retry = Duration::from_secs(120);
        let per10 = Duration::from_secs(60);

        // 3 targets: no extension
        let b = AckWaitBudget::new(retry, per10, 2, 3);
        assert_eq!(b.deadline(), retry);

        // 30 targets: +3 minutes
        let b = AckWaitBudget::new(retry, per10, 2, 30);
        assert_eq!(b.deadline(), retry + Duration::from_secs(180));

        // 100 targets: clamped at 2x
        let b = AckWaitBudget::new(retry, per10, 2, 100);
        assert_eq!(b.deadline(), retry * 2);
    }

    #[test]
    fn test_ack_budget_expiry() {
        let b = AckWaitBudget::new(Duration::from_secs(10), Duration::ZERO, 2, 3);
        let t0 = Instant::now();
        assert!(!b.expired(t0, t0 + Duration::from_secs(9)));
        assert!(b.expired(t0, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_push_quorum_majority() {
        let q = PushQuorum::new(6, false);
        assert_eq!(q.required(), 4);
        assert!(q.satisfied(2));
        assert!(!q.satisfied(3));

        // odd peer count rounds the half up
        let q = PushQuorum::new(5, false);
        assert_eq!(q.required(), 4);

        // tiny clusters cap at the peer count
        let q = PushQuorum::new(1, false);
        assert_eq!(q.required(), 1);
    }

    #[test]
    fn test_push_quorum_all_for_early_stages() {
        let q = PushQuorum::new(6, true);
        assert_eq!(q.required(), 6);
        assert!(q.satisfied(0));
        assert!(!q.satisfied(1));
    }
}
