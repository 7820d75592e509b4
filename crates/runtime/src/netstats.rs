//! Per-view network statistics with debounced emission.
//!
//! Counters are sampled from the view's own debugging attachment, reset on
//! each new non-in-place main-frame navigation, and emitted at most once
//! per debounce window so listeners are not flooded.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetStatsSnapshot {
    pub requests: u64,
    pub finished: u64,
    pub failed: u64,
    pub bytes: u64,
    /// Bytes per second over the window since the previous emission.
    pub throughput_bps: u64,
}

#[derive(Debug, Default)]
pub struct NetStats {
    requests: u64,
    finished: u64,
    failed: u64,
    bytes: u64,
    bytes_since_emit: u64,
    last_emit_ms: Option<i64>,
    dirty: bool,
}

impl NetStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request(&mut self) {
        self.requests += 1;
        self.dirty = true;
    }

    pub fn on_finished(&mut self, encoded_bytes: u64) {
        self.finished += 1;
        self.bytes += encoded_bytes;
        self.bytes_since_emit += encoded_bytes;
        self.dirty = true;
    }

    pub fn on_failed(&mut self) {
        self.failed += 1;
        self.dirty = true;
    }

    /// A new non-in-place main-frame navigation started; stats restart.
    pub fn reset(&mut self) {
        *self = Self {
            last_emit_ms: self.last_emit_ms,
            dirty: true,
            ..Self::default()
        };
    }

    /// Emit at most once per debounce window, and only when something
    /// changed since the last emission.
    pub fn maybe_emit(&mut self, now_ms: i64, debounce_ms: i64) -> Option<NetStatsSnapshot> {
        if !self.dirty {
            return None;
        }
        let elapsed_ms = match self.last_emit_ms {
            Some(last) => now_ms - last,
            None => i64::MAX,
        };
        if elapsed_ms < debounce_ms {
            return None;
        }

        let throughput_bps = if elapsed_ms == i64::MAX || elapsed_ms <= 0 {
            0
        } else {
            (self.bytes_since_emit as i64 * 1000 / elapsed_ms).max(0) as u64
        };

        self.last_emit_ms = Some(now_ms);
        self.bytes_since_emit = 0;
        self.dirty = false;

        Some(NetStatsSnapshot {
            requests: self.requests,
            finished: self.finished,
            failed: self.failed,
            bytes: self.bytes,
            throughput_bps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_is_debounced() {
        let mut stats = NetStats::new();
        stats.on_request();
        assert!(stats.maybe_emit(1000, 250).is_some());

        // Inside the window: held back even though counters changed.
        stats.on_request();
        assert!(stats.maybe_emit(1100, 250).is_none());

        // Window elapsed: emitted once.
        assert!(stats.maybe_emit(1300, 250).is_some());
        // Nothing new since: silent.
        assert!(stats.maybe_emit(2000, 250).is_none());
    }

    #[test]
    fn reset_clears_counters_but_not_the_debounce_clock() {
        let mut stats = NetStats::new();
        stats.on_request();
        stats.on_finished(1000);
        let first = stats.maybe_emit(1000, 250).unwrap();
        assert_eq!(first.requests, 1);
        assert_eq!(first.bytes, 1000);

        stats.reset();
        let after_reset = stats.maybe_emit(2000, 250).unwrap();
        assert_eq!(after_reset.requests, 0);
        assert_eq!(after_reset.bytes, 0);
    }

    #[test]
    fn throughput_reflects_bytes_over_the_window() {
        let mut stats = NetStats::new();
        stats.on_finished(500);
        stats.maybe_emit(1000, 250);

        stats.on_finished(2000);
        let snap = stats.maybe_emit(2000, 250).unwrap();
        // 2000 bytes over 1000ms.
        assert_eq!(snap.throughput_bps, 2000);
    }

    #[test]
    fn counters_accumulate_within_a_navigation() {
        let mut stats = NetStats::new();
        stats.on_request();
        stats.on_request();
        stats.on_finished(10);
        stats.on_failed();
        let snap = stats.maybe_emit(1000, 0).unwrap();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.finished, 1);
        assert_eq!(snap.failed, 1);
    }
}
