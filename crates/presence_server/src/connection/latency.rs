//! Round-trip latency bookkeeping for one connection.

/// Most recent round-trip sample derived from heartbeat echoes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatencyTracker {
    latency_ms: Option<u16>,
    last_sample_at: Option<u64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an echoed heartbeat timestamp received at `now` and returns the
    /// stored latency.
    ///
    /// The round trip is `now - echoed`, clamped to `[0, 65535]`. A second
    /// sample in the same millisecond as the previous one keeps the previous
    /// value.
    pub fn record(&mut self, now: u64, echoed: u64) -> u16 {
        if let (Some(previous), Some(at)) = (self.latency_ms, self.last_sample_at) {
            if at == now {
                return previous;
            }
        }

        let round_trip = now.saturating_sub(echoed).min(u16::MAX as u64) as u16;
        self.latency_ms = Some(round_trip);
        self.last_sample_at = Some(now);
        round_trip
    }

    /// The last measured latency, if any heartbeat has been echoed yet.
    pub fn latency_ms(&self) -> Option<u16> {
        self.latency_ms
    }

    /// Value placed in roster records; unmeasured connections report 0.
    pub fn wire_value(&self) -> u16 {
        self.latency_ms.unwrap_or(0)
    }
}
