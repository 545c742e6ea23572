//! Load progress snapshots

/// How many of the requests behind a load have settled
///
/// A load of one asset consists of its owning bundle, every transitive
/// dependency of that bundle, and the asset read itself. A failed request
/// goes back to Unloaded, so it counts as unsettled again; the outcome itself
/// is delivered to the load's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadProgress {
    pub settled: usize,
    pub total: usize,
}

impl LoadProgress {
    pub fn new(settled: usize, total: usize) -> Self {
        Self { settled, total }
    }

    pub fn is_done(&self) -> bool {
        self.settled >= self.total
    }

    /// Settled share in `0.0..=1.0`; an empty load counts as complete
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.settled.min(self.total) as f32 / self.total as f32
    }

    /// Sum two snapshots, for loads spanning several assets
    pub fn combine(self, other: Self) -> Self {
        Self {
            settled: self.settled + other.settled,
            total: self.total + other.total,
        }
    }
}
