// Execution phases
//
// Per-request counters and timers, one slot per phase. Operators add to them
// in batches; the response layer reads them when rendering metrics and
// profile sections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use linked_hash_map::LinkedHashMap;

use crate::common::format_duration;

/// A named stage of execution used for metrics attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Instantiate,
    Run,
    PrimaryScan,
    Fetch,
    Filter,
    Project,
    Stream,
}

pub const PHASE_COUNT: usize = 7;

impl Phase {
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::Instantiate,
        Phase::Run,
        Phase::PrimaryScan,
        Phase::Fetch,
        Phase::Filter,
        Phase::Project,
        Phase::Stream,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Instantiate => "instantiate",
            Phase::Run => "run",
            Phase::PrimaryScan => "primaryScan",
            Phase::Fetch => "fetch",
            Phase::Filter => "filter",
            Phase::Project => "project",
            Phase::Stream => "stream",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Fixed-size table of per-phase counters
#[derive(Debug)]
pub struct PhaseTable {
    counts: [AtomicU64; PHASE_COUNT],
    times: [AtomicU64; PHASE_COUNT],
    operators: [AtomicU64; PHASE_COUNT],
}

impl PhaseTable {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            times: std::array::from_fn(|_| AtomicU64::new(0)),
            operators: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn add_count(&self, phase: Phase, count: u64) {
        self.counts[phase.slot()].fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_time(&self, phase: Phase, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.times[phase.slot()].fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn add_operator(&self, phase: Phase) {
        self.operators[phase.slot()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, phase: Phase) -> u64 {
        self.counts[phase.slot()].load(Ordering::Relaxed)
    }

    pub fn time(&self, phase: Phase) -> Duration {
        Duration::from_nanos(self.times[phase.slot()].load(Ordering::Relaxed))
    }

    pub fn operators(&self, phase: Phase) -> u64 {
        self.operators[phase.slot()].load(Ordering::Relaxed)
    }

    /// Non-zero phase times, rendered as duration strings
    pub fn fmt_times(&self) -> Option<LinkedHashMap<String, String>> {
        collect_nonzero(|phase| {
            let time = self.time(phase);
            (!time.is_zero()).then(|| format_duration(time))
        })
    }

    pub fn fmt_counts(&self) -> Option<LinkedHashMap<String, u64>> {
        collect_nonzero(|phase| Some(self.count(phase)).filter(|c| *c > 0))
    }

    pub fn fmt_operators(&self) -> Option<LinkedHashMap<String, u64>> {
        collect_nonzero(|phase| Some(self.operators(phase)).filter(|c| *c > 0))
    }
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_nonzero<T, F>(value: F) -> Option<LinkedHashMap<String, T>>
where
    F: Fn(Phase) -> Option<T>,
{
    let mut out = LinkedHashMap::new();
    for phase in Phase::ALL {
        if let Some(v) = value(phase) {
            out.insert(phase.name().to_string(), v);
        }
    }
    (!out.is_empty()).then_some(out)
}
