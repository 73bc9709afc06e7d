use std::fmt;

use serde::Serialize;

use crate::common::{AccessOutcome, AccessResult, ProcId};

pub trait Stat {
    fn view(&self, max_width: usize) -> Box<dyn StatView + '_>;
}

pub trait StatView: fmt::Display {
    /// header of stat
    fn header(&self) -> &'static str;
    /// body width
    fn width(&self) -> usize;
}

pub trait AddStats {
    /// add stat to `buf`.
    fn add_stats(&self, buf: &mut Stats);
}

#[derive(Default)]
pub struct Stats {
    stats: Vec<Box<dyn Stat>>,
}

impl Stats {
    pub fn push(&mut self, stat: Box<dyn Stat>) {
        self.stats.push(stat)
    }

    pub fn view(&self, max_width: usize) -> StatAllView<'_> {
        StatAllView {
            views: self.stats.iter().map(|s| s.view(max_width)).collect(),
        }
    }
}

pub struct StatAllView<'s> {
    views: Vec<Box<dyn StatView + 's>>,
}

impl fmt::Display for StatAllView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .views
            .iter()
            .map(|s| s.header().len().max(s.width()))
            .max()
            .unwrap_or(0);
        writeln!(f, "{:-^width$}", " statistics ")?;
        for sv in &self.views {
            writeln!(f, "{}:", sv.header())?;
            writeln!(f, "{}", sv)?;
        }
        write!(f, "{:-<width$}", "")
    }
}

/// Hit/miss counters for one cache.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct CacheCounters {
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    /// Misses induced by another processor's access to the same line.
    pub coherence_misses: u64,
    /// Reads satisfied by the processor's own write buffer (TSO).
    pub buffer_snoops: u64,
    /// Writes retired from the write buffer onto the bus (TSO).
    pub retired_writes: u64,
}

impl CacheCounters {
    pub fn reads(&self) -> u64 {
        self.read_hits + self.read_misses
    }
    pub fn writes(&self) -> u64 {
        self.write_hits + self.write_misses
    }
    pub fn hits(&self) -> u64 {
        self.read_hits + self.write_hits
    }
    pub fn misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }
    pub fn accesses(&self) -> u64 {
        self.reads() + self.writes()
    }

    pub fn record(&mut self, outcome: &AccessOutcome) {
        match outcome.result {
            AccessResult::ReadHit => self.read_hits += 1,
            AccessResult::ReadMiss => self.read_misses += 1,
            AccessResult::WriteHit => self.write_hits += 1,
            AccessResult::WriteMiss => self.write_misses += 1,
        }
        if outcome.coherence {
            self.coherence_misses += 1;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.read_hits += other.read_hits;
        self.read_misses += other.read_misses;
        self.write_hits += other.write_hits;
        self.write_misses += other.write_misses;
        self.coherence_misses += other.coherence_misses;
        self.buffer_snoops += other.buffer_snoops;
        self.retired_writes += other.retired_writes;
    }

    pub fn miss_rate(&self) -> f64 {
        ratio(self.misses(), self.accesses())
    }
    pub fn read_miss_rate(&self) -> f64 {
        ratio(self.read_misses, self.reads())
    }
    pub fn write_miss_rate(&self) -> f64 {
        ratio(self.write_misses, self.writes())
    }
    /// Coherence misses as a fraction of all misses (not of all accesses).
    pub fn coherence_miss_rate(&self) -> f64 {
        ratio(self.coherence_misses, self.misses())
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        f64::NAN
    } else {
        num as f64 / den as f64
    }
}

/// Receives one classified outcome per access and aggregates per processor.
pub struct StatsTracker {
    per_proc: Vec<CacheCounters>,
}

impl StatsTracker {
    pub fn new(num_processors: usize) -> Self {
        Self {
            per_proc: vec![CacheCounters::default(); num_processors],
        }
    }

    pub fn record(&mut self, outcome: AccessOutcome) {
        log::trace!(
            "stat: {} {} at {} (coherence: {})",
            outcome.proc,
            outcome.result,
            outcome.addr,
            outcome.coherence
        );
        self.per_proc[outcome.proc.index()].record(&outcome);
    }

    pub fn note_buffer_snoop(&mut self, proc: ProcId) {
        self.per_proc[proc.index()].buffer_snoops += 1;
    }

    pub fn note_retirements(&mut self, proc: ProcId, count: u64) {
        self.per_proc[proc.index()].retired_writes += count;
    }

    pub fn counters(&self, proc: ProcId) -> &CacheCounters {
        &self.per_proc[proc.index()]
    }

    pub fn per_proc(&self) -> &[CacheCounters] {
        &self.per_proc
    }

    pub fn totals(&self) -> CacheCounters {
        let mut totals = CacheCounters::default();
        for c in &self.per_proc {
            totals.merge(c);
        }
        totals
    }

    pub fn summary(&self) -> Summary {
        Summary {
            overall: Report::from(self.totals()),
            per_processor: self.per_proc.iter().copied().map(Report::from).collect(),
        }
    }

    fn snapshot(&self) -> TrackerStat {
        TrackerStat {
            per_proc: self.per_proc.clone(),
            totals: self.totals(),
        }
    }
}

impl AddStats for StatsTracker {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.snapshot()));
    }
}

/// Serializable form of the aggregated statistics, with the rate
/// conventions fixed: miss rate over accesses, read/write miss rates over
/// reads/writes, coherence-miss rate over misses. NaN serializes as null.
#[derive(Serialize, Debug)]
pub struct Summary {
    pub overall: Report,
    pub per_processor: Vec<Report>,
}

#[derive(Serialize, Debug)]
pub struct Report {
    pub accesses: u64,
    pub reads: u64,
    pub writes: u64,
    #[serde(flatten)]
    pub counters: CacheCounters,
    pub miss_rate: f64,
    pub read_miss_rate: f64,
    pub write_miss_rate: f64,
    pub coherence_miss_rate: f64,
}

impl From<CacheCounters> for Report {
    fn from(counters: CacheCounters) -> Self {
        Self {
            accesses: counters.accesses(),
            reads: counters.reads(),
            writes: counters.writes(),
            counters,
            miss_rate: counters.miss_rate(),
            read_miss_rate: counters.read_miss_rate(),
            write_miss_rate: counters.write_miss_rate(),
            coherence_miss_rate: counters.coherence_miss_rate(),
        }
    }
}

struct TrackerStat {
    per_proc: Vec<CacheCounters>,
    totals: CacheCounters,
}

impl Stat for TrackerStat {
    fn view(&self, _: usize) -> Box<dyn StatView + '_> {
        Box::new(TrackerStatView { stat: self })
    }
}

struct TrackerStatView<'a> {
    stat: &'a TrackerStat,
}

impl StatView for TrackerStatView<'_> {
    fn header(&self) -> &'static str {
        "cache stat (per processor, then all)"
    }
    fn width(&self) -> usize {
        52
    }
}

fn write_ratio(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    num: u64,
    den: u64,
) -> fmt::Result {
    let rate = if den == 0 {
        "    n/a".to_string()
    } else {
        format!("{:>6.2}%", 100.0 * num as f64 / den as f64)
    };
    writeln!(f, "    {label:<21}{rate} ({num:>7} of {den:>7})")
}

fn write_counters(f: &mut fmt::Formatter<'_>, c: &CacheCounters) -> fmt::Result {
    write_ratio(f, "miss rate:", c.misses(), c.accesses())?;
    write_ratio(f, "read miss rate:", c.read_misses, c.reads())?;
    write_ratio(f, "write miss rate:", c.write_misses, c.writes())?;
    write_ratio(f, "coherence miss rate:", c.coherence_misses, c.misses())?;
    if c.buffer_snoops > 0 || c.retired_writes > 0 {
        writeln!(f, "    write buffer snoops: {:>8}", c.buffer_snoops)?;
        writeln!(f, "    retired writes:      {:>8}", c.retired_writes)?;
    }
    Ok(())
}

impl fmt::Display for TrackerStatView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.stat.per_proc.iter().enumerate() {
            writeln!(f, "  cache {}:", ProcId::new(i))?;
            write_counters(f, c)?;
        }
        writeln!(f, "  all caches:")?;
        write_counters(f, &self.stat.totals)
    }
}
