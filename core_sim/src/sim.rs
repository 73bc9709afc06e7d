use crate::{
    bus::{Bus, BusTransaction},
    cache::{Cache, Geometry, LineState, LocalAccess},
    common::{AccessKind, AccessOutcome, AccessResult, Addr, ProcId},
    config::{ConsistencyModel, Result, SimConfig},
    stat::{AddStats, Stats, StatsTracker},
    trace::TraceEvent,
    write_buffer::WriteBuffer,
};

/// Uniform write-commit interface: SC commits every write immediately, TSO
/// routes it through the store buffer and commits at retirement.
enum CommitPolicy {
    Immediate,
    Buffered(WriteBuffer),
}

impl CommitPolicy {
    fn for_config(config: &SimConfig) -> Self {
        match config.model {
            ConsistencyModel::Sc => Self::Immediate,
            ConsistencyModel::Tso => Self::Buffered(WriteBuffer::new(config.retire_at)),
        }
    }

    /// Accept one write, returning the addresses that must commit to the
    /// cache and bus now, oldest first.
    fn accept(&mut self, addr: Addr) -> Vec<Addr> {
        match self {
            Self::Immediate => vec![addr],
            Self::Buffered(buf) => {
                buf.enqueue(addr);
                let mut ready = Vec::new();
                while buf.would_retire() {
                    match buf.retire() {
                        Some(a) => ready.push(a),
                        None => break,
                    }
                }
                ready
            }
        }
    }

    /// Pending writes a local read must observe.
    fn holds(&self, addr: Addr) -> bool {
        match self {
            Self::Immediate => false,
            Self::Buffered(buf) => buf.holds(addr),
        }
    }

    fn flush(&mut self) -> Vec<Addr> {
        match self {
            Self::Immediate => Vec::new(),
            Self::Buffered(buf) => buf.drain(),
        }
    }

    fn is_buffered(&self) -> bool {
        matches!(self, Self::Buffered(_))
    }
}

/// Replays a trace against an arena of per-processor caches joined by the
/// shared bus. Purely a function of (config, trace): no state survives
/// between simulators.
pub struct Simulator {
    config: SimConfig,
    caches: Vec<Cache>,
    bus: Bus,
    policies: Vec<CommitPolicy>,
    tracker: StatsTracker,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let geometry = Geometry {
            num_lines: config.num_cache_lines,
            line_size: config.line_size,
        };
        let caches = (0..config.num_processors)
            .map(|i| Cache::new(ProcId::new(i), geometry))
            .collect();
        let policies = (0..config.num_processors)
            .map(|_| CommitPolicy::for_config(&config))
            .collect();
        log::info!(
            "simulator: {} processors, {} lines x {} units, model {}",
            config.num_processors,
            config.num_cache_lines,
            config.line_size,
            config.model
        );
        Ok(Self {
            config,
            caches,
            bus: Bus::new(),
            policies,
            tracker: StatsTracker::new(config.num_processors),
        })
    }

    /// Replay a full trace in order, then drain outstanding buffered writes.
    pub fn run<I: IntoIterator<Item = TraceEvent>>(&mut self, events: I) {
        for ev in events {
            self.apply(ev);
        }
        self.finish();
    }

    /// Replay one trace event. Events must arrive in merged trace order;
    /// that order decides bus arbitration.
    pub fn apply(&mut self, event: TraceEvent) {
        match event.kind {
            AccessKind::Read => self.read(event.proc, event.addr),
            AccessKind::Write => self.write(event.proc, event.addr),
        }
        debug_assert!(self.is_coherent());
    }

    /// Drain every write buffer, as at end of trace. Writes still pending
    /// under TSO become globally visible here.
    pub fn finish(&mut self) {
        for i in 0..self.policies.len() {
            let proc = ProcId::new(i);
            let pending = self.policies[i].flush();
            if !pending.is_empty() {
                log::debug!("{proc}: draining {} buffered writes", pending.len());
                self.tracker.note_retirements(proc, pending.len() as u64);
            }
            for addr in pending {
                self.commit_write(proc, addr);
            }
        }
    }

    fn read(&mut self, proc: ProcId, addr: Addr) {
        if self.policies[proc.index()].holds(addr) {
            // The processor observes its own buffered write: a local hit
            // with no bus transaction and no global visibility.
            log::debug!("{proc}: read at {addr} satisfied by write buffer");
            self.tracker.note_buffer_snoop(proc);
            self.tracker.record(AccessOutcome {
                proc,
                addr,
                result: AccessResult::ReadHit,
                coherence: false,
            });
            return;
        }
        let access = self.caches[proc.index()].read(addr);
        self.complete(proc, addr, access);
    }

    fn write(&mut self, proc: ProcId, addr: Addr) {
        let ready = self.policies[proc.index()].accept(addr);
        if self.policies[proc.index()].is_buffered() {
            self.tracker.note_retirements(proc, ready.len() as u64);
        }
        for a in ready {
            self.commit_write(proc, a);
        }
    }

    /// Perform a write against the cache and bus. This is the point where
    /// the write becomes visible to the other processors.
    fn commit_write(&mut self, proc: ProcId, addr: Addr) {
        let access = self.caches[proc.index()].write(addr);
        self.complete(proc, addr, access);
    }

    fn complete(&mut self, proc: ProcId, addr: Addr, access: LocalAccess) {
        if let Some(op) = access.bus_op {
            let _ = self.bus.broadcast(
                BusTransaction {
                    initiator: proc,
                    addr,
                    op,
                },
                &mut self.caches,
            );
        }
        self.tracker.record(AccessOutcome {
            proc,
            addr,
            result: access.result,
            coherence: access.coherence,
        });
    }

    /// MSI mutual exclusion: a line MODIFIED in one cache may not be
    /// SHARED or MODIFIED in any other.
    pub fn is_coherent(&self) -> bool {
        for slot in 0..self.config.num_cache_lines {
            for (i, a) in self.caches.iter().enumerate() {
                let la = a.line(slot);
                if la.state() == LineState::Invalid {
                    continue;
                }
                for b in &self.caches[i + 1..] {
                    let lb = b.line(slot);
                    if lb.state() == LineState::Invalid || la.tag() != lb.tag() {
                        continue;
                    }
                    if la.state() == LineState::Modified || lb.state() == LineState::Modified {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn cache(&self, proc: ProcId) -> &Cache {
        &self.caches[proc.index()]
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn tracker(&self) -> &StatsTracker {
        &self.tracker
    }

    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

impl AddStats for Simulator {
    fn add_stats(&self, buf: &mut Stats) {
        self.tracker.add_stats(buf);
        self.bus.add_stats(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: ConsistencyModel, num_processors: usize, retire_at: usize) -> SimConfig {
        SimConfig {
            num_processors,
            num_cache_lines: 128,
            line_size: 4,
            retire_at,
            model,
        }
    }

    fn sim(model: ConsistencyModel, num_processors: usize, retire_at: usize) -> Simulator {
        Simulator::new(config(model, num_processors, retire_at)).unwrap()
    }

    fn r(proc: usize, addr: usize) -> TraceEvent {
        TraceEvent {
            proc: ProcId::new(proc),
            kind: AccessKind::Read,
            addr: Addr::new(addr),
        }
    }

    fn w(proc: usize, addr: usize) -> TraceEvent {
        TraceEvent {
            proc: ProcId::new(proc),
            kind: AccessKind::Write,
            addr: Addr::new(addr),
        }
    }

    fn state_of(s: &Simulator, proc: usize, addr: usize) -> LineState {
        s.cache(ProcId::new(proc)).line_for(Addr::new(addr)).state()
    }

    #[test]
    fn test_local_msi_correctness() {
        let mut s = sim(ConsistencyModel::Sc, 1, 1);
        s.apply(r(0, 16));
        s.apply(r(0, 16));
        s.apply(w(0, 32));
        s.apply(w(0, 32));
        let c = s.tracker().counters(ProcId::new(0));
        assert_eq!((c.read_misses, c.read_hits), (1, 1));
        assert_eq!((c.write_misses, c.write_hits), (1, 1));
    }

    #[test]
    fn test_coherence_invalidation() {
        let mut s = sim(ConsistencyModel::Sc, 2, 1);
        s.apply(w(0, 0));
        assert_eq!(state_of(&s, 0, 0), LineState::Modified);
        s.apply(w(1, 0));
        assert_eq!(state_of(&s, 0, 0), LineState::Invalid);
        assert_eq!(state_of(&s, 1, 0), LineState::Modified);
        // P1 never held the line before: its miss is cold, not coherence
        assert_eq!(s.tracker().counters(ProcId::new(1)).coherence_misses, 0);
        s.apply(r(0, 0));
        let c0 = s.tracker().counters(ProcId::new(0));
        assert_eq!(c0.read_misses, 1);
        assert_eq!(c0.coherence_misses, 1);
    }

    #[test]
    fn test_remote_read_downgrade() {
        let mut s = sim(ConsistencyModel::Sc, 2, 1);
        s.apply(w(0, 1032));
        s.apply(r(1, 1032));
        assert_eq!(state_of(&s, 0, 1032), LineState::Shared);
        assert_eq!(state_of(&s, 1, 1032), LineState::Shared);
        s.apply(w(0, 1032));
        let c0 = s.tracker().counters(ProcId::new(0));
        // the second write must re-acquire exclusivity: a coherence miss
        assert_eq!(c0.write_misses, 2);
        assert_eq!(c0.coherence_misses, 1);
        assert_eq!(state_of(&s, 1, 1032), LineState::Invalid);
    }

    #[test]
    fn test_miss_rate_arithmetic() {
        let mut s = sim(ConsistencyModel::Sc, 1, 1);
        let mut events = Vec::new();
        // 5 write misses, then 5 write hits
        for addr in [0, 64, 128, 192, 256] {
            events.push(w(0, addr));
        }
        for addr in [0, 64, 128, 192, 256] {
            events.push(w(0, addr));
        }
        // 3 read misses, then 7 read hits
        for addr in [1024, 1088, 1152] {
            events.push(r(0, addr));
        }
        for addr in [1024, 1088, 1152, 0, 64, 128, 256] {
            events.push(r(0, addr));
        }
        assert_eq!(events.len(), 20);
        s.run(events);
        let totals = s.tracker().totals();
        assert_eq!(totals.accesses(), 20);
        assert_eq!(totals.misses(), 8);
        assert_eq!(totals.miss_rate(), 0.4);
        assert_eq!(totals.read_miss_rate(), 0.3);
        assert_eq!(totals.write_miss_rate(), 0.5);
    }

    #[test]
    fn test_retire_at_two_preserves_fifo_order() {
        let mut s = sim(ConsistencyModel::Tso, 2, 2);
        // P1 caches three lines so retirements are observable
        for addr in [0, 64, 128] {
            s.apply(r(1, addr));
        }
        s.apply(w(0, 0));
        // first write only enqueued: nothing visible yet
        assert_eq!(state_of(&s, 0, 0), LineState::Invalid);
        assert_eq!(state_of(&s, 1, 0), LineState::Shared);
        s.apply(w(0, 64));
        // occupancy hit 2: the *first* write retired, the second did not
        assert_eq!(state_of(&s, 0, 0), LineState::Modified);
        assert_eq!(state_of(&s, 1, 0), LineState::Invalid);
        assert_eq!(state_of(&s, 0, 64), LineState::Invalid);
        assert_eq!(state_of(&s, 1, 64), LineState::Shared);
        s.apply(w(0, 128));
        assert_eq!(state_of(&s, 0, 64), LineState::Modified);
        assert_eq!(state_of(&s, 1, 64), LineState::Invalid);
        assert_eq!(state_of(&s, 1, 128), LineState::Shared);
        s.finish();
        assert_eq!(state_of(&s, 0, 128), LineState::Modified);
        assert_eq!(state_of(&s, 1, 128), LineState::Invalid);
        assert_eq!(s.tracker().counters(ProcId::new(0)).retired_writes, 3);
    }

    #[test]
    fn test_local_buffer_visibility() {
        let mut s = sim(ConsistencyModel::Tso, 2, 4);
        s.apply(w(0, 100));
        s.apply(r(0, 100));
        let c0 = s.tracker().counters(ProcId::new(0));
        // own read observes the buffered write without touching the cache
        assert_eq!(c0.read_hits, 1);
        assert_eq!(c0.buffer_snoops, 1);
        assert_eq!(state_of(&s, 0, 100), LineState::Invalid);
        // a peer sees no effect before retirement
        s.apply(r(1, 100));
        let c1 = s.tracker().counters(ProcId::new(1));
        assert_eq!(c1.read_misses, 1);
        assert_eq!(c1.coherence_misses, 0);
        assert_eq!(state_of(&s, 1, 100), LineState::Shared);
        s.finish();
        assert_eq!(state_of(&s, 0, 100), LineState::Modified);
        assert_eq!(state_of(&s, 1, 100), LineState::Invalid);
        assert_eq!(s.tracker().counters(ProcId::new(0)).write_misses, 1);
    }

    #[test]
    fn test_sc_matches_tso_with_retire_at_one() {
        let events = vec![
            w(0, 0),
            r(1, 0),
            w(1, 64),
            r(0, 64),
            w(0, 0),
            w(1, 0),
            r(0, 0),
        ];
        let mut sc = sim(ConsistencyModel::Sc, 2, 1);
        sc.run(events.clone());
        let mut tso = sim(ConsistencyModel::Tso, 2, 1);
        tso.run(events);
        for p in 0..2 {
            let a = sc.tracker().counters(ProcId::new(p));
            let b = tso.tracker().counters(ProcId::new(p));
            assert_eq!(
                (a.read_hits, a.read_misses, a.write_hits, a.write_misses, a.coherence_misses),
                (b.read_hits, b.read_misses, b.write_hits, b.write_misses, b.coherence_misses),
            );
        }
    }

    #[test]
    fn test_idempotent_replay() {
        let events = vec![
            w(0, 0),
            w(1, 0),
            r(0, 0),
            r(2, 1032),
            w(2, 1032),
            w(0, 512),
            r(1, 512),
            w(3, 64),
        ];
        let mut first = sim(ConsistencyModel::Tso, 4, 3);
        first.run(events.clone());
        let mut second = sim(ConsistencyModel::Tso, 4, 3);
        second.run(events);
        assert_eq!(first.tracker().per_proc(), second.tracker().per_proc());
    }

    #[test]
    fn test_mutual_exclusion_holds_throughout() {
        let events = vec![
            w(0, 0),
            w(1, 0),
            r(2, 0),
            w(2, 0),
            r(0, 0),
            w(3, 512),
            r(0, 512),
            w(0, 512),
            r(3, 512),
        ];
        let mut s = sim(ConsistencyModel::Tso, 4, 2);
        for ev in events {
            s.apply(ev);
            assert!(s.is_coherent());
        }
        s.finish();
        assert!(s.is_coherent());
    }

    #[test]
    fn test_every_event_is_accounted_for() {
        // writes still buffered at end of trace must drain and be counted
        let events = vec![w(0, 0), w(0, 4), w(0, 8), r(0, 0), r(1, 16)];
        let n = events.len() as u64;
        let mut s = sim(ConsistencyModel::Tso, 2, 100);
        s.run(events);
        assert_eq!(s.tracker().totals().accesses(), n);
        assert_eq!(s.tracker().counters(ProcId::new(0)).retired_writes, 3);
    }
}
