use std::fmt;

use crate::{
    cache::{Cache, SnoopEffect},
    common::{Addr, ProcId},
    stat::{AddStats, Stats},
};

/// Kind of transaction a cache places on the bus after a local miss.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusOp {
    ReadMiss,
    WriteMiss,
}

impl fmt::Display for BusOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusOp::ReadMiss => write!(f, "READ_MISS"),
            BusOp::WriteMiss => write!(f, "WRITE_MISS"),
        }
    }
}

/// One bus transaction. Broadcast atomically: the simulator never starts
/// another transaction while this one's snoops are being applied.
#[derive(Clone, Copy, Debug)]
pub struct BusTransaction {
    pub initiator: ProcId,
    pub addr: Addr,
    pub op: BusOp,
}

/// Aggregate effect the snoops of one transaction had on the other caches.
#[derive(Default, Clone, Copy, Debug)]
pub struct SnoopSummary {
    /// Some peer holds the line SHARED (possibly after a downgrade) and
    /// could have supplied it; otherwise the fill comes from memory.
    pub supplied_by_cache: bool,
    pub invalidated: usize,
    pub downgraded: usize,
}

/// The shared interconnect. Strictly serialized: one transaction is
/// processed start to finish before the next begins.
#[derive(Default)]
pub struct Bus {
    transactions: u64,
    invalidations: u64,
    downgrades: u64,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast `txn` to every cache except the initiator, applying the
    /// remote-snoop transitions in processor order.
    pub fn broadcast(&mut self, txn: BusTransaction, caches: &mut [Cache]) -> SnoopSummary {
        self.transactions += 1;
        let mut summary = SnoopSummary::default();
        for cache in caches.iter_mut().filter(|c| c.id() != txn.initiator) {
            match cache.snoop(txn.op, txn.addr) {
                SnoopEffect::None => {}
                SnoopEffect::Shared => summary.supplied_by_cache = true,
                SnoopEffect::Downgraded => {
                    summary.supplied_by_cache = true;
                    summary.downgraded += 1;
                }
                SnoopEffect::Invalidated => summary.invalidated += 1,
            }
        }
        self.invalidations += summary.invalidated as u64;
        self.downgrades += summary.downgraded as u64;
        log::trace!(
            "bus: {} at {} by {} (invalidated {}, downgraded {})",
            txn.op,
            txn.addr,
            txn.initiator,
            summary.invalidated,
            summary.downgraded
        );
        summary
    }

    pub fn transactions(&self) -> u64 {
        self.transactions
    }
    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }
    pub fn downgrades(&self) -> u64 {
        self.downgrades
    }
}

impl AddStats for Bus {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(stat::BusStat {
            transactions: self.transactions,
            invalidations: self.invalidations,
            downgrades: self.downgrades,
        }));
    }
}

mod stat {
    use std::fmt;

    use crate::stat::*;

    pub struct BusStat {
        pub transactions: u64,
        pub invalidations: u64,
        pub downgrades: u64,
    }

    impl Stat for BusStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ BusStat {
        fn header(&self) -> &'static str {
            "bus stat"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ BusStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "  transactions:  {:>10}", self.transactions)?;
            writeln!(f, "  invalidations: {:>10}", self.invalidations)?;
            writeln!(f, "  downgrades:    {:>10}", self.downgrades)
        }
    }
}
