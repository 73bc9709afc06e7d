use std::collections::VecDeque;

use crate::common::Addr;

/// Per-processor FIFO of writes that have completed locally but are not yet
/// visible to the other processors (TSO store buffer).
///
/// Occupancy reaching `retire_at` forces the oldest write out; the caller
/// performs the retired write against the cache and bus, which is the point
/// of global visibility.
pub struct WriteBuffer {
    pending: VecDeque<Addr>,
    retire_at: usize,
}

impl WriteBuffer {
    pub fn new(retire_at: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            retire_at,
        }
    }

    pub fn enqueue(&mut self, addr: Addr) {
        self.pending.push_back(addr);
    }

    /// True if an unretired write to `addr` is pending. A local read of
    /// such an address must behave as if the write already committed; only
    /// presence matters since no data is tracked, so any matching entry
    /// stands in for the most recent one.
    pub fn holds(&self, addr: Addr) -> bool {
        self.pending.contains(&addr)
    }

    /// Whether the retire-at-N policy requires draining the oldest entry.
    /// Pure; the effect lives in [`WriteBuffer::retire`].
    pub fn would_retire(&self) -> bool {
        self.pending.len() >= self.retire_at
    }

    /// Remove and return the oldest pending write.
    pub fn retire(&mut self) -> Option<Addr> {
        self.pending.pop_front()
    }

    /// Empty the buffer in FIFO order, as at end of trace.
    pub fn drain(&mut self) -> Vec<Addr> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
