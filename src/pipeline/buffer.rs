//! Reordering buffer between the parallel workers and the ordered writer.
//!
//! Workers finish submissions in nondeterministic order, but the CSV files
//! must be appended in ascending date order. The buffer holds early arrivals
//! until the next expected sequence number shows up, then releases the
//! contiguous run.

use hashbrown::HashMap;

use crate::pipeline::worker::RowBatch;

pub struct ReorderBuffer {
    pending: HashMap<u64, RowBatch>,
    next_seq: u64,
}

impl ReorderBuffer {
    #[inline]
    pub fn new() -> Self {
        Self { pending: HashMap::new(), next_seq: 0 }
    }

    /// Adds a batch and returns the contiguous run now ready for writing.
    #[must_use]
    pub fn push(&mut self, batch: RowBatch) -> Vec<RowBatch> {
        self.pending.insert(batch.seq, batch);

        let mut ready = Vec::new();
        while let Some(batch) = self.pending.remove(&self.next_seq) {
            ready.push(batch);
            self.next_seq += 1;
        }
        ready
    }

    /// Drains whatever is left, sorted by sequence number.
    #[must_use]
    pub fn drain(&mut self) -> Vec<RowBatch> {
        let mut rest: Vec<RowBatch> = self.pending.drain().map(|(_, batch)| batch).collect();
        rest.sort_unstable_by_key(|batch| batch.seq);
        rest
    }
}
