use std::collections::BTreeSet;

use crate::Sequence;

/// Hands out account sequences, reconciled against the server's view.
#[derive(Debug, Default, Clone)]
pub(crate) struct SequenceAllocator {
    server_sequence: Sequence,
    local_high_water: Sequence,
}

impl SequenceAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_server_sequence(&mut self, sequence: Sequence) {
        self.server_sequence = sequence;
    }

    pub(crate) fn server_sequence(&self) -> Sequence {
        self.server_sequence
    }

    pub(crate) fn local_high_water(&self) -> Sequence {
        self.local_high_water
    }

    /// Sequence the next [`allocate`](Self::allocate) will hand out.
    pub(crate) fn peek(&self) -> Sequence {
        self.server_sequence.max(self.local_high_water)
    }

    /// Next sequence: `max(server, local)`, advancing the local high water.
    pub(crate) fn allocate(&mut self) -> Sequence {
        let next = self.peek();
        self.local_high_water = next.saturating_add(1);
        next
    }

    /// Give back the most recently allocated sequence.
    pub(crate) fn rollback(&mut self) {
        self.local_high_water = self.local_high_water.saturating_sub(1);
    }
}

/// Sequences seen validated in the account's history.
#[derive(Debug, Default, Clone)]
pub(crate) struct ValidatedSequences {
    seen: BTreeSet<Sequence>,
}

impl ValidatedSequences {
    pub(crate) fn insert(&mut self, sequence: Sequence) -> bool {
        self.seen.insert(sequence)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, sequence: Sequence) -> bool {
        self.seen.contains(&sequence)
    }

    /// Whether `sequence` is provably consumed: a validated transaction exists
    /// at it or at a later sequence.
    pub(crate) fn consumed(&self, sequence: Sequence) -> bool {
        self.seen.range(sequence..).next().is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }

    /// Forget sequences below `floor`, keeping the highest one seen.
    ///
    /// `consumed` only depends on the highest entry, so this never changes
    /// its answer.
    pub(crate) fn prune_below(&mut self, floor: Sequence) {
        let Some(&highest) = self.seen.last() else {
            return;
        };
        self.seen = self.seen.split_off(&floor.min(highest));
    }
}
