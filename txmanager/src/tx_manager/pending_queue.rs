use std::collections::{BTreeMap, HashMap};

use crate::tx_manager::record::TransactionRecord;
use crate::{AttemptId, LedgerIndex, Sequence, TxHash, TxKey};

/// Not yet finalized transactions of the account.
pub(crate) struct PendingQueue<P> {
    records: BTreeMap<TxKey, TransactionRecord<P>>,
    hash_to_key: HashMap<TxHash, TxKey>,
}

impl<P> Default for PendingQueue<P> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            hash_to_key: HashMap::new(),
        }
    }
}

impl<P> PendingQueue<P> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn add(&mut self, record: TransactionRecord<P>) {
        debug_assert!(!record.is_finalized());
        for submission in record.submissions() {
            self.hash_to_key.insert(submission.hash, record.key());
        }
        self.records.insert(record.key(), record);
    }

    /// Remove a record. Removing an absent record is a no-op.
    pub(crate) fn remove(&mut self, key: TxKey) -> Option<TransactionRecord<P>> {
        let record = self.records.remove(&key)?;
        for submission in record.submissions() {
            self.hash_to_key.remove(&submission.hash);
        }
        Some(record)
    }

    pub(crate) fn get(&self, key: TxKey) -> Option<&TransactionRecord<P>> {
        self.records.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: TxKey) -> Option<&mut TransactionRecord<P>> {
        self.records.get_mut(&key)
    }

    pub(crate) fn all(&self) -> impl Iterator<Item = &TransactionRecord<P>> {
        self.records.values()
    }

    /// Keys ordered by ascending sequence, snapshotted so callers may mutate
    /// the queue while walking them.
    pub(crate) fn sorted_by_sequence(&self) -> Vec<TxKey> {
        let mut keys: Vec<_> = self
            .all()
            .map(|record| (record.sequence(), record.key()))
            .collect();
        keys.sort_unstable();
        keys.into_iter().map(|(_, key)| key).collect()
    }

    pub(crate) fn key_for_hash(&self, hash: &TxHash) -> Option<TxKey> {
        self.hash_to_key.get(hash).copied()
    }

    pub(crate) fn key_for_sequence(&self, sequence: Sequence) -> Option<TxKey> {
        self.all()
            .find(|record| record.sequence() == sequence)
            .map(|record| record.key())
    }

    /// Keys of records whose sequence is greater than `sequence`, ascending.
    pub(crate) fn keys_above(&self, sequence: Sequence) -> Vec<TxKey> {
        self.sorted_by_sequence()
            .into_iter()
            .filter(|key| {
                self.records
                    .get(key)
                    .is_some_and(|record| record.sequence() > sequence)
            })
            .collect()
    }

    /// Lowest ledger any pending record was submitted at.
    pub(crate) fn min_submission_ledger(&self) -> Option<LedgerIndex> {
        self.all()
            .flat_map(|record| record.submissions())
            .map(|submission| submission.ledger_index)
            .min()
    }

    /// Record a submit attempt of `hash` at `ledger_index` and index the hash.
    pub(crate) fn track_submission(
        &mut self,
        key: TxKey,
        hash: TxHash,
        ledger_index: LedgerIndex,
    ) -> Option<AttemptId> {
        let record = self.records.get_mut(&key)?;
        let attempt = record.track_submission(hash, ledger_index);
        self.hash_to_key.insert(hash, key);
        Some(attempt)
    }

    /// Mark a record finalized and take it out of the queue.
    ///
    /// Returns `None` if the record was already finalized.
    pub(crate) fn finalize(&mut self, key: TxKey) -> Option<TransactionRecord<P>> {
        let mut record = self.remove(key)?;
        record.mark_finalized();
        Some(record)
    }
}
