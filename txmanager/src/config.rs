use serde::{Deserialize, Serialize};

use crate::LedgerIndex;

const DEFAULT_STALE_SUBMISSION_LEDGERS: LedgerIndex = 5;
const DEFAULT_HISTORY_POLL_INTERVAL_LEDGERS: LedgerIndex = 15;
const DEFAULT_HISTORY_POLL_TIMEOUT_LEDGERS: LedgerIndex = 5;
const DEFAULT_HISTORY_BACKFILL_LEDGERS: LedgerIndex = 5;
const DEFAULT_MAX_LOAD_FACTOR: u32 = 768;
const DEFAULT_QUEUE_CAPACITY: usize = 128;
const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// Tunables of the transaction worker.
///
/// All ledger counts are measured in closed ledgers as reported by the
/// ledger-close signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxManagerConfig {
    /// The head of the queue is resubmitted once more than this many ledgers
    /// closed since its latest submission.
    pub stale_submission_ledgers: LedgerIndex,
    /// Minimum number of ledgers between two account history polls.
    pub history_poll_interval_ledgers: LedgerIndex,
    /// An in-flight history poll that made no progress for this many ledgers is
    /// aborted.
    pub history_poll_timeout_ledgers: LedgerIndex,
    /// History polls start this many ledgers before the last checked ledger.
    pub history_backfill_ledgers: LedgerIndex,
    /// Submission is blocked while the server load factor is at or above this.
    pub max_load_factor: u32,
    /// Capacity of the front-end request queue. Zero is treated as one.
    pub queue_capacity: usize,
    /// Capacity of the status signal queue. Zero is treated as one.
    pub signal_capacity: usize,
}

impl Default for TxManagerConfig {
    fn default() -> Self {
        Self {
            stale_submission_ledgers: DEFAULT_STALE_SUBMISSION_LEDGERS,
            history_poll_interval_ledgers: DEFAULT_HISTORY_POLL_INTERVAL_LEDGERS,
            history_poll_timeout_ledgers: DEFAULT_HISTORY_POLL_TIMEOUT_LEDGERS,
            history_backfill_ledgers: DEFAULT_HISTORY_BACKFILL_LEDGERS,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }
}
