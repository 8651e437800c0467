use tracing::{debug, warn};

use crate::tx_manager::TxEvent;
use crate::tx_manager::engine::{SubmissionEngine, WorkerPlan};
use crate::{
    HistoryPage, HistoryQuery, LedgerIndex, RpcError, TransactionResult, TxManagerConfig, TxSigner,
};

/// What the reconciler wants done after a ledger close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollDecision {
    Idle,
    Start {
        generation: u64,
        ledger_index_min: LedgerIndex,
    },
    Abort {
        generation: u64,
    },
}

/// Bookkeeping of the periodic account history poll.
///
/// Only one poll runs at a time. Every poll gets a fresh generation so that
/// pages of an aborted poll can be told apart from the current one.
#[derive(Debug, Default)]
pub(crate) struct HistoryReconciler {
    last_checked: Option<LedgerIndex>,
    last_progress: LedgerIndex,
    inflight: Option<InflightPoll>,
    next_generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct InflightPoll {
    generation: u64,
    ledger_index_min: LedgerIndex,
}

impl HistoryReconciler {
    #[cfg(test)]
    pub(crate) fn last_checked(&self) -> Option<LedgerIndex> {
        self.last_checked
    }

    pub(crate) fn inflight(&self) -> Option<u64> {
        self.inflight.map(|poll| poll.generation)
    }

    /// Lower ledger bound of the running poll, reused for its later pages.
    pub(crate) fn inflight_ledger_index_min(&self) -> Option<LedgerIndex> {
        self.inflight.map(|poll| poll.ledger_index_min)
    }

    /// Staleness check run on every ledger close.
    ///
    /// `min_submission_ledger` is only consulted when coverage has to be
    /// (re)initialized.
    pub(crate) fn on_ledger_closed(
        &mut self,
        ledger: LedgerIndex,
        queue_empty: bool,
        min_submission_ledger: impl FnOnce() -> Option<LedgerIndex>,
        config: &TxManagerConfig,
    ) -> PollDecision {
        if queue_empty {
            self.last_checked = None;
            return PollDecision::Idle;
        }
        let Some(last_checked) = self.last_checked else {
            let start = min_submission_ledger().map_or(ledger, |min| min.min(ledger));
            self.last_checked = Some(start);
            return PollDecision::Idle;
        };
        if ledger.saturating_sub(last_checked) < config.history_poll_interval_ledgers {
            return PollDecision::Idle;
        }
        if let Some(InflightPoll { generation, .. }) = self.inflight {
            if ledger.saturating_sub(self.last_progress) >= config.history_poll_timeout_ledgers {
                self.inflight = None;
                return PollDecision::Abort { generation };
            }
            return PollDecision::Idle;
        }
        let generation = self.next_generation;
        let ledger_index_min = last_checked.saturating_sub(config.history_backfill_ledgers);
        self.next_generation += 1;
        self.inflight = Some(InflightPoll {
            generation,
            ledger_index_min,
        });
        self.last_progress = ledger;
        PollDecision::Start {
            generation,
            ledger_index_min,
        }
    }

    /// Account for a page of poll `generation` arriving at `ledger`.
    ///
    /// Returns `false` for pages of a poll that is no longer current.
    pub(crate) fn on_page(
        &mut self,
        generation: u64,
        ledger: LedgerIndex,
        has_next: bool,
        ledger_index_max: LedgerIndex,
    ) -> bool {
        if self.inflight() != Some(generation) {
            return false;
        }
        self.last_progress = ledger;
        if !has_next {
            let checked = self.last_checked.unwrap_or(0).max(ledger_index_max);
            self.last_checked = Some(checked);
            self.inflight = None;
        }
        true
    }

    pub(crate) fn on_error(&mut self, generation: u64) -> bool {
        if self.inflight() != Some(generation) {
            return false;
        }
        self.inflight = None;
        true
    }
}

impl<S, M> SubmissionEngine<S, M>
where
    S: TxSigner,
{
    pub(crate) fn check_history(&mut self, ledger: LedgerIndex) {
        let queue = &self.state.queue;
        let decision = self.history.on_ledger_closed(
            ledger,
            queue.is_empty(),
            || queue.min_submission_ledger(),
            &self.config,
        );
        match decision {
            PollDecision::Idle => {}
            PollDecision::Start {
                generation,
                ledger_index_min,
            } => {
                debug!(generation, ledger_index_min, ledger, "starting history poll");
                self.push_plan(WorkerPlan::FetchHistory {
                    generation,
                    query: HistoryQuery {
                        ledger_index_min,
                        forward: true,
                        marker: None,
                    },
                });
            }
            PollDecision::Abort { generation } => {
                debug!(generation, ledger, "history poll timed out");
                self.push_plan(WorkerPlan::AbortHistory { generation });
            }
        }
    }

    /// Reconcile one page of history poll `generation`.
    pub(crate) fn on_history_page(
        &mut self,
        generation: u64,
        page: Result<HistoryPage<M>, RpcError>,
    ) {
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                if self.history.on_error(generation) {
                    warn!(generation, error = %err, "history poll failed");
                }
                return;
            }
        };
        let ledger = self.current_ledger().unwrap_or(page.ledger_index_max);
        if !self
            .history
            .on_page(generation, ledger, page.has_next(), page.ledger_index_max)
        {
            debug!(generation, "dropping page of aborted history poll");
            return;
        }
        debug!(
            generation,
            transactions = page.transactions.len(),
            ledger_index_max = page.ledger_index_max,
            more = page.has_next(),
            validated = self.state.validated.len(),
            "history page"
        );
        if let Some(marker) = page.marker
            && let Some(ledger_index_min) = self.history.inflight_ledger_index_min()
        {
            self.push_plan(WorkerPlan::FetchHistory {
                generation,
                query: HistoryQuery {
                    ledger_index_min,
                    forward: true,
                    marker: Some(marker),
                },
            });
        }
        for result in page.transactions {
            self.notify_transaction_result(result);
        }
    }

    /// Apply one history entry.
    pub(crate) fn notify_transaction_result(&mut self, result: TransactionResult) {
        if !result.validated {
            return;
        }
        self.state.validated.insert(result.sequence);
        if let Some(key) = self.state.queue.key_for_hash(&result.hash) {
            self.finalize_with(key, |_| TxEvent::TransactionValidated(result));
            return;
        }
        if let Some(key) = self.state.queue.key_for_sequence(result.sequence) {
            debug!(
                key = %key,
                sequence = result.sequence,
                hash = %result.hash,
                "sequence taken by unknown transaction"
            );
            self.resubmit_with_new_sequence(key);
        }
        self.emit_validated_sequence(result.sequence.saturating_add(1));
    }
}
