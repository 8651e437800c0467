use tracing::debug;

use crate::tx_manager::engine::SubmissionEngine;
use crate::{LedgerIndex, TxSigner};

impl<S, M> SubmissionEngine<S, M>
where
    S: TxSigner,
{
    /// Liveness probe run on every closed ledger.
    ///
    /// Only the head of the queue is probed: anything behind it cannot be
    /// validated before it anyway.
    pub(crate) fn on_ledger_closed(&mut self, ledger: LedgerIndex) {
        self.check_history(ledger);
        self.prune_validated();

        if !self.state.can_submit() || self.state.queue.is_empty() {
            return;
        }
        let Some(head) = self.state.queue.sorted_by_sequence().first().copied() else {
            return;
        };
        let Some(previous) = self
            .state
            .queue
            .get(head)
            .and_then(|record| record.last_submission())
        else {
            return;
        };
        let ledgers_closed = ledger.saturating_sub(previous.ledger_index);
        if ledgers_closed > self.config.stale_submission_ledgers {
            debug!(
                key = %head,
                sequence = previous.sequence,
                submitted_at = previous.ledger_index,
                ledger,
                "head of queue is stale, resubmitting"
            );
            self.resubmit_with_same_sequence(head);
        }
    }

    /// Drop validated sequences no pending or future record can occupy.
    fn prune_validated(&mut self) {
        let next = self.state.allocator.peek();
        let floor = self
            .state
            .queue
            .all()
            .map(|record| record.sequence())
            .min()
            .map_or(next, |lowest| lowest.min(next));
        self.state.validated.prune_below(floor);
    }
}
