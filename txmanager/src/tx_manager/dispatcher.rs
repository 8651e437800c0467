use tracing::{debug, warn};

use crate::tx_manager::TxEvent;
use crate::tx_manager::engine::{BusAction, EngineState, SubmissionEngine};
use crate::tx_manager::event_bus::Subscription;
use crate::{
    AttemptId, EngineResult, ResultClass, RpcError, Sequence, SubmitResponse, TxKey, TxSigner,
};

impl<S, M> SubmissionEngine<S, M>
where
    S: TxSigner,
{
    /// Reconcile the outcome of submit `attempt` of `key`.
    pub(crate) fn on_submit_outcome(
        &mut self,
        key: TxKey,
        attempt: AttemptId,
        outcome: Result<SubmitResponse, RpcError>,
    ) {
        let Some(record) = self.state.queue.get(key) else {
            debug!(key = %key, attempt = %attempt, "response for finalized transaction");
            return;
        };
        if record.is_stale(attempt) {
            debug!(key = %key, attempt = %attempt, "response to prior submission");
            return;
        }
        let Some(sequence) = record.last_submission().map(|submission| submission.sequence) else {
            return;
        };

        match outcome {
            Err(err) if err.is_no_network() => {
                debug!(key = %key, sequence, "no network, resubmitting");
                self.resubmit_with_same_sequence(key);
            }
            Err(err) => {
                warn!(key = %key, sequence, error = %err, "submit failed");
                self.finalize_with(key, |_| TxEvent::SubmitError(err.into()));
            }
            Ok(response) => self.on_engine_result(key, attempt, sequence, response),
        }
    }

    fn on_engine_result(
        &mut self,
        key: TxKey,
        attempt: AttemptId,
        sequence: Sequence,
        response: SubmitResponse,
    ) {
        debug!(
            key = %key,
            sequence,
            result = %response.engine_result,
            message = %response.engine_result_message,
            "engine result"
        );
        let result = response.engine_result;
        match result {
            EngineResult::TES_SUCCESS => {
                if let Some(record) = self.state.queue.get(key) {
                    record.notify(TxEvent::SubmitSuccess(response));
                }
            }
            EngineResult::TEF_PAST_SEQ => self.resubmit_with_new_sequence(key),
            EngineResult::TER_PRE_SEQ => self.resubmit_after_validated(key, attempt, sequence),
            EngineResult::TEL_INSUF_FEE_P => self.resubmit_with_same_sequence(key),
            EngineResult::TEF_ALREADY => {}
            _ => match result.class() {
                ResultClass::Tec => {
                    self.finalize_with(key, |_| TxEvent::SubmitFailure(response));
                }
                ResultClass::Tem | ResultClass::Tef | ResultClass::Tel | ResultClass::Ter => {
                    self.orphan_sequence(key, sequence, response);
                }
                ResultClass::Tes | ResultClass::Unknown => {
                    warn!(key = %key, sequence, result = %result, "unhandled engine result");
                }
            },
        }
    }

    /// Wait until the sequence before ours is validated, then resubmit as is.
    fn resubmit_after_validated(&mut self, key: TxKey, attempt: AttemptId, sequence: Sequence) {
        let attempt = Some(attempt);
        self.validated_sequence.subscribe(
            Subscription::new("pre_sequence", move |_, _| BusAction::ResubmitSameSequence {
                key,
                attempt,
            })
            .execute_if(move |validated: &Sequence, _: &EngineState<S::Payload>| {
                *validated == sequence
            })
            .remove_if(move |state: &EngineState<S::Payload>| state.is_superseded(key, attempt))
            .once(),
        );
    }

    /// No valid transaction will ever occupy `sequence`: drop the record and
    /// keep the account's sequence space gapless.
    fn orphan_sequence(&mut self, key: TxKey, sequence: Sequence, response: SubmitResponse) {
        let Some(record) = self.state.queue.finalize(key) else {
            return;
        };
        if self.state.queue.is_empty() {
            self.state.allocator.rollback();
            debug!(
                key = %key,
                sequence,
                local_high_water = self.state.allocator.local_high_water(),
                "orphaned last sequence, rolled back"
            );
        } else {
            // TODO: terRETRY is retryable by nature; decide whether it should
            // keep its sequence instead of being plugged.
            self.enqueue_sequence_plug(sequence);
            for later in self.state.queue.keys_above(sequence) {
                self.resubmit_with_same_sequence(later);
            }
        }
        record.notify(TxEvent::SubmitFailure(response));
    }
}
