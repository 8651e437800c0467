use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::tx_manager::event_bus::{EventBus, Subscription};
use crate::tx_manager::gate::{StatusSnapshot, SubmissionGate};
use crate::tx_manager::history::HistoryReconciler;
use crate::tx_manager::pending_queue::PendingQueue;
use crate::tx_manager::record::TransactionRecord;
use crate::tx_manager::sequence::{SequenceAllocator, ValidatedSequences};
use crate::tx_manager::{PendingEntry, PendingSnapshot, Signal, TxEvent};
use crate::{
    AttemptId, HistoryQuery, LedgerIndex, Sequence, SubmitError, TxKey, TxManagerConfig, TxSigner,
};

/// Shared source of [`TxKey`]s for the front-end and the engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct KeyGen(Arc<AtomicU64>);

impl KeyGen {
    pub(crate) fn next(&self) -> TxKey {
        TxKey(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// A transaction accepted by the front-end, not yet sequenced.
pub(crate) struct NewTx<P> {
    pub(crate) key: TxKey,
    pub(crate) payload: P,
    pub(crate) events: mpsc::UnboundedSender<TxEvent>,
}

/// Side effects requested by the engine, executed by the worker.
#[derive(Debug)]
pub(crate) enum WorkerPlan<M> {
    Submit {
        key: TxKey,
        attempt: AttemptId,
        sequence: Sequence,
        blob: Arc<Vec<u8>>,
    },
    FetchHistory {
        generation: u64,
        query: HistoryQuery<M>,
    },
    AbortHistory {
        generation: u64,
    },
}

impl<M> WorkerPlan<M> {
    pub(crate) fn summary(&self) -> String {
        match self {
            WorkerPlan::Submit {
                key,
                attempt,
                sequence,
                ..
            } => format!("Submit {key} attempt={attempt} seq={sequence}"),
            WorkerPlan::FetchHistory { generation, query } => format!(
                "FetchHistory gen={generation} min={} resume={}",
                query.ledger_index_min,
                query.marker.is_some()
            ),
            WorkerPlan::AbortHistory { generation } => format!("AbortHistory gen={generation}"),
        }
    }
}

/// Work produced by a bus subscription, applied once delivery finished.
///
/// Each action re-checks that the record is still in the state the
/// subscription was registered for, since an earlier action of the same
/// delivery may have superseded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BusAction {
    /// Deferred submit registered while `submissions` attempts existed.
    DoSubmit { key: TxKey, submissions: usize },
    /// Resubmit at the current sequence unless `attempt` was superseded.
    ResubmitSameSequence {
        key: TxKey,
        attempt: Option<AttemptId>,
    },
    /// Move to a new sequence once the current one is known consumed.
    ResubmitNewSequence {
        key: TxKey,
        attempt: Option<AttemptId>,
    },
}

/// State visible to bus guards.
pub(crate) struct EngineState<P> {
    pub(crate) queue: PendingQueue<P>,
    pub(crate) allocator: SequenceAllocator,
    pub(crate) validated: ValidatedSequences,
    pub(crate) status: StatusSnapshot,
    pub(crate) gate: SubmissionGate,
}

impl<P> EngineState<P> {
    pub(crate) fn can_submit(&self) -> bool {
        self.gate.can_submit(&self.status)
    }

    /// Whether `attempt` is no longer the latest attempt of `key`.
    pub(crate) fn is_superseded(&self, key: TxKey, attempt: Option<AttemptId>) -> bool {
        self.queue
            .get(key)
            .is_none_or(|record| record.is_finalized() || record.current_attempt() != attempt)
    }

    fn current_ledger(&self) -> Option<LedgerIndex> {
        self.status.server.map(|server| server.ledger_index)
    }
}

pub(crate) type Bus<E, P> = EventBus<E, EngineState<P>, BusAction>;

/// Single-writer state machine for one account's pending transactions.
///
/// Every input is applied synchronously. Network work is not performed here;
/// it is queued as [`WorkerPlan`]s for the worker to execute.
pub(crate) struct SubmissionEngine<S: TxSigner, M> {
    pub(crate) state: EngineState<S::Payload>,
    pub(crate) signer: Arc<S>,
    pub(crate) config: TxManagerConfig,
    pub(crate) status_changed: Bus<(), S::Payload>,
    pub(crate) validated_sequence: Bus<Sequence, S::Payload>,
    pub(crate) history: HistoryReconciler,
    awaiting_account: VecDeque<NewTx<S::Payload>>,
    plans: Vec<WorkerPlan<M>>,
    keys: KeyGen,
}

impl<S, M> SubmissionEngine<S, M>
where
    S: TxSigner,
{
    pub(crate) fn new(signer: Arc<S>, config: TxManagerConfig, keys: KeyGen) -> Self {
        Self {
            state: EngineState {
                queue: PendingQueue::new(),
                allocator: SequenceAllocator::new(),
                validated: ValidatedSequences::default(),
                status: StatusSnapshot::default(),
                gate: SubmissionGate::new(config.max_load_factor),
            },
            signer,
            config,
            status_changed: EventBus::new("status_changed"),
            validated_sequence: EventBus::new("validated_sequence"),
            history: HistoryReconciler::default(),
            awaiting_account: VecDeque::new(),
            plans: Vec::new(),
            keys,
        }
    }

    pub(crate) fn take_plans(&mut self) -> Vec<WorkerPlan<M>> {
        std::mem::take(&mut self.plans)
    }

    pub(crate) fn push_plan(&mut self, plan: WorkerPlan<M>) {
        self.plans.push(plan);
    }

    pub(crate) fn pending_snapshot(&self) -> PendingSnapshot {
        let entries = self
            .state
            .queue
            .sorted_by_sequence()
            .into_iter()
            .filter_map(|key| self.state.queue.get(key))
            .map(|record| PendingEntry {
                key: record.key(),
                sequence: record.sequence(),
                is_sequence_plug: record.is_sequence_plug(),
                submissions: record.submission_count(),
            })
            .collect();
        PendingSnapshot {
            entries,
            awaiting_account: self.awaiting_account.len(),
        }
    }

    /// Sequence a new transaction and try to submit it.
    pub(crate) fn enqueue(&mut self, tx: NewTx<S::Payload>) {
        if self.state.status.account.is_none() {
            debug!(key = %tx.key, "account state unknown, holding transaction");
            self.awaiting_account.push_back(tx);
            return;
        }
        let sequence = self.state.allocator.allocate();
        debug!(
            key = %tx.key,
            sequence,
            server_sequence = self.state.allocator.server_sequence(),
            local_high_water = self.state.allocator.local_high_water(),
            "enqueue"
        );
        let record = TransactionRecord::new(tx.key, tx.payload, sequence, tx.events);
        self.state.queue.add(record);
        self.request_submit(tx.key);
    }

    /// Queue a filler transaction that consumes `sequence`.
    pub(crate) fn enqueue_sequence_plug(&mut self, sequence: Sequence) {
        let key = self.keys.next();
        debug!(key = %key, sequence, "enqueue sequence plug");
        let record = TransactionRecord::sequence_plug(key, self.signer.sequence_plug(), sequence);
        self.state.queue.add(record);
        self.request_submit(key);
    }

    /// Apply a status signal and let deferred submissions re-evaluate the gate.
    pub(crate) fn apply_signal(&mut self, signal: Signal) {
        debug!(signal = %signal.summary(), "status signal");
        match signal {
            Signal::Connected(connected) => self.state.status.connected = connected,
            Signal::ServerInfo(info) => self.state.status.server = Some(info),
            Signal::LedgerClosed(info) => {
                self.state.status.server = Some(info);
                self.on_ledger_closed(info.ledger_index);
            }
            Signal::Account(account) => {
                self.state.allocator.set_server_sequence(account.sequence);
                self.state.status.account = Some(account);
                while let Some(tx) = self.awaiting_account.pop_front() {
                    self.enqueue(tx);
                }
            }
        }
        self.emit_status_changed();
    }

    /// Submit now if the gate is open, otherwise on the next status change
    /// that opens it.
    pub(crate) fn request_submit(&mut self, key: TxKey) {
        if self.state.can_submit() {
            self.do_submit(key);
            return;
        }
        let Some(record) = self.state.queue.get(key) else {
            return;
        };
        let submissions = record.submission_count();
        debug!(key = %key, submissions, "submission gated, deferring");
        self.status_changed.subscribe(
            Subscription::new("deferred_submit", move |_, _| BusAction::DoSubmit {
                key,
                submissions,
            })
            .execute_if(|_, state: &EngineState<S::Payload>| state.can_submit())
            .remove_if(move |state: &EngineState<S::Payload>| {
                state.queue.get(key).is_none_or(|record| {
                    record.is_finalized() || record.submission_count() != submissions
                })
            })
            .once(),
        );
    }

    /// Sign at the current fee and sequence and plan the submit call.
    pub(crate) fn do_submit(&mut self, key: TxKey) {
        let Some(server) = self.state.status.server else {
            return;
        };
        let Some(record) = self.state.queue.get_mut(key) else {
            return;
        };
        let fee = self.signer.fee(record.payload(), &server);
        let sequence = record.sequence();
        match record.prepare(self.signer.as_ref(), fee) {
            Ok(signed) => {
                let Some(attempt) =
                    self.state
                        .queue
                        .track_submission(key, signed.hash, server.ledger_index)
                else {
                    return;
                };
                debug!(
                    key = %key,
                    sequence,
                    fee,
                    hash = %signed.hash,
                    ledger_index = server.ledger_index,
                    "submit"
                );
                self.plans.push(WorkerPlan::Submit {
                    key,
                    attempt,
                    sequence,
                    blob: signed.blob,
                });
            }
            Err(err) => {
                warn!(key = %key, sequence, fee, error = %err, "signing failed");
                self.finalize_with(key, |_| TxEvent::SubmitError(SubmitError::Sign(err)));
            }
        }
    }

    pub(crate) fn resubmit_with_same_sequence(&mut self, key: TxKey) {
        self.request_submit(key);
    }

    /// Move a record to a new sequence, but only after its current sequence is
    /// known to be consumed by a validated transaction.
    pub(crate) fn resubmit_with_new_sequence(&mut self, key: TxKey) {
        let Some(record) = self.state.queue.get(key) else {
            return;
        };
        if record.is_sequence_plug() {
            debug!(key = %key, sequence = record.sequence(), "sequence plug keeps its sequence");
            return;
        }
        let old_sequence = record.sequence();
        if self.state.validated.consumed(old_sequence) {
            self.move_to_new_sequence(key);
            return;
        }
        let attempt = record.current_attempt();
        debug!(key = %key, sequence = old_sequence, "waiting for validated sequence");
        self.validated_sequence.subscribe(
            Subscription::new("new_sequence", move |_, _| BusAction::ResubmitNewSequence {
                key,
                attempt,
            })
            .execute_if(move |_, state: &EngineState<S::Payload>| {
                state.validated.consumed(old_sequence)
            })
            .remove_if(move |state: &EngineState<S::Payload>| state.is_superseded(key, attempt))
            .once(),
        );
    }

    fn move_to_new_sequence(&mut self, key: TxKey) {
        let sequence = self.state.allocator.allocate();
        let Some(record) = self.state.queue.get_mut(key) else {
            return;
        };
        debug!(key = %key, from = record.sequence(), to = sequence, "new sequence");
        record.reassign_sequence(sequence);
        self.request_submit(key);
    }

    /// Finalize `key`, notifying its handle with the event built from the
    /// record.
    pub(crate) fn finalize_with<F>(&mut self, key: TxKey, event: F) -> bool
    where
        F: FnOnce(&TransactionRecord<S::Payload>) -> TxEvent,
    {
        let Some(record) = self.state.queue.finalize(key) else {
            return false;
        };
        let event = event(&record);
        debug!(key = %key, sequence = record.sequence(), event = %event.summary(), "finalized");
        record.notify(event);
        true
    }

    pub(crate) fn emit_status_changed(&mut self) {
        if self.status_changed.is_empty() {
            return;
        }
        let actions = self.status_changed.emit(&(), &self.state);
        self.apply_bus_actions(actions);
    }

    pub(crate) fn emit_validated_sequence(&mut self, sequence: Sequence) {
        debug!(
            sequence,
            listeners = self.validated_sequence.len(),
            "validated sequence"
        );
        let actions = self.validated_sequence.emit(&sequence, &self.state);
        self.apply_bus_actions(actions);
    }

    fn apply_bus_actions(&mut self, actions: Vec<BusAction>) {
        for action in actions {
            debug!(action = ?action, "bus action");
            match action {
                BusAction::DoSubmit { key, submissions } => {
                    let current = self.state.queue.get(key).map(|r| r.submission_count());
                    if current == Some(submissions) {
                        self.request_submit(key);
                    }
                }
                BusAction::ResubmitSameSequence { key, attempt } => {
                    if !self.state.is_superseded(key, attempt) {
                        self.resubmit_with_same_sequence(key);
                    }
                }
                BusAction::ResubmitNewSequence { key, attempt } => {
                    if self.state.is_superseded(key, attempt) {
                        continue;
                    }
                    let consumed = self
                        .state
                        .queue
                        .get(key)
                        .is_some_and(|record| self.state.validated.consumed(record.sequence()));
                    if consumed {
                        self.move_to_new_sequence(key);
                    }
                }
            }
        }
    }

    pub(crate) fn current_ledger(&self) -> Option<LedgerIndex> {
        self.state.current_ledger()
    }
}
