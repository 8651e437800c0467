use tokio::sync::mpsc;

use crate::tx_manager::TxEvent;
use crate::{
    AttemptId, Fee, LedgerIndex, Sequence, SignError, SignedTx, TxHash, TxKey, TxSigner,
};

/// One submit attempt of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Submission {
    pub(crate) hash: TxHash,
    pub(crate) sequence: Sequence,
    pub(crate) ledger_index: LedgerIndex,
    pub(crate) attempt: AttemptId,
}

#[derive(Debug, Clone)]
struct Prepared {
    fee: Fee,
    sequence: Sequence,
    signed: SignedTx,
}

/// A pending transaction and its submission history.
pub(crate) struct TransactionRecord<P> {
    key: TxKey,
    payload: P,
    sequence: Sequence,
    is_sequence_plug: bool,
    finalized: bool,
    submissions: Vec<Submission>,
    prepared: Option<Prepared>,
    next_attempt: u64,
    events: Option<mpsc::UnboundedSender<TxEvent>>,
}

impl<P> TransactionRecord<P> {
    pub(crate) fn new(
        key: TxKey,
        payload: P,
        sequence: Sequence,
        events: mpsc::UnboundedSender<TxEvent>,
    ) -> Self {
        Self {
            key,
            payload,
            sequence,
            is_sequence_plug: false,
            finalized: false,
            submissions: Vec::new(),
            prepared: None,
            next_attempt: 0,
            events: Some(events),
        }
    }

    /// A filler transaction whose only job is to consume `sequence`.
    pub(crate) fn sequence_plug(key: TxKey, payload: P, sequence: Sequence) -> Self {
        Self {
            key,
            payload,
            sequence,
            is_sequence_plug: true,
            finalized: false,
            submissions: Vec::new(),
            prepared: None,
            next_attempt: 0,
            events: None,
        }
    }

    pub(crate) fn key(&self) -> TxKey {
        self.key
    }

    /// Currently assigned sequence. The next [`prepare`](Self::prepare) signs at it.
    pub(crate) fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub(crate) fn payload(&self) -> &P {
        &self.payload
    }

    pub(crate) fn is_sequence_plug(&self) -> bool {
        self.is_sequence_plug
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub(crate) fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    pub(crate) fn last_submission(&self) -> Option<&Submission> {
        self.submissions.last()
    }

    pub(crate) fn current_attempt(&self) -> Option<AttemptId> {
        self.last_submission().map(|submission| submission.attempt)
    }

    /// A response for `attempt` must be ignored.
    pub(crate) fn is_stale(&self, attempt: AttemptId) -> bool {
        self.finalized || self.current_attempt() != Some(attempt)
    }

    #[cfg(test)]
    pub(crate) fn was_submitted_with(&self, hash: &TxHash) -> bool {
        self.submissions.iter().any(|submission| submission.hash == *hash)
    }

    /// Move the record to a freshly allocated sequence.
    pub(crate) fn reassign_sequence(&mut self, sequence: Sequence) {
        self.sequence = sequence;
    }

    /// Signed blob for `fee` at the current sequence, re-signing only when the
    /// fee or the sequence changed since the last signature.
    pub(crate) fn prepare<S>(&mut self, signer: &S, fee: Fee) -> Result<SignedTx, SignError>
    where
        S: TxSigner<Payload = P> + ?Sized,
    {
        let sequence = self.sequence;
        if let Some(prepared) = &self.prepared
            && prepared.fee == fee
            && prepared.sequence == sequence
        {
            return Ok(prepared.signed.clone());
        }
        let signed = signer.sign(&self.payload, fee, sequence)?;
        self.prepared = Some(Prepared {
            fee,
            sequence,
            signed: signed.clone(),
        });
        Ok(signed)
    }

    /// Append a submission for the prepared blob and return its attempt id.
    pub(crate) fn track_submission(
        &mut self,
        hash: TxHash,
        ledger_index: LedgerIndex,
    ) -> AttemptId {
        let attempt = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        self.submissions.push(Submission {
            hash,
            sequence: self.sequence,
            ledger_index,
            attempt,
        });
        attempt
    }

    pub(crate) fn mark_finalized(&mut self) {
        debug_assert!(!self.finalized, "transaction finalized twice");
        self.finalized = true;
    }

    pub(crate) fn notify(&self, event: TxEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
