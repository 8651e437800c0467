use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::tx_manager::engine::{KeyGen, NewTx, SubmissionEngine, WorkerPlan};
use crate::tx_manager::{Signal, TxEvent};
use crate::{
    AccountState, AttemptId, EngineResult, Fee, LedgerIndex, RpcError, Sequence, ServerInfo,
    SignError, SignedTx, SubmitResponse, TransactionResult, TxHash, TxKey, TxManagerConfig,
    TxSigner,
};

/// Payload the test signer uses for sequence plugs.
pub(crate) const PLUG_PAYLOAD: u64 = u64::MAX;

/// Deterministic hash of a `(payload, sequence, fee)` signature.
pub(crate) fn hash_for(payload: u64, sequence: Sequence, fee: Fee) -> TxHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&payload.to_be_bytes());
    bytes[8..12].copy_from_slice(&sequence.to_be_bytes());
    bytes[12..20].copy_from_slice(&fee.to_be_bytes());
    TxHash(bytes)
}

/// Recover `(hash, payload, sequence)` from a blob signed by [`CountingSigner`].
pub(crate) fn decode_blob(blob: &[u8]) -> (TxHash, u64, Sequence) {
    let hash = TxHash(blob.try_into().expect("32 byte blob"));
    let payload = u64::from_be_bytes(blob[..8].try_into().unwrap());
    let sequence = Sequence::from_be_bytes(blob[8..12].try_into().unwrap());
    (hash, payload, sequence)
}

pub(crate) fn server_info(ledger_index: LedgerIndex, load_factor: u32) -> ServerInfo {
    ServerInfo {
        ledger_index,
        load_factor,
        load_base: 256,
        base_fee: 10,
    }
}

pub(crate) fn validated(hash: TxHash, sequence: Sequence) -> TransactionResult {
    TransactionResult {
        hash,
        sequence,
        ledger_index: 101,
        validated: true,
        engine_result: EngineResult::TES_SUCCESS,
    }
}

/// Signer over `u64` payloads that records every signature it produces.
///
/// The blob it produces is the transaction hash itself, see [`decode_blob`].
#[derive(Debug, Default)]
pub(crate) struct CountingSigner {
    fail: bool,
    multisigned: Option<(u64, u64)>,
    calls: AtomicUsize,
    signed: Mutex<Vec<(u64, Sequence, Fee)>>,
}

impl CountingSigner {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Signer that prices `payload` as multi-signed by `signers` keys.
    pub(crate) fn multisigned(payload: u64, signers: u64) -> Self {
        Self {
            multisigned: Some((payload, signers)),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn signed(&self) -> Vec<(u64, Sequence, Fee)> {
        self.signed.lock().unwrap().clone()
    }
}

impl TxSigner for CountingSigner {
    type Payload = u64;

    fn sign(&self, payload: &u64, fee: Fee, sequence: Sequence) -> Result<SignedTx, SignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SignError::new("key unavailable"));
        }
        self.signed.lock().unwrap().push((*payload, sequence, fee));
        let hash = hash_for(*payload, sequence, fee);
        Ok(SignedTx {
            blob: Arc::new(hash.0.to_vec()),
            hash,
        })
    }

    fn fee(&self, payload: &u64, server: &ServerInfo) -> Fee {
        let fee = server.transaction_fee();
        match self.multisigned {
            Some((multisigned, signers)) if multisigned == *payload => fee * (1 + signers),
            _ => fee,
        }
    }

    fn sequence_plug(&self) -> u64 {
        PLUG_PAYLOAD
    }
}

/// One planned submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Submitted {
    pub(crate) key: TxKey,
    pub(crate) attempt: AttemptId,
    pub(crate) sequence: Sequence,
    pub(crate) hash: TxHash,
}

/// Drives a [`SubmissionEngine`] synchronously and collects its plans.
pub(crate) struct Harness {
    pub(crate) engine: SubmissionEngine<CountingSigner, u32>,
    pub(crate) signer: Arc<CountingSigner>,
    keys: KeyGen,
    submits: Vec<(TxKey, Sequence)>,
    history: Vec<WorkerPlan<u32>>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_signer(CountingSigner::default())
    }

    fn with_signer(signer: CountingSigner) -> Self {
        let signer = Arc::new(signer);
        let keys = KeyGen::default();
        Self {
            engine: SubmissionEngine::new(signer.clone(), TxManagerConfig::default(), keys.clone()),
            signer,
            keys,
            submits: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Connected, unloaded server at ledger 100, account at `sequence`.
    pub(crate) fn primed(sequence: Sequence) -> Self {
        let mut harness = Self::new();
        harness.prime(sequence);
        harness
    }

    pub(crate) fn primed_with_failing_signer(sequence: Sequence) -> Self {
        Self::primed_with_signer(sequence, CountingSigner::failing())
    }

    pub(crate) fn primed_with_signer(sequence: Sequence, signer: CountingSigner) -> Self {
        let mut harness = Self::with_signer(signer);
        harness.prime(sequence);
        harness
    }

    fn prime(&mut self, sequence: Sequence) {
        self.signal(Signal::Connected(true));
        self.signal(Signal::ServerInfo(server_info(100, 256)));
        self.signal(Signal::Account(AccountState { sequence }));
    }

    pub(crate) fn signal(&mut self, signal: Signal) {
        self.engine.apply_signal(signal);
        self.collect();
    }

    pub(crate) fn close_ledger(&mut self, ledger: LedgerIndex) {
        self.close_ledger_with(server_info(ledger, 256));
    }

    pub(crate) fn close_ledger_with(&mut self, info: ServerInfo) {
        self.signal(Signal::LedgerClosed(info));
    }

    pub(crate) fn add(&mut self, payload: u64) -> (TxKey, mpsc::UnboundedReceiver<TxEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let key = self.keys.next();
        self.engine.enqueue(NewTx {
            key,
            payload,
            events,
        });
        self.collect();
        (key, rx)
    }

    fn collect(&mut self) {
        for plan in self.engine.take_plans() {
            match plan {
                WorkerPlan::Submit { key, sequence, .. } => self.submits.push((key, sequence)),
                other => self.history.push(other),
            }
        }
    }

    /// Submits planned since the last call.
    pub(crate) fn submits(&mut self) -> Vec<(TxKey, Sequence)> {
        self.collect();
        std::mem::take(&mut self.submits)
    }

    /// History plans issued since the last call.
    pub(crate) fn history_plans(&mut self) -> Vec<WorkerPlan<u32>> {
        self.collect();
        std::mem::take(&mut self.history)
    }

    /// Latest submission of `key`. Discards the submits collected so far.
    pub(crate) fn last_submit(&mut self, key: TxKey) -> Submitted {
        self.submits();
        let record = self.engine.state.queue.get(key).expect("pending record");
        let submission = record.last_submission().expect("submitted record");
        Submitted {
            key,
            attempt: submission.attempt,
            sequence: submission.sequence,
            hash: submission.hash,
        }
    }

    pub(crate) fn sequence_of(&self, key: TxKey) -> Option<Sequence> {
        self.engine.state.queue.get(key).map(|record| record.sequence())
    }

    pub(crate) fn plug_at(&self, sequence: Sequence) -> Option<TxKey> {
        self.engine
            .state
            .queue
            .all()
            .find(|record| record.is_sequence_plug() && record.sequence() == sequence)
            .map(|record| record.key())
    }

    pub(crate) fn respond(&mut self, submitted: &Submitted, result: EngineResult) {
        let response = SubmitResponse {
            tx_hash: Some(submitted.hash),
            ..SubmitResponse::new(result)
        };
        self.engine
            .on_submit_outcome(submitted.key, submitted.attempt, Ok(response));
        self.collect();
    }

    pub(crate) fn respond_err(&mut self, submitted: &Submitted, err: RpcError) {
        self.engine
            .on_submit_outcome(submitted.key, submitted.attempt, Err(err));
        self.collect();
    }

    pub(crate) fn validate(&mut self, result: TransactionResult) {
        self.engine.notify_transaction_result(result);
        self.collect();
    }
}
