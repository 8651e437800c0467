//! Transaction manager: sequencing, submission, and validation tracking for one account.
//!
//! # Overview
//! - `TxSubmitter` is a front-end that enqueues transactions and returns a
//!   [`TxHandle`] per transaction.
//! - `StatusFeed` is the inlet for connection, server, ledger-close and account
//!   state updates.
//! - `TransactionWorker` is a background event loop that owns every pending
//!   transaction, submits them through a [`LedgerServer`] and reconciles the
//!   responses.
//!
//! The worker never shares its state. Enqueue requests, status signals, submit
//! responses and history pages are all applied one at a time inside
//! [`TransactionWorker::process`], in the order they arrive.
//!
//! # Notes
//! - Sequences are allocated as `max(server sequence, local high water)`.
//! - A submit response is applied only if it belongs to the latest submit
//!   attempt of a still pending transaction.
//! - Validation is only learned from the account history, polled every few
//!   ledgers while transactions are pending.
//! - Submitting is gated on connectivity, known server and account state, and
//!   the server load factor.
//!
//! # Example
//! ```no_run
//! # use std::sync::Arc;
//! # use ledger_txmanager::{
//! #     AccountState, Fee, HistoryPage, HistoryQuery, LedgerServer, Result, RpcError, Sequence,
//! #     ServerInfo, SignError, SignedTx, SubmitResponse, TransactionWorker, TxHash,
//! #     TxManagerConfig, TxSigner,
//! # };
//! # use tokio_util::sync::CancellationToken;
//! # struct DummyServer;
//! # #[async_trait::async_trait]
//! # impl LedgerServer for DummyServer {
//! #     type Marker = String;
//! #     async fn submit(&self, _blob: Arc<Vec<u8>>) -> Result<SubmitResponse, RpcError> {
//! #         unimplemented!()
//! #     }
//! #     async fn account_tx(
//! #         &self,
//! #         _query: HistoryQuery<String>,
//! #     ) -> Result<HistoryPage<String>, RpcError> {
//! #         unimplemented!()
//! #     }
//! # }
//! # struct DummySigner;
//! # impl TxSigner for DummySigner {
//! #     type Payload = Vec<u8>;
//! #     fn sign(&self, _p: &Vec<u8>, _f: Fee, _s: Sequence) -> Result<SignedTx, SignError> {
//! #         Ok(SignedTx { blob: Arc::new(vec![]), hash: TxHash([0; 32]) })
//! #     }
//! #     fn sequence_plug(&self) -> Vec<u8> { vec![] }
//! # }
//! # async fn docs() -> Result<()> {
//! let (submitter, status, worker) = TransactionWorker::new(
//!     Arc::new(DummyServer),
//!     Arc::new(DummySigner),
//!     TxManagerConfig::default(),
//! );
//! let worker = worker.spawn(CancellationToken::new());
//!
//! status.connected(true).await?;
//! status
//!     .server_info(ServerInfo { ledger_index: 1, load_factor: 256, load_base: 256, base_fee: 10 })
//!     .await?;
//! status.account(AccountState { sequence: 1 }).await?;
//!
//! let handle = submitter.add_tx(b"payment".to_vec()).await?;
//! let outcome = handle.wait_final().await?;
//! # let _ = outcome;
//! # let _ = worker;
//! # Ok(())
//! # }
//! ```
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use ledger_utils::executor::{spawn, spawn_cancellable};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod dispatcher;
mod engine;
mod event_bus;
mod gate;
mod history;
mod ledger_close;
mod pending_queue;
mod record;
mod sequence;
#[cfg(test)]
mod test_fixtures;

use crate::{
    AccountState, AttemptId, Error, HistoryPage, LedgerServer, Result, RpcError, Sequence,
    ServerInfo, SubmitError, SubmitResponse, TransactionResult, TxKey, TxManagerConfig, TxSigner,
};
use engine::{KeyGen, NewTx, SubmissionEngine, WorkerPlan};

/// Outcome notification delivered on a transaction's [`TxHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    /// The server provisionally accepted the transaction. Not final.
    SubmitSuccess(SubmitResponse),
    /// The submit call failed terminally before an engine result was produced.
    SubmitError(SubmitError),
    /// The transaction failed terminally with the given engine result.
    SubmitFailure(SubmitResponse),
    /// The transaction was found in a validated ledger.
    TransactionValidated(TransactionResult),
}

impl TxEvent {
    /// Whether no further event follows this one.
    pub fn is_final(&self) -> bool {
        !matches!(self, TxEvent::SubmitSuccess(_))
    }

    pub(crate) fn summary(&self) -> String {
        match self {
            TxEvent::SubmitSuccess(response) => {
                format!("SubmitSuccess {}", response.engine_result)
            }
            TxEvent::SubmitError(err) => format!("SubmitError {err}"),
            TxEvent::SubmitFailure(response) => {
                format!("SubmitFailure {}", response.engine_result)
            }
            TxEvent::TransactionValidated(result) => format!(
                "TransactionValidated hash={} ledger={}",
                result.hash, result.ledger_index
            ),
        }
    }
}

/// Status update from the transport collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Connectivity to the ledger server changed.
    Connected(bool),
    /// Fresh server state without a new ledger.
    ServerInfo(ServerInfo),
    /// A ledger closed; carries the server state as of that ledger.
    LedgerClosed(ServerInfo),
    /// Fresh state of the managed account.
    Account(AccountState),
}

impl Signal {
    pub(crate) fn summary(&self) -> String {
        match self {
            Signal::Connected(connected) => format!("Connected({connected})"),
            Signal::ServerInfo(info) => format!(
                "ServerInfo ledger={} load={}",
                info.ledger_index, info.load_factor
            ),
            Signal::LedgerClosed(info) => format!(
                "LedgerClosed ledger={} load={}",
                info.ledger_index, info.load_factor
            ),
            Signal::Account(account) => format!("Account seq={}", account.sequence),
        }
    }
}

/// One pending transaction as seen by [`TxSubmitter::pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Local identity of the transaction.
    pub key: TxKey,
    /// Sequence the transaction currently occupies.
    pub sequence: Sequence,
    /// Whether this is a filler transaction created to consume an orphaned sequence.
    pub is_sequence_plug: bool,
    /// Number of submit attempts so far.
    pub submissions: usize,
}

/// Read-only view of the worker's pending transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    /// Sequenced transactions, ascending by sequence.
    pub entries: Vec<PendingEntry>,
    /// Transactions held until the account state is known.
    pub awaiting_account: usize,
}

impl PendingSnapshot {
    /// Number of sequenced pending transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no transaction is sequenced.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle for tracking one transaction until it is final.
#[derive(Debug)]
pub struct TxHandle {
    key: TxKey,
    events: mpsc::UnboundedReceiver<TxEvent>,
}

impl TxHandle {
    /// Local identity of the transaction.
    pub fn key(&self) -> TxKey {
        self.key
    }

    /// Next event of the transaction, or `None` once no more can arrive.
    pub async fn next_event(&mut self) -> Option<TxEvent> {
        self.events.recv().await
    }

    /// Wait for the terminal event, skipping provisional successes.
    ///
    /// Returns [`Error::TxWorkerStopped`] if the worker dropped the transaction
    /// without a terminal event.
    pub async fn wait_final(mut self) -> Result<TxEvent> {
        while let Some(event) = self.next_event().await {
            if event.is_final() {
                return Ok(event);
            }
        }
        Err(Error::TxWorkerStopped)
    }
}

enum Command<P> {
    AddTx(NewTx<P>),
    Pending(oneshot::Sender<PendingSnapshot>),
}

/// Front-end handle for enqueuing transactions into the worker.
pub struct TxSubmitter<P> {
    commands: mpsc::Sender<Command<P>>,
    keys: KeyGen,
}

impl<P> Clone for TxSubmitter<P> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            keys: self.keys.clone(),
        }
    }
}

impl<P> TxSubmitter<P> {
    /// Enqueue a transaction and return a handle for tracking its outcome.
    pub async fn add_tx(&self, payload: P) -> Result<TxHandle> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let key = self.keys.next();
        let command = Command::AddTx(NewTx {
            key,
            payload,
            events: events_tx,
        });
        match self.commands.try_send(command) {
            Ok(()) => Ok(TxHandle {
                key,
                events: events_rx,
            }),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::TxWorkerStopped),
        }
    }

    /// Snapshot of the pending transactions.
    pub async fn pending(&self) -> Result<PendingSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Pending(reply_tx))
            .await
            .map_err(|_| Error::TxWorkerStopped)?;
        reply_rx.await.map_err(|_| Error::TxWorkerStopped)
    }
}

/// Inlet for status updates of the transport, server and account.
#[derive(Debug, Clone)]
pub struct StatusFeed {
    signals: mpsc::Sender<Signal>,
}

impl StatusFeed {
    /// Deliver a status signal, waiting for queue space.
    pub async fn send(&self, signal: Signal) -> Result<()> {
        self.signals
            .send(signal)
            .await
            .map_err(|_| Error::TxWorkerStopped)
    }

    /// Report a connectivity change.
    pub async fn connected(&self, connected: bool) -> Result<()> {
        self.send(Signal::Connected(connected)).await
    }

    /// Report fresh server state.
    pub async fn server_info(&self, info: ServerInfo) -> Result<()> {
        self.send(Signal::ServerInfo(info)).await
    }

    /// Report a closed ledger.
    pub async fn ledger_closed(&self, info: ServerInfo) -> Result<()> {
        self.send(Signal::LedgerClosed(info)).await
    }

    /// Report fresh account state.
    pub async fn account(&self, account: AccountState) -> Result<()> {
        self.send(Signal::Account(account)).await
    }
}

struct SubmissionResult {
    key: TxKey,
    attempt: AttemptId,
    result: std::result::Result<SubmitResponse, RpcError>,
}

struct HistoryResult<M> {
    generation: u64,
    page: std::result::Result<HistoryPage<M>, RpcError>,
}

type SubmissionFuture = BoxFuture<'static, Option<SubmissionResult>>;
type HistoryFuture<M> = BoxFuture<'static, Option<HistoryResult<M>>>;

/// Return type for [`TransactionWorker::new`].
pub type WorkerParts<L, S> = (
    TxSubmitter<<S as TxSigner>::Payload>,
    StatusFeed,
    TransactionWorker<L, S>,
);

/// Background worker that owns the account's pending transactions.
pub struct TransactionWorker<L: LedgerServer, S: TxSigner> {
    engine: SubmissionEngine<S, L::Marker>,
    server: Arc<L>,
    commands_rx: mpsc::Receiver<Command<S::Payload>>,
    signals_rx: mpsc::Receiver<Signal>,
    submissions: FuturesUnordered<SubmissionFuture>,
    history: Option<HistoryFuture<L::Marker>>,
    history_cancel: Option<(u64, CancellationToken)>,
}

impl<L, S> TransactionWorker<L, S>
where
    L: LedgerServer + 'static,
    S: TxSigner + 'static,
{
    /// Create the front-end handles and the worker.
    pub fn new(server: Arc<L>, signer: Arc<S>, config: TxManagerConfig) -> WorkerParts<L, S> {
        let (commands_tx, commands_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (signals_tx, signals_rx) = mpsc::channel(config.signal_capacity.max(1));
        let keys = KeyGen::default();
        let submitter = TxSubmitter {
            commands: commands_tx,
            keys: keys.clone(),
        };
        let status = StatusFeed {
            signals: signals_tx,
        };
        let worker = TransactionWorker {
            engine: SubmissionEngine::new(signer, config, keys),
            server,
            commands_rx,
            signals_rx,
            submissions: FuturesUnordered::new(),
            history: None,
            history_cancel: None,
        };
        (submitter, status, worker)
    }

    /// Run the worker loop until shutdown or until the status feed is dropped.
    ///
    /// # Notes
    /// - The worker is single-owner; it should be run in a dedicated task.
    /// - Pending transactions are dropped on exit; their handles resolve with
    ///   [`Error::TxWorkerStopped`].
    pub async fn process(&mut self, shutdown: CancellationToken) -> Result<()> {
        let tasks = shutdown.child_token();
        let mut commands_open = true;

        loop {
            let plans = self.engine.take_plans();
            self.execute_plans(plans, &tasks);

            select! {
                _ = shutdown.cancelled() => break,
                command = self.commands_rx.recv(), if commands_open => match command {
                    Some(Command::AddTx(tx)) => self.engine.enqueue(tx),
                    Some(Command::Pending(reply)) => {
                        let _ = reply.send(self.engine.pending_snapshot());
                    }
                    None => {
                        debug!("all submitters dropped");
                        commands_open = false;
                    }
                },
                signal = self.signals_rx.recv() => match signal {
                    Some(signal) => self.engine.apply_signal(signal),
                    None => {
                        info!("status feed dropped");
                        break;
                    }
                },
                result = self.submissions.next(), if !self.submissions.is_empty() => {
                    if let Some(Some(result)) = result {
                        self.engine.on_submit_outcome(result.key, result.attempt, result.result);
                    }
                }
                result = poll_opt(&mut self.history), if self.history.is_some() => {
                    self.history = None;
                    if let Some(Some(result)) = result {
                        self.engine.on_history_page(result.generation, result.page);
                    }
                }
            }
        }
        info!(
            pending = self.engine.pending_snapshot().len(),
            "stopping transaction worker"
        );
        tasks.cancel();
        Ok(())
    }

    /// Run [`process`](Self::process) on a new task.
    pub fn spawn(mut self, shutdown: CancellationToken) -> WorkerHandle {
        let (done_tx, done_rx) = oneshot::channel();
        spawn(async move {
            let result = self.process(shutdown).await;
            drop(self);
            let _ = done_tx.send(result);
        });
        WorkerHandle { done_rx }
    }

    fn execute_plans(&mut self, plans: Vec<WorkerPlan<L::Marker>>, token: &CancellationToken) {
        for plan in plans {
            debug!(plan = %plan.summary(), "worker plan");
            match plan {
                WorkerPlan::Submit {
                    key, attempt, blob, ..
                } => {
                    let server = self.server.clone();
                    spawn_task(&mut self.submissions, token.clone(), async move |tx| {
                        let result = server.submit(blob).await;
                        let _ = tx.send(SubmissionResult {
                            key,
                            attempt,
                            result,
                        });
                    });
                }
                WorkerPlan::FetchHistory { generation, query } => {
                    let server = self.server.clone();
                    let history_token = self.history_token(generation, token);
                    let (tx, rx) = oneshot::channel();
                    spawn_cancellable(history_token, async move {
                        let page = server.account_tx(query).await;
                        let _ = tx.send(HistoryResult { generation, page });
                    });
                    self.history = Some(async move { rx.await.ok() }.boxed());
                }
                WorkerPlan::AbortHistory { generation } => {
                    if let Some((current, history_token)) = &self.history_cancel
                        && *current == generation
                    {
                        history_token.cancel();
                        self.history_cancel = None;
                        self.history = None;
                    }
                }
            }
        }
    }

    /// Cancellation token shared by every page request of poll `generation`.
    fn history_token(&mut self, generation: u64, parent: &CancellationToken) -> CancellationToken {
        match &self.history_cancel {
            Some((current, token)) if *current == generation => token.clone(),
            _ => {
                let token = parent.child_token();
                self.history_cancel = Some((generation, token.clone()));
                token
            }
        }
    }
}

/// Completion handle of a spawned [`TransactionWorker`].
#[derive(Debug)]
pub struct WorkerHandle {
    done_rx: oneshot::Receiver<Result<()>>,
}

impl WorkerHandle {
    /// Wait for the worker to stop.
    pub async fn join(self) -> Result<()> {
        self.done_rx.await.map_err(|_| Error::TxWorkerStopped)?
    }
}

fn spawn_task<T, F, Fut>(
    unordered: &mut FuturesUnordered<BoxFuture<'static, Option<T>>>,
    token: CancellationToken,
    fut_fn: F,
) where
    T: Send + 'static,
    F: FnOnce(oneshot::Sender<T>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    spawn_cancellable(token, fut_fn(tx));
    unordered.push(async move { rx.await.ok() }.boxed());
}

async fn poll_opt<F: std::future::Future + Unpin>(fut: &mut Option<F>) -> Option<F::Output> {
    match fut.as_mut() {
        Some(fut) => Some(fut.await),
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
