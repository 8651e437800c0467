use super::*;
use async_trait::async_trait;
use ledger_utils::test_utils::{async_test, init_tracing};
use std::time::Duration;

use crate::tx_manager::test_fixtures::{CountingSigner, decode_blob, server_info, validated};
use crate::{EngineResult, HistoryQuery, LedgerIndex, TxHash};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_WINDOW: Duration = Duration::from_millis(100);

type SubmitReply = oneshot::Sender<std::result::Result<SubmitResponse, RpcError>>;
type HistoryReply = oneshot::Sender<std::result::Result<HistoryPage<u32>, RpcError>>;

#[derive(Debug)]
enum ServerCall {
    Submit {
        blob: Arc<Vec<u8>>,
        reply: SubmitReply,
    },
    AccountTx {
        query: HistoryQuery<u32>,
        reply: HistoryReply,
    },
}

/// Server whose calls are answered by the test body.
#[derive(Debug)]
struct MockLedgerServer {
    calls: mpsc::Sender<ServerCall>,
}

impl MockLedgerServer {
    /// Route `call` to the test and wait for its answer.
    ///
    /// A call the test never answers stays in flight forever.
    async fn route<T>(&self, call: ServerCall, reply_rx: oneshot::Receiver<T>) -> T {
        if self.calls.send(call).await.is_err() {
            return futures::future::pending().await;
        }
        match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl LedgerServer for MockLedgerServer {
    type Marker = u32;

    async fn submit(&self, blob: Arc<Vec<u8>>) -> std::result::Result<SubmitResponse, RpcError> {
        let (reply, reply_rx) = oneshot::channel();
        self.route(ServerCall::Submit { blob, reply }, reply_rx)
            .await
    }

    async fn account_tx(
        &self,
        query: HistoryQuery<u32>,
    ) -> std::result::Result<HistoryPage<u32>, RpcError> {
        let (reply, reply_rx) = oneshot::channel();
        self.route(ServerCall::AccountTx { query, reply }, reply_rx)
            .await
    }
}

#[derive(Debug)]
struct SubmitCall {
    hash: TxHash,
    payload: u64,
    sequence: Sequence,
    reply: SubmitReply,
}

impl SubmitCall {
    fn respond(self, result: EngineResult) {
        let response = SubmitResponse {
            tx_hash: Some(self.hash),
            ..SubmitResponse::new(result)
        };
        let _ = self.reply.send(Ok(response));
    }

    fn fail(self, err: RpcError) {
        let _ = self.reply.send(Err(err));
    }
}

struct TestNetwork {
    calls: mpsc::Receiver<ServerCall>,
    submitter: TxSubmitter<u64>,
    status: StatusFeed,
    shutdown: CancellationToken,
    worker: WorkerHandle,
}

impl TestNetwork {
    fn start() -> Self {
        Self::start_with(TxManagerConfig::default())
    }

    fn start_with(config: TxManagerConfig) -> Self {
        init_tracing();
        let (calls_tx, calls) = mpsc::channel(64);
        let server = Arc::new(MockLedgerServer { calls: calls_tx });
        let (submitter, status, worker) =
            TransactionWorker::new(server, Arc::new(CountingSigner::default()), config);
        let shutdown = CancellationToken::new();
        let worker = worker.spawn(shutdown.clone());
        Self {
            calls,
            submitter,
            status,
            shutdown,
            worker,
        }
    }

    /// Connected, unloaded server at ledger 100, account at `sequence`.
    async fn prime(&self, sequence: Sequence) {
        self.status.connected(true).await.unwrap();
        self.status.server_info(server_info(100, 256)).await.unwrap();
        self.status
            .account(AccountState { sequence })
            .await
            .unwrap();
    }

    async fn close_ledger(&self, ledger: LedgerIndex) {
        self.status
            .ledger_closed(server_info(ledger, 256))
            .await
            .unwrap();
    }

    async fn next_call(&mut self) -> ServerCall {
        tokio::time::timeout(CALL_TIMEOUT, self.calls.recv())
            .await
            .expect("timed out waiting for a server call")
            .expect("server dropped")
    }

    async fn expect_submit(&mut self) -> SubmitCall {
        match self.next_call().await {
            ServerCall::Submit { blob, reply } => {
                let (hash, payload, sequence) = decode_blob(&blob);
                SubmitCall {
                    hash,
                    payload,
                    sequence,
                    reply,
                }
            }
            other => panic!("expected submit, got {other:?}"),
        }
    }

    async fn expect_account_tx(&mut self) -> (HistoryQuery<u32>, HistoryReply) {
        match self.next_call().await {
            ServerCall::AccountTx { query, reply } => (query, reply),
            other => panic!("expected account_tx, got {other:?}"),
        }
    }

    async fn assert_idle(&mut self) {
        let call = tokio::time::timeout(IDLE_WINDOW, self.calls.recv()).await;
        assert!(call.is_err(), "unexpected server call: {call:?}");
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.worker.join().await.unwrap();
    }
}

#[async_test]
async fn submit_then_validate_through_history() {
    let config = TxManagerConfig {
        stale_submission_ledgers: 100,
        ..TxManagerConfig::default()
    };
    let mut net = TestNetwork::start_with(config);
    net.prime(7).await;

    let mut handle = net.submitter.add_tx(42).await.unwrap();
    let submit = net.expect_submit().await;
    assert_eq!((submit.payload, submit.sequence), (42, 7));
    let hash = submit.hash;
    submit.respond(EngineResult::TES_SUCCESS);

    match handle.next_event().await {
        Some(TxEvent::SubmitSuccess(response)) => {
            assert_eq!(response.engine_result, EngineResult::TES_SUCCESS);
        }
        other => panic!("expected provisional success, got {other:?}"),
    }

    net.close_ledger(101).await;
    net.close_ledger(115).await;

    let (query, reply) = net.expect_account_tx().await;
    assert_eq!(query.ledger_index_min, 95);
    assert!(query.forward);
    assert_eq!(query.marker, None);
    reply
        .send(Ok(HistoryPage {
            transactions: Vec::new(),
            ledger_index_max: 115,
            marker: Some(1),
        }))
        .unwrap();

    let (query, reply) = net.expect_account_tx().await;
    assert_eq!(query.ledger_index_min, 95);
    assert_eq!(query.marker, Some(1));
    reply
        .send(Ok(HistoryPage {
            transactions: vec![validated(hash, 7)],
            ledger_index_max: 115,
            marker: None,
        }))
        .unwrap();

    match handle.wait_final().await.unwrap() {
        TxEvent::TransactionValidated(result) => {
            assert_eq!(result.hash, hash);
            assert_eq!(result.sequence, 7);
        }
        other => panic!("expected validation, got {other:?}"),
    }
    assert!(net.submitter.pending().await.unwrap().is_empty());
    net.stop().await;
}

#[async_test]
async fn no_network_resubmits_same_blob() {
    let mut net = TestNetwork::start();
    net.prime(3).await;

    let mut handle = net.submitter.add_tx(1).await.unwrap();
    let first = net.expect_submit().await;
    let hash = first.hash;
    first.fail(RpcError::NoNetwork);

    let second = net.expect_submit().await;
    assert_eq!(second.hash, hash);
    assert_eq!(second.sequence, 3);
    second.respond(EngineResult::TES_SUCCESS);

    assert!(matches!(
        handle.next_event().await,
        Some(TxEvent::SubmitSuccess(_))
    ));
    let pending = net.submitter.pending().await.unwrap();
    assert_eq!(pending.entries[0].submissions, 2);
    net.stop().await;
}

#[async_test]
async fn transport_error_is_terminal() {
    let mut net = TestNetwork::start();
    net.prime(3).await;

    let handle = net.submitter.add_tx(1).await.unwrap();
    net.expect_submit().await.fail(RpcError::Transport {
        message: "connection reset".into(),
    });

    match handle.wait_final().await.unwrap() {
        TxEvent::SubmitError(SubmitError::Rpc(RpcError::Transport { message })) => {
            assert_eq!(message, "connection reset");
        }
        other => panic!("expected submit error, got {other:?}"),
    }
    net.assert_idle().await;
    net.stop().await;
}

#[async_test]
async fn gated_submit_waits_for_connection() {
    let mut net = TestNetwork::start();
    net.status.connected(false).await.unwrap();
    net.status.server_info(server_info(100, 256)).await.unwrap();
    net.status
        .account(AccountState { sequence: 5 })
        .await
        .unwrap();

    let _handle = net.submitter.add_tx(9).await.unwrap();
    net.assert_idle().await;

    net.status.connected(true).await.unwrap();
    let submit = net.expect_submit().await;
    assert_eq!((submit.payload, submit.sequence), (9, 5));
    net.stop().await;
}

#[async_test]
async fn overloaded_server_holds_submissions() {
    let mut net = TestNetwork::start();
    net.status.connected(true).await.unwrap();
    net.status.server_info(server_info(100, 768)).await.unwrap();
    net.status
        .account(AccountState { sequence: 5 })
        .await
        .unwrap();

    let _handle = net.submitter.add_tx(9).await.unwrap();
    net.assert_idle().await;

    net.status.server_info(server_info(100, 767)).await.unwrap();
    let submit = net.expect_submit().await;
    assert_eq!(submit.sequence, 5);
    net.stop().await;
}

#[async_test]
async fn pending_snapshot_tracks_account_state() {
    let mut net = TestNetwork::start();
    let _a = net.submitter.add_tx(1).await.unwrap();
    let _b = net.submitter.add_tx(2).await.unwrap();

    let pending = net.submitter.pending().await.unwrap();
    assert!(pending.is_empty());
    assert_eq!(pending.awaiting_account, 2);

    net.prime(20).await;
    let first = net.expect_submit().await;
    let second = net.expect_submit().await;
    let mut sequences = vec![first.sequence, second.sequence];
    sequences.sort();
    assert_eq!(sequences, vec![20, 21]);

    let pending = net.submitter.pending().await.unwrap();
    assert_eq!(pending.awaiting_account, 0);
    let entries: Vec<_> = pending
        .entries
        .iter()
        .map(|entry| (entry.sequence, entry.is_sequence_plug, entry.submissions))
        .collect();
    assert_eq!(entries, vec![(20, false, 1), (21, false, 1)]);
    net.stop().await;
}

#[async_test]
async fn shutdown_releases_pending_handles() {
    let mut net = TestNetwork::start();
    net.prime(1).await;

    let handle = net.submitter.add_tx(5).await.unwrap();
    let _unanswered = net.expect_submit().await;

    let submitter = net.submitter.clone();
    net.stop().await;

    assert!(matches!(
        handle.wait_final().await,
        Err(Error::TxWorkerStopped)
    ));
    assert!(matches!(
        submitter.add_tx(6).await,
        Err(Error::TxWorkerStopped)
    ));
    assert!(matches!(
        submitter.pending().await,
        Err(Error::TxWorkerStopped)
    ));
}

#[async_test]
async fn dropped_status_feed_stops_worker() {
    let net = TestNetwork::start();
    let TestNetwork {
        status,
        worker,
        submitter,
        ..
    } = net;
    drop(status);

    tokio::time::timeout(CALL_TIMEOUT, worker.join())
        .await
        .expect("worker did not stop")
        .unwrap();
    assert!(matches!(
        submitter.add_tx(1).await,
        Err(Error::TxWorkerStopped)
    ));
}

#[async_test]
async fn zero_capacities_run_with_single_slot_queues() {
    let config: TxManagerConfig =
        serde_json::from_str(r#"{"queue_capacity": 0, "signal_capacity": 0}"#).unwrap();
    let mut net = TestNetwork::start_with(config);
    net.prime(2).await;

    let _handle = net.submitter.add_tx(11).await.unwrap();
    let submit = net.expect_submit().await;
    assert_eq!((submit.payload, submit.sequence), (11, 2));
    net.stop().await;
}

#[async_test]
async fn full_queue_rejects_new_transactions() {
    init_tracing();
    let (calls_tx, _calls) = mpsc::channel(1);
    let config = TxManagerConfig {
        queue_capacity: 1,
        ..TxManagerConfig::default()
    };
    let (submitter, _status, worker) = TransactionWorker::new(
        Arc::new(MockLedgerServer { calls: calls_tx }),
        Arc::new(CountingSigner::default()),
        config,
    );

    let _first = submitter.add_tx(1).await.unwrap();
    assert!(matches!(submitter.add_tx(2).await, Err(Error::QueueFull)));

    drop(worker);
    assert!(matches!(
        submitter.add_tx(3).await,
        Err(Error::TxWorkerStopped)
    ));
}
