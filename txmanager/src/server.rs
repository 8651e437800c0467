use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Fee, HistoryPage, HistoryQuery, RpcError, Sequence, ServerInfo, SignError, SignedTx,
    SubmitResponse,
};

/// Backend trait for talking to the ledger server on behalf of one account.
///
/// Implementations own the connection and the wire encoding. Every call is
/// independent; the worker may have several submits and one history query in
/// flight at the same time and reconciles their answers in arrival order.
#[async_trait]
pub trait LedgerServer: Send + Sync {
    /// Resume marker of the paginated history query.
    type Marker: Clone + fmt::Debug + Send + Sync + 'static;

    /// Submit a signed transaction blob.
    async fn submit(&self, blob: Arc<Vec<u8>>) -> Result<SubmitResponse, RpcError>;

    /// Fetch one page of the account's transaction history.
    async fn account_tx(
        &self,
        query: HistoryQuery<Self::Marker>,
    ) -> Result<HistoryPage<Self::Marker>, RpcError>;
}

/// Signing collaborator holding the account keys and transaction content.
pub trait TxSigner: Send + Sync {
    /// Unsigned transaction content as handed to [`TxSubmitter::add_tx`](crate::TxSubmitter::add_tx).
    type Payload: Send + Sync + 'static;

    /// Sign `payload` with the given fee and sequence.
    fn sign(
        &self,
        payload: &Self::Payload,
        fee: Fee,
        sequence: Sequence,
    ) -> Result<SignedTx, SignError>;

    /// Fee to offer for `payload` at the server's current load.
    ///
    /// Defaults to [`ServerInfo::transaction_fee`]. Payloads that cost more than
    /// a plain single-signed transaction, such as multi-signed ones, override it.
    fn fee(&self, payload: &Self::Payload, server: &ServerInfo) -> Fee {
        let _ = payload;
        server.transaction_fee()
    }

    /// A minimal no-op transaction used to consume an orphaned sequence.
    fn sequence_plug(&self) -> Self::Payload;
}
