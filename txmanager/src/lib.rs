#![cfg_attr(docsrs, feature(doc_cfg))]
//! Transaction submission engine for a single ledger account.
//!
//! The engine assigns sequence numbers to signed transactions, submits them to a
//! ledger server and reconciles submit responses against ledger closes and the
//! account's validated transaction history. See [`tx_manager`] for the worker
//! and its front-end handles.

mod config;
mod error;
mod server;
pub mod tx_manager;
mod types;

pub use crate::config::TxManagerConfig;
pub use crate::error::{Error, Result, RpcError, SignError, SubmitError};
pub use crate::server::{LedgerServer, TxSigner};
pub use crate::tx_manager::{
    PendingEntry, PendingSnapshot, Signal, StatusFeed, TransactionWorker, TxEvent, TxHandle,
    TxSubmitter, WorkerHandle, WorkerParts,
};
pub use crate::types::{
    AccountState, AttemptId, EngineResult, Fee, HistoryPage, HistoryQuery, LedgerIndex,
    ResultClass, Sequence, ServerInfo, SignedTx, SubmitResponse, TransactionResult, TxHash, TxKey,
};
