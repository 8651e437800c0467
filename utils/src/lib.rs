#![cfg_attr(docsrs, feature(doc_cfg))]
//! Async helpers shared by the ledger client crates.

pub mod executor;
#[cfg(feature = "test-utils")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod test_utils;
