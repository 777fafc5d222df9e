//! Shared test utilities for the InferaDB ledger index.
//!
//! - [`TestDir`] - Managed temporary directory holding index files
//! - [`strategies`] - Proptest generators for keys, record positions and operation logs

#![deny(unsafe_code)]

mod test_dir;
pub use test_dir::TestDir;

pub mod strategies;
