pub mod config;
pub mod error;
pub mod ledger;
pub mod store;
pub mod verify;

pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
pub use ledger::{ChainedLedger, Checkpoint, Digest, LedgerEntry, MerkleProof};
pub use store::LedgerStore;
pub use verify::{ReasonCode, VerificationResult, VerificationService};
