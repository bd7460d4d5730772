//! Chained Ledger
//!
//! Append-only, hash-chained entries with a Merkle root snapshot per entry.

pub mod chain;
pub mod checkpoint;
pub mod digest;
pub mod entry;
pub mod merkle;

pub use chain::{ChainedLedger, EntryPage};
pub use checkpoint::Checkpoint;
pub use digest::{Digest, DIGEST_LEN, EMPTY_ROOT, GENESIS_HASH};
pub use entry::LedgerEntry;
pub use merkle::{inclusion_proof, merkle_root, MerkleFrontier, MerkleProof};
