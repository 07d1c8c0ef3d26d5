//! Verification orchestration: probe plan, per-key serialization, scoring
//! and result bookkeeping.

pub mod store;
pub mod types;
pub mod verifier;

#[cfg(test)]
pub mod tests;

pub use store::{FileStore, InMemoryStore, ResultFilter, StoreError, VerificationStore};
pub use types::*;
pub use verifier::VerificationOrchestrator;
