//! Inbound ActivityPub pipeline: authenticate, record, then apply.

pub mod activity;
pub mod actors;
pub mod ledger;
pub mod processor;
pub mod signature;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use actors::{ActorDirectory, ActorFetcher, FetchError, HttpActorFetcher, KeyResolver, ResolveError};
pub use ledger::DeliveryLedger;
pub use processor::{InboxProcessor, Outcome, ProcessError};
pub use signature::{SignatureVerifier, VerificationError};
pub use sweep::{SweepHandle, SweepReport, Sweeper};
