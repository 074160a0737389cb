//! Welcome to the provenance core, the token-chaining and encryption
//! protocol behind a supply-chain custody tracker.
//!
//! A supply-chain run is modeled as an *action chain*: an ordered sequence
//! of stages (Wellhead → Processing → Shipping), each stage anchored to a
//! spendable on-chain token carrying that stage's encrypted metadata. Each
//! new token spends the previous stage's token, so the chain of custody is
//! cryptographically unbroken end to end. Custody of an in-progress chain
//! moves between parties through transfer records guarded by a
//! mutual-exclusion lock, so exactly one party can write to a chain at any
//! moment.
//!
//! The pieces, bottom up:
//!
//! - [`crypto`] seals stage payloads under keys derived from the intended
//!   reader's identity (the literal `"self"`, or a counterparty public
//!   key). Decryption failure is the access-control signal: a payload not
//!   meant for you simply will not open.
//! - [`token`] builds the locking script that commits a sealed payload, a
//!   designated counterparty, and the author's signature into a one-output
//!   token, and the two-phase unlock that spends it.
//! - [`chain`] advances chains stage by stage
//!   ([`chain::continuation`]), runs the custody transfer and locking
//!   state machine ([`chain::custody`]), and sequences whole write flows
//!   behind [`chain::ChainService`].
//! - [`wallet`] and [`store`] are the seams to the outside world: the
//!   transaction-building wallet, the overlay transaction index, and the
//!   custody record store. All injected, never ambient.
//!
//! Nothing here talks HTTP or renders anything; this crate is the part
//! with the protocol in it.

pub mod chain;
pub mod crypto;
pub mod error;
pub mod store;
pub mod token;
pub mod util;
pub mod wallet;
