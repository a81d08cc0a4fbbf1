//! # quarry-node-lib: Miner orchestration for Quarry.
//!
//! Wires the proof-of-work engine to a shared in-memory chain, a transaction
//! pool, a contract executor and a broadcaster.
//!
//! - [`miner`]: candidate building, sealing and commit loop
//! - [`apply`]: tentative transaction application
//! - [`chain`]: lock-guarded chain handle implementing the reader traits
//! - [`broadcast`]: tokio broadcast fan-out of chain events
//! - [`executor`]: executor placeholder and state-change parsing
//! - [`config`]: layered miner configuration

pub mod apply;
pub mod broadcast;
pub mod chain;
pub mod config;
pub mod executor;
pub mod miner;

pub use broadcast::{ChainEvent, ChannelBroadcaster};
pub use chain::SharedChain;
pub use config::MinerConfig;
pub use miner::{Candidate, CycleOutcome, Miner, MinerError, MinerSettings};
