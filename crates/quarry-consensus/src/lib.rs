//! # quarry-consensus: Memory-hard proof-of-work engine.
//!
//! [`ProofOfWork`] implements [`Engine`](quarry_core::traits::Engine) on top of
//! an epoch-keyed cache and dataset ([`dataset`], [`epoch_cache`]), the
//! hashimoto mixing function ([`hashmix`]) and a parallel nonce search
//! ([`sealer`]). Header and uncle rules live in [`verify`].

pub mod dataset;
pub mod engine;
pub mod epoch_cache;
pub mod hashmix;
pub mod sealer;
pub mod verify;

pub use engine::{PowConfig, PowMode, ProofOfWork};
pub use epoch_cache::{DatasetCache, EpochState};
