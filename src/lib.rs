// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! timevault-kernel: signed, content-addressed intent anchors.
//!
//! Pure model layer. Nothing in this crate touches the filesystem or the
//! network; persistence, scheduling and transport live in `timevault-node`.

pub mod config;
pub mod error;
pub mod intent;
pub mod canonical;
pub mod identity;
pub mod anchor;
pub mod stub;
pub mod decay;

pub use anchor::{build_anchor, AnchorKind, AnchorRecord, AnchorStatus, Resonance};
pub use decay::DecayPolicy;
pub use error::{KernelError, KernelResult};
pub use identity::NodeIdentity;
pub use intent::{Intent, IntentRequest, IntentType};
pub use stub::{build_stub, reconstruct_from_stub, Stub, StubHint};

#[cfg(test)]
pub mod tests;
