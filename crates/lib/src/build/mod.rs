//! Build executor.
//!
//! Builds are content-addressed: the output key is derived from the package
//! identity, the verified source hash, the lock hash, the input fingerprint and
//! the recipe. A key already present in the store is returned without invoking
//! the engine.
//!
//! # Submodules
//!
//! - [`engine`] - the external build engine and its isolated shell implementation
//! - [`execute`] - lock hash check, key derivation and realization

pub mod engine;
pub mod execute;
mod types;

pub use engine::{BuildEngine, EngineOutput, EngineRequest, ShellEngine};
pub use execute::{BuildError, BuildRequest, realize};
pub use types::*;
