//! kiln-lib: reproducible package builds and dev environments from a manifest.
//!
//! A manifest names a package, where its source comes from and the hash it
//! must have, the tools and libraries it needs, and a dependency lock hash.
//! This crate provides the four components that turn it into outputs:
//! - [`source`]: fetch and verify sources into the content-addressed store
//! - [`inputs`]: resolve named inputs into an environment descriptor
//! - [`build`]: run the build engine and publish outputs under a deterministic key
//! - [`shell`]: compose an interactive devShell
//!
//! [`eval::Evaluator`] drives them for one manifest.

pub mod build;
pub mod consts;
pub mod eval;
pub mod inputs;
pub mod lock;
pub mod manifest;
pub mod platform;
pub mod shell;
pub mod source;
pub mod store;
pub mod util;
