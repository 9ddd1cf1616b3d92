//! Public facade crate for `marginalia`.
//!
//! This crate intentionally contains no matching logic or IO.
//! It re-exports the backend-agnostic types/traits from `marginalia-core`.

pub use marginalia_core::*;
