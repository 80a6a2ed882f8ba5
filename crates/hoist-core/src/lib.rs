//! # hoist-core
//!
//! Shared building blocks for the hoist upload client and server:
//!
//! - length-prefixed framing and the typed field codec ([`wire`])
//! - the request/response message set ([`protocol`])
//! - the per-session frame cipher ([`crypto`])
//! - the server's long-lived RSA identity ([`keys`])
//! - the client-side trust-on-first-use pin store ([`trust`])
//!
//! The crate is transport-agnostic: everything in [`wire`] works over any
//! `AsyncRead`/`AsyncWrite` pair.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod trust;
pub mod wire;

pub use error::{CryptoError, KeyError, TrustError, WireError};
