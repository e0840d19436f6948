//! Authorization module
//!
//! Stateless bearer capabilities gating aggregate reads. No sessions,
//! no key registry: a consumer identity is the hex encoding of its
//! ed25519 verifying key, so a token is checked against the subject's
//! own key at call time.

pub mod capability;

pub use capability::{capability_message, AuthorizationToken};
