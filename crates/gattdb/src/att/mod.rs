//! Attribute Protocol (ATT) definitions used by the attribute database
//!
//! Error codes, permission and flag bitfields, the per-link security state
//! supplied by the security manager, and the access control evaluator that
//! gates every remote read and write.

pub mod access;
pub mod constants;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

pub use self::access::{evaluate, AccessOp};
pub use self::constants::*;
pub use self::error::AttErrorCode;
pub use self::types::{AttFlags, AttPermissions, AuthenticationLevel, LinkSecurity};
