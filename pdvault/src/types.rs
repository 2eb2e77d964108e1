//! Shared identifier types.
//!
//! Semantic aliases so signatures say what they mean. Accounts are keyed by
//! UUID; reset requests are keyed by username (the natural key the reset
//! flow works in) and never by account id.

use uuid::Uuid;

/// Unique identifier for an account.
pub type AccountId = Uuid;
