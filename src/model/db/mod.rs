//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs and datetimes are serialised in MongoDB's own format.
//! - Wallet addresses are stored as lowercase hex strings.

pub mod admin;
pub mod election;
pub mod vote;
pub mod voter;
