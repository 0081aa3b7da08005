//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - Field names are camelCase.
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.

use rocket::serde::json::{self, Json};

use crate::error::Error;

pub mod admin;
pub mod auth;
pub mod election;
pub mod id;
pub mod pagination;
pub mod voter;
pub mod wallet;

/// A JSON request body whose parse errors are reported by the route itself
/// rather than by Rocket's default catcher.
pub type JsonBody<'r, T> = Result<Json<T>, json::Error<'r>>;

/// Unwrap a [`JsonBody`], turning a malformed or incomplete body into a 400.
pub fn parse_body<T>(body: JsonBody<'_, T>) -> Result<T, Error> {
    body.map(Json::into_inner)
        .map_err(|e| Error::bad_request(format!("Invalid request body: {e}")))
}

/// Reject empty or whitespace-only required fields.
pub fn require_non_empty(fields: &[(&str, &str)]) -> Result<(), Error> {
    let missing = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::bad_request(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_named() {
        assert!(require_non_empty(&[("title", "x"), ("description", "y")]).is_ok());
        let err = require_non_empty(&[("title", " "), ("description", "y"), ("name", "")])
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields: title, name");
    }
}
