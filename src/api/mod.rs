use rocket::{
    http::Status,
    serde::json::{json, Json, Value},
    Catcher, Request, Route,
};

use crate::error::{Error, Result};
use crate::model::{api::wallet::WalletAddress, mongodb::Id};

pub mod admin;
pub mod auth;
pub mod elections;
pub mod public;
pub mod voter;
pub mod voters;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(admin::routes());
    routes.extend(elections::routes());
    routes.extend(voters::routes());
    routes.extend(voter::routes());
    routes.extend(public::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Give guard and routing failures the same JSON shape as route errors.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> Json<Value> {
    Json(json!({ "error": status.reason().unwrap_or("Unknown error") }))
}

/// Parse a document ID from a path segment.
fn parse_id(raw: &str, what: &str) -> Result<Id> {
    raw.parse()
        .map_err(|_| Error::bad_request(format!("Invalid {what} ID `{raw}`")))
}

/// Parse the `address` query parameter, which every lookup by wallet requires.
fn required_address(address: Option<&str>) -> Result<WalletAddress> {
    let address = address.ok_or_else(|| Error::bad_request("Wallet address is required"))?;
    Ok(address.parse()?)
}
