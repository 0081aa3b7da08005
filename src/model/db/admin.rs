use std::ops::{Deref, DerefMut};

use mongodb::{bson::doc, error::Error as DbError};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::wallet::WalletAddress,
    mongodb::{Coll, Id},
};

/// Core admin user data.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    /// The wallet this admin signs in with.
    pub address: WalletAddress,
}

impl AdminCore {
    pub fn new(address: WalletAddress) -> Self {
        Self { address }
    }
}

/// An admin without an ID.
pub type NewAdmin = AdminCore;

/// An admin user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

impl DerefMut for Admin {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.admin
    }
}

/// Insert the bootstrap admin if there are no admins at all.
pub async fn ensure_admin_exists(
    admins: &Coll<NewAdmin>,
    address: WalletAddress,
) -> Result<(), DbError> {
    let count = admins.count_documents(None, None).await?;
    if count == 0 {
        info!("No admins found, creating bootstrap admin {address}");
        admins.insert_one(NewAdmin::new(address), None).await?;
    } else {
        debug!("{count} admin(s) already present");
    }
    Ok(())
}

/// Filter matching the admin with the given address.
pub fn with_address(address: WalletAddress) -> mongodb::bson::Document {
    doc! { "address": address.to_string() }
}
