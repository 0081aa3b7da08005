use mongodb::bson::doc;
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route};

use crate::{
    error::{Error, Result},
    model::{
        api::{admin::AdminAddress, auth::AuthToken, parse_body, wallet::WalletAddress, JsonBody},
        db::admin::{self, Admin, NewAdmin},
        mongodb::{is_duplicate_key_error, Coll},
    },
};

pub fn routes() -> Vec<Route> {
    routes![get_admins, create_admin, delete_admin]
}

#[get("/admins")]
async fn get_admins(
    _token: AuthToken<Admin>,
    admins: Coll<Admin>,
) -> Result<Json<Vec<WalletAddress>>> {
    let admin_list: Vec<Admin> = admins.find(None, None).await?.try_collect().await?;
    let addresses = admin_list
        .into_iter()
        .map(|admin| admin.admin.address)
        .collect();
    Ok(Json(addresses))
}

#[post("/admins", data = "<new_admin>", format = "json")]
async fn create_admin(
    token: AuthToken<Admin>,
    new_admin: JsonBody<'_, AdminAddress>,
    admins: Coll<NewAdmin>,
) -> Result<()> {
    let address = parse_body(new_admin)?.address;

    // The unique index on `address` settles races between concurrent requests.
    match admins.insert_one(NewAdmin::new(address), None).await {
        Ok(_) => {
            info!("Admin {} added admin {address}", token.id);
            Ok(())
        }
        Err(e) if is_duplicate_key_error(&e) => Err(Error::bad_request(format!(
            "Wallet {address} is already an admin"
        ))),
        Err(e) => Err(e.into()),
    }
}

#[delete("/admins", data = "<admin>", format = "json")]
async fn delete_admin(
    token: AuthToken<Admin>,
    admin: JsonBody<'_, AdminAddress>,
    admins: Coll<Admin>,
) -> Result<()> {
    let address = parse_body(admin)?.address;

    // Prevent deleting the last admin.
    let count = admins.count_documents(None, None).await?;
    if count == 1 {
        return Err(Error::Status(
            Status::UnprocessableEntity,
            "Cannot delete last admin!".to_string(),
        ));
    }

    let result = admins.delete_one(admin::with_address(address), None).await?;
    if result.deleted_count == 0 {
        Err(Error::not_found(format!("Admin {address}")))
    } else {
        info!("Admin {} removed admin {address}", token.id);
        Ok(())
    }
}
