use serde::{Deserialize, Serialize};

use crate::model::api::wallet::WalletAddress;

/// Body of the admin add/remove requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAddress {
    pub address: WalletAddress,
}
