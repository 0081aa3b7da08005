use std::sync::Arc;

use chrono::Duration;
use data_encoding::BASE64;
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::{de::Error as _, Deserialize, Deserializer};

use crate::chain::{Chain, EthChain};
use crate::model::{
    api::wallet::WalletAddress,
    db::admin::ensure_admin_exists,
    mongodb::{ensure_indexes_exist, Coll},
};

/// Name of the production database.
pub const DATABASE: &str = "e-voting";

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    challenge_ttl: u32,
    admin_address: WalletAddress,
    default_gas_amount: String,
    #[serde(default = "default_election_duration_days")]
    election_duration_days: u32,
    // secrets
    jwt_secret: String,
    hmac_secret: String,
    #[serde(deserialize_with = "deserialize_key")]
    encryption_key: [u8; 32],
}

fn default_election_duration_days() -> u32 {
    7
}

/// Decode a base64 AES-256 key, rejecting anything that isn't exactly 32 bytes.
fn deserialize_key<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| D::Error::custom(format!("encryption_key is not valid base64: {e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| D::Error::invalid_length(b.len(), &"a 32-byte key"))
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Valid lifetime of a sign-in challenge in seconds.
    pub fn challenge_ttl(&self) -> Duration {
        Duration::seconds(self.challenge_ttl.into())
    }

    /// Wallet of the bootstrap admin, inserted if no admin exists.
    pub fn admin_address(&self) -> WalletAddress {
        self.admin_address
    }

    /// Amount of ETH sent to a newly approved voter to cover gas.
    pub fn default_gas_amount(&self) -> &str {
        &self.default_gas_amount
    }

    /// How long a newly created election stays open.
    pub fn election_duration(&self) -> Duration {
        Duration::days(self.election_duration_days.into())
    }

    /// Secret key used to encrypt JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key used to hash wallet addresses.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }

    /// Key used to encrypt wallet addresses at rest.
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
///
/// Must be attached after [`ConfigFairing`].
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let admin_address = match rocket.state::<Config>() {
            Some(config) => config.admin_address(),
            None => {
                error!("Database fairing attached before the config fairing");
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");

        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(DATABASE);

        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to create database indexes: {e}");
            return Err(rocket);
        }

        if let Err(e) = ensure_admin_exists(&Coll::from_db(&db), admin_address).await {
            error!("Failed to create bootstrap admin: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Configuration for the blockchain connection.
#[derive(Deserialize)]
pub struct ChainConfig {
    // non-secrets
    /// JSON-RPC endpoints, tried in order for reads.
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
    /// Address of the factory that deploys per-election voting contracts.
    pub factory_address: WalletAddress,
    /// Seconds to wait for a transaction to be mined.
    pub confirmation_timeout: u64,
    // secrets
    /// Hex private key of the wallet that signs admin transactions.
    pub operator_key: String,
}

/// A fairing that loads the chain config and places a [`Chain`] client
/// into managed state.
pub struct ChainFairing;

#[rocket::async_trait]
impl Fairing for ChainFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ethereum RPC",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<ChainConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load chain config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let client = match EthChain::new(&config) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to set up chain client: {e}");
                return Err(rocket);
            }
        };
        info!(
            "Loaded chain config: chain {} via {} RPC endpoint(s), operator {}",
            config.chain_id,
            config.rpc_urls.len(),
            client.operator()
        );

        rocket = rocket.manage(Chain::new(Arc::new(client)));
        Ok(rocket)
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self {
                auth_ttl: 3600,
                challenge_ttl: 300,
                admin_address: WalletAddress::example2(),
                default_gas_amount: "0.001".to_string(),
                election_duration_days: 7,
                jwt_secret: "jwt-test-secret".to_string(),
                hmac_secret: "hmac-test-secret".to_string(),
                encryption_key: [7; 32],
            }
        }
    }
}
