#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ChainFairing, ConfigFairing, DatabaseFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

/// Assemble the server. Configuration, the database connection and the chain
/// client are all set up at ignite time by fairings.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/api", api::routes())
        .register("/", api::catchers())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(ChainFairing)
}

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::{
    chain::mock::MockChain,
    model::{
        db::{
            election::{Candidate, Election, NewElection},
            voter::NewVoter,
        },
        mongodb::{Coll, Id},
    },
};

/// Connect to the database named by `db_uri` in the test configuration.
#[cfg(test)]
async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .expect("Could not connect to test database")
}

/// A fresh database name, so tests can run in parallel.
#[cfg(test)]
fn database() -> String {
    format!("test-{:016x}", rand::random::<u64>())
}

/// A server over the given database with an in-memory chain.
///
/// Unlike [`build`], no bootstrap admin is inserted.
#[cfg(test)]
async fn rocket_for_db_and_chain(
    db_client: mongodb::Client,
    db_name: &str,
    chain: Arc<MockChain>,
) -> Rocket<Build> {
    let db = db_client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db)
        .await
        .expect("Failed to create test indexes");

    rocket::build()
        .mount("/api", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .manage(db_client)
        .manage(db)
        .manage(chain::Chain::new(chain.clone()))
        .manage(chain)
}

/// The chain behind a test client.
#[cfg(test)]
fn mock_chain(client: &rocket::local::asynchronous::Client) -> &MockChain {
    client
        .rocket()
        .state::<Arc<MockChain>>()
        .expect("Test rocket has no mock chain")
}

/// Insert an active election backed by a freshly deployed contract.
#[cfg(test)]
async fn seed_election(
    client: &rocket::local::asynchronous::Client,
    elections: &Coll<Election>,
) -> Election {
    let contract = mock_chain(client).deploy();
    let election = Election {
        id: Id::new(),
        election: NewElection::example(contract.into()),
    };
    elections.insert_one(&election, None).await.unwrap();
    election
}

/// Register the example candidates on the election's contract and mirror them.
#[cfg(test)]
async fn seed_candidates(
    client: &rocket::local::asynchronous::Client,
    elections: &Coll<Election>,
    election: &Election,
) {
    use crate::chain::VotingChain;
    use mongodb::bson::{doc, to_bson};

    for candidate in [Candidate::example1(), Candidate::example2()] {
        mock_chain(client)
            .register_candidate(
                *election.contract_address,
                *candidate.address,
                &candidate.name,
            )
            .await
            .unwrap();
        elections
            .update_one(
                election.id.as_doc(),
                doc! { "$push": { "candidates": to_bson(&candidate).unwrap() } },
                None,
            )
            .await
            .unwrap();
    }
}

#[cfg(test)]
async fn insert_voter(voters: &Coll<NewVoter>, voter: NewVoter) -> Id {
    voters
        .insert_one(voter, None)
        .await
        .unwrap()
        .inserted_id
        .as_object_id()
        .unwrap()
        .into()
}
