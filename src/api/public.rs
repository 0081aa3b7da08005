use chrono::Utc;
use mongodb::{bson::doc, options::FindOptions};
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::{
    chain::Chain,
    error::{Error, Result},
    model::{
        api::election::{ElectionDescription, ElectionResults},
        db::election::Election,
        mongodb::Coll,
    },
};

use super::parse_id;

pub fn routes() -> Vec<Route> {
    routes![active_elections, election_results]
}

#[get("/elections/active")]
async fn active_elections(elections: Coll<Election>) -> Result<Json<Vec<ElectionDescription>>> {
    let filter = doc! {
        "is_active": true,
        "end_date": { "$gt": Utc::now() },
    };
    let ending_soonest = FindOptions::builder().sort(doc! { "end_date": 1 }).build();
    let election_list: Vec<Election> = elections
        .find(filter, ending_soonest)
        .await?
        .try_collect()
        .await?;
    Ok(Json(election_list.into_iter().map(Into::into).collect()))
}

/// Live contract state alongside the mirrored candidate counts.
#[get("/elections/<election_id>/results")]
async fn election_results(
    election_id: &str,
    elections: Coll<Election>,
    chain: Chain,
) -> Result<Json<ElectionResults>> {
    let election_id = parse_id(election_id, "election")?;
    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    let contract = *election.contract_address;

    let voting_active = chain.voting_active(contract).await?;
    let winner_declared = chain.winner_declared(contract).await?;
    let winner = if winner_declared {
        Some(chain.winner(contract).await?.into())
    } else {
        None
    };

    Ok(Json(ElectionResults {
        voting_active,
        winner_declared,
        winner,
        candidates: election
            .election
            .candidates
            .into_iter()
            .map(Into::into)
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use ethers::types::Address;
    use rocket::{http::Status, local::asynchronous::Client};

    use crate::chain::VotingChain;
    use crate::model::{
        api::wallet::WalletAddress,
        db::election::{Candidate, NewElection},
        mongodb::Id,
    };
    use crate::{mock_chain, seed_candidates, seed_election};

    use super::*;

    #[backend_test]
    async fn only_open_elections_are_active(client: Client, elections: Coll<Election>) {
        let open = seed_election(&client, &elections).await;

        let mut closed = seed_election(&client, &elections).await;
        closed.is_active = false;
        elections
            .replace_one(closed.id.as_doc(), &closed, None)
            .await
            .unwrap();

        let expired = Election {
            id: Id::new(),
            election: NewElection::example_expired(WalletAddress::example()),
        };
        elections.insert_one(&expired, None).await.unwrap();

        let response = client.get("/api/elections/active").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let active = response
            .into_json::<Vec<ElectionDescription>>()
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(Id::from(active[0].id), open.id);
    }

    #[backend_test]
    async fn results_follow_the_contract(client: Client, elections: Coll<Election>) {
        let election = seed_election(&client, &elections).await;
        seed_candidates(&client, &elections, &election).await;
        let uri = format!("/api/elections/{}/results", election.id);

        let results = client
            .get(uri.clone())
            .dispatch()
            .await
            .into_json::<ElectionResults>()
            .await
            .unwrap();
        assert!(results.voting_active);
        assert!(!results.winner_declared);
        assert!(results.winner.is_none());
        assert_eq!(results.candidates.len(), 2);

        let chain = mock_chain(&client);
        let contract = *election.contract_address;
        let voter = Address::repeat_byte(3);
        chain.whitelist_voters(contract, &[voter]).await.unwrap();
        chain
            .cast_vote(contract, voter, *Candidate::example2().address)
            .unwrap();
        chain.end_voting_and_declare_winner(contract).await.unwrap();

        let results = client
            .get(uri)
            .dispatch()
            .await
            .into_json::<ElectionResults>()
            .await
            .unwrap();
        assert!(!results.voting_active);
        assert!(results.winner_declared);
        assert_eq!(results.winner.unwrap().name, "Bob");
    }

    #[backend_test]
    async fn results_errors(client: Client, elections: Coll<Election>) {
        let response = client.get("/api/elections/nope/results").dispatch().await;
        assert_eq!(Status::BadRequest, response.status());

        let response = client
            .get(format!("/api/elections/{}/results", Id::new()))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        // Mirrored election whose contract the chain doesn't know.
        let election = Election {
            id: Id::new(),
            election: NewElection::example(WalletAddress::example()),
        };
        elections.insert_one(&election, None).await.unwrap();
        let response = client
            .get(format!("/api/elections/{}/results", election.id))
            .dispatch()
            .await;
        assert_eq!(Status::BadGateway, response.status());
    }
}
