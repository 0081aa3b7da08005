use chrono::Utc;
use mongodb::{
    bson::{doc, to_bson, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    chain::{format_hash, votes_with_fallback, Chain, ChainWinner},
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            election::{
                CandidateRefresh, CandidateSpec, ContractAddressUpdate, ElectionCreated,
                ElectionDescription, ElectionEnded, ElectionSpec, StatusUpdate, VotesUpdate,
            },
            parse_body, require_non_empty, JsonBody,
        },
        db::{
            admin::Admin,
            election::{Candidate, Election, NewElection, Winner},
        },
        mongodb::{Coll, Id},
    },
    Config,
};

use super::parse_id;

pub fn routes() -> Vec<Route> {
    routes![
        get_elections,
        create_election,
        set_election_status,
        set_contract_address,
        end_election,
        add_candidate,
        set_candidate_votes,
        refresh_votes,
    ]
}

/// Update setting the mirrored vote count of the candidate at `index`.
fn set_votes_at(index: usize, votes: u64) -> Document {
    let mut set = Document::new();
    // Saturate counts BSON can't hold.
    set.insert(
        format!("candidates.{index}.votes"),
        i64::try_from(votes).unwrap_or(i64::MAX),
    );
    doc! { "$set": set }
}

fn return_updated() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

async fn find_election(elections: &Coll<Election>, election_id: Id) -> Result<Election> {
    elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))
}

#[get("/admin/elections")]
async fn get_elections(
    _token: AuthToken<Admin>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let newest_first = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let election_list: Vec<Election> = elections
        .find(None, newest_first)
        .await?
        .try_collect()
        .await?;
    Ok(Json(election_list.into_iter().map(Into::into).collect()))
}

#[post("/admin/elections", data = "<spec>", format = "json")]
async fn create_election(
    _token: AuthToken<Admin>,
    spec: JsonBody<'_, ElectionSpec>,
    elections: Coll<Election>,
    chain: Chain,
    config: &State<Config>,
) -> Result<Json<ElectionCreated>> {
    let spec = parse_body(spec)?;
    require_non_empty(&[
        ("title", spec.title.as_str()),
        ("description", spec.description.as_str()),
    ])?;
    let title = spec.title.trim().to_string();
    let description = spec.description.trim().to_string();

    let (contract_address, message) = match spec.contract_address {
        Some(contract_address) => (
            contract_address,
            "Election created with existing voting contract".to_string(),
        ),
        None => {
            let deployment = chain.create_election(&title, &description).await?;
            info!(
                "Deployed voting contract {:#x} for `{title}` in transaction {}",
                deployment.contract,
                format_hash(&deployment.tx_hash)
            );
            (
                deployment.contract.into(),
                "Election created and voting contract deployed".to_string(),
            )
        }
    };

    let election = Election {
        id: Id::new(),
        election: NewElection::new(
            title,
            description,
            contract_address,
            config.election_duration(),
        ),
    };
    elections.insert_one(&election, None).await?;

    Ok(Json(ElectionCreated {
        message,
        election: election.into(),
    }))
}

#[patch("/admin/elections/<election_id>/status", data = "<update>", format = "json")]
async fn set_election_status(
    _token: AuthToken<Admin>,
    election_id: &str,
    update: JsonBody<'_, StatusUpdate>,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election_id = parse_id(election_id, "election")?;
    let update = parse_body(update)?;

    let election = elections
        .find_one_and_update(
            election_id.as_doc(),
            doc! { "$set": { "is_active": update.is_active } },
            return_updated(),
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    Ok(Json(election.into()))
}

#[patch(
    "/admin/elections/<election_id>/contract-address",
    data = "<update>",
    format = "json"
)]
async fn set_contract_address(
    _token: AuthToken<Admin>,
    election_id: &str,
    update: JsonBody<'_, ContractAddressUpdate>,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election_id = parse_id(election_id, "election")?;
    let contract_address = parse_body(update)?.contract_address;

    let election = elections
        .find_one_and_update(
            election_id.as_doc(),
            doc! { "$set": { "contract_address": contract_address.to_string() } },
            return_updated(),
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    info!("Election {election_id} now points at contract {contract_address}");
    Ok(Json(election.into()))
}

async fn mirror_winner(
    elections: &Coll<Election>,
    election_id: Id,
    winner: &ChainWinner,
) -> Result<()> {
    let winner = Winner {
        address: winner.address.into(),
        name: winner.name.clone(),
        votes: winner.votes,
        declared_at: Utc::now(),
    };
    let update = doc! {
        "$set": {
            "winner": to_bson(&winner)?,
            "is_active": false,
        }
    };
    elections
        .update_one(election_id.as_doc(), update, None)
        .await?;
    Ok(())
}

#[post("/admin/elections/<election_id>/end")]
async fn end_election(
    _token: AuthToken<Admin>,
    election_id: &str,
    elections: Coll<Election>,
    chain: Chain,
) -> Result<Json<ElectionEnded>> {
    let election_id = parse_id(election_id, "election")?;
    let election = find_election(&elections, election_id).await?;
    let contract = *election.contract_address;

    let tx_hash = chain.end_voting_and_declare_winner(contract).await?;
    let winner = chain.winner(contract).await?;
    info!(
        "Election {election_id} ended, winner {} ({:#x}) with {} votes",
        winner.name, winner.address, winner.votes
    );

    // The chain is authoritative, so a stale mirror doesn't fail the request.
    if let Err(e) = mirror_winner(&elections, election_id, &winner).await {
        error!("Winner of election {election_id} declared on-chain but not mirrored: {e}");
    }

    Ok(Json(ElectionEnded {
        message: format!("Voting ended, {} wins", winner.name),
        winner: winner.into(),
        tx_hash: format_hash(&tx_hash),
    }))
}

#[post(
    "/admin/elections/<election_id>/candidates",
    data = "<candidate>",
    format = "json"
)]
async fn add_candidate(
    _token: AuthToken<Admin>,
    election_id: &str,
    candidate: JsonBody<'_, CandidateSpec>,
    elections: Coll<Election>,
    chain: Chain,
) -> Result<Json<ElectionDescription>> {
    let election_id = parse_id(election_id, "election")?;
    let spec = parse_body(candidate)?;
    require_non_empty(&[("name", spec.name.as_str())])?;
    let name = spec.name.trim().to_string();

    let election = find_election(&elections, election_id).await?;
    if let Some(existing) = election.candidate_with_address(spec.address) {
        return Err(Error::bad_request(format!(
            "Candidate {} is already registered with address {}",
            existing.name, spec.address
        )));
    }

    let tx_hash = chain
        .register_candidate(*election.contract_address, *spec.address, &name)
        .await?;
    info!(
        "Registered candidate {name} ({}) for election {election_id} in transaction {}",
        spec.address,
        format_hash(&tx_hash)
    );

    let candidate = Candidate::new(name, spec.address);
    let election = elections
        .find_one_and_update(
            election_id.as_doc(),
            doc! { "$push": { "candidates": to_bson(&candidate)? } },
            return_updated(),
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    Ok(Json(election.into()))
}

#[patch(
    "/admin/elections/<election_id>/candidates/<index>/votes",
    data = "<update>",
    format = "json"
)]
async fn set_candidate_votes(
    _token: AuthToken<Admin>,
    election_id: &str,
    index: &str,
    update: JsonBody<'_, VotesUpdate>,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election_id = parse_id(election_id, "election")?;
    let index: usize = index
        .parse()
        .map_err(|_| Error::bad_request(format!("Invalid candidate index `{index}`")))?;
    let votes = parse_body(update)?.votes;

    let election = find_election(&elections, election_id).await?;
    if index >= election.candidates.len() {
        return Err(Error::not_found(format!(
            "Candidate {index} of election {election_id}"
        )));
    }

    let election = elections
        .find_one_and_update(
            election_id.as_doc(),
            set_votes_at(index, votes),
            return_updated(),
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    Ok(Json(election.into()))
}

#[post("/admin/elections/<election_id>/refresh-votes")]
async fn refresh_votes(
    _token: AuthToken<Admin>,
    election_id: &str,
    elections: Coll<Election>,
    chain: Chain,
) -> Result<Json<Vec<CandidateRefresh>>> {
    let election_id = parse_id(election_id, "election")?;
    let election = find_election(&elections, election_id).await?;
    let contract = *election.contract_address;

    let mut report = Vec::with_capacity(election.candidates.len());
    for (index, candidate) in election.candidates.iter().enumerate() {
        let mut refresh = CandidateRefresh {
            index,
            name: candidate.name.clone(),
            address: candidate.address,
            mirrored: candidate.votes,
            on_chain: None,
            updated: false,
            error: None,
        };

        match votes_with_fallback(&*chain, contract, *candidate.address).await {
            Ok(on_chain) => {
                refresh.on_chain = Some(on_chain);
                if on_chain != candidate.votes {
                    // Candidates are append-only, so the index is stable.
                    elections
                        .update_one(election_id.as_doc(), set_votes_at(index, on_chain), None)
                        .await?;
                    refresh.updated = true;
                    debug!(
                        "Candidate {} of election {election_id}: {} -> {on_chain} votes",
                        candidate.name, candidate.votes
                    );
                }
            }
            Err(e) => {
                warn!(
                    "Could not read votes for {} in election {election_id}: {e}",
                    candidate.address
                );
                refresh.error = Some(e.to_string());
            }
        }
        report.push(refresh);
    }

    let updated = report.iter().filter(|r| r.updated).count();
    info!("Refreshed votes for election {election_id}: {updated} candidate(s) updated");
    Ok(Json(report))
}
