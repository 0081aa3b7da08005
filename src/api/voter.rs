use chrono::Utc;
use mongodb::{
    bson::{doc, to_document, Bson, DateTime as BsonDateTime},
    options::FindOptions,
};
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route, State};

use crate::{
    chain::Chain,
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            election::ElectionDescription,
            parse_body,
            voter::{
                Registration, RegistrationResponse, RegistrationStatus, Success, VoteReport,
                VotingStatus,
            },
            JsonBody,
        },
        db::{
            election::Election,
            vote::{NewVote, Vote},
            voter::{self, NewVoter, Voter, VoterStatus},
        },
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
    Config,
};

use super::required_address;

pub fn routes() -> Vec<Route> {
    routes![
        register,
        registration_status,
        voter_elections,
        voting_status,
        record_vote,
    ]
}

#[post("/voter/register", data = "<registration>", format = "json")]
async fn register(
    registration: JsonBody<'_, Registration>,
    voters: Coll<Voter>,
    new_voters: Coll<NewVoter>,
    config: &State<Config>,
) -> Result<Json<RegistrationResponse>> {
    let (address, details) = parse_body(registration)?.validate()?;

    match voters
        .find_one(voter::with_address(address, config), None)
        .await?
    {
        Some(existing) if existing.status != VoterStatus::Rejected => {
            return Err(Error::AlreadyRegistered(existing.status));
        }
        Some(rejected) => {
            // Reapplying replaces the details but keeps any per-election decisions.
            let mut set = to_document(&details)?;
            set.insert("status", VoterStatus::Pending.to_string());
            voters
                .update_one(rejected.id.as_doc(), doc! { "$set": set }, None)
                .await?;
            info!("Rejected voter {} reapplied", rejected.id);
        }
        None => {
            let voter = NewVoter::new(details, address, config);
            match new_voters.insert_one(voter, None).await {
                Ok(result) => info!("Registered voter {}", result.inserted_id),
                // Lost a race with a concurrent registration for the same wallet.
                Err(e) if is_duplicate_key_error(&e) => {
                    return Err(Error::AlreadyRegistered(VoterStatus::Pending));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(Json(RegistrationResponse {
        message: "Registration submitted, awaiting admin approval".to_string(),
        status: VoterStatus::Pending,
    }))
}

#[get("/voter/status?<address>")]
async fn registration_status(
    address: Option<&str>,
    voters: Coll<Voter>,
    config: &State<Config>,
) -> Result<Json<RegistrationStatus>> {
    let address = required_address(address)?;
    let status = voters
        .find_one(voter::with_address(address, config), None)
        .await?
        .map_or_else(RegistrationStatus::not_registered, |voter| {
            RegistrationStatus::registered(voter.status)
        });
    Ok(Json(status))
}

#[get("/voter/elections?<address>")]
async fn voter_elections(
    address: Option<&str>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    config: &State<Config>,
) -> Result<Json<Vec<ElectionDescription>>> {
    let address = required_address(address)?;
    let voter = voters
        .find_one(voter::with_address(address, config), None)
        .await?
        .ok_or_else(|| Error::not_found("Voter"))?;
    if voter.status != VoterStatus::Approved {
        return Ok(Json(Vec::new()));
    }

    let mut filter = doc! { "is_active": true };
    if !voter.election_approvals.is_empty() {
        let approved = voter
            .approved_elections()
            .into_iter()
            .map(Bson::from)
            .collect::<Vec<_>>();
        filter.insert("_id", doc! { "$in": approved });
    }
    let newest_first = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let election_list: Vec<Election> = elections
        .find(filter, newest_first)
        .await?
        .try_collect()
        .await?;
    Ok(Json(election_list.into_iter().map(Into::into).collect()))
}

#[get("/voter/voting-status?<address>")]
async fn voting_status(
    address: Option<&str>,
    voters: Coll<Voter>,
    votes: Coll<Vote>,
    config: &State<Config>,
) -> Result<Json<VotingStatus>> {
    let address = required_address(address)?;
    let hashed_address = address.into_hmac(config);

    let mirrored: Vec<Vote> = votes
        .find(doc! { "hashed_address": &hashed_address }, None)
        .await?
        .try_collect()
        .await?;
    let mut voted: Vec<Id> = mirrored.iter().map(|vote| vote.election_id).collect();

    let last_voted = voters
        .find_one(doc! { "hashed_address": &hashed_address }, None)
        .await?
        .and_then(|voter| voter.last_voted_election_id);
    if let Some(election_id) = last_voted {
        if !voted.contains(&election_id) {
            voted.push(election_id);
        }
    }

    Ok(Json(VotingStatus {
        address,
        total_votes: voted.len(),
        voted_elections: voted.into_iter().map(Into::into).collect(),
    }))
}

fn forbidden(msg: String) -> Error {
    Error::Status(Status::Forbidden, msg)
}

/// Record a vote the voter has already cast on-chain from their own wallet.
#[post("/voter/blockchain-vote", data = "<report>", format = "json")]
async fn record_vote(
    token: AuthToken<Voter>,
    report: JsonBody<'_, VoteReport>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    votes: Coll<NewVote>,
    chain: Chain,
    config: &State<Config>,
) -> Result<Json<Success>> {
    let report = parse_body(report)?;
    let election_id: Id = report.election_id.into();

    let voter = voters
        .find_one(token.id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {}", token.id)))?;
    if voter.status != VoterStatus::Approved {
        return Err(forbidden(format!("Voter is {}, not approved", voter.status)));
    }
    if !voter.may_vote_in(election_id) {
        return Err(forbidden(format!(
            "Voter is not approved for election {election_id}"
        )));
    }

    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    if !election.is_active {
        return Err(Error::bad_request(format!(
            "Election {election_id} is not active"
        )));
    }

    let candidate = election
        .candidate_named(&report.candidate_name)
        .ok_or_else(|| Error::not_found(format!("Candidate {}", report.candidate_name)))?;
    if candidate.address != report.candidate_address {
        return Err(Error::bad_request(format!(
            "Candidate {} is registered with a different address",
            candidate.name
        )));
    }

    let already_voted = || {
        Error::bad_request(format!(
            "A vote in election {election_id} is already recorded for this voter"
        ))
    };
    let mirrored = votes
        .find_one(
            doc! { "election_id": election_id, "hashed_address": &voter.hashed_address },
            None,
        )
        .await?;
    if mirrored.is_some() {
        return Err(already_voted());
    }

    let address = voter.encrypted_address.decrypt(config)?;
    match chain
        .has_voted(*election.contract_address, *address)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            return Err(Error::bad_request(
                "Vote not found on blockchain; cast it from your wallet first",
            ))
        }
        Err(e) => warn!(
            "Could not confirm vote of voter {} on-chain, recording it anyway: {e}",
            voter.id
        ),
    }

    let vote = NewVote {
        election_id,
        hashed_address: voter.hashed_address.clone(),
        candidate_name: candidate.name.clone(),
        candidate_address: candidate.address,
        tx_hash: report.tx_hash.clone(),
        timestamp: Utc::now(),
    };
    match votes.insert_one(&vote, None).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key_error(&e) => return Err(already_voted()),
        Err(e) => return Err(e.into()),
    }

    // The vote is on-chain and now mirrored; a lost tally is repaired by refresh-votes.
    if !count_vote(&elections, election_id, &candidate.name).await? {
        error!(
            "Candidate {} vanished from election {election_id}, mirrored tally not incremented",
            candidate.name
        );
    }

    voters
        .update_one(
            voter.id.as_doc(),
            doc! {
                "$set": {
                    "has_voted": true,
                    "last_voted_election_id": election_id,
                    "voted_at": BsonDateTime::from_chrono(Utc::now()),
                }
            },
            None,
        )
        .await?;

    info!(
        "Recorded vote of voter {} for {} in election {election_id}",
        voter.id, candidate.name
    );
    Ok(Json(Success::new("Vote recorded successfully")))
}

/// Increment the mirrored tally of the named candidate.
/// Returns `false` if no such candidate exists in the election.
async fn count_vote(elections: &Coll<Election>, election_id: Id, name: &str) -> Result<bool> {
    let result = elections
        .update_one(
            doc! { "_id": election_id, "candidates.name": name },
            doc! { "$inc": { "candidates.$.votes": 1_i64 } },
            None,
        )
        .await?;
    Ok(result.matched_count > 0)
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::ContentType,
        local::asynchronous::Client,
        serde::json::{serde_json::json, Value},
    };

    use crate::chain::VotingChain;
    use crate::model::{
        api::wallet::WalletAddress,
        db::{
            election::{Candidate, NewElection},
            voter::ElectionApproval,
        },
    };
    use crate::{insert_voter, mock_chain, seed_candidates, seed_election};

    use super::*;

    async fn register_as(client: &Client, body: Value) -> (Status, Value) {
        let response = client
            .post("/api/voter/register")
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json::<Value>().await.unwrap())
    }

    #[backend_test]
    async fn register_voter(client: Client, voters: Coll<Voter>) {
        let (status, body) = register_as(&client, json!(Registration::example())).await;
        assert_eq!(Status::Ok, status);
        assert_eq!(body["status"], "pending");

        let config = client.rocket().state::<Config>().unwrap();
        let voter = voters
            .find_one(voter::with_address(WalletAddress::voter_example(), config), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(voter.status, VoterStatus::Pending);
        assert_eq!(voter.details.first_name, "Asha");

        // Registering again, even with a differently cased address, is refused.
        let mut again = json!(Registration::example());
        again["walletAddress"] = json!("0x70997970C51812DC3A010C7D01B50E0D17DC79C8");
        let (status, body) = register_as(&client, again).await;
        assert_eq!(Status::BadRequest, status);
        assert_eq!(body["status"], "pending");
        assert_eq!(voters.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test]
    async fn register_validation(client: Client, voters: Coll<Voter>) {
        let mut blank = json!(Registration::example());
        blank["aadhar"] = json!(" ");
        let (status, body) = register_as(&client, blank).await;
        assert_eq!(Status::BadRequest, status);
        assert_eq!(body["error"], "Missing required fields: aadhar");

        let mut missing = json!(Registration::example());
        missing.as_object_mut().unwrap().remove("country");
        let (status, _) = register_as(&client, missing).await;
        assert_eq!(Status::BadRequest, status);

        let mut bad_address = json!(Registration::example());
        bad_address["walletAddress"] = json!("0x70997970");
        let (status, _) = register_as(&client, bad_address).await;
        assert_eq!(Status::BadRequest, status);

        assert_eq!(voters.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test]
    async fn rejected_voter_reapplies(client: Client, voters: Coll<Voter>) {
        register_as(&client, json!(Registration::example())).await;
        voters
            .update_one(doc! {}, doc! { "$set": { "status": "rejected" } }, None)
            .await
            .unwrap();

        let mut reapply = json!(Registration::example());
        reapply["firstName"] = json!("Asha Rani");
        let (status, body) = register_as(&client, reapply).await;
        assert_eq!(Status::Ok, status);
        assert_eq!(body["status"], "pending");

        let voter = voters.find_one(None, None).await.unwrap().unwrap();
        assert_eq!(voter.status, VoterStatus::Pending);
        assert_eq!(voter.details.first_name, "Asha Rani");
        assert_eq!(voters.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test]
    async fn status_lookup(client: Client) {
        let uri = format!("/api/voter/status?address={}", WalletAddress::voter_example());
        let status = client
            .get(uri.clone())
            .dispatch()
            .await
            .into_json::<RegistrationStatus>()
            .await
            .unwrap();
        assert_eq!(status, RegistrationStatus::not_registered());

        register_as(&client, json!(Registration::example())).await;
        let status = client
            .get(uri)
            .dispatch()
            .await
            .into_json::<RegistrationStatus>()
            .await
            .unwrap();
        assert_eq!(status, RegistrationStatus::registered(VoterStatus::Pending));

        let response = client.get("/api/voter/status").dispatch().await;
        assert_eq!(Status::BadRequest, response.status());
    }

    async fn elections_of(client: &Client, address: WalletAddress) -> (Status, Vec<Id>) {
        let response = client
            .get(format!("/api/voter/elections?address={address}"))
            .dispatch()
            .await;
        let status = response.status();
        let ids = response
            .into_json::<Vec<ElectionDescription>>()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|election| election.id.into())
            .collect();
        (status, ids)
    }

    #[backend_test]
    async fn elections_for_voter(
        client: Client,
        voters: Coll<Voter>,
        new_voters: Coll<NewVoter>,
        elections: Coll<Election>,
    ) {
        let config = client.rocket().state::<Config>().unwrap();
        let address = WalletAddress::voter_example();

        let (status, _) = elections_of(&client, address).await;
        assert_eq!(Status::NotFound, status);

        let voter_id = insert_voter(&new_voters, NewVoter::example(config)).await;
        let first = seed_election(&client, &elections).await;
        let second = seed_election(&client, &elections).await;
        let mut inactive = seed_election(&client, &elections).await;
        inactive.is_active = false;
        elections
            .replace_one(inactive.id.as_doc(), &inactive, None)
            .await
            .unwrap();

        // Pending voters see nothing.
        let (status, ids) = elections_of(&client, address).await;
        assert_eq!(Status::Ok, status);
        assert!(ids.is_empty());

        // Approved with no per-election decisions: every active election.
        voters
            .update_one(voter_id.as_doc(), doc! { "$set": { "status": "approved" } }, None)
            .await
            .unwrap();
        let (_, mut ids) = elections_of(&client, address).await;
        ids.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(ids, expected);

        // Per-election decisions restrict the list.
        let approval = ElectionApproval {
            election_id: second.id,
            status: VoterStatus::Approved,
            contract_address: second.contract_address,
            is_whitelisted: true,
            decided_at: Utc::now(),
            whitelist_tx_hash: None,
            gas_tx_hash: None,
        };
        voters
            .update_one(
                voter_id.as_doc(),
                doc! { "$push": { "election_approvals": mongodb::bson::to_bson(&approval).unwrap() } },
                None,
            )
            .await
            .unwrap();
        let (_, ids) = elections_of(&client, address).await;
        assert_eq!(ids, vec![second.id]);
    }

    async fn report_vote(client: &Client, body: Value) -> Status {
        client
            .post("/api/voter/blockchain-vote")
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await
            .status()
    }

    fn alice_vote(election_id: Id) -> Value {
        let alice = Candidate::example1();
        json!({
            "electionId": election_id.to_string(),
            "candidateName": alice.name,
            "candidateAddress": alice.address,
            "txHash": "0xabc",
        })
    }

    /// An election with candidates where the signed-in voter is whitelisted.
    async fn votable_election(client: &Client, elections: &Coll<Election>) -> Election {
        let election = seed_election(client, elections).await;
        seed_candidates(client, elections, &election).await;
        mock_chain(client)
            .whitelist_voters(
                *election.contract_address,
                &[*WalletAddress::voter_example()],
            )
            .await
            .unwrap();
        election
    }

    #[backend_test(voter)]
    async fn record_blockchain_vote(
        client: Client,
        voters: Coll<Voter>,
        elections: Coll<Election>,
        votes: Coll<Vote>,
    ) {
        let election = votable_election(&client, &elections).await;
        mock_chain(&client)
            .cast_vote(
                *election.contract_address,
                *WalletAddress::voter_example(),
                *Candidate::example1().address,
            )
            .unwrap();

        assert_eq!(Status::Ok, report_vote(&client, alice_vote(election.id)).await);

        let stored = elections
            .find_one(election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.candidates[0].votes, 1);
        assert_eq!(stored.candidates[1].votes, 0);

        let vote = votes.find_one(None, None).await.unwrap().unwrap();
        assert_eq!(vote.election_id, election.id);
        assert_eq!(vote.tx_hash.as_deref(), Some("0xabc"));

        let config = client.rocket().state::<Config>().unwrap();
        let voter = voters
            .find_one(voter::with_address(WalletAddress::voter_example(), config), None)
            .await
            .unwrap()
            .unwrap();
        assert!(voter.has_voted);
        assert_eq!(voter.last_voted_election_id, Some(election.id));
        assert!(voter.voted_at.is_some());

        // A second report is refused and nothing is double counted.
        assert_eq!(
            Status::BadRequest,
            report_vote(&client, alice_vote(election.id)).await
        );
        let stored = elections
            .find_one(election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.candidates[0].votes, 1);

        let status = client
            .get(format!(
                "/api/voter/voting-status?address={}",
                WalletAddress::voter_example()
            ))
            .dispatch()
            .await
            .into_json::<VotingStatus>()
            .await
            .unwrap();
        assert_eq!(status.total_votes, 1);
        assert_eq!(Id::from(status.voted_elections[0]), election.id);
    }

    #[backend_test(voter)]
    async fn vote_must_exist_on_chain(client: Client, elections: Coll<Election>, votes: Coll<Vote>) {
        let election = votable_election(&client, &elections).await;
        assert_eq!(
            Status::BadRequest,
            report_vote(&client, alice_vote(election.id)).await
        );
        assert_eq!(votes.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test(voter)]
    async fn unreadable_chain_is_tolerated(client: Client, elections: Coll<Election>) {
        // The contract is unknown to the chain, so `hasVoted` fails.
        let election = Election {
            id: Id::new(),
            election: NewElection::example(WalletAddress::example()),
        };
        elections.insert_one(&election, None).await.unwrap();
        elections
            .update_one(
                election.id.as_doc(),
                doc! { "$push": { "candidates": mongodb::bson::to_bson(&Candidate::example1()).unwrap() } },
                None,
            )
            .await
            .unwrap();

        assert_eq!(Status::Ok, report_vote(&client, alice_vote(election.id)).await);
    }

    #[backend_test(voter)]
    async fn vote_checks(client: Client, voters: Coll<Voter>, elections: Coll<Election>) {
        let election = votable_election(&client, &elections).await;

        // Unknown election.
        assert_eq!(
            Status::NotFound,
            report_vote(&client, alice_vote(Id::new())).await
        );

        // Unknown candidate.
        let mut body = alice_vote(election.id);
        body["candidateName"] = json!("Carol");
        assert_eq!(Status::NotFound, report_vote(&client, body).await);

        // Name and address disagree.
        let mut body = alice_vote(election.id);
        body["candidateAddress"] = json!(Candidate::example2().address);
        assert_eq!(Status::BadRequest, report_vote(&client, body).await);

        // Malformed body.
        let mut body = alice_vote(election.id);
        body["electionId"] = json!("x");
        assert_eq!(Status::BadRequest, report_vote(&client, body).await);

        // Approved only for another election.
        let config = client.rocket().state::<Config>().unwrap();
        let filter = voter::with_address(WalletAddress::voter_example(), config);
        let approval = ElectionApproval {
            election_id: Id::new(),
            status: VoterStatus::Approved,
            contract_address: WalletAddress::example(),
            is_whitelisted: true,
            decided_at: Utc::now(),
            whitelist_tx_hash: None,
            gas_tx_hash: None,
        };
        voters
            .update_one(
                filter.clone(),
                doc! { "$push": { "election_approvals": mongodb::bson::to_bson(&approval).unwrap() } },
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            Status::Forbidden,
            report_vote(&client, alice_vote(election.id)).await
        );

        // No longer approved at all.
        voters
            .update_one(filter, doc! { "$set": { "status": "pending" } }, None)
            .await
            .unwrap();
        assert_eq!(
            Status::Forbidden,
            report_vote(&client, alice_vote(election.id)).await
        );
    }

    #[backend_test(voter)]
    async fn inactive_election(client: Client, elections: Coll<Election>) {
        let election = votable_election(&client, &elections).await;
        elections
            .update_one(
                election.id.as_doc(),
                doc! { "$set": { "is_active": false } },
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            Status::BadRequest,
            report_vote(&client, alice_vote(election.id)).await
        );
    }

    #[backend_test]
    async fn tally_of_missing_candidate_is_not_counted(client: Client, elections: Coll<Election>) {
        let election = seed_election(&client, &elections).await;
        seed_candidates(&client, &elections, &election).await;

        assert!(count_vote(&elections, election.id, "Alice").await.unwrap());
        assert!(!count_vote(&elections, election.id, "Mallory").await.unwrap());
        assert!(!count_vote(&elections, Id::new(), "Alice").await.unwrap());

        let stored = elections
            .find_one(election.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        let votes: Vec<_> = stored.candidates.iter().map(|c| c.votes).collect();
        assert_eq!(votes, vec![1, 0]);
    }

    #[backend_test]
    async fn vote_requires_sign_in(client: Client) {
        assert_eq!(
            Status::Unauthorized,
            report_vote(&client, alice_vote(Id::new())).await
        );
    }

    #[backend_test(admin)]
    async fn admins_cannot_vote(client: Client) {
        assert_eq!(
            Status::Forbidden,
            report_vote(&client, alice_vote(Id::new())).await
        );
    }
}
