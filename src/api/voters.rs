use chrono::Utc;
use ethers::utils::parse_ether;
use mongodb::{
    bson::{doc, to_bson},
    options::{FindOptions, UpdateOptions},
};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::{
    chain::{format_hash, Chain},
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            pagination::{Paginated, Pagination},
            parse_body,
            voter::{
                ApprovalRequest, ApprovalResponse, GasRequest, GasSent, VoterSummary,
                DEFAULT_GAS_REQUEST,
            },
            wallet::WalletAddress,
            JsonBody,
        },
        db::{
            admin::Admin,
            election::Election,
            voter::{ElectionApproval, GasTransfer, Voter, VoterStatus},
        },
        mongodb::{Coll, Id},
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![get_voters, approve_voter, send_gas]
}

/// Options matching the approval entry for one election, as `$[elem]`.
fn approval_filter(election_id: Id) -> UpdateOptions {
    UpdateOptions::builder()
        .array_filters(vec![doc! { "elem.election_id": election_id }])
        .build()
}

#[get("/admin/voters")]
async fn get_voters(
    _token: AuthToken<Admin>,
    pagination: Pagination,
    voters: Coll<Voter>,
) -> Result<Json<Paginated<VoterSummary>>> {
    let total = voters.count_documents(None, None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(pagination.skip())
        .limit(i64::try_from(pagination.page_size()).unwrap_or(i64::MAX))
        .build();
    let page: Vec<Voter> = voters.find(None, options).await?.try_collect().await?;
    let summaries = page.into_iter().map(Into::into).collect();
    Ok(Json(pagination.result(summaries, total)))
}

#[post("/admin/voters/approve", data = "<request>", format = "json")]
async fn approve_voter(
    token: AuthToken<Admin>,
    request: JsonBody<'_, ApprovalRequest>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    chain: Chain,
    config: &State<Config>,
) -> Result<Json<ApprovalResponse>> {
    let request = parse_body(request)?;
    let voter_id: Id = request.voter_id.into();
    let status = VoterStatus::from(request.action);

    let voter = voters
        .find_one(voter_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;

    let election_id: Id = match request.election_id {
        Some(election_id) => election_id.into(),
        None => {
            voters
                .update_one(
                    voter_id.as_doc(),
                    doc! { "$set": { "status": status.to_string() } },
                    None,
                )
                .await?;
            info!("Admin {} set voter {voter_id} to {status}", token.id);

            if status == VoterStatus::Approved {
                match voter.encrypted_address.decrypt(config) {
                    Ok(address) => {
                        top_up_gas(&chain, &voters, voter_id, address, None, config).await;
                    }
                    Err(e) => warn!("Not sending gas to voter {voter_id}: {e}"),
                }
            }

            return Ok(Json(ApprovalResponse {
                success: true,
                action: request.action,
                election_id: None,
            }));
        }
    };

    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
    let existing = voter.approval_for(election_id);

    // Whitelisting is the on-chain half of an approval.
    let whitelisted = if status == VoterStatus::Approved {
        let address = voter.encrypted_address.decrypt(config)?;
        let tx_hash = chain
            .whitelist_voters(*election.contract_address, &[*address])
            .await?;
        info!(
            "Whitelisted voter {voter_id} on {} in transaction {}",
            election.contract_address,
            format_hash(&tx_hash)
        );
        Some((address, format_hash(&tx_hash)))
    } else {
        None
    };

    // A contract can't un-whitelist, so a rejection keeps the earlier flag.
    let approval = ElectionApproval {
        election_id,
        status,
        contract_address: election.contract_address,
        is_whitelisted: whitelisted.is_some() || existing.map_or(false, |a| a.is_whitelisted),
        decided_at: Utc::now(),
        whitelist_tx_hash: whitelisted
            .as_ref()
            .map(|(_, tx_hash)| tx_hash.clone())
            .or_else(|| existing.and_then(|a| a.whitelist_tx_hash.clone())),
        gas_tx_hash: existing.and_then(|a| a.gas_tx_hash.clone()),
    };
    let approval = to_bson(&approval)?;
    if existing.is_some() {
        voters
            .update_one(
                voter_id.as_doc(),
                doc! { "$set": { "election_approvals.$[elem]": approval } },
                approval_filter(election_id),
            )
            .await?;
    } else {
        voters
            .update_one(
                voter_id.as_doc(),
                doc! { "$push": { "election_approvals": approval } },
                None,
            )
            .await?;
    }
    info!(
        "Admin {} set voter {voter_id} to {status} for election {election_id}",
        token.id
    );

    let any_approved = status == VoterStatus::Approved
        || voter
            .election_approvals
            .iter()
            .any(|a| a.election_id != election_id && a.status == VoterStatus::Approved);
    if any_approved && voter.status != VoterStatus::Approved {
        voters
            .update_one(
                voter_id.as_doc(),
                doc! { "$set": { "status": VoterStatus::Approved.to_string() } },
                None,
            )
            .await?;
    }

    if let Some((address, _)) = whitelisted {
        top_up_gas(&chain, &voters, voter_id, address, Some(election_id), config).await;
    }

    Ok(Json(ApprovalResponse {
        success: true,
        action: request.action,
        election_id: request.election_id,
    }))
}

/// Store a gas transfer on the voter, and on their approval for `election_id`.
async fn record_gas(
    voters: &Coll<Voter>,
    voter_id: Id,
    transfer: &GasTransfer,
    election_id: Option<Id>,
) -> Result<()> {
    let mut set = doc! { "gas": to_bson(transfer)? };
    let options = election_id.map(|election_id| {
        set.insert(
            "election_approvals.$[elem].gas_tx_hash",
            transfer.tx_hash.clone(),
        );
        approval_filter(election_id)
    });
    voters
        .update_one(voter_id.as_doc(), doc! { "$set": set }, options)
        .await?;
    Ok(())
}

/// Send the configured amount of gas to a newly approved voter.
///
/// Failures are logged; the approval that triggered this stands regardless.
async fn top_up_gas(
    chain: &Chain,
    voters: &Coll<Voter>,
    voter_id: Id,
    address: WalletAddress,
    election_id: Option<Id>,
    config: &Config,
) {
    let amount = config.default_gas_amount();
    let tx_hash = match chain.send_gas(*address, amount).await {
        Ok(tx_hash) => tx_hash,
        Err(e) => {
            warn!("Could not send gas to voter {voter_id}: {e}");
            return;
        }
    };
    let transfer = GasTransfer {
        tx_hash: format_hash(&tx_hash),
        amount: amount.to_string(),
        sent_at: Utc::now(),
    };
    info!(
        "Sent {amount} ETH of gas to voter {voter_id} in transaction {}",
        transfer.tx_hash
    );
    if let Err(e) = record_gas(voters, voter_id, &transfer, election_id).await {
        error!("Gas sent to voter {voter_id} but not recorded: {e}");
    }
}

#[post("/admin/send-gas", data = "<request>", format = "json")]
async fn send_gas(
    _token: AuthToken<Admin>,
    request: JsonBody<'_, GasRequest>,
    voters: Coll<Voter>,
    chain: Chain,
    config: &State<Config>,
) -> Result<Json<GasSent>> {
    let request = parse_body(request)?;
    let voter_id: Id = request.voter_id.into();
    let amount = request
        .amount
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_GAS_REQUEST)
        .to_string();
    match parse_ether(&amount) {
        Ok(wei) if !wei.is_zero() => {}
        _ => {
            return Err(Error::bad_request(format!(
                "Invalid gas amount `{amount}`: expected a positive ETH value"
            )))
        }
    }

    let voter = voters
        .find_one(voter_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {voter_id}")))?;
    let address = voter.encrypted_address.decrypt(config)?;

    let tx_hash = format_hash(&chain.send_gas(*address, &amount).await?);
    info!("Sent {amount} ETH of gas to voter {voter_id} in transaction {tx_hash}");

    let transfer = GasTransfer {
        tx_hash: tx_hash.clone(),
        amount: amount.clone(),
        sent_at: Utc::now(),
    };
    if let Err(e) = record_gas(&voters, voter_id, &transfer, None).await {
        error!("Gas sent to voter {voter_id} but not recorded: {e}");
    }

    Ok(Json(GasSent {
        success: true,
        message: format!("Sent {amount} ETH to voter {voter_id}"),
        tx_hash,
    }))
}
