//! Client side of the voting contracts.
//!
//! The contracts own the authoritative election state; everything in the
//! database is a mirror of what is read through here.

use std::ops::Deref;
use std::sync::Arc;

use ethers::types::{Address, H256};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod client;
mod contracts;
#[cfg(test)]
pub mod mock;
mod receipt;

pub use client::EthChain;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Contract call failed: {0}")]
    Contract(String),
    #[error("RPC request failed: {0}")]
    Provider(#[from] ethers::providers::ProviderError),
    #[error("Invalid chain configuration: {0}")]
    Config(String),
    #[error("Transaction {0:?} was dropped from the mempool")]
    Dropped(H256),
    #[error("Transaction {0:?} reverted")]
    Reverted(H256),
    #[error("Timed out waiting for transaction {0:?} to be mined")]
    Timeout(H256),
    #[error(
        "Transaction {0:?} succeeded but the created contract address could not be determined; \
         check the transaction on a block explorer and set the address manually"
    )]
    AddressNotRecovered(H256),
    #[error("Invalid ETH amount `{0}`")]
    InvalidAmount(String),
    #[error("No RPC endpoints configured")]
    NoEndpoints,
}

impl ChainError {
    /// Flatten a middleware-specific contract error into a string.
    pub fn contract<E: std::fmt::Display>(err: E) -> Self {
        Self::Contract(err.to_string())
    }
}

/// A contract deployed by the election factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    pub contract: Address,
    pub tx_hash: H256,
}

/// A candidate as registered on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCandidate {
    pub address: Address,
    pub name: String,
}

/// The declared winner of an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainWinner {
    pub address: Address,
    pub name: String,
    pub votes: u64,
}

/// Everything this service needs from the voting contracts.
///
/// Writes are signed by the operator wallet and resolve once the transaction
/// has one confirmation. Votes themselves are never written from here: voters
/// sign `voteByAddress` with their own wallet.
#[rocket::async_trait]
pub trait VotingChain: Send + Sync {
    /// Deploy a new voting contract through the factory.
    async fn create_election(&self, name: &str, description: &str)
        -> Result<Deployment, ChainError>;

    async fn register_candidate(
        &self,
        contract: Address,
        candidate: Address,
        name: &str,
    ) -> Result<H256, ChainError>;

    async fn whitelist_voters(
        &self,
        contract: Address,
        voters: &[Address],
    ) -> Result<H256, ChainError>;

    async fn end_voting_and_declare_winner(&self, contract: Address) -> Result<H256, ChainError>;

    async fn winner(&self, contract: Address) -> Result<ChainWinner, ChainError>;

    async fn all_candidates(&self, contract: Address) -> Result<Vec<ChainCandidate>, ChainError>;

    async fn votes_for(&self, contract: Address, candidate: Address) -> Result<u64, ChainError>;

    async fn has_voted(&self, contract: Address, voter: Address) -> Result<bool, ChainError>;

    async fn voting_active(&self, contract: Address) -> Result<bool, ChainError>;

    async fn winner_declared(&self, contract: Address) -> Result<bool, ChainError>;

    /// Send `amount` ETH (decimal string) from the operator wallet.
    async fn send_gas(&self, to: Address, amount: &str) -> Result<H256, ChainError>;
}

/// Read the on-chain vote count for a candidate, falling back to looking the
/// candidate up in `getAllCandidates` when the direct read fails.
///
/// A candidate the contract doesn't know about has zero votes.
pub async fn votes_with_fallback<C: VotingChain + ?Sized>(
    chain: &C,
    contract: Address,
    candidate: Address,
) -> Result<u64, ChainError> {
    let direct_err = match chain.votes_for(contract, candidate).await {
        Ok(votes) => return Ok(votes),
        Err(e) => e,
    };
    warn!("getVotesByAddress({candidate:#x}) failed, falling back to candidate list: {direct_err}");

    let candidates = chain.all_candidates(contract).await?;
    match candidates.iter().find(|c| c.address == candidate) {
        Some(found) => chain.votes_for(contract, found.address).await,
        None => {
            debug!("{candidate:#x} is not registered on {contract:#x}, counting zero votes");
            Ok(0)
        }
    }
}

/// The chain client in managed state.
#[derive(Clone)]
pub struct Chain(Arc<dyn VotingChain>);

impl Chain {
    pub fn new(inner: Arc<dyn VotingChain>) -> Self {
        Self(inner)
    }
}

impl Deref for Chain {
    type Target = dyn VotingChain;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Chain {
    type Error = ();

    /// Get the chain client from managed state.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        req.guard::<&State<Chain>>()
            .await
            .map(|chain| chain.inner().clone())
    }
}

/// Full `0x`-prefixed hex of a transaction hash, as stored and returned by the API.
pub fn format_hash(hash: &H256) -> String {
    format!("{hash:?}")
}
