use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::ChainWinner;
use crate::model::{
    api::{id::ApiId, wallet::WalletAddress},
    db::election::{Candidate, Election, Winner},
};

/// Body of an election creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionSpec {
    pub title: String,
    pub description: String,
    /// An already deployed voting contract; one is deployed when absent.
    #[serde(default)]
    pub contract_address: Option<WalletAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateView {
    pub name: String,
    pub address: WalletAddress,
    pub votes: u64,
}

impl From<Candidate> for CandidateView {
    fn from(candidate: Candidate) -> Self {
        Self {
            name: candidate.name,
            address: candidate.address,
            votes: candidate.votes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerView {
    pub address: WalletAddress,
    pub name: String,
    pub votes: u64,
}

impl From<Winner> for WinnerView {
    fn from(winner: Winner) -> Self {
        Self {
            address: winner.address,
            name: winner.name,
            votes: winner.votes,
        }
    }
}

impl From<ChainWinner> for WinnerView {
    fn from(winner: ChainWinner) -> Self {
        Self {
            address: winner.address.into(),
            name: winner.name,
            votes: winner.votes,
        }
    }
}

/// An election as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionDescription {
    pub id: ApiId,
    pub title: String,
    pub description: String,
    pub contract_address: WalletAddress,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub candidates: Vec<CandidateView>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<WinnerView>,
    pub created_at: DateTime<Utc>,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        let id = election.id.into();
        let election = election.election;
        Self {
            id,
            title: election.title,
            description: election.description,
            contract_address: election.contract_address,
            start_date: election.start_date,
            end_date: election.end_date,
            candidates: election.candidates.into_iter().map(Into::into).collect(),
            is_active: election.is_active,
            winner: election.winner.map(Into::into),
            created_at: election.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ElectionCreated {
    pub message: String,
    pub election: ElectionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAddressUpdate {
    pub contract_address: WalletAddress,
}

/// Body of a candidate registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    pub address: WalletAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotesUpdate {
    pub votes: u64,
}

/// Outcome of reconciling one mirrored candidate with the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRefresh {
    pub index: usize,
    pub name: String,
    pub address: WalletAddress,
    pub mirrored: u64,
    /// `None` if the contract could not be read for this candidate.
    pub on_chain: Option<u64>,
    pub updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionEnded {
    pub message: String,
    pub winner: WinnerView,
    pub tx_hash: String,
}

/// Live contract state plus the mirrored candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionResults {
    pub voting_active: bool,
    pub winner_declared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<WinnerView>,
    pub candidates: Vec<CandidateView>,
}
