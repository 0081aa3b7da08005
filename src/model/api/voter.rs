use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{
    api::{id::ApiId, require_non_empty, wallet::WalletAddress},
    db::voter::{ElectionApproval, GasTransfer, Voter, VoterDetails, VoterStatus},
};

/// Amount of ETH sent by `send-gas` when the request doesn't say.
pub const DEFAULT_GAS_REQUEST: &str = "0.01";

/// Body of a voter registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub wallet_address: WalletAddress,
    pub first_name: String,
    pub last_name: String,
    pub aadhar: String,
    pub phone_number: String,
    pub country: String,
    pub physical_address: String,
}

impl Registration {
    /// Check every field is filled in and split off the wallet address.
    pub fn validate(self) -> Result<(WalletAddress, VoterDetails), Error> {
        require_non_empty(&[
            ("firstName", self.first_name.as_str()),
            ("lastName", self.last_name.as_str()),
            ("aadhar", self.aadhar.as_str()),
            ("phoneNumber", self.phone_number.as_str()),
            ("country", self.country.as_str()),
            ("physicalAddress", self.physical_address.as_str()),
        ])?;
        let details = VoterDetails {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            aadhar: self.aadhar.trim().to_string(),
            phone_number: self.phone_number.trim().to_string(),
            country: self.country.trim().to_string(),
            physical_address: self.physical_address.trim().to_string(),
        };
        Ok((self.wallet_address, details))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub message: String,
    pub status: VoterStatus,
}

/// Registration state of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub is_registered: bool,
    /// One of the voter statuses, or `not_registered`.
    pub status: String,
}

impl RegistrationStatus {
    pub fn not_registered() -> Self {
        Self {
            is_registered: false,
            status: "not_registered".to_string(),
        }
    }

    pub fn registered(status: VoterStatus) -> Self {
        Self {
            is_registered: true,
            status: status.to_string(),
        }
    }
}

/// Which elections a wallet has voted in, as far as the mirror knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStatus {
    pub address: WalletAddress,
    pub voted_elections: Vec<ApiId>,
    pub total_votes: usize,
}

/// A vote the voter has already cast from their own wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReport {
    pub election_id: ApiId,
    pub candidate_name: String,
    pub candidate_address: WalletAddress,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Success {
    pub success: bool,
    pub message: String,
}

impl Success {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalView {
    pub election_id: ApiId,
    pub status: VoterStatus,
    pub contract_address: WalletAddress,
    pub is_whitelisted: bool,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_tx_hash: Option<String>,
}

impl From<ElectionApproval> for ApprovalView {
    fn from(approval: ElectionApproval) -> Self {
        Self {
            election_id: approval.election_id.into(),
            status: approval.status,
            contract_address: approval.contract_address,
            is_whitelisted: approval.is_whitelisted,
            decided_at: approval.decided_at,
            whitelist_tx_hash: approval.whitelist_tx_hash,
            gas_tx_hash: approval.gas_tx_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasView {
    pub tx_hash: String,
    pub amount: String,
    pub sent_at: DateTime<Utc>,
}

impl From<GasTransfer> for GasView {
    fn from(gas: GasTransfer) -> Self {
        Self {
            tx_hash: gas.tx_hash,
            amount: gas.amount,
            sent_at: gas.sent_at,
        }
    }
}

/// A voter as shown to admins. The wallet address only appears masked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterSummary {
    pub id: ApiId,
    pub first_name: String,
    pub last_name: String,
    pub aadhar: String,
    pub phone_number: String,
    pub country: String,
    pub physical_address: String,
    pub display_address: String,
    pub status: VoterStatus,
    pub election_approvals: Vec<ApprovalView>,
    pub has_voted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<GasView>,
    pub created_at: DateTime<Utc>,
}

impl From<Voter> for VoterSummary {
    fn from(voter: Voter) -> Self {
        let id = voter.id.into();
        let voter = voter.voter;
        Self {
            id,
            first_name: voter.details.first_name,
            last_name: voter.details.last_name,
            aadhar: voter.details.aadhar,
            phone_number: voter.details.phone_number,
            country: voter.details.country,
            physical_address: voter.details.physical_address,
            display_address: voter.encrypted_address.masked(),
            status: voter.status,
            election_approvals: voter
                .election_approvals
                .into_iter()
                .map(Into::into)
                .collect(),
            has_voted: voter.has_voted,
            gas: voter.gas.map(Into::into),
            created_at: voter.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

impl From<ApprovalAction> for VoterStatus {
    fn from(action: ApprovalAction) -> Self {
        match action {
            ApprovalAction::Approve => Self::Approved,
            ApprovalAction::Reject => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub voter_id: ApiId,
    pub action: ApprovalAction,
    #[serde(default)]
    pub election_id: Option<ApiId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub success: bool,
    pub action: ApprovalAction,
    pub election_id: Option<ApiId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasRequest {
    pub voter_id: ApiId,
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSent {
    pub success: bool,
    pub message: String,
    pub tx_hash: String,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Registration {
        pub fn example() -> Self {
            let details = VoterDetails::example();
            Self {
                wallet_address: WalletAddress::voter_example(),
                first_name: details.first_name,
                last_name: details.last_name,
                aadhar: details.aadhar,
                phone_number: details.phone_number,
                country: details.country,
                physical_address: details.physical_address,
            }
        }
    }
}
