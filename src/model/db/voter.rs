use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use serde::{Deserialize, Serialize};

use crate::{
    model::{
        api::wallet::{EncryptedAddress, WalletAddress},
        mongodb::{chrono_datetime_as_optional_bson_datetime, Id},
    },
    Config,
};

/// Registration state of a voter, both overall and per election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterStatus {
    Pending,
    Approved,
    Rejected,
}

impl Display for VoterStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{status}")
    }
}

/// Personal details supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDetails {
    pub first_name: String,
    pub last_name: String,
    pub aadhar: String,
    pub phone_number: String,
    pub country: String,
    pub physical_address: String,
}

/// An admin's decision about a voter for one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionApproval {
    pub election_id: Id,
    pub status: VoterStatus,
    pub contract_address: WalletAddress,
    pub is_whitelisted: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_tx_hash: Option<String>,
}

/// The most recent gas top-up sent to a voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasTransfer {
    pub tx_hash: String,
    pub amount: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub sent_at: DateTime<Utc>,
}

/// Core voter data, as stored in the database.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct VoterCore {
    #[serde(flatten)]
    pub details: VoterDetails,
    /// Lookup key: HMAC of the wallet address.
    pub hashed_address: String,
    /// The wallet address itself, only decrypted to act on-chain for the voter.
    pub encrypted_address: EncryptedAddress,
    pub status: VoterStatus,
    #[serde(default)]
    pub election_approvals: Vec<ElectionApproval>,
    #[serde(default)]
    pub has_voted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_voted_election_id: Option<Id>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono_datetime_as_optional_bson_datetime"
    )]
    pub voted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<GasTransfer>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl VoterCore {
    /// Create a new pending voter.
    pub fn new(details: VoterDetails, address: WalletAddress, config: &Config) -> Self {
        Self {
            details,
            hashed_address: address.into_hmac(config),
            encrypted_address: address.encrypt(config),
            status: VoterStatus::Pending,
            election_approvals: Vec::new(),
            has_voted: false,
            last_voted_election_id: None,
            voted_at: None,
            gas: None,
            created_at: Utc::now(),
        }
    }

    /// The decision recorded for the given election, if any.
    pub fn approval_for(&self, election_id: Id) -> Option<&ElectionApproval> {
        self.election_approvals
            .iter()
            .find(|approval| approval.election_id == election_id)
    }

    /// Elections this voter has been individually approved for.
    pub fn approved_elections(&self) -> Vec<Id> {
        self.election_approvals
            .iter()
            .filter(|approval| approval.status == VoterStatus::Approved)
            .map(|approval| approval.election_id)
            .collect()
    }

    /// Can this voter take part in the given election?
    ///
    /// Voters with no per-election decisions may vote in any election once
    /// approved; otherwise they need an approval for this election.
    pub fn may_vote_in(&self, election_id: Id) -> bool {
        self.status == VoterStatus::Approved
            && (self.election_approvals.is_empty()
                || self
                    .approval_for(election_id)
                    .map_or(false, |approval| approval.status == VoterStatus::Approved))
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}

/// Filter matching the voter registered with the given wallet.
pub fn with_address(address: WalletAddress, config: &Config) -> Document {
    doc! { "hashed_address": address.into_hmac(config) }
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn approval(election_id: Id, status: VoterStatus) -> ElectionApproval {
        ElectionApproval {
            election_id,
            status,
            contract_address: WalletAddress::example(),
            is_whitelisted: status == VoterStatus::Approved,
            decided_at: Utc::now(),
            whitelist_tx_hash: None,
            gas_tx_hash: None,
        }
    }

    #[test]
    fn voting_rights() {
        let config = Config::example();
        let election = Id::new();
        let other = Id::new();

        let mut voter = NewVoter::example(&config);
        assert!(!voter.may_vote_in(election));

        voter.status = VoterStatus::Approved;
        assert!(voter.may_vote_in(election));
        assert!(voter.may_vote_in(other));

        voter.election_approvals = vec![
            approval(election, VoterStatus::Approved),
            approval(other, VoterStatus::Rejected),
        ];
        assert!(voter.may_vote_in(election));
        assert!(!voter.may_vote_in(other));
        assert!(!voter.may_vote_in(Id::new()));
        assert_eq!(voter.approved_elections(), vec![election]);
    }

    #[test]
    fn vote_time_is_a_bson_date() {
        let config = Config::example();
        let mut voter = NewVoter::example(&config);
        let doc = mongodb::bson::to_document(&voter).unwrap();
        assert!(!doc.contains_key("voted_at"));
        assert_eq!(
            mongodb::bson::from_document::<VoterCore>(doc).unwrap().voted_at,
            None
        );

        let voted_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        voter.voted_at = Some(voted_at);
        let doc = mongodb::bson::to_document(&voter).unwrap();
        assert_eq!(
            doc.get_datetime("voted_at").unwrap().to_chrono(),
            voted_at
        );
        assert_eq!(
            mongodb::bson::from_document::<VoterCore>(doc).unwrap().voted_at,
            Some(voted_at)
        );
    }

    #[test]
    fn address_is_not_stored_in_clear() {
        let config = Config::example();
        let voter = NewVoter::example(&config);
        let doc = mongodb::bson::to_document(&voter).unwrap();
        let plain = WalletAddress::voter_example().to_string();
        assert!(!doc.to_string().contains(&plain));
        assert_eq!(
            doc.get_str("hashed_address").unwrap(),
            WalletAddress::voter_example().into_hmac(&config)
        );
        assert_eq!(doc.get_str("status").unwrap(), "pending");
        assert_eq!(
            voter.encrypted_address.decrypt(&config).unwrap(),
            WalletAddress::voter_example()
        );
    }
}
