use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{api::wallet::WalletAddress, mongodb::Id};

/// A candidate, mirrored from the election's contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub address: WalletAddress,
    /// Last known on-chain vote count.
    pub votes: u64,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(name: String, address: WalletAddress) -> Self {
        Self {
            name,
            address,
            votes: 0,
            created_at: Utc::now(),
        }
    }
}

/// The winner declared by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub address: WalletAddress,
    pub name: String,
    pub votes: u64,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub declared_at: DateTime<Utc>,
}

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub description: String,
    /// The voting contract holding the authoritative state.
    pub contract_address: WalletAddress,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ElectionCore {
    /// A new, active election with no candidates, open from now for `duration`.
    pub fn new(
        title: String,
        description: String,
        contract_address: WalletAddress,
        duration: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            title,
            description,
            contract_address,
            start_date: now,
            end_date: now + duration,
            candidates: Vec::new(),
            is_active: true,
            winner: None,
            created_at: now,
        }
    }

    /// Find a candidate by address, ignoring case.
    pub fn candidate_with_address(&self, address: WalletAddress) -> Option<&Candidate> {
        // Addresses are canonicalised on parse, so equality is case-insensitive.
        self.candidates.iter().find(|c| c.address == address)
    }

    pub fn candidate_named(&self, name: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.name == name)
    }
}

/// An election without an ID.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::Duration;

    use super::*;

    impl ElectionCore {
        pub fn example(contract_address: WalletAddress) -> Self {
            Self::new(
                "Student Council 2024".to_string(),
                "Annual student council election".to_string(),
                contract_address,
                Duration::days(7),
            )
        }

        /// An election whose voting window has already closed.
        pub fn example_expired(contract_address: WalletAddress) -> Self {
            let mut election = Self::example(contract_address);
            election.start_date = Utc::now() - Duration::days(8);
            election.end_date = Utc::now() - Duration::days(1);
            election
        }
    }

    impl Candidate {
        pub fn example1() -> Self {
            Self::new(
                "Alice".to_string(),
                "0x00000000000000000000000000000000000a11ce".parse().unwrap(),
            )
        }

        pub fn example2() -> Self {
            Self::new(
                "Bob".to_string(),
                "0x0000000000000000000000000000000000000b0b".parse().unwrap(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_lookup() {
        let mut election = NewElection::example(WalletAddress::example());
        election.candidates = vec![Candidate::example1(), Candidate::example2()];

        let upper: WalletAddress = "0x00000000000000000000000000000000000A11CE".parse().unwrap();
        assert_eq!(
            election.candidate_with_address(upper).unwrap().name,
            "Alice"
        );
        assert!(election.candidate_named("Bob").is_some());
        assert!(election.candidate_named("bob").is_none());
        assert_eq!(election.end_date - election.start_date, chrono::Duration::days(7));
    }
}
