//! An in-memory stand-in for the voting contracts, used by route tests.
//!
//! It enforces the same rules the contracts do (whitelisting, one vote per
//! voter, no votes after the winner is declared) so tests can rely on the
//! chain rejecting what it should.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use ethers::types::{Address, H256};

use super::{ChainCandidate, ChainError, ChainWinner, Deployment, VotingChain};

#[derive(Default)]
struct MockContract {
    candidates: Vec<ChainCandidate>,
    votes: HashMap<Address, u64>,
    whitelisted: HashSet<Address>,
    voted: HashSet<Address>,
    winner: Option<ChainWinner>,
}

#[derive(Default)]
struct MockState {
    contracts: HashMap<Address, MockContract>,
    gas_transfers: Vec<(Address, String)>,
    tx_count: u64,
    fail_gas: bool,
}

impl MockState {
    fn next_tx(&mut self) -> H256 {
        self.tx_count += 1;
        H256::from_low_u64_be(self.tx_count)
    }

    fn contract(&mut self, address: Address) -> Result<&mut MockContract, ChainError> {
        self.contracts
            .get_mut(&address)
            .ok_or_else(|| ChainError::Contract(format!("no contract at {address:#x}")))
    }
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    /// Deploy an empty voting contract and return its address.
    pub fn deploy(&self) -> Address {
        let mut state = self.state.lock().unwrap();
        let address = Address::from_low_u64_be(0xc0_0000 + state.contracts.len() as u64);
        state.contracts.insert(address, MockContract::default());
        address
    }

    /// Cast a vote as `voter`, as their wallet would.
    pub fn cast_vote(
        &self,
        contract: Address,
        voter: Address,
        candidate: Address,
    ) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        let contract = state.contract(contract)?;
        if contract.winner.is_some() {
            return Err(ChainError::contract("voting has ended"));
        }
        if !contract.whitelisted.contains(&voter) {
            return Err(ChainError::contract("not whitelisted"));
        }
        if !contract.candidates.iter().any(|c| c.address == candidate) {
            return Err(ChainError::contract("unknown candidate"));
        }
        if !contract.voted.insert(voter) {
            return Err(ChainError::contract("already voted"));
        }
        *contract.votes.entry(candidate).or_default() += 1;
        Ok(())
    }

    pub fn is_whitelisted(&self, contract: Address, voter: Address) -> bool {
        let state = self.state.lock().unwrap();
        state
            .contracts
            .get(&contract)
            .map(|c| c.whitelisted.contains(&voter))
            .unwrap_or(false)
    }

    pub fn candidates(&self, contract: Address) -> Vec<ChainCandidate> {
        let state = self.state.lock().unwrap();
        state
            .contracts
            .get(&contract)
            .map(|c| c.candidates.clone())
            .unwrap_or_default()
    }

    pub fn gas_transfers(&self) -> Vec<(Address, String)> {
        self.state.lock().unwrap().gas_transfers.clone()
    }

    /// Make every subsequent gas transfer fail.
    pub fn fail_gas_transfers(&self) {
        self.state.lock().unwrap().fail_gas = true;
    }
}

#[rocket::async_trait]
impl VotingChain for MockChain {
    async fn create_election(
        &self,
        _name: &str,
        _description: &str,
    ) -> Result<Deployment, ChainError> {
        let contract = self.deploy();
        let tx_hash = self.state.lock().unwrap().next_tx();
        Ok(Deployment { contract, tx_hash })
    }

    async fn register_candidate(
        &self,
        contract: Address,
        candidate: Address,
        name: &str,
    ) -> Result<H256, ChainError> {
        let mut state = self.state.lock().unwrap();
        let voting = state.contract(contract)?;
        if voting.candidates.iter().any(|c| c.address == candidate) {
            return Err(ChainError::contract("candidate already registered"));
        }
        voting.candidates.push(ChainCandidate {
            address: candidate,
            name: name.to_string(),
        });
        Ok(state.next_tx())
    }

    async fn whitelist_voters(
        &self,
        contract: Address,
        voters: &[Address],
    ) -> Result<H256, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.contract(contract)?.whitelisted.extend(voters);
        Ok(state.next_tx())
    }

    async fn end_voting_and_declare_winner(&self, contract: Address) -> Result<H256, ChainError> {
        let mut state = self.state.lock().unwrap();
        let voting = state.contract(contract)?;
        if voting.winner.is_some() {
            return Err(ChainError::contract("winner already declared"));
        }
        // Ties go to the earliest registered candidate.
        let winner = voting
            .candidates
            .iter()
            .map(|c| (c, voting.votes.get(&c.address).copied().unwrap_or(0)))
            .fold(None, |best: Option<(&ChainCandidate, u64)>, (c, votes)| match best {
                Some((_, best_votes)) if best_votes >= votes => best,
                _ => Some((c, votes)),
            })
            .ok_or_else(|| ChainError::contract("no candidates"))?;
        voting.winner = Some(ChainWinner {
            address: winner.0.address,
            name: winner.0.name.clone(),
            votes: winner.1,
        });
        Ok(state.next_tx())
    }

    async fn winner(&self, contract: Address) -> Result<ChainWinner, ChainError> {
        let mut state = self.state.lock().unwrap();
        state
            .contract(contract)?
            .winner
            .clone()
            .ok_or_else(|| ChainError::contract("winner not declared"))
    }

    async fn all_candidates(&self, contract: Address) -> Result<Vec<ChainCandidate>, ChainError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.contract(contract)?.candidates.clone())
    }

    async fn votes_for(&self, contract: Address, candidate: Address) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        let voting = state.contract(contract)?;
        if !voting.candidates.iter().any(|c| c.address == candidate) {
            return Err(ChainError::contract("not a candidate"));
        }
        Ok(voting.votes.get(&candidate).copied().unwrap_or(0))
    }

    async fn has_voted(&self, contract: Address, voter: Address) -> Result<bool, ChainError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.contract(contract)?.voted.contains(&voter))
    }

    async fn voting_active(&self, contract: Address) -> Result<bool, ChainError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.contract(contract)?.winner.is_none())
    }

    async fn winner_declared(&self, contract: Address) -> Result<bool, ChainError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.contract(contract)?.winner.is_some())
    }

    async fn send_gas(&self, to: Address, amount: &str) -> Result<H256, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_gas {
            return Err(ChainError::contract("insufficient funds"));
        }
        ethers::utils::parse_ether(amount)
            .map_err(|_| ChainError::InvalidAmount(amount.to_string()))?;
        state.gas_transfers.push((to, amount.to_string()));
        Ok(state.next_tx())
    }
}
