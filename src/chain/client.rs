use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::{
    abi::Detokenize,
    contract::ContractCall,
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, TransactionReceipt, TransactionRequest, H256, U256, U64},
    utils::parse_ether,
};
use rocket::tokio::time::timeout;

use crate::config::ChainConfig;

use super::contracts::{Candidate, VotingFactory, WhitelistedVoting};
use super::receipt::{extract_contract_address, new_deployment};
use super::{ChainCandidate, ChainError, ChainWinner, Deployment, VotingChain};

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// How often pending transactions are polled.
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// A [`VotingChain`] talking JSON-RPC to real nodes.
///
/// Reads try each endpoint in order; writes always go through the first
/// endpoint so a transaction is never broadcast twice.
pub struct EthChain {
    readers: Vec<Arc<Provider<Http>>>,
    signer: Arc<SignerClient>,
    factory: Address,
    confirmation_timeout: Duration,
}

impl EthChain {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        let readers = config
            .rpc_urls
            .iter()
            .map(|url| {
                Provider::<Http>::try_from(url.as_str())
                    .map(|provider| Arc::new(provider.interval(POLL_INTERVAL)))
                    .map_err(|e| ChainError::Config(format!("bad RPC url `{url}`: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let primary = readers.first().ok_or(ChainError::NoEndpoints)?;

        let wallet = config
            .operator_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Config(format!("bad operator key: {e}")))?
            .with_chain_id(config.chain_id);
        let signer = Arc::new(SignerMiddleware::new((**primary).clone(), wallet));

        Ok(Self {
            readers,
            signer,
            factory: *config.factory_address,
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout),
        })
    }

    /// Address of the wallet that signs admin transactions.
    pub fn operator(&self) -> String {
        format!("{:#x}", self.signer.address())
    }

    /// Run a read against each endpoint in turn until one succeeds.
    async fn read<T, F, Fut>(&self, what: &str, f: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<Provider<Http>>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut last_err = ChainError::NoEndpoints;
        for (i, provider) in self.readers.iter().enumerate() {
            match f(provider.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{what} failed on RPC endpoint #{i}: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Send a signed contract call and wait for it to be mined successfully.
    async fn transact<D: Detokenize>(
        &self,
        call: ContractCall<SignerClient, D>,
        what: &str,
    ) -> Result<TransactionReceipt, ChainError> {
        let pending = call.send().await.map_err(ChainError::contract)?;
        let tx_hash = *pending;
        info!("{what}: submitted transaction {tx_hash:?}");
        let receipt = timeout(self.confirmation_timeout, pending.confirmations(1))
            .await
            .map_err(|_| ChainError::Timeout(tx_hash))??;
        check_receipt(receipt, tx_hash)
    }

    async fn deployed_votings(&self) -> Result<Vec<Address>, ChainError> {
        let factory = self.factory;
        self.read("getDeployedVotings", |provider| async move {
            VotingFactory::new(factory, provider)
                .get_deployed_votings()
                .call()
                .await
                .map_err(ChainError::contract)
        })
        .await
    }
}

/// A receipt only counts if it exists and reports success.
fn check_receipt(
    receipt: Option<TransactionReceipt>,
    tx_hash: H256,
) -> Result<TransactionReceipt, ChainError> {
    let receipt = receipt.ok_or(ChainError::Dropped(tx_hash))?;
    if receipt.status != Some(U64::one()) {
        return Err(ChainError::Reverted(tx_hash));
    }
    Ok(receipt)
}

/// Vote counts beyond `u64::MAX` saturate.
fn vote_count(votes: U256) -> u64 {
    u64::try_from(votes).unwrap_or(u64::MAX)
}

impl From<Candidate> for ChainCandidate {
    fn from(candidate: Candidate) -> Self {
        Self {
            address: candidate.candidate_address,
            name: candidate.name,
        }
    }
}

#[rocket::async_trait]
impl VotingChain for EthChain {
    async fn create_election(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Deployment, ChainError> {
        // Snapshot for the last-resort diff. A failure here only costs us
        // that fallback.
        let before = match self.deployed_votings().await {
            Ok(before) => Some(before),
            Err(e) => {
                warn!("Could not list deployed votings before creation: {e}");
                None
            }
        };

        let factory = VotingFactory::new(self.factory, self.signer.clone());
        let call = factory.create_election(name.to_string(), description.to_string());
        let receipt = self.transact(call, "createElection").await?;
        let tx_hash = receipt.transaction_hash;

        if let Some(contract) = extract_contract_address(&receipt, self.factory) {
            return Ok(Deployment { contract, tx_hash });
        }

        if let Some(before) = before {
            let after = self.deployed_votings().await?;
            if let Some(contract) = new_deployment(&before, &after) {
                info!("Recovered new contract {contract:#x} by diffing factory deployments");
                return Ok(Deployment { contract, tx_hash });
            }
        }

        Err(ChainError::AddressNotRecovered(tx_hash))
    }

    async fn register_candidate(
        &self,
        contract: Address,
        candidate: Address,
        name: &str,
    ) -> Result<H256, ChainError> {
        let voting = WhitelistedVoting::new(contract, self.signer.clone());
        let call = voting.register_candidate(candidate, name.to_string());
        let receipt = self.transact(call, "registerCandidate").await?;
        Ok(receipt.transaction_hash)
    }

    async fn whitelist_voters(
        &self,
        contract: Address,
        voters: &[Address],
    ) -> Result<H256, ChainError> {
        let voting = WhitelistedVoting::new(contract, self.signer.clone());
        let call = voting.whitelist_voters(voters.to_vec());
        let receipt = self.transact(call, "whitelistVoters").await?;
        Ok(receipt.transaction_hash)
    }

    async fn end_voting_and_declare_winner(&self, contract: Address) -> Result<H256, ChainError> {
        let voting = WhitelistedVoting::new(contract, self.signer.clone());
        let call = voting.end_voting_and_declare_winner();
        let receipt = self.transact(call, "endVotingAndDeclareWinner").await?;
        Ok(receipt.transaction_hash)
    }

    async fn winner(&self, contract: Address) -> Result<ChainWinner, ChainError> {
        self.read("getWinner", |provider| async move {
            let (address, name, votes) = WhitelistedVoting::new(contract, provider)
                .get_winner()
                .call()
                .await
                .map_err(ChainError::contract)?;
            Ok(ChainWinner {
                address,
                name,
                votes: vote_count(votes),
            })
        })
        .await
    }

    async fn all_candidates(&self, contract: Address) -> Result<Vec<ChainCandidate>, ChainError> {
        self.read("getAllCandidates", |provider| async move {
            let candidates = WhitelistedVoting::new(contract, provider)
                .get_all_candidates()
                .call()
                .await
                .map_err(ChainError::contract)?;
            Ok(candidates.into_iter().map(|(candidate_address, name)| Candidate { candidate_address, name }.into()).collect())
        })
        .await
    }

    async fn votes_for(&self, contract: Address, candidate: Address) -> Result<u64, ChainError> {
        self.read("getVotesByAddress", |provider| async move {
            WhitelistedVoting::new(contract, provider)
                .get_votes_by_address(candidate)
                .call()
                .await
                .map(vote_count)
                .map_err(ChainError::contract)
        })
        .await
    }

    async fn has_voted(&self, contract: Address, voter: Address) -> Result<bool, ChainError> {
        self.read("hasVoted", |provider| async move {
            WhitelistedVoting::new(contract, provider)
                .has_voted(voter)
                .call()
                .await
                .map_err(ChainError::contract)
        })
        .await
    }

    async fn voting_active(&self, contract: Address) -> Result<bool, ChainError> {
        self.read("votingActive", |provider| async move {
            WhitelistedVoting::new(contract, provider)
                .voting_active()
                .call()
                .await
                .map_err(ChainError::contract)
        })
        .await
    }

    async fn winner_declared(&self, contract: Address) -> Result<bool, ChainError> {
        self.read("winnerDeclared", |provider| async move {
            WhitelistedVoting::new(contract, provider)
                .winner_declared()
                .call()
                .await
                .map_err(ChainError::contract)
        })
        .await
    }

    async fn send_gas(&self, to: Address, amount: &str) -> Result<H256, ChainError> {
        let value = parse_ether(amount).map_err(|_| ChainError::InvalidAmount(amount.to_string()))?;
        let tx = TransactionRequest::new().to(to).value(value);
        let pending = self
            .signer
            .send_transaction(tx, None)
            .await
            .map_err(ChainError::contract)?;
        let tx_hash = *pending;
        info!("Gas transfer of {amount} ETH to {to:#x}: submitted transaction {tx_hash:?}");
        let receipt = timeout(self.confirmation_timeout, pending.confirmations(1))
            .await
            .map_err(|_| ChainError::Timeout(tx_hash))??;
        Ok(check_receipt(receipt, tx_hash)?.transaction_hash)
    }
}
