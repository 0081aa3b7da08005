use std::collections::BTreeSet;

use ethers::types::{Address, TransactionReceipt, H256};

/// Recover the address of a contract created by a factory transaction.
///
/// Strategies, in order:
/// 1. `contractAddress` on the receipt (only set for direct deployments).
/// 2. A log emitted by the factory with an indexed address in topic 1,
///    which is where `VotingContractCreated` puts the new contract.
/// 3. The unique non-zero address among non-factory log emitters and
///    address-shaped topics.
///
/// Returns `None` when no strategy gives exactly one answer.
pub fn extract_contract_address(
    receipt: &TransactionReceipt,
    factory: Address,
) -> Option<Address> {
    if let Some(address) = receipt.contract_address {
        debug!("Contract address found directly on receipt: {address:#x}");
        return Some(address);
    }

    for log in receipt.logs.iter().filter(|log| log.address == factory) {
        if let Some(address) = log.topics.get(1).and_then(topic_address) {
            debug!("Contract address found in factory log topic: {address:#x}");
            return Some(address);
        }
    }

    let mut candidates = BTreeSet::new();
    for log in &receipt.logs {
        if log.address != factory {
            candidates.insert(log.address);
        }
        candidates.extend(log.topics.iter().filter_map(topic_address));
    }
    candidates.remove(&Address::zero());
    candidates.remove(&factory);

    match candidates.len() {
        1 => candidates.into_iter().next(),
        0 => None,
        n => {
            warn!("Found {n} candidate contract addresses in receipt logs, refusing to guess");
            None
        }
    }
}

/// The unique address in `after` that is not in `before`, if there is exactly one.
pub fn new_deployment(before: &[Address], after: &[Address]) -> Option<Address> {
    let mut new = after.iter().filter(|address| !before.contains(address));
    match (new.next(), new.next()) {
        (Some(address), None) => Some(*address),
        _ => None,
    }
}

/// Interpret a 32-byte topic as a left-padded address.
fn topic_address(topic: &H256) -> Option<Address> {
    let bytes = topic.as_bytes();
    if bytes[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let address = Address::from_slice(&bytes[12..]);
    (!address.is_zero()).then_some(address)
}
