//! Typed bindings for the factory and per-election voting contracts.

use ethers::contract::abigen;

abigen!(
    VotingFactory,
    r#"[
        function createElection(string _electionName, string _electionDescription) external returns (address)
        function getDeployedVotings() external view returns (address[])
        event VotingContractCreated(address indexed contractAddress, string electionName, string electionDescription, address indexed creator)
    ]"#
);

abigen!(
    WhitelistedVoting,
    r#"[
        struct Candidate { address candidateAddress; string name; }
        function registerCandidate(address _candidateAddress, string _name) external
        function whitelistVoters(address[] voters) external
        function voteByAddress(address _candidateAddress) external
        function endVotingAndDeclareWinner() external
        function getWinner() external view returns (address, string, uint256)
        function getAllCandidates() external view returns (Candidate[])
        function getVotesByAddress(address _candidateAddress) external view returns (uint256)
        function hasVoted(address) external view returns (bool)
        function votingActive() external view returns (bool)
        function winnerDeclared() external view returns (bool)
    ]"#
);
