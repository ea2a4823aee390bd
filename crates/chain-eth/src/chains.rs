use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EthError;

/// Endpoint used by the `localhost` network type.
pub const LOCALHOST_RPC_URL: &str = "http://localhost:8545";

/// Ticker used when a network has no testnet-specific symbol.
pub const DEFAULT_TICKER: &str = "ETH";

/// Kinds of network a wallet can point its provider at.
///
/// Named chains resolve their chain ID from a static table. `Localhost` talks to
/// a node on [`LOCALHOST_RPC_URL`] and `Rpc` requires a caller-supplied URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NetworkType {
    Mainnet,
    Kovan,
    Rinkeby,
    Goerli,
    Ropsten,
    Optimism,
    OptimismTest,
    Localhost,
    Rpc,
}

impl NetworkType {
    pub const ALL: [NetworkType; 9] = [
        NetworkType::Mainnet,
        NetworkType::Kovan,
        NetworkType::Rinkeby,
        NetworkType::Goerli,
        NetworkType::Ropsten,
        NetworkType::Optimism,
        NetworkType::OptimismTest,
        NetworkType::Localhost,
        NetworkType::Rpc,
    ];

    /// Wire name of this network type.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Kovan => "kovan",
            NetworkType::Rinkeby => "rinkeby",
            NetworkType::Goerli => "goerli",
            NetworkType::Ropsten => "ropsten",
            NetworkType::Optimism => "optimism",
            NetworkType::OptimismTest => "optimismTest",
            NetworkType::Localhost => "localhost",
            NetworkType::Rpc => "rpc",
        }
    }

    /// Static definition for named chains, `None` for `Localhost` and `Rpc`.
    pub fn named_chain(&self) -> Option<&'static NamedChain> {
        NAMED_CHAINS
            .iter()
            .find(|c| c.network_type == *self)
            .copied()
    }

    /// Fixed chain ID of a named chain.
    pub fn chain_id(&self) -> Option<u64> {
        self.named_chain().map(|c| c.chain_id)
    }

    /// Ticker symbol shown for this network type. Testnets get a prefixed
    /// symbol so balances are not mistaken for mainnet ether.
    pub fn ticker(&self) -> &'static str {
        self.named_chain()
            .map(|c| c.ticker)
            .unwrap_or(DEFAULT_TICKER)
    }

    /// Whether this type is served by a hosted named-chain transport rather
    /// than a plain RPC URL.
    pub fn is_named(&self) -> bool {
        self.named_chain().is_some()
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = EthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NetworkType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| EthError::InvalidNetworkType(s.to_string()))
    }
}

impl TryFrom<String> for NetworkType {
    type Error = EthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetworkType> for String {
    fn from(value: NetworkType) -> Self {
        value.as_str().to_string()
    }
}

/// Definition of a named Ethereum network.
#[derive(Debug, Clone, Serialize)]
pub struct NamedChain {
    pub network_type: NetworkType,
    pub chain_id: u64,
    pub name: &'static str,
    pub ticker: &'static str,
    pub is_testnet: bool,
}

/// Ethereum Mainnet (chain ID 1).
pub const MAINNET: NamedChain = NamedChain {
    network_type: NetworkType::Mainnet,
    chain_id: 1,
    name: "Ethereum Mainnet",
    ticker: "ETH",
    is_testnet: false,
};

/// Kovan testnet (chain ID 42).
pub const KOVAN: NamedChain = NamedChain {
    network_type: NetworkType::Kovan,
    chain_id: 42,
    name: "Kovan",
    ticker: "KovanETH",
    is_testnet: true,
};

/// Rinkeby testnet (chain ID 4).
pub const RINKEBY: NamedChain = NamedChain {
    network_type: NetworkType::Rinkeby,
    chain_id: 4,
    name: "Rinkeby",
    ticker: "RinkebyETH",
    is_testnet: true,
};

/// Goerli testnet (chain ID 5).
pub const GOERLI: NamedChain = NamedChain {
    network_type: NetworkType::Goerli,
    chain_id: 5,
    name: "Goerli",
    ticker: "GoerliETH",
    is_testnet: true,
};

/// Ropsten testnet (chain ID 3).
pub const ROPSTEN: NamedChain = NamedChain {
    network_type: NetworkType::Ropsten,
    chain_id: 3,
    name: "Ropsten",
    ticker: "RopstenETH",
    is_testnet: true,
};

/// Optimism (chain ID 10).
pub const OPTIMISM: NamedChain = NamedChain {
    network_type: NetworkType::Optimism,
    chain_id: 10,
    name: "Optimism",
    ticker: "ETH",
    is_testnet: false,
};

/// Optimism Kovan testnet (chain ID 69).
pub const OPTIMISM_TEST: NamedChain = NamedChain {
    network_type: NetworkType::OptimismTest,
    chain_id: 69,
    name: "Optimism Kovan",
    ticker: "ETH",
    is_testnet: true,
};

const NAMED_CHAINS: &[&NamedChain] = &[
    &MAINNET,
    &KOVAN,
    &RINKEBY,
    &GOERLI,
    &ROPSTEN,
    &OPTIMISM,
    &OPTIMISM_TEST,
];

/// Chain IDs of the canonical Ethereum networks. Anything else (Optimism
/// included) is reported as a custom network.
const CANONICAL_CHAIN_IDS: &[u64] = &[
    MAINNET.chain_id,
    KOVAN.chain_id,
    RINKEBY.chain_id,
    GOERLI.chain_id,
    ROPSTEN.chain_id,
];

/// Whether a chain ID belongs to a non-canonical network. A missing chain ID
/// (a local node) is not custom.
pub fn is_custom_network(chain_id: Option<u64>) -> bool {
    match chain_id {
        None => false,
        Some(id) => !CANONICAL_CHAIN_IDS.contains(&id),
    }
}
