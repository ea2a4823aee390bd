use thiserror::Error;

/// Ethereum vocabulary errors: addresses, hex quantities and network names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EthError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Unrecognized network type: '{0}'")]
    InvalidNetworkType(String),

    #[error("encoding error: {0}")]
    EncodingError(String),
}
