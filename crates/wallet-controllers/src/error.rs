use chain_eth::rpc::RpcError;
use chain_eth::EthError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("Unrecognized network type: '{0}'")]
    InvalidNetworkType(String),

    #[error("Missing RPC target for custom RPC network")]
    MissingRpcTarget,

    #[error("No provider registered")]
    ProviderUnavailable,

    #[error("RPC request failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Gas fee estimation failed: {0}")]
    Estimation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Controller destroyed")]
    Destroyed,
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;

impl From<EthError> for ControllerError {
    fn from(e: EthError) -> Self {
        match e {
            EthError::InvalidNetworkType(name) => ControllerError::InvalidNetworkType(name),
            other => ControllerError::InvalidResponse(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for ControllerError {
    fn from(e: toml::de::Error) -> Self {
        ControllerError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_rpc_target() {
        assert_eq!(
            ControllerError::MissingRpcTarget.to_string(),
            "Missing RPC target for custom RPC network"
        );
    }

    #[test]
    fn network_type_errors_keep_their_kind() {
        let err: ControllerError = EthError::InvalidNetworkType("moonbase".into()).into();
        assert_eq!(err, ControllerError::InvalidNetworkType("moonbase".into()));
        assert_eq!(err.to_string(), "Unrecognized network type: 'moonbase'");
    }

    #[test]
    fn other_eth_errors_become_invalid_response() {
        let err: ControllerError = EthError::InvalidQuantity("0xzz".into()).into();
        assert!(matches!(err, ControllerError::InvalidResponse(_)));
    }

    #[test]
    fn rpc_errors_convert() {
        let err: ControllerError = RpcError::Timeout.into();
        assert_eq!(err.to_string(), "RPC request failed: request timed out");
    }
}
