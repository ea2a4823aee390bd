//! JSON-RPC wire vocabulary shared by providers and controllers.
//!
//! Only the handful of methods the wallet controllers issue are named here;
//! everything else goes through [`RpcRequest::new`].

use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::EthError;

pub const NET_VERSION: &str = "net_version";
pub const ETH_GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
pub const ETH_GAS_PRICE: &str = "eth_gasPrice";
pub const ETH_GET_BALANCE: &str = "eth_getBalance";

const GWEI: u64 = 1_000_000_000;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            method: method.into(),
            params,
        }
    }

    /// `net_version`: the network identifier the node reports.
    pub fn net_version() -> Self {
        Self::new(NET_VERSION, Vec::new())
    }

    /// `eth_getBlockByNumber("latest", false)`: header of the newest block.
    pub fn latest_block() -> Self {
        Self::new(ETH_GET_BLOCK_BY_NUMBER, vec![json!("latest"), json!(false)])
    }

    pub fn gas_price() -> Self {
        Self::new(ETH_GAS_PRICE, Vec::new())
    }

    /// `eth_getBalance(address, "latest")`.
    pub fn balance(address: &str) -> Self {
        Self::new(ETH_GET_BALANCE, vec![json!(address), json!("latest")])
    }
}

/// Failures reported by a provider, either from the node or the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("rpc error {code}: {message}")]
    Response { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider stopped")]
    Stopped,
}

/// The parts of a block header the controllers look at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
}

impl BlockHeader {
    /// Decodes an `eth_getBlockByNumber` result. A `null` block is an error.
    pub fn from_value(value: Value) -> Result<Self, EthError> {
        if value.is_null() {
            return Err(EthError::EncodingError("block not found".into()));
        }
        serde_json::from_value(value).map_err(|e| EthError::EncodingError(e.to_string()))
    }

    /// London-fork headers carry a base fee; legacy headers do not.
    pub fn supports_fee_market(&self) -> bool {
        self.base_fee_per_gas.is_some()
    }
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(quantity: &str) -> Result<U256, EthError> {
    let body = quantity
        .strip_prefix("0x")
        .or_else(|| quantity.strip_prefix("0X"))
        .ok_or_else(|| EthError::InvalidQuantity(quantity.to_string()))?;
    if body.is_empty() {
        return Err(EthError::InvalidQuantity(quantity.to_string()));
    }
    U256::from_str_radix(body, 16).map_err(|_| EthError::InvalidQuantity(quantity.to_string()))
}

/// Reads a hex quantity out of a JSON-RPC result.
pub fn quantity_from_value(value: &Value) -> Result<U256, EthError> {
    let s = value
        .as_str()
        .ok_or_else(|| EthError::InvalidQuantity(value.to_string()))?;
    parse_quantity(s)
}

/// Formats a value as a minimal `0x`-prefixed hex quantity.
pub fn to_quantity(value: U256) -> String {
    format!("0x{value:x}")
}

/// Converts wei to a GWEI decimal string, trimming trailing fractional zeros
/// (`1500000000` wei → `"1.5"`).
pub fn wei_to_gwei_decimal(wei: U256) -> String {
    let gwei = U256::from(GWEI);
    let whole = wei / gwei;
    let fraction = (wei % gwei).as_limbs()[0];
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:09}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Interprets a `net_version` result. Nodes answer with a decimal string;
/// some answer with a bare number.
pub fn parse_network_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = RpcRequest::net_version();
        let b = RpcRequest::net_version();
        assert_ne!(a.id, b.id);
        assert_eq!(a.jsonrpc, "2.0");
    }

    #[test]
    fn latest_block_params() {
        let req = RpcRequest::latest_block();
        assert_eq!(req.method, ETH_GET_BLOCK_BY_NUMBER);
        assert_eq!(req.params, vec![json!("latest"), json!(false)]);
    }

    #[test]
    fn balance_params() {
        let req = RpcRequest::balance("0xabc");
        assert_eq!(req.method, ETH_GET_BALANCE);
        assert_eq!(req.params, vec![json!("0xabc"), json!("latest")]);
    }

    #[test]
    fn london_header_supports_fee_market() {
        let header = BlockHeader::from_value(json!({
            "number": "0x10",
            "baseFeePerGas": "0x7"
        }))
        .unwrap();
        assert!(header.supports_fee_market());
    }

    #[test]
    fn legacy_header_does_not_support_fee_market() {
        let header = BlockHeader::from_value(json!({ "number": "0x10" })).unwrap();
        assert!(!header.supports_fee_market());
    }

    #[test]
    fn null_block_is_an_error() {
        assert!(BlockHeader::from_value(Value::Null).is_err());
    }

    #[test]
    fn parse_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), U256::ZERO);
        assert_eq!(parse_quantity("0x10").unwrap(), U256::from(16u64));
        assert!(parse_quantity("10").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn quantity_formatting() {
        assert_eq!(to_quantity(U256::ZERO), "0x0");
        assert_eq!(to_quantity(U256::from(255u64)), "0xff");
    }

    #[test]
    fn gwei_conversion() {
        assert_eq!(wei_to_gwei_decimal(U256::from(1_000_000_000u64)), "1");
        assert_eq!(wei_to_gwei_decimal(U256::from(1_500_000_000u64)), "1.5");
        assert_eq!(wei_to_gwei_decimal(U256::from(20_000_000_001u64)), "20.000000001");
        assert_eq!(wei_to_gwei_decimal(U256::ZERO), "0");
    }

    #[test]
    fn network_ids() {
        assert_eq!(parse_network_id(&json!("1")), Some(1));
        assert_eq!(parse_network_id(&json!(42)), Some(42));
        assert_eq!(parse_network_id(&json!("mainnet")), None);
        assert_eq!(parse_network_id(&Value::Null), None);
    }
}
