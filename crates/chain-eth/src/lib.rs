//! Ethereum network vocabulary for the wallet controllers.
//!
//! This crate provides:
//! - Named network types and their chain IDs, tickers and endpoints
//! - JSON-RPC request/response types and hex-quantity helpers
//! - Address validation and EIP-55 checksums

pub mod address;
pub mod chains;
pub mod error;
pub mod rpc;

pub use chains::NetworkType;
pub use error::EthError;
pub use rpc::{RpcError, RpcRequest};
