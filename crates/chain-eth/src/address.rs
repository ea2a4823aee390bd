//! Account address handling.
//!
//! Balances are keyed by address, and the same account may reach us in
//! lowercase, uppercase or EIP-55 mixed case. Everything is folded to one
//! lowercase form before it is used as a key.

use sha3::{Digest, Keccak256};

use crate::error::EthError;

const BODY_LEN: usize = 40;

/// Letter casing found in the hex body of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Casing {
    Lower,
    Upper,
    Mixed,
}

/// Address split into its lowercase body and the casing it arrived in.
struct ParsedAddress {
    body: String,
    casing: Casing,
}

fn parse(input: &str) -> Result<ParsedAddress, EthError> {
    let Some(body) = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    else {
        return Err(EthError::InvalidAddress(format!("{input}: missing 0x prefix")));
    };

    if body.len() != BODY_LEN {
        return Err(EthError::InvalidAddress(format!(
            "{input}: body is {} characters, want {BODY_LEN}",
            body.len()
        )));
    }
    if let Some(bad) = body.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(EthError::InvalidAddress(format!(
            "{input}: unexpected character {bad:?}"
        )));
    }

    let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
    let casing = match (has_lower, has_upper) {
        (true, true) => Casing::Mixed,
        (false, true) => Casing::Upper,
        _ => Casing::Lower,
    };

    Ok(ParsedAddress {
        body: body.to_ascii_lowercase(),
        casing,
    })
}

/// EIP-55 encoding of an already lowercased 40-character body.
fn encode_checksummed(body: &str) -> String {
    let digest = Keccak256::digest(body.as_bytes());
    let nibbles = hex::encode(digest);

    let mut out = String::with_capacity(BODY_LEN + 2);
    out.push_str("0x");
    out.extend(body.chars().zip(nibbles.bytes()).map(|(c, n)| {
        if c.is_ascii_alphabetic() && n >= b'8' {
            c.to_ascii_uppercase()
        } else {
            c
        }
    }));
    out
}

/// Checks that `address` is well formed.
///
/// Returns `Ok(false)` when the input is mixed case and the casing does not
/// match its EIP-55 checksum. Single-case input has nothing to check.
pub fn validate_address(address: &str) -> Result<bool, EthError> {
    let parsed = parse(address)?;
    if parsed.casing != Casing::Mixed {
        return Ok(true);
    }
    Ok(encode_checksummed(&parsed.body)[2..] == address[2..])
}

/// Lowercase `0x` form used as an account key.
pub fn normalize_address(address: &str) -> Result<String, EthError> {
    if !validate_address(address)? {
        return Err(EthError::InvalidAddress(format!("{address}: checksum mismatch")));
    }
    Ok(format!("0x{}", address[2..].to_ascii_lowercase()))
}
