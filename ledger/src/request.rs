//! Typed ledger requests.
//!
//! HTTP bodies arrive as untyped JSON. Each request type is parsed from a
//! [`serde_json::Value`] and fully validated before the ledger touches any
//! chain, so a malformed request never causes a mutation.

use serde_json::Value;

use crate::config::MAX_CHAIN_NAME_LENGTH;
use crate::crypto::is_digest_hex;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::block::BlockValue;

/// Checks that `name` can be used as a chain name and collection key.
///
/// Accepted: 1 to [`MAX_CHAIN_NAME_LENGTH`] characters from `[A-Za-z0-9_.-]`.
pub fn validate_chain_name(name: &str) -> LedgerResult<()> {
    if name.is_empty() {
        return Err(LedgerError::Validation("chain name is empty".to_string()));
    }
    if name.len() > MAX_CHAIN_NAME_LENGTH {
        return Err(LedgerError::Validation(format!(
            "chain name longer than {MAX_CHAIN_NAME_LENGTH} characters"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(LedgerError::Validation(format!(
            "chain name contains invalid character {c:?}"
        )));
    }
    Ok(())
}

fn object(body: &Value) -> LedgerResult<&serde_json::Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| LedgerError::Validation("request body must be a JSON object".to_string()))
}

fn required_str<'a>(obj: &'a serde_json::Map<String, Value>, field: &str) -> LedgerResult<&'a str> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(LedgerError::Validation(format!("{field} must be a string"))),
        None => Err(LedgerError::Validation(format!("missing field {field}"))),
    }
}

fn required_number(obj: &serde_json::Map<String, Value>, field: &str) -> LedgerResult<f64> {
    match obj.get(field) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| LedgerError::Validation(format!("{field} is out of range"))),
        Some(_) => Err(LedgerError::Validation(format!("{field} must be a number"))),
        None => Err(LedgerError::Validation(format!("missing field {field}"))),
    }
}

// ---------------------------------------------------------------------------
// AppendRequest
// ---------------------------------------------------------------------------

/// `{chain, block_value, block_proof}`
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRequest {
    pub chain: String,
    pub value: BlockValue,
    pub proof: f64,
}

impl AppendRequest {
    /// # Errors
    ///
    /// [`LedgerError::NilBlock`] if the body or `block_value` is null.
    /// [`LedgerError::Validation`] for any missing or mistyped field.
    pub fn from_json(body: &Value) -> LedgerResult<Self> {
        if body.is_null() {
            return Err(LedgerError::NilBlock);
        }
        let obj = object(body)?;

        let chain = required_str(obj, "chain")?;
        validate_chain_name(chain)?;

        let value = match obj.get("block_value") {
            Some(Value::Null) => return Err(LedgerError::NilBlock),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(LedgerError::Validation(
                    "block_value must be an object".to_string(),
                ))
            }
            None => return Err(LedgerError::Validation("missing field block_value".to_string())),
        };

        let proof = required_number(obj, "block_proof")?;

        Ok(Self {
            chain: chain.to_string(),
            value,
            proof,
        })
    }
}

// ---------------------------------------------------------------------------
// RegisterRequest
// ---------------------------------------------------------------------------

/// `{chain_name, chain_owner?}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub chain_name: String,
    pub chain_owner: Option<String>,
}

impl RegisterRequest {
    pub fn from_json(body: &Value) -> LedgerResult<Self> {
        let obj = object(body)?;
        let chain_name = required_str(obj, "chain_name")?;
        validate_chain_name(chain_name)?;

        let chain_owner = match obj.get("chain_owner") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(LedgerError::Validation(
                    "chain_owner must be a string".to_string(),
                ))
            }
        };

        Ok(Self {
            chain_name: chain_name.to_string(),
            chain_owner,
        })
    }
}

// ---------------------------------------------------------------------------
// FindBlockRequest
// ---------------------------------------------------------------------------

/// `{chain_name, hash_value, proof}`
///
/// `hash_value` must be a lowercase hex BLAKE3 digest. Anything else could
/// never match a block, so it is rejected up front.
#[derive(Debug, Clone, PartialEq)]
pub struct FindBlockRequest {
    pub chain_name: String,
    pub hash_value: String,
    pub proof: f64,
}

impl FindBlockRequest {
    pub fn from_json(body: &Value) -> LedgerResult<Self> {
        let obj = object(body)?;
        let chain_name = required_str(obj, "chain_name")?;
        validate_chain_name(chain_name)?;
        let hash_value = required_str(obj, "hash_value")?;
        if !is_digest_hex(hash_value) {
            return Err(LedgerError::Validation(
                "hash_value must be a 64-character lowercase hex digest".to_string(),
            ));
        }
        let proof = required_number(obj, "proof")?;

        Ok(Self {
            chain_name: chain_name.to_string(),
            hash_value: hash_value.to_string(),
            proof,
        })
    }
}
