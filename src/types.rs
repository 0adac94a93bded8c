// src/types.rs
use std::fmt;
use std::str::FromStr;

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PaymasterError;

/// Four-byte tag naming the class of action a user operation invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    /// Leading four bytes of `call_data`, if there are that many.
    pub fn from_call_data(call_data: &[u8]) -> Option<Self> {
        let head: [u8; 4] = call_data.get(..4)?.try_into().ok()?;
        Some(Selector(head))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Selector {
    type Err = PaymasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(digits)
            .map_err(|e| PaymasterError::InvalidParameters(format!("selector {s}: {e}")))?;
        let bytes: [u8; 4] = raw.try_into().map_err(|_| {
            PaymasterError::InvalidParameters(format!("selector {s} is not 4 bytes"))
        })?;
        Ok(Selector(bytes))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Packed user operation as submitted by the settlement authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    /// verificationGasLimit (high 16 bytes) | callGasLimit (low 16 bytes)
    pub account_gas_limits: H256,
    pub pre_verification_gas: U256,
    /// maxPriorityFeePerGas (high 16 bytes) | maxFeePerGas (low 16 bytes)
    pub gas_fees: H256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

fn high_half(word: &H256) -> U256 {
    U256::from_big_endian(&word.as_bytes()[..16])
}

fn low_half(word: &H256) -> U256 {
    U256::from_big_endian(&word.as_bytes()[16..])
}

/// Packs two 128-bit values into one word, `high` first.
pub fn pack_halves(high: u128, low: u128) -> H256 {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&high.to_be_bytes());
    word[16..].copy_from_slice(&low.to_be_bytes());
    H256::from(word)
}

impl UserOperation {
    pub fn selector(&self) -> Option<Selector> {
        Selector::from_call_data(&self.call_data)
    }

    pub fn verification_gas_limit(&self) -> U256 {
        high_half(&self.account_gas_limits)
    }

    pub fn call_gas_limit(&self) -> U256 {
        low_half(&self.account_gas_limits)
    }

    pub fn max_priority_fee_per_gas(&self) -> U256 {
        high_half(&self.gas_fees)
    }

    pub fn max_fee_per_gas(&self) -> U256 {
        low_half(&self.gas_fees)
    }

    pub fn paymaster_verification_gas_limit(&self) -> U256 {
        self.paymaster_word(20)
    }

    pub fn paymaster_post_op_gas_limit(&self) -> U256 {
        self.paymaster_word(36)
    }

    fn paymaster_word(&self, offset: usize) -> U256 {
        self.paymaster_and_data
            .get(offset..offset + 16)
            .map(U256::from_big_endian)
            .unwrap_or_default()
    }

    /// Worst-case cost of the operation: every gas limit at the buffered max fee.
    pub fn max_gas_cost(&self, gas_price_buffer: u64) -> Result<U256, PaymasterError> {
        let total_gas = self
            .verification_gas_limit()
            .checked_add(self.call_gas_limit())
            .and_then(|sum| sum.checked_add(self.paymaster_verification_gas_limit()))
            .and_then(|sum| sum.checked_add(self.paymaster_post_op_gas_limit()))
            .and_then(|sum| sum.checked_add(self.pre_verification_gas))
            .ok_or_else(|| PaymasterError::InvalidUserOperation("Gas limit overflow".to_string()))?;

        let buffered_gas_price = self
            .max_fee_per_gas()
            .checked_mul(U256::from(100) + U256::from(gas_price_buffer))
            .and_then(|product| product.checked_div(U256::from(100)))
            .ok_or_else(|| {
                PaymasterError::InvalidUserOperation("Gas price calculation error".to_string())
            })?;

        total_gas.checked_mul(buffered_gas_price).ok_or_else(|| {
            PaymasterError::InvalidUserOperation("Max cost calculation overflow".to_string())
        })
    }
}

/// Outcome of the executed operation as reported to `settle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostOpMode {
    OpSucceeded,
    OpReverted,
    PostOpReverted,
}

/// Admission result handed back to the settlement authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationData {
    pub sig_failed: bool,
    /// Zero means no upper bound.
    pub valid_until: u64,
    pub valid_after: u64,
}

impl ValidationData {
    pub fn approved() -> Self {
        Self::default()
    }

    /// `sigFailed (160 bits) | validUntil (48 bits) | validAfter (48 bits)`
    pub fn pack(&self) -> U256 {
        let mut packed = U256::from(self.sig_failed as u8);
        packed |= U256::from(self.valid_until) << 160;
        packed |= U256::from(self.valid_after) << 208;
        packed
    }
}

/// Everything `settle` needs, minted by `validate` and consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipContext {
    pub token: u64,
    pub user_op_hash: H256,
    pub sender: Address,
    pub operation: Selector,
    pub max_cost: U256,
}

impl SponsorshipContext {
    pub fn encode(&self) -> Result<Bytes, PaymasterError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| PaymasterError::InvalidContext(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, PaymasterError> {
        serde_json::from_slice(raw).map_err(|e| PaymasterError::InvalidContext(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterResponse {
    pub context: Bytes,
    pub validation_data: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeInfo {
    pub amount: U256,
    pub unstake_delay_sec: u64,
    /// Set once `unlock_stake` has started the timer.
    pub unlock_time: Option<u64>,
}
