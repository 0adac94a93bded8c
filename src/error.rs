// src/error.rs
use ethers::types::{Address, U256};
use thiserror::Error;

use crate::access::AdminAction;
use crate::types::Selector;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymasterError {
    #[error("Unauthorized: {principal:?} may not perform {action}")]
    Unauthorized { principal: Address, action: AdminAction },

    #[error("Policy denied: {0}")]
    PolicyDenied(DenyReason),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: U256, available: U256 },

    #[error("Stake timelock not elapsed (unlock time: {unlock_time:?}, now: {now})")]
    StakeTimelockNotElapsed { unlock_time: Option<u64>, now: u64 },

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("Unstake delay too short: requested {requested}s, configured {current}s")]
    StakeDelayTooShort { requested: u64, current: u64 },

    #[error("No stake present")]
    NoStake,

    #[error("Stake unlock already pending until {0}")]
    StakeAlreadyUnlocking(u64),

    #[error("Invalid UserOperation: {0}")]
    InvalidUserOperation(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Why `validate` refused to sponsor an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    #[error("sender {0:?} is not allowlisted")]
    SenderNotAllowed(Address),

    #[error("operation {0} is not allowlisted")]
    OperationNotAllowed(Selector),

    #[error("call data carries no operation selector")]
    MissingSelector,
}

impl PaymasterError {
    /// Stable JSON-RPC error code for this error kind.
    pub fn code(&self) -> i32 {
        match self {
            PaymasterError::Unauthorized { .. } => -32001,
            PaymasterError::PolicyDenied(_) => -32002,
            PaymasterError::InsufficientFunds { .. } => -32003,
            PaymasterError::StakeTimelockNotElapsed { .. } => -32004,
            PaymasterError::InvalidContext(_) => -32005,
            PaymasterError::StakeDelayTooShort { .. }
            | PaymasterError::NoStake
            | PaymasterError::StakeAlreadyUnlocking(_) => -32006,
            PaymasterError::InvalidUserOperation(_) => -32007,
            PaymasterError::InvalidParameters(_) => -32602,
        }
    }
}
