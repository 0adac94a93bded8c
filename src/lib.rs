//! Gas-sponsorship paymaster: allowlist policy, deposit and stake ledger, and
//! the validate / settle protocol driven by the settlement authority.

pub mod access;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod paymaster;
pub mod policy;
pub mod rpc;
pub mod types;

pub use crate::access::{AccessControl, AdminAction, Role, RoleRegistry};
pub use crate::error::{DenyReason, PaymasterError};
pub use crate::paymaster::Paymaster;
