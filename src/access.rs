// src/access.rs
//! Authorization oracle consulted before every administrative mutation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use ethers::types::Address;
use tracing::{debug, info, warn};

use crate::error::PaymasterError;

/// Administrative actions that require a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminAction {
    SetSenderStatus,
    SetOperationStatus,
    AddStake,
    UnlockStake,
    WithdrawStake,
    Withdraw,
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdminAction::SetSenderStatus => "setSenderStatus",
            AdminAction::SetOperationStatus => "setOperationStatus",
            AdminAction::AddStake => "addStake",
            AdminAction::UnlockStake => "unlockStake",
            AdminAction::WithdrawStake => "withdrawStake",
            AdminAction::Withdraw => "withdrawTo",
        };
        f.write_str(name)
    }
}

/// Answers whether `principal` may perform `action`. Must be side-effect free.
pub trait AccessControl: Send + Sync {
    fn is_authorized(&self, principal: Address, action: AdminAction) -> bool;
}

/// Fails closed with [`PaymasterError::Unauthorized`] unless `caller` may perform `action`.
pub fn require_authorized(
    access: &dyn AccessControl,
    caller: Address,
    action: AdminAction,
) -> Result<(), PaymasterError> {
    if access.is_authorized(caller, action) {
        Ok(())
    } else {
        warn!("Rejected {} from unauthorized caller {:?}", action, caller);
        Err(PaymasterError::Unauthorized {
            principal: caller,
            action,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Every administrative action
    Owner,
    /// Sender and operation allowlists
    PolicyAdmin,
    /// Stake and deposit withdrawal
    Treasurer,
}

impl Role {
    pub fn permits(&self, action: AdminAction) -> bool {
        match (self, action) {
            (Role::Owner, _) => true,
            (Role::PolicyAdmin, AdminAction::SetSenderStatus)
            | (Role::PolicyAdmin, AdminAction::SetOperationStatus) => true,
            (Role::Treasurer, AdminAction::AddStake)
            | (Role::Treasurer, AdminAction::UnlockStake)
            | (Role::Treasurer, AdminAction::WithdrawStake)
            | (Role::Treasurer, AdminAction::Withdraw) => true,
            _ => false,
        }
    }
}

/// In-process role table backing [`AccessControl`].
#[derive(Debug, Default)]
pub struct RoleRegistry {
    roles: RwLock<HashMap<Address, HashSet<Role>>>,
}

impl RoleRegistry {
    pub fn with_owner(owner: Address) -> Self {
        let registry = Self::default();
        registry.grant(owner, Role::Owner);
        registry
    }

    pub fn grant(&self, principal: Address, role: Role) {
        let mut roles = self.roles.write().unwrap_or_else(|e| e.into_inner());
        if roles.entry(principal).or_default().insert(role) {
            info!("Granted {:?} to {:?}", role, principal);
        }
    }

    pub fn revoke(&self, principal: Address, role: Role) {
        let mut roles = self.roles.write().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = roles.get_mut(&principal) {
            if held.remove(&role) {
                info!("Revoked {:?} from {:?}", role, principal);
            }
        }
    }
}

impl AccessControl for RoleRegistry {
    fn is_authorized(&self, principal: Address, action: AdminAction) -> bool {
        let roles = self.roles.read().unwrap_or_else(|e| e.into_inner());
        let allowed = roles
            .get(&principal)
            .map(|held| held.iter().any(|role| role.permits(action)))
            .unwrap_or(false);
        debug!("Authorization {:?} / {} -> {}", principal, action, allowed);
        allowed
    }
}
