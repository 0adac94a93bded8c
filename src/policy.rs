// src/policy.rs
//! Sender and operation allowlists. Both are default-deny.

use std::collections::HashMap;
use std::hash::Hash;

use ethers::types::Address;
use tracing::{debug, info};

use crate::access::{require_authorized, AccessControl, AdminAction};
use crate::error::PaymasterError;
use crate::events::{EventLog, PaymasterEvent};
use crate::types::Selector;

/// Sparse boolean map where an absent key reads as `false`.
#[derive(Debug, Clone)]
pub struct Allowlist<K> {
    entries: HashMap<K, bool>,
}

impl<K> Default for Allowlist<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy> Allowlist<K> {
    pub fn is_allowed(&self, key: &K) -> bool {
        self.entries.get(key).copied().unwrap_or(false)
    }

    pub fn set(&mut self, key: K, allowed: bool) {
        self.entries.insert(key, allowed);
    }

    /// Keys currently set to `true`.
    pub fn allowed_keys(&self) -> impl Iterator<Item = &K> {
        self.entries
            .iter()
            .filter_map(|(key, allowed)| allowed.then_some(key))
    }
}

#[derive(Debug, Default)]
pub struct SponsorshipPolicy {
    allowed_senders: Allowlist<Address>,
    allowed_operations: Allowlist<Selector>,
}

impl SponsorshipPolicy {
    pub fn is_sender_allowed(&self, sender: Address) -> bool {
        self.allowed_senders.is_allowed(&sender)
    }

    pub fn is_operation_allowed(&self, operation: Selector) -> bool {
        self.allowed_operations.is_allowed(&operation)
    }

    pub fn allowed_operations(&self) -> &Allowlist<Selector> {
        &self.allowed_operations
    }

    pub fn set_sender_status(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        sender: Address,
        allowed: bool,
        events: &mut EventLog,
    ) -> Result<(), PaymasterError> {
        self.set_batch_sender_status(access, caller, &[sender], allowed, events)
    }

    pub fn set_operation_status(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        operation: Selector,
        allowed: bool,
        events: &mut EventLog,
    ) -> Result<(), PaymasterError> {
        self.set_batch_operation_status(access, caller, &[operation], allowed, events)
    }

    /// Authorization is checked once, before any entry is written.
    pub fn set_batch_sender_status(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        senders: &[Address],
        allowed: bool,
        events: &mut EventLog,
    ) -> Result<(), PaymasterError> {
        require_authorized(access, caller, AdminAction::SetSenderStatus)?;

        for &sender in senders {
            self.allowed_senders.set(sender, allowed);
            events.emit(PaymasterEvent::SenderStatusUpdated { sender, allowed });
        }
        info!(
            "{:?} set {} sender(s) to allowed={}",
            caller,
            senders.len(),
            allowed
        );
        Ok(())
    }

    /// Authorization is checked once, before any entry is written.
    pub fn set_batch_operation_status(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        operations: &[Selector],
        allowed: bool,
        events: &mut EventLog,
    ) -> Result<(), PaymasterError> {
        require_authorized(access, caller, AdminAction::SetOperationStatus)?;

        for &operation in operations {
            self.allowed_operations.set(operation, allowed);
            events.emit(PaymasterEvent::OperationStatusUpdated { operation, allowed });
        }
        info!(
            "{:?} set {} operation(s) to allowed={}",
            caller,
            operations.len(),
            allowed
        );
        Ok(())
    }

    /// Conjunctive check used at validation time.
    pub fn check(&self, sender: Address, operation: Selector) -> (bool, bool) {
        let sender_ok = self.is_sender_allowed(sender);
        let operation_ok = self.is_operation_allowed(operation);
        debug!(
            "Policy check sender={:?} ({}) operation={} ({})",
            sender, sender_ok, operation, operation_ok
        );
        (sender_ok, operation_ok)
    }
}
