// src/paymaster.rs
use std::sync::Arc;

use ethers::types::{Address, Bytes, H256, U256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::access::AccessControl;
use crate::clock::Clock;
use crate::config::PaymasterConfig;
use crate::engine::ValidationEngine;
use crate::error::PaymasterError;
use crate::events::{EventLog, EventRecord};
use crate::ledger::DepositLedger;
use crate::policy::SponsorshipPolicy;
use crate::types::{PaymasterResponse, PostOpMode, Selector, StakeInfo, UserOperation};

#[derive(Debug)]
struct PaymasterState {
    policy: SponsorshipPolicy,
    ledger: DepositLedger,
    engine: ValidationEngine,
    events: EventLog,
}

/// Sponsorship service. Every call runs under one lock acquisition, so readers
/// only ever see the state before or after a call.
pub struct Paymaster {
    access: Arc<dyn AccessControl>,
    clock: Arc<dyn Clock>,
    gas_price_buffer: u64,
    state: RwLock<PaymasterState>,
}

impl Paymaster {
    pub fn new(
        config: &PaymasterConfig,
        access: Arc<dyn AccessControl>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            "Initialized paymaster (max pending contexts: {}, gas price buffer: {}%)",
            config.max_pending_contexts, config.gas_price_buffer
        );

        Self {
            access,
            clock,
            gas_price_buffer: config.gas_price_buffer,
            state: RwLock::new(PaymasterState {
                policy: SponsorshipPolicy::default(),
                ledger: DepositLedger::default(),
                engine: ValidationEngine::new(config.max_pending_contexts),
                events: EventLog::default(),
            }),
        }
    }

    /// Pre-execution admission. When `max_cost` is omitted it is derived from
    /// the operation's own gas limits and max fee.
    pub async fn validate_paymaster_user_op(
        &self,
        user_op: &UserOperation,
        user_op_hash: H256,
        max_cost: Option<U256>,
    ) -> Result<PaymasterResponse, PaymasterError> {
        let max_cost = match max_cost {
            Some(cost) => cost,
            None => user_op.max_gas_cost(self.gas_price_buffer)?,
        };

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let (context, validation_data) = state.engine.validate(
            &state.policy,
            &state.ledger,
            user_op,
            user_op_hash,
            max_cost,
        )?;

        Ok(PaymasterResponse {
            context,
            validation_data: validation_data.pack(),
        })
    }

    /// Post-execution accounting. Returns the remaining deposit.
    pub async fn post_op(
        &self,
        mode: PostOpMode,
        context: &Bytes,
        actual_gas_cost: U256,
        actual_user_op_fee_per_gas: U256,
    ) -> Result<U256, PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.engine.settle(
            &mut state.ledger,
            &mut state.events,
            mode,
            context,
            actual_gas_cost,
            actual_user_op_fee_per_gas,
        )
    }

    pub async fn deposit(&self, from: Address, amount: U256) -> Result<U256, PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.ledger.deposit(from, amount, &mut state.events)
    }

    pub async fn get_deposit(&self) -> U256 {
        self.state.read().await.ledger.balance()
    }

    pub async fn get_stake_info(&self) -> StakeInfo {
        self.state.read().await.ledger.stake_info()
    }

    pub async fn is_sender_allowed(&self, sender: Address) -> bool {
        let allowed = self.state.read().await.policy.is_sender_allowed(sender);
        debug!("isSenderAllowed({:?}) = {}", sender, allowed);
        allowed
    }

    pub async fn is_operation_allowed(&self, operation: Selector) -> bool {
        let allowed = self.state.read().await.policy.is_operation_allowed(operation);
        debug!("isOperationAllowed({}) = {}", operation, allowed);
        allowed
    }

    pub async fn set_sender_status(
        &self,
        caller: Address,
        sender: Address,
        allowed: bool,
    ) -> Result<(), PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state
            .policy
            .set_sender_status(self.access.as_ref(), caller, sender, allowed, &mut state.events)
    }

    pub async fn set_operation_status(
        &self,
        caller: Address,
        operation: Selector,
        allowed: bool,
    ) -> Result<(), PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.policy.set_operation_status(
            self.access.as_ref(),
            caller,
            operation,
            allowed,
            &mut state.events,
        )
    }

    pub async fn set_batch_sender_status(
        &self,
        caller: Address,
        senders: &[Address],
        allowed: bool,
    ) -> Result<(), PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.policy.set_batch_sender_status(
            self.access.as_ref(),
            caller,
            senders,
            allowed,
            &mut state.events,
        )
    }

    pub async fn set_batch_operation_status(
        &self,
        caller: Address,
        operations: &[Selector],
        allowed: bool,
    ) -> Result<(), PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.policy.set_batch_operation_status(
            self.access.as_ref(),
            caller,
            operations,
            allowed,
            &mut state.events,
        )
    }

    pub async fn add_stake(
        &self,
        caller: Address,
        amount: U256,
        unstake_delay_sec: u64,
    ) -> Result<(), PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.ledger.add_stake(
            self.access.as_ref(),
            caller,
            amount,
            unstake_delay_sec,
            &mut state.events,
        )
    }

    /// Returns the time at which the stake becomes withdrawable.
    pub async fn unlock_stake(&self, caller: Address) -> Result<u64, PaymasterError> {
        let now = self.clock.now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state
            .ledger
            .unlock_stake(self.access.as_ref(), caller, now, &mut state.events)
    }

    pub async fn withdraw_stake(&self, caller: Address, to: Address) -> Result<U256, PaymasterError> {
        let now = self.clock.now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state
            .ledger
            .withdraw_stake(self.access.as_ref(), caller, to, now, &mut state.events)
    }

    pub async fn withdraw_to(
        &self,
        caller: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), PaymasterError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state
            .ledger
            .withdraw_to(self.access.as_ref(), caller, to, amount, &mut state.events)
    }

    pub async fn events_since(&self, from: u64) -> Vec<EventRecord> {
        self.state.read().await.events.events_since(from).to_vec()
    }
}
