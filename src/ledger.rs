// src/ledger.rs
//! Prepaid deposit and timelocked stake held with the settlement authority.
//!
//! The two pools never mix: the deposit pays for sponsored gas, the stake is
//! collateral whose withdrawal is gated by `unstake_delay_sec`.

use ethers::types::{Address, U256};
use tracing::{debug, info};

use crate::access::{require_authorized, AccessControl, AdminAction};
use crate::error::PaymasterError;
use crate::events::{EventLog, PaymasterEvent};
use crate::types::StakeInfo;

#[derive(Debug, Default)]
pub struct DepositLedger {
    balance: U256,
    stake: StakeInfo,
}

impl DepositLedger {
    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn stake_info(&self) -> StakeInfo {
        self.stake
    }

    /// Credits `amount`; open to anyone.
    pub fn deposit(
        &mut self,
        from: Address,
        amount: U256,
        events: &mut EventLog,
    ) -> Result<U256, PaymasterError> {
        let total_deposit = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| PaymasterError::InvalidParameters("deposit overflow".to_string()))?;
        self.balance = total_deposit;
        events.emit(PaymasterEvent::Deposited {
            from,
            amount,
            total_deposit,
        });
        Ok(total_deposit)
    }

    pub fn withdraw_to(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        to: Address,
        amount: U256,
        events: &mut EventLog,
    ) -> Result<(), PaymasterError> {
        require_authorized(access, caller, AdminAction::Withdraw)?;
        self.ensure_covers(amount)?;

        self.balance -= amount;
        events.emit(PaymasterEvent::Withdrawn { to, amount });
        info!("Withdrew {} to {:?}, balance now {}", amount, to, self.balance);
        Ok(())
    }

    /// Fails with `InsufficientFunds` if `amount` exceeds the balance.
    pub fn ensure_covers(&self, amount: U256) -> Result<(), PaymasterError> {
        if amount > self.balance {
            return Err(PaymasterError::InsufficientFunds {
                required: amount,
                available: self.balance,
            });
        }
        Ok(())
    }

    /// Deducts settled gas. Returns the remaining balance.
    pub fn charge(&mut self, amount: U256) -> Result<U256, PaymasterError> {
        self.ensure_covers(amount)?;
        self.balance -= amount;
        debug!("Charged {}, balance now {}", amount, self.balance);
        Ok(self.balance)
    }

    /// Adds `amount` to the stake and sets the unstake delay. Re-locks a pending unlock.
    pub fn add_stake(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        amount: U256,
        unstake_delay_sec: u64,
        events: &mut EventLog,
    ) -> Result<(), PaymasterError> {
        require_authorized(access, caller, AdminAction::AddStake)?;

        if unstake_delay_sec == 0 {
            return Err(PaymasterError::InvalidParameters(
                "must specify unstake delay".to_string(),
            ));
        }
        if unstake_delay_sec < self.stake.unstake_delay_sec {
            return Err(PaymasterError::StakeDelayTooShort {
                requested: unstake_delay_sec,
                current: self.stake.unstake_delay_sec,
            });
        }
        let total_staked = self
            .stake
            .amount
            .checked_add(amount)
            .ok_or_else(|| PaymasterError::InvalidParameters("stake overflow".to_string()))?;
        if total_staked.is_zero() {
            return Err(PaymasterError::InvalidParameters(
                "no stake specified".to_string(),
            ));
        }

        self.stake = StakeInfo {
            amount: total_staked,
            unstake_delay_sec,
            unlock_time: None,
        };
        events.emit(PaymasterEvent::StakeLocked {
            total_staked,
            unstake_delay_sec,
        });
        Ok(())
    }

    /// Starts the unlock timer. Returns the earliest withdrawal time.
    pub fn unlock_stake(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        now: u64,
        events: &mut EventLog,
    ) -> Result<u64, PaymasterError> {
        require_authorized(access, caller, AdminAction::UnlockStake)?;

        if self.stake.amount.is_zero() {
            return Err(PaymasterError::NoStake);
        }
        if let Some(pending) = self.stake.unlock_time {
            return Err(PaymasterError::StakeAlreadyUnlocking(pending));
        }
        let withdraw_time = now
            .checked_add(self.stake.unstake_delay_sec)
            .ok_or_else(|| PaymasterError::InvalidParameters("unlock time overflow".to_string()))?;

        self.stake.unlock_time = Some(withdraw_time);
        events.emit(PaymasterEvent::StakeUnlocked { withdraw_time });
        Ok(withdraw_time)
    }

    /// Pays out the whole stake once the timer has elapsed and resets the record.
    pub fn withdraw_stake(
        &mut self,
        access: &dyn AccessControl,
        caller: Address,
        to: Address,
        now: u64,
        events: &mut EventLog,
    ) -> Result<U256, PaymasterError> {
        require_authorized(access, caller, AdminAction::WithdrawStake)?;

        let amount = self.stake.amount;
        if amount.is_zero() {
            return Err(PaymasterError::NoStake);
        }
        match self.stake.unlock_time {
            Some(unlock_time) if unlock_time <= now => {}
            unlock_time => {
                return Err(PaymasterError::StakeTimelockNotElapsed { unlock_time, now });
            }
        }

        self.stake = StakeInfo::default();
        events.emit(PaymasterEvent::StakeWithdrawn { to, amount });
        info!("Stake of {} withdrawn to {:?}", amount, to);
        Ok(amount)
    }
}
