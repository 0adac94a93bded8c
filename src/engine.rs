// src/engine.rs
//! Two-phase sponsorship: `validate` before execution, `settle` after.
//!
//! `validate` checks the declared maximum cost against the current balance but
//! does not reserve it. Several operations validated before any of them is
//! settled can therefore each pass against funds that cannot cover all of
//! them; `settle` is the point that refuses an overdraft. Callers that batch
//! validations must keep enough headroom in the deposit for the batch.
//!
//! Unsettled contexts are capped and the oldest is evicted first. The cap
//! assumes the transport admits only the settlement authority to `validate`;
//! any other caller able to validate can evict legitimate contexts.

use std::collections::BTreeMap;

use ethers::types::{Bytes, H256, U256};
use tracing::{debug, info, warn};

use crate::error::{DenyReason, PaymasterError};
use crate::events::{EventLog, PaymasterEvent};
use crate::ledger::DepositLedger;
use crate::policy::SponsorshipPolicy;
use crate::types::{PostOpMode, SponsorshipContext, UserOperation, ValidationData};

pub const DEFAULT_MAX_PENDING_CONTEXTS: usize = 4096;

#[derive(Debug)]
pub struct ValidationEngine {
    next_token: u64,
    /// Issued and not yet settled, keyed by token.
    pending: BTreeMap<u64, SponsorshipContext>,
    max_pending: usize,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_CONTEXTS)
    }
}

impl ValidationEngine {
    pub fn new(max_pending: usize) -> Self {
        Self {
            next_token: 0,
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Admission decision. Approves iff the sender and the operation are both
    /// allowlisted and `max_cost` fits in the current balance.
    pub fn validate(
        &mut self,
        policy: &SponsorshipPolicy,
        ledger: &DepositLedger,
        user_op: &UserOperation,
        user_op_hash: H256,
        max_cost: U256,
    ) -> Result<(Bytes, ValidationData), PaymasterError> {
        let sender = user_op.sender;
        let operation = user_op
            .selector()
            .ok_or(PaymasterError::PolicyDenied(DenyReason::MissingSelector))?;

        let (sender_ok, operation_ok) = policy.check(sender, operation);
        if !sender_ok {
            warn!("Denied {:?}: sender not allowlisted", user_op_hash);
            return Err(PaymasterError::PolicyDenied(DenyReason::SenderNotAllowed(
                sender,
            )));
        }
        if !operation_ok {
            warn!("Denied {:?}: operation {} not allowlisted", user_op_hash, operation);
            return Err(PaymasterError::PolicyDenied(
                DenyReason::OperationNotAllowed(operation),
            ));
        }

        ledger.ensure_covers(max_cost).map_err(|e| {
            warn!("Denied {:?}: {}", user_op_hash, e);
            e
        })?;

        let context = SponsorshipContext {
            token: self.next_token,
            user_op_hash,
            sender,
            operation,
            max_cost,
        };
        let encoded = context.encode()?;

        self.next_token += 1;
        self.pending.insert(context.token, context);
        while self.pending.len() > self.max_pending {
            if let Some((evicted, _)) = self.pending.pop_first() {
                warn!("Evicted unsettled sponsorship context {}", evicted);
            }
        }

        debug!(
            "Approved {:?} for {:?} calling {} (max cost {})",
            user_op_hash, sender, operation, max_cost
        );
        Ok((encoded, ValidationData::approved()))
    }

    /// Charges `actual_gas_cost` for a previously validated operation.
    ///
    /// Every settlement mode is charged; the operation consumed gas either way.
    /// A failure here leaves the balance and the pending context untouched.
    /// Returns the remaining balance.
    pub fn settle(
        &mut self,
        ledger: &mut DepositLedger,
        events: &mut EventLog,
        mode: PostOpMode,
        context: &[u8],
        actual_gas_cost: U256,
        actual_user_op_fee_per_gas: U256,
    ) -> Result<U256, PaymasterError> {
        let context = SponsorshipContext::decode(context)?;

        match self.pending.get(&context.token) {
            Some(issued) if *issued == context => {}
            Some(_) => {
                return Err(PaymasterError::InvalidContext(format!(
                    "context {} does not match its validation",
                    context.token
                )));
            }
            None => {
                return Err(PaymasterError::InvalidContext(format!(
                    "context {} is unknown or already settled",
                    context.token
                )));
            }
        }

        if actual_gas_cost > context.max_cost {
            warn!(
                "Settling {:?} above validated max cost ({} > {})",
                context.user_op_hash, actual_gas_cost, context.max_cost
            );
        }

        let remaining = ledger.charge(actual_gas_cost)?;
        self.pending.remove(&context.token);

        events.emit(PaymasterEvent::UserOperationSponsored {
            sender: context.sender,
            operation: context.operation,
            actual_gas_cost,
        });
        info!(
            "Settled {:?} ({:?}) cost {} at {} per gas, balance {}",
            context.user_op_hash, mode, actual_gas_cost, actual_user_op_fee_per_gas, remaining
        );
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::RoleRegistry;
    use crate::types::{pack_halves, Selector};
    use ethers::types::Address;

    const OWNER: u8 = 1;
    const SELECTOR: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn user_op(sender: Address, call_data: &[u8]) -> UserOperation {
        UserOperation {
            sender,
            nonce: U256::zero(),
            init_code: Bytes::default(),
            call_data: Bytes::from(call_data.to_vec()),
            account_gas_limits: pack_halves(0, 0),
            pre_verification_gas: U256::zero(),
            gas_fees: pack_halves(0, 0),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        }
    }

    struct Fixture {
        policy: SponsorshipPolicy,
        ledger: DepositLedger,
        events: EventLog,
        engine: ValidationEngine,
    }

    fn fixture(balance: u64, sender_ok: bool, operation_ok: bool) -> Fixture {
        let access = RoleRegistry::with_owner(addr(OWNER));
        let mut policy = SponsorshipPolicy::default();
        let mut ledger = DepositLedger::default();
        let mut events = EventLog::default();
        if sender_ok {
            policy
                .set_sender_status(&access, addr(OWNER), addr(0xaa), true, &mut events)
                .unwrap();
        }
        if operation_ok {
            policy
                .set_operation_status(&access, addr(OWNER), Selector(SELECTOR), true, &mut events)
                .unwrap();
        }
        ledger
            .deposit(addr(OWNER), U256::from(balance), &mut events)
            .unwrap();
        Fixture {
            policy,
            ledger,
            events,
            engine: ValidationEngine::default(),
        }
    }

    impl Fixture {
        fn validate(&mut self, max_cost: u64) -> Result<(Bytes, ValidationData), PaymasterError> {
            self.engine.validate(
                &self.policy,
                &self.ledger,
                &user_op(addr(0xaa), &SELECTOR),
                H256::repeat_byte(0x01),
                U256::from(max_cost),
            )
        }

        fn settle(&mut self, context: &[u8], cost: u64) -> Result<U256, PaymasterError> {
            self.engine.settle(
                &mut self.ledger,
                &mut self.events,
                PostOpMode::OpSucceeded,
                context,
                U256::from(cost),
                U256::one(),
            )
        }
    }

    #[test]
    fn approval_requires_both_allowlists_and_funds() {
        for sender_ok in [false, true] {
            for operation_ok in [false, true] {
                for (max_cost, fits) in [(100, true), (101, false)] {
                    let mut f = fixture(100, sender_ok, operation_ok);
                    let approved = f.validate(max_cost).is_ok();
                    assert_eq!(
                        approved,
                        sender_ok && operation_ok && fits,
                        "sender_ok={sender_ok} operation_ok={operation_ok} max_cost={max_cost}"
                    );
                }
            }
        }
    }

    #[test]
    fn denial_names_the_failing_check() {
        let mut f = fixture(100, false, true);
        assert_eq!(
            f.validate(10).unwrap_err(),
            PaymasterError::PolicyDenied(DenyReason::SenderNotAllowed(addr(0xaa)))
        );

        let mut f = fixture(100, true, false);
        assert_eq!(
            f.validate(10).unwrap_err(),
            PaymasterError::PolicyDenied(DenyReason::OperationNotAllowed(Selector(SELECTOR)))
        );

        let mut f = fixture(100, true, true);
        assert!(matches!(
            f.validate(150).unwrap_err(),
            PaymasterError::InsufficientFunds { .. }
        ));
    }

    #[test]
    fn short_call_data_is_denied() {
        let mut f = fixture(100, true, true);
        let err = f
            .engine
            .validate(
                &f.policy,
                &f.ledger,
                &user_op(addr(0xaa), &[0x12]),
                H256::zero(),
                U256::one(),
            )
            .unwrap_err();
        assert_eq!(err, PaymasterError::PolicyDenied(DenyReason::MissingSelector));
    }

    #[test]
    fn validation_does_not_touch_balance() {
        let mut f = fixture(100, true, true);
        let (_, data) = f.validate(80).unwrap();
        assert_eq!(data, ValidationData::approved());
        assert_eq!(f.ledger.balance(), U256::from(100));
        assert_eq!(f.engine.pending_count(), 1);
    }

    #[test]
    fn context_settles_exactly_once() {
        let mut f = fixture(100, true, true);
        let (context, _) = f.validate(80).unwrap();

        assert_eq!(f.settle(&context, 80).unwrap(), U256::from(20));
        assert!(matches!(
            f.settle(&context, 80),
            Err(PaymasterError::InvalidContext(_))
        ));
        assert_eq!(f.ledger.balance(), U256::from(20));
    }

    #[test]
    fn failed_settlement_keeps_context_and_balance() {
        let mut f = fixture(100, true, true);
        let (first, _) = f.validate(100).unwrap();
        let (second, _) = f.validate(100).unwrap();

        f.settle(&first, 70).unwrap();
        assert!(matches!(
            f.settle(&second, 70),
            Err(PaymasterError::InsufficientFunds { .. })
        ));
        assert_eq!(f.ledger.balance(), U256::from(30));
        assert_eq!(f.engine.pending_count(), 1);

        f.ledger
            .deposit(addr(OWNER), U256::from(100), &mut f.events)
            .unwrap();
        assert_eq!(f.settle(&second, 70).unwrap(), U256::from(60));
    }

    #[test]
    fn every_mode_is_charged() {
        for mode in [
            PostOpMode::OpSucceeded,
            PostOpMode::OpReverted,
            PostOpMode::PostOpReverted,
        ] {
            let mut f = fixture(100, true, true);
            let (context, _) = f.validate(50).unwrap();
            let remaining = f
                .engine
                .settle(
                    &mut f.ledger,
                    &mut f.events,
                    mode,
                    &context,
                    U256::from(30),
                    U256::one(),
                )
                .unwrap();
            assert_eq!(remaining, U256::from(70));
        }
    }

    #[test]
    fn settlement_emits_sponsored_event() {
        let mut f = fixture(100, true, true);
        let (context, _) = f.validate(50).unwrap();
        f.settle(&context, 42).unwrap();
        let last = f.events.records().last().unwrap();
        assert_eq!(
            last.event,
            PaymasterEvent::UserOperationSponsored {
                sender: addr(0xaa),
                operation: Selector(SELECTOR),
                actual_gas_cost: U256::from(42),
            }
        );
    }

    #[test]
    fn tampered_or_garbage_context_is_rejected() {
        let mut f = fixture(100, true, true);
        let (context, _) = f.validate(10).unwrap();

        let mut forged = SponsorshipContext::decode(&context).unwrap();
        forged.max_cost = U256::from(1_000);
        let forged = forged.encode().unwrap();

        assert!(matches!(
            f.settle(&forged, 5),
            Err(PaymasterError::InvalidContext(_))
        ));
        assert!(matches!(
            f.settle(b"\x00\x01", 5),
            Err(PaymasterError::InvalidContext(_))
        ));
        assert_eq!(f.ledger.balance(), U256::from(100));
    }

    #[test]
    fn oldest_pending_context_is_evicted() {
        let mut f = fixture(100, true, true);
        f.engine = ValidationEngine::new(2);
        let (oldest, _) = f.validate(1).unwrap();
        let (_, _) = f.validate(1).unwrap();
        let (newest, _) = f.validate(1).unwrap();

        assert_eq!(f.engine.pending_count(), 2);
        assert!(matches!(
            f.settle(&oldest, 1),
            Err(PaymasterError::InvalidContext(_))
        ));
        assert!(f.settle(&newest, 1).is_ok());
    }
}
