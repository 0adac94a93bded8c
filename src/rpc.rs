// src/rpc.rs
use std::sync::Arc;

use ethers::types::{Address, Bytes, H256, U256};
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::ErrorObject;
use tracing::{debug, error};

use crate::error::PaymasterError;
use crate::events::EventRecord;
use crate::paymaster::Paymaster;
use crate::types::{PaymasterResponse, PostOpMode, Selector, StakeInfo, UserOperation};

// Define the RPC interface
#[rpc(server, namespace = "pm")]
pub trait PaymasterRpc {
    /// Admission check called by the settlement authority before execution
    #[method(name = "validatePaymasterUserOp")]
    async fn validate_paymaster_user_op(
        &self,
        user_op: UserOperation,
        user_op_hash: H256,
        max_cost: Option<U256>,
    ) -> RpcResult<PaymasterResponse>;

    /// Settlement called by the settlement authority after execution
    #[method(name = "postOp")]
    async fn post_op(
        &self,
        mode: PostOpMode,
        sponsorship_context: Bytes,
        actual_gas_cost: U256,
        actual_user_op_fee_per_gas: U256,
    ) -> RpcResult<U256>;

    #[method(name = "deposit")]
    async fn deposit(&self, from: Address, amount: U256) -> RpcResult<U256>;

    #[method(name = "getDeposit")]
    async fn get_deposit(&self) -> RpcResult<U256>;

    #[method(name = "getStakeInfo")]
    async fn get_stake_info(&self) -> RpcResult<StakeInfo>;

    #[method(name = "isSenderAllowed")]
    async fn is_sender_allowed(&self, sender: Address) -> RpcResult<bool>;

    #[method(name = "isOperationAllowed")]
    async fn is_operation_allowed(&self, operation: Selector) -> RpcResult<bool>;

    #[method(name = "setSenderStatus")]
    async fn set_sender_status(
        &self,
        caller: Address,
        sender: Address,
        allowed: bool,
    ) -> RpcResult<()>;

    #[method(name = "setOperationStatus")]
    async fn set_operation_status(
        &self,
        caller: Address,
        operation: Selector,
        allowed: bool,
    ) -> RpcResult<()>;

    #[method(name = "setBatchSenderStatus")]
    async fn set_batch_sender_status(
        &self,
        caller: Address,
        senders: Vec<Address>,
        allowed: bool,
    ) -> RpcResult<()>;

    #[method(name = "setBatchOperationStatus")]
    async fn set_batch_operation_status(
        &self,
        caller: Address,
        operations: Vec<Selector>,
        allowed: bool,
    ) -> RpcResult<()>;

    #[method(name = "addStake")]
    async fn add_stake(
        &self,
        caller: Address,
        amount: U256,
        unstake_delay_sec: u64,
    ) -> RpcResult<()>;

    /// Returns the earliest withdrawal time
    #[method(name = "unlockStake")]
    async fn unlock_stake(&self, caller: Address) -> RpcResult<u64>;

    #[method(name = "withdrawStake")]
    async fn withdraw_stake(&self, caller: Address, to: Address) -> RpcResult<U256>;

    #[method(name = "withdrawTo")]
    async fn withdraw_to(&self, caller: Address, to: Address, amount: U256) -> RpcResult<()>;

    /// Audit events with sequence number >= `from`
    #[method(name = "getEvents")]
    async fn get_events(&self, from: u64) -> RpcResult<Vec<EventRecord>>;
}

pub struct PaymasterRpcImpl {
    paymaster: Arc<Paymaster>,
}

impl PaymasterRpcImpl {
    pub fn new(paymaster: Arc<Paymaster>) -> Self {
        Self { paymaster }
    }
}

fn respond<T>(method: &str, result: Result<T, PaymasterError>) -> RpcResult<T> {
    result.map_err(|e| {
        error!("{} failed: {}", method, e);
        ErrorObject::owned(e.code(), format!("Paymaster error: {}", e), None::<()>).into()
    })
}

#[async_trait]
impl PaymasterRpcServer for PaymasterRpcImpl {
    async fn validate_paymaster_user_op(
        &self,
        user_op: UserOperation,
        user_op_hash: H256,
        max_cost: Option<U256>,
    ) -> RpcResult<PaymasterResponse> {
        debug!("Received validation request for sender: {:?}", user_op.sender);
        let result = self
            .paymaster
            .validate_paymaster_user_op(&user_op, user_op_hash, max_cost)
            .await;
        respond("pm_validatePaymasterUserOp", result)
    }

    async fn post_op(
        &self,
        mode: PostOpMode,
        sponsorship_context: Bytes,
        actual_gas_cost: U256,
        actual_user_op_fee_per_gas: U256,
    ) -> RpcResult<U256> {
        let result = self
            .paymaster
            .post_op(
                mode,
                &sponsorship_context,
                actual_gas_cost,
                actual_user_op_fee_per_gas,
            )
            .await;
        respond("pm_postOp", result)
    }

    async fn deposit(&self, from: Address, amount: U256) -> RpcResult<U256> {
        respond("pm_deposit", self.paymaster.deposit(from, amount).await)
    }

    async fn get_deposit(&self) -> RpcResult<U256> {
        Ok(self.paymaster.get_deposit().await)
    }

    async fn get_stake_info(&self) -> RpcResult<StakeInfo> {
        Ok(self.paymaster.get_stake_info().await)
    }

    async fn is_sender_allowed(&self, sender: Address) -> RpcResult<bool> {
        Ok(self.paymaster.is_sender_allowed(sender).await)
    }

    async fn is_operation_allowed(&self, operation: Selector) -> RpcResult<bool> {
        Ok(self.paymaster.is_operation_allowed(operation).await)
    }

    async fn set_sender_status(
        &self,
        caller: Address,
        sender: Address,
        allowed: bool,
    ) -> RpcResult<()> {
        let result = self
            .paymaster
            .set_sender_status(caller, sender, allowed)
            .await;
        respond("pm_setSenderStatus", result)
    }

    async fn set_operation_status(
        &self,
        caller: Address,
        operation: Selector,
        allowed: bool,
    ) -> RpcResult<()> {
        let result = self
            .paymaster
            .set_operation_status(caller, operation, allowed)
            .await;
        respond("pm_setOperationStatus", result)
    }

    async fn set_batch_sender_status(
        &self,
        caller: Address,
        senders: Vec<Address>,
        allowed: bool,
    ) -> RpcResult<()> {
        let result = self
            .paymaster
            .set_batch_sender_status(caller, &senders, allowed)
            .await;
        respond("pm_setBatchSenderStatus", result)
    }

    async fn set_batch_operation_status(
        &self,
        caller: Address,
        operations: Vec<Selector>,
        allowed: bool,
    ) -> RpcResult<()> {
        let result = self
            .paymaster
            .set_batch_operation_status(caller, &operations, allowed)
            .await;
        respond("pm_setBatchOperationStatus", result)
    }

    async fn add_stake(
        &self,
        caller: Address,
        amount: U256,
        unstake_delay_sec: u64,
    ) -> RpcResult<()> {
        let result = self
            .paymaster
            .add_stake(caller, amount, unstake_delay_sec)
            .await;
        respond("pm_addStake", result)
    }

    async fn unlock_stake(&self, caller: Address) -> RpcResult<u64> {
        respond("pm_unlockStake", self.paymaster.unlock_stake(caller).await)
    }

    async fn withdraw_stake(&self, caller: Address, to: Address) -> RpcResult<U256> {
        respond(
            "pm_withdrawStake",
            self.paymaster.withdraw_stake(caller, to).await,
        )
    }

    async fn withdraw_to(&self, caller: Address, to: Address, amount: U256) -> RpcResult<()> {
        respond(
            "pm_withdrawTo",
            self.paymaster.withdraw_to(caller, to, amount).await,
        )
    }

    async fn get_events(&self, from: u64) -> RpcResult<Vec<EventRecord>> {
        Ok(self.paymaster.events_since(from).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::RoleRegistry;
    use crate::clock::ManualClock;
    use crate::config::PaymasterConfig;
    use crate::types::pack_halves;
    use jsonrpsee::core::params::ArrayParams;

    macro_rules! params {
        ($($value:expr),* $(,)?) => {{
            #[allow(unused_mut)]
            let mut params = ArrayParams::new();
            $(params.insert($value).unwrap();)*
            params
        }};
    }

    const OWNER: u8 = 1;

    fn module() -> jsonrpsee::RpcModule<PaymasterRpcImpl> {
        let paymaster = Paymaster::new(
            &PaymasterConfig::default(),
            Arc::new(RoleRegistry::with_owner(Address::repeat_byte(OWNER))),
            Arc::new(ManualClock::new(0)),
        );
        PaymasterRpcImpl::new(Arc::new(paymaster)).into_rpc()
    }

    #[tokio::test]
    async fn deposit_then_query_over_rpc() {
        let module = module();
        let total: U256 = module
            .call("pm_deposit", params![Address::repeat_byte(5), U256::from(42)])
            .await
            .unwrap();
        assert_eq!(total, U256::from(42));

        let balance: U256 = module.call("pm_getDeposit", params![]).await.unwrap();
        assert_eq!(balance, U256::from(42));
    }

    #[tokio::test]
    async fn selectors_travel_as_hex_strings() {
        let module = module();
        let _: () = module
            .call(
                "pm_setOperationStatus",
                params![Address::repeat_byte(OWNER), "0x12345678", true],
            )
            .await
            .unwrap();

        let allowed: bool = module
            .call("pm_isOperationAllowed", params!["0x12345678"])
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn unauthorized_caller_gets_an_error() {
        let module = module();
        let stranger = Address::repeat_byte(9);
        let result: Result<(), _> = module
            .call(
                "pm_setSenderStatus",
                params![stranger, Address::repeat_byte(0xaa), true],
            )
            .await;
        assert!(result.is_err());

        let allowed: bool = module
            .call("pm_isSenderAllowed", params![Address::repeat_byte(0xaa)])
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn validate_and_post_op_over_rpc() {
        let module = module();
        let owner = Address::repeat_byte(OWNER);
        let sender = Address::repeat_byte(0xaa);
        let _: () = module
            .call("pm_setSenderStatus", params![owner, sender, true])
            .await
            .unwrap();
        let _: () = module
            .call("pm_setOperationStatus", params![owner, "0x12345678", true])
            .await
            .unwrap();
        let _: U256 = module
            .call("pm_deposit", params![owner, U256::from(100)])
            .await
            .unwrap();

        let op = UserOperation {
            sender,
            nonce: U256::zero(),
            init_code: Bytes::default(),
            call_data: Bytes::from(vec![0x12, 0x34, 0x56, 0x78]),
            account_gas_limits: pack_halves(0, 0),
            pre_verification_gas: U256::zero(),
            gas_fees: pack_halves(0, 0),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        };
        let response: PaymasterResponse = module
            .call(
                "pm_validatePaymasterUserOp",
                params![op, H256::zero(), U256::from(80)],
            )
            .await
            .unwrap();
        assert!(response.validation_data.is_zero());

        let remaining: U256 = module
            .call(
                "pm_postOp",
                params![
                    PostOpMode::OpSucceeded,
                    response.context.clone(),
                    U256::from(80),
                    U256::one()
                ],
            )
            .await
            .unwrap();
        assert_eq!(remaining, U256::from(20));

        let replay: Result<U256, _> = module
            .call(
                "pm_postOp",
                params![
                    PostOpMode::OpSucceeded,
                    response.context,
                    U256::from(80),
                    U256::one()
                ],
            )
            .await;
        assert!(replay.is_err());
    }
}
