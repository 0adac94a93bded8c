// src/config.rs
//! Command-line and environment configuration.
//!
//! | Variable | Flag | Default |
//! |----------|------|---------|
//! | `RPC_SERVER_ADDR` | `--rpc-server-addr` | `127.0.0.1:8545` |
//! | `PAYMASTER_OWNER` | `--owner` | required |
//! | `POLICY_ADMINS` | `--policy-admins` | none |
//! | `TREASURERS` | `--treasurers` | none |
//! | `ALLOWED_SENDERS` | `--allowed-senders` | none |
//! | `ALLOWED_OPERATIONS` | `--allowed-operations` | none |
//! | `MAX_PENDING_CONTEXTS` | `--max-pending-contexts` | `4096` |
//! | `GAS_PRICE_BUFFER` | `--gas-price-buffer` | `10` |
//! | `RUST_LOG` | | `info` |

use clap::Parser;
use ethers::types::Address;

use crate::engine::DEFAULT_MAX_PENDING_CONTEXTS;
use crate::types::Selector;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(short, long, env = "RPC_SERVER_ADDR", default_value = "127.0.0.1:8545")]
    pub rpc_server_addr: String,

    /// Principal holding every administrative capability
    #[clap(short, long, env = "PAYMASTER_OWNER")]
    pub owner: Address,

    #[clap(long, env = "POLICY_ADMINS", value_delimiter = ',')]
    pub policy_admins: Vec<Address>,

    #[clap(long, env = "TREASURERS", value_delimiter = ',')]
    pub treasurers: Vec<Address>,

    /// Senders allowlisted at startup
    #[clap(long, env = "ALLOWED_SENDERS", value_delimiter = ',')]
    pub allowed_senders: Vec<Address>,

    /// Operation selectors allowlisted at startup, e.g. 0x12345678
    #[clap(long, env = "ALLOWED_OPERATIONS", value_delimiter = ',')]
    pub allowed_operations: Vec<Selector>,

    #[clap(long, env = "MAX_PENDING_CONTEXTS", default_value_t = DEFAULT_MAX_PENDING_CONTEXTS)]
    pub max_pending_contexts: usize,

    /// Percentage added to maxFeePerGas when deriving a max cost
    #[clap(long, env = "GAS_PRICE_BUFFER", default_value_t = 10)]
    pub gas_price_buffer: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterConfig {
    pub max_pending_contexts: usize,
    pub gas_price_buffer: u64,
}

impl Default for PaymasterConfig {
    fn default() -> Self {
        Self {
            max_pending_contexts: DEFAULT_MAX_PENDING_CONTEXTS,
            gas_price_buffer: 10,
        }
    }
}

impl Args {
    pub fn paymaster_config(&self) -> PaymasterConfig {
        PaymasterConfig {
            max_pending_contexts: self.max_pending_contexts,
            gas_price_buffer: self.gas_price_buffer,
        }
    }
}
