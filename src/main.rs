// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sponsor_paymaster::clock::SystemClock;
use sponsor_paymaster::config::Args;
use sponsor_paymaster::rpc::{PaymasterRpcImpl, PaymasterRpcServer};
use sponsor_paymaster::{Paymaster, Role, RoleRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let registry = Arc::new(RoleRegistry::with_owner(args.owner));
    for admin in &args.policy_admins {
        registry.grant(*admin, Role::PolicyAdmin);
    }
    for treasurer in &args.treasurers {
        registry.grant(*treasurer, Role::Treasurer);
    }

    let paymaster = Paymaster::new(
        &args.paymaster_config(),
        registry,
        Arc::new(SystemClock),
    );

    // Seed allowlists as the owner so the changes land in the event log
    if !args.allowed_senders.is_empty() {
        paymaster
            .set_batch_sender_status(args.owner, &args.allowed_senders, true)
            .await?;
    }
    if !args.allowed_operations.is_empty() {
        paymaster
            .set_batch_operation_status(args.owner, &args.allowed_operations, true)
            .await?;
    }

    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    let paymaster_rpc = PaymasterRpcImpl::new(Arc::new(paymaster));

    info!("Starting sponsorship paymaster RPC server on {}", server_addr);

    let server_handle = start_server(server_addr, paymaster_rpc).await?;

    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

async fn start_server(
    server_addr: SocketAddr,
    paymaster_rpc: PaymasterRpcImpl,
) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;
    let server_handle = server.start(paymaster_rpc.into_rpc());

    Ok(server_handle)
}
