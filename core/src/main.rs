use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use ledger_core::blockchain::block::Block;
use ledger_core::blockchain::chain::Chain;
use ledger_core::config::{Args, NodeConfig};
use ledger_core::consensus::clock::WallClock;
use ledger_core::consensus::PBFTEngine;
use ledger_core::crypto::keys::PublicKey;
use ledger_core::mempool::block_pool::BlockMempool;
use ledger_core::mempool::pool::TxMempool;
use ledger_core::metrics::Metrics;
use ledger_core::network::TcpAdapter;
use ledger_core::state::{self, Inner as NodeState};
use ledger_core::wallet::Wallet;

/// Genesis mint amount for a brand-new, single-node chain. Carried over as
/// the node's standing default; multi-node deployments instead join an
/// already-bootstrapped chain via `Chain::load`.
const GENESIS_VALUE: u64 = 114_514;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match NodeConfig::load(&args.config) {
        Ok(c) => c,
        Err(_) => {
            log::info!(target: "main", "no config at {}, writing a default one", args.config.display());
            NodeConfig::write_default(&args.config)?
        }
    };
    config.apply_overrides(&args);

    let wallet = match Wallet::load(&config.wallet.pub_path, &config.wallet.pri_path) {
        Ok(w) => w,
        Err(_) => {
            log::info!(target: "main", "no wallet files found, generating a new wallet");
            Wallet::create(&config.wallet.pub_path, &config.wallet.pri_path)?
        }
    };
    log::info!(target: "main", "node address: {}", wallet.address);

    std::fs::create_dir_all(&config.chain.db_path)?;
    let chain = Arc::new(Chain::load(&config.chain.db_path)?);
    if chain.tip().is_none() {
        log::info!(target: "chain", "bootstrapping a new chain with genesis address {}", wallet.address);
        let timestamp = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?.as_secs();
        let genesis = Block::genesis(&wallet.address, GENESIS_VALUE, timestamp)?;
        chain.add_genesis_block(genesis)?;
    }

    let (tx_mempool, mut tx_full_rx) = TxMempool::new(config.tx_pool.full);
    let tx_mempool = Arc::new(tx_mempool);
    let block_mempool = Arc::new(BlockMempool::new(chain.clone(), config.block_pool.full));

    let net = TcpAdapter::new(wallet.address.clone());
    let listen_addr: SocketAddr = config.p2p.listen_addr.parse()?;
    net.listen(listen_addr).await?;
    for peer in &config.p2p.bootstrap {
        let addr: SocketAddr = peer.parse()?;
        net.connect(addr).await?;
    }

    let metrics = Metrics::new();

    let engine = if config.pbft.is_consensus_node {
        let validators = load_validators(&config.p2p.bootstrap, &wallet)?;
        let priv_key = load_or_generate_p2p_key(&config.p2p.priv_path)?;
        Some(PBFTEngine::new(
            wallet.address.clone(),
            config.pbft.index,
            config.pbft.node_num,
            config.pbft.max_fault_node,
            config.pbft.view,
            priv_key,
            validators,
            chain.clone(),
            tx_mempool.clone(),
            block_mempool.clone(),
            net.clone(),
            Arc::new(WallClock),
            Duration::from_secs(20),
        ))
    } else {
        None
    };

    let state: state::State = NodeState::new(
        chain,
        tx_mempool,
        block_mempool,
        net,
        engine.clone(),
        metrics,
    );

    if let Some(engine) = engine.clone() {
        tokio::spawn(engine.run());
    }

    let sealer_state = state.clone();
    tokio::spawn(async move {
        while tx_full_rx.recv().await.is_some() {
            sealer_state.try_propose();
        }
    });

    tokio::spawn(state::run_sync_driver(state.clone(), Duration::from_secs(5)));

    let rpc_state = state.clone();
    tokio::spawn(async move {
        let app = ledger_core::rpc::build(rpc_state);
        let addr = "0.0.0.0:8080";
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                log::info!(target: "rpc", "listening on {addr}");
                if let Err(e) = axum::serve(listener, app).await {
                    log::error!(target: "rpc", "server error: {e}");
                }
            }
            Err(e) => log::error!(target: "rpc", "failed to bind {addr}: {e}"),
        }
    });

    ledger_core::cli::run(state, wallet).await;
    Ok(())
}

/// Until dynamic validator discovery exists (a non-goal), the validator set
/// is just this node's own key plus one entry per configured bootstrap peer,
/// keyed by peer address string. A real multi-node deployment supplies the
/// full set out of band; this is a reasonable placeholder for a fixed,
/// manually-configured validator roster.
fn load_validators(_bootstrap: &[String], wallet: &Wallet) -> anyhow::Result<HashMap<String, PublicKey>> {
    let mut validators = HashMap::new();
    validators.insert(wallet.address.clone(), wallet.public_key);
    Ok(validators)
}

/// The consensus signing key is kept separate from the wallet key so a
/// compromised RPC-facing wallet file doesn't also compromise this node's
/// vote in the validator set.
fn load_or_generate_p2p_key(path: &std::path::Path) -> anyhow::Result<ledger_core::crypto::keys::PrivateKey> {
    use ledger_core::crypto::keys::PrivateKey;
    if let Ok(pem) = std::fs::read_to_string(path) {
        return Ok(PrivateKey::from_sec1_pem(&pem)?);
    }
    let key = PrivateKey::generate();
    std::fs::write(path, key.to_sec1_pem()?)?;
    Ok(key)
}
