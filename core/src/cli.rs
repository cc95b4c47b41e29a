//! The interactive operator CLI: a blocking stdin reader spawned onto a
//! `spawn_blocking` task so it doesn't tie up the async runtime, dispatching
//! each line to the shared node state.

use std::io::{self, BufRead, Write};

use crate::state::State;
use crate::wallet::Wallet;

const HELP: &str = "\
commands:
  q                  shut down the node
  h                  show this help
  tx <amount> <addr> submit a transfer from the node's wallet
  s                  show node status
  b <hash>           show a block by hash";

/// Run the stdin command loop until `q` or EOF. Returns once the shutdown
/// signal has been sent, so the caller can await the rest of the node's
/// tasks winding down.
pub async fn run(state: State, wallet: Wallet) {
    let state_for_blocking = state.clone();
    let result = tokio::task::spawn_blocking(move || read_loop(state_for_blocking, wallet)).await;
    if let Err(e) = result {
        log::error!(target: "cli", "cli task panicked: {e}");
    }
    let _ = state.shutdown.send(());
}

fn read_loop(state: State, wallet: Wallet) {
    let stdin = io::stdin();
    print!("> ");
    let _ = io::stdout().flush();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if !dispatch(&state, &wallet, line) {
            break;
        }
        print!("> ");
        let _ = io::stdout().flush();
    }
}

/// Returns `false` when the loop should stop (the `q` command or fatal EOF).
fn dispatch(state: &State, wallet: &Wallet, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("q") => return false,
        Some("h") | None => println!("{HELP}"),
        Some("s") => print_status(state),
        Some("tx") => submit_tx(state, wallet, parts.collect::<Vec<_>>().as_slice()),
        Some("b") => print_block(state, parts.next()),
        Some(other) => {
            println!("unrecognized command: {other}");
            println!("{HELP}");
        }
    }
    true
}

fn print_status(state: &State) {
    let health = state.metrics.health_check();
    let (height, peer_best_height) = state.sync_snapshot();
    println!(
        "height={height} tip={} peers={} mempool={} peer_best_height={peer_best_height} status={}",
        state.chain.tip().unwrap_or_else(|| "<none>".to_string()),
        health.peers_connected,
        health.mempool_size,
        health.status,
    );
}

fn submit_tx(state: &State, wallet: &Wallet, args: &[&str]) {
    let (Some(amount_str), Some(address)) = (args.first(), args.get(1)) else {
        println!("usage: tx <amount> <address>");
        return;
    };
    let Ok(amount) = amount_str.parse::<u64>() else {
        println!("invalid amount: {amount_str}");
        return;
    };
    match crate::wallet::new_transaction(wallet, &state.chain, address, amount) {
        Ok(tx) => {
            let id = tx.id_hex();
            let self_id = state.net.self_id();
            match state.process_transaction(tx, &self_id) {
                Ok(()) => println!("submitted {id}"),
                Err(e) => println!("rejected: {e}"),
            }
        }
        Err(e) => println!("could not build transaction: {e}"),
    }
}

fn print_block(state: &State, hash: Option<&str>) {
    let Some(hash) = hash else {
        println!("usage: b <hash>");
        return;
    };
    match state.chain.find_block(hash) {
        Ok(Some(block)) => match serde_json::to_string_pretty(&block) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("could not serialize block: {e}"),
        },
        Ok(None) => println!("no such block: {hash}"),
        Err(e) => println!("store error: {e}"),
    }
}
