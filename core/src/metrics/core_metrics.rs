//! Observability counters and a Prometheus text exporter.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub struct Metrics {
    pub blocks_processed: AtomicU64,
    pub blocks_rejected: AtomicU64,
    pub current_height: AtomicU64,

    pub txs_submitted: AtomicU64,
    pub txs_accepted: AtomicU64,
    pub txs_rejected: AtomicU64,
    pub txs_in_mempool: AtomicUsize,

    pub peers_connected: AtomicUsize,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,

    pub view_changes: AtomicU64,
    pub commits: AtomicU64,

    pub storage_writes: AtomicU64,
    pub storage_reads: AtomicU64,

    pub start_time: Instant,
    pub last_block_time: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            blocks_processed: AtomicU64::new(0),
            blocks_rejected: AtomicU64::new(0),
            current_height: AtomicU64::new(0),

            txs_submitted: AtomicU64::new(0),
            txs_accepted: AtomicU64::new(0),
            txs_rejected: AtomicU64::new(0),
            txs_in_mempool: AtomicUsize::new(0),

            peers_connected: AtomicUsize::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),

            view_changes: AtomicU64::new(0),
            commits: AtomicU64::new(0),

            storage_writes: AtomicU64::new(0),
            storage_reads: AtomicU64::new(0),

            start_time: Instant::now(),
            last_block_time: AtomicU64::new(0),
        })
    }

    pub fn prometheus_export(&self) -> String {
        let uptime_secs = self.start_time.elapsed().as_secs();
        let last_block = self.last_block_time.load(Ordering::Relaxed);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let time_since_last_block = if last_block > 0 { now.saturating_sub(last_block) } else { 0 };

        format!(
r#"# HELP ledger_blocks_processed_total Total blocks committed
# TYPE ledger_blocks_processed_total counter
ledger_blocks_processed_total {}

# HELP ledger_blocks_rejected_total Total blocks rejected
# TYPE ledger_blocks_rejected_total counter
ledger_blocks_rejected_total {}

# HELP ledger_height Current chain height
# TYPE ledger_height gauge
ledger_height {}

# HELP ledger_txs_submitted_total Total transactions submitted
# TYPE ledger_txs_submitted_total counter
ledger_txs_submitted_total {}

# HELP ledger_txs_accepted_total Total transactions accepted into the mempool
# TYPE ledger_txs_accepted_total counter
ledger_txs_accepted_total {}

# HELP ledger_txs_rejected_total Total transactions rejected
# TYPE ledger_txs_rejected_total counter
ledger_txs_rejected_total {}

# HELP ledger_mempool_size Number of transactions currently in the mempool
# TYPE ledger_mempool_size gauge
ledger_mempool_size {}

# HELP ledger_peers_connected Currently connected peers
# TYPE ledger_peers_connected gauge
ledger_peers_connected {}

# HELP ledger_messages_sent_total Network messages sent
# TYPE ledger_messages_sent_total counter
ledger_messages_sent_total {}

# HELP ledger_messages_received_total Network messages received
# TYPE ledger_messages_received_total counter
ledger_messages_received_total {}

# HELP ledger_view_changes_total Total consensus view changes
# TYPE ledger_view_changes_total counter
ledger_view_changes_total {}

# HELP ledger_commits_total Total PBFT commit rounds completed
# TYPE ledger_commits_total counter
ledger_commits_total {}

# HELP ledger_storage_writes_total Total store write operations
# TYPE ledger_storage_writes_total counter
ledger_storage_writes_total {}

# HELP ledger_storage_reads_total Total store read operations
# TYPE ledger_storage_reads_total counter
ledger_storage_reads_total {}

# HELP ledger_uptime_seconds Node uptime in seconds
# TYPE ledger_uptime_seconds gauge
ledger_uptime_seconds {}

# HELP ledger_time_since_last_block_seconds Time since the last committed block
# TYPE ledger_time_since_last_block_seconds gauge
ledger_time_since_last_block_seconds {}
"#,
            self.blocks_processed.load(Ordering::Relaxed),
            self.blocks_rejected.load(Ordering::Relaxed),
            self.current_height.load(Ordering::Relaxed),
            self.txs_submitted.load(Ordering::Relaxed),
            self.txs_accepted.load(Ordering::Relaxed),
            self.txs_rejected.load(Ordering::Relaxed),
            self.txs_in_mempool.load(Ordering::Relaxed),
            self.peers_connected.load(Ordering::Relaxed),
            self.messages_sent.load(Ordering::Relaxed),
            self.messages_received.load(Ordering::Relaxed),
            self.view_changes.load(Ordering::Relaxed),
            self.commits.load(Ordering::Relaxed),
            self.storage_writes.load(Ordering::Relaxed),
            self.storage_reads.load(Ordering::Relaxed),
            uptime_secs,
            time_since_last_block,
        )
    }

    pub fn health_check(&self) -> HealthStatus {
        let uptime = self.start_time.elapsed().as_secs();
        let last_block = self.last_block_time.load(Ordering::Relaxed);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let time_since_last_block = if last_block > 0 { now.saturating_sub(last_block) } else { 0 };

        let is_healthy = time_since_last_block < 900;
        let status = if is_healthy { "healthy" } else { "unhealthy" };

        HealthStatus {
            status: status.to_string(),
            uptime_seconds: uptime,
            height: self.current_height.load(Ordering::Relaxed),
            peers_connected: self.peers_connected.load(Ordering::Relaxed),
            mempool_size: self.txs_in_mempool.load(Ordering::Relaxed),
            time_since_last_block,
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub uptime_seconds: u64,
    pub height: u64,
    pub peers_connected: usize,
    pub mempool_size: usize,
    pub time_since_last_block: u64,
    pub blocks_processed: u64,
    pub blocks_rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_initialize_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.blocks_processed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.txs_in_mempool.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn prometheus_export_reflects_updated_counters() {
        let metrics = Metrics::new();
        metrics.blocks_processed.store(7, Ordering::Relaxed);
        metrics.current_height.store(42, Ordering::Relaxed);
        let export = metrics.prometheus_export();
        assert!(export.contains("ledger_blocks_processed_total 7"));
        assert!(export.contains("ledger_height 42"));
    }

    #[test]
    fn health_check_is_unhealthy_with_no_blocks_yet() {
        let metrics = Metrics::new();
        let health = metrics.health_check();
        assert_eq!(health.status, "unhealthy");
    }
}
