//! Per-height message cache. A preallocated ring of `node_num` buckets,
//! indexed by `height mod node_num`, each holding the messages seen for one
//! consensus cycle plus the block proposed at that height.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::blockchain::block::Block;
use crate::consensus::message::{CommitMessage, PrepareMessage, SignMessage, ViewChangeMessage};

#[derive(Default)]
struct LogEntry {
    prepares: HashMap<String, PrepareMessage>,
    signs: HashMap<String, SignMessage>,
    commits: HashMap<String, CommitMessage>,
    // keyed by (replica id, to_view) so a replica can vote for more than one target view
    views: HashMap<(String, u64), ViewChangeMessage>,
    block: Option<Block>,
}

pub struct MsgLog {
    node_num: u64,
    buckets: Mutex<Vec<LogEntry>>,
}

impl MsgLog {
    pub fn new(node_num: u64) -> Self {
        let mut buckets = Vec::with_capacity(node_num as usize);
        buckets.resize_with(node_num as usize, LogEntry::default);
        Self {
            node_num,
            buckets: Mutex::new(buckets),
        }
    }

    fn bucket_index(&self, height: u64) -> usize {
        (height % self.node_num) as usize
    }

    pub fn add_prepare(&self, msg: PrepareMessage) {
        let idx = self.bucket_index(msg.height);
        self.buckets.lock()[idx].prepares.insert(msg.id.clone(), msg);
    }

    pub fn add_sign(&self, msg: SignMessage) {
        let idx = self.bucket_index(msg.height);
        self.buckets.lock()[idx].signs.insert(msg.id.clone(), msg);
    }

    pub fn add_commit(&self, msg: CommitMessage) {
        let idx = self.bucket_index(msg.height);
        self.buckets.lock()[idx].commits.insert(msg.id.clone(), msg);
    }

    pub fn add_view_change(&self, msg: ViewChangeMessage) {
        let idx = self.bucket_index(msg.height);
        let key = (msg.id.clone(), msg.to_view);
        self.buckets.lock()[idx].views.insert(key, msg);
    }

    pub fn has_prepare(&self, height: u64, id: &str) -> bool {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].prepares.contains_key(id)
    }

    pub fn has_sign(&self, height: u64, id: &str) -> bool {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].signs.contains_key(id)
    }

    pub fn has_commit(&self, height: u64, id: &str) -> bool {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].commits.contains_key(id)
    }

    pub fn has_view_change(&self, height: u64, id: &str, to_view: u64) -> bool {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].views.contains_key(&(id.to_string(), to_view))
    }

    pub fn sign_count(&self, height: u64) -> usize {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].signs.len()
    }

    pub fn commit_count(&self, height: u64) -> usize {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].commits.len()
    }

    pub fn view_change_count(&self, height: u64, to_view: u64) -> usize {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx]
            .views
            .keys()
            .filter(|(_, v)| *v == to_view)
            .count()
    }

    pub fn own_sign(&self, height: u64, self_id: &str) -> Option<SignMessage> {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].signs.get(self_id).cloned()
    }

    pub fn cache_block(&self, block: Block) {
        let idx = self.bucket_index(block.header.height);
        self.buckets.lock()[idx].block = Some(block);
    }

    pub fn get_block(&self, height: u64) -> Option<Block> {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].block.clone()
    }

    pub fn has_block(&self, height: u64) -> bool {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx].block.is_some()
    }

    /// Clear the bucket for one height, at the end of a consensus cycle.
    pub fn clear(&self, height: u64) {
        let idx = self.bucket_index(height);
        self.buckets.lock()[idx] = LogEntry::default();
    }
}
