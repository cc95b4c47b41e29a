//! The network adapter: broadcast/callback interface the rest of the node
//! programs against, backed by a length-prefixed, CRC-framed TCP transport.
//! One reader task and one writer task per peer, mirroring the per-peer task
//! split the teacher's p2p layer uses, but with explicit framing instead of
//! newline-delimited JSON.

pub mod framing;
pub mod message;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub use message::{MessageType, NetworkMessage};

pub type PeerId = String;
pub type Callback = Box<dyn Fn(MessageType, Vec<u8>, PeerId) + Send + Sync>;

pub trait Adapter: Send + Sync {
    fn broadcast(&self, msg: &NetworkMessage);
    fn broadcast_to(&self, msg: &NetworkMessage, peer_id: &PeerId);
    fn broadcast_except(&self, msg: &NetworkMessage, peer_id: &PeerId);
    fn register_callback(&self, msg_type: MessageType, handler: Callback);
    fn self_id(&self) -> PeerId;
}

struct PeerHandle {
    sender: mpsc::Sender<Vec<u8>>,
}

pub struct TcpAdapter {
    self_id: PeerId,
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
    callbacks: Mutex<HashMap<MessageType, Vec<Callback>>>,
}

impl TcpAdapter {
    pub fn new(self_id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            peers: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    /// Bind `listen_addr` and accept inbound peer connections for the rest
    /// of the process lifetime.
    pub async fn listen(self: &Arc<Self>, listen_addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("binding {listen_addr}"))?;
        log::info!(target: "network", "listening on {listen_addr}");
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, addr)) => {
                        let this = this.clone();
                        tokio::spawn(async move {
                            this.handle_connection(socket, addr.to_string()).await;
                        });
                    }
                    Err(e) => {
                        log::warn!(target: "network", "accept failed: {e}");
                    }
                }
            }
        });
        Ok(())
    }

    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        let socket = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to {addr}"))?;
        let this = self.clone();
        tokio::spawn(async move {
            this.handle_connection(socket, addr.to_string()).await;
        });
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, peer_id: PeerId) {
        let (mut reader, mut writer) = socket.into_split();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
        self.peers.lock().insert(peer_id.clone(), PeerHandle { sender: tx });

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let mut len_buf = [0u8; 8];
            if reader.read_exact(&mut len_buf).await.is_err() {
                break;
            }
            let len = u64::from_be_bytes(len_buf);
            let mut payload = vec![0u8; len as usize];
            if reader.read_exact(&mut payload).await.is_err() {
                break;
            }
            let mut checksum_buf = [0u8; 4];
            if reader.read_exact(&mut checksum_buf).await.is_err() {
                break;
            }
            let checksum = u32::from_be_bytes(checksum_buf);
            if framing::verify(len, &payload, checksum).is_err() {
                log::warn!(target: "network", "dropping frame from {peer_id}: checksum mismatch");
                continue;
            }

            let msg: NetworkMessage = match serde_json::from_slice(&payload) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!(target: "network", "dropping unparseable frame from {peer_id}: {e}");
                    continue;
                }
            };
            self.dispatch(msg, peer_id.clone());
        }

        writer_task.abort();
        self.peers.lock().remove(&peer_id);
    }

    fn dispatch(&self, msg: NetworkMessage, peer_id: PeerId) {
        let kind = msg.kind();
        let payload = match serde_json::to_vec(&msg) {
            Ok(p) => p,
            Err(_) => return,
        };
        let callbacks = self.callbacks.lock();
        if let Some(handlers) = callbacks.get(&kind) {
            for handler in handlers {
                handler(kind, payload.clone(), peer_id.clone());
            }
        }
    }

    fn send_frame(&self, peer_id: &PeerId, msg: &NetworkMessage) {
        let Some(sender) = self.peers.lock().get(peer_id).map(|h| h.sender.clone()) else {
            return;
        };
        let Ok(payload) = serde_json::to_vec(msg) else {
            return;
        };
        let frame = framing::encode(&payload);
        let _ = sender.try_send(frame);
    }
}

impl Adapter for TcpAdapter {
    fn broadcast(&self, msg: &NetworkMessage) {
        let ids: Vec<PeerId> = self.peers.lock().keys().cloned().collect();
        for id in ids {
            self.send_frame(&id, msg);
        }
    }

    fn broadcast_to(&self, msg: &NetworkMessage, peer_id: &PeerId) {
        self.send_frame(peer_id, msg);
    }

    fn broadcast_except(&self, msg: &NetworkMessage, peer_id: &PeerId) {
        let ids: Vec<PeerId> = self
            .peers
            .lock()
            .keys()
            .filter(|id| *id != peer_id)
            .cloned()
            .collect();
        for id in ids {
            self.send_frame(&id, msg);
        }
    }

    fn register_callback(&self, msg_type: MessageType, handler: Callback) {
        self.callbacks.lock().entry(msg_type).or_default().push(handler);
    }

    fn self_id(&self) -> PeerId {
        self.self_id.clone()
    }
}

/// An in-process adapter for deterministic multi-node tests: peers are
/// connected by `mpsc` channels rather than sockets, so no framing or actual
/// I/O is involved, but the trait surface is identical to `TcpAdapter`.
pub struct FakeAdapter {
    self_id: PeerId,
    peers: Mutex<HashMap<PeerId, mpsc::Sender<(NetworkMessage, PeerId)>>>,
    callbacks: Mutex<HashMap<MessageType, Vec<Callback>>>,
}

impl FakeAdapter {
    pub fn new(self_id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            peers: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    /// Wire two fake adapters together bidirectionally and spawn their
    /// delivery loops.
    pub fn link(a: &Arc<Self>, b: &Arc<Self>) {
        let (tx_to_b, rx_to_b) = mpsc::channel(256);
        let (tx_to_a, rx_to_a) = mpsc::channel(256);
        a.peers.lock().insert(b.self_id.clone(), tx_to_b);
        b.peers.lock().insert(a.self_id.clone(), tx_to_a);
        Self::spawn_delivery(b.clone(), rx_to_b);
        Self::spawn_delivery(a.clone(), rx_to_a);
    }

    fn spawn_delivery(this: Arc<Self>, mut rx: mpsc::Receiver<(NetworkMessage, PeerId)>) {
        tokio::spawn(async move {
            while let Some((msg, from)) = rx.recv().await {
                this.dispatch(msg, from);
            }
        });
    }

    fn dispatch(&self, msg: NetworkMessage, peer_id: PeerId) {
        let kind = msg.kind();
        let payload = serde_json::to_vec(&msg).unwrap_or_default();
        let callbacks = self.callbacks.lock();
        if let Some(handlers) = callbacks.get(&kind) {
            for handler in handlers {
                handler(kind, payload.clone(), peer_id.clone());
            }
        }
    }
}

impl Adapter for FakeAdapter {
    fn broadcast(&self, msg: &NetworkMessage) {
        let senders: Vec<_> = self.peers.lock().values().cloned().collect();
        for sender in senders {
            let _ = sender.try_send((msg.clone(), self.self_id.clone()));
        }
    }

    fn broadcast_to(&self, msg: &NetworkMessage, peer_id: &PeerId) {
        if let Some(sender) = self.peers.lock().get(peer_id).cloned() {
            let _ = sender.try_send((msg.clone(), self.self_id.clone()));
        }
    }

    fn broadcast_except(&self, msg: &NetworkMessage, peer_id: &PeerId) {
        let senders: Vec<_> = self
            .peers
            .lock()
            .iter()
            .filter(|(id, _)| *id != peer_id)
            .map(|(_, s)| s.clone())
            .collect();
        for sender in senders {
            let _ = sender.try_send((msg.clone(), self.self_id.clone()));
        }
    }

    fn register_callback(&self, msg_type: MessageType, handler: Callback) {
        self.callbacks.lock().entry(msg_type).or_default().push(handler);
    }

    fn self_id(&self) -> PeerId {
        self.self_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fake_adapter_delivers_across_the_link() {
        let a = FakeAdapter::new("node-a".to_string());
        let b = FakeAdapter::new("node-b".to_string());
        FakeAdapter::link(&a, &b);

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        b.register_callback(
            MessageType::Block,
            Box::new(move |_, _, _| {
                received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        a.broadcast(&NetworkMessage::NewBlockBroadcast { height: 1, hash: vec![0xAA] });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
