//! The P2P node: handshake, liveness, sync/fork-resolution, and the
//! network mining lock (spec.md §4.E).
//!
//! Each connected peer owns one reader task that blocks on `frame::receive`
//! in a loop (spec.md §9 REDESIGN FLAGS: "each peer socket owns a single
//! reader task"); outbound sends from the ping task, the sync driver, or
//! the broadcaster all go through the same per-socket write half behind a
//! `tokio::sync::Mutex`, which is the "per-socket write mutex" the design
//! notes call for.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ledgerpdf_core::{Block, Ledger, MiningCoordinator, MinerControl};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::frame;
use crate::lock::MiningLock;
use crate::message::{
    BlocksPayload, EmptyPayload, GetBlocksPayload, HelloPayload, Message, NewBlockPayload, TipPayload,
    WelcomePayload,
};
use crate::peer::{self, PeerSet};
use crate::sync::{self, Classification};

pub const PROTOCOL_VERSION: u32 = 1;
pub const CHUNK_SIZE: u64 = 50;
pub const PING_INTERVAL: Duration = Duration::from_secs(25);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(60);
pub const SOCKET_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_CONNECT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub peers_path: PathBuf,
}

struct SyncSession {
    peer_id: String,
    rewind_budget: u64,
}

/// `peer_id -> write half`, so any task can send to a connected peer
/// without owning its reader loop.
type SocketTable = HashMap<String, Arc<Mutex<WriteHalf<TcpStream>>>>;

pub struct Node {
    host: String,
    port: u16,
    peer_id: String,
    ledger: Arc<Ledger>,
    peer_set: PeerSet,
    sockets: RwLock<SocketTable>,
    retry_counts: Mutex<HashMap<String, u32>>,
    sync_session: Mutex<Option<SyncSession>>,
    mining_lock: MiningLock,
    miner_control: Mutex<Option<Arc<dyn MinerControl>>>,
    running: AtomicBool,
    shutdown: Notify,
}

impl Node {
    pub async fn new(config: NodeConfig, ledger: Arc<Ledger>) -> Arc<Self> {
        let self_endpoint = peer::endpoint(&config.host, config.port);
        let peer_id = peer::derive_peer_id(&self_endpoint);
        let peer_set = PeerSet::load(config.peers_path).await;

        Arc::new(Node {
            host: config.host,
            port: config.port,
            peer_id: peer_id.clone(),
            ledger,
            peer_set,
            sockets: RwLock::new(HashMap::new()),
            retry_counts: Mutex::new(HashMap::new()),
            sync_session: Mutex::new(None),
            mining_lock: MiningLock::new(peer_id),
            miner_control: Mutex::new(None),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Wired in by the binary crate once the mining worker exists, breaking
    /// the `Node` <-> worker construction cycle (spec.md §4.E.4 "signal the
    /// mining worker to interrupt").
    pub async fn set_miner_control(&self, control: Arc<dyn MinerControl>) {
        *self.miner_control.lock().await = Some(control);
    }

    /// Binds the listener and spawns the accept loop, ping task, and retry
    /// task. Connects to every peer already known from a previous run.
    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port).parse().expect("invalid host/port");
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, peer_id = %self.peer_id, "node listening");
        self.running.store(true, Ordering::SeqCst);

        let accept_node = Arc::clone(self);
        tokio::spawn(async move { accept_node.accept_loop(listener).await });

        let ping_node = Arc::clone(self);
        tokio::spawn(async move { ping_node.ping_loop().await });

        let retry_node = Arc::clone(self);
        tokio::spawn(async move { retry_node.retry_loop().await });

        for endpoint in self.peer_set.endpoints().await {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = node.connect_to(&endpoint).await {
                    warn!(endpoint, error = %e, "initial connect to known peer failed");
                }
            });
        }

        Ok(())
    }

    /// Stops accepting connections, signals every task to exit, closes
    /// sockets, and persists the peer set. Callers must stop the mining
    /// worker *after* this returns, so it observes the lock release
    /// (spec.md §4.E.6).
    pub async fn shutdown(&self) {
        info!("shutting down node");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        let mut sockets = self.sockets.write().await;
        for (_, socket) in sockets.drain() {
            let mut socket = socket.lock().await;
            let _ = socket.shutdown().await;
        }
        if let Err(e) = self.peer_set.save().await {
            warn!(error = %e, "failed to persist peer set on shutdown");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn current_tip(&self) -> (u64, String) {
        match self.ledger.latest().await {
            Some(block) => (self.ledger.length().await as u64, block.current_hash),
            None => (0, "0".to_string()),
        }
    }

    // ---- outbound connection lifecycle ----------------------------------

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.is_running() {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let node = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = node.handle_inbound(stream, addr).await {
                                    debug!(%addr, error = %e, "inbound handshake failed");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    pub async fn connect_to(self: &Arc<Self>, endpoint: &str) -> Result<(), TransportError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint))
            .await
            .map_err(|_| TransportError::ConnectionClosed)??;
        self.handle_outbound(stream, endpoint.to_string()).await
    }

    async fn handle_outbound(self: &Arc<Self>, stream: TcpStream, endpoint: String) -> Result<(), TransportError> {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (height, hash) = self.current_tip().await;
        frame::send(
            &mut write_half,
            &Message::Hello(HelloPayload {
                peer_id: self.peer_id.clone(),
                protocol_version: PROTOCOL_VERSION,
                chain_height: height,
                latest_hash: hash,
            }),
        )
        .await?;

        let reply = frame::receive(&mut read_half).await?;
        let Message::Welcome(welcome) = reply else {
            return Err(TransportError::Protocol);
        };

        self.register_peer(welcome.peer_id.clone(), endpoint.clone(), read_half, write_half)
            .await;
        self.maybe_initiate_sync(&welcome.peer_id, welcome.chain_height, &welcome.latest_hash)
            .await;
        Ok(())
    }

    async fn handle_inbound(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<(), TransportError> {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let hello = frame::receive(&mut read_half).await?;
        let Message::Hello(hello) = hello else {
            return Err(TransportError::Protocol);
        };

        let (height, hash) = self.current_tip().await;
        frame::send(
            &mut write_half,
            &Message::Welcome(WelcomePayload {
                peer_id: self.peer_id.clone(),
                chain_height: height,
                latest_hash: hash,
            }),
        )
        .await?;

        let endpoint = peer::endpoint(&addr.ip().to_string(), addr.port());
        self.register_peer(hello.peer_id.clone(), endpoint, read_half, write_half)
            .await;
        self.maybe_initiate_sync(&hello.peer_id, hello.chain_height, &hello.latest_hash)
            .await;
        Ok(())
    }

    /// Persists the endpoint, registers the socket (closing any existing
    /// one under the same `peer_id` per spec.md §4.E.1), and starts the
    /// message loop.
    async fn register_peer(
        self: &Arc<Self>,
        peer_id: String,
        endpoint: String,
        read_half: ReadHalf<TcpStream>,
        write_half: WriteHalf<TcpStream>,
    ) {
        self.peer_set.remember(&peer_id, &endpoint).await;
        if let Err(e) = self.peer_set.save().await {
            warn!(error = %e, "failed to persist peer set after handshake");
        }

        let write_half = Arc::new(Mutex::new(write_half));
        {
            let mut sockets = self.sockets.write().await;
            if sockets.contains_key(&peer_id) {
                debug!(peer_id, "duplicate peer_id; closing new socket");
                let mut guard = write_half.lock().await;
                let _ = guard.shutdown().await;
                return;
            }
            sockets.insert(peer_id.clone(), write_half);
        }

        info!(peer_id, endpoint, "peer connected");
        let node = Arc::clone(self);
        tokio::spawn(async move { node.message_loop(peer_id, read_half).await });
    }

    async fn message_loop(self: Arc<Self>, peer_id: String, mut read_half: ReadHalf<TcpStream>) {
        loop {
            if !self.is_running() {
                break;
            }
            match timeout(SOCKET_READ_TIMEOUT, frame::receive(&mut read_half)).await {
                Ok(Ok(message)) => self.dispatch(&peer_id, message).await,
                Ok(Err(e)) => {
                    debug!(peer_id, error = %e, "disconnecting peer");
                    break;
                }
                Err(_) => continue, // read timeout: loop without disconnecting
            }
        }
        self.sockets.write().await.remove(&peer_id);
    }

    async fn send_to(&self, peer_id: &str, message: &Message) -> Result<(), TransportError> {
        let socket = {
            let sockets = self.sockets.read().await;
            sockets.get(peer_id).cloned()
        };
        match socket {
            Some(socket) => {
                let mut socket = socket.lock().await;
                frame::send(&mut *socket, message).await
            }
            None => Err(TransportError::Closed),
        }
    }

    async fn broadcast(&self, message: &Message, except: Option<&str>) {
        let peer_ids: Vec<String> = {
            let sockets = self.sockets.read().await;
            sockets.keys().filter(|id| Some(id.as_str()) != except).cloned().collect()
        };
        for peer_id in peer_ids {
            if let Err(e) = self.send_to(&peer_id, message).await {
                debug!(peer_id, error = %e, "broadcast send failed; dropping peer");
                self.sockets.write().await.remove(&peer_id);
            }
        }
    }

    // ---- liveness --------------------------------------------------------

    async fn ping_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = interval.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    let (height, hash) = self.current_tip().await;
                    self.broadcast(&Message::Ping(TipPayload { chain_height: height, latest_hash: hash }), None).await;
                }
            }
        }
    }

    async fn retry_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(RETRY_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = interval.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    self.retry_disconnected_peers().await;
                }
            }
        }
    }

    async fn retry_disconnected_peers(self: &Arc<Self>) {
        let known = self.peer_set.endpoints().await;
        let connected: Vec<String> = self.sockets.read().await.keys().cloned().collect();
        for endpoint in known {
            let peer_id = peer::derive_peer_id(&endpoint);
            if connected.contains(&peer_id) {
                continue;
            }
            let attempts = {
                let mut counts = self.retry_counts.lock().await;
                let entry = counts.entry(endpoint.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if attempts > MAX_CONNECT_RETRIES {
                continue;
            }
            let node = Arc::clone(self);
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                if node.connect_to(&endpoint).await.is_ok() {
                    node.retry_counts.lock().await.remove(&endpoint);
                }
            });
        }
    }

    // ---- message dispatch --------------------------------------------------

    async fn dispatch(self: &Arc<Self>, peer_id: &str, message: Message) {
        match message {
            Message::Hello(_) | Message::Welcome(_) => {
                debug!(peer_id, "unexpected handshake message after handshake completed");
            }
            Message::Ping(tip) => {
                let (height, hash) = self.current_tip().await;
                let _ = self
                    .send_to(peer_id, &Message::Pong(TipPayload { chain_height: height, latest_hash: hash }))
                    .await;
                let _ = tip; // PING only triggers a PONG reply, never a sync (spec.md §4.E.4).
            }
            Message::Pong(tip) => {
                self.maybe_initiate_sync(peer_id, tip.chain_height, &tip.latest_hash).await;
            }
            Message::GetBlocks(request) => self.serve_get_blocks(peer_id, request).await,
            Message::Blocks(response) => self.handle_blocks(peer_id, response.blocks).await,
            Message::NewBlock(announcement) => self.handle_new_block(peer_id, announcement.block).await,
            Message::MiningStart(EmptyPayload {}) => self.mining_lock.on_mining_start(peer_id).await,
            Message::MiningFinish(EmptyPayload {}) => self.mining_lock.on_mining_finish(peer_id).await,
        }
    }

    async fn serve_get_blocks(&self, peer_id: &str, request: GetBlocksPayload) {
        let end = request.start.saturating_add(CHUNK_SIZE);
        let blocks = self.ledger.get_range(request.start, end).await;
        let _ = self.send_to(peer_id, &Message::Blocks(BlocksPayload { blocks })).await;
    }

    // ---- sync / fork resolution --------------------------------------------

    /// Starts a sync with `peer_id` when their advertised tip diverges from
    /// ours: either they are ahead, or we are tied in height but disagree on
    /// the tip hash (spec.md §4.E.4 "Sync is initiated" — both branches,
    /// including the same-height fork case `sync::tips_diverge` exists for).
    async fn maybe_initiate_sync(self: &Arc<Self>, peer_id: &str, peer_height: u64, peer_hash: &str) {
        let (our_height, our_hash) = self.current_tip().await;
        if !sync::tips_diverge(our_height, &our_hash, peer_height, peer_hash) {
            return;
        }
        let mut session = self.sync_session.lock().await;
        if session.is_some() {
            return;
        }
        *session = Some(SyncSession {
            peer_id: peer_id.to_string(),
            rewind_budget: sync::MAX_REWIND_DEPTH,
        });
        drop(session);
        let _ = self
            .send_to(peer_id, &Message::GetBlocks(GetBlocksPayload { start: our_height }))
            .await;
    }

    async fn handle_blocks(self: &Arc<Self>, peer_id: &str, blocks: Vec<Block>) {
        {
            let session = self.sync_session.lock().await;
            match &*session {
                Some(s) if s.peer_id == peer_id => {}
                _ => return, // response from a peer we are not currently syncing with
            }
        }

        let tip = self.ledger.latest().await;
        let batch_len = blocks.len() as u64;
        match sync::classify(tip.as_ref(), &blocks) {
            Classification::Empty => self.finish_sync().await,
            Classification::AcceptFreshChain => {
                match self.ledger.replace_chain(blocks).await {
                    Ok(()) => self.finish_sync().await,
                    Err(e) => {
                        warn!(peer_id, error = %e, "rejected fresh chain from peer");
                        self.finish_sync().await;
                    }
                }
            }
            Classification::RequestFull => {
                let _ = self.send_to(peer_id, &Message::GetBlocks(GetBlocksPayload { start: 0 })).await;
            }
            Classification::Gap { start } => {
                let _ = self.send_to(peer_id, &Message::GetBlocks(GetBlocksPayload { start })).await;
            }
            Classification::SequentialAppend => {
                for block in blocks {
                    if self.ledger.contains_hash(&block.current_hash).await {
                        continue;
                    }
                    if let Err(e) = self.ledger.append_validated(block.clone()).await {
                        warn!(peer_id, index = block.index, error = %e, "sync batch validation failed; stopping sync");
                        self.finish_sync().await;
                        return;
                    }
                }
                if batch_len >= CHUNK_SIZE {
                    let next_start = self.ledger.length().await as u64;
                    let _ = self.send_to(peer_id, &Message::GetBlocks(GetBlocksPayload { start: next_start })).await;
                } else {
                    self.finish_sync().await;
                }
            }
            Classification::Fork { new_height } => {
                let exhausted = {
                    let mut session = self.sync_session.lock().await;
                    match session.as_mut() {
                        Some(s) => {
                            if s.rewind_budget == 0 {
                                true
                            } else {
                                s.rewind_budget -= 1;
                                false
                            }
                        }
                        None => true,
                    }
                };
                if exhausted {
                    warn!(peer_id, "rewind budget exhausted; aborting sync");
                    self.finish_sync().await;
                    return;
                }
                if new_height < 0 {
                    let _ = self.send_to(peer_id, &Message::GetBlocks(GetBlocksPayload { start: 0 })).await;
                    return;
                }
                if self.ledger.rewind_to(new_height).await {
                    let next_start = self.ledger.length().await as u64;
                    let _ = self.send_to(peer_id, &Message::GetBlocks(GetBlocksPayload { start: next_start })).await;
                } else {
                    let _ = self.send_to(peer_id, &Message::GetBlocks(GetBlocksPayload { start: 0 })).await;
                }
            }
        }
    }

    async fn finish_sync(&self) {
        *self.sync_session.lock().await = None;
    }

    pub async fn is_sync_in_progress_raw(&self) -> bool {
        self.sync_session.lock().await.is_some()
    }

    async fn handle_new_block(self: &Arc<Self>, sender_peer_id: &str, block: Block) {
        if self.ledger.contains_hash(&block.current_hash).await {
            return;
        }
        let Some(tip) = self.ledger.latest().await else {
            return;
        };
        if !Ledger::validate(&block, &tip, self.ledger.difficulty().await) {
            debug!(sender_peer_id, index = block.index, "NEW_BLOCK failed validation against our tip; ignoring");
            return;
        }

        if let Some(control) = self.miner_control.lock().await.as_ref() {
            control.interrupt_current();
        }

        if let Err(e) = self.ledger.append_validated(block.clone()).await {
            warn!(error = %e, "failed to append validated NEW_BLOCK");
            return;
        }
        self.broadcast(&Message::NewBlock(NewBlockPayload { block }), Some(sender_peer_id)).await;
    }
}

#[async_trait]
impl MiningCoordinator for Node {
    async fn is_sync_in_progress(&self) -> bool {
        self.is_sync_in_progress_raw().await
    }

    async fn request_lock(&self) -> bool {
        if self.mining_lock.request_local().await {
            self.broadcast(&Message::MiningStart(EmptyPayload {}), None).await;
            true
        } else {
            false
        }
    }

    async fn release_lock(&self) {
        if self.mining_lock.release_local().await {
            self.broadcast(&Message::MiningFinish(EmptyPayload {}), None).await;
        }
    }
}
