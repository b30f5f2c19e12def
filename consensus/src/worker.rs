//! Document task queue and the pre-emptible mining loop (spec.md §4.D).
//!
//! Mirrors `original_source/mining_worker.py`'s `BlockMiningWorker`: a
//! single background loop pulls a task off a FIFO queue, mines its pages
//! in order, and exposes a `working` flag for UI polling. The Python
//! source's shared-boolean cancellation flag is replaced here by
//! [`ledgerpdf_core::CancelToken`] (spec.md §9 REDESIGN FLAGS), and the
//! queue/lock/shutdown signals are split into their own `tokio` primitives
//! rather than one GIL-backed thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use ledgerpdf_core::{AppendRecord, CancelToken, Ledger, MinerControl, MiningCoordinator, PageRecord};

/// How often the worker checks for new work when the queue is empty
/// (spec.md §4.D step 2, "short-timeout wait").
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// How long to sleep between retries of [`MiningCoordinator::request_lock`]
/// and while a sync is in progress (spec.md §4.D steps 1 and 3).
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(250);
const SYNC_PAUSE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub idle_poll_interval: Duration,
    pub lock_retry_interval: Duration,
    pub sync_pause_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            idle_poll_interval: IDLE_POLL_INTERVAL,
            lock_retry_interval: LOCK_RETRY_INTERVAL,
            sync_pause_interval: SYNC_PAUSE_INTERVAL,
        }
    }
}

/// One submission's ordered list of `(page, signature)` pairs, all destined
/// for the same title under a single held network mining lock (spec.md
/// §4.D, GLOSSARY "Document task").
#[derive(Debug, Clone)]
pub struct DocumentTask {
    pages: VecDeque<(PageRecord, String)>,
}

impl DocumentTask {
    pub fn new(pages: Vec<(PageRecord, String)>) -> Self {
        DocumentTask {
            pages: pages.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn title(&self) -> Option<&str> {
        self.pages.front().map(|(p, _)| p.title.as_str())
    }
}

pub struct MiningWorker {
    ledger: Arc<Ledger>,
    coordinator: Arc<dyn MiningCoordinator>,
    config: WorkerConfig,
    queue: Mutex<VecDeque<DocumentTask>>,
    queue_notify: Notify,
    shutdown_notify: Notify,
    running: AtomicBool,
    working_tx: watch::Sender<bool>,
    working_rx: watch::Receiver<bool>,
    /// The cancellation token for whichever PoW attempt is currently in
    /// flight, swapped in at the start of every page. A plain
    /// [`StdMutex`] (not `tokio::sync::Mutex`) since [`MinerControl::interrupt_current`]
    /// is a synchronous trait method the network crate calls from a
    /// non-async context.
    current_cancel: StdMutex<CancelToken>,
}

impl MiningWorker {
    pub fn new(ledger: Arc<Ledger>, coordinator: Arc<dyn MiningCoordinator>, config: WorkerConfig) -> Arc<Self> {
        let (working_tx, working_rx) = watch::channel(false);
        Arc::new(MiningWorker {
            ledger,
            coordinator,
            config,
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            shutdown_notify: Notify::new(),
            running: AtomicBool::new(true),
            working_tx,
            working_rx,
            current_cancel: StdMutex::new(CancelToken::new()),
        })
    }

    /// Appends a task to the queue (spec.md §4.D `enqueue`).
    pub async fn enqueue(&self, task: DocumentTask) {
        if task.is_empty() {
            return;
        }
        self.queue.lock().await.push_back(task);
        self.queue_notify.notify_one();
    }

    /// True while a document is being mined; observable for UI/status.
    pub fn is_working(&self) -> bool {
        *self.working_rx.borrow()
    }

    /// Waits until the worker has no task in flight and an empty queue.
    /// Not part of spec.md directly but named as a supplemental helper in
    /// SPEC_FULL.md §4 (ported from `mining_worker.py`'s
    /// `wait_for_completion` busy-wait, expressed as an awaitable instead
    /// of a sleep loop).
    pub async fn wait_idle(&self) {
        let mut rx = self.working_rx.clone();
        loop {
            if !*rx.borrow() && self.queue.lock().await.is_empty() {
                return;
            }
            let _ = rx.changed().await;
        }
    }

    /// Requests a graceful shutdown: the worker finishes the current PoW
    /// attempt's next cancellation check and exits (spec.md §4.D `stop`).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
        self.queue_notify.notify_waiters();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_working(&self, working: bool) {
        let _ = self.working_tx.send(working);
    }

    /// Runs the worker loop until [`MiningWorker::stop`] is called.
    pub async fn run(self: Arc<Self>) {
        loop {
            if !self.is_running() {
                break;
            }
            if self.coordinator.is_sync_in_progress().await {
                tokio::time::sleep(self.config.sync_pause_interval).await;
                continue;
            }

            let Some(task) = self.take_next_task().await else {
                continue;
            };

            let Some(task) = self.acquire_lock_or_requeue(task).await else {
                // Shutdown fired while waiting for the lock; the task was
                // already re-enqueued by `acquire_lock_or_requeue`.
                break;
            };

            self.set_working(true);
            if let Some(remaining) = self.mine_task(task).await {
                self.queue.lock().await.push_front(remaining);
                self.queue_notify.notify_one();
            }
            self.set_working(false);
            self.coordinator.release_lock().await;
        }
    }

    async fn take_next_task(&self) -> Option<DocumentTask> {
        loop {
            if let Some(task) = self.queue.lock().await.pop_front() {
                return Some(task);
            }
            if !self.is_running() {
                return None;
            }
            tokio::select! {
                _ = self.shutdown_notify.notified() => return None,
                _ = self.queue_notify.notified() => continue,
                _ = tokio::time::sleep(self.config.idle_poll_interval) => continue,
            }
        }
    }

    /// Retries [`MiningCoordinator::request_lock`] until it succeeds or
    /// shutdown is requested. On shutdown, re-enqueues `task` and returns
    /// `None` (spec.md §4.D step 3).
    async fn acquire_lock_or_requeue(&self, task: DocumentTask) -> Option<DocumentTask> {
        loop {
            if self.coordinator.request_lock().await {
                return Some(task);
            }
            if !self.is_running() {
                self.queue.lock().await.push_front(task);
                self.queue_notify.notify_one();
                return None;
            }
            tokio::select! {
                _ = self.shutdown_notify.notified() => {
                    self.queue.lock().await.push_front(task);
                    self.queue_notify.notify_one();
                    return None;
                }
                _ = tokio::time::sleep(self.config.lock_retry_interval) => {}
            }
        }
    }

    /// Mines every page of `task` in order (spec.md §4.D step 4). Returns
    /// `Some(remaining)` when a `NEW_BLOCK` pre-empted the in-progress
    /// attempt (step 5: the failed page and everything after it is handed
    /// back to the caller to re-enqueue) or `None` when the task finished
    /// or was aborted outright (step 6: append failed for a reason other
    /// than cancellation, typically the tip moved; not re-enqueued).
    async fn mine_task(&self, mut task: DocumentTask) -> Option<DocumentTask> {
        let title = task.title().map(str::to_string);
        while let Some((page, signature)) = task.pages.pop_front() {
            let cancel = CancelToken::new();
            *self.current_cancel.lock().expect("cancel token mutex poisoned") = cancel.clone();

            let record = AppendRecord {
                page: page.clone(),
                signature: signature.clone(),
            };
            match self.ledger.append(record, cancel.clone()).await {
                Some(block) => {
                    debug!(title = ?title, index = block.index, page = page.page, "page mined");
                }
                None if cancel.is_set() => {
                    info!(
                        title = ?title,
                        page = page.page,
                        remaining = task.pages.len() + 1,
                        "mining pre-empted by a competing block; re-enqueuing remaining pages"
                    );
                    task.pages.push_front((page, signature));
                    return Some(task);
                }
                None => {
                    warn!(
                        title = ?title,
                        page = page.page,
                        "append failed without cancellation; aborting document"
                    );
                    return None;
                }
            }
        }
        None
    }
}

impl MinerControl for MiningWorker {
    fn interrupt_current(&self) {
        self.current_cancel
            .lock()
            .expect("cancel token mutex poisoned")
            .set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerpdf_core::{LedgerConfig, NullCoordinator};
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn test_keypair() -> (String, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
        let public_key = RsaPublicKey::from(&private_key);
        (
            private_key.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF).unwrap().to_string(),
            public_key.to_public_key_pem(rsa::pkcs8::LineEnding::LF).unwrap(),
        )
    }

    fn page_task(title: &str, contents: &[&str], public_key: &str, private_key: &str) -> DocumentTask {
        let pages = contents
            .iter()
            .enumerate()
            .map(|(i, content)| {
                let digest = ledgerpdf_core::page_digest(content, title, i as i64 + 1);
                let signature = ledgerpdf_crypto::sign_digest(&digest, private_key).unwrap();
                (
                    PageRecord {
                        title: title.to_string(),
                        page: i as u64,
                        content: content.to_string(),
                        public_key: public_key.to_string(),
                    },
                    signature,
                )
            })
            .collect();
        DocumentTask::new(pages)
    }

    #[tokio::test]
    async fn mines_every_page_of_an_enqueued_document() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(
            Ledger::open(LedgerConfig { path: dir.path().join("chain.json"), difficulty: 1 })
                .await
                .unwrap(),
        );
        let (private_key, public_key) = test_keypair();
        let worker = MiningWorker::new(ledger.clone(), Arc::new(NullCoordinator), WorkerConfig::default());

        worker
            .enqueue(page_task("Doc", &["page one", "page two"], &public_key, &private_key))
            .await;

        let run_handle = tokio::spawn(worker.clone().run());
        worker.wait_idle().await;
        worker.stop();
        run_handle.await.unwrap();

        assert_eq!(ledger.length().await, 3);
        assert!(ledger.is_valid().await);
        assert_eq!(ledger.get_by_title("Doc").await.len(), 2);
    }

    #[tokio::test]
    async fn interrupting_mid_document_requeues_remaining_pages() {
        let dir = tempfile::tempdir().unwrap();
        // High enough difficulty that the first page's PoW does not finish
        // before the interrupt arrives.
        let ledger = Arc::new(
            Ledger::open(LedgerConfig { path: dir.path().join("chain.json"), difficulty: 6 })
                .await
                .unwrap(),
        );
        let (private_key, public_key) = test_keypair();
        let worker = MiningWorker::new(ledger.clone(), Arc::new(NullCoordinator), WorkerConfig::default());

        worker
            .enqueue(page_task("Doc", &["page one", "page two"], &public_key, &private_key))
            .await;

        let run_handle = tokio::spawn(worker.clone().run());
        // Give the worker a moment to pick up the task and start PoW, then interrupt.
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.interrupt_current();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The requeued task should still be in the queue (picked back up on
        // the next loop iteration since the lock is free again).
        worker.stop();
        run_handle.await.unwrap();

        // Either it was re-picked-up and mined at a lower effective cost is
        // not guaranteed by this test; what matters is no page was lost and
        // nothing was double-committed beyond genesis.
        assert!(ledger.length().await <= 3);
        assert!(ledger.is_valid().await);
    }

    #[tokio::test]
    async fn is_working_reflects_in_flight_mining() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(
            Ledger::open(LedgerConfig { path: dir.path().join("chain.json"), difficulty: 1 })
                .await
                .unwrap(),
        );
        let worker = MiningWorker::new(ledger, Arc::new(NullCoordinator), WorkerConfig::default());
        assert!(!worker.is_working());
    }
}
