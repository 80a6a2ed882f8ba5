//! The background upload worker.
//!
//! Producers enqueue files from anywhere; the first enqueue into an idle
//! queue starts a drain task that connects once, logs in once, and uploads
//! the whole batch over that single connection. Later enqueues feed the
//! running batch. The drain reports one [`BatchReport`] when the queue is
//! empty, over a channel handed to whoever started it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use hoist_core::constants::CHUNK_SIZE;
use hoist_core::trust::TrustStore;

use crate::config::ClientConfig;
use crate::connection::ClientSession;
use crate::error::ClientError;
use crate::notice::{BatchAbort, BatchReport};
use crate::queue::{UploadItem, UploadQueue};

/// Throughput sample for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub file_name: String,
    pub sent: u64,
    pub total: u64,
    /// Bytes per second, averaged over the file so far.
    pub rate: u64,
}

/// Minimum time between progress events for one file. The first chunk
/// always emits one, so short uploads still show up.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// How an individual item's upload came apart.
enum SendError {
    /// The server refused the slot; the session stays usable.
    Rejected,
    /// The source file could not be opened; the server was never asked.
    Local(std::io::Error),
    /// The connection is spent, either mid-transfer or on the wire.
    Transport(ClientError),
}

/// Handle for queueing uploads. Cheap to clone; all clones feed the same
/// queue and progress stream.
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ClientConfig,
    queue: UploadQueue,
    /// Held for the whole drain, so there is never more than one
    /// connection attempt in flight.
    connect_gate: tokio::sync::Mutex<()>,
    progress_tx: mpsc::UnboundedSender<Progress>,
}

impl UploadService {
    /// Create the service and the progress stream the presentation layer
    /// listens on.
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let service = Self {
            inner: Arc::new(ServiceInner {
                config,
                queue: UploadQueue::new(),
                connect_gate: tokio::sync::Mutex::new(()),
                progress_tx,
            }),
        };
        (service, progress_rx)
    }

    /// Queue items for upload.
    ///
    /// When no drain is running this starts one and returns the channel
    /// its [`BatchReport`] arrives on; enqueues that joined a running
    /// batch get `None`, their outcome lands in that batch's report.
    pub fn enqueue(&self, items: Vec<UploadItem>) -> Option<oneshot::Receiver<BatchReport>> {
        if !self.inner.queue.push_and_claim(items) {
            return None;
        }
        let (report_tx, report_rx) = oneshot::channel();
        let service = self.clone();
        tokio::spawn(async move {
            let report = service.drain().await;
            // The starter may have stopped listening; the report is
            // already logged either way.
            let _ = report_tx.send(report);
        });
        Some(report_rx)
    }

    /// Convenience wrapper: build items from paths and enqueue them.
    /// Paths without a usable file name are skipped.
    pub fn enqueue_paths<I>(
        &self,
        paths: I,
        temporary: bool,
    ) -> Option<oneshot::Receiver<BatchReport>>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let items = paths
            .into_iter()
            .filter_map(|path| UploadItem::from_path(&path, temporary))
            .collect();
        self.enqueue(items)
    }

    /// Number of items still waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    async fn drain(&self) -> BatchReport {
        let _gate = self.inner.connect_gate.lock().await;
        let config = &self.inner.config;
        let mut report = BatchReport::default();

        let mut trust = match TrustStore::open(&config.trust_store_path) {
            Ok(trust) => trust,
            Err(e) => {
                warn!(error = %e, "Could not open the trust store");
                return self.abort_batch(report, BatchAbort::Untrusted).await;
            }
        };

        let mut session = match ClientSession::connect(config.server_addr, &mut trust).await {
            Ok(session) => session,
            Err(ClientError::Untrusted(e)) => {
                warn!(server = %config.server_addr, error = %e, "Server key rejected");
                return self.abort_batch(report, BatchAbort::Untrusted).await;
            }
            Err(e) => {
                warn!(server = %config.server_addr, error = %e, "Could not connect");
                return self.abort_batch(report, BatchAbort::ConnectFailed).await;
            }
        };

        match session.login(&config.user_id, &config.password).await {
            Ok(()) => {}
            Err(ClientError::LoginFailed) => {
                warn!(user = %config.user_id, "Login rejected");
                return self.abort_batch(report, BatchAbort::LoginFailed).await;
            }
            Err(e) => {
                warn!(error = %e, "Connection failed during login");
                return self.abort_batch(report, BatchAbort::ConnectFailed).await;
            }
        }
        info!(user = %config.user_id, server = %config.server_addr, "Upload session ready");

        while let Some(item) = self.inner.queue.next_or_release() {
            match self.send_item(&mut session, &item).await {
                Ok(link) => {
                    report.succeeded += 1;
                    report.links.push(link);
                }
                Err(SendError::Rejected) => {
                    info!(file = %item.remote_name(), "Upload refused by the server");
                    report.failed += 1;
                }
                Err(SendError::Local(e)) => {
                    warn!(file = %item.path().display(), error = %e, "Skipping unreadable file");
                    report.failed += 1;
                }
                Err(SendError::Transport(e)) => {
                    warn!(file = %item.remote_name(), error = %e, "Connection lost mid-batch");
                    report.failed += 1;
                    self.cleanup_item(&item).await;
                    for rest in self.inner.queue.abort_remaining() {
                        report.failed += 1;
                        self.cleanup_item(&rest).await;
                    }
                    break;
                }
            }
            self.cleanup_item(&item).await;
        }

        if let Err(e) = session.close().await {
            debug!(error = %e, "Close handshake failed");
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch finished"
        );
        report
    }

    /// Fail every queued item without contacting the server. Temporary
    /// artifacts still get their cleanup.
    async fn abort_batch(&self, mut report: BatchReport, abort: BatchAbort) -> BatchReport {
        for item in self.inner.queue.abort_remaining() {
            report.failed += 1;
            self.cleanup_item(&item).await;
        }
        report.abort = Some(abort);
        report
    }

    /// Upload one file over the established session.
    async fn send_item(
        &self,
        session: &mut ClientSession,
        item: &UploadItem,
    ) -> Result<String, SendError> {
        let path = item.path();
        let (mut file, size) = match open_source(&path).await {
            Ok(pair) => pair,
            Err(e) => return Err(SendError::Local(e)),
        };

        let transfer_key = match session.initiate_upload(&item.remote_name(), size).await {
            Ok(Some(key)) => key,
            Ok(None) => return Err(SendError::Rejected),
            Err(e) => return Err(SendError::Transport(e)),
        };

        debug!(file = %item.remote_name(), size, "Upload started");
        let started = Instant::now();
        let mut last_progress: Option<Instant> = None;
        let mut sent: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];

        while sent < size {
            // Never read past the size we declared; the file may have
            // changed on disk since the metadata call.
            let want = CHUNK_SIZE.min((size - sent) as usize);
            let n = match fill_chunk(&mut file, &mut buf[..want]).await {
                Ok(0) => {
                    let e = std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "source file ended before its declared size",
                    );
                    return Err(SendError::Transport(ClientError::Io(e)));
                }
                Ok(n) => n,
                Err(e) => return Err(SendError::Transport(ClientError::Io(e))),
            };
            if let Err(e) = session.upload_packet(&transfer_key, buf[..n].to_vec()).await {
                return Err(SendError::Transport(e));
            }
            sent += n as u64;

            let now = Instant::now();
            let due = match last_progress {
                None => true,
                Some(at) => now.duration_since(at) >= PROGRESS_INTERVAL,
            };
            if due {
                last_progress = Some(now);
                self.emit_progress(item, sent, size, started);
            }
        }
        self.emit_progress(item, sent, size, started);

        match session.finish_upload().await {
            Ok(link) => {
                info!(file = %item.remote_name(), link = %link, "Upload finished");
                Ok(link)
            }
            Err(e) => Err(SendError::Transport(e)),
        }
    }

    fn emit_progress(&self, item: &UploadItem, sent: u64, total: u64, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis().max(1) as u64;
        let _ = self.inner.progress_tx.send(Progress {
            file_name: item.remote_name(),
            sent,
            total,
            rate: sent.saturating_mul(1000) / elapsed_ms,
        });
    }

    /// Remove a temporary artifact from disk once its outcome is recorded:
    /// moved into the archive directory when one is configured, deleted
    /// otherwise. Durable items are left alone.
    async fn cleanup_item(&self, item: &UploadItem) {
        if !item.temporary {
            return;
        }
        let path = item.path();
        if !path.exists() {
            return;
        }
        match &self.inner.config.archive_dir {
            Some(dir) => {
                if let Err(e) = archive_file(&path, dir).await {
                    warn!(file = %path.display(), error = %e, "Could not archive a temporary file");
                }
            }
            None => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(file = %path.display(), error = %e, "Could not delete a temporary file");
                    }
                }
            }
        }
    }
}

async fn open_source(path: &Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}

/// Read until `buf` is full or the file ends.
async fn fill_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Move `path` into `archive_dir`, appending `_1`, `_2`, ... before the
/// extension while the target name is taken.
async fn archive_file(path: &Path, archive_dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(archive_dir).await?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    let extension = path.extension().and_then(|e| e.to_str());

    let mut counter = 0u32;
    let target = loop {
        let name = match (counter, extension) {
            (0, Some(ext)) => format!("{stem}.{ext}"),
            (0, None) => stem.to_string(),
            (n, Some(ext)) => format!("{stem}_{n}.{ext}"),
            (n, None) => format!("{stem}_{n}"),
        };
        let candidate = archive_dir.join(name);
        if !candidate.exists() {
            break candidate;
        }
        counter += 1;
    };
    tokio::fs::rename(path, target).await
}
