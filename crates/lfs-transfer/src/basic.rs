use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use lfs_api::{Action, ObjectSpec, BASIC_ADAPTER, MEDIA_TYPE};
use lfs_store::{ContentStore, StoreError};
use lfs_types::{Direction, Oid};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::adapter::{AdapterBase, ObjectTransfer, Transfer};
use crate::error::{Result, TransferError};
use crate::progress::ProgressCallback;

const VERIFY_ACTION: &str = "verify";

/// Response chunks buffered ahead of the disk writer.
const WRITE_QUEUE_DEPTH: usize = 16;

/// The `basic` adapter: one HTTP request per object.
pub type BasicAdapter = AdapterBase<BasicTransfer>;

/// Plain HTTP transfer of a whole object.
///
/// Downloads GET the action's `href` and stream the body through the
/// store's verifying writer. Uploads PUT the file to `href` and, when the
/// server asked for it, POST `{oid, size}` to the `verify` action.
pub struct BasicTransfer {
    direction: Direction,
    store: ContentStore,
    http: reqwest::Client,
}

impl BasicTransfer {
    pub fn new(direction: Direction, store: ContentStore, http: reqwest::Client) -> Self {
        Self {
            direction,
            store,
            http,
        }
    }

    pub fn adapter(direction: Direction, store: ContentStore, http: reqwest::Client) -> BasicAdapter {
        AdapterBase::new(BASIC_ADAPTER, direction, Self::new(direction, store, http))
    }

    async fn download(&self, t: &Transfer, progress: &ProgressCallback) -> Result<()> {
        let action = usable_action(t, Direction::Download.as_str())?;
        let resp = with_headers(self.http.get(&action.href), action)
            .send()
            .await
            .map_err(|e| TransferError::request(t.oid, e))?;
        check_status(t.oid, &action.href, &resp)?;

        // Disk writes run on a blocking thread fed through a bounded channel.
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let sink = {
            let store = self.store.clone();
            let (oid, size) = (t.oid, t.size);
            tokio::task::spawn_blocking(move || write_object(&store, oid, size, rx))
        };

        let mut body = resp.bytes_stream();
        let mut received = 0u64;
        let mut failed = None;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    failed = Some(TransferError::request(t.oid, e));
                    break;
                }
            };
            let len = chunk.len();
            if tx.send(Some(chunk)).await.is_err() {
                break;
            }
            received += len as u64;
            progress(Direction::Download, &t.name, received, t.size, len);
        }
        if failed.is_none() {
            // A closed channel means the writer already failed; its error
            // comes back from the join below.
            let _ = tx.send(None).await;
        }
        drop(tx);

        let written = sink.await.map_err(|e| TransferError::Adapter {
            oid: t.oid,
            message: format!("object writer failed: {e}"),
            retriable: false,
        })??;
        if let Some(err) = failed {
            return Err(err);
        }
        let Some(size) = written else {
            return Err(TransferError::Adapter {
                oid: t.oid,
                message: "object writer stopped before the end of the body".into(),
                retriable: true,
            });
        };
        debug!(oid = %t.oid, size, "download complete");
        Ok(())
    }

    async fn upload(&self, t: &Transfer, progress: &ProgressCallback) -> Result<()> {
        let action = usable_action(t, Direction::Upload.as_str())?;
        let file = tokio::fs::File::open(&t.path)
            .await
            .map_err(|source| TransferError::Read {
                oid: t.oid,
                path: t.path.clone(),
                source,
            })?;

        let progress = Arc::clone(progress);
        let name = t.name.clone();
        let total = t.size;
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                sent += bytes.len() as u64;
                progress(Direction::Upload, &name, sent, total, bytes.len());
            }
        });

        let mut req = with_headers(self.http.put(&action.href), action).header(CONTENT_LENGTH, t.size);
        if !has_header(action, CONTENT_TYPE.as_str()) {
            req = req.header(CONTENT_TYPE, "application/octet-stream");
        }
        let resp = req
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| TransferError::request(t.oid, e))?;
        check_status(t.oid, &action.href, &resp)?;

        if let Some(verify) = t.object.action(VERIFY_ACTION) {
            self.verify(t, verify).await?;
        }
        debug!(oid = %t.oid, size = t.size, "upload complete");
        Ok(())
    }

    async fn verify(&self, t: &Transfer, action: &Action) -> Result<()> {
        let spec = ObjectSpec {
            oid: t.oid,
            size: t.size,
        };
        let body = serde_json::to_vec(&spec).map_err(|e| TransferError::Adapter {
            oid: t.oid,
            message: e.to_string(),
            retriable: false,
        })?;
        let resp = with_headers(self.http.post(&action.href), action)
            .header(ACCEPT, MEDIA_TYPE)
            .header(CONTENT_TYPE, MEDIA_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| TransferError::request(t.oid, e))?;
        check_status(t.oid, &action.href, &resp)
    }
}

#[async_trait]
impl ObjectTransfer for BasicTransfer {
    async fn transfer(&self, transfer: &Transfer, progress: &ProgressCallback) -> Result<()> {
        match self.direction {
            Direction::Download => self.download(transfer, progress).await,
            Direction::Upload => self.upload(transfer, progress).await,
        }
    }
}

/// Blocking side of a download. `Some(chunk)` is written, `None` commits.
/// Returns `None` if the channel closed without a commit, in which case the
/// partial file is discarded.
fn write_object(
    store: &ContentStore,
    oid: Oid,
    size: u64,
    mut chunks: mpsc::Receiver<Option<Bytes>>,
) -> Result<Option<u64>> {
    let mut writer = store.writer(&oid, size)?;
    while let Some(chunk) = chunks.blocking_recv() {
        match chunk {
            Some(data) => writer.write_all(&data).map_err(StoreError::from)?,
            None => return Ok(Some(writer.commit()?)),
        }
    }
    Ok(None)
}

fn usable_action<'a>(t: &'a Transfer, kind: &str) -> Result<&'a Action> {
    let action = t.object.action(kind).ok_or_else(|| TransferError::MissingAction {
        oid: t.oid,
        kind: kind.to_string(),
    })?;
    if action.is_expired() {
        return Err(TransferError::ActionExpired {
            oid: t.oid,
            kind: kind.to_string(),
        });
    }
    Ok(action)
}

fn with_headers(mut req: reqwest::RequestBuilder, action: &Action) -> reqwest::RequestBuilder {
    for (name, value) in &action.header {
        req = req.header(name.as_str(), value.as_str());
    }
    req
}

fn has_header(action: &Action, name: &str) -> bool {
    action.header.keys().any(|k| k.eq_ignore_ascii_case(name))
}

fn check_status(oid: Oid, href: &str, resp: &reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let url = href.split('?').next().unwrap_or(href).to_string();
    Err(TransferError::Status {
        oid,
        status: status.as_u16(),
        url,
    })
}
