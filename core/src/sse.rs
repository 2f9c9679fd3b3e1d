/// Push transport over Server-Sent Events
///
/// Inbound: `GET /events?userId=..&connectionId=..` streaming `data: {json}` frames, one
/// `PushEvent` per frame; comment lines (`: keepalive`) are skipped.
/// Outbound: `POST /api/socket/emit` with the `ClientEmit` JSON plus the connection id, so
/// the server can attach room membership to this stream.
use crate::connection::{ClientEmit, Emitter, PushEvent, PushLink, PushTransport};
use crate::error::{Result, SyncError};
use crate::models::Session;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures_util::stream::{self, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SseTransport {
    client: Client,
    base_url: String,
}

impl SseTransport {
    /// `client` should be the one holding the session cookie
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

struct HttpEmitter {
    client: Client,
    url: String,
    connection_id: Uuid,
}

#[async_trait]
impl Emitter for HttpEmitter {
    async fn emit(&self, emit: ClientEmit) -> Result<()> {
        let mut body = serde_json::to_value(&emit)?;
        body["connectionId"] = json!(self.connection_id.to_string());
        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::Connection(format!(
                "emit rejected with status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn open(&self, session: &Session) -> Result<PushLink> {
        let connection_id = Uuid::new_v4();
        let url = format!(
            "{}/events?userId={}&connectionId={}",
            self.base_url,
            urlencoding::encode(&session.id),
            connection_id
        );
        let resp = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SyncError::Connection(format!(
                "event stream refused with status {}",
                resp.status()
            )));
        }
        debug!("SSE stream {} open", connection_id);

        let bytes = resp.bytes_stream().boxed();
        let state = (bytes, SseDecoder::default(), VecDeque::<String>::new());
        let events = stream::unfold(state, |(mut bytes, mut decoder, mut ready)| async move {
            loop {
                if let Some(data) = ready.pop_front() {
                    let parsed = serde_json::from_str::<PushEvent>(&data).map_err(SyncError::from);
                    return Some((parsed, (bytes, decoder, ready)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        let err = SyncError::Connection(e.to_string());
                        return Some((Err(err), (bytes, decoder, ready)));
                    }
                    None => return None,
                }
            }
        })
        .boxed();

        Ok(PushLink {
            events,
            emitter: Arc::new(HttpEmitter {
                client: self.client.clone(),
                url: format!("{}/api/socket/emit", self.base_url),
                connection_id,
            }),
        })
    }
}

/// Largest incomplete frame kept in memory; anything bigger is skipped up to its boundary
const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Incremental SSE frame decoder; returns the `data` payload of each complete event
#[derive(Default)]
pub struct SseDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already searched for a frame boundary
    scanned: usize,
    /// Set while skipping the rest of an oversized frame
    discarding: bool,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut out = Vec::new();
        while let Some(end) = self.next_boundary() {
            let frame = self.buf.split_to(end);
            self.buf.advance(2);
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }

            let text = String::from_utf8_lossy(&frame);
            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            if !data.is_empty() {
                out.push(data.join("\n"));
            }
        }

        if !self.discarding && self.buf.len() > MAX_FRAME_BYTES {
            warn!(
                "Dropping SSE frame over {} bytes ({} buffered)",
                MAX_FRAME_BYTES,
                self.buf.len()
            );
            self.discarding = true;
        }
        if self.discarding {
            // A boundary may straddle the next chunk
            let trailing_newline = self.buf.last() == Some(&b'\n');
            self.buf.clear();
            if trailing_newline {
                self.buf.extend_from_slice(b"\n");
            }
            self.scanned = self.buf.len();
        }
        out
    }

    /// Offset of the next `\n\n`, resuming one byte before where the last search stopped
    fn next_boundary(&mut self) -> Option<usize> {
        let from = self.scanned.saturating_sub(1);
        match self.buf[from..].windows(2).position(|w| w == b"\n\n") {
            Some(pos) => Some(from + pos),
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }
}
