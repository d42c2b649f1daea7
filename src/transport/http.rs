//! HTTP implementations of the fetch and stream contracts.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::coordinator::Params;
use crate::error::{Result, SyncError};
use crate::transport::{DomainFetcher, FrameStream, StreamConnector, TokenSource};

/// Maps an HTTP status to the error taxonomy.
fn check_status(status: StatusCode) -> Result<()> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::NotAuthorized),
        s if s.is_success() => Ok(()),
        s => Err(SyncError::Network(format!("unexpected status {}", s))),
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// == Http Fetcher ==
/// GETs a JSON payload, sending params as the query string.
///
/// The bearer credential is read from `tokens` on every request.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpFetcher {
    pub fn new(client: Client, base_url: &str, path: &str, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            url: join_url(base_url, path),
            tokens,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DomainFetcher for HttpFetcher {
    async fn fetch(&self, params: &Params) -> Result<Value> {
        let mut request = self.client.get(&self.url).query(&params.to_query());
        if let Some(token) = self.tokens.token() {
            request = request.bearer_auth(token);
        }

        debug!(url = %self.url, "fetching");
        let response = request.send().await?;
        check_status(response.status())?;
        Ok(response.json::<Value>().await?)
    }
}

// == Http Stream Connector ==
/// Opens a newline-delimited JSON push stream.
///
/// The credential travels as the `token` query parameter.
#[derive(Debug, Clone)]
pub struct HttpStreamConnector {
    client: Client,
    url: String,
}

impl HttpStreamConnector {
    pub fn new(client: Client, base_url: &str, path: &str) -> Self {
        Self {
            client,
            url: join_url(base_url, path),
        }
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn open(&self, token: &str) -> Result<FrameStream> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("token", token)])
            .header(ACCEPT, "application/x-ndjson")
            .send()
            .await?;
        check_status(response.status())?;

        debug!(url = %self.url, "live stream opened");
        Ok(ndjson_lines(response.bytes_stream()).boxed())
    }
}

// == Line Splitting ==
/// Longest accepted frame line.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

struct LineState<S> {
    inner: Pin<Box<S>>,
    buf: Vec<u8>,
    max_line: usize,
    /// Dropping the remainder of an overlong line
    skipping: bool,
    done: bool,
}

/// Splits a chunked byte stream into lines.
///
/// Blank lines (keep-alives) are skipped, a trailing `\r` is stripped, and a
/// final unterminated line is emitted when the body ends. A line longer than
/// [`MAX_LINE_BYTES`] yields one `MalformedPayload` and is discarded up to
/// its newline. The first transport error ends the stream.
pub fn ndjson_lines<S, B, E>(chunks: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<SyncError> + Send + 'static,
{
    split_lines(chunks, MAX_LINE_BYTES)
}

fn split_lines<S, B, E>(chunks: S, max_line: usize) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<SyncError> + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(chunks),
        buf: Vec::new(),
        max_line,
        skipping: false,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = st.buf.drain(..=pos).collect();
                if st.skipping {
                    st.skipping = false;
                    continue;
                }
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some((Ok(String::from_utf8_lossy(&line).into_owned()), st));
            }

            if st.buf.len() > st.max_line {
                st.buf.clear();
                if !st.skipping {
                    st.skipping = true;
                    let err = SyncError::MalformedPayload(format!(
                        "stream line exceeds {} bytes",
                        st.max_line
                    ));
                    return Some((Err(err), st));
                }
            }

            if st.done {
                return None;
            }

            match st.inner.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(err.into()), st));
                }
                None => {
                    st.done = true;
                    let rest = std::mem::take(&mut st.buf);
                    if !st.skipping && !rest.iter().all(u8::is_ascii_whitespace) {
                        return Some((Ok(String::from_utf8_lossy(&rest).into_owned()), st));
                    }
                    return None;
                }
            }
        }
    })
}
