//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};

use crate::coordinator::Params;
use crate::error::{Result, SyncError};
use crate::transport::{DomainFetcher, FrameStream, StreamConnector};

// == Mock Fetcher ==
/// Counts calls and answers `{ "call": n, "params": {..} }`.
#[derive(Default)]
pub struct MockFetcher {
    calls: AtomicUsize,
    fail: AtomicBool,
    reject: AtomicBool,
    gate: Option<Arc<Semaphore>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fetches block until a permit is added to the returned semaphore.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (Arc::new(fetcher), gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Answer every fetch with `NotAuthorized`.
    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl DomainFetcher for MockFetcher {
    async fn fetch(&self, params: &Params) -> Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| SyncError::Internal(e.to_string()))?;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(SyncError::NotAuthorized);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Network("mock failure".to_string()));
        }
        Ok(json!({ "call": call, "params": params }))
    }
}

// == Mock Connector ==
/// One scripted outcome of `open`.
pub enum OpenScript {
    Fail(SyncError),
    Stream(mpsc::UnboundedReceiver<Result<String>>),
}

/// Stream connector driven by a script; opens fail once the script runs out.
#[derive(Default)]
pub struct MockConnector {
    opens: AtomicUsize,
    script: Mutex<VecDeque<OpenScript>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn push(&self, script: OpenScript) {
        self.script.lock().unwrap().push_back(script);
    }

    /// Queues a successful open and returns the sender feeding its frames.
    pub fn push_stream(&self) -> mpsc::UnboundedSender<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(OpenScript::Stream(rx));
        tx
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn open(&self, _token: &str) -> Result<FrameStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(OpenScript::Stream(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(OpenScript::Fail(err)) => Err(err),
            None => Err(SyncError::Network("connection refused".to_string())),
        }
    }
}
