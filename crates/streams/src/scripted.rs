//! A client double that answers group reads from a script and records every
//! call it receives.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client::{
    AckBatch, AppendRequest, ReadGroupReply, ReadGroupRequest, StreamClient, StreamClientError,
    StreamEntries,
};
use crate::entry::{EntryId, Fields};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("scripted failure: {0}")]
pub struct ScriptedError(pub String);

impl StreamClientError for ScriptedError {}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<ReadGroupReply, ScriptedError>>,
    cancel_on_read: Option<CancellationToken>,
    ack_failure: Option<ScriptedError>,
    reads: Vec<ReadGroupRequest>,
    acks: Vec<(String, Vec<AckBatch>)>,
    appends: Vec<AppendRequest>,
}

/// Once the script runs out, reads block forever.
#[derive(Clone, Debug, Default)]
pub struct ScriptedClient {
    script: Arc<Mutex<Script>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        Self::default()
    }

    pub fn reply(&self, streams: Vec<StreamEntries>) {
        self.push(Ok(ReadGroupReply::Streams(streams)));
    }

    pub fn time_out(&self) {
        self.push(Ok(ReadGroupReply::TimedOut));
    }

    pub fn fail(&self, message: &str) {
        self.push(Err(ScriptedError(message.to_string())));
    }

    /// Cancels the token while answering the next read, so the reply is
    /// ready by the time the caller sees the cancellation.
    pub fn cancel_on_read(&self, cancel: &CancellationToken) {
        self.script.lock().unwrap().cancel_on_read = Some(cancel.clone());
    }

    pub fn fail_ack(&self, message: &str) {
        self.script.lock().unwrap().ack_failure = Some(ScriptedError(message.to_string()));
    }

    fn push(&self, reply: Result<ReadGroupReply, ScriptedError>) {
        self.script.lock().unwrap().replies.push_back(reply);
    }

    pub fn reads(&self) -> Vec<ReadGroupRequest> {
        self.script.lock().unwrap().reads.clone()
    }

    pub fn acks(&self) -> Vec<(String, Vec<AckBatch>)> {
        self.script.lock().unwrap().acks.clone()
    }

    pub fn appends(&self) -> Vec<AppendRequest> {
        self.script.lock().unwrap().appends.clone()
    }
}

#[async_trait]
impl StreamClient for ScriptedClient {
    type Error = ScriptedError;

    async fn read_group(&self, request: ReadGroupRequest) -> Result<ReadGroupReply, Self::Error> {
        let next = {
            let mut script = self.script.lock().unwrap();
            script.reads.push(request);
            if let Some(cancel) = script.cancel_on_read.take() {
                cancel.cancel();
            }
            script.replies.pop_front()
        };

        match next {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }

    async fn ack(&self, group: &str, batches: Vec<AckBatch>) -> Result<u64, Self::Error> {
        let mut script = self.script.lock().unwrap();
        if let Some(error) = script.ack_failure.take() {
            return Err(error);
        }

        let count = batches.iter().map(|batch| batch.ids.len() as u64).sum();
        script.acks.push((group.to_string(), batches));
        Ok(count)
    }

    async fn append(&self, request: AppendRequest) -> Result<EntryId, Self::Error> {
        let mut script = self.script.lock().unwrap();
        let id = request
            .id
            .unwrap_or_else(|| EntryId::new(script.appends.len() as u64 + 1, 0));
        script.appends.push(request);
        Ok(id)
    }
}

/// Fields used by every scripted entry.
pub fn fields() -> Fields {
    Fields::from([("key".to_string(), Bytes::from_static(b"value"))])
}

/// Scripted entries for one stream with the given millisecond ids.
pub fn entries(stream: &str, millis: &[u64]) -> StreamEntries {
    StreamEntries::new(
        stream,
        millis
            .iter()
            .map(|&ms| (EntryId::new(ms, 0), fields()))
            .collect(),
    )
}
