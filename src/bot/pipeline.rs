// Send pipeline: the single consumer of the dispatch queue
// Maps each request to a SendMsgV2 body, performs exactly one POST, then waits
// the send interval. Failures are logged and never retried.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use super::adapter::ApiTransport;
use super::types::SendRequest;
use super::util::{api_url, FUNC_SEND_MSG};
use crate::{ulog_debug, ulog_info, ulog_warn};

/// Consumer loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// Shutdown requested, discarding whatever is still queued
    Draining,
    Stopped,
}

pub struct SendPipeline<T: ApiTransport> {
    transport: Arc<T>,
    rx: mpsc::Receiver<SendRequest>,
    send_url: String,
    interval: Duration,
    state_tx: watch::Sender<PipelineState>,
}

impl<T: ApiTransport> SendPipeline<T> {
    pub fn new(
        transport: Arc<T>,
        rx: mpsc::Receiver<SendRequest>,
        backend: &str,
        account_id: i64,
        interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            transport,
            rx,
            send_url: api_url(backend, FUNC_SEND_MSG, account_id),
            interval,
            state_tx,
        }
    }

    /// Observe state transitions
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    /// Run until `shutdown_rx` flips to `true` or every sender is gone.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        self.state_tx.send_replace(PipelineState::Running);
        ulog_info!("[opq-send] Send pipeline started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                received = self.rx.recv() => received,
            };

            let Some(request) = received else {
                ulog_info!("[opq-send] Queue closed, no more requests");
                self.finish(PipelineState::Stopped);
                return;
            };

            if !self.send_one(&request).await {
                continue;
            }

            // Global outbound rate limit; shutdown cuts the wait short
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }

        self.state_tx.send_replace(PipelineState::Draining);
        self.rx.close();
        let mut discarded = 0usize;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            ulog_warn!("[opq-send] Discarded {} queued messages on shutdown", discarded);
        }
        self.finish(PipelineState::Stopped);
    }

    fn finish(&self, state: PipelineState) {
        self.state_tx.send_replace(state);
        ulog_info!("[opq-send] Send pipeline stopped");
    }

    /// Returns whether an HTTP attempt was made.
    async fn send_one(&self, request: &SendRequest) -> bool {
        let fields = match request.to_wire_fields() {
            Ok(fields) => fields,
            Err(e) => {
                ulog_warn!("[opq-send] Dropping message to {}: {}", request.target, e);
                return false;
            }
        };

        let body = Value::Object(fields);
        match self.transport.post_json(&self.send_url, &body).await {
            Ok(text) => {
                ulog_debug!(
                    "[opq-send] {} to {} -> {}",
                    request.kind,
                    request.target,
                    text
                );
            }
            Err(e) => {
                ulog_warn!(
                    "[opq-send] Send {} to {} failed: {}",
                    request.kind,
                    request.target,
                    e
                );
            }
        }
        true
    }
}
