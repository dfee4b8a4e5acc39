// OPQ bot session
// Owns the outbound dispatch queue, the send pipeline task, the inbound
// stream task and the event router for one controlled account.

pub mod adapter;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod socketio;
pub mod types;
mod util;

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::BotConfig;
use crate::{ulog_debug, ulog_error, ulog_info, ulog_warn};

use adapter::{ApiTransport, HttpTransport};
use error::{BotError, RouterError};
use pipeline::{PipelineState, SendPipeline};
use queue::{DispatchQueue, EnqueueOutcome};
use router::EventRouter;
use socketio::InboundStream;
use types::{InboundEvent, SendRequest};
use util::{api_url, ws_endpoint, FUNC_RECALL_MSG};

/// Session lifecycle. A session is started at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Stopped,
}

pub struct BotSession<T: ApiTransport = HttpTransport> {
    config: BotConfig,
    transport: Arc<T>,
    queue: Arc<DispatchQueue>,
    router: Arc<EventRouter>,
    state: Mutex<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    pipeline_state: watch::Sender<PipelineState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BotSession<HttpTransport> {
    /// Session for `account_id` against the backend at `backend_address`.
    pub fn new(account_id: i64, backend_address: impl Into<String>) -> Result<Self, BotError> {
        Self::from_config(BotConfig::new(account_id, backend_address))
    }

    pub fn from_config(config: BotConfig) -> Result<Self, BotError> {
        let transport = HttpTransport::new(config.request_timeout(), config.active_proxy())?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: ApiTransport> BotSession<T> {
    pub fn with_transport(config: BotConfig, transport: T) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (pipeline_state, _) = watch::channel(PipelineState::Idle);
        Self {
            queue: Arc::new(DispatchQueue::new(config.queue_capacity)),
            router: Arc::new(EventRouter::new(config.qq)),
            transport: Arc::new(transport),
            config,
            state: Mutex::new(SessionState::Created),
            shutdown_tx,
            pipeline_state,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn account_id(&self) -> i64 {
        self.config.qq
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn pipeline_state(&self) -> PipelineState {
        *self.pipeline_state.borrow()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connect the inbound stream and spawn the send pipeline.
    ///
    /// Fails fast: if the initial WebSocket handshake fails the error is
    /// returned and the session is stopped for good.
    pub async fn start(&self) -> Result<(), BotError> {
        match self.state() {
            SessionState::Created => {}
            SessionState::Running => return Err(BotError::AlreadyStarted),
            SessionState::Stopped => return Err(BotError::Stopped),
        }

        let url = ws_endpoint(&self.config.opq_url);
        ulog_info!("[opq] Connecting to {}", url);
        let ws = match socketio::connect(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                ulog_error!("[opq] Initial connection failed: {}", e);
                self.stop();
                return Err(BotError::Connect(e));
            }
        };

        let rx = {
            let mut state = self.lock_state();
            match *state {
                SessionState::Created => {}
                // start() raced with stop() or a concurrent start()
                SessionState::Running => return Err(BotError::AlreadyStarted),
                SessionState::Stopped => return Err(BotError::Stopped),
            }
            let Some(rx) = self.queue.take_receiver() else {
                return Err(BotError::AlreadyStarted);
            };
            *state = SessionState::Running;
            rx
        };

        let pipeline = SendPipeline::new(
            Arc::clone(&self.transport),
            rx,
            &self.config.opq_url,
            self.config.qq,
            self.config.send_interval(),
        );
        let mut pipeline_rx = pipeline.state();
        let state_tx = self.pipeline_state.clone();
        let pipeline_handle = tokio::spawn(pipeline.run(self.shutdown_tx.subscribe()));
        // Mirror the pipeline's state so callers can observe it from the session
        let mirror_handle = tokio::spawn(async move {
            loop {
                let current = *pipeline_rx.borrow_and_update();
                state_tx.send_replace(current);
                if current == PipelineState::Stopped || pipeline_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        let stream = InboundStream::new(url, Arc::clone(&self.router));
        let stream_handle = tokio::spawn(stream.run(ws, self.shutdown_tx.subscribe()));

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.push(pipeline_handle);
        tasks.push(mirror_handle);
        tasks.push(stream_handle);

        ulog_info!("[opq] Session started for {}", self.config.qq);
        Ok(())
    }

    /// Stop the session. Idempotent; does not wait for an in-flight send.
    pub fn stop(&self) {
        {
            let mut state = self.lock_state();
            if *state == SessionState::Stopped {
                return;
            }
            *state = SessionState::Stopped;
        }
        self.queue.close();
        self.shutdown_tx.send_replace(true);
        ulog_info!("[opq] Session stopped for {}", self.config.qq);
    }

    /// Resolves once the send pipeline reached `Stopped`, or immediately if
    /// it never ran.
    pub async fn wait_stopped(&self) {
        let spawned = !self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_empty();
        if !spawned {
            return;
        }
        let mut rx = self.pipeline_state.subscribe();
        let _ = rx.wait_for(|s| *s == PipelineState::Stopped).await;
    }

    /// Stop and wait for the background tasks to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            tasks.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                ulog_warn!("[opq] Background task ended abnormally: {}", e);
            }
        }
    }

    /// Queue an outbound message. Never blocks; a full or closed queue drops it.
    pub fn send(&self, request: SendRequest) {
        match self.queue.enqueue(request) {
            EnqueueOutcome::Queued => {}
            EnqueueOutcome::DroppedFull => ulog_debug!("[opq] Send queue full, message dropped"),
            EnqueueOutcome::Closed => ulog_debug!("[opq] Session stopped, message dropped"),
        }
    }

    /// Messages waiting for the pipeline
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Register the callback for event `E`, replacing any previous one.
    pub fn on<E, F>(&self, callback: F)
    where
        E: InboundEvent,
        F: Fn(i64, E::Payload) + Send + Sync + 'static,
    {
        self.router.on::<E, F>(callback);
    }

    /// Name-keyed registration, see [`EventRouter::register`].
    pub fn register<P, F>(&self, event_name: &str, callback: F) -> Result<(), RouterError>
    where
        P: serde::de::DeserializeOwned + 'static,
        F: Fn(i64, P) + Send + Sync + 'static,
    {
        self.router.register::<P, F>(event_name, callback)
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Recall a group message. Goes straight to the backend, bypassing the queue.
    pub async fn recall_message(&self, group_id: i64, msg_random: i64, msg_seq: i64) {
        let url = api_url(&self.config.opq_url, FUNC_RECALL_MSG, self.config.qq);
        let body = json!({
            "GroupID": group_id,
            "MsgSeq": msg_seq,
            "MsgRandom": msg_random,
        });
        match self.transport.post_json(&url, &body).await {
            Ok(text) => ulog_info!("[opq] Recall {}/{} -> {}", group_id, msg_seq, text),
            Err(e) => ulog_warn!("[opq] Recall {}/{} failed: {}", group_id, msg_seq, e),
        }
    }
}

impl<T: ApiTransport> Drop for BotSession<T> {
    fn drop(&mut self) {
        self.queue.close();
        self.shutdown_tx.send_replace(true);
    }
}
