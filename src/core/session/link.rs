//! Single writer per link.
//!
//! All frames for one link go through one task so writes never interleave.
//! Two queues feed it: a bounded queue for ordinary requests and an unbounded
//! priority queue that is always drained first. Emergency stops use the
//! priority queue.

use crate::core::communication::transport::FrameSink;
use crate::domain::error::TransportError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) type WriteAck = oneshot::Sender<Result<(), TransportError>>;

/// A frame queued for writing
pub(crate) struct Outbound {
    pub text: String,
    /// Told once the frame has been handed to the transport
    pub written: Option<WriteAck>,
}

impl Outbound {
    pub fn new(text: String) -> Self {
        Self { text, written: None }
    }

    pub fn acked(text: String) -> (Self, oneshot::Receiver<Result<(), TransportError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                text,
                written: Some(tx),
            },
            rx,
        )
    }
}

/// Handle to the writer task of one link
#[derive(Clone)]
pub(crate) struct LinkWriter {
    normal: mpsc::Sender<Outbound>,
    priority: mpsc::UnboundedSender<Outbound>,
    token: CancellationToken,
}

impl LinkWriter {
    /// Spawn the writer task for `sink`; it stops when `token` is cancelled
    /// or a write fails, and cancels `token` on the way out.
    pub fn spawn(
        sink: Box<dyn FrameSink>,
        capacity: usize,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (normal_tx, normal_rx) = mpsc::channel(capacity.max(1));
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(sink, priority_rx, normal_rx, token.clone()));
        (
            Self {
                normal: normal_tx,
                priority: priority_tx,
                token,
            },
            handle,
        )
    }

    /// Queue an ordinary frame, waiting for queue capacity
    pub async fn send(&self, outbound: Outbound) -> Result<(), TransportError> {
        self.normal
            .send(outbound)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Queue a frame ahead of everything in the ordinary queue
    pub fn send_priority(&self, outbound: Outbound) -> Result<(), TransportError> {
        self.priority
            .send(outbound)
            .map_err(|_| TransportError::Closed)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

pub(crate) async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut priority_rx: mpsc::UnboundedReceiver<Outbound>,
    mut normal_rx: mpsc::Receiver<Outbound>,
    token: CancellationToken,
) {
    loop {
        let outbound = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            Some(outbound) = priority_rx.recv() => outbound,
            Some(outbound) = normal_rx.recv() => outbound,
            else => break,
        };

        let result = sink.send_text(outbound.text).await;
        let failed = result.is_err();
        if let Err(e) = &result {
            warn!("Write failed, dropping link: {}", e);
        }
        if let Some(ack) = outbound.written {
            let _ = ack.send(result);
        }
        if failed {
            break;
        }
    }

    token.cancel();
    if let Err(e) = sink.close().await {
        debug!("Closing sink: {}", e);
    }
}
