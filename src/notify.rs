//! Delivery of workflow events to whoever started the workflow.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::rlog_debug;
use crate::workflow::WorkflowEvent;

/// Receiver of a workflow's events.
///
/// Only the task that owns the workflow calls `notify`, so implementations
/// see events one at a time and in transition order.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn notify(&self, event: WorkflowEvent);

    /// Resolves once the receiving side is gone. A running workflow treats
    /// this as cancellation.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Notifier backed by an unbounded channel.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn notify(&self, event: WorkflowEvent) {
        if let Err(e) = self.tx.send(event) {
            rlog_debug!("ChannelNotifier: receiver gone, dropped {}", e.0.name());
        }
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
