//! Live-connection server.
//!
//! Each WebSocket connection gets a reader loop that dispatches requests in
//! order and a writer task that owns the socket sink. Responses and workflow
//! events share one outbound queue, so a connection sees them in the order
//! they were produced. When the connection goes away the writer is aborted,
//! which closes the queue and cancels every relogin the connection started.

mod dispatch;
mod protocol;

pub use dispatch::dispatch;
pub use protocol::{parse_request, Outbound, Request, Response, CODE_BAD_REQUEST, CODE_OK};

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::notify::Notifier;
use crate::service::ReloginService;
use crate::workflow::WorkflowEvent;
use crate::{rlog, rlog_debug, rlog_warn};

/// Forwards workflow events to one connection's outbound queue.
pub struct ConnectionNotifier {
    out: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionNotifier {
    pub fn new(out: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { out }
    }
}

#[async_trait]
impl Notifier for ConnectionNotifier {
    fn notify(&self, event: WorkflowEvent) {
        if self.out.send(Outbound::Event(event)).is_err() {
            rlog_debug!("ConnectionNotifier: connection gone, event dropped");
        }
    }

    async fn closed(&self) {
        self.out.closed().await
    }
}

/// Accept connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    service: Arc<ReloginService>,
    shutdown: CancellationToken,
) -> Result<()> {
    rlog!("Listening on {}", listener.local_addr()?);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let service = Arc::clone(&service);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, service, shutdown).await {
                            rlog_warn!("Connection {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => rlog_warn!("Accept failed: {}", e),
            },
        }
    }
    rlog!("Server stopped accepting connections");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<ReloginService>,
    shutdown: CancellationToken,
) -> Result<()> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    rlog!("Client connected: {}", peer);

    let (mut sink, mut source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = serde_json::to_string(&frame)?;
            sink.send(Message::Text(text)).await?;
        }
        sink.close().await?;
        Ok::<(), crate::Error>(())
    });

    let notifier: Arc<dyn Notifier> = Arc::new(ConnectionNotifier::new(out_tx.clone()));
    let result: Result<()> = loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break Ok(()),
            frame = source.next() => frame,
        };

        match frame {
            None | Some(Ok(Message::Close(_))) => break Ok(()),
            Some(Ok(Message::Text(text))) => {
                let response = match parse_request(&text) {
                    Ok(request) => dispatch(&service, &request, &notifier).await,
                    Err(response) => response,
                };
                if out_tx.send(Outbound::Response(response)).is_err() {
                    break Ok(());
                }
            }
            Some(Ok(Message::Binary(_))) => {
                let response = Response::bad_request("", "binary frames are not supported");
                if out_tx.send(Outbound::Response(response)).is_err() {
                    break Ok(());
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break Err(e.into()),
        }
    };

    // Running workflows hold sender clones; dropping the receiver is what
    // tells them the connection is gone.
    writer.abort();
    rlog!("Client disconnected: {}", peer);
    result
}
