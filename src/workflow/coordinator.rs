//! The relogin state machine.
//!
//! One `Coordinator` drives one claimed key from `RestartingProtocol` to a
//! terminal state inside its own tokio task:
//!
//! ```text
//! RestartingProtocol --restart ok--> WaitingForQrCode --fresh file--> SendingQrCode
//!        |                               ^    |                          |     |
//!     restart err                   read err  qr timeout            read ok    |
//!        v                               |    v                          v     |
//!      Failed <-------------------------------+                 WaitingForAuth |
//!                                        +-----------------------------------+
//! WaitingForAuth --continue--> RestartingCore --restart ok--> Finished
//!        |                             |
//!   auth timeout                  restart err --> Failed
//! ```
//!
//! Cancel (signal, service shutdown or the notifier going away) is observed at
//! every suspension point and ends the run in `Cancelled` without any further
//! collaborator calls. The claim is released before the terminal event is
//! sent, so the key is free by the time the caller hears about it.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactSource;
use crate::error::{Error, TimeoutKind};
use crate::instance::{InstanceAction, InstanceController};
use crate::notify::Notifier;
use crate::{rlog, rlog_debug, rlog_trace, rlog_warn};

use super::registry::{Claim, Mailbox};
use super::{WorkflowEvent, WorkflowOutcome, WorkflowSettings, WorkflowState, WorkflowTargets};

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    CancelSignal,
    Shutdown,
    Disconnected,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::CancelSignal => write!(f, "cancel requested"),
            Interrupt::Shutdown => write!(f, "service shutting down"),
            Interrupt::Disconnected => write!(f, "requester disconnected"),
        }
    }
}

/// Everything that can cancel a run.
struct Interrupts {
    cancel_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
    notifier: Arc<dyn Notifier>,
}

impl Interrupts {
    async fn wait(&mut self) -> Interrupt {
        tokio::select! {
            biased;
            _ = self.cancel_rx.recv() => Interrupt::CancelSignal,
            _ = self.shutdown.cancelled() => Interrupt::Shutdown,
            _ = self.notifier.closed() => Interrupt::Disconnected,
        }
    }

    /// Non-blocking check used right before a collaborator call.
    fn pending(&mut self) -> Option<Interrupt> {
        if self.cancel_rx.try_recv().is_ok() {
            return Some(Interrupt::CancelSignal);
        }
        if self.shutdown.is_cancelled() {
            return Some(Interrupt::Shutdown);
        }
        if self.notifier.closed().now_or_never().is_some() {
            return Some(Interrupt::Disconnected);
        }
        None
    }

    /// Run a read-only call, abandoning it if an interrupt arrives first.
    async fn race<F, T>(&mut self, fut: F) -> Result<T, Interrupt>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            interrupt = self.wait() => Err(interrupt),
            value = fut => Ok(value),
        }
    }
}

/// A fresh QR code read from the protocol instance.
struct Artifact {
    content: String,
    modified_at: DateTime<Utc>,
}

/// A QR file counts only if written strictly after the restart was issued.
fn is_fresh(modified_at: DateTime<Utc>, restart_issued_at: DateTime<Utc>) -> bool {
    modified_at > restart_issued_at
}

enum Step<T> {
    Done(T),
    Stop(WorkflowOutcome),
}

pub struct Coordinator {
    claim: Claim,
    continue_rx: mpsc::Receiver<()>,
    interrupts: Interrupts,
    targets: WorkflowTargets,
    settings: WorkflowSettings,
    controller: Arc<dyn InstanceController>,
    artifacts: Arc<dyn ArtifactSource>,
    notifier: Arc<dyn Notifier>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        claim: Claim,
        mailbox: Mailbox,
        targets: WorkflowTargets,
        settings: WorkflowSettings,
        controller: Arc<dyn InstanceController>,
        artifacts: Arc<dyn ArtifactSource>,
        notifier: Arc<dyn Notifier>,
        shutdown: CancellationToken,
    ) -> Self {
        let Mailbox {
            continue_rx,
            cancel_rx,
        } = mailbox;
        Self {
            claim,
            continue_rx,
            interrupts: Interrupts {
                cancel_rx,
                shutdown,
                notifier: Arc::clone(&notifier),
            },
            targets,
            settings,
            controller,
            artifacts,
            notifier,
        }
    }

    /// Drive the workflow to a terminal state and release the key.
    pub async fn run(mut self) -> WorkflowOutcome {
        let key = self.claim.key().to_string();
        rlog!(
            "[{}] relogin started: protocol={} core={}",
            key,
            self.targets.protocol_id,
            self.targets.core_id
        );

        let outcome = self.drive().await;
        self.claim.set_state(outcome.state());

        let Self {
            claim, notifier, ..
        } = self;
        drop(claim);

        let event = match &outcome {
            WorkflowOutcome::Finished => {
                rlog!("[{}] relogin finished", key);
                WorkflowEvent::Finished { key }
            }
            WorkflowOutcome::Failed(err) => {
                rlog_warn!("[{}] relogin failed: {}", key, err);
                WorkflowEvent::Failed {
                    key,
                    kind: err.kind(),
                    reason: err.to_string(),
                }
            }
            WorkflowOutcome::Cancelled => WorkflowEvent::StateChanged {
                key,
                state: WorkflowState::Cancelled,
                message: "Relogin cancelled".to_string(),
            },
        };
        notifier.notify(event);
        outcome
    }

    async fn drive(&mut self) -> WorkflowOutcome {
        let restart_issued_at = match self.restart_protocol().await {
            Step::Done(at) => at,
            Step::Stop(outcome) => return outcome,
        };

        let artifact = match self.wait_for_artifact(restart_issued_at).await {
            Step::Done(artifact) => artifact,
            Step::Stop(outcome) => return outcome,
        };

        self.claim.set_state(WorkflowState::WaitingForAuth);
        self.notifier.notify(WorkflowEvent::ArtifactReady {
            key: self.claim.key().to_string(),
            content: artifact.content,
            generated_at: artifact.modified_at,
        });

        if let Step::Stop(outcome) = self.wait_for_confirmation().await {
            return outcome;
        }

        self.restart_core().await
    }

    fn cancelled(&self, interrupt: Interrupt) -> WorkflowOutcome {
        rlog!(
            "[{}] relogin cancelled in {}: {}",
            self.claim.key(),
            self.claim.state(),
            interrupt
        );
        WorkflowOutcome::Cancelled
    }

    fn enter(&self, state: WorkflowState, message: &str) {
        rlog_debug!("[{}] -> {}", self.claim.key(), state);
        self.claim.set_state(state);
        self.notifier.notify(WorkflowEvent::StateChanged {
            key: self.claim.key().to_string(),
            state,
            message: message.to_string(),
        });
    }

    async fn restart_protocol(&mut self) -> Step<DateTime<Utc>> {
        if let Some(interrupt) = self.interrupts.pending() {
            return Step::Stop(self.cancelled(interrupt));
        }

        let restart_issued_at = Utc::now();
        // An abandoned restart may still complete on the panel.
        let restarted = self
            .interrupts
            .race(
                self.controller
                    .action(&self.targets.protocol_id, InstanceAction::Restart),
            )
            .await;
        match restarted {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Step::Stop(WorkflowOutcome::Failed(Error::Upstream(format!(
                    "failed to restart protocol instance {}: {}",
                    self.targets.protocol_id, e
                ))));
            }
            Err(interrupt) => return Step::Stop(self.cancelled(interrupt)),
        }

        self.enter(
            WorkflowState::WaitingForQrCode,
            "Protocol instance restarting, waiting for QR code",
        );
        Step::Done(restart_issued_at)
    }

    /// Poll until a QR file newer than `restart_issued_at` can be read.
    ///
    /// Stat and read failures are transient; only the QR timeout fails the run.
    async fn wait_for_artifact(&mut self, restart_issued_at: DateTime<Utc>) -> Step<Artifact> {
        let poll = self.settings.poll_interval;
        let deadline = sleep(self.settings.qr_timeout);
        tokio::pin!(deadline);
        let mut ticker = interval_at(Instant::now() + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let key = self.claim.key().to_string();
        let scope = self.targets.protocol_id.clone();
        let path = self.settings.qr_file.clone();

        loop {
            tokio::select! {
                biased;
                interrupt = self.interrupts.wait() => {
                    return Step::Stop(self.cancelled(interrupt));
                }
                _ = &mut deadline => {
                    return Step::Stop(WorkflowOutcome::Failed(Error::Timeout(TimeoutKind::Qr)));
                }
                _ = ticker.tick() => {}
            }

            let stat = match self.interrupts.race(self.artifacts.stat(&scope, &path)).await {
                Ok(stat) => stat,
                Err(interrupt) => return Step::Stop(self.cancelled(interrupt)),
            };

            let modified_at = match stat {
                Ok(Some(modified_at)) if is_fresh(modified_at, restart_issued_at) => modified_at,
                Ok(Some(modified_at)) => {
                    rlog_trace!("[{}] stale QR file from {}, still waiting", key, modified_at);
                    continue;
                }
                Ok(None) => {
                    rlog_trace!("[{}] QR file not present yet", key);
                    continue;
                }
                Err(e) => {
                    rlog_debug!("[{}] QR stat failed, will retry: {}", key, e);
                    continue;
                }
            };

            self.claim.set_state(WorkflowState::SendingQrCode);
            match self.interrupts.race(self.artifacts.read_as_text(&scope, &path)).await {
                Ok(Ok(content)) => {
                    rlog!("[{}] fresh QR code found (modified {})", key, modified_at);
                    return Step::Done(Artifact {
                        content,
                        modified_at,
                    });
                }
                Ok(Err(e)) => {
                    rlog_debug!("[{}] QR read failed, will retry: {}", key, e);
                    self.claim.set_state(WorkflowState::WaitingForQrCode);
                }
                Err(interrupt) => return Step::Stop(self.cancelled(interrupt)),
            }
        }
    }

    async fn wait_for_confirmation(&mut self) -> Step<()> {
        let deadline = sleep(self.settings.auth_timeout);
        tokio::pin!(deadline);

        tokio::select! {
            biased;
            interrupt = self.interrupts.wait() => Step::Stop(self.cancelled(interrupt)),
            _ = self.continue_rx.recv() => Step::Done(()),
            _ = &mut deadline => {
                Step::Stop(WorkflowOutcome::Failed(Error::Timeout(TimeoutKind::Auth)))
            }
        }
    }

    async fn restart_core(&mut self) -> WorkflowOutcome {
        if let Some(interrupt) = self.interrupts.pending() {
            return self.cancelled(interrupt);
        }

        self.enter(
            WorkflowState::RestartingCore,
            "Login confirmed, restarting core instance",
        );

        let restarted = self
            .interrupts
            .race(
                self.controller
                    .action(&self.targets.core_id, InstanceAction::Restart),
            )
            .await;
        match restarted {
            Ok(Ok(())) => WorkflowOutcome::Finished,
            Ok(Err(e)) => WorkflowOutcome::Failed(Error::Upstream(format!(
                "failed to restart core instance {}: {}",
                self.targets.core_id, e
            ))),
            Err(interrupt) => self.cancelled(interrupt),
        }
    }
}
