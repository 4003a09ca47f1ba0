//! Application facade over the workflow core and its collaborators.
//!
//! `ReloginService` is what the live-connection server and the CLI talk to.
//! It owns the registry, the resolver and the shared collaborators, and
//! spawns one coordinator task per accepted relogin.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifact::{ArtifactSource, LocalArtifactSource};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::instance::{Dashboard, InstanceAction, InstanceController, InstanceDetail};
use crate::notify::Notifier;
use crate::panel::PanelClient;
use crate::store::{Binding, BindingStore, SqliteBindingStore};
use crate::workflow::{
    Coordinator, SignalKind, TargetResolver, WorkflowId, WorkflowOutcome, WorkflowRegistry,
    WorkflowSettings, WorkflowState, WorkflowTargets, ID_PREFIX,
};
use crate::{rlog, rlog_debug};

/// Parameters for starting a relogin.
#[derive(Debug, Clone)]
pub struct BeginRequest {
    /// Workflow key, normally the alias the operator uses.
    pub key: String,
    pub protocol_target: String,
    pub core_target: String,
}

/// Handle to a started workflow.
#[derive(Debug)]
pub struct WorkflowTicket {
    pub id: WorkflowId,
    pub key: String,
    pub targets: WorkflowTargets,
    handle: JoinHandle<WorkflowOutcome>,
}

impl WorkflowTicket {
    /// Wait for the workflow task to reach its terminal state.
    pub async fn wait(self) -> Result<WorkflowOutcome> {
        self.handle
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum StatusReport {
    Dashboard(Dashboard),
    Instance {
        target: String,
        instance_id: String,
        detail: InstanceDetail,
    },
}

pub struct ReloginService {
    registry: Arc<WorkflowRegistry>,
    resolver: TargetResolver,
    controller: Arc<dyn InstanceController>,
    artifacts: Arc<dyn ArtifactSource>,
    store: Arc<dyn BindingStore>,
    settings: WorkflowSettings,
    core_suffix: String,
    shutdown: CancellationToken,
}

impl ReloginService {
    pub fn new(
        controller: Arc<dyn InstanceController>,
        artifacts: Arc<dyn ArtifactSource>,
        store: Arc<dyn BindingStore>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            registry: WorkflowRegistry::new(),
            resolver: TargetResolver::new(Arc::clone(&store)),
            controller,
            artifacts,
            store,
            settings,
            core_suffix: "_core".to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_core_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.core_suffix = suffix.into();
        self
    }

    /// Wire the panel client, artifact source and binding store from config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let panel = Arc::new(PanelClient::new(&config.panel)?);
        let artifacts: Arc<dyn ArtifactSource> = match config.local_artifact_base() {
            Some(base) => {
                rlog!("Reading QR files from {}", base.display());
                Arc::new(LocalArtifactSource::new(Some(base)))
            }
            None => Arc::clone(&panel) as Arc<dyn ArtifactSource>,
        };
        let store = Arc::new(SqliteBindingStore::open(&config.effective_db_path()?)?);

        Ok(Self::new(panel, artifacts, store, config.workflow_settings())
            .with_core_suffix(config.relogin.core_suffix.clone()))
    }

    /// Default core target for a relogin key.
    pub fn core_target_for(&self, key: &str) -> String {
        format!("{}{}", key, self.core_suffix)
    }

    /// Start a relogin for `request.key`.
    ///
    /// Both targets are resolved before the key is claimed, so a bad target
    /// never occupies the key.
    pub async fn begin(
        &self,
        request: BeginRequest,
        notifier: Arc<dyn Notifier>,
    ) -> Result<WorkflowTicket> {
        let key = request.key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("relogin key must not be empty".into()));
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::InvalidInput("service is shutting down".into()));
        }

        let targets = WorkflowTargets {
            protocol_id: self.resolver.resolve(&request.protocol_target).await?,
            core_id: self.resolver.resolve(&request.core_target).await?,
        };

        let (claim, mailbox) = self.registry.claim(key)?;
        let id = claim.id();
        let coordinator = Coordinator::new(
            claim,
            mailbox,
            targets.clone(),
            self.settings.clone(),
            Arc::clone(&self.controller),
            Arc::clone(&self.artifacts),
            notifier,
            self.shutdown.child_token(),
        );
        let handle = tokio::spawn(coordinator.run());

        rlog_debug!("Spawned relogin {} for {}", id.short(), key);
        Ok(WorkflowTicket {
            id,
            key: key.to_string(),
            targets,
            handle,
        })
    }

    /// Confirm the login for `key`. Only accepted while it waits for confirmation.
    pub fn confirm(&self, key: &str) -> Result<()> {
        self.registry.signal(key.trim(), SignalKind::Continue)
    }

    /// Ask the workflow for `key` to stop. Unknown or finished keys are ignored.
    pub fn cancel(&self, key: &str) -> Result<()> {
        if let Err(e) = self.registry.signal(key.trim(), SignalKind::Cancel) {
            rlog_debug!("Cancel for {} ignored: {}", key, e);
        }
        Ok(())
    }

    pub fn workflow_state(&self, key: &str) -> Option<WorkflowState> {
        self.registry.state(key.trim())
    }

    pub fn active_workflows(&self) -> Vec<(String, WorkflowState)> {
        self.registry.active()
    }

    /// Bind `alias` to the instance `target` names. `target` is stored as
    /// given, minus an optional `id:` prefix.
    pub async fn bind(&self, alias: &str, target: &str) -> Result<Binding> {
        let target = target.trim();
        let instance_id = target.strip_prefix(ID_PREFIX).unwrap_or(target);
        let binding = self.store.save(alias, instance_id).await?;
        rlog!("Bound {} -> {}", binding.alias, binding.resource_id);
        Ok(binding)
    }

    pub async fn unbind(&self, alias: &str) -> Result<()> {
        if self.store.delete(alias.trim()).await? {
            rlog!("Unbound {}", alias.trim());
            Ok(())
        } else {
            Err(Error::NotFound(format!("no binding for alias {}", alias.trim())))
        }
    }

    pub async fn binding(&self, alias: &str) -> Result<Option<Binding>> {
        self.store.get(alias.trim()).await
    }

    pub async fn bindings(&self) -> Result<Vec<Binding>> {
        self.store.list().await
    }

    /// Run a lifecycle action on `target`. Returns the resolved instance id.
    pub async fn control(&self, target: &str, action: InstanceAction) -> Result<String> {
        let instance_id = self.resolver.resolve(target).await?;
        self.controller.action(&instance_id, action).await?;
        rlog!("{} {} ({})", action, target.trim(), instance_id);
        Ok(instance_id)
    }

    /// Status of `target`, or the panel dashboard when no target is given.
    pub async fn status(&self, target: Option<&str>) -> Result<StatusReport> {
        match target.map(str::trim).filter(|t| !t.is_empty()) {
            None => Ok(StatusReport::Dashboard(self.controller.dashboard().await?)),
            Some(target) => {
                let instance_id = self.resolver.resolve(target).await?;
                let detail = self.controller.detail(&instance_id).await?;
                Ok(StatusReport::Instance {
                    target: target.to_string(),
                    instance_id,
                    detail,
                })
            }
        }
    }

    /// Cancel every running workflow and refuse new ones.
    pub fn shutdown(&self) {
        rlog!(
            "Shutting down relogin service ({} active)",
            self.registry.len()
        );
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
