//! The relogin workflow: per-key state machine, the registry that guards
//! keys, and the resolver that turns user targets into instance ids.

mod coordinator;
mod registry;
mod resolver;
mod types;

pub use coordinator::Coordinator;
pub use registry::{Claim, Mailbox, WorkflowRegistry};
pub use resolver::{looks_like_identifier, TargetResolver, ID_PREFIX};
pub use types::{
    SignalKind, WorkflowEvent, WorkflowId, WorkflowOutcome, WorkflowSettings, WorkflowState,
    WorkflowTargets,
};
