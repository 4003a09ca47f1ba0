pub mod artifact;
pub mod config;
pub mod error;
pub mod instance;
pub mod log;
pub mod notify;
pub mod panel;
pub mod server;
pub mod service;
pub mod store;
pub mod util;
pub mod workflow;

pub use error::{Error, ErrorKind, Result, TimeoutKind};
pub use service::{BeginRequest, ReloginService, StatusReport, WorkflowTicket};
pub use workflow::{WorkflowEvent, WorkflowOutcome, WorkflowState};
