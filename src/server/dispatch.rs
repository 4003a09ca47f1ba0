//! Maps live-connection commands onto [`ReloginService`] calls.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::instance::InstanceAction;
use crate::notify::Notifier;
use crate::service::{BeginRequest, ReloginService};
use crate::{rlog_debug, rlog_warn};

use super::protocol::{Request, Response};

/// Run one request. Events of any relogin it starts go to `notifier`.
pub async fn dispatch(
    service: &ReloginService,
    request: &Request,
    notifier: &Arc<dyn Notifier>,
) -> Response {
    rlog_debug!(
        "dispatch request_id={} command={}",
        request.request_id,
        request.command
    );
    match handle(service, request, notifier).await {
        Ok(data) => Response::ok(request.request_id.clone(), data),
        Err(e) => {
            if e.status_code() >= 500 {
                rlog_warn!("{} failed: {}", request.command, e);
            }
            Response::error(request.request_id.clone(), &e)
        }
    }
}

async fn handle(
    service: &ReloginService,
    request: &Request,
    notifier: &Arc<dyn Notifier>,
) -> Result<Option<Value>> {
    match request.command.as_str() {
        "bind" => {
            let alias = request.require("alias")?;
            let target = request
                .param("target")
                .or_else(|| request.param("instance_id"))
                .ok_or_else(|| Error::InvalidInput("missing parameter: target".into()))?;
            let binding = service.bind(&alias, &target).await?;
            Ok(Some(serde_json::to_value(binding)?))
        }
        "unbind" => {
            let alias = request.require("alias")?;
            service.unbind(&alias).await?;
            Ok(Some(json!({ "alias": alias })))
        }
        "bindings" => Ok(Some(serde_json::to_value(service.bindings().await?)?)),
        "start" | "stop" | "restart" | "fstop" => {
            let action: InstanceAction = request.command.parse()?;
            let target = request.require("target")?;
            let instance_id = service.control(&target, action).await?;
            Ok(Some(json!({
                "target": target,
                "instance_id": instance_id,
                "action": action,
            })))
        }
        "status" => {
            let target = request.param("target");
            let report = service.status(target.as_deref()).await?;
            Ok(Some(serde_json::to_value(report)?))
        }
        "relogin" => {
            let key = request.require("target")?;
            let protocol_target = request.param("protocol").unwrap_or_else(|| key.clone());
            let core_target = request
                .param("core")
                .unwrap_or_else(|| service.core_target_for(&key));
            let ticket = service
                .begin(
                    BeginRequest {
                        key,
                        protocol_target,
                        core_target,
                    },
                    Arc::clone(notifier),
                )
                .await?;
            Ok(Some(json!({
                "key": ticket.key,
                "workflow_id": ticket.id,
                "protocol_id": ticket.targets.protocol_id,
                "core_id": ticket.targets.core_id,
            })))
        }
        "continue" => {
            let key = request.require("target")?;
            service.confirm(&key)?;
            Ok(Some(json!({ "key": key })))
        }
        "cancel" => {
            let key = request.require("target")?;
            service.cancel(&key)?;
            Ok(Some(json!({ "key": key })))
        }
        "relogin_status" => match request.param("target") {
            Some(key) => {
                let state = service
                    .workflow_state(&key)
                    .ok_or_else(|| Error::NotFound(format!("no active relogin for {}", key)))?;
                Ok(Some(json!({ "key": key, "state": state })))
            }
            None => {
                let active: Vec<Value> = service
                    .active_workflows()
                    .into_iter()
                    .map(|(key, state)| json!({ "key": key, "state": state }))
                    .collect();
                Ok(Some(Value::Array(active)))
            }
        },
        other => Err(Error::InvalidInput(format!("unknown command: {}", other))),
    }
}
