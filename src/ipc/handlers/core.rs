use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{context_json, get_optional_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scope::PlanningContext;
use chrono::{Local, NaiveDate};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // Drop the previous connection before opening another workspace.
    state.db = None;
    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            state.workspace = None;
            HandlerErr::new("db_open_failed", format!("{e:?}")).response(&req.id)
        }
    }
}

fn context_resolve(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = match get_optional_str(params, "date")? {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?,
        None => Local::now().date_naive(),
    };
    let ctx = PlanningContext::containing(date).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let mut out = context_json(&ctx)?;
    out["date"] = json!(date.to_string());
    Ok(out)
}

fn handle_context_resolve(req: &Request) -> serde_json::Value {
    match context_resolve(&req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "context.resolve" => Some(handle_context_resolve(req)),
        _ => None,
    }
}
