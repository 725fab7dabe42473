use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::scope::PlanningContext;
use rusqlite::Connection;
use serde_json::json;

use super::error::ok;

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Adapter for `map_err` on storage calls: `.map_err(HandlerErr::db("db_query_failed"))`.
    pub fn db(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
        move |e| HandlerErr::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        tracing::warn!(code = self.code, message = %self.message, "request {} failed", id);
        err(id, self.code, self.message, self.details)
    }
}

/// Runs `f` against the open workspace database and wraps the outcome in the
/// response envelope.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_usize(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<usize>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("{} must be a non-negative integer", key))
            }),
    }
}

pub fn get_optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

fn small_int(params: &serde_json::Value, key: &str) -> Result<u8, HandlerErr> {
    let raw = get_required_i64(params, key)?;
    u8::try_from(raw).map_err(|_| HandlerErr::bad_params(format!("{} out of range", key)))
}

fn year_param(params: &serde_json::Value) -> Result<i32, HandlerErr> {
    let raw = get_required_i64(params, "year")?;
    i32::try_from(raw).map_err(|_| HandlerErr::bad_params("year out of range"))
}

/// `{year, quarter}` from request params.
pub fn quarter_context(params: &serde_json::Value) -> Result<PlanningContext, HandlerErr> {
    let year = year_param(params)?;
    let quarter = small_int(params, "quarter")?;
    PlanningContext::quarter(year, quarter).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// `{year, quarter, weekNumber}` from request params.
pub fn week_context(params: &serde_json::Value) -> Result<PlanningContext, HandlerErr> {
    let year = year_param(params)?;
    let quarter = small_int(params, "quarter")?;
    let week = small_int(params, "weekNumber")?;
    PlanningContext::week(year, quarter, week).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

pub fn context_json(ctx: &PlanningContext) -> Result<serde_json::Value, HandlerErr> {
    let internal = |e: anyhow::Error| HandlerErr::new("internal", e.to_string());
    let mut out = json!({
        "year": ctx.year,
        "quarter": ctx.quarter,
        "quarterStart": ctx.quarter_start().map_err(internal)?.to_string(),
        "quarterEnd": ctx.quarter_end().map_err(internal)?.to_string(),
        "weeksInQuarter": ctx.weeks_in_quarter().map_err(internal)?,
    });
    if let Some((start, end)) = ctx.week_range().map_err(internal)? {
        out["weekNumber"] = json!(ctx.week);
        out["weekStart"] = json!(start.to_string());
        out["weekEnd"] = json!(end.to_string());
    }
    Ok(out)
}
