use crate::db;
use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ranking::{DEFAULT_COMMIT_COUNT, LABEL_ALPHABET};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

const SETUP_PLANNER_KEY: &str = "setup.planner";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerSettings {
    /// Tournament slots opened per quarter; labels come from `LABEL_ALPHABET`.
    pub candidate_slots: usize,
    pub commit_count: usize,
    /// Smallest gap between neighbouring `display_order` values before the
    /// list is renumbered.
    pub min_order_gap: f64,
    pub renumber_step: f64,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            candidate_slots: LABEL_ALPHABET.len(),
            commit_count: DEFAULT_COMMIT_COUNT,
            min_order_gap: 1e-9,
            renumber_step: 1.0,
        }
    }
}

fn load_setup_section(conn: &Connection) -> Option<Map<String, JsonValue>> {
    db::settings_get_json(conn, SETUP_PLANNER_KEY)
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
}

/// Stored planner settings, falling back to defaults for missing or invalid fields.
pub fn load_planner_settings(conn: &Connection) -> PlannerSettings {
    let obj = load_setup_section(conn).unwrap_or_default();
    let defaults = PlannerSettings::default();
    let candidate_slots = obj
        .get("candidateSlots")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .filter(|v| (2..=LABEL_ALPHABET.len()).contains(v))
        .unwrap_or(defaults.candidate_slots);
    let commit_count = obj
        .get("commitCount")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .filter(|v| *v >= 1)
        .unwrap_or(defaults.commit_count);
    let min_order_gap = obj
        .get("minOrderGap")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(defaults.min_order_gap);
    let renumber_step = obj
        .get("renumberStep")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(defaults.renumber_step);
    // A gap at or above the step would make every renumber pass exhausted again.
    let (min_order_gap, renumber_step) = if min_order_gap < renumber_step {
        (min_order_gap, renumber_step)
    } else {
        (defaults.min_order_gap, defaults.renumber_step)
    };
    PlannerSettings {
        candidate_slots,
        commit_count,
        min_order_gap,
        renumber_step,
    }
}

fn validate_patch(patch: &Map<String, JsonValue>) -> Result<(), HandlerErr> {
    for (key, value) in patch {
        let valid = match key.as_str() {
            "candidateSlots" => value
                .as_u64()
                .is_some_and(|v| (2..=LABEL_ALPHABET.len() as u64).contains(&v)),
            "commitCount" => value.as_u64().is_some_and(|v| v >= 1),
            "minOrderGap" | "renumberStep" => value.as_f64().is_some_and(|v| v > 0.0),
            _ => {
                return Err(HandlerErr::bad_params(format!("unknown setting: {}", key)));
            }
        };
        if !valid {
            return Err(HandlerErr::bad_params(format!("invalid value for {}", key))
                .with_details(json!({ "key": key, "value": value })));
        }
    }
    Ok(())
}

/// `minOrderGap` must stay below `renumberStep` once the patch is merged.
fn validate_order_spacing(merged: &Map<String, JsonValue>) -> Result<(), HandlerErr> {
    let defaults = PlannerSettings::default();
    let min_order_gap = merged
        .get("minOrderGap")
        .and_then(|v| v.as_f64())
        .unwrap_or(defaults.min_order_gap);
    let renumber_step = merged
        .get("renumberStep")
        .and_then(|v| v.as_f64())
        .unwrap_or(defaults.renumber_step);
    if min_order_gap >= renumber_step {
        return Err(
            HandlerErr::bad_params("minOrderGap must be smaller than renumberStep").with_details(
                json!({ "minOrderGap": min_order_gap, "renumberStep": renumber_step }),
            ),
        );
    }
    Ok(())
}

fn setup_get(conn: &Connection) -> Result<JsonValue, HandlerErr> {
    Ok(json!({ "planner": load_planner_settings(conn) }))
}

fn setup_update(conn: &Connection, params: &JsonValue) -> Result<JsonValue, HandlerErr> {
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    validate_patch(patch)?;

    let mut merged = load_setup_section(conn).unwrap_or_default();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    validate_order_spacing(&merged)?;
    db::settings_set_json(conn, SETUP_PLANNER_KEY, &JsonValue::Object(merged)).map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "settings" }))
    })?;
    setup_get(conn)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<JsonValue> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, |conn, _| setup_get(conn))),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
