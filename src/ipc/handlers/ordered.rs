//! CRUD and drag-reordering for every list kept in `display_order`.
//!
//! Each list type ("family") only differs in its table, its column names and
//! how its scope is picked out of the request params, so one set of handlers
//! serves all of them.

use crate::ipc::handlers::setup::{load_planner_settings, PlannerSettings};
use crate::ipc::helpers::{
    context_json, get_optional_bool, get_optional_str, get_optional_usize, get_required_str,
    week_context, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ordering::{apply_move, place_inserted, place_moved, renumbered};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Transaction};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
enum ScopeKind {
    /// `year, quarter, weekNumber` columns.
    Week,
    /// A single foreign key to a parent row that must exist.
    Parent {
        param: &'static str,
        column: &'static str,
        parent_table: &'static str,
    },
    /// One list for the whole workspace.
    Workspace,
}

#[derive(Debug, Clone, Copy)]
pub struct Family {
    prefix: &'static str,
    table: &'static str,
    items_key: &'static str,
    id_key: &'static str,
    text_column: &'static str,
    text_key: &'static str,
    flag_column: &'static str,
    flag_key: &'static str,
    scope: ScopeKind,
}

pub const RULES: Family = Family {
    prefix: "rules",
    table: "weekly_rules",
    items_key: "rules",
    id_key: "ruleId",
    text_column: "title",
    text_key: "title",
    flag_column: "completed",
    flag_key: "completed",
    scope: ScopeKind::Week,
};

pub const MILESTONES: Family = Family {
    prefix: "milestones",
    table: "milestones",
    items_key: "milestones",
    id_key: "milestoneId",
    text_column: "title",
    text_key: "title",
    flag_column: "completed",
    flag_key: "completed",
    scope: ScopeKind::Parent {
        param: "questId",
        column: "quest_id",
        parent_table: "quests",
    },
};

pub const TASKS: Family = Family {
    prefix: "tasks",
    table: "tasks",
    items_key: "tasks",
    id_key: "taskId",
    text_column: "title",
    text_key: "title",
    flag_column: "completed",
    flag_key: "completed",
    scope: ScopeKind::Parent {
        param: "milestoneId",
        column: "milestone_id",
        parent_table: "milestones",
    },
};

pub const SUBTASKS: Family = Family {
    prefix: "subtasks",
    table: "subtasks",
    items_key: "subtasks",
    id_key: "subtaskId",
    text_column: "title",
    text_key: "title",
    flag_column: "completed",
    flag_key: "completed",
    scope: ScopeKind::Parent {
        param: "taskId",
        column: "task_id",
        parent_table: "tasks",
    },
};

/// The attendance roster, ordered the same way as the planner lists.
pub const STUDENTS: Family = Family {
    prefix: "attendance.students",
    table: "students",
    items_key: "students",
    id_key: "studentId",
    text_column: "name",
    text_key: "name",
    flag_column: "active",
    flag_key: "active",
    scope: ScopeKind::Workspace,
};

const FAMILIES: [Family; 5] = [RULES, MILESTONES, TASKS, SUBTASKS, STUDENTS];

#[derive(Debug, Clone)]
pub struct OrderedItem {
    pub id: String,
    pub text: String,
    pub flag: bool,
    pub display_order: f64,
}

/// Scope resolved from request params: `WHERE` clause plus bound values.
struct Scope {
    columns: Vec<&'static str>,
    values: Vec<Value>,
    context: Option<serde_json::Value>,
}

impl Scope {
    fn where_clause(&self) -> String {
        if self.columns.is_empty() {
            return "1 = 1".to_string();
        }
        self.columns
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn resolve_scope(
    conn: &Connection,
    family: &Family,
    params: &serde_json::Value,
) -> Result<Scope, HandlerErr> {
    match family.scope {
        ScopeKind::Week => {
            let ctx = week_context(params)?;
            let week = ctx.week.unwrap_or(1);
            Ok(Scope {
                columns: vec!["year", "quarter", "week_number"],
                values: vec![
                    Value::Integer(i64::from(ctx.year)),
                    Value::Integer(i64::from(ctx.quarter)),
                    Value::Integer(i64::from(week)),
                ],
                context: Some(context_json(&ctx)?),
            })
        }
        ScopeKind::Parent {
            param,
            column,
            parent_table,
        } => {
            let parent_id = get_required_str(params, param)?;
            let exists = conn
                .query_row(
                    &format!("SELECT 1 FROM {} WHERE id = ?", parent_table),
                    [&parent_id],
                    |r| r.get::<_, i64>(0),
                )
                .optional()
                .map_err(HandlerErr::db("db_query_failed"))?
                .is_some();
            if !exists {
                let mut details = json!({});
                details[param] = json!(parent_id);
                return Err(
                    HandlerErr::not_found(format!("{} not found", param)).with_details(details)
                );
            }
            Ok(Scope {
                columns: vec![column],
                values: vec![Value::Text(parent_id)],
                context: None,
            })
        }
        ScopeKind::Workspace => Ok(Scope {
            columns: Vec::new(),
            values: Vec::new(),
            context: None,
        }),
    }
}

fn list_items(conn: &Connection, family: &Family, scope: &Scope) -> Result<Vec<OrderedItem>, HandlerErr> {
    let sql = format!(
        "SELECT id, {}, {}, display_order FROM {} WHERE {} ORDER BY display_order, rowid",
        family.text_column,
        family.flag_column,
        family.table,
        scope.where_clause()
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(HandlerErr::db("db_query_failed"))?;
    stmt.query_map(params_from_iter(scope.values.iter()), |r| {
        Ok(OrderedItem {
            id: r.get(0)?,
            text: r.get(1)?,
            flag: r.get::<_, i64>(2)? != 0,
            display_order: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db("db_query_failed"))
}

fn item_json(family: &Family, item: &OrderedItem) -> serde_json::Value {
    let mut out = json!({
        "id": item.id,
        "displayOrder": item.display_order,
    });
    out[family.text_key] = json!(item.text);
    out[family.flag_key] = json!(item.flag);
    out
}

fn update_failed(family: &Family) -> impl Fn(rusqlite::Error) -> HandlerErr + '_ {
    move |e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": family.table }))
    }
}

/// Rewrites every order in `ids` (already in the intended sequence) with fresh
/// evenly spaced values. Runs inside the caller's transaction.
fn renumber_all(
    tx: &Transaction,
    family: &Family,
    ids: &[String],
    settings: &PlannerSettings,
) -> Result<Vec<f64>, HandlerErr> {
    let orders = renumbered(ids.len(), settings.renumber_step);
    let sql = format!(
        "UPDATE {} SET display_order = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
        family.table
    );
    for (id, order) in ids.iter().zip(&orders) {
        tx.execute(&sql, (order, id))
            .map_err(update_failed(family))?;
    }
    tracing::info!(table = family.table, items = ids.len(), "renumbered display order");
    Ok(orders)
}

fn items_list(
    conn: &Connection,
    family: &Family,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = resolve_scope(conn, family, params)?;
    let items = list_items(conn, family, &scope)?;
    let mut out = json!({});
    out[family.items_key] = json!(items.iter().map(|i| item_json(family, i)).collect::<Vec<_>>());
    if let Some(ctx) = scope.context {
        out["context"] = ctx;
    }
    Ok(out)
}

fn insert_item(
    conn: &Connection,
    family: &Family,
    scope: &Scope,
    text: &str,
    position: Option<usize>,
    settings: &PlannerSettings,
) -> Result<(String, f64, bool), HandlerErr> {
    let items = list_items(conn, family, scope)?;
    let orders: Vec<f64> = items.iter().map(|i| i.display_order).collect();
    let placement = place_inserted(&orders, position.unwrap_or(orders.len()), settings.min_order_gap);

    let id = Uuid::new_v4().to_string();
    let mut columns: Vec<&str> = vec!["id", family.text_column, "display_order"];
    columns.extend(scope.columns.iter().copied());
    let mut values: Vec<Value> = vec![
        Value::Text(id.clone()),
        Value::Text(text.to_string()),
        Value::Real(placement.display_order),
    ];
    values.extend(scope.values.iter().cloned());
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        family.table,
        columns.join(", "),
        vec!["?"; columns.len()].join(", ")
    );
    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    tx.execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": family.table }))
        })?;

    let mut display_order = placement.display_order;
    if placement.needs_renumber {
        let mut ids: Vec<String> = items.into_iter().map(|i| i.id).collect();
        ids.insert(placement.index, id.clone());
        let orders = renumber_all(&tx, family, &ids, settings)?;
        display_order = orders[placement.index];
    }
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;
    Ok((id, display_order, placement.needs_renumber))
}

/// Item id under the family key (`ruleId`, `taskId`, ..) or plain `id`.
fn item_id(family: &Family, params: &serde_json::Value) -> Result<String, HandlerErr> {
    match get_optional_str(params, family.id_key)? {
        Some(id) => Ok(id),
        None => get_required_str(params, "id")
            .map_err(|_| HandlerErr::bad_params(format!("missing {}", family.id_key))),
    }
}

fn required_text(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let text = raw.trim();
    if text.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(text.to_string())
}

fn items_create(
    conn: &Connection,
    family: &Family,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = resolve_scope(conn, family, params)?;
    let text = required_text(params, family.text_key)?;
    let position = get_optional_usize(params, "position")?;
    let settings = load_planner_settings(conn);
    let (id, display_order, was_renumbered) =
        insert_item(conn, family, &scope, &text, position, &settings)?;
    let mut out = json!({ "id": id, "displayOrder": display_order, "renumbered": was_renumbered });
    out[family.id_key] = json!(id);
    Ok(out)
}

/// Appends pasted lines one by one. A failure part-way keeps the rows already
/// inserted and reports them.
fn items_create_many(
    conn: &Connection,
    family: &Family,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = resolve_scope(conn, family, params)?;
    let Some(raw) = params.get("titles").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing titles"));
    };
    let mut texts: Vec<String> = Vec::with_capacity(raw.len());
    for v in raw {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params("titles must be strings"));
        };
        let t = s.trim();
        if !t.is_empty() {
            texts.push(t.to_string());
        }
    }

    let settings = load_planner_settings(conn);
    let mut ids: Vec<String> = Vec::with_capacity(texts.len());
    for text in &texts {
        match insert_item(conn, family, &scope, text, None, &settings) {
            Ok((id, _, _)) => ids.push(id),
            Err(e) => {
                let details = json!({ "insertedIds": ids });
                return Err(e.with_details(details));
            }
        }
    }
    Ok(json!({ "ids": ids }))
}

fn items_update(
    conn: &Connection,
    family: &Family,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = item_id(family, params)?;
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let text = get_optional_str(patch, family.text_key)?;
    let flag = get_optional_bool(patch, family.flag_key)?;

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(text) = text {
        let t = text.trim();
        if t.is_empty() {
            return Err(HandlerErr::bad_params(format!(
                "{} must not be empty",
                family.text_key
            )));
        }
        sets.push(format!("{} = ?", family.text_column));
        values.push(Value::Text(t.to_string()));
    }
    if let Some(flag) = flag {
        sets.push(format!("{} = ?", family.flag_column));
        values.push(Value::Integer(flag as i64));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch has no supported fields"));
    }
    sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".to_string());
    values.push(Value::Text(id.clone()));

    let sql = format!("UPDATE {} SET {} WHERE id = ?", family.table, sets.join(", "));
    let changed = conn
        .execute(&sql, params_from_iter(values.iter()))
        .map_err(update_failed(family))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!("{} not found", family.id_key)));
    }
    Ok(json!({ "ok": true }))
}

fn items_move(
    conn: &Connection,
    family: &Family,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let scope = resolve_scope(conn, family, params)?;
    let id = item_id(family, params)?;
    let Some(to_index) = get_optional_usize(params, "toIndex")? else {
        return Err(HandlerErr::bad_params("missing toIndex"));
    };

    let items = list_items(conn, family, &scope)?;
    let Some(from_index) = items.iter().position(|i| i.id == id) else {
        return Err(HandlerErr::not_found(format!("{} not found in list", family.id_key))
            .with_details(json!({ "id": id })));
    };
    let orders: Vec<f64> = items.iter().map(|i| i.display_order).collect();
    let settings = load_planner_settings(conn);
    let Some(placement) = place_moved(&orders, from_index, to_index, settings.min_order_gap) else {
        return Err(HandlerErr::bad_params("item position out of range"));
    };

    if !placement.needs_renumber {
        let sql = format!(
            "UPDATE {} SET display_order = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
            family.table
        );
        conn.execute(&sql, (placement.display_order, &id))
            .map_err(update_failed(family))?;
        return Ok(json!({
            "displayOrder": placement.display_order,
            "index": placement.index,
            "renumbered": false
        }));
    }

    let mut ids: Vec<String> = items.into_iter().map(|i| i.id).collect();
    apply_move(&mut ids, from_index, to_index);
    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    let orders = renumber_all(&tx, family, &ids, &settings)?;
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;
    Ok(json!({
        "displayOrder": orders[placement.index],
        "index": placement.index,
        "renumbered": true
    }))
}

fn items_delete(
    conn: &Connection,
    family: &Family,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = item_id(family, params)?;
    let changed = conn
        .execute(&format!("DELETE FROM {} WHERE id = ?", family.table), [&id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": family.table }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!("{} not found", family.id_key)));
    }
    Ok(json!({ "ok": true }))
}

fn dispatch(
    state: &AppState,
    req: &Request,
    family: &Family,
    op: &str,
) -> Option<serde_json::Value> {
    let resp = match op {
        "list" => with_db(state, req, |conn, p| items_list(conn, family, p)),
        "create" => with_db(state, req, |conn, p| items_create(conn, family, p)),
        "createMany" => with_db(state, req, |conn, p| items_create_many(conn, family, p)),
        "update" => with_db(state, req, |conn, p| items_update(conn, family, p)),
        "move" => with_db(state, req, |conn, p| items_move(conn, family, p)),
        "delete" => with_db(state, req, |conn, p| items_delete(conn, family, p)),
        _ => return None,
    };
    Some(resp)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let state: &AppState = state;
    FAMILIES.iter().find_map(|family| {
        let op = req
            .method
            .strip_prefix(family.prefix)
            .and_then(|rest| rest.strip_prefix('.'))?;
        dispatch(state, req, family, op)
    })
}
