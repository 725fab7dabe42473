use crate::ipc::handlers::setup::load_planner_settings;
use crate::ipc::helpers::{
    get_optional_usize, get_required_str, quarter_context, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ranking::{
    comparable_key, completion_percentage, compute_ranking, record_judgment, reset_judgments,
    top_k, Candidate, Judgments, RankedCandidate, WinnerSide, LABEL_ALPHABET,
};
use crate::scope::PlanningContext;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QuestRow {
    id: String,
    label: String,
    title: String,
    priority_score: f64,
    is_committed: bool,
}

impl QuestRow {
    fn candidate(&self) -> Candidate {
        Candidate {
            id: Some(self.id.clone()),
            label: self.label.clone(),
            title: self.title.clone(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "label": self.label,
            "title": self.title,
            "priorityScore": self.priority_score,
            "isCommitted": self.is_committed,
        })
    }
}

fn list_quests(conn: &Connection, ctx: &PlanningContext) -> Result<Vec<QuestRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, label, title, priority_score, is_committed
             FROM quests
             WHERE year = ? AND quarter = ?
             ORDER BY label",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    stmt.query_map((ctx.year, ctx.quarter), |r| {
        Ok(QuestRow {
            id: r.get(0)?,
            label: r.get(1)?,
            title: r.get(2)?,
            priority_score: r.get(3)?,
            is_committed: r.get::<_, i64>(4)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db("db_query_failed"))
}

fn candidates_of(rows: &[QuestRow]) -> Vec<Candidate> {
    rows.iter().map(QuestRow::candidate).collect()
}

/// Creates any of the first `slots` labels that do not exist yet for the quarter.
fn ensure_slots(conn: &Connection, ctx: &PlanningContext, slots: usize) -> Result<usize, HandlerErr> {
    let existing: HashSet<String> = list_quests(conn, ctx)?
        .into_iter()
        .map(|q| q.label)
        .collect();
    let missing: Vec<&str> = LABEL_ALPHABET
        .iter()
        .take(slots)
        .copied()
        .filter(|label| !existing.contains(*label))
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    for label in &missing {
        tx.execute(
            "INSERT INTO quests(id, year, quarter, label, title) VALUES(?, ?, ?, ?, '')",
            (Uuid::new_v4().to_string(), ctx.year, ctx.quarter, *label),
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "quests" }))
        })?;
    }
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;
    Ok(missing.len())
}

fn load_judgments(conn: &Connection, ctx: &PlanningContext) -> Result<(Judgments, bool), HandlerErr> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT judgments, is_finalized FROM quest_judgments WHERE year = ? AND quarter = ?",
            (ctx.year, ctx.quarter),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db("db_query_failed"))?;
    let Some((raw, finalized)) = row else {
        return Ok((Judgments::new(), false));
    };
    let judgments: Judgments = serde_json::from_str(&raw).map_err(|e| {
        HandlerErr::new("db_query_failed", format!("stored judgments are invalid: {}", e))
            .with_details(json!({ "year": ctx.year, "quarter": ctx.quarter }))
    })?;
    Ok((judgments, finalized != 0))
}

/// Upserts the whole judgment map for the quarter as a single row.
fn save_judgments(
    conn: &Connection,
    ctx: &PlanningContext,
    judgments: &Judgments,
    finalized: bool,
) -> Result<(), HandlerErr> {
    let raw = serde_json::to_string(judgments)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    conn.execute(
        "INSERT INTO quest_judgments(year, quarter, judgments, is_finalized, updated_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(year, quarter) DO UPDATE SET
           judgments = excluded.judgments,
           is_finalized = excluded.is_finalized,
           updated_at = excluded.updated_at",
        (ctx.year, ctx.quarter, raw, finalized as i64),
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "quest_judgments" }))
    })?;
    Ok(())
}

fn ranking_json(ranking: &Option<Vec<RankedCandidate>>, k: usize) -> serde_json::Value {
    match ranking {
        Some(r) => json!({ "ranking": r, "top": top_k(r, k) }),
        None => json!({ "ranking": null, "top": [] }),
    }
}

fn tournament_state(
    conn: &Connection,
    ctx: &PlanningContext,
    k: usize,
) -> Result<serde_json::Value, HandlerErr> {
    let rows = list_quests(conn, ctx)?;
    let candidates = candidates_of(&rows);
    let (judgments, finalized) = load_judgments(conn, ctx)?;
    let ranking = compute_ranking(&candidates, &judgments);
    let mut out = ranking_json(&ranking, k);
    out["year"] = json!(ctx.year);
    out["quarter"] = json!(ctx.quarter);
    out["quests"] = json!(rows.iter().map(QuestRow::to_json).collect::<Vec<_>>());
    out["judgments"] = json!(judgments);
    out["isFinalized"] = json!(finalized);
    out["completion"] = json!(completion_percentage(&candidates, &judgments));
    Ok(out)
}

fn quests_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ctx = quarter_context(params)?;
    let settings = load_planner_settings(conn);
    let created = ensure_slots(conn, &ctx, settings.candidate_slots)?;
    if created > 0 {
        tracing::info!(year = ctx.year, quarter = ctx.quarter, created, "opened quest slots");
    }
    tournament_state(conn, &ctx, settings.commit_count)
}

fn quests_set_title(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = quarter_context(params)?;
    let label = get_required_str(params, "label")?;
    let title = get_required_str(params, "title")?;
    let changed = conn
        .execute(
            "UPDATE quests
             SET title = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE year = ? AND quarter = ? AND label = ?",
            (title.trim(), ctx.year, ctx.quarter, &label),
        )
        .map_err(|e| {
            HandlerErr::new("db_update_failed", e.to_string())
                .with_details(json!({ "table": "quests" }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::not_found("quest not found")
            .with_details(json!({ "label": label })));
    }
    let quest = list_quests(conn, &ctx)?
        .into_iter()
        .find(|q| q.label == label)
        .ok_or_else(|| HandlerErr::not_found("quest not found"))?;
    Ok(json!({ "quest": quest.to_json() }))
}

fn quests_committed(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = quarter_context(params)?;
    let mut rows: Vec<QuestRow> = list_quests(conn, &ctx)?
        .into_iter()
        .filter(|q| q.is_committed)
        .collect();
    // Stable: equal scores stay in label order.
    rows.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
    Ok(json!({ "quests": rows.iter().map(QuestRow::to_json).collect::<Vec<_>>() }))
}

fn judgments_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = quarter_context(params)?;
    let label_a = get_required_str(params, "labelA")?;
    let label_b = get_required_str(params, "labelB")?;
    let winner_raw = get_required_str(params, "winner")?;
    let winner = WinnerSide::parse(&winner_raw)
        .ok_or_else(|| HandlerErr::bad_params("winner must be \"a\" or \"b\""))?;

    let candidates = candidates_of(&list_quests(conn, &ctx)?);
    let (judgments, _) = load_judgments(conn, &ctx)?;

    let Some(key) = comparable_key(&candidates, &label_a, &label_b) else {
        return Ok(json!({ "changed": false, "judgments": judgments }));
    };
    let updated = record_judgment(&candidates, &judgments, &label_a, &label_b, winner);
    // Any new judgment reopens a finalized quarter.
    save_judgments(conn, &ctx, &updated, false)?;
    Ok(json!({ "changed": true, "key": key, "judgments": updated }))
}

fn judgments_reset(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = quarter_context(params)?;
    let cleared = reset_judgments();
    save_judgments(conn, &ctx, &cleared, false)?;
    Ok(json!({ "judgments": cleared }))
}

fn ranking_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let ctx = quarter_context(params)?;
    let k = get_optional_usize(params, "k")?.unwrap_or(load_planner_settings(conn).commit_count);
    let candidates = candidates_of(&list_quests(conn, &ctx)?);
    let (judgments, _) = load_judgments(conn, &ctx)?;
    let ranking = compute_ranking(&candidates, &judgments);
    let mut out = ranking_json(&ranking, k);
    out["completion"] = json!(completion_percentage(&candidates, &judgments));
    Ok(out)
}

/// Persists every quest's score and flags exactly the top `k` as committed,
/// all in one transaction together with the finalized flag.
fn ranking_commit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ctx = quarter_context(params)?;
    let k = get_optional_usize(params, "k")?.unwrap_or(load_planner_settings(conn).commit_count);
    let rows = list_quests(conn, &ctx)?;
    let candidates = candidates_of(&rows);
    let (judgments, _) = load_judgments(conn, &ctx)?;
    let Some(ranking) = compute_ranking(&candidates, &judgments) else {
        return Err(HandlerErr::new(
            "not_enough_quests",
            "at least two quests need a title before committing",
        ));
    };
    let top = top_k(&ranking, k);
    let committed: HashSet<&str> = top.iter().map(|r| r.label.as_str()).collect();

    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    for row in &rows {
        let score = ranking
            .iter()
            .find(|r| r.label == row.label)
            .map(|r| r.score)
            .unwrap_or(0);
        let is_committed = committed.contains(row.label.as_str());
        tx.execute(
            "UPDATE quests
             SET priority_score = ?, is_committed = ?,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (f64::from(score), is_committed as i64, &row.id),
        )
        .map_err(|e| {
            HandlerErr::new("db_update_failed", e.to_string())
                .with_details(json!({ "table": "quests", "label": row.label }))
        })?;
    }
    save_judgments(&tx, &ctx, &judgments, true)?;
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;

    tracing::info!(
        year = ctx.year,
        quarter = ctx.quarter,
        committed = top.len(),
        "committed quarter quests"
    );
    Ok(json!({ "committed": top, "scores": ranking }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quests.open" => Some(with_db(state, req, quests_open)),
        "quests.setTitle" => Some(with_db(state, req, quests_set_title)),
        "quests.committed" => Some(with_db(state, req, quests_committed)),
        "judgments.record" => Some(with_db(state, req, judgments_record)),
        "judgments.reset" => Some(with_db(state, req, judgments_reset)),
        "ranking.get" => Some(with_db(state, req, ranking_get)),
        "ranking.commit" => Some(with_db(state, req, ranking_commit)),
        _ => None,
    }
}
