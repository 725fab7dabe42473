use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

const CODE_PRESENT: char = 'P';
const CODE_ABSENT: char = 'A';
const CODE_LATE: char = 'L';
const CODE_EXCUSED: char = 'E';

#[derive(Debug, Clone)]
struct RosterStudent {
    id: String,
    name: String,
    active: bool,
    display_order: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceTally {
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub excused: u32,
    pub unmarked: u32,
}

impl AttendanceTally {
    pub fn from_day_codes(day_codes: &str) -> Self {
        let mut t = Self::default();
        for c in day_codes.chars() {
            match c.to_ascii_uppercase() {
                CODE_PRESENT => t.present += 1,
                CODE_ABSENT => t.absent += 1,
                CODE_LATE => t.late += 1,
                CODE_EXCUSED => t.excused += 1,
                _ => t.unmarked += 1,
            }
        }
        t
    }

    pub fn add(&mut self, other: &Self) {
        self.present += other.present;
        self.absent += other.absent;
        self.late += other.late;
        self.excused += other.excused;
        self.unmarked += other.unmarked;
    }

    /// Attended share of counted days in percent. Late counts as attended,
    /// excused days are left out. `None` when nothing was counted.
    pub fn rate(&self) -> Option<f64> {
        let attended = self.present + self.late;
        let counted = attended + self.absent;
        if counted == 0 {
            return None;
        }
        Some(100.0 * f64::from(attended) / f64::from(counted))
    }
}

fn parse_month_key(month: &str) -> Result<(i32, u32), HandlerErr> {
    let t = month.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(HandlerErr::bad_params("month must be YYYY-MM"));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| HandlerErr::bad_params("month year must be numeric"))?;
    let month_num = m
        .parse::<u32>()
        .map_err(|_| HandlerErr::bad_params("month must be YYYY-MM"))?;
    if !(1..=12).contains(&month_num) {
        return Err(HandlerErr::bad_params("month must be between 01 and 12"));
    }
    Ok((year, month_num))
}

fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

fn days_in_month(year: i32, month: u32) -> usize {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|d| d.pred_opt())
        .map(|d| d.day() as usize)
        .unwrap_or(30)
}

/// `YYYY-MM-DD` to the month key and 1-based day.
fn parse_day(date: &str) -> Result<(String, usize, usize), HandlerErr> {
    let d = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    let days = days_in_month(d.year(), d.month());
    Ok((month_key(d.year(), d.month()), d.day() as usize, days))
}

fn normalize_day_codes(raw: &str, days: usize) -> String {
    let mut chars: Vec<char> = raw.chars().collect();
    if chars.len() < days {
        chars.extend(std::iter::repeat(' ').take(days - chars.len()));
    } else if chars.len() > days {
        chars.truncate(days);
    }
    chars.into_iter().collect()
}

fn patch_day_code(existing: &str, days: usize, day: usize, code: Option<char>) -> String {
    let mut chars: Vec<char> = normalize_day_codes(existing, days).chars().collect();
    let idx = day.saturating_sub(1);
    if idx < chars.len() {
        chars[idx] = code.unwrap_or(' ');
    }
    chars.into_iter().collect()
}

fn parse_code(v: Option<&serde_json::Value>) -> Result<Option<char>, HandlerErr> {
    let Some(v) = v else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr::bad_params("code must be string or null"));
    };
    let t = s.trim();
    let Some(c) = t.chars().next() else {
        return Ok(None);
    };
    let c = c.to_ascii_uppercase();
    if ![CODE_PRESENT, CODE_ABSENT, CODE_LATE, CODE_EXCUSED].contains(&c) {
        return Err(HandlerErr::bad_params("code must be one of P, A, L, E")
            .with_details(json!({ "code": s })));
    }
    Ok(Some(c))
}

fn list_roster(conn: &Connection) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, active, display_order
             FROM students
             ORDER BY display_order, rowid",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    stmt.query_map([], |r| {
        Ok(RosterStudent {
            id: r.get(0)?,
            name: r.get(1)?,
            active: r.get::<_, i64>(2)? != 0,
            display_order: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db("db_query_failed"))
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db("db_query_failed"))
}

fn month_codes(
    conn: &Connection,
    month: &str,
    days: usize,
) -> Result<HashMap<String, String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_id, day_codes
             FROM attendance_student_months
             WHERE month = ?",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    let rows = stmt
        .query_map([month], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db("db_query_failed"))?;
    Ok(rows
        .into_iter()
        .map(|(student_id, codes)| (student_id, normalize_day_codes(&codes, days)))
        .collect())
}

fn stamp_day(
    conn: &Connection,
    student_id: &str,
    month: &str,
    days: usize,
    day: usize,
    code: Option<char>,
) -> Result<(), HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT day_codes FROM attendance_student_months WHERE student_id = ? AND month = ?",
            (student_id, month),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db("db_query_failed"))?;
    let patched = patch_day_code(existing.as_deref().unwrap_or(""), days, day, code);
    conn.execute(
        "INSERT INTO attendance_student_months(student_id, month, day_codes)
         VALUES(?, ?, ?)
         ON CONFLICT(student_id, month) DO UPDATE SET
           day_codes = excluded.day_codes",
        (student_id, month, &patched),
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "attendance_student_months" }))
    })?;
    Ok(())
}

fn attendance_month_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let month = get_required_str(params, "month")?;
    let (year, month_num) = parse_month_key(&month)?;
    let key = month_key(year, month_num);
    let days = days_in_month(year, month_num);

    let students = list_roster(conn)?;
    let by_student = month_codes(conn, &key, days)?;
    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let day_codes = by_student
                .get(&s.id)
                .cloned()
                .unwrap_or_else(|| normalize_day_codes("", days));
            json!({
                "studentId": s.id,
                "name": s.name,
                "active": s.active,
                "displayOrder": s.display_order,
                "dayCodes": day_codes
            })
        })
        .collect();

    Ok(json!({
        "month": key,
        "daysInMonth": days,
        "rows": rows
    }))
}

fn attendance_month_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let month = get_required_str(params, "month")?;
    let (year, month_num) = parse_month_key(&month)?;
    let key = month_key(year, month_num);
    let days = days_in_month(year, month_num);

    let students = list_roster(conn)?;
    let by_student = month_codes(conn, &key, days)?;
    let mut totals = AttendanceTally::default();
    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    for s in &students {
        let tally = by_student
            .get(&s.id)
            .map(|codes| AttendanceTally::from_day_codes(codes))
            .unwrap_or(AttendanceTally {
                unmarked: days as u32,
                ..AttendanceTally::default()
            });
        totals.add(&tally);
        rows.push(json!({
            "studentId": s.id,
            "name": s.name,
            "active": s.active,
            "counts": tally,
            "rate": tally.rate(),
        }));
    }

    Ok(json!({
        "month": key,
        "daysInMonth": days,
        "students": rows,
        "totals": totals,
        "rate": totals.rate(),
    }))
}

fn attendance_set_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_str(params, "date")?;
    let (month, day, days) = parse_day(&date)?;
    let code = parse_code(params.get("code"))?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    stamp_day(conn, &student_id, &month, days, day, code)?;
    Ok(json!({ "ok": true }))
}

fn attendance_bulk_stamp_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_str(params, "date")?;
    let (month, day, days) = parse_day(&date)?;
    let code = parse_code(params.get("code"))?;
    let Some(student_ids_json) = params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing studentIds"));
    };
    let student_ids: Vec<String> = student_ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    let mut stamped = 0usize;
    for student_id in student_ids {
        if !student_exists(&tx, &student_id)? {
            continue;
        }
        stamp_day(&tx, &student_id, &month, days, day, code)?;
        stamped += 1;
    }
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;
    Ok(json!({ "ok": true, "stamped": stamped }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.monthOpen" => Some(with_db(state, req, attendance_month_open)),
        "attendance.monthReport" => Some(with_db(state, req, attendance_month_report)),
        "attendance.setDay" => Some(with_db(state, req, attendance_set_day)),
        "attendance.bulkStampDay" => Some(with_db(state, req, attendance_bulk_stamp_day)),
        _ => None,
    }
}
