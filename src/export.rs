//! Audit-log and booking exports (CSV and JSON) for admin download.

use serde::Serialize;

use crate::engine::Engine;
use crate::model::{LogEntry, LogFilter, Ms};

/// Minimal CSV quoting: a field is quoted when it contains a comma,
/// quote, or newline; embedded quotes are doubled.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
        out
    } else {
        s.to_string()
    }
}

fn push_row(out: &mut String, fields: &[&str]) {
    let mut first = true;
    for f in fields {
        if !first {
            out.push(',');
        }
        out.push_str(&csv_field(f));
        first = false;
    }
    out.push_str("\r\n");
}

#[derive(Serialize)]
struct LogRow {
    id: String,
    user: String,
    email: String,
    action: String,
    details: String,
    timestamp: Ms,
}

fn log_row(engine: &Engine, entry: &LogEntry) -> LogRow {
    let (user, email) = engine
        .get_user(entry.user_id)
        .map(|u| (u.name, u.email))
        .unwrap_or_else(|| ("[deleted]".into(), String::new()));
    LogRow {
        id: entry.id.to_string(),
        user,
        email,
        action: entry.action.clone(),
        details: entry.details.clone(),
        timestamp: entry.at,
    }
}

/// Audit trail as CSV, honoring the same filter as the log listing.
pub async fn logs_csv(engine: &Engine, filter: &LogFilter) -> String {
    let mut out = String::new();
    push_row(&mut out, &["ID", "User", "Email", "Action", "Details", "Timestamp"]);
    for entry in engine.list_logs(filter).await {
        let row = log_row(engine, &entry);
        push_row(
            &mut out,
            &[
                &row.id,
                &row.user,
                &row.email,
                &row.action,
                &row.details,
                &row.timestamp.to_string(),
            ],
        );
    }
    out
}

/// Audit trail as pretty-printed JSON.
pub async fn logs_json(engine: &Engine, filter: &LogFilter) -> String {
    let rows: Vec<LogRow> = engine
        .list_logs(filter)
        .await
        .iter()
        .map(|e| log_row(engine, e))
        .collect();
    serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".into())
}

/// All bookings as CSV, newest first.
pub async fn bookings_csv(engine: &Engine) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        &[
            "ID", "User", "Email", "Room", "Status", "CheckinTime", "CheckoutTime", "CreatedAt",
        ],
    );
    for booking in engine.list_bookings(None).await {
        let (user, email) = engine
            .get_user(booking.user_id)
            .map(|u| (u.name, u.email))
            .unwrap_or_else(|| ("[deleted]".into(), String::new()));
        let room_no = match engine.get_room_info(booking.room_id).await {
            Some(info) => info.room_no,
            None => booking.room_id.to_string(),
        };
        let checkin = booking.checkin_time.map(|t| t.to_string()).unwrap_or_default();
        let checkout = booking.checkout_time.map(|t| t.to_string()).unwrap_or_default();
        push_row(
            &mut out,
            &[
                &booking.id.to_string(),
                &user,
                &email,
                &room_no,
                booking.status.as_str(),
                &checkin,
                &checkout,
                &booking.created_at.to_string(),
            ],
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_unquoted() {
        assert_eq!(csv_field("room_added"), "room_added");
        assert_eq!(csv_field(""), "");
    }

    #[test]
    fn commas_and_quotes_escaped() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn rows_are_crlf_terminated() {
        let mut out = String::new();
        push_row(&mut out, &["a", "b,c"]);
        assert_eq!(out, "a,\"b,c\"\r\n");
    }
}
