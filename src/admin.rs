//! Maintenance operations behind `dpotd admin`.
//!
//! Everything here is a thin pass-through to the backend, gated by a shared
//! secret. The one piece with real logic is the CSV export, which has to
//! cope with whatever shape the violation log column ended up in.

use chrono::{DateTime, Local, NaiveDate};
use itertools::Itertools;
use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Write};
use thiserror::Error;
use tracing::info;

use crate::gateway::{AdminGateway, GatewayError, QuestionsPayload, Settings, SubmissionRecord};
use crate::schedule::{to_storage_format, Schedule, MAX_DAYS};
use crate::util::format_short;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Incorrect password")]
    Unauthorized,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    InvalidInput(String),
}

pub const CSV_HEADERS: [&str; 15] = [
    "Student Name",
    "Email",
    "Day",
    "Timestamp",
    "Q1 Answer",
    "Q1 Correct",
    "Q1 Time (s)",
    "Q2 Answer",
    "Q2 Correct",
    "Q2 Time (s)",
    "Q3 Answer",
    "Q3 Time (s)",
    "Total Time (s)",
    "Exit Count",
    "Violations",
];

/// Checks the supplied password against the configured secret.
pub fn authenticate(secret: Option<&str>, supplied: &str) -> Result<(), AdminError> {
    match secret {
        None | Some("") => Err(AdminError::InvalidInput(
            "no admin secret configured (set admin_secret or DPOTD_ADMIN_SECRET)".into(),
        )),
        Some(secret) if secret == supplied => Ok(()),
        Some(_) => Err(AdminError::Unauthorized),
    }
}

fn check_day(day: u8) -> Result<u8, AdminError> {
    if (1..=MAX_DAYS).contains(&day) {
        Ok(day)
    } else {
        Err(AdminError::InvalidInput(format!(
            "day must be between 1 and {MAX_DAYS}, got {day}"
        )))
    }
}

/// An authenticated admin session.
pub struct Admin<'a, G: AdminGateway + ?Sized> {
    gateway: &'a G,
}

impl<'a, G: AdminGateway + ?Sized> Admin<'a, G> {
    pub fn login(gateway: &'a G, secret: Option<&str>, supplied: &str) -> Result<Self, AdminError> {
        authenticate(secret, supplied)?;
        Ok(Self { gateway })
    }

    /// Questions for a day. A day with nothing saved yet shows up blank.
    pub fn questions(&self, day: u8) -> Result<QuestionsPayload, AdminError> {
        match self.gateway.questions(check_day(day)?) {
            Ok(q) => Ok(q),
            Err(GatewayError::Rejected(_)) => Ok(QuestionsPayload::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save_questions(&self, day: u8, questions: &QuestionsPayload) -> Result<(), AdminError> {
        self.gateway.save_questions(check_day(day)?, questions)?;
        info!(day, "questions saved");
        Ok(())
    }

    pub fn schedule(&self) -> Result<Schedule, AdminError> {
        Ok(self.gateway.schedule()?)
    }

    /// Stores the schedule with every start rewritten into the storage
    /// format. Blank days are dropped; anything unparseable is refused.
    pub fn save_schedule(&self, schedule: &Schedule) -> Result<Schedule, AdminError> {
        let mut normalized = Schedule::default();
        for day in 1..=MAX_DAYS {
            if let Some(raw) = schedule.get(day) {
                let stored = to_storage_format(raw).ok_or_else(|| {
                    AdminError::InvalidInput(format!("day {day}: unrecognised date/time {raw:?}"))
                })?;
                normalized.set(day, Some(stored));
            }
        }
        self.gateway.save_schedule(&normalized)?;
        info!("schedule saved");
        Ok(normalized)
    }

    pub fn settings(&self) -> Result<Settings, AdminError> {
        Ok(self.gateway.settings()?)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), AdminError> {
        self.gateway.save_settings(settings)?;
        info!("settings saved");
        Ok(())
    }

    /// All submissions, newest first.
    pub fn submissions(&self) -> Result<Vec<SubmissionRecord>, AdminError> {
        let mut records = self.gateway.submissions()?;
        records.reverse();
        Ok(records)
    }
}

/// One violation as read back from the sheet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggedViolation {
    #[serde(default)]
    pub time: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Reads the violation log column, which may hold a JSON string or an
/// already-decoded array. Anything else yields no entries.
pub fn parse_violations(raw: &Value) -> Vec<LoggedViolation> {
    let parsed = match raw {
        Value::String(s) => serde_json::from_str(s),
        other => serde_json::from_value(other.clone()),
    };
    parsed.unwrap_or_default()
}

fn violations_cell(raw: &Value) -> String {
    parse_violations(raw)
        .iter()
        .map(|v| format!("{}: {}", v.time, v.kind))
        .join("; ")
}

/// Writes the submissions as CSV, header first.
pub fn export_csv<W: Write>(records: &[SubmissionRecord], out: W) -> Result<(), AdminError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(CSV_HEADERS)?;
    for r in records {
        writer.write_record([
            r.student_name.clone(),
            r.student_email.clone(),
            r.day.clone(),
            r.timestamp.clone(),
            r.q1_answer.clone(),
            r.q1_correct.to_string(),
            r.q1_time.to_string(),
            r.q2_answer.clone(),
            r.q2_correct.to_string(),
            r.q2_time.to_string(),
            r.q3_answer.clone(),
            r.q3_time.to_string(),
            r.total_time.to_string(),
            r.exit_count.to_string(),
            violations_cell(&r.exit_logs),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn default_export_name(date: NaiveDate) -> String {
    format!("dpotd_submissions_{}.csv", date.format("%Y-%m-%d"))
}

fn local_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn mark(correct: bool) -> &'static str {
    if correct {
        "correct"
    } else {
        "incorrect"
    }
}

/// Human readable block for `submissions list`.
pub fn render_submission(r: &SubmissionRecord) -> String {
    let mut out = format!(
        "{} <{}>  day {}  {}\n  Q1: {} ({}, {})\n  Q2: {} ({}, {})\n  Q3: {} ({})\n  total {}  violations {}",
        r.student_name,
        r.student_email,
        r.day,
        local_timestamp(&r.timestamp),
        r.q1_answer,
        mark(r.q1_correct),
        format_short(r.q1_time),
        r.q2_answer,
        mark(r.q2_correct),
        format_short(r.q2_time),
        r.q3_answer,
        format_short(r.q3_time),
        format_short(r.total_time),
        r.exit_count,
    );
    for v in parse_violations(&r.exit_logs) {
        out.push_str(&format!("\n    {}: {}", local_timestamp(&v.time), v.kind));
    }
    if !r.work_file_url.trim().is_empty() {
        out.push_str(&format!("\n  uploaded work: {}", r.work_file_url.trim()));
    }
    out
}
