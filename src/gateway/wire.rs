//! JSON shapes exchanged with the backend script.
//!
//! The backing spreadsheet is loose about types (a numeric cell comes back
//! as a number, a checkbox as `"TRUE"`), so the read side accepts any of the
//! plausible encodings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::GatewayError;

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<f64>().map(|f| f.max(0.0) as u64).unwrap_or(0),
        _ => 0,
    })
}

/// One day's three questions with their reference answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionsPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub q1_text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q1_answer: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q2_text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q2_answer: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q3_text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q3_answer: String,
}

/// `getQuestions` answers either with the questions or with `{error}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct QuestionsResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub questions: QuestionsPayload,
}

impl QuestionsResponse {
    pub fn into_result(self) -> Result<QuestionsPayload, GatewayError> {
        match self.error {
            Some(err) => Err(GatewayError::Rejected(err)),
            None => Ok(self.questions),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CheckResponse {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub exists: bool,
}

/// Reply to any write (`submit`, `saveQuestions`, ...).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WriteResponse {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl WriteResponse {
    pub fn into_result(self) -> Result<(), GatewayError> {
        if self.success {
            Ok(())
        } else {
            Err(GatewayError::Rejected(
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

/// Body posted when a student finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "studentName")]
    pub student_name: String,
    #[serde(rename = "studentEmail")]
    pub student_email: String,
    pub day: u8,
    pub q1_answer: String,
    pub q2_answer: String,
    pub q3_answer: String,
    pub q1_correct: bool,
    pub q2_correct: bool,
    pub q1_time: u64,
    pub q2_time: u64,
    pub q3_time: u64,
    #[serde(rename = "totalTime")]
    pub total_time: u64,
    #[serde(rename = "exitCount")]
    pub exit_count: usize,
    /// JSON-encoded `[{time, type}]`, kept as a string for the sheet cell.
    #[serde(rename = "exitLogs")]
    pub exit_logs: String,
    #[serde(rename = "workFileURL")]
    pub work_file_url: String,
}

/// The three settings the admin screen edits; keys match the sheet headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "Admin Email", default, deserialize_with = "lenient_string")]
    pub admin_email: String,
    #[serde(rename = "Test Duration", default = "default_test_duration", deserialize_with = "lenient_u64")]
    pub test_duration_mins: u64,
    #[serde(rename = "Upload Time", default = "default_upload_time", deserialize_with = "lenient_u64")]
    pub upload_time_mins: u64,
}

fn default_test_duration() -> u64 {
    120
}

fn default_upload_time() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_email: String::new(),
            test_duration_mins: default_test_duration(),
            upload_time_mins: default_upload_time(),
        }
    }
}

/// A stored submission as `getSubmissions` lists it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    #[serde(rename = "studentName", default, deserialize_with = "lenient_string")]
    pub student_name: String,
    #[serde(rename = "studentEmail", default, deserialize_with = "lenient_string")]
    pub student_email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub day: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q1_answer: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub q1_correct: bool,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub q1_time: u64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q2_answer: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub q2_correct: bool,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub q2_time: u64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub q3_answer: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub q3_time: u64,
    #[serde(rename = "totalTime", default, deserialize_with = "lenient_u64")]
    pub total_time: u64,
    #[serde(rename = "exitCount", default, deserialize_with = "lenient_u64")]
    pub exit_count: u64,
    /// Either the JSON string the client posted or an already-decoded array.
    #[serde(rename = "exitLogs", default)]
    pub exit_logs: Value,
    #[serde(rename = "workFileURL", default, deserialize_with = "lenient_string")]
    pub work_file_url: String,
}

impl SubmissionRecord {
    pub fn from_submission(sub: &Submission, timestamp: impl Into<String>) -> Self {
        Self {
            student_name: sub.student_name.clone(),
            student_email: sub.student_email.clone(),
            day: sub.day.to_string(),
            timestamp: timestamp.into(),
            q1_answer: sub.q1_answer.clone(),
            q1_correct: sub.q1_correct,
            q1_time: sub.q1_time,
            q2_answer: sub.q2_answer.clone(),
            q2_correct: sub.q2_correct,
            q2_time: sub.q2_time,
            q3_answer: sub.q3_answer.clone(),
            q3_time: sub.q3_time,
            total_time: sub.total_time,
            exit_count: sub.exit_count as u64,
            exit_logs: Value::String(sub.exit_logs.clone()),
            work_file_url: sub.work_file_url.clone(),
        }
    }
}

/// `getSubmissions` returns a bare array, or `{error}` on failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum SubmissionsResponse {
    Records(Vec<SubmissionRecord>),
    Failure { error: String },
}

impl SubmissionsResponse {
    pub fn into_result(self) -> Result<Vec<SubmissionRecord>, GatewayError> {
        match self {
            Self::Records(records) => Ok(records),
            Self::Failure { error } => Err(GatewayError::Rejected(error)),
        }
    }
}
