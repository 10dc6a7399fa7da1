use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{
    AdminGateway, Gateway, GatewayError, QuestionsPayload, Settings, Submission, SubmissionRecord,
};
use crate::schedule::Schedule;

#[derive(Debug, Default)]
struct Store {
    schedule: Schedule,
    questions: HashMap<u8, QuestionsPayload>,
    settings: Settings,
    submissions: Vec<SubmissionRecord>,
    accepted: Vec<Submission>,
    failures: VecDeque<GatewayError>,
    calls: Vec<&'static str>,
}

/// In-process backend holding everything in memory.
///
/// Used by the integration tests and handy for rehearsing the admin
/// commands; `fail_next` queues errors returned by the next calls.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    store: Mutex<Store>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule(self, schedule: Schedule) -> Self {
        self.lock().schedule = schedule;
        self
    }

    pub fn with_questions(self, day: u8, questions: QuestionsPayload) -> Self {
        self.lock().questions.insert(day, questions);
        self
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.lock().failures.push_back(err);
    }

    /// Submissions the backend accepted, in arrival order.
    pub fn accepted(&self) -> Vec<Submission> {
        self.lock().accepted.clone()
    }

    /// Names of the operations called so far.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, op: &'static str) -> Result<MutexGuard<'_, Store>, GatewayError> {
        let mut store = self.lock();
        store.calls.push(op);
        match store.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(store),
        }
    }
}

impl Gateway for MemoryGateway {
    fn schedule(&self) -> Result<Schedule, GatewayError> {
        Ok(self.begin("getSchedule")?.schedule.clone())
    }

    fn questions(&self, day: u8) -> Result<QuestionsPayload, GatewayError> {
        self.begin("getQuestions")?
            .questions
            .get(&day)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected(format!("No questions found for day {day}")))
    }

    fn submission_exists(&self, email: &str, day: u8) -> Result<bool, GatewayError> {
        let store = self.begin("checkSubmission")?;
        let day = day.to_string();
        Ok(store
            .submissions
            .iter()
            .any(|s| s.student_email.eq_ignore_ascii_case(email) && s.day == day))
    }

    fn submit(&self, submission: &Submission) -> Result<(), GatewayError> {
        let mut store = self.begin("submit")?;
        let record = SubmissionRecord::from_submission(submission, Utc::now().to_rfc3339());
        store.submissions.push(record);
        store.accepted.push(submission.clone());
        Ok(())
    }
}

impl AdminGateway for MemoryGateway {
    fn settings(&self) -> Result<Settings, GatewayError> {
        Ok(self.begin("getSettings")?.settings.clone())
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), GatewayError> {
        self.begin("saveSettings")?.settings = settings.clone();
        Ok(())
    }

    fn save_questions(&self, day: u8, questions: &QuestionsPayload) -> Result<(), GatewayError> {
        self.begin("saveQuestions")?
            .questions
            .insert(day, questions.clone());
        Ok(())
    }

    fn save_schedule(&self, schedule: &Schedule) -> Result<(), GatewayError> {
        self.begin("saveSchedule")?.schedule = schedule.clone();
        Ok(())
    }

    fn submissions(&self) -> Result<Vec<SubmissionRecord>, GatewayError> {
        Ok(self.begin("getSubmissions")?.submissions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_failure_hits_next_call_only() {
        let gw = MemoryGateway::new().with_questions(1, QuestionsPayload::default());
        gw.fail_next(GatewayError::Timeout);
        assert_eq!(gw.questions(1), Err(GatewayError::Timeout));
        assert!(gw.questions(1).is_ok());
        assert_eq!(gw.calls(), vec!["getQuestions", "getQuestions"]);
    }

    #[test]
    fn missing_day_is_rejected() {
        let gw = MemoryGateway::new();
        assert!(matches!(gw.questions(2), Err(GatewayError::Rejected(_))));
    }
}
