use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::gateway::{QuestionsPayload, Submission};
use crate::grading::{grade, normalize_numeric_answer, Verdict};
use crate::monitor::{ViolationKind, ViolationLog};
use crate::schedule::Schedule;

/// Lifecycle of one test attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Idle,
    AwaitingDay,
    Loaded,
    Active,
    Submitting,
    Completed,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionId {
    Q1,
    Q2,
    Q3,
}

impl QuestionId {
    pub const ALL: [QuestionId; 3] = [QuestionId::Q1, QuestionId::Q2, QuestionId::Q3];

    pub fn index(self) -> usize {
        match self {
            QuestionId::Q1 => 0,
            QuestionId::Q2 => 1,
            QuestionId::Q3 => 2,
        }
    }

    /// Q1 and Q2 take numeric answers and are marked automatically.
    pub fn is_numeric(self) -> bool {
        !matches!(self, QuestionId::Q3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSet {
    questions: [Question; 3],
}

impl QuestionSet {
    pub fn get(&self, id: QuestionId) -> &Question {
        &self.questions[id.index()]
    }
}

impl From<QuestionsPayload> for QuestionSet {
    fn from(p: QuestionsPayload) -> Self {
        let q = |text: String, correct_answer: String| Question {
            text,
            correct_answer,
        };
        Self {
            questions: [
                q(p.q1_text, p.q1_answer),
                q(p.q2_text, p.q2_answer),
                q(p.q3_text, p.q3_answer),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    values: [String; 3],
}

impl Answers {
    pub fn get(&self, id: QuestionId) -> &str {
        &self.values[id.index()]
    }

    fn all_present(&self) -> bool {
        self.values.iter().all(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub test_duration: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            test_duration: Duration::from_secs(120 * 60),
        }
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"))
}

pub fn validate_email(email: &str) -> bool {
    email_regex().is_match(email)
}

fn whole_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}

/// The single session owned by the proctor for one run of the client.
#[derive(Debug, Clone)]
pub struct TestSession {
    settings: SessionSettings,
    state: SessionState,
    student_name: String,
    student_email: String,
    current_day: Option<u8>,
    questions: Option<QuestionSet>,
    started_at: Option<DateTime<Utc>>,
    question_starts: [Option<DateTime<Utc>>; 3],
    answers: Answers,
    violations: ViolationLog,
    warning: Option<ViolationKind>,
    submitted: bool,
    last_submission: Option<Submission>,
}

impl TestSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            state: SessionState::Idle,
            student_name: String::new(),
            student_email: String::new(),
            current_day: None,
            questions: None,
            started_at: None,
            question_starts: [None; 3],
            answers: Answers::default(),
            violations: ViolationLog::default(),
            warning: None,
            submitted: false,
            last_submission: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn student_name(&self) -> &str {
        &self.student_name
    }

    pub fn student_email(&self) -> &str {
        &self.student_email
    }

    pub fn current_day(&self) -> Option<u8> {
        self.current_day
    }

    pub fn questions(&self) -> Option<&QuestionSet> {
        self.questions.as_ref()
    }

    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    pub fn violations(&self) -> &ViolationLog {
        &self.violations
    }

    pub fn warning(&self) -> Option<ViolationKind> {
        self.warning
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn question_start(&self, id: QuestionId) -> Option<DateTime<Utc>> {
        self.question_starts[id.index()]
    }

    /// Payload of the most recent submission attempt.
    pub fn last_submission(&self) -> Option<&Submission> {
        self.last_submission.as_ref()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let duration = chrono::Duration::from_std(self.settings.test_duration).ok()?;
        self.started_at.map(|s| s + duration)
    }

    /// Time left on the clock, floored at zero. Before activation the full
    /// duration is reported.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.deadline() {
            Some(deadline) => (deadline - now).to_std().unwrap_or(Duration::ZERO),
            None => self.settings.test_duration,
        }
    }

    /// `Idle -> AwaitingDay`. Nothing leaves the client if this fails.
    pub fn request_start(&mut self, name: &str, email: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::validation("A test is already in progress"));
        }
        let (name, email) = (name.trim(), email.trim());
        if name.is_empty() || email.is_empty() {
            return Err(SessionError::validation("Please fill in all fields"));
        }
        if !validate_email(email) {
            return Err(SessionError::validation("Invalid email format"));
        }
        self.student_name = name.to_string();
        self.student_email = email.to_string();
        self.transition(SessionState::AwaitingDay);
        Ok(())
    }

    /// Resolves the active day from the schedule. Ignored unless the session
    /// is waiting for it.
    pub fn apply_schedule(
        &mut self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<u8>, SessionError> {
        if self.state != SessionState::AwaitingDay || self.current_day.is_some() {
            return Ok(None);
        }
        match schedule.resolve_active_day(now) {
            Some(day) => {
                info!(day, "active day resolved");
                self.current_day = Some(day);
                Ok(Some(day))
            }
            None => Err(self.abort_loading(SessionError::NoActiveTest)),
        }
    }

    pub fn apply_submission_check(&mut self, exists: bool) -> Result<(), SessionError> {
        if self.state != SessionState::AwaitingDay || self.current_day.is_none() {
            return Ok(());
        }
        if exists {
            return Err(self.abort_loading(SessionError::AlreadySubmitted));
        }
        Ok(())
    }

    /// `AwaitingDay -> Loaded`.
    pub fn load_questions(&mut self, questions: QuestionSet) {
        if self.state != SessionState::AwaitingDay || self.current_day.is_none() {
            return;
        }
        self.questions = Some(questions);
        self.transition(SessionState::Loaded);
    }

    /// `AwaitingDay -> Idle`, dropping whatever was resolved so the next
    /// start begins from scratch. Hands the error back for reporting.
    pub fn abort_loading(&mut self, err: SessionError) -> SessionError {
        if self.state == SessionState::AwaitingDay {
            warn!(error = %err, "test could not be loaded");
            self.current_day = None;
            self.questions = None;
            self.transition(SessionState::Idle);
        }
        err
    }

    /// `Loaded -> Active`, once fullscreen has been granted.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != SessionState::Loaded {
            return Err(SessionError::validation("Questions are not loaded yet"));
        }
        self.started_at = Some(now);
        self.question_starts[QuestionId::Q1.index()] = Some(now);
        self.transition(SessionState::Active);
        Ok(())
    }

    /// Records the first time an answer field gets focus. Earlier questions
    /// that were skipped get the same instant so start times stay ordered.
    pub fn focus_answer(&mut self, id: QuestionId, now: DateTime<Utc>) {
        if self.state != SessionState::Active {
            return;
        }
        for slot in self.question_starts.iter_mut().take(id.index() + 1) {
            if slot.is_none() {
                *slot = Some(now);
            }
        }
    }

    /// Replaces an answer while the test is running; numeric answers are
    /// normalized on the way in. Returns the stored value.
    pub fn set_answer(&mut self, id: QuestionId, value: &str) -> &str {
        if self.state == SessionState::Active {
            self.answers.values[id.index()] = if id.is_numeric() {
                normalize_numeric_answer(value)
            } else {
                value.to_string()
            };
        }
        self.answers.get(id)
    }

    /// Appends to the violation log and raises the warning. A no-op unless
    /// the test is running.
    pub fn record_violation(&mut self, kind: ViolationKind, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        self.violations.push(kind, now);
        self.warning = Some(kind);
        true
    }

    pub fn clear_warning(&mut self) {
        self.warning = None;
    }

    /// Shared by the periodic tick and the deadline alarm: forces a
    /// submission once the clock has run out.
    pub fn on_timer(&mut self, now: DateTime<Utc>) -> Option<Submission> {
        if self.state != SessionState::Active || !self.remaining(now).is_zero() {
            return None;
        }
        info!("time is up, forcing submission");
        self.begin_submit(now, true).ok().flatten()
    }

    /// `Active -> Submitting`. Returns the payload to send, or `None` when
    /// there is nothing to do (not running, already in flight or done).
    pub fn begin_submit(
        &mut self,
        now: DateTime<Utc>,
        forced: bool,
    ) -> Result<Option<Submission>, SessionError> {
        if self.state != SessionState::Active || self.submitted {
            debug!(state = %self.state, "submission ignored");
            return Ok(None);
        }
        let forced = forced || self.remaining(now).is_zero();
        if !forced && !self.answers.all_present() {
            return Err(SessionError::validation("Please answer all questions"));
        }
        let submission = self.build_submission(now);
        self.last_submission = Some(submission.clone());
        self.transition(SessionState::Submitting);
        Ok(Some(submission))
    }

    /// Resolves an in-flight submission: `Submitting -> Completed` on
    /// success, `Submitting -> Active` on failure with answers intact.
    pub fn complete_submission(&mut self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        if self.state != SessionState::Submitting {
            return Ok(());
        }
        match result {
            Ok(()) => {
                self.submitted = true;
                self.warning = None;
                self.transition(SessionState::Completed);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "submission failed, test resumed");
                self.transition(SessionState::Active);
                Err(err)
            }
        }
    }

    /// `Completed -> Locked` once the environment has been released.
    pub fn release(&mut self) {
        if self.state == SessionState::Completed {
            self.transition(SessionState::Locked);
        }
    }

    pub fn verdict(&self, id: QuestionId) -> Verdict {
        if !id.is_numeric() {
            return Verdict::Manual;
        }
        let reference = self
            .questions
            .as_ref()
            .map(|q| q.get(id).correct_answer.as_str())
            .unwrap_or_default();
        grade(self.answers.get(id), reference).into()
    }

    fn build_submission(&self, end: DateTime<Utc>) -> Submission {
        let start = self.started_at.unwrap_or(end);
        let [q1s, q2s, q3s] = self.question_starts;
        let q1s = q1s.unwrap_or(start);

        let total = whole_secs(start, end);
        let q1_time = q2s.map_or(total, |q2| whole_secs(q1s, q2));
        let q2_time = match (q2s, q3s) {
            (Some(q2), Some(q3)) => whole_secs(q2, q3),
            _ => 0,
        };
        let q3_time = whole_secs(q3s.or(q2s).unwrap_or(q1s), end);

        Submission {
            student_name: self.student_name.clone(),
            student_email: self.student_email.clone(),
            day: self.current_day.unwrap_or_default(),
            q1_answer: normalize_numeric_answer(self.answers.get(QuestionId::Q1)),
            q2_answer: normalize_numeric_answer(self.answers.get(QuestionId::Q2)),
            q3_answer: self.answers.get(QuestionId::Q3).trim().to_string(),
            q1_correct: self.verdict(QuestionId::Q1) == Verdict::Correct,
            q2_correct: self.verdict(QuestionId::Q2) == Verdict::Correct,
            q1_time,
            q2_time,
            q3_time,
            total_time: total,
            exit_count: self.violations.count(),
            exit_logs: self.violations.to_json(),
            work_file_url: String::new(),
        }
    }

    fn transition(&mut self, to: SessionState) {
        debug!(from = %self.state, to = %to, "session transition");
        self.state = to;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn payload() -> QuestionsPayload {
        QuestionsPayload {
            q1_text: "6 x 7?".into(),
            q1_answer: "42".into(),
            q2_text: "1 - 4?".into(),
            q2_answer: "-3".into(),
            q3_text: "Explain.".into(),
            q3_answer: "".into(),
        }
    }

    fn schedule() -> Schedule {
        let mut s = Schedule::default();
        s.set(1, Some("2024-01-01T00:00:00Z".into()));
        s
    }

    pub(crate) fn loaded_session() -> TestSession {
        let mut s = TestSession::new(SessionSettings::default());
        s.request_start("Ada", "ada@example.com").unwrap();
        assert_eq!(s.apply_schedule(&schedule(), t0()), Ok(Some(1)));
        s.apply_submission_check(false).unwrap();
        s.load_questions(payload().into());
        s
    }

    pub(crate) fn active_session() -> TestSession {
        let mut s = loaded_session();
        s.activate(t0()).unwrap();
        s
    }

    #[test]
    fn start_requires_name_and_valid_email() {
        let mut s = TestSession::new(SessionSettings::default());
        assert_matches!(s.request_start("", "a@b.co"), Err(SessionError::Validation(_)));
        assert_matches!(s.request_start("Ada", "  "), Err(SessionError::Validation(_)));
        assert_eq!(
            s.request_start("Ada", "bad-email"),
            Err(SessionError::Validation("Invalid email format".into()))
        );
        assert_eq!(s.state(), SessionState::Idle);

        s.request_start("  Ada ", " ada@example.com ").unwrap();
        assert_eq!(s.state(), SessionState::AwaitingDay);
        assert_eq!(s.student_email(), "ada@example.com");
        assert_eq!(s.student_name(), "Ada");
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("student@example.com"));
        assert!(validate_email("a.b+c@school.ac.uk"));
        assert!(!validate_email("student@example"));
        assert!(!validate_email("stu dent@example.com"));
        assert!(!validate_email("@example.com"));
    }

    #[test]
    fn no_active_day_returns_to_idle() {
        let mut s = TestSession::new(SessionSettings::default());
        s.request_start("Ada", "ada@example.com").unwrap();
        let early = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(s.apply_schedule(&schedule(), early), Err(SessionError::NoActiveTest));
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.current_day(), None);
    }

    #[test]
    fn existing_submission_returns_to_idle() {
        let mut s = TestSession::new(SessionSettings::default());
        s.request_start("Ada", "ada@example.com").unwrap();
        s.apply_schedule(&schedule(), t0()).unwrap();
        assert_eq!(s.apply_submission_check(true), Err(SessionError::AlreadySubmitted));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn day_is_resolved_once() {
        let mut s = TestSession::new(SessionSettings::default());
        s.request_start("Ada", "ada@example.com").unwrap();
        s.apply_schedule(&schedule(), t0()).unwrap();
        let mut later = Schedule::default();
        later.set(2, Some("2024-01-02T00:00:00Z".into()));
        assert_eq!(s.apply_schedule(&later, t0()), Ok(None));
        assert_eq!(s.current_day(), Some(1));
    }

    #[test]
    fn activation_requires_loaded_questions() {
        let mut s = TestSession::new(SessionSettings::default());
        assert!(s.activate(t0()).is_err());
        let mut s = loaded_session();
        assert_eq!(s.state(), SessionState::Loaded);
        s.activate(t0()).unwrap();
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.question_start(QuestionId::Q1), Some(t0()));
        assert_eq!(s.deadline(), Some(t0() + secs(7200)));
    }

    #[test]
    fn focus_capture_is_lazy_and_ordered() {
        let mut s = active_session();
        s.focus_answer(QuestionId::Q3, t0() + secs(30));
        assert_eq!(s.question_start(QuestionId::Q2), Some(t0() + secs(30)));
        assert_eq!(s.question_start(QuestionId::Q3), Some(t0() + secs(30)));
        s.focus_answer(QuestionId::Q2, t0() + secs(90));
        assert_eq!(s.question_start(QuestionId::Q2), Some(t0() + secs(30)));
        s.focus_answer(QuestionId::Q1, t0() + secs(95));
        assert_eq!(s.question_start(QuestionId::Q1), Some(t0()));
    }

    #[test]
    fn answers_only_change_while_active() {
        let mut s = loaded_session();
        s.set_answer(QuestionId::Q1, "5");
        assert_eq!(s.answers().get(QuestionId::Q1), "");
        s.activate(t0()).unwrap();
        assert_eq!(s.set_answer(QuestionId::Q1, "4 2"), "42");
        assert_eq!(s.set_answer(QuestionId::Q3, "because  "), "because  ");
    }

    #[test]
    fn violations_only_while_active() {
        let mut s = loaded_session();
        assert!(!s.record_violation(ViolationKind::WindowBlur, t0()));
        assert!(s.violations().is_empty());
        s.activate(t0()).unwrap();
        assert!(s.record_violation(ViolationKind::WindowBlur, t0()));
        assert_eq!(s.violations().count(), s.violations().entries().len());
        assert_eq!(s.warning(), Some(ViolationKind::WindowBlur));
    }

    #[test]
    fn manual_submit_requires_all_answers() {
        let mut s = active_session();
        s.set_answer(QuestionId::Q1, "42");
        assert_eq!(
            s.begin_submit(t0() + secs(60), false),
            Err(SessionError::Validation("Please answer all questions".into()))
        );
        assert_eq!(s.state(), SessionState::Active);
    }

    #[test]
    fn forced_submit_skips_completeness() {
        let mut s = active_session();
        let sub = s.begin_submit(t0() + secs(60), true).unwrap().unwrap();
        assert_eq!(s.state(), SessionState::Submitting);
        assert_eq!(sub.q1_answer, "");
        assert!(!sub.q1_correct);
    }

    #[test]
    fn submission_payload_grades_and_times() {
        let mut s = active_session();
        s.focus_answer(QuestionId::Q2, t0() + secs(100));
        s.focus_answer(QuestionId::Q3, t0() + secs(250));
        s.set_answer(QuestionId::Q1, "42");
        s.set_answer(QuestionId::Q2, "3");
        s.set_answer(QuestionId::Q3, "  a proof ");
        s.record_violation(ViolationKind::TabHidden, t0() + secs(10));
        s.record_violation(ViolationKind::WindowBlur, t0() + secs(20));

        let sub = s.begin_submit(t0() + secs(400), false).unwrap().unwrap();
        assert_eq!(sub.day, 1);
        assert!(sub.q1_correct);
        assert!(!sub.q2_correct);
        assert_eq!(sub.q3_answer, "a proof");
        assert_eq!((sub.q1_time, sub.q2_time, sub.q3_time), (100, 150, 150));
        assert_eq!(sub.total_time, 400);
        assert_eq!(sub.exit_count, 2);
        assert_eq!(s.verdict(QuestionId::Q3), Verdict::Manual);
    }

    #[test]
    fn timing_falls_back_when_fields_never_focused() {
        let mut s = active_session();
        let sub = s.begin_submit(t0() + secs(61), true).unwrap().unwrap();
        assert_eq!((sub.q1_time, sub.q2_time, sub.q3_time), (61, 0, 61));

        let mut s = active_session();
        s.focus_answer(QuestionId::Q2, t0() + secs(20));
        let sub = s.begin_submit(t0() + secs(61), true).unwrap().unwrap();
        assert_eq!((sub.q1_time, sub.q2_time, sub.q3_time), (20, 0, 41));
    }

    #[test]
    fn failure_rolls_back_and_success_is_final() {
        let mut s = active_session();
        s.set_answer(QuestionId::Q1, "42");
        s.begin_submit(t0() + secs(5), true).unwrap().unwrap();
        assert_eq!(
            s.complete_submission(Err(SessionError::Network("offline".into()))),
            Err(SessionError::Network("offline".into()))
        );
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.answers().get(QuestionId::Q1), "42");

        assert!(s.begin_submit(t0() + secs(6), true).unwrap().is_some());
        s.complete_submission(Ok(())).unwrap();
        assert_eq!(s.state(), SessionState::Completed);
        assert!(s.is_submitted());

        assert_eq!(s.begin_submit(t0() + secs(7), true), Ok(None));
        assert!(!s.record_violation(ViolationKind::RightClick, t0()));
        s.release();
        assert_eq!(s.state(), SessionState::Locked);
    }

    #[test]
    fn timer_forces_exactly_once() {
        let mut s = active_session();
        assert!(s.on_timer(t0() + secs(7199)).is_none());
        assert!(s.on_timer(t0() + secs(7200)).is_some());
        // the alarm firing right after the tick finds the session in flight
        assert!(s.on_timer(t0() + secs(7200)).is_none());
        assert_eq!(s.state(), SessionState::Submitting);
    }

    #[test]
    fn remaining_is_floored() {
        let s = active_session();
        assert_eq!(s.remaining(t0() + secs(7000)), Duration::from_secs(200));
        assert_eq!(s.remaining(t0() + secs(9000)), Duration::ZERO);
    }

    #[test]
    fn after_deadline_manual_submit_is_forced() {
        let mut s = active_session();
        assert!(s.begin_submit(t0() + secs(7300), false).unwrap().is_some());
    }
}
