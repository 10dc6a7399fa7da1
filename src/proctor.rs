//! Event-loop glue between the terminal, the session and the backend.
//!
//! The proctor owns the single [`TestSession`] and is the only thing that
//! mutates it. Terminal events are translated into environment signals and
//! form input, gateway calls are handed to a [`Dispatch`] and come back as
//! [`Reply`] events, and timers the loop has to arm are queued for the
//! caller to pick up with [`Proctor::drain_alarms`].

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dispatch::{Dispatch, Reply, Request};
use crate::environment::Environment;
use crate::error::SessionError;
use crate::form::{AnswerForm, AnswerSlot, StartField, StartForm, TextField};
use crate::gateway::Submission;
use crate::grading::normalize_numeric_answer;
use crate::monitor::{EnvSignal, MonitorResponse, ViolationMonitor};
use crate::runtime::{Alarm, ProctorEvent};
use crate::session::{QuestionId, SessionSettings, SessionState, TestSession};

#[derive(Debug, Clone)]
pub struct ProctorOptions {
    pub settings: SessionSettings,
    pub min_cols: u16,
    pub min_rows: u16,
    pub reentry_delay: Duration,
}

impl Default for ProctorOptions {
    fn default() -> Self {
        Self {
            settings: SessionSettings::default(),
            min_cols: 80,
            min_rows: 24,
            reentry_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// Inline message under the active screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Proctor<D: Dispatch, V: Environment, C: Clock> {
    session: TestSession,
    monitor: ViolationMonitor,
    dispatch: D,
    env: V,
    clock: C,
    min_cols: u16,
    min_rows: u16,
    start_form: StartForm,
    answer_form: AnswerForm,
    status: Option<Status>,
    loading: Option<String>,
    fullscreen: bool,
    alarms: Vec<(Duration, Alarm)>,
}

impl<D: Dispatch, V: Environment, C: Clock> Proctor<D, V, C> {
    pub fn new(options: ProctorOptions, dispatch: D, env: V, clock: C) -> Self {
        Self {
            session: TestSession::new(options.settings),
            monitor: ViolationMonitor::new(options.reentry_delay),
            dispatch,
            env,
            clock,
            min_cols: options.min_cols,
            min_rows: options.min_rows,
            start_form: StartForm::default(),
            answer_form: AnswerForm::default(),
            status: None,
            loading: None,
            fullscreen: false,
            alarms: Vec::new(),
        }
    }

    pub fn session(&self) -> &TestSession {
        &self.session
    }

    pub fn start_form(&self) -> &StartForm {
        &self.start_form
    }

    pub fn answer_form(&self) -> &AnswerForm {
        &self.answer_form
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn loading(&self) -> Option<&str> {
        self.loading.as_deref()
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn env(&self) -> &V {
        &self.env
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn remaining(&self) -> Duration {
        self.session.remaining(self.clock.now())
    }

    /// Timers requested since the last call, as (delay, alarm) pairs.
    pub fn drain_alarms(&mut self) -> Vec<(Duration, Alarm)> {
        std::mem::take(&mut self.alarms)
    }

    pub fn handle(&mut self, event: ProctorEvent) -> Flow {
        match event {
            ProctorEvent::Key(key) if key.kind != KeyEventKind::Release => return self.on_key(key),
            ProctorEvent::Key(_) => {}
            ProctorEvent::Mouse(mouse) => self.on_mouse(mouse),
            ProctorEvent::Resize(cols, rows) => self.on_resize(cols, rows),
            ProctorEvent::FocusLost => self.signal(EnvSignal::Blur),
            ProctorEvent::FocusGained => self.signal(EnvSignal::Focus),
            ProctorEvent::Tick => self.on_timer(false),
            ProctorEvent::Alarm(Alarm::Deadline) => self.on_timer(true),
            ProctorEvent::Alarm(Alarm::FullscreenReentry) => self.attempt_reentry(),
            ProctorEvent::Reply(reply) => self.on_reply(reply),
        }
        Flow::Continue
    }

    /// Feeds an environment signal to the violation monitor and carries out
    /// whatever it asks for.
    pub fn signal(&mut self, signal: EnvSignal) {
        self.observe(&signal);
    }

    fn observe(&mut self, signal: &EnvSignal) -> MonitorResponse {
        if let EnvSignal::FullscreenChanged { active } = signal {
            self.fullscreen = *active;
        }
        let resp = self.monitor.observe(&mut self.session, signal, self.clock.now());
        if resp.clear_clipboard {
            self.env.clear_clipboard();
        }
        if resp.schedule_reentry {
            self.alarms
                .push((self.monitor.reentry_delay(), Alarm::FullscreenReentry));
        }
        resp
    }

    fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = Some(Status {
            kind,
            text: text.into(),
        });
    }

    fn report(&mut self, err: SessionError) {
        debug!(error = %err, retryable = err.is_retryable(), "reporting");
        self.loading = None;
        self.set_status(StatusKind::Error, err.to_string());
    }

    fn on_key(&mut self, key: KeyEvent) -> Flow {
        let quit = key.code == KeyCode::Esc
            || (key.modifiers.contains(KeyModifiers::CONTROL)
                && matches!(key.code, KeyCode::Char('c' | 'q')));

        match self.session.state() {
            SessionState::Idle => {
                if quit {
                    return Flow::Quit;
                }
                self.on_start_form_key(key);
            }
            SessionState::AwaitingDay => {
                if quit {
                    return Flow::Quit;
                }
            }
            SessionState::Loaded => match key.code {
                _ if quit => return Flow::Quit,
                KeyCode::Enter => self.confirm_start(),
                _ => {}
            },
            SessionState::Active => {
                if self.observe(&EnvSignal::Key(key)).prevent_default {
                    return Flow::Continue;
                }
                if self.session.warning().is_some() {
                    if key.code == KeyCode::Enter {
                        self.return_to_fullscreen();
                    }
                    return Flow::Continue;
                }
                self.on_answer_key(key);
            }
            SessionState::Submitting | SessionState::Completed => {}
            SessionState::Locked => {
                if quit || key.code == KeyCode::Char('q') {
                    return Flow::Quit;
                }
            }
        }
        Flow::Continue
    }

    fn on_mouse(&mut self, mouse: MouseEvent) {
        if mouse.kind == MouseEventKind::Down(MouseButton::Right) {
            self.signal(EnvSignal::ContextMenu);
        }
    }

    fn on_resize(&mut self, cols: u16, rows: u16) {
        if self.session.state() != SessionState::Active {
            return;
        }
        let fits = cols >= self.min_cols && rows >= self.min_rows;
        if self.fullscreen && !fits {
            info!(cols, rows, "terminal shrank below the locked size");
            self.signal(EnvSignal::FullscreenChanged { active: false });
        } else if !self.fullscreen && fits {
            self.attempt_reentry();
        }
    }

    fn edit(field: &mut TextField, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                field.insert(c)
            }
            KeyCode::Backspace => field.backspace(),
            KeyCode::Delete => field.delete(),
            KeyCode::Left => field.left(),
            KeyCode::Right => field.right(),
            KeyCode::Home => field.home(),
            KeyCode::End => field.end(),
            _ => return false,
        }
        true
    }

    fn on_start_form_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Tab | KeyCode::Down => self.start_form.focus = self.start_form.focus.next(),
            KeyCode::BackTab | KeyCode::Up => self.start_form.focus = self.start_form.focus.prev(),
            KeyCode::Enter => match self.start_form.focus {
                StartField::Name => self.start_form.focus = StartField::Email,
                StartField::Email | StartField::Start => self.request_start(),
            },
            _ => {
                if let Some(field) = self.start_form.focused_field() {
                    Self::edit(field, key);
                }
            }
        }
    }

    fn move_answer_focus(&mut self, to: AnswerSlot) {
        self.answer_form.focus = to;
        if let Some(id) = to.question() {
            self.session.focus_answer(id, self.clock.now());
        }
    }

    fn on_answer_key(&mut self, key: KeyEvent) {
        let focus = self.answer_form.focus;
        match key.code {
            KeyCode::Tab | KeyCode::Down => self.move_answer_focus(focus.next()),
            KeyCode::BackTab | KeyCode::Up => self.move_answer_focus(focus.prev()),
            KeyCode::Enter => match focus {
                AnswerSlot::Submit => self.submit(false),
                AnswerSlot::Answer(_) => self.move_answer_focus(focus.next()),
            },
            _ => {
                if let AnswerSlot::Answer(id) = focus {
                    self.type_answer(id, key);
                }
            }
        }
    }

    fn type_answer(&mut self, id: QuestionId, key: KeyEvent) {
        let field = self.answer_form.field_mut(id);
        if Self::edit(field, key) {
            let stored = self.session.set_answer(id, field.value());
            if stored != field.value() {
                // keep the caret after the same digits it followed before
                let cursor = normalize_numeric_answer(field.before_cursor()).chars().count();
                field.set_with_cursor(stored, cursor);
            }
        }
    }

    fn request_start(&mut self) {
        let name = self.start_form.name.value().to_string();
        let email = self.start_form.email.value().to_string();
        match self.session.request_start(&name, &email) {
            Ok(()) => {
                self.status = None;
                self.loading = Some("Determining current day...".into());
                self.dispatch.dispatch(Request::Schedule);
            }
            Err(err) => self.report(err),
        }
    }

    fn confirm_start(&mut self) {
        if let Err(err) = self.env.request_fullscreen() {
            warn!(error = %err, "fullscreen denied");
            self.report(SessionError::FullscreenRequired(err.to_string()));
            return;
        }
        self.fullscreen = true;
        match self.session.activate(self.clock.now()) {
            Ok(()) => {
                self.status = None;
                self.answer_form = AnswerForm::default();
                self.alarms
                    .push((self.session.remaining(self.clock.now()), Alarm::Deadline));
                info!(
                    day = self.session.current_day(),
                    email = self.session.student_email(),
                    "test started"
                );
            }
            Err(err) => self.report(err),
        }
    }

    fn attempt_reentry(&mut self) {
        if self.session.state() != SessionState::Active || self.fullscreen {
            return;
        }
        match self.env.request_fullscreen() {
            Ok(()) => self.signal(EnvSignal::FullscreenChanged { active: true }),
            Err(err) => debug!(error = %err, "fullscreen re-entry failed"),
        }
    }

    /// The acknowledgement on the warning overlay.
    fn return_to_fullscreen(&mut self) {
        if self.fullscreen {
            self.session.clear_warning();
        } else {
            self.attempt_reentry();
        }
    }

    fn on_timer(&mut self, deadline: bool) {
        if let Some(submission) = self.session.on_timer(self.clock.now()) {
            if deadline {
                self.set_status(
                    StatusKind::Info,
                    "Time is up! Your answers are being submitted automatically.",
                );
            }
            self.send_submission(submission, true);
        }
    }

    fn submit(&mut self, forced: bool) {
        match self.session.begin_submit(self.clock.now(), forced) {
            Ok(Some(submission)) => self.send_submission(submission, forced),
            Ok(None) => {}
            Err(err) => self.report(err),
        }
    }

    fn send_submission(&mut self, submission: Submission, forced: bool) {
        self.loading = Some(if forced {
            "Auto-submitting test...".into()
        } else {
            "Submitting your answers...".into()
        });
        info!(
            day = submission.day,
            exit_count = submission.exit_count,
            forced,
            "submitting"
        );
        self.dispatch.dispatch(Request::Submit(Box::new(submission)));
    }

    fn on_reply(&mut self, reply: Reply) {
        let now = self.clock.now();
        match reply {
            Reply::Schedule(Ok(schedule)) => match self.session.apply_schedule(&schedule, now) {
                Ok(Some(day)) => {
                    self.loading = Some(format!("Loading Day {day} questions..."));
                    self.dispatch.dispatch(Request::CheckSubmission {
                        email: self.session.student_email().to_string(),
                        day,
                    });
                }
                Ok(None) => {}
                Err(err) => self.report(err),
            },
            Reply::SubmissionCheck(Ok(exists)) => {
                if let Err(err) = self.session.apply_submission_check(exists) {
                    self.report(err);
                } else if let (SessionState::AwaitingDay, Some(day)) =
                    (self.session.state(), self.session.current_day())
                {
                    self.dispatch.dispatch(Request::Questions { day });
                }
            }
            Reply::Questions(Ok(payload)) => {
                self.session.load_questions(payload.into());
                if self.session.state() == SessionState::Loaded {
                    self.loading = None;
                    self.set_status(
                        StatusKind::Success,
                        "Questions loaded! Press Enter to begin the test in fullscreen mode.",
                    );
                }
            }
            Reply::Schedule(Err(err))
            | Reply::SubmissionCheck(Err(err))
            | Reply::Questions(Err(err)) => {
                if self.session.state() == SessionState::AwaitingDay {
                    let err = self.session.abort_loading(err.into());
                    self.report(err);
                }
            }
            Reply::Submitted(result) => {
                match self.session.complete_submission(result.map_err(Into::into)) {
                    Ok(()) if self.session.state() == SessionState::Completed => {
                        self.loading = None;
                        self.env.exit_fullscreen();
                        self.fullscreen = false;
                        self.session.release();
                        self.set_status(StatusKind::Success, "Test submitted successfully!");
                        info!("submission confirmed");
                    }
                    Ok(()) => {}
                    Err(err) => self.report(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::environment::ScriptedEnvironment;
    use crate::gateway::{GatewayError, QuestionsPayload};
    use crate::monitor::ViolationKind;
    use crate::schedule::Schedule;
    use chrono::TimeZone;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<Request>>,
    }

    impl Dispatch for &Recorder {
        fn dispatch(&self, request: Request) {
            self.sent.borrow_mut().push(request);
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(chrono::Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap())
    }

    fn key(code: KeyCode) -> ProctorEvent {
        ProctorEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_str<D: Dispatch, V: Environment, C: Clock>(p: &mut Proctor<D, V, C>, s: &str) {
        for c in s.chars() {
            p.handle(key(KeyCode::Char(c)));
        }
    }

    fn schedule() -> Schedule {
        let mut s = Schedule::default();
        s.set(1, Some("2024-01-01T00:00:00Z".into()));
        s
    }

    fn questions() -> QuestionsPayload {
        QuestionsPayload {
            q1_text: "6 x 7".into(),
            q1_answer: "42".into(),
            q2_text: "2 - 5".into(),
            q2_answer: "-3".into(),
            q3_text: "Why?".into(),
            q3_answer: String::new(),
        }
    }

    fn loaded<'a>(
        rec: &'a Recorder,
        env: ScriptedEnvironment,
    ) -> Proctor<&'a Recorder, ScriptedEnvironment, ManualClock> {
        let mut p = Proctor::new(ProctorOptions::default(), rec, env, clock());
        type_str(&mut p, "Ada");
        p.handle(key(KeyCode::Tab));
        type_str(&mut p, "ada@example.com");
        p.handle(key(KeyCode::Enter));
        p.handle(ProctorEvent::Reply(Reply::Schedule(Ok(schedule()))));
        p.handle(ProctorEvent::Reply(Reply::SubmissionCheck(Ok(false))));
        p.handle(ProctorEvent::Reply(Reply::Questions(Ok(questions()))));
        p
    }

    #[test]
    fn bad_email_never_reaches_the_backend() {
        let rec = Recorder::default();
        let mut p = Proctor::new(ProctorOptions::default(), &rec, ScriptedEnvironment::granting(), clock());
        type_str(&mut p, "Ada");
        p.handle(key(KeyCode::Tab));
        type_str(&mut p, "bad-email");
        p.handle(key(KeyCode::Enter));
        assert!(rec.sent.borrow().is_empty());
        assert_eq!(p.session().state(), SessionState::Idle);
        assert_eq!(p.status().map(|s| s.text.as_str()), Some("Invalid email format"));
    }

    #[test]
    fn start_flow_issues_requests_in_order() {
        let rec = Recorder::default();
        let p = loaded(&rec, ScriptedEnvironment::granting());
        assert_eq!(
            *rec.sent.borrow(),
            vec![
                Request::Schedule,
                Request::CheckSubmission {
                    email: "ada@example.com".into(),
                    day: 1
                },
                Request::Questions { day: 1 },
            ]
        );
        assert_eq!(p.session().state(), SessionState::Loaded);
        assert_eq!(p.status().map(|s| s.kind), Some(StatusKind::Success));
        assert!(p.loading().is_none());
    }

    #[test]
    fn fetch_failure_returns_to_form() {
        let rec = Recorder::default();
        let mut p = Proctor::new(ProctorOptions::default(), &rec, ScriptedEnvironment::granting(), clock());
        type_str(&mut p, "Ada");
        p.handle(key(KeyCode::Tab));
        type_str(&mut p, "ada@example.com");
        p.handle(key(KeyCode::Enter));
        p.handle(ProctorEvent::Reply(Reply::Schedule(Err(GatewayError::Timeout))));
        assert_eq!(p.session().state(), SessionState::Idle);
        assert_eq!(
            p.status().map(|s| s.text.clone()),
            Some("Error connecting to server: request timed out".into())
        );
        assert_eq!(p.start_form().email.value(), "ada@example.com");
    }

    #[test]
    fn fullscreen_denial_keeps_loaded_without_violation() {
        let rec = Recorder::default();
        let mut p = loaded(&rec, ScriptedEnvironment::with_grants([false]));
        p.handle(key(KeyCode::Enter));
        assert_eq!(p.session().state(), SessionState::Loaded);
        assert!(p.session().violations().is_empty());
        assert_eq!(p.status().map(|s| s.kind), Some(StatusKind::Error));
        assert!(p.drain_alarms().is_empty());

        p.handle(key(KeyCode::Enter));
        assert_eq!(p.session().state(), SessionState::Active);
        assert_eq!(
            p.drain_alarms(),
            vec![(Duration::from_secs(7200), Alarm::Deadline)]
        );
    }

    #[test]
    fn numeric_answers_are_normalized_while_typing() {
        let rec = Recorder::default();
        let mut p = loaded(&rec, ScriptedEnvironment::granting());
        p.handle(key(KeyCode::Enter));
        type_str(&mut p, "4a2");
        assert_eq!(p.answer_form().field(QuestionId::Q1).value(), "42");
        assert_eq!(p.session().answers().get(QuestionId::Q1), "42");
    }

    #[test]
    fn dropped_characters_do_not_shift_the_caret() {
        let rec = Recorder::default();
        let mut p = loaded(&rec, ScriptedEnvironment::granting());
        p.handle(key(KeyCode::Enter));
        type_str(&mut p, "42");
        p.handle(key(KeyCode::Left));
        type_str(&mut p, "x7");
        let field = p.answer_form().field(QuestionId::Q1);
        assert_eq!((field.value(), field.cursor()), ("472", 2));
        assert_eq!(p.session().answers().get(QuestionId::Q1), "472");

        p.handle(key(KeyCode::Home));
        type_str(&mut p, "-");
        let field = p.answer_form().field(QuestionId::Q1);
        assert_eq!((field.value(), field.cursor()), ("-472", 1));
    }

    #[test]
    fn shrinking_the_terminal_records_exit_and_schedules_reentry() {
        let rec = Recorder::default();
        let mut p = loaded(&rec, ScriptedEnvironment::granting());
        p.handle(key(KeyCode::Enter));
        p.drain_alarms();

        p.handle(ProctorEvent::Resize(60, 20));
        assert_eq!(p.session().warning(), Some(ViolationKind::ExitedFullscreen));
        assert_eq!(
            p.drain_alarms(),
            vec![(Duration::from_millis(100), Alarm::FullscreenReentry)]
        );

        p.handle(ProctorEvent::Alarm(Alarm::FullscreenReentry));
        assert!(p.is_fullscreen());
        assert_eq!(p.session().warning(), None);
        assert_eq!(p.session().violations().count(), 1);
    }

    #[test]
    fn warning_overlay_swallows_typing_until_acknowledged() {
        let rec = Recorder::default();
        let mut p = loaded(&rec, ScriptedEnvironment::granting());
        p.handle(key(KeyCode::Enter));
        p.handle(ProctorEvent::FocusLost);
        type_str(&mut p, "7");
        assert_eq!(p.session().answers().get(QuestionId::Q1), "");
        p.handle(key(KeyCode::Enter));
        assert_eq!(p.session().warning(), None);
        type_str(&mut p, "7");
        assert_eq!(p.session().answers().get(QuestionId::Q1), "7");
    }

    #[test]
    fn completed_test_sends_one_payload() {
        let rec = Recorder::default();
        let mut p = loaded(&rec, ScriptedEnvironment::granting());
        p.handle(key(KeyCode::Enter));
        type_str(&mut p, "42");
        p.handle(key(KeyCode::Tab));
        type_str(&mut p, "-3");
        p.handle(key(KeyCode::Tab));
        type_str(&mut p, "because");
        p.handle(key(KeyCode::Tab));
        p.handle(key(KeyCode::Enter));
        assert_eq!(p.session().state(), SessionState::Submitting);
        p.handle(key(KeyCode::Enter));
        p.handle(ProctorEvent::Alarm(Alarm::Deadline));

        p.handle(ProctorEvent::Reply(Reply::Submitted(Ok(()))));
        assert_eq!(p.session().state(), SessionState::Locked);
        assert_eq!(p.env().exits, 1);

        p.handle(ProctorEvent::Tick);
        let submits = rec
            .sent
            .borrow()
            .iter()
            .filter(|r| matches!(r, Request::Submit(_)))
            .count();
        assert_eq!(submits, 1);
        assert_eq!(p.handle(key(KeyCode::Char('q'))), Flow::Quit);
    }

    #[test]
    fn ctrl_c_during_test_is_a_violation_not_a_quit() {
        let rec = Recorder::default();
        let mut p = loaded(&rec, ScriptedEnvironment::granting());
        p.handle(key(KeyCode::Enter));
        let flow = p.handle(ProctorEvent::Key(KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL,
        )));
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            p.session().violations().entries()[0].kind,
            ViolationKind::AttemptedClose
        );
    }
}
