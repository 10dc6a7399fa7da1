use chrono::{DateTime, Utc};
use crossterm::event::KeyEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::key_policy;
use crate::session::{SessionState, TestSession};

/// Things a student can do that get written into the violation log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViolationKind {
    ExitedFullscreen,
    TabHidden,
    WindowBlur,
    KeyboardShortcutBlocked,
    ScreenshotAttempt,
    RightClick,
    AttemptedClose,
}

impl ViolationKind {
    /// Headline for the warning overlay.
    pub fn warning_text(&self) -> &'static str {
        match self {
            ViolationKind::ExitedFullscreen => "WARNING: YOU EXITED FULLSCREEN MODE!",
            ViolationKind::TabHidden => "WARNING: YOU SWITCHED TABS!",
            _ => "WARNING: YOU LEFT THE TEST PAGE!",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ViolationKind,
}

/// Append-only record of violations, in the order they happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationLog {
    entries: Vec<Violation>,
    count: usize,
}

impl ViolationLog {
    pub fn push(&mut self, kind: ViolationKind, time: DateTime<Utc>) {
        self.entries.push(Violation { time, kind });
        self.count += 1;
        debug_assert_eq!(self.count, self.entries.len());
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entries(&self) -> &[Violation] {
        &self.entries
    }

    /// Transport form stored in the submission's `exitLogs` cell.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Environment events the monitor understands, independent of where they
/// come from (terminal, browser shell, test harness).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSignal {
    FullscreenChanged { active: bool },
    VisibilityChanged { hidden: bool },
    Blur,
    Focus,
    Key(KeyEvent),
    ContextMenu,
    CloseRequested,
}

/// What the caller should do after a signal was observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorResponse {
    pub recorded: Option<ViolationKind>,
    /// Swallow the input instead of acting on it.
    pub prevent_default: bool,
    /// Try to get back into fullscreen after `ViolationMonitor::reentry_delay`.
    pub schedule_reentry: bool,
    pub clear_clipboard: bool,
    /// The condition behind the warning went away.
    pub resolved: bool,
}

#[derive(Debug, Clone)]
pub struct ViolationMonitor {
    reentry_delay: Duration,
}

impl Default for ViolationMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl ViolationMonitor {
    pub fn new(reentry_delay: Duration) -> Self {
        Self { reentry_delay }
    }

    pub fn reentry_delay(&self) -> Duration {
        self.reentry_delay
    }

    /// Reacts to one signal. Outside of an active test nothing is recorded
    /// or prevented.
    pub fn observe(
        &self,
        session: &mut TestSession,
        signal: &EnvSignal,
        now: DateTime<Utc>,
    ) -> MonitorResponse {
        if session.state() != SessionState::Active {
            return MonitorResponse::default();
        }

        let mut resp = MonitorResponse::default();
        match signal {
            EnvSignal::FullscreenChanged { active: false } => {
                resp.recorded = Some(ViolationKind::ExitedFullscreen);
                resp.schedule_reentry = true;
            }
            EnvSignal::FullscreenChanged { active: true }
            | EnvSignal::VisibilityChanged { hidden: false }
            | EnvSignal::Focus => {
                resp.resolved = true;
            }
            EnvSignal::VisibilityChanged { hidden: true } => {
                resp.recorded = Some(ViolationKind::TabHidden);
            }
            EnvSignal::Blur => {
                resp.recorded = Some(ViolationKind::WindowBlur);
            }
            EnvSignal::Key(key) => {
                if key_policy::is_blocked(key) {
                    resp.recorded = Some(ViolationKind::KeyboardShortcutBlocked);
                } else if key_policy::is_close_attempt(key) {
                    resp.recorded = Some(ViolationKind::AttemptedClose);
                } else if key_policy::is_print_screen(key) {
                    resp.recorded = Some(ViolationKind::ScreenshotAttempt);
                    resp.clear_clipboard = true;
                }
                resp.prevent_default = resp.recorded.is_some();
            }
            EnvSignal::ContextMenu => {
                resp.recorded = Some(ViolationKind::RightClick);
                resp.prevent_default = true;
            }
            EnvSignal::CloseRequested => {
                resp.recorded = Some(ViolationKind::AttemptedClose);
                resp.prevent_default = true;
            }
        }

        if let Some(kind) = resp.recorded {
            session.record_violation(kind, now);
            warn!(violation = %kind, total = session.violations().count(), "violation recorded");
        }
        if resp.resolved && session.warning().is_some() {
            session.clear_warning();
            info!("warning cleared");
        }
        resp
    }
}
