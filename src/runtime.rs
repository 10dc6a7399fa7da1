use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyEvent, MouseEvent};

use crate::dispatch::Reply;

/// One-shot timers the proctor can arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alarm {
    /// Backstop for the periodic tick at the end of the test.
    Deadline,
    /// Retry fullscreen shortly after the student left it.
    FullscreenReentry,
}

/// Unified event type consumed by the proctor loop
#[derive(Clone, Debug)]
pub enum ProctorEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(u16, u16),
    FocusGained,
    FocusLost,
    Tick,
    Alarm(Alarm),
    Reply(Reply),
}

/// Source of terminal events (keyboard, mouse, focus, resize) and replies
pub trait ProctorEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<ProctorEvent, RecvTimeoutError>;
}

/// Production event source using crossterm
pub struct CrosstermEventSource {
    tx: Sender<ProctorEvent>,
    rx: Receiver<ProctorEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let reader = tx.clone();

        std::thread::spawn(move || loop {
            let evt = match event::read() {
                Ok(CtEvent::Key(key)) => ProctorEvent::Key(key),
                Ok(CtEvent::Mouse(mouse)) => ProctorEvent::Mouse(mouse),
                Ok(CtEvent::Resize(cols, rows)) => ProctorEvent::Resize(cols, rows),
                Ok(CtEvent::FocusGained) => ProctorEvent::FocusGained,
                Ok(CtEvent::FocusLost) => ProctorEvent::FocusLost,
                Ok(_) => continue,
                Err(_) => break,
            };
            if reader.send(evt).is_err() {
                break;
            }
        });

        Self { tx, rx }
    }

    /// Handle for background work that needs to post events into the loop.
    pub fn sender(&self) -> Sender<ProctorEvent> {
        self.tx.clone()
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProctorEventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<ProctorEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Test event source for unit tests
pub struct TestEventSource {
    rx: Receiver<ProctorEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<ProctorEvent>) -> Self {
        Self { rx }
    }
}

impl ProctorEventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<ProctorEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Runner that advances the application one event/tick/alarm at a time
pub struct Runner<E: ProctorEventSource, T: Ticker> {
    event_source: E,
    ticker: T,
    next_tick: Instant,
    alarms: Vec<(Instant, Alarm)>,
}

impl<E: ProctorEventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        let next_tick = Instant::now() + ticker.interval();
        Self {
            event_source,
            ticker,
            next_tick,
            alarms: Vec::new(),
        }
    }

    /// Schedules `alarm` to be returned by `step` once `after` has passed.
    pub fn arm(&mut self, after: Duration, alarm: Alarm) {
        self.alarms.push((Instant::now() + after, alarm));
    }

    pub fn pending_alarms(&self) -> usize {
        self.alarms.len()
    }

    fn take_due_alarm(&mut self, now: Instant) -> Option<Alarm> {
        let (idx, _) = self
            .alarms
            .iter()
            .enumerate()
            .filter(|(_, (due, _))| *due <= now)
            .min_by_key(|(_, (due, _))| *due)?;
        Some(self.alarms.remove(idx).1)
    }

    fn next_wakeup(&self) -> Instant {
        self.alarms
            .iter()
            .map(|(due, _)| *due)
            .fold(self.next_tick, Instant::min)
    }

    /// Blocks until the next event, due alarm or tick and returns it
    pub fn step(&mut self) -> ProctorEvent {
        loop {
            let now = Instant::now();
            if let Some(alarm) = self.take_due_alarm(now) {
                return ProctorEvent::Alarm(alarm);
            }
            if now >= self.next_tick {
                self.next_tick = now + self.ticker.interval();
                return ProctorEvent::Tick;
            }
            let wait = self.next_wakeup().saturating_duration_since(now);
            match self.event_source.recv_timeout(wait) {
                Ok(ev) => return ev,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(wait),
            }
        }
    }
}
