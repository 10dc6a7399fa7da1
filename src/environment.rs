use crossterm::{
    event::{
        DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture,
        KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    queue, terminal,
};
use std::collections::VecDeque;
use std::io::{self, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{0}")]
    Denied(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The pieces of the host the proctor needs to control.
pub trait Environment {
    /// Enter the locked-down presentation. Fails if the host refuses.
    fn request_fullscreen(&mut self) -> Result<(), EnvError>;
    fn exit_fullscreen(&mut self);
    fn clear_clipboard(&mut self);
}

/// Terminal flavour of fullscreen: the terminal has to be at least the
/// configured size, and while locked we listen for focus changes and
/// capture the mouse so right clicks reach us.
///
/// Terminals speaking the kitty keyboard protocol only report keys such as
/// Print Screen once enhancement flags are pushed, so those get pushed for
/// the locked period too.
#[derive(Debug, Clone)]
pub struct TerminalEnvironment {
    min_cols: u16,
    min_rows: u16,
    keyboard_enhancement: bool,
    locked: bool,
}

impl TerminalEnvironment {
    pub fn new(min_cols: u16, min_rows: u16) -> Self {
        Self {
            min_cols,
            min_rows,
            keyboard_enhancement: false,
            locked: false,
        }
    }

    /// Whether the terminal supports keyboard enhancement. Detect it before
    /// the event reader starts, since detection reads from the terminal.
    pub fn with_keyboard_enhancement(mut self, supported: bool) -> Self {
        self.keyboard_enhancement = supported;
        self
    }

    pub fn fits(&self, cols: u16, rows: u16) -> bool {
        cols >= self.min_cols && rows >= self.min_rows
    }

    fn lock(&self, out: &mut impl Write) -> io::Result<()> {
        queue!(out, EnableFocusChange, EnableMouseCapture)?;
        if self.keyboard_enhancement {
            queue!(
                out,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
            )?;
        }
        out.flush()
    }

    fn unlock(&self, out: &mut impl Write) -> io::Result<()> {
        if self.keyboard_enhancement {
            queue!(out, PopKeyboardEnhancementFlags)?;
        }
        queue!(out, DisableFocusChange, DisableMouseCapture)?;
        out.flush()
    }
}

impl Environment for TerminalEnvironment {
    fn request_fullscreen(&mut self) -> Result<(), EnvError> {
        let (cols, rows) = terminal::size()?;
        if !self.fits(cols, rows) {
            return Err(EnvError::Denied(format!(
                "enlarge the terminal to at least {}x{} (currently {}x{})",
                self.min_cols, self.min_rows, cols, rows
            )));
        }
        if !self.locked {
            self.lock(&mut io::stdout())?;
            self.locked = true;
        }
        Ok(())
    }

    fn exit_fullscreen(&mut self) {
        if self.locked {
            let _ = self.unlock(&mut io::stdout());
            self.locked = false;
        }
    }

    fn clear_clipboard(&mut self) {
        // OSC 52 with an empty payload empties the system clipboard on
        // terminals that support it.
        let mut out = io::stdout();
        let _ = out.write_all(b"\x1b]52;c;\x07");
        let _ = out.flush();
    }
}

impl Drop for TerminalEnvironment {
    fn drop(&mut self) {
        self.exit_fullscreen();
    }
}

/// Environment whose answers are decided up front, for headless runs.
#[derive(Debug, Default)]
pub struct ScriptedEnvironment {
    grants: VecDeque<bool>,
    pub fullscreen: bool,
    pub fullscreen_requests: usize,
    pub exits: usize,
    pub clipboard_clears: usize,
}

impl ScriptedEnvironment {
    /// Grants every fullscreen request.
    pub fn granting() -> Self {
        Self::default()
    }

    /// Answers upcoming fullscreen requests in order; once the script runs
    /// out every request is granted.
    pub fn with_grants(grants: impl IntoIterator<Item = bool>) -> Self {
        Self {
            grants: grants.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl Environment for ScriptedEnvironment {
    fn request_fullscreen(&mut self) -> Result<(), EnvError> {
        self.fullscreen_requests += 1;
        if self.grants.pop_front().unwrap_or(true) {
            self.fullscreen = true;
            Ok(())
        } else {
            Err(EnvError::Denied("permission denied".into()))
        }
    }

    fn exit_fullscreen(&mut self) {
        self.exits += 1;
        self.fullscreen = false;
    }

    fn clear_clipboard(&mut self) {
        self.clipboard_clears += 1;
    }
}
