//! Key combinations suppressed while a test is running.
//!
//! This is a deterrent, not a lock: anything the terminal or window
//! manager handles before the key reaches us cannot be stopped here.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy)]
enum Key {
    Tab,
    Backtick,
    Digit,
    F12,
    Esc,
    Left,
    Right,
    Letter(char),
}

/// Modifiers a rule requires; modifiers not listed are ignored.
#[derive(Debug, Clone, Copy)]
struct Rule {
    ctrl: bool,
    shift: bool,
    alt: bool,
    meta: bool,
    key: Key,
}

const fn rule(ctrl: bool, shift: bool, alt: bool, meta: bool, key: Key) -> Rule {
    Rule {
        ctrl,
        shift,
        alt,
        meta,
        key,
    }
}

const BLOCKED: &[Rule] = &[
    // switching tabs and windows
    rule(true, false, false, false, Key::Tab),
    rule(true, true, false, false, Key::Tab),
    rule(false, false, true, false, Key::Tab),
    rule(false, false, false, true, Key::Tab),
    rule(false, false, false, true, Key::Backtick),
    rule(true, false, false, false, Key::Digit),
    rule(false, false, false, true, Key::Digit),
    // developer tools and view-source
    rule(false, false, false, false, Key::F12),
    rule(true, true, false, false, Key::Letter('i')),
    rule(true, true, false, false, Key::Letter('j')),
    rule(true, true, false, false, Key::Letter('c')),
    rule(true, false, false, false, Key::Letter('u')),
    rule(false, false, true, true, Key::Letter('i')),
    rule(false, false, true, true, Key::Letter('j')),
    // save and print
    rule(true, false, false, false, Key::Letter('s')),
    rule(true, false, false, false, Key::Letter('p')),
    // history navigation
    rule(false, false, true, false, Key::Left),
    rule(false, false, true, false, Key::Right),
    // closing the tab
    rule(true, false, false, false, Key::Letter('w')),
    rule(false, false, false, true, Key::Letter('w')),
    rule(false, false, false, false, Key::Esc),
];

fn key_matches(key: Key, code: KeyCode) -> bool {
    match (key, code) {
        (Key::Tab, KeyCode::Tab | KeyCode::BackTab) => true,
        (Key::Backtick, KeyCode::Char(c)) => c == '`' || c == '~',
        (Key::Digit, KeyCode::Char(c)) => ('1'..='9').contains(&c),
        (Key::F12, KeyCode::F(12)) => true,
        (Key::Esc, KeyCode::Esc) => true,
        (Key::Left, KeyCode::Left) => true,
        (Key::Right, KeyCode::Right) => true,
        (Key::Letter(l), KeyCode::Char(c)) => c.eq_ignore_ascii_case(&l),
        _ => false,
    }
}

impl Rule {
    fn matches(&self, event: &KeyEvent) -> bool {
        let m = event.modifiers;
        let meta = m.intersects(KeyModifiers::SUPER | KeyModifiers::META);
        (!self.ctrl || m.contains(KeyModifiers::CONTROL))
            && (!self.shift || m.contains(KeyModifiers::SHIFT))
            && (!self.alt || m.contains(KeyModifiers::ALT))
            && (!self.meta || meta)
            && key_matches(self.key, event.code)
    }
}

/// True when the combination is on the block list.
pub fn is_blocked(event: &KeyEvent) -> bool {
    BLOCKED.iter().any(|r| r.matches(event))
}

/// Ctrl+C, Ctrl+D and Ctrl+Q are how people leave a terminal program.
pub fn is_close_attempt(event: &KeyEvent) -> bool {
    event.modifiers.contains(KeyModifiers::CONTROL)
        && !event.modifiers.contains(KeyModifiers::SHIFT)
        && matches!(event.code, KeyCode::Char('c' | 'd' | 'q'))
}

pub fn is_print_screen(event: &KeyEvent) -> bool {
    event.code == KeyCode::PrintScreen
}
