use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Widget, Wrap},
};
use unicode_width::UnicodeWidthChar;

use crate::{
    clock::Clock,
    dispatch::Dispatch,
    environment::Environment,
    form::{AnswerSlot, StartField, TextField},
    grading::Verdict,
    proctor::{Proctor, StatusKind},
    session::{QuestionId, SessionState},
    util::{format_remaining, format_total, is_urgent},
};

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 1;
const MAX_COLUMN: u16 = 90;
const TITLE: &str = "Daily Problem of the Day";

fn bold() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn dim() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

/// Centered column the screens draw into.
fn column(area: Rect) -> Rect {
    let inner = area.inner(ratatui::layout::Margin {
        horizontal: HORIZONTAL_MARGIN.min(area.width / 4),
        vertical: VERTICAL_MARGIN.min(area.height / 4),
    });
    let width = inner.width.min(MAX_COLUMN);
    Rect {
        x: inner.x + (inner.width - width) / 2,
        width,
        ..inner
    }
}

/// Renders a text field so the cursor stays visible when the value is
/// wider than the box.
fn field_line(field: &TextField, focused: bool, width: u16) -> Line<'static> {
    let chars: Vec<char> = field.value().chars().collect();
    let cursor = field.cursor();
    let budget = width.saturating_sub(1) as usize;

    let mut start = 0;
    let mut used: usize = chars[..cursor].iter().map(|c| c.width().unwrap_or(0)).sum();
    while used > budget && start < cursor {
        used -= chars[start].width().unwrap_or(0);
        start += 1;
    }

    let text_style = if focused { bold() } else { Style::default() };
    let before: String = chars[start..cursor].iter().collect();
    let mut spans = vec![Span::styled(before, text_style)];
    if focused {
        let at = chars.get(cursor).map_or(" ".to_string(), |c| c.to_string());
        spans.push(Span::styled(at, text_style.add_modifier(Modifier::REVERSED)));
        let after: String = chars.iter().skip(cursor + 1).collect();
        spans.push(Span::styled(after, text_style));
    } else {
        let after: String = chars[cursor..].iter().collect();
        spans.push(Span::styled(after, text_style));
    }
    Line::from(spans)
}

fn input_box(title: &str, focused: bool) -> Block<'_> {
    let border = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        dim()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(border)
        .title(Span::styled(title, bold()))
}

fn button(label: &str, focused: bool) -> Paragraph<'_> {
    let style = if focused {
        bold().fg(Color::Black).bg(Color::Cyan)
    } else {
        bold().fg(Color::Cyan)
    };
    Paragraph::new(Span::styled(format!("[ {label} ]"), style)).alignment(Alignment::Center)
}

fn status_line<D: Dispatch, V: Environment, C: Clock>(p: &Proctor<D, V, C>) -> Paragraph<'static> {
    let line = if let Some(loading) = p.loading() {
        Line::from(Span::styled(
            loading.to_string(),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        ))
    } else if let Some(status) = p.status() {
        let color = match status.kind {
            StatusKind::Info => Color::Blue,
            StatusKind::Success => Color::Green,
            StatusKind::Error => Color::Red,
        };
        Line::from(Span::styled(status.text.clone(), bold().fg(color)))
    } else {
        Line::default()
    };
    Paragraph::new(line)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
}

impl<D: Dispatch, V: Environment, C: Clock> Widget for &Proctor<D, V, C> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let col = column(area);
        match self.session().state() {
            SessionState::Idle | SessionState::AwaitingDay => render_start(self, col, buf),
            SessionState::Loaded => render_confirm(self, col, buf),
            SessionState::Active | SessionState::Submitting => {
                render_test(self, col, buf);
                if let Some(kind) = self.session().warning() {
                    render_warning(kind.warning_text(), area, buf);
                }
            }
            SessionState::Completed | SessionState::Locked => render_results(self, col, buf),
        }
    }
}

fn render_start<D: Dispatch, V: Environment, C: Clock>(p: &Proctor<D, V, C>, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // title
            Constraint::Length(2), // intro
            Constraint::Length(3), // name
            Constraint::Length(3), // email
            Constraint::Length(2), // start button
            Constraint::Min(2),    // status
            Constraint::Length(1), // legend
        ])
        .split(area);

    Paragraph::new(Span::styled(TITLE, bold().fg(Color::Magenta)))
        .alignment(Alignment::Center)
        .render(chunks[0], buf);
    Paragraph::new("Enter your name and email to begin today's test.")
        .style(dim())
        .alignment(Alignment::Center)
        .render(chunks[1], buf);

    let form = p.start_form();
    let awaiting = p.session().state() == SessionState::AwaitingDay;
    for (field, title, slot, chunk) in [
        (&form.name, "Full Name", StartField::Name, chunks[2]),
        (&form.email, "Email", StartField::Email, chunks[3]),
    ] {
        let focused = !awaiting && form.focus == slot;
        let block = input_box(title, focused);
        let inner = block.inner(chunk);
        block.render(chunk, buf);
        Paragraph::new(field_line(field, focused, inner.width)).render(inner, buf);
    }

    button("Start Test", !awaiting && form.focus == StartField::Start).render(chunks[4], buf);
    status_line(p).render(chunks[5], buf);
    Paragraph::new(Span::styled(
        "(tab) next field / (enter) start / (esc)ape",
        Style::default().add_modifier(Modifier::ITALIC),
    ))
    .render(chunks[6], buf);
}

fn render_confirm<D: Dispatch, V: Environment, C: Clock>(p: &Proctor<D, V, C>, area: Rect, buf: &mut Buffer) {
    let day = p.session().current_day().unwrap_or_default();
    let minutes = p.remaining().as_secs() / 60;
    let lines = vec![
        Line::from(Span::styled(format!("Day {day} is ready"), bold().fg(Color::Magenta))),
        Line::default(),
        Line::from(format!("You will have {minutes} minutes to answer three questions.")),
        Line::from("The test runs locked to this terminal. Leaving it, shrinking the window,"),
        Line::from("switching away or pressing blocked shortcuts is recorded as a violation."),
        Line::default(),
        Line::from(Span::styled("Press Enter to begin", bold().fg(Color::Cyan))),
    ];

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(lines.len() as u16 + 2), Constraint::Min(2)])
        .split(area);

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(chunks[0], buf);
    status_line(p).render(chunks[1], buf);
}

fn question_label(id: QuestionId) -> &'static str {
    match id {
        QuestionId::Q1 => "Question 1",
        QuestionId::Q2 => "Question 2",
        QuestionId::Q3 => "Question 3",
    }
}

fn render_test<D: Dispatch, V: Environment, C: Clock>(p: &Proctor<D, V, C>, area: Rect, buf: &mut Buffer) {
    let session = p.session();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),      // header
            Constraint::Ratio(1, 3),    // q1
            Constraint::Ratio(1, 3),    // q2
            Constraint::Ratio(1, 3),    // q3
            Constraint::Length(1),      // submit
            Constraint::Length(2),      // status
        ])
        .split(area);

    let remaining = p.remaining();
    let timer_style = if is_urgent(remaining) {
        bold().fg(Color::Red)
    } else {
        bold()
    };
    let header = Line::from(vec![
        Span::styled(
            format!("Day {}", session.current_day().unwrap_or_default()),
            bold().fg(Color::Magenta),
        ),
        Span::raw("   "),
        Span::styled(format!("Time remaining {}", format_remaining(remaining)), timer_style),
        Span::raw("   "),
        Span::styled(
            format!("Violations {}", session.violations().count()),
            if session.violations().is_empty() {
                dim()
            } else {
                bold().fg(Color::Yellow)
            },
        ),
    ]);
    Paragraph::new(header)
        .alignment(Alignment::Center)
        .render(chunks[0], buf);

    let form = p.answer_form();
    for (id, chunk) in QuestionId::ALL.into_iter().zip(&chunks[1..4]) {
        let text = session
            .questions()
            .map(|q| q.get(id).text.clone())
            .unwrap_or_default();
        let hint = if id.is_numeric() {
            "numeric answer"
        } else {
            "written answer, graded manually"
        };
        let focused = form.focus == AnswerSlot::Answer(id);

        let parts = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(*chunk);
        Paragraph::new(vec![
            Line::from(Span::styled(question_label(id), bold())),
            Line::from(text),
        ])
        .wrap(Wrap { trim: false })
        .render(parts[0], buf);

        let block = input_box(hint, focused);
        let inner = block.inner(parts[1]);
        block.render(parts[1], buf);
        Paragraph::new(field_line(form.field(id), focused, inner.width)).render(inner, buf);
    }

    button("Submit Test", form.focus == AnswerSlot::Submit).render(chunks[4], buf);
    status_line(p).render(chunks[5], buf);
}

fn render_warning(headline: &str, area: Rect, buf: &mut Buffer) {
    let width = area.width.min(60);
    let height = area.height.min(7);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };
    Clear.render(popup, buf);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(bold().fg(Color::Red))
        .style(Style::default().bg(Color::Black));
    Paragraph::new(vec![
        Line::from(Span::styled(headline.to_string(), bold().fg(Color::Red))),
        Line::from("This has been recorded."),
        Line::default(),
        Line::from(Span::styled(
            "Press Enter to return to the test",
            Style::default().add_modifier(Modifier::ITALIC),
        )),
    ])
    .block(block)
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .render(popup, buf);
}

fn verdict_span(verdict: Verdict) -> Span<'static> {
    match verdict {
        Verdict::Correct => Span::styled("✓ Correct", bold().fg(Color::Green)),
        Verdict::Incorrect => Span::styled("✗ Incorrect", bold().fg(Color::Red)),
        Verdict::Manual => Span::styled("Will be graded manually", dim()),
    }
}

fn render_results<D: Dispatch, V: Environment, C: Clock>(p: &Proctor<D, V, C>, area: Rect, buf: &mut Buffer) {
    let session = p.session();
    let mut lines = vec![
        Line::from(Span::styled("Test Submitted Successfully!", bold().fg(Color::Green))),
        Line::from(Span::styled(
            "Thanks for submitting! Your score will be emailed to you soon.",
            dim(),
        )),
        Line::default(),
    ];
    for id in QuestionId::ALL {
        lines.push(Line::from(vec![
            Span::styled(format!("{}: ", question_label(id)), bold()),
            verdict_span(session.verdict(id)),
        ]));
        if id.is_numeric() {
            lines.push(Line::from(Span::styled(
                format!("  Your answer: {}", session.answers().get(id)),
                dim(),
            )));
        }
    }
    if let Some(sub) = session.last_submission() {
        lines.push(Line::default());
        lines.push(Line::from(vec![
            Span::styled("Total Time: ", bold()),
            Span::raw(format_total(sub.total_time)),
        ]));
    }
    let violations = session.violations().count();
    if violations > 0 {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            format!("Violations: {violations}"),
            bold().fg(Color::Yellow),
        )));
        lines.push(Line::from(Span::styled(
            "These have been recorded and may affect your score.",
            Style::default().fg(Color::Yellow),
        )));
    }
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "(q)uit",
        Style::default().add_modifier(Modifier::ITALIC),
    )));

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(area, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::{Reply, Request};
    use crate::environment::ScriptedEnvironment;
    use crate::gateway::QuestionsPayload;
    use crate::proctor::ProctorOptions;
    use crate::runtime::ProctorEvent;
    use crate::schedule::Schedule;
    use chrono::TimeZone;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    struct Nowhere;

    impl Dispatch for Nowhere {
        fn dispatch(&self, _request: Request) {}
    }

    type TestProctor = Proctor<Nowhere, ScriptedEnvironment, ManualClock>;

    fn proctor() -> TestProctor {
        let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        Proctor::new(ProctorOptions::default(), Nowhere, ScriptedEnvironment::granting(), clock)
    }

    fn press(p: &mut TestProctor, code: KeyCode) {
        p.handle(ProctorEvent::Key(KeyEvent::new(code, KeyModifiers::NONE)));
    }

    fn type_str(p: &mut TestProctor, s: &str) {
        s.chars().for_each(|c| press(p, KeyCode::Char(c)));
    }

    fn active() -> TestProctor {
        let mut p = proctor();
        type_str(&mut p, "Ada");
        press(&mut p, KeyCode::Tab);
        type_str(&mut p, "ada@example.com");
        press(&mut p, KeyCode::Enter);
        let mut schedule = Schedule::default();
        schedule.set(1, Some("2024-01-01T00:00:00Z".into()));
        p.handle(ProctorEvent::Reply(Reply::Schedule(Ok(schedule))));
        p.handle(ProctorEvent::Reply(Reply::SubmissionCheck(Ok(false))));
        p.handle(ProctorEvent::Reply(Reply::Questions(Ok(QuestionsPayload {
            q1_text: "What is six times seven?".into(),
            q1_answer: "42".into(),
            ..QuestionsPayload::default()
        }))));
        press(&mut p, KeyCode::Enter);
        p
    }

    fn rendered(p: &TestProctor, width: u16, height: u16) -> String {
        let area = Rect::new(0, 0, width, height);
        let mut buffer = Buffer::empty(area);
        p.render(area, &mut buffer);
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn start_screen_shows_form() {
        let mut p = proctor();
        type_str(&mut p, "Ada");
        let out = rendered(&p, 100, 30);
        assert!(out.contains(TITLE));
        assert!(out.contains("Full Name"));
        assert!(out.contains("Ada"));
        assert!(out.contains("Start Test"));
    }

    #[test]
    fn test_screen_shows_timer_and_questions() {
        let p = active();
        let out = rendered(&p, 100, 30);
        assert!(out.contains("Time remaining 2:00:00"));
        assert!(out.contains("What is six times seven?"));
        assert!(out.contains("Violations 0"));
    }

    #[test]
    fn warning_overlay_is_drawn_over_the_test() {
        let mut p = active();
        p.handle(ProctorEvent::FocusLost);
        let out = rendered(&p, 100, 30);
        assert!(out.contains("WARNING: YOU LEFT THE TEST PAGE!"));
        assert!(out.contains("Violations 1"));
    }

    #[test]
    fn results_screen_after_confirmation() {
        let mut p = active();
        p.handle(ProctorEvent::Alarm(crate::runtime::Alarm::Deadline));
        assert_eq!(p.session().state(), SessionState::Active);
        press(&mut p, KeyCode::Tab);
        press(&mut p, KeyCode::Tab);
        press(&mut p, KeyCode::Tab);
        press(&mut p, KeyCode::Enter);
        assert_eq!(p.session().state(), SessionState::Active);

        let mut p = active();
        type_str(&mut p, "42");
        for answer in ["1", "x"] {
            press(&mut p, KeyCode::Tab);
            type_str(&mut p, answer);
        }
        press(&mut p, KeyCode::Tab);
        press(&mut p, KeyCode::Enter);
        p.handle(ProctorEvent::Reply(Reply::Submitted(Ok(()))));
        let out = rendered(&p, 100, 30);
        assert!(out.contains("Test Submitted Successfully!"));
        assert!(out.contains("✓ Correct"));
        assert!(out.contains("Will be graded manually"));
    }

    #[test]
    fn small_area_does_not_panic() {
        let p = active();
        let area = Rect::new(0, 0, 20, 5);
        let mut buffer = Buffer::empty(area);
        (&p).render(area, &mut buffer);
        assert_eq!(*buffer.area(), area);
    }

    #[test]
    fn long_field_keeps_cursor_visible() {
        let mut field = TextField::default();
        "abcdefghij".chars().for_each(|c| field.insert(c));
        let line = field_line(&field, true, 5);
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "ghij ");
    }
}
