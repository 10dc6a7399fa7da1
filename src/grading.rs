/// Reduces a numeric answer to digits plus at most one leading minus sign.
///
/// Anything else (spaces, separators, units, interior dashes) is dropped, so
/// `"-12-3"` becomes `"-123"` and `"1-2"` becomes `"12"`.
pub fn normalize_numeric_answer(answer: &str) -> String {
    let mut out = String::with_capacity(answer.len());
    for c in answer.chars() {
        match c {
            '0'..='9' => out.push(c),
            '-' if out.is_empty() => out.push(c),
            _ => {}
        }
    }
    out
}

/// Exact comparison after normalizing both the submission and the reference.
pub fn grade(submitted: &str, reference: &str) -> bool {
    normalize_numeric_answer(submitted) == normalize_numeric_answer(reference)
}

/// Outcome of a question once a submission is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Incorrect,
    /// Free-text answers are left for a human to mark.
    Manual,
}

impl From<bool> for Verdict {
    fn from(correct: bool) -> Self {
        if correct {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        }
    }
}
