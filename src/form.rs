use crate::session::QuestionId;

/// Single-line text input with a character cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextField {
    value: String,
    cursor: usize,
}

impl TextField {
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Cursor position in characters.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn byte_at(&self, chars: usize) -> usize {
        self.value
            .char_indices()
            .nth(chars)
            .map_or(self.value.len(), |(i, _)| i)
    }

    fn len(&self) -> usize {
        self.value.chars().count()
    }

    pub fn insert(&mut self, c: char) {
        let at = self.byte_at(self.cursor);
        self.value.insert(at, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_at(self.cursor);
        self.value.remove(at);
    }

    pub fn delete(&mut self) {
        if self.cursor < self.len() {
            let at = self.byte_at(self.cursor);
            self.value.remove(at);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.len());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.len();
    }

    /// Text to the left of the cursor.
    pub fn before_cursor(&self) -> &str {
        &self.value[..self.byte_at(self.cursor)]
    }

    /// Replaces the contents and puts the cursor at `cursor`, clamped to the
    /// new length.
    pub fn set_with_cursor(&mut self, value: &str, cursor: usize) {
        self.value = value.to_string();
        self.cursor = cursor.min(self.len());
    }
}

/// Focus ring of the start form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartField {
    #[default]
    Name,
    Email,
    Start,
}

impl StartField {
    pub fn next(self) -> Self {
        match self {
            StartField::Name => StartField::Email,
            StartField::Email => StartField::Start,
            StartField::Start => StartField::Name,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            StartField::Name => StartField::Start,
            StartField::Email => StartField::Name,
            StartField::Start => StartField::Email,
        }
    }
}

/// Focus ring of the question screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSlot {
    Answer(QuestionId),
    Submit,
}

impl Default for AnswerSlot {
    fn default() -> Self {
        AnswerSlot::Answer(QuestionId::Q1)
    }
}

impl AnswerSlot {
    pub fn next(self) -> Self {
        match self {
            AnswerSlot::Answer(QuestionId::Q1) => AnswerSlot::Answer(QuestionId::Q2),
            AnswerSlot::Answer(QuestionId::Q2) => AnswerSlot::Answer(QuestionId::Q3),
            AnswerSlot::Answer(QuestionId::Q3) => AnswerSlot::Submit,
            AnswerSlot::Submit => AnswerSlot::Answer(QuestionId::Q1),
        }
    }

    pub fn prev(self) -> Self {
        match self {
            AnswerSlot::Answer(QuestionId::Q1) => AnswerSlot::Submit,
            AnswerSlot::Answer(QuestionId::Q2) => AnswerSlot::Answer(QuestionId::Q1),
            AnswerSlot::Answer(QuestionId::Q3) => AnswerSlot::Answer(QuestionId::Q2),
            AnswerSlot::Submit => AnswerSlot::Answer(QuestionId::Q3),
        }
    }

    pub fn question(self) -> Option<QuestionId> {
        match self {
            AnswerSlot::Answer(id) => Some(id),
            AnswerSlot::Submit => None,
        }
    }
}

/// Editable state of the start screen.
#[derive(Debug, Clone, Default)]
pub struct StartForm {
    pub name: TextField,
    pub email: TextField,
    pub focus: StartField,
}

impl StartForm {
    pub fn focused_field(&mut self) -> Option<&mut TextField> {
        match self.focus {
            StartField::Name => Some(&mut self.name),
            StartField::Email => Some(&mut self.email),
            StartField::Start => None,
        }
    }
}

/// Editable state of the question screen.
#[derive(Debug, Clone, Default)]
pub struct AnswerForm {
    fields: [TextField; 3],
    pub focus: AnswerSlot,
}

impl AnswerForm {
    pub fn field(&self, id: QuestionId) -> &TextField {
        &self.fields[id.index()]
    }

    pub fn field_mut(&mut self, id: QuestionId) -> &mut TextField {
        &mut self.fields[id.index()]
    }
}
