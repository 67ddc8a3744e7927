//! The dialogue transcript.
//!
//! Turns are append-only except the in-progress assistant turn, which grows as
//! fragments arrive. A turn's `prefix` is the speaker label written before the
//! text ("Human: ", "AI:"); generated text never includes it.

/// Prompt shown when starting a few-shot dialogue.
pub const FEW_SHOT_EXAMPLE: &str = "Human: A cat sat on a mat.\n\n\
AI: Un gato se sentó en una estera.\n\n\
Human: A brown fox jumps over the lazy dog.\n\n\
AI: Un zorro marrón salta sobre el perro perezoso.\n\n\
Human: Who is the president of the United States?";

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Human,
    Assistant,
}

/// How turns are labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogueMode {
    /// "Human: " / "AI:" speaker labels.
    #[default]
    Chatbot,
    /// No labels; the user writes the whole prompt, examples included.
    FewShot,
}

impl DialogueMode {
    pub fn human_prefix(&self) -> &'static str {
        match self {
            DialogueMode::Chatbot => "Human: ",
            DialogueMode::FewShot => "",
        }
    }

    pub fn assistant_prefix(&self) -> &'static str {
        match self {
            DialogueMode::Chatbot => "AI:",
            DialogueMode::FewShot => "",
        }
    }
}

/// One message block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub prefix: String,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, prefix: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role,
            prefix: prefix.into(),
            text: text.into(),
        }
    }

    /// Prefix followed by text, as sent to the model.
    pub fn rendered(&self) -> String {
        format!("{}{}", self.prefix, self.text)
    }
}

/// Remove every occurrence of each sequence from `text`, in order.
pub fn strip_stop_sequences<'a>(text: &str, sequences: impl IntoIterator<Item = &'a str>) -> String {
    sequences
        .into_iter()
        .filter(|seq| !seq.is_empty())
        .fold(text.to_string(), |acc, seq| acc.replace(seq, ""))
}

/// Ordered list of turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_human(&mut self, prefix: &str, text: &str) {
        self.push(Turn::new(Role::Human, prefix, text));
    }

    pub fn begin_assistant(&mut self, prefix: &str) {
        self.push(Turn::new(Role::Assistant, prefix, ""));
    }

    /// Append a generated fragment to the assistant turn at the end of the
    /// transcript (starting an unlabelled one if the last turn is human), then
    /// strip `stop_sequences` from its text. Returns the updated text.
    pub fn extend_assistant<'a>(
        &mut self,
        fragment: &str,
        stop_sequences: impl IntoIterator<Item = &'a str>,
    ) -> &str {
        if self.turns.last().map(|t| t.role) != Some(Role::Assistant) {
            self.begin_assistant("");
        }
        let len = self.turns.len();
        let turn = &mut self.turns[len - 1];
        turn.text.push_str(fragment);
        turn.text = strip_stop_sequences(&turn.text, stop_sequences);
        &turn.text
    }

    /// Render the turns from `position` on as model input.
    ///
    /// Human turns are followed by `sep_token` unless their text already ends
    /// with it. Assistant turns are followed by `stop_token`, except the last
    /// one, which the model is about to continue.
    pub fn serialize_from(&self, position: usize, sep_token: &str, stop_token: &str) -> String {
        let last = self.turns.len().saturating_sub(1);
        let start = position.min(self.turns.len());
        let mut out = String::new();
        for (i, turn) in self.turns.iter().enumerate().skip(start) {
            out.push_str(&turn.prefix);
            out.push_str(&turn.text);
            match turn.role {
                Role::Human if !turn.text.ends_with(sep_token) => out.push_str(sep_token),
                Role::Human => {}
                Role::Assistant if i < last => out.push_str(stop_token),
                Role::Assistant => {}
            }
        }
        out
    }
}
