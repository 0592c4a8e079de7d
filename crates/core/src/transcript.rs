use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = match self.speaker {
            Speaker::User => "User",
            Speaker::Remote => "AI",
        };
        write!(f, "{}: {}", who, self.text)
    }
}

/// The most recent transcript lines from both sides, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptAggregator {
    capacity: usize,
    lines: VecDeque<TranscriptLine>,
}

impl TranscriptAggregator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    /// Append one delta as its own line, evicting the oldest past capacity.
    /// Blank deltas are ignored.
    pub fn push(&mut self, speaker: Speaker, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(TranscriptLine {
            speaker,
            text: text.to_string(),
        });
        true
    }

    pub fn lines(&self) -> impl Iterator<Item = &TranscriptLine> {
        self.lines.iter()
    }

    pub fn last(&self) -> Option<&TranscriptLine> {
        self.lines.back()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
