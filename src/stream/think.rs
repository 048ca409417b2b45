/// Tag-aware content splitter for models that inline reasoning between a
/// start and an end marker in their answer text.
///
/// Reasoning is surfaced only once its closing marker has arrived, and a
/// marker split across fragments never leaks into the visible answer.
pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Answer(String),
    Reasoning(String),
}

#[derive(Debug)]
pub struct ThinkSplitter {
    open: String,
    close: String,
    buffer: String,
    in_reasoning: bool,
}

impl ThinkSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_markers(THINK_OPEN, THINK_CLOSE)
    }

    #[must_use]
    pub fn with_markers(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
            buffer: String::new(),
            in_reasoning: false,
        }
    }

    #[must_use]
    pub fn in_reasoning(&self) -> bool {
        self.in_reasoning
    }

    pub fn push(&mut self, fragment: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        self.push_into(fragment, &mut out);
        out
    }

    pub fn push_into(&mut self, fragment: &str, out: &mut Vec<Segment>) {
        self.buffer.push_str(fragment);
        loop {
            if self.in_reasoning {
                let Some(end) = self.buffer.find(self.close.as_str()) else {
                    return;
                };
                let reasoning = self.buffer[..end].trim();
                if !reasoning.is_empty() {
                    out.push(Segment::Reasoning(reasoning.to_owned()));
                }
                self.buffer.drain(..end + self.close.len());
                self.in_reasoning = false;
                continue;
            }

            if let Some(start) = self.buffer.find(self.open.as_str()) {
                if start > 0 {
                    out.push(Segment::Answer(self.buffer[..start].to_owned()));
                }
                self.buffer.drain(..start + self.open.len());
                self.in_reasoning = true;
                continue;
            }

            // Keep a trailing partial start marker back until the next fragment.
            let keep = partial_marker_len(&self.buffer, &self.open);
            let flush_len = self.buffer.len() - keep;
            if flush_len > 0 {
                out.push(Segment::Answer(self.buffer[..flush_len].to_owned()));
                self.buffer.drain(..flush_len);
            }
            return;
        }
    }

    /// Flush whatever is still buffered at end of stream. An unterminated
    /// span is surfaced as reasoning so its text is not lost.
    pub fn finish(&mut self) -> Option<Segment> {
        let rest = std::mem::take(&mut self.buffer);
        let was_reasoning = std::mem::replace(&mut self.in_reasoning, false);
        if was_reasoning {
            let trimmed = rest.trim();
            return (!trimmed.is_empty()).then(|| Segment::Reasoning(trimmed.to_owned()));
        }
        (!rest.is_empty()).then_some(Segment::Answer(rest))
    }
}

impl Default for ThinkSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest suffix of `haystack` that is a proper prefix of `marker`.
fn partial_marker_len(haystack: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(haystack.len());
    (1..=max)
        .rev()
        .find(|&len| marker.is_char_boundary(len) && haystack.ends_with(&marker[..len]))
        .unwrap_or(0)
}
