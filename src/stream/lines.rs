/// Chunk tokenizer: reassembles newline-delimited lines from a fragmented
/// byte or text stream.
///
/// Each emitted line is trimmed of surrounding whitespace, so `\r\n` endings
/// and indentation never reach the decoder. Blank lines (SSE keep-alives and
/// event separators) are discarded.
use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use smallvec::SmallVec;

const REPLACEMENT_CHAR: &str = "\u{FFFD}";

/// Incremental line splitter. Restart by creating a fresh instance.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
    read_offset: usize,
    utf8_tail: SmallVec<[u8; 4]>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text and return every line it completes.
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.push_str_into(chunk, &mut out);
        out
    }

    /// Feed decoded text and append completed lines to `out`.
    pub fn push_str_into(&mut self, chunk: &str, out: &mut Vec<String>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = self.buffer[processed_up_to..line_end].trim();
            if !line.is_empty() {
                out.push(line.to_owned());
            }
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Feed raw bytes. A multi-byte UTF-8 sequence split across chunks is held
    /// until its remaining bytes arrive; invalid sequences become U+FFFD.
    pub fn push_bytes_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        if self.utf8_tail.is_empty() {
            self.decode_into(chunk, out);
            return;
        }
        let mut joined = std::mem::take(&mut self.utf8_tail).into_vec();
        joined.extend_from_slice(chunk);
        self.decode_into(&joined, out);
    }

    fn decode_into(&mut self, bytes: &[u8], out: &mut Vec<String>) {
        let mut rest = bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.push_str_into(text, out);
                    return;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.push_str_into(text, out);
                    }
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.push_str_into(REPLACEMENT_CHAR, out);
                            rest = &after[invalid_len..];
                        }
                        None => {
                            self.utf8_tail.extend_from_slice(after);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Signal end of input. Returns the residual unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if !self.utf8_tail.is_empty() {
            let tail = std::mem::take(&mut self.utf8_tail);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let residual = self.buffer[self.read_offset..].trim().to_owned();
        self.buffer.clear();
        self.read_offset = 0;
        (!residual.is_empty()).then_some(residual)
    }
}

/// Split a byte stream into complete lines using [`LineBuffer`].
///
/// A transport error is yielded once and ends the stream. On clean end of
/// input the residual unterminated line, if non-empty, is yielded last.
pub fn line_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    futures_util::stream::unfold(
        (
            Some(Box::pin(byte_stream)),
            LineBuffer::new(),
            VecDeque::<String>::with_capacity(8),
            Vec::<String>::with_capacity(8),
        ),
        |(mut source, mut lines, mut pending, mut scratch)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((Ok(line), (source, lines, pending, scratch)));
                }

                let stream = source.as_mut()?;
                let next = stream.as_mut().next().await;
                match next {
                    Some(Ok(bytes)) => {
                        lines.push_bytes_into(&bytes, &mut scratch);
                        pending.extend(scratch.drain(..));
                    }
                    Some(Err(err)) => {
                        source = None;
                        return Some((Err(err), (source, lines, pending, scratch)));
                    }
                    None => {
                        source = None;
                        let residual = lines.finish()?;
                        return Some((Ok(residual), (source, lines, pending, scratch)));
                    }
                }
            }
        },
    )
}
