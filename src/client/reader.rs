use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::StreamExt;

use crate::stream::{decode_line, DeltaKind, LineBuffer, Segment, ThinkSplitter};

use super::cancel::CancelToken;
use super::conversation::StreamEvent;
use super::friendly::friendly_transport_error;
use super::message::ReasoningSource;
use super::transport::{ByteStream, TransportError};

/// What the reader hands to the conversation, in decode order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    Content(StreamEvent),
    /// Terminal marker seen, or the stream closed cleanly.
    Finished,
    /// Stream-fatal error; the text is user-facing.
    Failed(String),
    Cancelled,
}

impl ReaderEvent {
    fn is_terminal(&self) -> bool {
        !matches!(self, ReaderEvent::Content(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Suspended on the next network chunk; the only await point.
    AwaitingChunk,
    /// Input ended; flush the residual line and the tag splitter.
    Draining,
    /// A terminal event is queued.
    Finished,
}

enum Wake {
    Cancelled,
    Chunk(Option<Result<Bytes, TransportError>>),
}

/// Consumes one generation's byte stream: bytes to lines to deltas, with
/// optional `<think>` splitting. The stream is dropped on every exit path.
pub struct GenerationReader {
    stream: Option<ByteStream>,
    lines: LineBuffer,
    splitter: Option<ThinkSplitter>,
    cancel: CancelToken,
    state: ReaderState,
    pending: VecDeque<ReaderEvent>,
    line_scratch: Vec<String>,
    segment_scratch: Vec<Segment>,
    closed: bool,
}

impl GenerationReader {
    #[must_use]
    pub fn new(stream: ByteStream, cancel: CancelToken, inline_reasoning_tags: bool) -> Self {
        Self {
            stream: Some(stream),
            lines: LineBuffer::new(),
            splitter: inline_reasoning_tags.then(ThinkSplitter::new),
            cancel,
            state: ReaderState::AwaitingChunk,
            pending: VecDeque::new(),
            line_scratch: Vec::new(),
            segment_scratch: Vec::new(),
            closed: false,
        }
    }

    /// The byte stream is still held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Next event, or `None` after a terminal event has been returned.
    ///
    /// Cancellation is checked before every event and raced against every
    /// chunk read; once observed, queued content is discarded.
    pub async fn next_event(&mut self) -> Option<ReaderEvent> {
        loop {
            if self.closed {
                return None;
            }
            if self.cancel.is_cancelled() {
                return Some(self.close_with(ReaderEvent::Cancelled));
            }
            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    return Some(self.close_with(event));
                }
                return Some(event);
            }
            match self.state {
                ReaderState::AwaitingChunk => self.await_chunk().await,
                ReaderState::Draining => self.drain(),
                ReaderState::Finished => {
                    self.close();
                    return None;
                }
            }
        }
    }

    async fn await_chunk(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            self.state = ReaderState::Draining;
            return;
        };
        let wake = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Wake::Cancelled,
            chunk = stream.next() => Wake::Chunk(chunk),
        };
        match wake {
            // Picked up by the flag check at the top of `next_event`.
            Wake::Cancelled => {}
            Wake::Chunk(Some(Ok(bytes))) => {
                let mut lines = std::mem::take(&mut self.line_scratch);
                self.lines.push_bytes_into(&bytes, &mut lines);
                for line in lines.drain(..) {
                    if self.state == ReaderState::Finished {
                        break;
                    }
                    self.process_line(&line);
                }
                self.line_scratch = lines;
            }
            Wake::Chunk(Some(Err(err))) => {
                tracing::debug!("relay stream read failed: {err}");
                self.finish_with(ReaderEvent::Failed(friendly_transport_error(&err)));
            }
            Wake::Chunk(None) => {
                self.stream = None;
                self.state = ReaderState::Draining;
            }
        }
    }

    fn drain(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.process_line(&line);
        }
        if self.state != ReaderState::Finished {
            self.finish_with(ReaderEvent::Finished);
        }
    }

    fn process_line(&mut self, line: &str) {
        for delta in decode_line(line) {
            match delta.kind {
                DeltaKind::Answer(text) => self.push_answer(&text),
                DeltaKind::Reasoning(text) => {
                    self.pending
                        .push_back(ReaderEvent::Content(StreamEvent::Reasoning {
                            text,
                            source: ReasoningSource::Field,
                        }));
                }
                DeltaKind::Done => {
                    self.finish_with(ReaderEvent::Finished);
                    return;
                }
                DeltaKind::Error(message) => {
                    self.finish_with(ReaderEvent::Failed(message));
                    return;
                }
            }
        }
    }

    fn push_answer(&mut self, text: &str) {
        let Some(splitter) = self.splitter.as_mut() else {
            self.pending
                .push_back(ReaderEvent::Content(StreamEvent::Answer(text.to_string())));
            return;
        };
        splitter.push_into(text, &mut self.segment_scratch);
        for segment in self.segment_scratch.drain(..) {
            self.pending.push_back(ReaderEvent::Content(segment_event(segment)));
        }
    }

    fn finish_with(&mut self, terminal: ReaderEvent) {
        if let Some(segment) = self.splitter.as_mut().and_then(ThinkSplitter::finish) {
            self.pending.push_back(ReaderEvent::Content(segment_event(segment)));
        }
        self.pending.push_back(terminal);
        self.state = ReaderState::Finished;
        self.stream = None;
    }

    fn close(&mut self) {
        self.stream = None;
        self.pending.clear();
        self.state = ReaderState::Finished;
        self.closed = true;
    }

    fn close_with(&mut self, event: ReaderEvent) -> ReaderEvent {
        self.close();
        event
    }
}

fn segment_event(segment: Segment) -> StreamEvent {
    match segment {
        Segment::Answer(text) => StreamEvent::Answer(text),
        Segment::Reasoning(text) => StreamEvent::Reasoning {
            text,
            source: ReasoningSource::Tagged,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(chunks: Vec<Result<&'static str, TransportError>>) -> ByteStream {
        Box::pin(futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| chunk.map(|text| Bytes::from_static(text.as_bytes()))),
        ))
    }

    async fn collect(reader: &mut GenerationReader) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        while let Some(event) = reader.next_event().await {
            events.push(event);
        }
        events
    }

    fn answer(text: &str) -> ReaderEvent {
        ReaderEvent::Content(StreamEvent::Answer(text.to_string()))
    }

    #[tokio::test]
    async fn test_reads_split_events_until_done() {
        let stream = scripted(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi"),
            Ok("ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n"),
        ]);
        let mut reader = GenerationReader::new(stream, CancelToken::new(), false);
        let events = collect(&mut reader).await;
        assert_eq!(events, vec![answer("Hel"), answer("lo"), ReaderEvent::Finished]);
        assert!(!reader.is_open());
    }

    #[tokio::test]
    async fn test_clean_close_without_done_finishes() {
        let stream = scripted(vec![Ok("data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}")]);
        let mut reader = GenerationReader::new(stream, CancelToken::new(), false);
        assert_eq!(
            collect(&mut reader).await,
            vec![answer("x"), ReaderEvent::Finished]
        );
    }

    #[tokio::test]
    async fn test_inline_tags_become_reasoning() {
        let stream = scripted(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"<thi\"}}]}\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"nk>plan</think>Answer\"}}]}\n"),
            Ok("data: [DONE]\n"),
        ]);
        let mut reader = GenerationReader::new(stream, CancelToken::new(), true);
        assert_eq!(
            collect(&mut reader).await,
            vec![
                ReaderEvent::Content(StreamEvent::Reasoning {
                    text: "plan".to_string(),
                    source: ReasoningSource::Tagged,
                }),
                answer("Answer"),
                ReaderEvent::Finished,
            ]
        );
    }

    #[tokio::test]
    async fn test_error_delta_is_fatal() {
        let stream = scripted(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"error\":{\"message\":\"overloaded\"}}\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        )]);
        let mut reader = GenerationReader::new(stream, CancelToken::new(), false);
        assert_eq!(
            collect(&mut reader).await,
            vec![answer("a"), ReaderEvent::Failed("overloaded".to_string())]
        );
    }

    #[tokio::test]
    async fn test_network_error_mid_stream_fails() {
        let stream = scripted(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n"),
            Err(TransportError::Network("connection reset".to_string())),
        ]);
        let mut reader = GenerationReader::new(stream, CancelToken::new(), false);
        assert_eq!(
            collect(&mut reader).await,
            vec![answer("a"), ReaderEvent::Failed("connection reset".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancel_releases_pending_stream() {
        let cancel = CancelToken::new();
        let stream: ByteStream =
            Box::pin(futures_util::stream::pending::<Result<Bytes, TransportError>>());
        let mut reader = GenerationReader::new(stream, cancel.clone(), false);
        let trigger = async {
            tokio::task::yield_now().await;
            cancel.cancel();
        };
        let (event, ()) = tokio::join!(reader.next_event(), trigger);
        assert_eq!(event, Some(ReaderEvent::Cancelled));
        assert!(!reader.is_open());
        assert_eq!(reader.next_event().await, None);
    }

    #[tokio::test]
    async fn test_malformed_event_is_skipped() {
        let stream = scripted(vec![Ok(
            "data: {not json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\ndata: [DONE]\n",
        )]);
        let mut reader = GenerationReader::new(stream, CancelToken::new(), false);
        assert_eq!(
            collect(&mut reader).await,
            vec![answer("ok"), ReaderEvent::Finished]
        );
    }
}
