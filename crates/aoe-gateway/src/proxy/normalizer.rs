//! Turn a stream of upstream text fragments into a stream of envelopes
//!
//! Each fragment is fed to a [`JsonStreamParser`]; the adapter's
//! [`StreamCallback`] sees every event and writes whatever it wants to show
//! the caller into an [`OutputSink`]. The sink's content after one fragment
//! becomes one success chunk. The first error of any kind becomes one
//! `success=false` envelope and ends the stream.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, error};

use super::descriptor::{CallSummary, RequestDescriptor};
use super::envelope::Envelope;
use super::error::ProxyError;
use super::parser::{EventListener, JsonEvent, JsonStreamParser};
use super::transport::{TransportClient, stream_headers};

/// Output captured while one fragment is consumed
#[derive(Debug, Default)]
pub struct OutputSink {
    buf: String,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drain the captured output, leaving the sink empty
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }
}

impl fmt::Write for OutputSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.push_str(s);
        Ok(())
    }
}

/// Per-event hook supplied by a streaming adapter
pub trait StreamCallback: Send {
    fn on_event(&mut self, event: JsonEvent, sink: &mut OutputSink) -> Result<(), ProxyError>;
}

impl<F> StreamCallback for F
where
    F: FnMut(JsonEvent, &mut OutputSink) -> Result<(), ProxyError> + Send,
{
    fn on_event(&mut self, event: JsonEvent, sink: &mut OutputSink) -> Result<(), ProxyError> {
        self(event, sink)
    }
}

/// Lifecycle of one streamed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Streaming,
    ClosedOk,
    ClosedError,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::ClosedOk | StreamState::ClosedError)
    }
}

/// Routes parser events to the callback; remembers the first callback error
/// and ignores the rest of the fragment after it.
struct Capture<'a> {
    callback: &'a mut dyn StreamCallback,
    sink: &'a mut OutputSink,
    error: Option<ProxyError>,
}

impl EventListener for Capture<'_> {
    fn on_event(&mut self, event: JsonEvent) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.callback.on_event(event, self.sink) {
            self.error = Some(err);
        }
    }
}

/// Envelope stream over a fragment stream.
///
/// Once a terminal state is reached the fragment source and parser are
/// dropped and every later poll yields `None`.
pub struct NormalizedStream<S> {
    fragments: Option<S>,
    parser: Option<JsonStreamParser>,
    callback: Box<dyn StreamCallback>,
    sink: OutputSink,
    state: StreamState,
    pending_failure: Option<ProxyError>,
    summary: Option<CallSummary>,
}

impl<S> NormalizedStream<S>
where
    S: Stream<Item = Result<String, ProxyError>> + Unpin,
{
    pub fn new(fragments: S, callback: Box<dyn StreamCallback>) -> Self {
        Self {
            fragments: Some(fragments),
            parser: Some(JsonStreamParser::new()),
            callback,
            sink: OutputSink::new(),
            state: StreamState::Open,
            pending_failure: None,
            summary: None,
        }
    }

    /// Attach call details used when logging the failure
    pub fn with_summary(mut self, summary: CallSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn consume(&mut self, text: &str) -> Result<(), ProxyError> {
        let Some(parser) = self.parser.as_mut() else {
            return Ok(());
        };
        let mut capture = Capture {
            callback: self.callback.as_mut(),
            sink: &mut self.sink,
            error: None,
        };
        parser.consume(text, &mut capture)?;
        capture.error.map_or(Ok(()), Err)
    }

    fn finish_parser(&mut self) -> Result<(), ProxyError> {
        let Some(parser) = self.parser.as_mut() else {
            return Ok(());
        };
        let mut capture = Capture {
            callback: self.callback.as_mut(),
            sink: &mut self.sink,
            error: None,
        };
        parser.finish(&mut capture)?;
        capture.error.map_or(Ok(()), Err)
    }

    /// Package captured output. Output seen before an error in the same
    /// fragment is delivered first; the failure follows on the next poll.
    fn emit(&mut self, outcome: Result<(), ProxyError>) -> Option<Envelope> {
        let chunk = if self.sink.is_empty() {
            None
        } else {
            Some(Envelope::chunk(self.sink.take()))
        };

        match (outcome, chunk) {
            (Ok(()), chunk) => chunk,
            (Err(err), Some(chunk)) => {
                self.pending_failure = Some(err);
                Some(chunk)
            }
            (Err(err), None) => Some(self.fail(err)),
        }
    }

    fn fail(&mut self, err: ProxyError) -> Envelope {
        self.state = StreamState::ClosedError;
        self.release();

        let envelope = Envelope::failure(err.to_string());
        match &self.summary {
            Some(summary) => summary.log_failure(&err, &envelope),
            None => error!(
                error_type = err.category(),
                response = %envelope.to_json(),
                "Stream failed: {err}"
            ),
        }
        envelope
    }

    fn release(&mut self) {
        self.fragments = None;
        self.parser = None;
        self.sink.take();
    }
}

impl<S> Stream for NormalizedStream<S>
where
    S: Stream<Item = Result<String, ProxyError>> + Unpin,
{
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(err) = this.pending_failure.take() {
            return Poll::Ready(Some(this.fail(err)));
        }

        loop {
            if this.state.is_terminal() {
                return Poll::Ready(None);
            }
            let Some(fragments) = this.fragments.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(fragments).poll_next(cx) {
                Poll::Ready(Some(Ok(text))) => {
                    this.state = StreamState::Streaming;
                    let outcome = this.consume(&text);
                    if let Some(envelope) = this.emit(outcome) {
                        return Poll::Ready(Some(envelope));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    return Poll::Ready(Some(this.fail(err)));
                }
                Poll::Ready(None) => {
                    let outcome = this.finish_parser();
                    let envelope = this.emit(outcome);
                    if !this.state.is_terminal() && this.pending_failure.is_none() {
                        this.state = StreamState::ClosedOk;
                        this.release();
                        debug!("Upstream stream closed");
                    }
                    return Poll::Ready(envelope);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Open a streamed call and normalize it into envelopes.
///
/// Nothing is sent upstream until the returned stream is first polled. A
/// failure to open the stream yields a single failure envelope.
pub fn stream_envelopes(
    client: TransportClient,
    descriptor: RequestDescriptor,
    callback: Box<dyn StreamCallback>,
) -> BoxStream<'static, Envelope> {
    async_stream::stream! {
        let summary = CallSummary::new(&descriptor, &stream_headers(&descriptor));
        match client.open_stream_logged(&descriptor, &summary).await {
            Ok(fragments) => {
                let mut normalized = NormalizedStream::new(fragments, callback).with_summary(summary);
                while let Some(envelope) = normalized.next().await {
                    yield envelope;
                }
            }
            Err(err) => {
                let envelope = Envelope::failure(err.to_string());
                summary.log_failure(&err, &envelope);
                yield envelope;
            }
        }
    }
    .boxed()
}
