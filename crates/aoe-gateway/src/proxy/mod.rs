//! Streaming proxy core: transport, parsing, and envelope normalization

mod assembler;
mod descriptor;
mod envelope;
mod error;
pub mod headers;
mod normalizer;
mod parser;
mod transport;

pub use assembler::{Assembled, ValueAssembler};
pub use descriptor::{
    BODY_PREVIEW_CHARS, CallSummary, FileAttachment, MULTIPART_PREVIEW, RequestDescriptor,
    RequestDescriptorBuilder, truncate_chars,
};
pub use envelope::{Envelope, Payload};
pub use error::ProxyError;
pub use headers::{HeaderPairs, sanitize};
pub use normalizer::{
    NormalizedStream, OutputSink, StreamCallback, StreamState, stream_envelopes,
};
pub use parser::{EventListener, JsonEvent, JsonStreamParser, ParseError};
pub use transport::{FragmentStream, TransportClient, Utf8Decoder, decode_body, text_fragments};
