//! Incremental JSON event parser
//!
//! Text arrives in fragments of arbitrary size from a live upstream response.
//! [`JsonStreamParser::consume`] buffers whatever token is still open at the
//! end of a fragment (a key, a string, a number, a literal) and emits an event
//! only once that token is lexically complete. Events are therefore identical
//! however the input happens to be split.
//!
//! The parser accepts a sequence of top-level values. Several providers frame
//! a streamed reply as concatenated JSON documents rather than one array.
//!
//! Tokens are decoded strictly. A string holding an unpaired UTF-16 surrogate
//! escape (`"\ud800"`) has no Unicode text form, and a number outside the
//! `f64` range (`1e400`) has no [`Number`] form, so both are
//! [`ParseError::InvalidToken`] rather than being replaced or clamped.

use serde_json::{Number, Value};
use thiserror::Error;

/// Maximum container nesting
pub const MAX_DEPTH: usize = 512;

/// Maximum size in bytes of a single buffered token
pub const MAX_TOKEN_LEN: usize = 1024 * 1024;

/// A lexically complete piece of the JSON document
#[derive(Debug, Clone, PartialEq)]
pub enum JsonEvent {
    ObjectStart,
    ObjectEnd,
    ArrayStart,
    ArrayEnd,
    /// Object member name
    Key(String),
    String(String),
    Number(Number),
    Bool(bool),
    Null,
}

impl JsonEvent {
    /// The scalar value carried by this event, if it is a value event
    pub fn scalar(&self) -> Option<Value> {
        match self {
            JsonEvent::String(s) => Some(Value::String(s.clone())),
            JsonEvent::Number(n) => Some(Value::Number(n.clone())),
            JsonEvent::Bool(b) => Some(Value::Bool(*b)),
            JsonEvent::Null => Some(Value::Null),
            _ => None,
        }
    }
}

/// Malformed input. Offsets count characters from the start of the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("invalid {kind} at offset {offset}: {reason}")]
    InvalidToken {
        kind: &'static str,
        offset: usize,
        reason: String,
    },

    #[error("nesting deeper than {limit} levels at offset {offset}")]
    TooDeep { limit: usize, offset: usize },

    #[error("token longer than {limit} bytes at offset {offset}")]
    TokenTooLong { limit: usize, offset: usize },
}

/// Receives every event the parser emits, in input order
pub trait EventListener {
    fn on_event(&mut self, event: JsonEvent);
}

impl<F> EventListener for F
where
    F: FnMut(JsonEvent),
{
    fn on_event(&mut self, event: JsonEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the grammar allows next, ignoring whitespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Any value: top level, after `:` or after `,` in an array
    Value,
    /// Right after `[`
    ValueOrArrayEnd,
    /// Right after `{`
    KeyOrObjectEnd,
    /// After `,` in an object
    Key,
    Colon,
    CommaOrEnd,
}

/// A token that has started but not finished
#[derive(Debug, Default)]
enum Token {
    #[default]
    None,
    Str {
        raw: String,
        escaped: bool,
        key: bool,
    },
    Number(String),
    Literal {
        text: String,
        target: &'static str,
    },
}

/// Streaming JSON tokenizer. One instance per stream call.
#[derive(Debug)]
pub struct JsonStreamParser {
    stack: Vec<Container>,
    expect: Expect,
    token: Token,
    offset: usize,
    failed: Option<ParseError>,
}

impl Default for JsonStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonStreamParser {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            expect: Expect::Value,
            token: Token::None,
            offset: 0,
            failed: None,
        }
    }

    /// Current container nesting depth
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// True between top-level documents, with nothing buffered
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty() && matches!(self.token, Token::None)
    }

    /// Feed one fragment, emitting events to `listener` as tokens complete.
    ///
    /// After an error the parser stays failed and returns the same error.
    pub fn consume<L>(&mut self, fragment: &str, listener: &mut L) -> Result<(), ParseError>
    where
        L: EventListener + ?Sized,
    {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        for ch in fragment.chars() {
            if let Err(err) = self.step(ch, listener) {
                self.failed = Some(err.clone());
                return Err(err);
            }
            self.offset += 1;
        }
        Ok(())
    }

    /// Feed one fragment and collect its events
    pub fn feed(&mut self, fragment: &str) -> Result<Vec<JsonEvent>, ParseError> {
        let mut events = Vec::new();
        self.consume(fragment, &mut |event| events.push(event))?;
        Ok(events)
    }

    /// Signal end of input. Flushes a trailing top-level number and fails if
    /// a container or token is still open.
    pub fn finish<L>(&mut self, listener: &mut L) -> Result<(), ParseError>
    where
        L: EventListener + ?Sized,
    {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        let result = match std::mem::take(&mut self.token) {
            Token::Number(text) => self.complete_number(&text, listener),
            Token::None => Ok(()),
            Token::Str { .. } | Token::Literal { .. } => Err(ParseError::UnexpectedEnd {
                offset: self.offset,
            }),
        }
        .and_then(|()| {
            if self.stack.is_empty() {
                Ok(())
            } else {
                Err(ParseError::UnexpectedEnd {
                    offset: self.offset,
                })
            }
        });
        if let Err(err) = &result {
            self.failed = Some(err.clone());
        }
        result
    }

    fn step<L>(&mut self, ch: char, listener: &mut L) -> Result<(), ParseError>
    where
        L: EventListener + ?Sized,
    {
        match std::mem::take(&mut self.token) {
            Token::None => {}
            Token::Str {
                mut raw,
                escaped,
                key,
            } => {
                if !escaped && ch == '"' {
                    return self.complete_string(&raw, key, listener);
                }
                raw.push(ch);
                self.token = Token::Str {
                    raw,
                    escaped: !escaped && ch == '\\',
                    key,
                };
                return self.check_token_len();
            }
            Token::Number(mut text) => {
                if is_number_char(ch) {
                    text.push(ch);
                    self.token = Token::Number(text);
                    return self.check_token_len();
                }
                // The number ends here; `ch` is structural
                self.complete_number(&text, listener)?;
            }
            Token::Literal { mut text, target } => {
                text.push(ch);
                if !target.starts_with(text.as_str()) {
                    return Err(ParseError::InvalidToken {
                        kind: "literal",
                        offset: self.offset,
                        reason: format!("expected `{target}`"),
                    });
                }
                if text.len() == target.len() {
                    listener.on_event(literal_event(target));
                    self.value_done();
                } else {
                    self.token = Token::Literal { text, target };
                }
                return Ok(());
            }
        }

        if matches!(ch, ' ' | '\t' | '\n' | '\r') {
            return Ok(());
        }

        match self.expect {
            Expect::ValueOrArrayEnd if ch == ']' => self.close(Container::Array, listener),
            Expect::Value | Expect::ValueOrArrayEnd => self.begin_value(ch, listener),
            Expect::KeyOrObjectEnd if ch == '}' => self.close(Container::Object, listener),
            Expect::KeyOrObjectEnd | Expect::Key if ch == '"' => {
                self.token = Token::Str {
                    raw: String::new(),
                    escaped: false,
                    key: true,
                };
                Ok(())
            }
            Expect::Colon if ch == ':' => {
                self.expect = Expect::Value;
                Ok(())
            }
            Expect::CommaOrEnd => match (ch, self.stack.last()) {
                (',', Some(Container::Object)) => {
                    self.expect = Expect::Key;
                    Ok(())
                }
                (',', Some(Container::Array)) => {
                    self.expect = Expect::Value;
                    Ok(())
                }
                ('}', Some(Container::Object)) => self.close(Container::Object, listener),
                (']', Some(Container::Array)) => self.close(Container::Array, listener),
                _ => Err(self.unexpected(ch)),
            },
            _ => Err(self.unexpected(ch)),
        }
    }

    fn begin_value<L>(&mut self, ch: char, listener: &mut L) -> Result<(), ParseError>
    where
        L: EventListener + ?Sized,
    {
        match ch {
            '{' => {
                self.open(Container::Object)?;
                listener.on_event(JsonEvent::ObjectStart);
                self.expect = Expect::KeyOrObjectEnd;
            }
            '[' => {
                self.open(Container::Array)?;
                listener.on_event(JsonEvent::ArrayStart);
                self.expect = Expect::ValueOrArrayEnd;
            }
            '"' => {
                self.token = Token::Str {
                    raw: String::new(),
                    escaped: false,
                    key: false,
                }
            }
            '-' | '0'..='9' => self.token = Token::Number(ch.to_string()),
            't' => self.start_literal(ch, "true"),
            'f' => self.start_literal(ch, "false"),
            'n' => self.start_literal(ch, "null"),
            _ => return Err(self.unexpected(ch)),
        }
        Ok(())
    }

    fn start_literal(&mut self, ch: char, target: &'static str) {
        self.token = Token::Literal {
            text: ch.to_string(),
            target,
        };
    }

    fn open(&mut self, container: Container) -> Result<(), ParseError> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(ParseError::TooDeep {
                limit: MAX_DEPTH,
                offset: self.offset,
            });
        }
        self.stack.push(container);
        Ok(())
    }

    fn close<L>(&mut self, container: Container, listener: &mut L) -> Result<(), ParseError>
    where
        L: EventListener + ?Sized,
    {
        self.stack.pop();
        listener.on_event(match container {
            Container::Object => JsonEvent::ObjectEnd,
            Container::Array => JsonEvent::ArrayEnd,
        });
        self.value_done();
        Ok(())
    }

    /// A complete value was emitted; decide what may follow it
    fn value_done(&mut self) {
        self.expect = if self.stack.is_empty() {
            Expect::Value
        } else {
            Expect::CommaOrEnd
        };
    }

    fn complete_string<L>(
        &mut self,
        raw: &str,
        key: bool,
        listener: &mut L,
    ) -> Result<(), ParseError>
    where
        L: EventListener + ?Sized,
    {
        // `raw` is the exact source text between the quotes, so serde_json
        // can decode escapes and reject control characters for us
        let decoded: String = serde_json::from_str(&format!("\"{raw}\"")).map_err(|e| {
            ParseError::InvalidToken {
                kind: "string",
                offset: self.offset,
                reason: e.to_string(),
            }
        })?;
        if key {
            listener.on_event(JsonEvent::Key(decoded));
            self.expect = Expect::Colon;
        } else {
            listener.on_event(JsonEvent::String(decoded));
            self.value_done();
        }
        Ok(())
    }

    fn complete_number<L>(&mut self, text: &str, listener: &mut L) -> Result<(), ParseError>
    where
        L: EventListener + ?Sized,
    {
        let offset = self.offset;
        let invalid = |reason: String| ParseError::InvalidToken {
            kind: "number",
            offset,
            reason,
        };
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Number(number)) => {
                listener.on_event(JsonEvent::Number(number));
                self.value_done();
                Ok(())
            }
            Ok(_) => Err(invalid(format!("`{text}` is not a number"))),
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    fn check_token_len(&self) -> Result<(), ParseError> {
        let len = match &self.token {
            Token::Str { raw, .. } => raw.len(),
            Token::Number(text) => text.len(),
            _ => 0,
        };
        if len > MAX_TOKEN_LEN {
            return Err(ParseError::TokenTooLong {
                limit: MAX_TOKEN_LEN,
                offset: self.offset,
            });
        }
        Ok(())
    }

    fn unexpected(&self, found: char) -> ParseError {
        ParseError::UnexpectedChar {
            found,
            offset: self.offset,
        }
    }
}

fn is_number_char(ch: char) -> bool {
    matches!(ch, '0'..='9' | '-' | '+' | '.' | 'e' | 'E')
}

fn literal_event(target: &str) -> JsonEvent {
    match target {
        "true" => JsonEvent::Bool(true),
        "false" => JsonEvent::Bool(false),
        _ => JsonEvent::Null,
    }
}
