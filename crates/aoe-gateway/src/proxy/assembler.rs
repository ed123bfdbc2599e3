//! Rebuild whole values from parser events
//!
//! Adapters rarely care about individual tokens. They want each member of a
//! top-level object (`{"header": {...}, "payload": {...}}`) or each element
//! of a top-level array (`[{...}, {...}]`) as soon as it is complete.

use serde_json::{Map, Value};

use super::parser::JsonEvent;

/// A completed top-level unit
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    /// Member of a top-level object
    Pair(String, Value),
    /// Element of a top-level array
    Element(Value),
    /// A top-level scalar document
    Document(Value),
}

enum Frame {
    Object {
        map: Map<String, Value>,
        key: Option<String>,
    },
    Array(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Top {
    Object,
    Array,
}

/// Folds [`JsonEvent`]s into [`Assembled`] units. Expects a well-formed event
/// sequence, as produced by the parser.
#[derive(Default)]
pub struct ValueAssembler {
    top: Option<Top>,
    top_key: Option<String>,
    frames: Vec<Frame>,
}

impl ValueAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one event; returns a unit when one completes
    pub fn push(&mut self, event: JsonEvent) -> Option<Assembled> {
        match event {
            JsonEvent::ObjectStart => {
                self.open(Top::Object);
                None
            }
            JsonEvent::ArrayStart => {
                self.open(Top::Array);
                None
            }
            JsonEvent::ObjectEnd | JsonEvent::ArrayEnd => match self.frames.pop() {
                Some(Frame::Object { map, .. }) => self.attach(Value::Object(map)),
                Some(Frame::Array(items)) => self.attach(Value::Array(items)),
                None => {
                    // Closing the top-level container ends the document
                    self.top = None;
                    self.top_key = None;
                    None
                }
            },
            JsonEvent::Key(key) => {
                match self.frames.last_mut() {
                    Some(Frame::Object { key: slot, .. }) => *slot = Some(key),
                    Some(Frame::Array(_)) => {}
                    None => self.top_key = Some(key),
                }
                None
            }
            scalar => {
                let value = scalar.scalar()?;
                if self.top.is_none() {
                    return Some(Assembled::Document(value));
                }
                self.attach(value)
            }
        }
    }

    fn open(&mut self, kind: Top) {
        if self.top.is_none() {
            self.top = Some(kind);
            return;
        }
        self.frames.push(match kind {
            Top::Object => Frame::Object {
                map: Map::new(),
                key: None,
            },
            Top::Array => Frame::Array(Vec::new()),
        });
    }

    fn attach(&mut self, value: Value) -> Option<Assembled> {
        match self.frames.last_mut() {
            Some(Frame::Object { map, key }) => {
                map.insert(key.take().unwrap_or_default(), value);
                None
            }
            Some(Frame::Array(items)) => {
                items.push(value);
                None
            }
            None => match self.top {
                Some(Top::Object) => Some(Assembled::Pair(
                    self.top_key.take().unwrap_or_default(),
                    value,
                )),
                Some(Top::Array) => Some(Assembled::Element(value)),
                None => Some(Assembled::Document(value)),
            },
        }
    }
}
