//! Incremental parser for the Guacamole instruction grammar.
//!
//! An instruction is a non-empty comma-separated sequence of elements
//! terminated by `;`:
//!
//! ```text
//! 4.size,1.0,3.800,3.600;
//! ```
//!
//! Each element is `LENGTH.VALUE` where `LENGTH` is the decimal count of
//! Unicode code points in `VALUE`, not bytes. Values may contain `,` and
//! `;` freely; the length prefix makes the grammar self-delimiting. The
//! first element of an instruction is its opcode, the rest are arguments.
//!
//! The parser is fed chunks of arbitrary size and retains incomplete tails
//! across feeds, so it can run over a blob that is still being read in.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The one opcode the engine itself interprets. Its single argument is a
/// decimal millisecond timestamp demarcating a renderable frame.
pub const SYNC_OPCODE: &str = "sync";

/// Upper bound on a single element's declared length, in code points.
///
/// Servers chunk large payloads (image data and the like) into blob
/// instructions far below this, so a length beyond it indicates a corrupt
/// or hostile stream rather than real data.
pub const MAX_ELEMENT_LENGTH: usize = 1 << 20;

/// A decoded `(opcode, args)` instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    #[must_use]
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    /// Size of this instruction as encoded on the wire, in code points.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        element_size(&self.opcode) + self.args.iter().map(|a| element_size(a)).sum::<usize>()
    }
}

/// Encoded size of one element, in code points: the length digits, the
/// dot, the value itself, and the trailing `,` or `;`.
#[must_use]
pub fn element_size(value: &str) -> usize {
    let len = value.chars().count();
    decimal_digits(len) + 1 + len + 1
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Decode state for the element currently being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating the decimal length prefix.
    Length,
    /// Consuming exactly `remaining` more code points of the value.
    Value { remaining: usize },
    /// Expecting the `,` or `;` that follows a complete value.
    Separator,
}

/// Streaming decoder for the instruction grammar.
///
/// Feed input with [`feed`](Self::feed), then drain completed instructions
/// with [`next_instruction`](Self::next_instruction). Instructions decoded
/// before a mid-stream error are still delivered; the error surfaces once
/// the malformed input is reached.
#[derive(Debug)]
pub struct InstructionParser {
    buf: VecDeque<char>,
    state: State,
    length: usize,
    have_digits: bool,
    value: String,
    elements: Vec<String>,
}

impl InstructionParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: VecDeque::new(),
            state: State::Length,
            length: 0,
            have_digits: false,
            value: String::new(),
            elements: Vec::new(),
        }
    }

    /// Append a chunk of input.
    pub fn feed(&mut self, chunk: &str) {
        self.buf.extend(chunk.chars());
    }

    /// Decode the next complete instruction, if one is buffered.
    ///
    /// Returns `Ok(None)` when the buffered input ends mid-instruction; the
    /// partial state is retained for the next [`feed`](Self::feed).
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] when a length prefix is malformed or a value is
    /// followed by anything other than `,` or `;`; [`Error::ElementTooLong`]
    /// when a declared length exceeds [`MAX_ELEMENT_LENGTH`].
    pub fn next_instruction(&mut self) -> Result<Option<Instruction>> {
        loop {
            match self.state {
                State::Length => {
                    let Some(ch) = self.buf.pop_front() else {
                        return Ok(None);
                    };
                    match ch {
                        '0'..='9' => {
                            self.length = self.length * 10 + (ch as usize - '0' as usize);
                            self.have_digits = true;
                            if self.length > MAX_ELEMENT_LENGTH {
                                return Err(Error::ElementTooLong {
                                    length: self.length,
                                    max: MAX_ELEMENT_LENGTH,
                                });
                            }
                        }
                        '.' if self.have_digits => {
                            self.state = State::Value {
                                remaining: self.length,
                            };
                        }
                        other => {
                            return Err(Error::Parse(format!(
                                "expected digit or '.' in length prefix, found {other:?}"
                            )));
                        }
                    }
                }
                State::Value { remaining: 0 } => {
                    self.state = State::Separator;
                }
                State::Value { remaining } => {
                    let Some(ch) = self.buf.pop_front() else {
                        return Ok(None);
                    };
                    self.value.push(ch);
                    self.state = State::Value {
                        remaining: remaining - 1,
                    };
                }
                State::Separator => {
                    let Some(ch) = self.buf.pop_front() else {
                        return Ok(None);
                    };
                    match ch {
                        ',' => {
                            self.finish_element();
                        }
                        ';' => {
                            self.finish_element();
                            let mut parts = std::mem::take(&mut self.elements).into_iter();
                            let opcode = parts.next().unwrap_or_default();
                            return Ok(Some(Instruction {
                                opcode,
                                args: parts.collect(),
                            }));
                        }
                        other => {
                            return Err(Error::Parse(format!(
                                "expected ',' or ';' after value, found {other:?}"
                            )));
                        }
                    }
                }
            }
        }
    }

    fn finish_element(&mut self) {
        self.elements.push(std::mem::take(&mut self.value));
        self.length = 0;
        self.have_digits = false;
        self.state = State::Length;
    }

    /// Whether the parser sits between instructions with nothing buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty()
            && self.elements.is_empty()
            && self.state == State::Length
            && !self.have_digits
    }
}

impl Default for InstructionParser {
    fn default() -> Self {
        Self::new()
    }
}
