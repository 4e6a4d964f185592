//! Elements: typed sub-field bindings within a task's register range
//!
//! An element slices a task's register span into one typed field bound to
//! a channel (or, for bit-packed words, to several boolean channels). All
//! layout and type validation happens at construction; decode never fails
//! for layout reasons at runtime.

use std::sync::Arc;

use flux_channel::{Channel, ChannelKind, Value};
use flux_codec::{
    apply_scale, decode_float, decode_integer, decode_text, encode_float, encode_integer,
    encode_text, remove_scale, word_bit, WordOrder,
};
use tracing::warn;

use crate::error::{FieldSrvError, Result};

/// One bit of a status word bound to a boolean channel
#[derive(Debug, Clone)]
pub struct BitBinding {
    pub bit: u8,
    pub channel: Arc<Channel>,
}

#[derive(Debug, Clone)]
enum ElementKind {
    /// Fixed-point or floating-point number
    Number {
        channel: Arc<Channel>,
        signed: bool,
        float: bool,
        order: WordOrder,
        scale: i8,
    },
    /// Bit-packed status word (always one register)
    Bits { bindings: Vec<BitBinding> },
    /// Fixed-length ASCII text
    Text { channel: Arc<Channel> },
    /// Unused gap inside a task's span; skipped on decode, never written
    Reserved,
}

/// A typed sub-field of a task's register range
#[derive(Debug, Clone)]
pub struct Element {
    register_count: u16,
    kind: ElementKind,
}

impl Element {
    /// Numeric element bound to `channel`
    ///
    /// `register_count` must be 1, 2 or 4; floats need 2 or 4. The bound
    /// channel must carry a numeric kind.
    pub fn number(
        channel: Arc<Channel>,
        register_count: u16,
        signed: bool,
        float: bool,
        order: WordOrder,
        scale: i8,
    ) -> Result<Self> {
        if !matches!(register_count, 1 | 2 | 4) {
            return Err(FieldSrvError::config(format!(
                "Element {}: invalid register count {register_count}",
                channel.address()
            )));
        }
        if float && register_count == 1 {
            return Err(FieldSrvError::config(format!(
                "Element {}: float needs 2 or 4 registers",
                channel.address()
            )));
        }
        if matches!(channel.kind(), ChannelKind::Text { .. }) {
            return Err(FieldSrvError::config(format!(
                "Element {}: numeric element bound to text channel",
                channel.address()
            )));
        }
        Ok(Self {
            register_count,
            kind: ElementKind::Number {
                channel,
                signed,
                float,
                order,
                scale,
            },
        })
    }

    /// Bit-packed element over one register word
    pub fn bits(bindings: Vec<BitBinding>) -> Result<Self> {
        for binding in &bindings {
            if binding.bit >= 16 {
                return Err(FieldSrvError::config(format!(
                    "Element {}: bit index {} out of word",
                    binding.channel.address(),
                    binding.bit
                )));
            }
            if !matches!(binding.channel.kind(), ChannelKind::Boolean) {
                return Err(FieldSrvError::config(format!(
                    "Element {}: bit binding requires a boolean channel",
                    binding.channel.address()
                )));
            }
        }
        Ok(Self {
            register_count: 1,
            kind: ElementKind::Bits { bindings },
        })
    }

    /// Fixed-length text element bound to `channel`
    pub fn text(channel: Arc<Channel>, register_count: u16) -> Result<Self> {
        match channel.kind() {
            ChannelKind::Text { length } if *length >= usize::from(register_count) * 2 => {
                Ok(Self {
                    register_count,
                    kind: ElementKind::Text { channel },
                })
            }
            ChannelKind::Text { length } => Err(FieldSrvError::config(format!(
                "Element {}: text channel capacity {} below {} register bytes",
                channel.address(),
                length,
                usize::from(register_count) * 2
            ))),
            _ => Err(FieldSrvError::config(format!(
                "Element {}: text element bound to non-text channel",
                channel.address()
            ))),
        }
    }

    /// Unused gap of `register_count` registers
    pub fn reserved(register_count: u16) -> Self {
        Self {
            register_count,
            kind: ElementKind::Reserved,
        }
    }

    /// Register span of this element
    pub fn register_count(&self) -> u16 {
        self.register_count
    }

    /// Whether this element is a bit-packed word (read-only by contract)
    pub fn is_bits(&self) -> bool {
        matches!(self.kind, ElementKind::Bits { .. })
    }

    /// Whether this element is a gap filler
    pub fn is_reserved(&self) -> bool {
        matches!(self.kind, ElementKind::Reserved)
    }

    /// All channels this element produces into
    pub fn channels(&self) -> Vec<&Arc<Channel>> {
        match &self.kind {
            ElementKind::Number { channel, .. } | ElementKind::Text { channel } => vec![channel],
            ElementKind::Bits { bindings } => bindings.iter().map(|b| &b.channel).collect(),
            ElementKind::Reserved => Vec::new(),
        }
    }

    /// Decode this element's slice of a response and push values to `next`
    pub fn decode(&self, words: &[u16]) -> Result<()> {
        debug_assert_eq!(words.len(), usize::from(self.register_count));
        match &self.kind {
            ElementKind::Number {
                channel,
                signed,
                float,
                order,
                scale,
            } => {
                if *float {
                    let raw = decode_float(words, *order)?;
                    push_numeric(channel, Numeric::Float(apply_scale(raw, *scale)))?;
                } else {
                    let raw = decode_integer(words, *order, *signed)?;
                    if *scale == 0 {
                        push_numeric(channel, Numeric::Int(raw))?;
                    } else {
                        push_numeric(channel, Numeric::Float(apply_scale(raw as f64, *scale)))?;
                    }
                }
                Ok(())
            }
            ElementKind::Bits { bindings } => {
                for binding in bindings {
                    binding
                        .channel
                        .set_next(Value::Bool(word_bit(words[0], binding.bit)))?;
                }
                Ok(())
            }
            ElementKind::Text { channel } => {
                channel.set_next(Value::Text(decode_text(words)))?;
                Ok(())
            }
            ElementKind::Reserved => Ok(()),
        }
    }

    /// Take the bound channel's pending write and encode it, if any
    ///
    /// Returns `Ok(None)` when no write is pending. The pending write is
    /// consumed regardless of what happens to the encoded words afterwards.
    pub fn encode_pending(&self) -> Result<Option<Vec<u16>>> {
        match &self.kind {
            ElementKind::Number {
                channel,
                signed,
                float,
                order,
                scale,
            } => {
                let Some(value) = channel.take_pending_write() else {
                    return Ok(None);
                };
                let engineering = value.as_f64().ok_or_else(|| {
                    FieldSrvError::encoding(format!(
                        "{}: pending write {value} is not numeric",
                        channel.address()
                    ))
                })?;
                let words = if *float {
                    encode_float(
                        apply_scale(engineering, -*scale),
                        usize::from(self.register_count),
                        *order,
                    )?
                } else {
                    encode_integer(
                        remove_scale(engineering, *scale) as i64,
                        usize::from(self.register_count),
                        *order,
                        *signed,
                    )?
                };
                Ok(Some(words))
            }
            ElementKind::Text { channel } => {
                let Some(value) = channel.take_pending_write() else {
                    return Ok(None);
                };
                let Value::Text(text) = value else {
                    return Err(FieldSrvError::encoding(format!(
                        "{}: pending write is not text",
                        channel.address()
                    )));
                };
                Ok(Some(encode_text(&text, usize::from(self.register_count))?))
            }
            // Bit elements never appear in write tasks (checked at task
            // construction); reserved gaps carry no channel.
            ElementKind::Bits { .. } | ElementKind::Reserved => Ok(None),
        }
    }

    /// Drive all bound channels to undefined ("we don't know")
    pub fn invalidate(&self) {
        for channel in self.channels() {
            channel.set_next_undefined();
        }
    }
}

enum Numeric {
    Int(i64),
    Float(f64),
}

/// Convert a decoded numeric into the bound channel's declared kind
fn push_numeric(channel: &Arc<Channel>, numeric: Numeric) -> Result<()> {
    let value = match (channel.kind(), &numeric) {
        (ChannelKind::Boolean, Numeric::Int(i)) => Value::Bool(*i != 0),
        (ChannelKind::Boolean, Numeric::Float(f)) => Value::Bool(*f != 0.0),
        (ChannelKind::Integer | ChannelKind::Enumerated { .. }, Numeric::Int(i)) => {
            Value::Int(clamp_i32(channel, *i))
        }
        (ChannelKind::Integer | ChannelKind::Enumerated { .. }, Numeric::Float(f)) => {
            Value::Int(clamp_i32(channel, f.round() as i64))
        }
        (ChannelKind::Long, Numeric::Int(i)) => Value::Long(*i),
        (ChannelKind::Long, Numeric::Float(f)) => Value::Long(f.round() as i64),
        (ChannelKind::Float, Numeric::Int(i)) => Value::Float(*i as f64),
        (ChannelKind::Float, Numeric::Float(f)) => Value::Float(*f),
        // Text is rejected at bind time.
        (ChannelKind::Text { .. }, _) => {
            return Err(FieldSrvError::internal(format!(
                "{}: numeric decode into text channel",
                channel.address()
            )))
        }
    };
    channel.set_next(value)?;
    Ok(())
}

fn clamp_i32(channel: &Arc<Channel>, value: i64) -> i32 {
    i32::try_from(value).unwrap_or_else(|_| {
        warn!(channel = %channel.address(), value, "decoded value clamped to integer range");
        if value < 0 {
            i32::MIN
        } else {
            i32::MAX
        }
    })
}
