// ABOUTME: The read half of the wire state machine: field headers, sub-item bounds,
// ABOUTME: depth/length guards, unknown-field skipping and the object-reference table.

use crate::error::{Error, Result, WireContext};
use crate::model::ModelOptions;
use crate::value::Value;
use crate::wire::{self, WireType};

/// Validate and convert bytes to a UTF-8 string.
/// Uses simdutf8 for SIMD-accelerated validation when the feature is enabled.
#[cfg(feature = "simd-utf8")]
#[inline]
fn validate_utf8(bytes: &[u8]) -> Option<&str> {
    simdutf8::basic::from_utf8(bytes).ok()
}

#[cfg(not(feature = "simd-utf8"))]
#[inline]
fn validate_utf8(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok()
}

/// Opaque handle pairing a `start_sub_item` with its `end_sub_item`.
#[derive(Debug)]
pub struct ReadToken {
    level: usize,
}

#[derive(Debug)]
struct Bound {
    /// Absolute end offset for length-delimited framing; `None` for groups.
    end: Option<usize>,
    /// Field number whose EndGroup tag closes this bound, for group framing.
    group_field: Option<u32>,
    /// Set once the matching EndGroup tag has been consumed.
    group_closed: bool,
}

/// Per-call read cursor over one serialized document.
///
/// Created at the start of one deserialize invocation and destroyed at its
/// end; never shared across calls or threads. All fatal errors leave the
/// state desynchronized by definition, so the call must be abandoned.
pub struct ReaderState<'a> {
    data: &'a [u8],
    pos: usize,
    /// Field number of the pending header; 0 when none.
    field: u32,
    /// Wire type of the pending header.
    wire: Option<WireType>,
    /// Offset of the pending header's first byte, for extension capture.
    header_start: usize,
    bounds: Vec<Bound>,
    depth: usize,
    max_depth: usize,
    max_array_length: u64,
    /// Identity slots for as-reference reads; `None` marks a reserved slot.
    refs: Vec<Option<Value>>,
    /// Element count parsed from a length sentinel, consumed by the next
    /// repeated field.
    pending_len: Option<u64>,
}

impl<'a> ReaderState<'a> {
    /// Create a reader over `data` with the model's guard limits.
    #[must_use]
    pub fn new(data: &'a [u8], options: &ModelOptions) -> Self {
        Self {
            data,
            pos: 0,
            field: 0,
            wire: None,
            header_start: 0,
            bounds: Vec::new(),
            depth: 0,
            max_depth: options.max_depth,
            max_array_length: options.max_array_length,
            refs: Vec::new(),
            pending_len: None,
        }
    }

    /// Current byte offset into the input.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Field number of the pending header.
    #[must_use]
    pub fn field(&self) -> u32 {
        self.field
    }

    /// Wire type of the pending header.
    #[must_use]
    pub fn wire_type(&self) -> Option<WireType> {
        self.wire
    }

    /// Diagnostic context for the current cursor state.
    #[must_use]
    pub fn context(&self) -> WireContext {
        WireContext {
            field: self.field,
            wire_type: self.wire,
            offset: self.pos,
            depth: self.depth,
        }
    }

    /// Parse the next field header.
    ///
    /// Returns 0 at the end of the current nesting level: end-of-input at the
    /// root, the declared end of a length-delimited sub-item, or the matching
    /// EndGroup tag of a group-framed sub-item.
    pub fn read_field_header(&mut self) -> Result<u32> {
        if let Some(bound) = self.bounds.last() {
            if let Some(end) = bound.end {
                if self.pos >= end {
                    self.field = 0;
                    self.wire = None;
                    return Ok(0);
                }
            }
        } else if self.pos >= self.data.len() {
            self.field = 0;
            self.wire = None;
            return Ok(0);
        }

        self.header_start = self.pos;
        let tag = wire::read_varint32(self.data, &mut self.pos).map_err(|e| self.enrich(e))?;
        if tag == 0 {
            return Err(Error::TruncatedOrCorrupt(self.context()));
        }
        let (field, wt) = wire::split_tag(tag).map_err(|e| self.enrich(e))?;

        if wt == WireType::EndGroup {
            // Only valid as the close of the innermost group bound.
            match self.bounds.last_mut() {
                Some(b) if b.group_field == Some(field) && !b.group_closed => {
                    b.group_closed = true;
                    self.field = 0;
                    self.wire = None;
                    Ok(0)
                }
                _ => Err(Error::TruncatedOrCorrupt(self.context())),
            }
        } else {
            self.field = field;
            self.wire = Some(wt);
            Ok(field)
        }
    }

    /// Consume the next header only if it carries `field` again.
    ///
    /// Used for repeated fields: the element loop keeps reading while
    /// consecutive headers name the same field, and rewinds otherwise.
    pub fn try_read_same_field(&mut self, field: u32) -> Result<bool> {
        let saved_pos = self.pos;
        let saved_field = self.field;
        let saved_wire = self.wire;
        let saved_header = self.header_start;
        let saved_closed = self.bounds.last().map(|b| b.group_closed);
        let next = self.read_field_header()?;
        if next == field {
            return Ok(true);
        }
        self.pos = saved_pos;
        self.field = saved_field;
        self.wire = saved_wire;
        self.header_start = saved_header;
        // The lookahead may have consumed the enclosing group's EndGroup tag;
        // the rewind must un-close the bound so the loop can re-read it.
        if let (Some(closed), Some(bound)) = (saved_closed, self.bounds.last_mut()) {
            bound.group_closed = closed;
        }
        Ok(false)
    }

    /// Assert the pending wire type matches the declared field type.
    ///
    /// A mismatch is fatal: the stream is desynchronized from that point.
    pub fn check_wire(&self, expected: WireType) -> Result<()> {
        match self.wire {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(Error::WireTypeMismatch {
                expected,
                actual,
                context: self.context(),
            }),
            None => Err(Error::TruncatedOrCorrupt(self.context())),
        }
    }

    /// Read a varint payload space.
    pub fn read_varint_payload(&mut self) -> Result<u64> {
        wire::read_varint(self.data, &mut self.pos).map_err(|e| self.enrich(e))
    }

    /// Read a fixed32 payload.
    pub fn read_fixed32_payload(&mut self) -> Result<u32> {
        wire::read_fixed32(self.data, &mut self.pos).map_err(|e| self.enrich(e))
    }

    /// Read a fixed64 payload.
    pub fn read_fixed64_payload(&mut self) -> Result<u64> {
        wire::read_fixed64(self.data, &mut self.pos).map_err(|e| self.enrich(e))
    }

    /// Read a length-delimited byte payload.
    pub fn read_bytes_payload(&mut self) -> Result<&'a [u8]> {
        let len = self.read_delimited_len()?;
        wire::take(self.data, &mut self.pos, len).map_err(|e| self.enrich(e))
    }

    /// Read a length-delimited UTF-8 string payload.
    pub fn read_string_payload(&mut self) -> Result<&'a str> {
        let context = self.context();
        let bytes = self.read_bytes_payload()?;
        validate_utf8(bytes).ok_or(Error::InvalidUtf8(context))
    }

    /// Read and bound-check a length prefix against the enclosing region.
    fn read_delimited_len(&mut self) -> Result<usize> {
        let len = wire::read_varint(self.data, &mut self.pos).map_err(|e| self.enrich(e))?;
        let limit = self.effective_end();
        let len = usize::try_from(len).map_err(|_| Error::TruncatedOrCorrupt(self.context()))?;
        if self.pos.checked_add(len).map_or(true, |end| end > limit) {
            return Err(Error::TruncatedOrCorrupt(self.context()));
        }
        Ok(len)
    }

    /// End offset of the innermost length bound, or end of input.
    fn effective_end(&self) -> usize {
        self.bounds
            .iter()
            .rev()
            .find_map(|b| b.end)
            .unwrap_or(self.data.len())
    }

    /// True when the cursor sits at the end of the innermost length bound.
    /// Packed element runs loop on this instead of per-element headers.
    #[must_use]
    pub fn sub_item_end_reached(&self) -> bool {
        self.pos >= self.effective_end()
    }

    /// Enter the pending field's sub-item (length-delimited or group framed).
    pub fn start_sub_item(&mut self) -> Result<ReadToken> {
        if self.depth >= self.max_depth {
            return Err(Error::NestingTooDeep(self.context()));
        }
        match self.wire {
            Some(WireType::LengthDelimited) => {
                let len = self.read_delimited_len()?;
                self.bounds.push(Bound {
                    end: Some(self.pos + len),
                    group_field: None,
                    group_closed: false,
                });
            }
            Some(WireType::StartGroup) => {
                self.bounds.push(Bound {
                    end: None,
                    group_field: Some(self.field),
                    group_closed: false,
                });
            }
            Some(actual) => {
                return Err(Error::WireTypeMismatch {
                    expected: WireType::LengthDelimited,
                    actual,
                    context: self.context(),
                });
            }
            None => return Err(Error::TruncatedOrCorrupt(self.context())),
        }
        self.depth += 1;
        Ok(ReadToken {
            level: self.bounds.len(),
        })
    }

    /// Leave a sub-item entered with [`start_sub_item`](Self::start_sub_item).
    ///
    /// Unread trailing bytes inside a declared length are skipped (unknown
    /// trailing fields are discardable for schema evolution); an overshot
    /// cursor or an unclosed group is corruption.
    pub fn end_sub_item(&mut self, token: ReadToken) -> Result<()> {
        debug_assert_eq!(token.level, self.bounds.len(), "sub-item end out of order");
        let bound = self
            .bounds
            .pop()
            .ok_or(Error::TruncatedOrCorrupt(self.context()))?;
        self.depth -= 1;
        match bound.end {
            Some(end) => {
                if self.pos > end {
                    return Err(Error::TruncatedOrCorrupt(self.context()));
                }
                self.pos = end;
            }
            None => {
                if !bound.group_closed {
                    return Err(Error::TruncatedOrCorrupt(self.context()));
                }
            }
        }
        Ok(())
    }

    /// Discard the pending field's payload according to its wire type.
    pub fn skip_field(&mut self) -> Result<()> {
        match self.wire {
            Some(WireType::Varint) => {
                self.read_varint_payload()?;
            }
            Some(WireType::Fixed32) => {
                wire::take(self.data, &mut self.pos, 4).map_err(|e| self.enrich(e))?;
            }
            Some(WireType::Fixed64) => {
                wire::take(self.data, &mut self.pos, 8).map_err(|e| self.enrich(e))?;
            }
            Some(WireType::LengthDelimited) => {
                let len = self.read_delimited_len()?;
                self.pos += len;
            }
            Some(WireType::StartGroup) => {
                let field = self.field;
                self.skip_group(field, self.depth)?;
            }
            Some(WireType::EndGroup) | None => {
                return Err(Error::TruncatedOrCorrupt(self.context()));
            }
        }
        Ok(())
    }

    /// Discard the pending field, appending its verbatim bytes (header
    /// included) to `out` for extension-data round-tripping.
    pub fn skip_field_into(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let start = self.header_start;
        self.skip_field()?;
        out.extend_from_slice(&self.data[start..self.pos]);
        Ok(())
    }

    fn skip_group(&mut self, open_field: u32, depth: usize) -> Result<()> {
        if depth >= self.max_depth {
            return Err(Error::NestingTooDeep(self.context()));
        }
        loop {
            let tag = wire::read_varint32(self.data, &mut self.pos).map_err(|e| self.enrich(e))?;
            let (field, wt) = wire::split_tag(tag).map_err(|e| self.enrich(e))?;
            match wt {
                WireType::EndGroup if field == open_field => return Ok(()),
                WireType::EndGroup => return Err(Error::TruncatedOrCorrupt(self.context())),
                WireType::Varint => {
                    wire::read_varint(self.data, &mut self.pos).map_err(|e| self.enrich(e))?;
                }
                WireType::Fixed32 => {
                    wire::take(self.data, &mut self.pos, 4).map_err(|e| self.enrich(e))?;
                }
                WireType::Fixed64 => {
                    wire::take(self.data, &mut self.pos, 8).map_err(|e| self.enrich(e))?;
                }
                WireType::LengthDelimited => {
                    let len = self.read_delimited_len()?;
                    self.pos += len;
                }
                WireType::StartGroup => self.skip_group(field, depth + 1)?,
            }
        }
    }

    // ------------------------------------------------------------------
    // Object-reference table
    // ------------------------------------------------------------------

    /// Register a fully-built object, returning its identity index.
    pub fn note_object(&mut self, value: Value) -> u64 {
        self.refs.push(Some(value));
        (self.refs.len() - 1) as u64
    }

    /// Reserve an identity slot before the object exists.
    ///
    /// An object under construction may be referenced by its own content, so
    /// its slot must be assigned before any field is populated.
    pub fn reserve_slot(&mut self) -> usize {
        self.refs.push(None);
        self.refs.len() - 1
    }

    /// Fill a slot reserved with [`reserve_slot`](Self::reserve_slot).
    pub fn trap_reserved(&mut self, slot: usize, value: Value) {
        debug_assert!(self.refs[slot].is_none(), "slot trapped twice");
        self.refs[slot] = Some(value);
    }

    /// Resolve a back-reference index to its previously-noted object.
    pub fn get_reference(&self, index: u64) -> Result<Value> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.refs.get(i))
            .and_then(|slot| slot.clone())
            .ok_or(Error::TruncatedOrCorrupt(self.context()))
    }

    // ------------------------------------------------------------------
    // Collection length sentinel
    // ------------------------------------------------------------------

    /// Record a parsed length sentinel, enforcing the read limit before any
    /// allocation happens.
    pub fn set_pending_length(&mut self, claimed: u64) -> Result<()> {
        if claimed > self.max_array_length {
            return Err(Error::LengthLimitExceeded {
                claimed,
                limit: self.max_array_length,
                context: self.context(),
            });
        }
        self.pending_len = Some(claimed);
        Ok(())
    }

    /// Take the sentinel count recorded for the next repeated field.
    pub fn take_pending_length(&mut self) -> Option<u64> {
        self.pending_len.take()
    }

    /// Rewrite a wire-primitive error with the cursor's full context.
    fn enrich(&self, err: Error) -> Error {
        let fill = |c: WireContext| WireContext {
            field: self.field,
            wire_type: self.wire,
            offset: c.offset,
            depth: self.depth,
        };
        match err {
            Error::MalformedVarint(c) => Error::MalformedVarint(fill(c)),
            Error::TruncatedOrCorrupt(c) => Error::TruncatedOrCorrupt(fill(c)),
            Error::UnsupportedWireType { raw, context } => Error::UnsupportedWireType {
                raw,
                context: fill(context),
            },
            other => other,
        }
    }
}
