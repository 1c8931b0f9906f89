// ABOUTME: The write half of the wire state machine: buffered output, backpatched
// ABOUTME: length prefixes or group framing, and write-side identity tracking.

use crate::error::{Error, Result};
use crate::value::{Record, RecordRef};
use crate::wire::{self, WireType, MAX_VARINT_LEN};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Opaque handle pairing a `start_sub_item` with its `end_sub_item`.
#[derive(Debug)]
pub struct WriteToken {
    level: usize,
}

#[derive(Debug)]
enum Frame {
    /// Length-delimited framing: a varint length is spliced in at `len_pos`
    /// once the payload size is known.
    Length { len_pos: usize },
    /// Group framing: an EndGroup header for `field` closes the frame.
    Group { field: u32 },
}

/// Per-call write cursor producing one serialized document.
///
/// Output is buffered in memory so nested length prefixes can be backpatched;
/// the finished buffer is handed to the caller (or flushed to a writer) in
/// one piece. Created per serialize invocation, never shared.
pub struct WriterState {
    buf: Vec<u8>,
    frames: Vec<Frame>,
    depth: usize,
    max_depth: usize,
    /// Identity index per noted object, keyed by the `Rc` allocation address.
    ref_index: HashMap<*const RefCell<Record>, u64>,
    /// Clones of every noted object. Holding them keeps the allocations (and
    /// so the pointer keys above) alive and unique for the whole call.
    ref_hold: Vec<RecordRef>,
    /// Objects currently being written without reference tracking, for cycle
    /// detection.
    in_progress: Vec<*const RefCell<Record>>,
}

impl WriterState {
    /// Create a writer with the model's depth guard.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            buf: Vec::new(),
            frames: Vec::new(),
            depth: 0,
            max_depth,
            ref_index: HashMap::new(),
            ref_hold: Vec::new(),
            in_progress: Vec::new(),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a field header for `(field, wire)`.
    #[inline]
    pub fn write_header(&mut self, field: u32, wire: WireType) {
        wire::write_header(&mut self.buf, field, wire);
    }

    /// Write a varint payload.
    #[inline]
    pub fn write_varint(&mut self, value: u64) {
        wire::write_varint(&mut self.buf, value);
    }

    /// Write a fixed32 payload.
    #[inline]
    pub fn write_fixed32(&mut self, value: u32) {
        wire::write_fixed32(&mut self.buf, value);
    }

    /// Write a fixed64 payload.
    #[inline]
    pub fn write_fixed64(&mut self, value: u64) {
        wire::write_fixed64(&mut self.buf, value);
    }

    /// Write raw bytes with no framing.
    #[inline]
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a length-delimited payload: `varint(len) ++ bytes`.
    pub fn write_length_delimited(&mut self, bytes: &[u8]) {
        wire::write_varint(&mut self.buf, bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Open a length-delimited sub-item. The caller has already written the
    /// field header; the length prefix is reserved here and backpatched at
    /// [`end_sub_item`](Self::end_sub_item).
    pub fn start_length_sub_item(&mut self) -> Result<WriteToken> {
        self.check_depth()?;
        self.frames.push(Frame::Length {
            len_pos: self.buf.len(),
        });
        self.depth += 1;
        Ok(WriteToken {
            level: self.frames.len(),
        })
    }

    /// Open a group-framed sub-item. The caller has already written the
    /// StartGroup header; the matching EndGroup is emitted at
    /// [`end_sub_item`](Self::end_sub_item).
    pub fn start_group_sub_item(&mut self, field: u32) -> Result<WriteToken> {
        self.check_depth()?;
        self.frames.push(Frame::Group { field });
        self.depth += 1;
        Ok(WriteToken {
            level: self.frames.len(),
        })
    }

    /// Close the innermost sub-item: backpatch the length prefix or emit the
    /// EndGroup header.
    pub fn end_sub_item(&mut self, token: WriteToken) -> Result<()> {
        debug_assert_eq!(token.level, self.frames.len(), "sub-item end out of order");
        let frame = self.frames.pop().ok_or(Error::UnbalancedSubItems)?;
        self.depth -= 1;
        match frame {
            Frame::Length { len_pos } => {
                let payload_len = (self.buf.len() - len_pos) as u64;
                let mut scratch = [0u8; MAX_VARINT_LEN];
                let n = wire::encode_varint(payload_len, &mut scratch);
                self.buf.splice(len_pos..len_pos, scratch[..n].iter().copied());
            }
            Frame::Group { field } => {
                wire::write_header(&mut self.buf, field, WireType::EndGroup);
            }
        }
        Ok(())
    }

    fn check_depth(&self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(Error::NestingTooDeep(crate::error::WireContext {
                offset: self.buf.len(),
                depth: self.depth,
                ..Default::default()
            }));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Object-reference table
    // ------------------------------------------------------------------

    /// Look up the identity index assigned to `record`, if it was noted.
    #[must_use]
    pub fn try_get_reference(&self, record: &RecordRef) -> Option<u64> {
        self.ref_index.get(&Rc::as_ptr(record)).copied()
    }

    /// Assign the next identity index to `record`.
    ///
    /// Called before the record's content is written, so the record may
    /// legally reference itself through its own fields.
    pub fn note_object(&mut self, record: &RecordRef) -> u64 {
        let index = self.ref_hold.len() as u64;
        self.ref_index.insert(Rc::as_ptr(record), index);
        self.ref_hold.push(Rc::clone(record));
        index
    }

    /// Returns true if `record` is currently being written higher up the
    /// stack without reference tracking (a cycle).
    #[must_use]
    pub fn is_in_progress(&self, record: &RecordRef) -> bool {
        self.in_progress.contains(&Rc::as_ptr(record))
    }

    /// Mark `record` as being written.
    pub fn push_in_progress(&mut self, record: &RecordRef) {
        self.in_progress.push(Rc::as_ptr(record));
    }

    /// Unmark the most recently pushed record.
    pub fn pop_in_progress(&mut self) {
        self.in_progress.pop();
    }

    /// Finish the write and take the buffer.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.frames.is_empty() {
            return Err(Error::UnbalancedSubItems);
        }
        Ok(self.buf)
    }
}
