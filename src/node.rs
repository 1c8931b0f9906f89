// ABOUTME: Serializer nodes: the closed set of composable pieces a field plan is built from.
// ABOUTME: Decorators (nullable, collection, binding) wrap leaves and message references.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::leaf::{self, LeafKind};
use crate::message;
use crate::model::Model;
use crate::reader::ReaderState;
use crate::value::{LeafValue, Record, TypeId, Value};
use crate::wire::WireType;
use crate::writer::WriterState;

/// Callback deciding whether a field currently counts as specified.
pub type SpecifiedGet = Arc<dyn Fn(&Record) -> bool + Send + Sync>;
/// Callback informing a record that a field arrived from the stream.
pub type SpecifiedSet = Arc<dyn Fn(&mut Record, bool) + Send + Sync>;

/// Conditional-serialization hooks attached to a field.
#[derive(Clone)]
pub struct SpecifiedHook {
    pub get: SpecifiedGet,
    pub set: SpecifiedSet,
}

impl fmt::Debug for SpecifiedHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpecifiedHook")
    }
}

/// One composable serializer. The set is closed: every field plan in a
/// frozen model is a finite tree of these.
#[derive(Debug, Clone)]
pub enum SerializerNode {
    /// A primitive value written as a single payload.
    Leaf(LeafKind),
    /// A reference to another registered message type.
    Message(TypeId),
    /// A repeated field, one wire occurrence per element (or one packed run).
    Collection(Box<CollectionNode>),
    /// Absence on the wire means null rather than the implicit default.
    Nullable(Box<SerializerNode>),
}

impl SerializerNode {
    /// Whether this node merges into a previously deserialized value
    /// instead of replacing it.
    #[must_use]
    pub fn requires_old_value(&self) -> bool {
        match self {
            SerializerNode::Leaf(_) => false,
            SerializerNode::Message(_) => true,
            SerializerNode::Collection(c) => !c.overwrite,
            SerializerNode::Nullable(inner) => inner.requires_old_value(),
        }
    }

    /// Whether reading this node produces a value for the caller to store.
    /// Always true in the current set; kept as part of the node contract.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        true
    }

    /// Whether this node may decline to write anything at all.
    #[must_use]
    pub fn can_cancel_writing(&self) -> bool {
        match self {
            SerializerNode::Nullable(_) => true,
            SerializerNode::Collection(_) => true,
            SerializerNode::Leaf(_) | SerializerNode::Message(_) => false,
        }
    }
}

/// Repeated-field serializer configuration, fixed at model-build time.
#[derive(Debug, Clone)]
pub struct CollectionNode {
    pub element: SerializerNode,
    /// Elements share one length-delimited payload with no per-element headers.
    pub packed: bool,
    /// An element-count sentinel field precedes the entries.
    pub prefixed: bool,
    /// Deserializing replaces any existing list instead of appending.
    pub overwrite: bool,
    /// Each element travels inside its own wrapper sub-message (field 1),
    /// so null elements and empty inner collections stay distinguishable.
    pub wrapped: bool,
}

/// A field plan: member slot, field number, and the serializer tail.
#[derive(Debug, Clone)]
pub struct BindingNode {
    pub field: u32,
    pub slot: usize,
    pub required: bool,
    pub default: Option<LeafValue>,
    pub specified: Option<SpecifiedHook>,
    pub tail: SerializerNode,
}

/// Write one field's header(s) and payload(s). Returns false when the node
/// cancelled (null value, empty unprefixed collection).
pub(crate) fn write_node(
    model: &Model,
    w: &mut WriterState,
    field: u32,
    node: &SerializerNode,
    value: &Value,
) -> Result<bool> {
    match node {
        SerializerNode::Nullable(inner) => {
            if value.is_null() {
                return Ok(false);
            }
            write_node(model, w, field, inner, value)
        }
        SerializerNode::Leaf(kind) => {
            w.write_header(field, kind.wire_type());
            leaf::write_leaf(model, w, kind, value)?;
            Ok(true)
        }
        SerializerNode::Message(type_id) => {
            message::write_message_field(model, w, field, *type_id, value)
        }
        SerializerNode::Collection(c) => write_collection(model, w, field, c, value),
    }
}

fn write_collection(
    model: &Model,
    w: &mut WriterState,
    field: u32,
    c: &CollectionNode,
    value: &Value,
) -> Result<bool> {
    if value.is_null() {
        return Ok(false);
    }
    let list = value.as_list().ok_or(Error::TypeMismatch {
        expected: "list",
        found: value.kind_name(),
    })?;
    if c.prefixed {
        w.write_header(model.options().length_sentinel_field, WireType::Varint);
        w.write_varint(list.len() as u64);
        if list.is_empty() {
            // Zero entries still emit one empty occurrence so the reader can
            // attribute the count to this field.
            w.write_header(field, WireType::LengthDelimited);
            w.write_varint(0);
            return Ok(true);
        }
    } else if list.is_empty() {
        return Ok(false);
    }
    if c.packed {
        let kind = match &c.element {
            SerializerNode::Leaf(kind) => kind,
            _ => {
                return Err(Error::TypeMismatch {
                    expected: "packable leaf element",
                    found: "composite element",
                })
            }
        };
        w.write_header(field, WireType::LengthDelimited);
        let token = w.start_length_sub_item()?;
        for elem in list {
            leaf::write_leaf(model, w, kind, elem)?;
        }
        w.end_sub_item(token)?;
    } else if c.wrapped {
        for elem in list {
            w.write_header(field, WireType::LengthDelimited);
            let token = w.start_length_sub_item()?;
            if !elem.is_null() {
                write_node(model, w, 1, &c.element, elem)?;
            }
            w.end_sub_item(token)?;
        }
    } else {
        for elem in list {
            let wrote = write_node(model, w, field, &c.element, elem)?;
            if !wrote {
                return Err(Error::TypeMismatch {
                    expected: "non-null element",
                    found: elem.kind_name(),
                });
            }
        }
    }
    Ok(true)
}

/// Read one non-repeated occurrence of a node's payload.
pub(crate) fn read_node(
    model: &Model,
    r: &mut ReaderState<'_>,
    node: &SerializerNode,
    existing: Option<Value>,
) -> Result<Value> {
    match node {
        // Presence on the wire already implies non-null.
        SerializerNode::Nullable(inner) => read_node(model, r, inner, existing),
        SerializerNode::Leaf(kind) => leaf::read_leaf(model, r, kind, existing.as_ref()),
        SerializerNode::Message(type_id) => {
            message::read_message_field(model, r, *type_id, existing)
        }
        SerializerNode::Collection(_) => {
            // Collections are driven per wire occurrence by the message loop.
            Err(Error::TruncatedOrCorrupt(r.context()))
        }
    }
}

/// Consume one wire occurrence of a repeated field and append the resulting
/// element(s) to `list`. A packed run appends every element in the run.
pub(crate) fn read_collection_occurrence(
    model: &Model,
    r: &mut ReaderState<'_>,
    c: &CollectionNode,
    list: &mut Vec<Value>,
) -> Result<()> {
    let limit = model.options().max_array_length;
    if let (false, SerializerNode::Leaf(kind)) = (c.wrapped, &c.element) {
        // A length-delimited occurrence of a non-delimited element kind is a
        // packed run. Both packed and expanded forms are accepted on read
        // regardless of how this model writes.
        if kind.packable() && r.wire_type() == Some(WireType::LengthDelimited) {
            let token = r.start_sub_item()?;
            while !r.sub_item_end_reached() {
                list.push(leaf::read_leaf_payload(model, r, kind)?);
                check_length(r, list.len(), limit)?;
            }
            r.end_sub_item(token)?;
            return Ok(());
        }
    }
    if c.wrapped {
        let elem = read_wrapped_element(model, r, c)?;
        list.push(elem);
    } else {
        list.push(read_node(model, r, &c.element, None)?);
    }
    check_length(r, list.len(), limit)
}

fn check_length(r: &ReaderState<'_>, len: usize, limit: u64) -> Result<()> {
    if len as u64 > limit {
        return Err(Error::LengthLimitExceeded {
            claimed: len as u64,
            limit,
            context: r.context(),
        });
    }
    Ok(())
}

/// Read one wrapper sub-message holding a single element. An empty wrapper
/// is a null element; an inner collection announces itself through its
/// length sentinel even when it has no entries.
fn read_wrapped_element(
    model: &Model,
    r: &mut ReaderState<'_>,
    c: &CollectionNode,
) -> Result<Value> {
    let sentinel = model.options().length_sentinel_field;
    let token = r.start_sub_item()?;
    let mut elem = Value::Null;
    let mut claimed_count: Option<u64> = None;
    loop {
        let field = r.read_field_header()?;
        if field == 0 {
            break;
        }
        if field == sentinel {
            r.check_wire(WireType::Varint)?;
            let claimed = r.read_varint_payload()?;
            r.set_pending_length(claimed)?;
            claimed_count = Some(claimed);
            if elem.is_null() {
                if let SerializerNode::Collection(_) = &c.element {
                    let capacity = usize::try_from(claimed).unwrap_or(0);
                    elem = Value::List(Vec::with_capacity(capacity));
                }
            }
            continue;
        }
        if field == 1 {
            match &c.element {
                SerializerNode::Collection(_) if claimed_count == Some(0) => {
                    // The empty occurrence after a zero count only marks the
                    // field; the list itself was already materialized above.
                    r.check_wire(WireType::LengthDelimited)?;
                    r.skip_field()?;
                    claimed_count = None;
                }
                SerializerNode::Collection(inner) => {
                    if elem.is_null() {
                        elem = Value::List(Vec::new());
                    }
                    let found = elem.kind_name();
                    let slot = elem.as_list_mut().ok_or(Error::TypeMismatch {
                        expected: "list",
                        found,
                    })?;
                    read_collection_occurrence(model, r, inner, slot)?;
                }
                other => {
                    elem = read_node(model, r, other, None)?;
                }
            }
        } else {
            r.skip_field()?;
        }
    }
    r.end_sub_item(token)?;
    r.take_pending_length();
    Ok(elem)
}

/// Write one bound field of a record. Skips unspecified fields, null
/// optionals, and optionals equal to their declared default.
pub(crate) fn write_binding(
    model: &Model,
    w: &mut WriterState,
    b: &BindingNode,
    type_name: &str,
    rec: &Record,
) -> Result<()> {
    if let Some(hook) = &b.specified {
        if !(hook.get)(rec) {
            return Ok(());
        }
    }
    let value = rec.slots.get(b.slot).unwrap_or(&Value::Null);
    if value.is_null() {
        if b.required {
            return Err(Error::MissingRequiredField {
                type_name: type_name.to_owned(),
                field: b.field,
            });
        }
        return Ok(());
    }
    if !b.required {
        if let Some(default) = &b.default {
            if default.matches(value) {
                return Ok(());
            }
        }
    }
    write_node(model, w, b.field, &b.tail, value)?;
    Ok(())
}
