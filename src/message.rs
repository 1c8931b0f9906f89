// ABOUTME: Message serializer: record bodies, subtype chains, reference wrappers,
// ABOUTME: surrogates and the field-dispatch read loop.

use crate::error::{Error, Result};
use crate::model::{Construction, FieldTarget, Framing, LifecycleFn, Model};
use crate::node::{self, SerializerNode};
use crate::reader::ReaderState;
use crate::value::{Record, RecordRef, TypeId, Value};
use crate::wire::WireType;
use crate::writer::{WriteToken, WriterState};

/// Write a field header and open the matching sub-item for the model's
/// configured framing.
fn begin_item(w: &mut WriterState, field: u32, framing: Framing) -> Result<WriteToken> {
    match framing {
        Framing::LengthDelimited => {
            w.write_header(field, WireType::LengthDelimited);
            w.start_length_sub_item()
        }
        Framing::Group => {
            w.write_header(field, WireType::StartGroup);
            w.start_group_sub_item(field)
        }
    }
}

/// Write one message-typed field occurrence. Returns false for null.
pub(crate) fn write_message_field(
    model: &Model,
    w: &mut WriterState,
    field: u32,
    declared: TypeId,
    value: &Value,
) -> Result<bool> {
    if value.is_null() {
        return Ok(false);
    }
    if let Some(surrogate) = model.surrogate(declared) {
        let converted = (surrogate.to_surrogate)(value)?;
        return write_message_field(model, w, field, surrogate.target, &converted);
    }
    let rec = match value {
        Value::Record(rec) => rec,
        other => {
            return Err(Error::TypeMismatch {
                expected: "record",
                found: other.kind_name(),
            })
        }
    };
    let framing = model.options().framing;
    if model.as_reference(declared) {
        let token = begin_item(w, field, framing)?;
        if let Some(index) = w.try_get_reference(rec) {
            w.write_header(1, WireType::Varint);
            w.write_varint(index);
        } else {
            // The identity index is assigned before the payload so the
            // object's own content can refer back to it.
            w.note_object(rec);
            let inner = begin_item(w, 2, framing)?;
            write_record_body(model, w, declared, rec)?;
            w.end_sub_item(inner)?;
        }
        w.end_sub_item(token)?;
    } else {
        if w.is_in_progress(rec) {
            return Err(Error::RecursiveGraph {
                type_name: model.type_name(declared).to_owned(),
            });
        }
        w.push_in_progress(rec);
        let token = begin_item(w, field, framing)?;
        let body = write_record_body(model, w, declared, rec);
        w.pop_in_progress();
        body?;
        w.end_sub_item(token)?;
    }
    Ok(true)
}

/// Write a record's fields (no framing): the subtype wrapper chain from the
/// declared type down to the concrete one, each level's own fields, then any
/// captured extension data.
pub(crate) fn write_record_body(
    model: &Model,
    w: &mut WriterState,
    declared: TypeId,
    rec: &RecordRef,
) -> Result<()> {
    let hooks = model.callbacks(declared);
    run_hook(hooks.before_serialize.as_ref(), rec)?;
    {
        let borrowed = rec.borrow();
        let concrete = borrowed.type_id.unwrap_or(declared);
        let path = model.subtype_path(declared, concrete)?;
        write_level(model, w, declared, &path, &borrowed)?;
        if !borrowed.extensions.is_empty() {
            w.write_raw(&borrowed.extensions);
        }
    }
    run_hook(hooks.after_serialize.as_ref(), rec)
}

fn run_hook(hook: Option<&LifecycleFn>, rec: &RecordRef) -> Result<()> {
    match hook {
        Some(h) => (h)(rec),
        None => Ok(()),
    }
}

fn write_level(
    model: &Model,
    w: &mut WriterState,
    level: TypeId,
    path: &[(u32, TypeId)],
    rec: &Record,
) -> Result<()> {
    if let Some(((field, next), rest)) = path.split_first() {
        let token = begin_item(w, *field, model.options().framing)?;
        write_level(model, w, *next, rest, rec)?;
        w.end_sub_item(token)?;
    }
    model.write_level_fields(w, level, rec)
}

/// Serialize a root object with no outer framing. End of input marks the
/// end of the root message.
pub(crate) fn write_root(
    model: &Model,
    w: &mut WriterState,
    root: TypeId,
    value: &Value,
) -> Result<()> {
    if let Some(surrogate) = model.surrogate(root) {
        let converted = (surrogate.to_surrogate)(value)?;
        return write_root(model, w, surrogate.target, &converted);
    }
    let rec = match value {
        Value::Record(rec) => rec,
        other => {
            return Err(Error::TypeMismatch {
                expected: "record",
                found: other.kind_name(),
            })
        }
    };
    w.push_in_progress(rec);
    let body = write_record_body(model, w, root, rec);
    w.pop_in_progress();
    body
}

/// Read one message-typed field occurrence, merging into `existing` if given.
pub(crate) fn read_message_field(
    model: &Model,
    r: &mut ReaderState<'_>,
    declared: TypeId,
    mut existing: Option<Value>,
) -> Result<Value> {
    if let Some(surrogate) = model.surrogate(declared) {
        let target = surrogate.target;
        let from = surrogate.from_surrogate.clone();
        let raw = read_message_field(model, r, target, None)?;
        return (from)(&raw);
    }
    if model.as_reference(declared) {
        let token = r.start_sub_item()?;
        let mut out = Value::Null;
        loop {
            match r.read_field_header()? {
                0 => break,
                1 => {
                    r.check_wire(WireType::Varint)?;
                    let index = r.read_varint_payload()?;
                    out = r.get_reference(index)?;
                }
                2 => {
                    // Reserve the identity slot and expose the record before
                    // its fields are read, so self-references resolve.
                    let slot = r.reserve_slot();
                    let rec = ensure_record(model, existing.take(), declared);
                    r.trap_reserved(slot, Value::Record(rec.clone()));
                    let hooks = model.callbacks(declared);
                    run_hook(hooks.before_deserialize.as_ref(), &rec)?;
                    let inner = r.start_sub_item()?;
                    read_record_fields(model, r, declared, &rec)?;
                    r.end_sub_item(inner)?;
                    run_hook(hooks.after_deserialize.as_ref(), &rec)?;
                    out = Value::Record(rec);
                }
                _ => r.skip_field()?,
            }
        }
        r.end_sub_item(token)?;
        Ok(out)
    } else {
        let rec = ensure_record(model, existing, declared);
        let hooks = model.callbacks(declared);
        run_hook(hooks.before_deserialize.as_ref(), &rec)?;
        let token = r.start_sub_item()?;
        read_record_fields(model, r, declared, &rec)?;
        r.end_sub_item(token)?;
        run_hook(hooks.after_deserialize.as_ref(), &rec)?;
        Ok(Value::Record(rec))
    }
}

/// Read a root object: fields run to end of input.
pub(crate) fn read_root(
    model: &Model,
    r: &mut ReaderState<'_>,
    root: TypeId,
    existing: Option<Value>,
) -> Result<Value> {
    if let Some(surrogate) = model.surrogate(root) {
        let target = surrogate.target;
        let from = surrogate.from_surrogate.clone();
        let raw = read_root(model, r, target, None)?;
        return (from)(&raw);
    }
    let rec = ensure_record(model, existing, root);
    let hooks = model.callbacks(root);
    run_hook(hooks.before_deserialize.as_ref(), &rec)?;
    read_record_fields(model, r, root, &rec)?;
    run_hook(hooks.after_deserialize.as_ref(), &rec)?;
    Ok(Value::Record(rec))
}

/// Reuse a compatible existing record for merge semantics, or start fresh.
fn ensure_record(model: &Model, existing: Option<Value>, declared: TypeId) -> RecordRef {
    if let Some(Value::Record(rec)) = existing {
        let compatible = {
            let borrowed = rec.borrow();
            borrowed.type_id.map_or(false, |current| {
                model.is_ancestor_or_same(declared, current)
                    || model.is_ancestor_or_same(current, declared)
            })
        };
        if compatible {
            let needed = model.slot_count(declared);
            let mut borrowed = rec.borrow_mut();
            if borrowed.slots.len() < needed {
                borrowed.slots.resize(needed, Value::Null);
            }
            drop(borrowed);
            return rec;
        }
    }
    fresh_record(model, declared)
}

/// Construct a new instance per the type's configured strategy.
fn fresh_record(model: &Model, declared: TypeId) -> RecordRef {
    let needed = model.slot_count(declared);
    match model.construction(declared) {
        Construction::Factory(factory) => {
            let mut rec = (factory)();
            if rec.type_id.is_none() {
                rec.type_id = Some(declared);
            }
            if rec.slots.len() < needed {
                rec.slots.resize(needed, Value::Null);
            }
            rec.into_ref()
        }
        Construction::Slots => Record::new(declared, needed).into_ref(),
    }
}

/// Move a record down the inheritance chain when a subtype marker arrives.
/// Markers may arrive after base-level fields; the record is widened in
/// place so its identity is preserved.
fn upgrade_record(model: &Model, rec: &RecordRef, derived: TypeId) -> Result<()> {
    let mut borrowed = rec.borrow_mut();
    let current = borrowed.type_id.unwrap_or(derived);
    if current == derived || model.is_ancestor_or_same(derived, current) {
        return Ok(());
    }
    if model.is_ancestor_or_same(current, derived) {
        borrowed.type_id = Some(derived);
        let needed = model.slot_count(derived);
        if borrowed.slots.len() < needed {
            borrowed.slots.resize(needed, Value::Null);
        }
        return Ok(());
    }
    Err(Error::UnexpectedSubtype {
        declared: model.type_name(current).to_owned(),
        actual: model.type_name(derived).to_owned(),
    })
}

/// The field-dispatch loop for one level of one record.
pub(crate) fn read_record_fields(
    model: &Model,
    r: &mut ReaderState<'_>,
    level: TypeId,
    rec: &RecordRef,
) -> Result<()> {
    let sentinel = model.options().length_sentinel_field;
    let bindings = model.bindings(level);
    let mut seen = vec![false; bindings.len()];
    loop {
        let field = r.read_field_header()?;
        if field == 0 {
            break;
        }
        if field == sentinel {
            r.check_wire(WireType::Varint)?;
            let claimed = r.read_varint_payload()?;
            r.set_pending_length(claimed)?;
            continue;
        }
        match model.lookup(level, field) {
            Some(FieldTarget::Subtype(derived)) => {
                upgrade_record(model, rec, derived)?;
                let token = r.start_sub_item()?;
                read_record_fields(model, r, derived, rec)?;
                r.end_sub_item(token)?;
            }
            Some(FieldTarget::Binding(index)) => {
                read_binding_occurrence(model, r, level, index, rec, &mut seen[index])?;
            }
            None => {
                if model.extensible(level) {
                    let mut captured = Vec::new();
                    r.skip_field_into(&mut captured)?;
                    rec.borrow_mut().extensions.extend_from_slice(&captured);
                } else {
                    r.skip_field()?;
                }
            }
        }
    }
    // Required fields must have arrived at this level; declared defaults fill
    // anything still absent.
    for (binding, was_seen) in bindings.iter().zip(&seen) {
        if *was_seen {
            continue;
        }
        if binding.required {
            return Err(Error::MissingRequiredField {
                type_name: model.type_name(level).to_owned(),
                field: binding.field,
            });
        }
        if let Some(default) = &binding.default {
            let mut borrowed = rec.borrow_mut();
            if borrowed.slots[binding.slot].is_null() {
                borrowed.slots[binding.slot] = default.to_value();
            }
        }
    }
    Ok(())
}

fn strip_nullable(node: &SerializerNode) -> &SerializerNode {
    match node {
        SerializerNode::Nullable(inner) => strip_nullable(inner),
        other => other,
    }
}

fn read_binding_occurrence(
    model: &Model,
    r: &mut ReaderState<'_>,
    level: TypeId,
    index: usize,
    rec: &RecordRef,
    seen: &mut bool,
) -> Result<()> {
    let binding = &model.bindings(level)[index];
    match strip_nullable(&binding.tail) {
        SerializerNode::Collection(c) => {
            let pending = r.take_pending_length();
            if c.prefixed && pending == Some(0) && !*seen {
                // A zero count arrives as one empty occurrence; it marks an
                // empty list, not a null field.
                r.check_wire(WireType::LengthDelimited)?;
                r.skip_field()?;
                let mut borrowed = rec.borrow_mut();
                let slot = &mut borrowed.slots[binding.slot];
                if c.overwrite || !matches!(slot, Value::List(_)) {
                    *slot = Value::List(Vec::new());
                }
            } else {
                // Take the list out of the slot so no borrow is held while
                // elements (which may alias this record) are read.
                let mut list = {
                    let mut borrowed = rec.borrow_mut();
                    let slot = &mut borrowed.slots[binding.slot];
                    if !*seen && c.overwrite {
                        *slot = Value::Null;
                        Vec::new()
                    } else if let Value::List(existing) = std::mem::take(slot) {
                        existing
                    } else {
                        Vec::new()
                    }
                };
                if !*seen {
                    if let Some(count) = pending {
                        list.reserve(usize::try_from(count).unwrap_or(0));
                    }
                }
                node::read_collection_occurrence(model, r, c, &mut list)?;
                // Consecutive occurrences of the same field are consumed here,
                // skipping re-dispatch.
                while r.try_read_same_field(binding.field)? {
                    node::read_collection_occurrence(model, r, c, &mut list)?;
                }
                rec.borrow_mut().slots[binding.slot] = Value::List(list);
            }
        }
        tail => {
            let existing = if tail.requires_old_value() {
                let taken = std::mem::take(&mut rec.borrow_mut().slots[binding.slot]);
                (!taken.is_null()).then_some(taken)
            } else {
                None
            };
            let value = node::read_node(model, r, tail, existing)?;
            rec.borrow_mut().slots[binding.slot] = value;
        }
    }
    if let Some(hook) = &binding.specified {
        (hook.set)(&mut rec.borrow_mut(), true);
    }
    *seen = true;
    Ok(())
}
