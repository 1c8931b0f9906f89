// ABOUTME: Integration tests: end-to-end round-trips through frozen models,
// ABOUTME: covering graphs, subtypes, enums, framing, limits and merge policy.

use std::rc::Rc;
use std::sync::{Arc, Mutex};

use protograph::{
    CollectionDef, DateTime, Decimal, Duration, Error, Execution, FieldDef, Framing, Guid,
    LeafKind, Model, ModelBuilder, ModelOptions, PrefixStyle, ScalarFormat, TemporalFormat,
    TypeId, Value,
};

fn i32_field() -> FieldDef {
    FieldDef::scalar(LeafKind::I32(ScalarFormat::Varint))
}

fn record_of(value: &Value) -> protograph::RecordRef {
    match value {
        Value::Record(rec) => rec.clone(),
        other => panic!("expected record, got {other:?}"),
    }
}

/// A model with one message holding every leaf kind, field numbers 1..=13.
fn all_leaves_model(execution: Execution) -> (Arc<Model>, TypeId) {
    let mut b = ModelBuilder::new();
    let t = b
        .message("Everything")
        .field(1, FieldDef::scalar(LeafKind::Bool))
        .field(2, FieldDef::scalar(LeafKind::I32(ScalarFormat::ZigZag)))
        .field(3, FieldDef::scalar(LeafKind::I64(ScalarFormat::Fixed)))
        .field(4, FieldDef::scalar(LeafKind::U32(ScalarFormat::Varint)))
        .field(5, FieldDef::scalar(LeafKind::U64(ScalarFormat::Varint)))
        .field(6, FieldDef::scalar(LeafKind::F32))
        .field(7, FieldDef::scalar(LeafKind::F64))
        .field(8, FieldDef::scalar(LeafKind::Str))
        .field(9, FieldDef::scalar(LeafKind::Bytes))
        .field(10, FieldDef::scalar(LeafKind::Decimal(Default::default())))
        .field(11, FieldDef::scalar(LeafKind::Guid(Default::default())))
        .field(
            12,
            FieldDef::scalar(LeafKind::DateTime(TemporalFormat::Timestamp)),
        )
        .field(
            13,
            FieldDef::scalar(LeafKind::Duration(TemporalFormat::LegacyTicks)),
        )
        .build()
        .unwrap();
    (b.freeze(execution).unwrap(), t)
}

fn everything_record(model: &Model, t: TypeId) -> Value {
    let rec = model.new_record(t);
    {
        let slots = &mut rec.borrow_mut().slots;
        slots[0] = Value::Bool(true);
        slots[1] = Value::I32(-12345);
        slots[2] = Value::I64(i64::MIN);
        slots[3] = Value::U32(u32::MAX);
        slots[4] = Value::U64(u64::MAX);
        slots[5] = Value::F32(1.5);
        slots[6] = Value::F64(-2.25);
        slots[7] = Value::from("héllo wörld");
        slots[8] = Value::Bytes(vec![0, 1, 2, 255]);
        slots[9] = Value::Decimal(Decimal::new(-123456789012345678901234567i128, 9));
        slots[10] = Value::Guid(Guid([0xab; 16]));
        slots[11] = Value::DateTime(DateTime::new(1_700_000_000, 123_456_700));
        slots[12] = Value::Duration(Duration::new(-3600, 500));
    }
    Value::Record(rec)
}

#[test]
fn test_every_leaf_kind_roundtrips() {
    let (model, t) = all_leaves_model(Execution::Interpreted);
    let value = everything_record(&model, t);
    let bytes = model.serialize(t, &value).unwrap();
    let back = model.deserialize(t, &bytes).unwrap();
    let (a, b) = (record_of(&value), record_of(&back));
    assert_eq!(a.borrow().slots, b.borrow().slots);
}

#[test]
fn test_interpreted_and_compiled_are_byte_identical() {
    let (interpreted, t1) = all_leaves_model(Execution::Interpreted);
    let (compiled, t2) = all_leaves_model(Execution::Compiled);
    let value = everything_record(&interpreted, t1);
    let a = interpreted.serialize(t1, &value).unwrap();
    let value = everything_record(&compiled, t2);
    let b = compiled.serialize(t2, &value).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_nested_list_shape_preservation() {
    let mut b = ModelBuilder::new();
    let t = b
        .message("Grid")
        .field(
            1,
            i32_field().repeated(CollectionDef::list().prefixed().nested(3)),
        )
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let shape = Value::List(vec![
        Value::List(vec![
            Value::List(vec![Value::I32(1), Value::I32(2)]),
            Value::Null,
            Value::List(Vec::new()),
        ]),
        Value::Null,
        Value::List(Vec::new()),
    ]);
    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = shape.clone();
    let bytes = model.serialize(t, &Value::Record(rec)).unwrap();
    let back = model.deserialize(t, &bytes).unwrap();
    assert_eq!(record_of(&back).borrow().slots[0], shape);
}

#[test]
fn test_single_level_list_roundtrips_packed_and_expanded() {
    for packed in [false, true] {
        let mut b = ModelBuilder::new();
        let def = if packed {
            i32_field().repeated(CollectionDef::list().packed())
        } else {
            i32_field().repeated(CollectionDef::list())
        };
        let t = b.message("Row").field(1, def).build().unwrap();
        let model = b.freeze(Execution::Interpreted).unwrap();

        let list = Value::List(vec![Value::I32(-1), Value::I32(0), Value::I32(300)]);
        let rec = model.new_record(t);
        rec.borrow_mut().slots[0] = list.clone();
        let bytes = model.serialize(t, &Value::Record(rec)).unwrap();
        let back = model.deserialize(t, &bytes).unwrap();
        assert_eq!(record_of(&back).borrow().slots[0], list);
    }
}

fn list_model(overwrite: bool) -> (Arc<Model>, TypeId) {
    let mut b = ModelBuilder::new();
    let def = if overwrite {
        CollectionDef::list()
    } else {
        CollectionDef::list().appending()
    };
    let t = b
        .message("Numbers")
        .field(1, i32_field().repeated(def))
        .build()
        .unwrap();
    (b.freeze(Execution::Interpreted).unwrap(), t)
}

#[test]
fn test_append_extends_existing_collection() {
    let (model, t) = list_model(false);
    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::List(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
    let existing = Value::Record(rec);

    let incoming = model.new_record(t);
    incoming.borrow_mut().slots[0] = Value::List(vec![Value::I32(7), Value::I32(8)]);
    let bytes = model.serialize(t, &Value::Record(incoming)).unwrap();

    let merged = model.deserialize_into(t, &bytes, existing).unwrap();
    assert_eq!(
        record_of(&merged).borrow().slots[0],
        Value::List(vec![
            Value::I32(1),
            Value::I32(2),
            Value::I32(3),
            Value::I32(7),
            Value::I32(8),
        ])
    );
}

#[test]
fn test_overwrite_replaces_existing_collection() {
    let (model, t) = list_model(true);
    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::List(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
    let existing = Value::Record(rec);

    let incoming = model.new_record(t);
    incoming.borrow_mut().slots[0] = Value::List(vec![Value::I32(7), Value::I32(8)]);
    let bytes = model.serialize(t, &Value::Record(incoming)).unwrap();

    let merged = model.deserialize_into(t, &bytes, existing).unwrap();
    assert_eq!(
        record_of(&merged).borrow().slots[0],
        Value::List(vec![Value::I32(7), Value::I32(8)])
    );
}

#[test]
fn test_cycle_without_reference_tracking_is_rejected() {
    let mut b = ModelBuilder::new();
    let node = b.declare("Node");
    let node = b
        .message("Node")
        .field(1, i32_field())
        .field(2, FieldDef::message(node).nullable())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let rec = model.new_record(node);
    rec.borrow_mut().slots[1] = Value::Record(rec.clone());
    let err = model.serialize(node, &Value::Record(rec)).unwrap_err();
    assert!(matches!(err, Error::RecursiveGraph { .. }));
}

#[test]
fn test_as_reference_preserves_shared_identity_and_cycles() {
    let mut b = ModelBuilder::new();
    let item = b.declare("Item");
    let item = b
        .message("Item")
        .as_reference()
        .field(1, i32_field())
        .field(2, FieldDef::message(item).nullable())
        .build()
        .unwrap();
    let holder = b
        .message("Holder")
        .field(1, FieldDef::message(item).nullable())
        .field(2, FieldDef::message(item).nullable())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    // Two items referencing each other, both reachable from the holder.
    let a = model.new_record(item);
    let c = model.new_record(item);
    a.borrow_mut().slots[0] = Value::I32(1);
    c.borrow_mut().slots[0] = Value::I32(2);
    a.borrow_mut().slots[1] = Value::Record(c.clone());
    c.borrow_mut().slots[1] = Value::Record(a.clone());

    let root = model.new_record(holder);
    root.borrow_mut().slots[0] = Value::Record(a.clone());
    root.borrow_mut().slots[1] = Value::Record(a);

    let bytes = model.serialize(holder, &Value::Record(root)).unwrap();
    let back = record_of(&model.deserialize(holder, &bytes).unwrap());

    let first = record_of(&back.borrow().slots[0]);
    let second = record_of(&back.borrow().slots[1]);
    assert!(Rc::ptr_eq(&first, &second), "shared instance must stay shared");

    let inner = record_of(&first.borrow().slots[1]);
    let cycled = record_of(&inner.borrow().slots[1]);
    assert!(Rc::ptr_eq(&first, &cycled), "cycle must close on the same instance");
    assert_eq!(inner.borrow().slots[0], Value::I32(2));
}

#[test]
fn test_custom_enum_wire_mapping() {
    let mut b = ModelBuilder::new();
    let color = b
        .enumeration("Color", &[("Red", 0, 19), ("Green", 1, 20)])
        .unwrap();
    let t = b
        .message("Paint")
        .field(1, FieldDef::scalar(LeafKind::Enum(color)))
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::Enum(0);
    let bytes = model.serialize(t, &Value::Record(rec)).unwrap();
    // Declared wire value 19 travels, not the underlying 0.
    assert_eq!(bytes, vec![0x08, 0x13]);
    let back = model.deserialize(t, &bytes).unwrap();
    assert_eq!(record_of(&back).borrow().slots[0], Value::Enum(0));

    // Unmapped underlying value on write.
    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::Enum(9);
    assert!(matches!(
        model.serialize(t, &Value::Record(rec)).unwrap_err(),
        Error::UndefinedEnumValue { value: 9, .. }
    ));

    // Undefined positive wire value on read.
    assert!(matches!(
        model.deserialize(t, &[0x08, 0x15]).unwrap_err(),
        Error::UndefinedEnumValue { value: 21, .. }
    ));

    // Undefined negative wire value (sign-extended varint) on read.
    let mut bytes = vec![0x08];
    protograph::wire::write_varint(&mut bytes, -3i64 as u64);
    assert!(matches!(
        model.deserialize(t, &bytes).unwrap_err(),
        Error::UndefinedEnumValue { value: -3, .. }
    ));
}

fn shapes_model() -> (Arc<Model>, TypeId, TypeId, TypeId) {
    let mut b = ModelBuilder::new();
    let circle = b.declare("Circle");
    let shape = b
        .message("Shape")
        .field(1, i32_field())
        .subtype(10, circle)
        .build()
        .unwrap();
    let circle = b
        .message("Circle")
        .field(1, i32_field())
        .build()
        .unwrap();
    let unrelated = b.message("Blob").build().unwrap();
    (b.freeze(Execution::Interpreted).unwrap(), shape, circle, unrelated)
}

#[test]
fn test_subtype_roundtrip() {
    let (model, shape, circle, _) = shapes_model();
    assert_eq!(model.slot_count(circle), 2);

    let rec = model.new_record(circle);
    rec.borrow_mut().slots[0] = Value::I32(4); // Shape level
    rec.borrow_mut().slots[1] = Value::I32(9); // Circle level
    let bytes = model.serialize(shape, &Value::Record(rec)).unwrap();

    let back = record_of(&model.deserialize(shape, &bytes).unwrap());
    assert_eq!(back.borrow().type_id, Some(circle));
    assert_eq!(back.borrow().slots[0], Value::I32(4));
    assert_eq!(back.borrow().slots[1], Value::I32(9));
}

#[test]
fn test_unregistered_subtype_rejected() {
    let (model, shape, _, unrelated) = shapes_model();
    let rec = model.new_record(unrelated);
    assert!(matches!(
        model.serialize(shape, &Value::Record(rec)).unwrap_err(),
        Error::UnexpectedSubtype { .. }
    ));
}

fn sentinel_model(max_array_length: u64) -> (Arc<Model>, TypeId) {
    let mut b = ModelBuilder::with_options(ModelOptions {
        max_array_length,
        ..ModelOptions::default()
    });
    let t = b
        .message("Batch")
        .field(1, i32_field().repeated(CollectionDef::list().prefixed()))
        .build()
        .unwrap();
    (b.freeze(Execution::Interpreted).unwrap(), t)
}

#[test]
fn test_length_sentinel_over_limit_fails_fast() {
    let (writer_model, wt) = sentinel_model(1_000_000);
    let (reader_model, rt) = sentinel_model(4);

    let rec = writer_model.new_record(wt);
    rec.borrow_mut().slots[0] =
        Value::List((0..5).map(Value::I32).collect());
    let bytes = writer_model.serialize(wt, &Value::Record(rec)).unwrap();

    assert!(matches!(
        reader_model.deserialize(rt, &bytes).unwrap_err(),
        Error::LengthLimitExceeded {
            claimed: 5,
            limit: 4,
            ..
        }
    ));
}

#[test]
fn test_length_sentinel_at_limit_succeeds_with_exact_count() {
    let (model, t) = sentinel_model(4);
    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::List((0..4).map(Value::I32).collect());
    let bytes = model.serialize(t, &Value::Record(rec)).unwrap();

    let back = record_of(&model.deserialize(t, &bytes).unwrap());
    let slots = back.borrow();
    let list = slots.slots[0].as_list().unwrap();
    assert_eq!(list.len(), 4);
    assert_eq!(list[3], Value::I32(3));
}

#[test]
fn test_group_framing_roundtrip() {
    let mut b = ModelBuilder::with_options(ModelOptions {
        framing: Framing::Group,
        ..ModelOptions::default()
    });
    let inner = b
        .message("Inner")
        .field(1, FieldDef::scalar(LeafKind::Str))
        .build()
        .unwrap();
    let outer = b
        .message("Outer")
        .field(1, i32_field())
        .field(2, FieldDef::message(inner).nullable())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let child = model.new_record(inner);
    child.borrow_mut().slots[0] = Value::from("grouped");
    let root = model.new_record(outer);
    root.borrow_mut().slots[0] = Value::I32(5);
    root.borrow_mut().slots[1] = Value::Record(child);

    let bytes = model.serialize(outer, &Value::Record(root)).unwrap();
    // Field 2 opens with a StartGroup marker, not a length.
    assert!(bytes.contains(&0x13));
    let back = record_of(&model.deserialize(outer, &bytes).unwrap());
    let nested = record_of(&back.borrow().slots[1]);
    assert_eq!(nested.borrow().slots[0], Value::from("grouped"));
}

#[test]
fn test_group_framed_repeated_field_roundtrips() {
    let mut b = ModelBuilder::with_options(ModelOptions {
        framing: Framing::Group,
        ..ModelOptions::default()
    });
    let inner = b
        .message("Inner")
        .field(1, i32_field().repeated(CollectionDef::list()))
        .build()
        .unwrap();
    let outer = b
        .message("Outer")
        .field(1, FieldDef::message(inner).nullable())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    // The repeated field's lookahead runs up against the group's end marker
    // and must leave it readable.
    let child = model.new_record(inner);
    child.borrow_mut().slots[0] = Value::List(vec![Value::I32(1), Value::I32(2)]);
    let root = model.new_record(outer);
    root.borrow_mut().slots[0] = Value::Record(child);

    let bytes = model.serialize(outer, &Value::Record(root)).unwrap();
    let back = record_of(&model.deserialize(outer, &bytes).unwrap());
    let nested = record_of(&back.borrow().slots[0]);
    assert_eq!(
        nested.borrow().slots[0],
        Value::List(vec![Value::I32(1), Value::I32(2)])
    );
}

#[test]
fn test_empty_prefixed_list_roundtrips_as_empty() {
    let (model, t) = sentinel_model(1_000_000);
    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::List(Vec::new());

    let bytes = model.serialize(t, &Value::Record(rec)).unwrap();
    assert!(!bytes.is_empty());
    let back = record_of(&model.deserialize(t, &bytes).unwrap());
    assert_eq!(back.borrow().slots[0], Value::List(Vec::new()));
}

#[test]
fn test_required_field_enforced_both_directions() {
    let mut b = ModelBuilder::new();
    let t = b
        .message("Strict")
        .field(1, i32_field().required())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let rec = model.new_record(t);
    assert!(matches!(
        model.serialize(t, &Value::Record(rec)).unwrap_err(),
        Error::MissingRequiredField { field: 1, .. }
    ));
    assert!(matches!(
        model.deserialize(t, &[]).unwrap_err(),
        Error::MissingRequiredField { field: 1, .. }
    ));
}

#[test]
fn test_default_applied_on_read_and_suppressed_on_write() {
    let mut b = ModelBuilder::new();
    let t = b
        .message("Defaults")
        .field(1, i32_field().default_value(Value::I32(42)))
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let back = record_of(&model.deserialize(t, &[]).unwrap());
    assert_eq!(back.borrow().slots[0], Value::I32(42));

    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::I32(42);
    assert!(model.serialize(t, &Value::Record(rec)).unwrap().is_empty());
}

#[test]
fn test_implicit_zero_default_substituted_and_suppressed() {
    let mut b = ModelBuilder::new();
    let t = b
        .message("Plain")
        .field(1, i32_field())
        .field(2, FieldDef::scalar(LeafKind::Str))
        .field(3, i32_field().nullable())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    // Zero-valued plain scalars are suppressed on write.
    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::I32(0);
    rec.borrow_mut().slots[1] = Value::from("");
    assert!(model.serialize(t, &Value::Record(rec)).unwrap().is_empty());

    // Absent plain scalars read back as zero; nullable fields stay null.
    let back = record_of(&model.deserialize(t, &[]).unwrap());
    assert_eq!(back.borrow().slots[0], Value::I32(0));
    assert_eq!(back.borrow().slots[1], Value::from(""));
    assert_eq!(back.borrow().slots[2], Value::Null);
}

#[test]
fn test_unknown_fields_roundtrip_on_extensible_types() {
    let mut b = ModelBuilder::new();
    let t = b
        .message("Evolving")
        .extensible()
        .field(1, i32_field())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    // Field 1 plus an unknown varint field 7 from a newer schema.
    let bytes = vec![0x08, 0x05, 0x38, 0x63];
    let back = model.deserialize(t, &bytes).unwrap();
    let rec = record_of(&back);
    assert_eq!(rec.borrow().extensions, vec![0x38, 0x63]);

    let rewritten = model.serialize(t, &back).unwrap();
    assert_eq!(rewritten, bytes);
}

#[test]
fn test_unknown_fields_dropped_without_extensible() {
    let mut b = ModelBuilder::new();
    let t = b.message("Fixed").field(1, i32_field()).build().unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let back = model.deserialize(t, &[0x08, 0x05, 0x38, 0x63]).unwrap();
    let rec = record_of(&back);
    assert!(rec.borrow().extensions.is_empty());
    assert_eq!(model.serialize(t, &back).unwrap(), vec![0x08, 0x05]);
}

#[test]
fn test_surrogate_substitution() {
    let mut b = ModelBuilder::new();
    let temp = b
        .message("Temperature")
        .field(1, FieldDef::scalar(LeafKind::F64))
        .build()
        .unwrap();
    let milli = b
        .message("MilliDegrees")
        .field(1, FieldDef::scalar(LeafKind::I64(ScalarFormat::ZigZag)))
        .build()
        .unwrap();
    let holder = b
        .message("Reading")
        .field(1, FieldDef::message(temp).nullable())
        .build()
        .unwrap();
    b.surrogate(
        temp,
        milli,
        Arc::new(move |value| {
            let rec = match value {
                Value::Record(rec) => rec.clone(),
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "record",
                        found: other.kind_name(),
                    })
                }
            };
            let degrees = match rec.borrow().slots[0] {
                Value::F64(d) => d,
                _ => 0.0,
            };
            let out = protograph::Record::new(milli, 1).into_ref();
            out.borrow_mut().slots[0] = Value::I64((degrees * 1000.0) as i64);
            Ok(Value::Record(out))
        }),
        Arc::new(move |value| {
            let rec = match value {
                Value::Record(rec) => rec.clone(),
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "record",
                        found: other.kind_name(),
                    })
                }
            };
            let millis = match rec.borrow().slots[0] {
                Value::I64(m) => m,
                _ => 0,
            };
            let out = protograph::Record::new(temp, 1).into_ref();
            out.borrow_mut().slots[0] = Value::F64(millis as f64 / 1000.0);
            Ok(Value::Record(out))
        }),
    );
    let model = b.freeze(Execution::Interpreted).unwrap();

    let reading = model.new_record(temp);
    reading.borrow_mut().slots[0] = Value::F64(21.5);
    let root = model.new_record(holder);
    root.borrow_mut().slots[0] = Value::Record(reading);

    let bytes = model.serialize(holder, &Value::Record(root)).unwrap();
    let back = record_of(&model.deserialize(holder, &bytes).unwrap());
    let inner = record_of(&back.borrow().slots[0]);
    assert_eq!(inner.borrow().type_id, Some(temp));
    assert_eq!(inner.borrow().slots[0], Value::F64(21.5));
}

#[test]
fn test_lifecycle_callbacks_fire_in_order() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let push = |tag: &'static str| {
        let log = log.clone();
        move |_rec: &protograph::RecordRef| -> protograph::Result<()> {
            log.lock().unwrap().push(tag);
            Ok(())
        }
    };
    let mut b = ModelBuilder::new();
    let t = b
        .message("Tracked")
        .field(1, i32_field())
        .before_serialize(Arc::new(push("before_write")))
        .after_serialize(Arc::new(push("after_write")))
        .before_deserialize(Arc::new(push("before_read")))
        .after_deserialize(Arc::new(push("after_read")))
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let rec = model.new_record(t);
    rec.borrow_mut().slots[0] = Value::I32(1);
    let bytes = model.serialize(t, &Value::Record(rec)).unwrap();
    model.deserialize(t, &bytes).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["before_write", "after_write", "before_read", "after_read"]
    );
}

#[test]
fn test_factory_construction_seeds_new_records() {
    let mut b = ModelBuilder::new();
    let t = b
        .message("Seeded")
        .field(1, i32_field())
        .field(2, i32_field())
        .construct_with(Arc::new(|| protograph::Record {
            type_id: None,
            slots: vec![Value::Null, Value::I32(77)],
            extensions: Vec::new(),
        }))
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    // The stream carries only field 1; the factory's seed for field 2 stays.
    let back = record_of(&model.deserialize(t, &[0x08, 0x05]).unwrap());
    assert_eq!(back.borrow().slots[0], Value::I32(5));
    assert_eq!(back.borrow().slots[1], Value::I32(77));
    assert_eq!(back.borrow().type_id, Some(t));
}

#[test]
fn test_freeze_validator_rejects_finished_model() {
    let mut b = ModelBuilder::new();
    let _ = b.message("T").field(1, i32_field()).build().unwrap();
    let err = b
        .freeze_with_validator(Execution::Interpreted, |model| {
            model
                .type_by_name("Missing")
                .map(|_| ())
                .ok_or_else(|| Error::UnknownType("Missing".to_owned()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::UnknownType(_)));
}

#[test]
fn test_stream_of_mixed_items() {
    let mut b = ModelBuilder::new();
    let a = b.message("A").field(1, i32_field()).build().unwrap();
    let c = b
        .message("C")
        .field(1, FieldDef::scalar(LeafKind::Str))
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let style = PrefixStyle::Base128 { field: 1 };
    let mut out = Vec::new();
    let ra = model.new_record(a);
    ra.borrow_mut().slots[0] = Value::I32(7);
    model
        .serialize_length_prefixed(a, &Value::Record(ra), style, &mut out)
        .unwrap();
    let rc = model.new_record(c);
    rc.borrow_mut().slots[0] = Value::from("x");
    model
        .serialize_length_prefixed(
            c,
            &Value::Record(rc),
            PrefixStyle::Base128 { field: 2 },
            &mut out,
        )
        .unwrap();

    let items = model
        .deserialize_items(&out, style, |field| match field {
            1 => Some(a),
            2 => Some(c),
            _ => None,
        })
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(record_of(&items[0]).borrow().slots[0], Value::I32(7));
    assert_eq!(record_of(&items[1]).borrow().slots[0], Value::from("x"));
}

#[test]
fn test_truncated_input_rejected() {
    let (model, t) = all_leaves_model(Execution::Interpreted);
    let value = everything_record(&model, t);
    let bytes = model.serialize(t, &value).unwrap();
    let err = model.deserialize(t, &bytes[..bytes.len() - 1]).unwrap_err();
    assert!(matches!(
        err,
        Error::TruncatedOrCorrupt(_) | Error::MalformedVarint(_)
    ));
}

#[test]
fn test_deep_nesting_rejected() {
    let mut b = ModelBuilder::with_options(ModelOptions {
        max_depth: 4,
        ..ModelOptions::default()
    });
    let node = b.declare("Node");
    let node = b
        .message("Node")
        .field(1, FieldDef::message(node).nullable())
        .build()
        .unwrap();
    let model = b.freeze(Execution::Interpreted).unwrap();

    let mut current = model.new_record(node);
    for _ in 0..10 {
        let parent = model.new_record(node);
        parent.borrow_mut().slots[0] = Value::Record(current);
        current = parent;
    }
    assert!(matches!(
        model.serialize(node, &Value::Record(current)).unwrap_err(),
        Error::NestingTooDeep(_)
    ));
}
