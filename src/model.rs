// ABOUTME: ModelBuilder and the frozen Model: type/enum registration, build-time
// ABOUTME: validation, field-plan lowering and the public serialize entry points.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::compile::{self, CompiledPlan};
use crate::error::{Error, Result, WireContext};
use crate::leaf::LeafKind;
use crate::message;
use crate::node::{BindingNode, CollectionNode, SerializerNode, SpecifiedHook};
use crate::reader::ReaderState;
use crate::value::{EnumId, LeafValue, Record, RecordRef, TypeId, Value};
use crate::wire::{self, WireType};
use crate::writer::WriterState;

/// Framing used for sub-objects: a length prefix backpatched on write, or
/// protobuf group markers which need no length at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    LengthDelimited,
    Group,
}

/// How frozen field plans execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// Walk the serializer-node tree per field.
    #[default]
    Interpreted,
    /// Pre-lower every field plan to closures at freeze time. Output is
    /// byte-identical to the interpreter.
    Compiled,
}

/// Tunable limits and wire conventions, fixed when the model is frozen.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Maximum sub-item nesting depth on both read and write.
    pub max_depth: usize,
    /// Maximum element count accepted for any one collection on read.
    pub max_array_length: u64,
    /// Sub-object framing convention.
    pub framing: Framing,
    /// Reserved field number carrying collection element counts.
    pub length_sentinel_field: u32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            max_depth: 512,
            max_array_length: 1_000_000,
            framing: Framing::LengthDelimited,
            length_sentinel_field: 16383,
        }
    }
}

/// Conversion callbacks applied at a message boundary.
pub type SurrogateFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Serialize a type through a stand-in type registered in the same model.
#[derive(Clone)]
pub(crate) struct SurrogateDef {
    pub target: TypeId,
    pub to_surrogate: SurrogateFn,
    pub from_surrogate: SurrogateFn,
}

/// Lifecycle hook invoked as a record crosses a serialization boundary.
pub type LifecycleFn = Arc<dyn Fn(&RecordRef) -> Result<()> + Send + Sync>;

/// Optional per-type lifecycle callbacks. Each fires when a record of the
/// type becomes the current message, nested or root alike.
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub before_serialize: Option<LifecycleFn>,
    pub after_serialize: Option<LifecycleFn>,
    pub before_deserialize: Option<LifecycleFn>,
    pub after_deserialize: Option<LifecycleFn>,
}

/// A factory producing the initial record when the stream introduces a new
/// instance during deserialization.
pub type FactoryFn = Arc<dyn Fn() -> Record + Send + Sync>;

/// How new instances are created on read, fixed per type at build time.
#[derive(Clone, Default)]
pub enum Construction {
    /// An all-null slot vector sized for the type.
    #[default]
    Slots,
    /// A caller-supplied factory. Missing slots are padded with null and the
    /// type id is filled in when the factory leaves it unset.
    Factory(FactoryFn),
}

impl fmt::Debug for Construction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Construction::Slots => f.write_str("Slots"),
            Construction::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// What a field holds before decoration.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Leaf(LeafKind),
    Message(TypeId),
}

/// Repeated-field configuration for a [`FieldDef`].
#[derive(Debug, Clone)]
pub struct CollectionDef {
    /// Pack self-delimiting elements into one payload.
    pub packed: bool,
    /// Emit an element-count sentinel before the entries.
    pub prefixed: bool,
    /// Replace any existing list on deserialize instead of appending.
    pub overwrite: bool,
    /// List nesting depth: 1 = flat list, 2 = list of lists, and so on.
    pub nesting: u32,
    /// Array rank. Only rank 1 is expressible on this wire format.
    pub rank: u32,
}

impl CollectionDef {
    /// A flat, overwriting, unpacked list.
    #[must_use]
    pub fn list() -> Self {
        Self {
            packed: false,
            prefixed: false,
            overwrite: true,
            nesting: 1,
            rank: 1,
        }
    }

    #[must_use]
    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    #[must_use]
    pub fn prefixed(mut self) -> Self {
        self.prefixed = true;
        self
    }

    /// Appending merge policy: deserialized elements extend the existing list.
    #[must_use]
    pub fn appending(mut self) -> Self {
        self.overwrite = false;
        self
    }

    /// Nest to `depth` list levels. Depths above 1 force prefixed framing so
    /// null and empty inner lists stay distinguishable.
    #[must_use]
    pub fn nested(mut self, depth: u32) -> Self {
        self.nesting = depth;
        self
    }

    #[must_use]
    pub fn multi_dimensional(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }
}

/// Declaration of one field, before the model lowers it to a serializer plan.
///
/// Member slots are assigned automatically in declaration order, ancestors
/// first; [`Model::slot_of`] recovers the assignment.
#[derive(Debug, Clone)]
pub struct FieldDef {
    kind: FieldKind,
    required: bool,
    nullable: bool,
    default: Option<Value>,
    specified: Option<SpecifiedHook>,
    collection: Option<CollectionDef>,
}

impl FieldDef {
    #[must_use]
    pub fn scalar(kind: LeafKind) -> Self {
        Self {
            kind: FieldKind::Leaf(kind),
            required: false,
            nullable: false,
            default: None,
            specified: None,
            collection: None,
        }
    }

    #[must_use]
    pub fn message(type_id: TypeId) -> Self {
        Self {
            kind: FieldKind::Message(type_id),
            ..Self::scalar(LeafKind::Bool)
        }
    }

    /// The field must be present on both read and write.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Absence on the wire deserializes to null, and null cancels writing.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Value applied on read when the field is absent, and suppressed on
    /// write when the member equals it. Must be a leaf value.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Conditional-serialization hooks.
    #[must_use]
    pub fn specified(mut self, hook: SpecifiedHook) -> Self {
        self.specified = Some(hook);
        self
    }

    /// Make this a repeated field.
    #[must_use]
    pub fn repeated(mut self, collection: CollectionDef) -> Self {
        self.collection = Some(collection);
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct TypeBuilder {
    name: String,
    fields: Vec<(u32, FieldDef)>,
    subtypes: Vec<(u32, TypeId)>,
    base: Option<TypeId>,
    as_reference: bool,
    extensible: bool,
    surrogate: Option<SurrogateDef>,
    callbacks: Callbacks,
    construction: Construction,
}

struct EnumBuilder {
    name: String,
    write_map: HashMap<i64, i64>,
    read_map: HashMap<i64, i64>,
}

/// Mutable registration surface. Freezing consumes the builder, so no
/// registration can happen after a model exists.
pub struct ModelBuilder {
    options: ModelOptions,
    types: Vec<TypeBuilder>,
    names: HashMap<String, TypeId>,
    enums: Vec<EnumBuilder>,
}

impl ModelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ModelOptions::default())
    }

    #[must_use]
    pub fn with_options(options: ModelOptions) -> Self {
        Self {
            options,
            types: Vec::new(),
            names: HashMap::new(),
            enums: Vec::new(),
        }
    }

    /// Reserve a type id by name without configuring it yet, so types can
    /// reference each other in any declaration order.
    pub fn declare(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.names.get(name) {
            return *id;
        }
        let id = TypeId(self.types.len());
        self.types.push(TypeBuilder {
            name: name.to_owned(),
            fields: Vec::new(),
            subtypes: Vec::new(),
            base: None,
            as_reference: false,
            extensible: false,
            surrogate: None,
            callbacks: Callbacks::default(),
            construction: Construction::default(),
        });
        self.names.insert(name.to_owned(), id);
        id
    }

    /// Open (or reopen) a message type for configuration.
    pub fn message(&mut self, name: &str) -> MessageBuilder<'_> {
        let id = self.declare(name);
        MessageBuilder {
            builder: self,
            id,
            error: None,
        }
    }

    /// Register an enum descriptor as `(name, underlying value, wire value)`
    /// entries. Duplicate names or underlying values are ambiguous; a
    /// duplicate wire value is legal and the last registration wins on read.
    pub fn enumeration(&mut self, name: &str, entries: &[(&str, i64, i64)]) -> Result<EnumId> {
        let mut names_seen: HashMap<&str, ()> = HashMap::new();
        let mut write_map = HashMap::new();
        let mut read_map = HashMap::new();
        for (entry_name, host, wire_value) in entries {
            if names_seen.insert(entry_name, ()).is_some() {
                return Err(Error::AmbiguousEnumMapping {
                    enum_name: name.to_owned(),
                    detail: format!("duplicate member name {entry_name}"),
                });
            }
            if write_map.insert(*host, *wire_value).is_some() {
                return Err(Error::AmbiguousEnumMapping {
                    enum_name: name.to_owned(),
                    detail: format!("duplicate underlying value {host}"),
                });
            }
            read_map.insert(*wire_value, *host);
        }
        let id = EnumId(self.enums.len());
        self.enums.push(EnumBuilder {
            name: name.to_owned(),
            write_map,
            read_map,
        });
        Ok(id)
    }

    /// Serialize `type_id` through `target`, converting with the callbacks.
    pub fn surrogate(
        &mut self,
        type_id: TypeId,
        target: TypeId,
        to_surrogate: SurrogateFn,
        from_surrogate: SurrogateFn,
    ) {
        self.types[type_id.0].surrogate = Some(SurrogateDef {
            target,
            to_surrogate,
            from_surrogate,
        });
    }

    /// Validate everything and produce the immutable model.
    pub fn freeze(self, execution: Execution) -> Result<Arc<Model>> {
        Ok(Arc::new(self.freeze_inner(execution)?))
    }

    /// Freeze, then run a caller-supplied validation pass over the finished
    /// model before it is shared.
    pub fn freeze_with_validator<F>(self, execution: Execution, validate: F) -> Result<Arc<Model>>
    where
        F: FnOnce(&Model) -> Result<()>,
    {
        let model = self.freeze_inner(execution)?;
        validate(&model)?;
        Ok(Arc::new(model))
    }

    fn freeze_inner(self, execution: Execution) -> Result<Model> {
        if self.types.is_empty() {
            return Err(Error::ModelAlreadyFinalized);
        }
        let sentinel = self.options.length_sentinel_field;
        for t in &self.types {
            validate_type(t, sentinel)?;
        }
        validate_inheritance(&self.types)?;

        // Slots: declaration order, ancestors first. Chain depth ordering
        // guarantees a base is lowered before any of its subtypes.
        let depths: Vec<usize> = (0..self.types.len())
            .map(|i| chain_depth(&self.types, i))
            .collect();
        let mut order: Vec<usize> = (0..self.types.len()).collect();
        order.sort_by_key(|&i| depths[i]);

        let mut slot_counts = vec![0usize; self.types.len()];
        let mut slot_maps: Vec<HashMap<u32, usize>> = vec![HashMap::new(); self.types.len()];
        for &i in &order {
            let t = &self.types[i];
            let mut next = t.base.map_or(0, |b| slot_counts[b.0]);
            for (field, _) in &t.fields {
                slot_maps[i].insert(*field, next);
                next += 1;
            }
            slot_counts[i] = next;
        }

        let mut runtimes = Vec::with_capacity(self.types.len());
        for (i, t) in self.types.iter().enumerate() {
            let mut bindings = Vec::with_capacity(t.fields.len());
            for (field, def) in &t.fields {
                bindings.push(lower_field(*field, slot_maps[i][field], def, &t.name)?);
            }
            let mut entries: Vec<(u32, FieldTarget)> = bindings
                .iter()
                .enumerate()
                .map(|(index, b)| (b.field, FieldTarget::Binding(index)))
                .collect();
            entries.extend(
                t.subtypes
                    .iter()
                    .map(|(field, derived)| (*field, FieldTarget::Subtype(*derived))),
            );
            let dispatch = Dispatch::build(&entries);
            runtimes.push(TypeRuntime {
                name: t.name.clone(),
                base: t.base,
                slot_count: slot_counts[i],
                bindings,
                dispatch,
                subtypes: t.subtypes.clone(),
                as_reference: t.as_reference,
                extensible: t.extensible,
                surrogate: t.surrogate.clone(),
                callbacks: t.callbacks.clone(),
                construction: t.construction.clone(),
                compiled: None,
            });
        }

        let mut model = Model {
            options: self.options,
            types: runtimes,
            enums: self
                .enums
                .into_iter()
                .map(|e| EnumRuntime {
                    name: e.name,
                    write_map: e.write_map,
                    read_map: e.read_map,
                })
                .collect(),
            execution,
        };
        if execution == Execution::Compiled {
            let plans: Vec<CompiledPlan> = model
                .types
                .iter()
                .map(|t| compile::compile_type(&t.name, &t.bindings))
                .collect();
            for (t, plan) in model.types.iter_mut().zip(plans) {
                t.compiled = Some(plan);
            }
        }
        Ok(model)
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-type configuration surface returned by [`ModelBuilder::message`].
/// The first configuration error is reported at [`build`](Self::build).
pub struct MessageBuilder<'a> {
    builder: &'a mut ModelBuilder,
    id: TypeId,
    error: Option<Error>,
}

impl MessageBuilder<'_> {
    #[must_use]
    pub fn field(self, number: u32, def: FieldDef) -> Self {
        self.builder.types[self.id.0].fields.push((number, def));
        self
    }

    /// Track this type by identity: repeated occurrences of one instance are
    /// written once and back-referenced after that, and cycles become legal.
    #[must_use]
    pub fn as_reference(self) -> Self {
        self.builder.types[self.id.0].as_reference = true;
        self
    }

    /// Capture unknown fields verbatim and re-emit them on write.
    #[must_use]
    pub fn extensible(self) -> Self {
        self.builder.types[self.id.0].extensible = true;
        self
    }

    /// Invoke `hook` on a record of this type just before its fields are
    /// written.
    #[must_use]
    pub fn before_serialize(self, hook: LifecycleFn) -> Self {
        self.builder.types[self.id.0].callbacks.before_serialize = Some(hook);
        self
    }

    /// Invoke `hook` after a record of this type has been written.
    #[must_use]
    pub fn after_serialize(self, hook: LifecycleFn) -> Self {
        self.builder.types[self.id.0].callbacks.after_serialize = Some(hook);
        self
    }

    /// Invoke `hook` on a freshly constructed record before its fields are
    /// read from the stream.
    #[must_use]
    pub fn before_deserialize(self, hook: LifecycleFn) -> Self {
        self.builder.types[self.id.0].callbacks.before_deserialize = Some(hook);
        self
    }

    /// Invoke `hook` once a record of this type has been fully read.
    #[must_use]
    pub fn after_deserialize(self, hook: LifecycleFn) -> Self {
        self.builder.types[self.id.0].callbacks.after_deserialize = Some(hook);
        self
    }

    /// Create new instances through `factory` during deserialization instead
    /// of an all-null record.
    #[must_use]
    pub fn construct_with(self, factory: FactoryFn) -> Self {
        self.builder.types[self.id.0].construction = Construction::Factory(factory);
        self
    }

    /// Register `derived` as a subtype of this type, discriminated by
    /// `number` in this type's field namespace.
    #[must_use]
    pub fn subtype(mut self, number: u32, derived: TypeId) -> Self {
        {
            let d = &mut self.builder.types[derived.0];
            if let Some(prior) = d.base {
                if prior != self.id && self.error.is_none() {
                    self.error = Some(Error::UnsupportedCombination {
                        type_name: d.name.clone(),
                        detail: "more than one base type".to_owned(),
                    });
                }
            }
            d.base = Some(self.id);
        }
        self.builder.types[self.id.0].subtypes.push((number, derived));
        self
    }

    pub fn build(self) -> Result<TypeId> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.id),
        }
    }
}

fn validate_type(t: &TypeBuilder, sentinel: u32) -> Result<()> {
    let mut numbers: HashMap<u32, ()> = HashMap::new();
    for number in t
        .fields
        .iter()
        .map(|(n, _)| *n)
        .chain(t.subtypes.iter().map(|(n, _)| *n))
    {
        if number == sentinel {
            return Err(Error::SentinelCollision {
                type_name: t.name.clone(),
                field: number,
            });
        }
        if numbers.insert(number, ()).is_some() {
            return Err(Error::DuplicateFieldNumber {
                type_name: t.name.clone(),
                field: number,
            });
        }
    }
    for (number, def) in &t.fields {
        if def.required && def.default.is_some() {
            return Err(Error::ConflictingRequiredDefault {
                type_name: t.name.clone(),
                field: *number,
            });
        }
        if let Some(default) = &def.default {
            if matches!(default, Value::List(_) | Value::Record(_) | Value::Null) {
                return Err(Error::UnsupportedShape {
                    type_name: t.name.clone(),
                    field: *number,
                    detail: "default must be a leaf value".to_owned(),
                });
            }
        }
        if let Some(c) = &def.collection {
            if c.rank > 1 {
                return Err(Error::UnsupportedShape {
                    type_name: t.name.clone(),
                    field: *number,
                    detail: format!("rank-{} arrays are not expressible", c.rank),
                });
            }
            if c.nesting == 0 {
                return Err(Error::UnsupportedShape {
                    type_name: t.name.clone(),
                    field: *number,
                    detail: "collection nesting of zero".to_owned(),
                });
            }
        }
    }
    Ok(())
}

fn validate_inheritance(types: &[TypeBuilder]) -> Result<()> {
    for (i, t) in types.iter().enumerate() {
        let in_chain = t.base.is_some() || !t.subtypes.is_empty();
        if t.extensible && in_chain {
            return Err(Error::UnsupportedCombination {
                type_name: t.name.clone(),
                detail: "extensible types cannot participate in inheritance".to_owned(),
            });
        }
        // Base-link cycles would never terminate slot assignment.
        let mut seen = 0usize;
        let mut cursor = t.base;
        while let Some(b) = cursor {
            seen += 1;
            if seen > types.len() {
                return Err(Error::UnsupportedCombination {
                    type_name: types[i].name.clone(),
                    detail: "cyclic base-type chain".to_owned(),
                });
            }
            cursor = types[b.0].base;
        }
    }
    Ok(())
}

fn chain_depth(types: &[TypeBuilder], index: usize) -> usize {
    let mut depth = 0;
    let mut cursor = types[index].base;
    while let Some(b) = cursor {
        depth += 1;
        cursor = types[b.0].base;
        if depth > types.len() {
            break;
        }
    }
    depth
}

/// Lower one field declaration to its serializer-node plan.
fn lower_field(field: u32, slot: usize, def: &FieldDef, type_name: &str) -> Result<BindingNode> {
    let base = match &def.kind {
        FieldKind::Leaf(kind) => SerializerNode::Leaf(*kind),
        FieldKind::Message(t) => SerializerNode::Message(*t),
    };
    let tail = match &def.collection {
        None => {
            if def.nullable {
                SerializerNode::Nullable(Box::new(base))
            } else {
                base
            }
        }
        Some(c) => {
            let element_packable = matches!(&base, SerializerNode::Leaf(kind) if kind.packable());
            if c.packed && (!element_packable || def.nullable) {
                return Err(Error::UnsupportedShape {
                    type_name: type_name.to_owned(),
                    field,
                    detail: "packed encoding needs non-null self-delimiting elements".to_owned(),
                });
            }
            // Nullable elements travel in wrapper sub-messages.
            let mut node = SerializerNode::Collection(Box::new(CollectionNode {
                element: base,
                packed: c.packed,
                prefixed: c.prefixed || c.nesting > 1,
                overwrite: c.overwrite,
                wrapped: def.nullable,
            }));
            for _ in 1..c.nesting {
                node = SerializerNode::Collection(Box::new(CollectionNode {
                    element: node,
                    packed: false,
                    prefixed: true,
                    overwrite: c.overwrite,
                    wrapped: true,
                }));
            }
            node
        }
    };
    let default = match &def.default {
        Some(v) => Some(LeafValue::from_value(v).ok_or_else(|| Error::UnsupportedShape {
            type_name: type_name.to_owned(),
            field,
            detail: "default must be a leaf value".to_owned(),
        })?),
        None => implicit_leaf_default(def),
    };
    Ok(BindingNode {
        field,
        slot,
        required: def.required,
        default,
        specified: def.specified.clone(),
        tail,
    })
}

/// The implicit zero default for plain optional scalars: absent on the wire
/// reads back as zero, and a zero value is suppressed on write. Enum fields
/// are excluded because their custom mapping makes the zero point meaningful.
fn implicit_leaf_default(def: &FieldDef) -> Option<LeafValue> {
    if def.nullable || def.required || def.collection.is_some() || def.specified.is_some() {
        return None;
    }
    match &def.kind {
        FieldKind::Leaf(kind) if !matches!(kind, LeafKind::Enum(_)) => {
            LeafValue::from_value(&kind.implicit_default())
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Frozen model
// ---------------------------------------------------------------------------

/// Where a field number leads during the read dispatch.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FieldTarget {
    Binding(usize),
    Subtype(TypeId),
}

/// Field-number jump table: a contiguous-range direct table when the numbers
/// are dense, a sorted list with binary search otherwise.
#[derive(Debug)]
pub(crate) struct Dispatch {
    base: u32,
    table: Vec<Option<FieldTarget>>,
    sparse: Vec<(u32, FieldTarget)>,
}

impl Dispatch {
    fn build(entries: &[(u32, FieldTarget)]) -> Self {
        let mut sorted = entries.to_vec();
        sorted.sort_by_key(|(n, _)| *n);
        if let (Some((lo, _)), Some((hi, _))) = (sorted.first(), sorted.last()) {
            let span = (hi - lo) as usize + 1;
            if span <= sorted.len().saturating_mul(4).max(16) {
                let mut table = vec![None; span];
                for (n, target) in &sorted {
                    table[(n - lo) as usize] = Some(*target);
                }
                return Self {
                    base: *lo,
                    table,
                    sparse: Vec::new(),
                };
            }
        }
        Self {
            base: 0,
            table: Vec::new(),
            sparse: sorted,
        }
    }

    fn lookup(&self, field: u32) -> Option<FieldTarget> {
        if !self.table.is_empty() {
            let index = field.checked_sub(self.base)? as usize;
            return self.table.get(index).copied().flatten();
        }
        self.sparse
            .binary_search_by_key(&field, |(n, _)| *n)
            .ok()
            .map(|i| self.sparse[i].1)
    }
}

pub(crate) struct TypeRuntime {
    name: String,
    base: Option<TypeId>,
    slot_count: usize,
    bindings: Vec<BindingNode>,
    dispatch: Dispatch,
    subtypes: Vec<(u32, TypeId)>,
    as_reference: bool,
    extensible: bool,
    surrogate: Option<SurrogateDef>,
    callbacks: Callbacks,
    construction: Construction,
    compiled: Option<CompiledPlan>,
}

pub(crate) struct EnumRuntime {
    name: String,
    write_map: HashMap<i64, i64>,
    read_map: HashMap<i64, i64>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model").finish_non_exhaustive()
    }
}

/// An immutable, frozen serialization model.
pub struct Model {
    options: ModelOptions,
    types: Vec<TypeRuntime>,
    enums: Vec<EnumRuntime>,
    execution: Execution,
}

impl Model {
    #[must_use]
    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    #[must_use]
    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Look up a registered type by name.
    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(TypeId)
    }

    #[must_use]
    pub fn type_name(&self, type_id: TypeId) -> &str {
        &self.types[type_id.0].name
    }

    /// Total member-slot count for instances of `type_id` (own fields plus
    /// every ancestor's).
    #[must_use]
    pub fn slot_count(&self, type_id: TypeId) -> usize {
        self.types[type_id.0].slot_count
    }

    /// The slot assigned to `field` on `type_id`'s own level.
    #[must_use]
    pub fn slot_of(&self, type_id: TypeId, field: u32) -> Option<usize> {
        self.types[type_id.0]
            .bindings
            .iter()
            .find(|b| b.field == field)
            .map(|b| b.slot)
    }

    /// Construct an empty record of `type_id` with all slots null.
    #[must_use]
    pub fn new_record(&self, type_id: TypeId) -> RecordRef {
        Record::new(type_id, self.slot_count(type_id)).into_ref()
    }

    pub(crate) fn bindings(&self, type_id: TypeId) -> &[BindingNode] {
        &self.types[type_id.0].bindings
    }

    pub(crate) fn lookup(&self, type_id: TypeId, field: u32) -> Option<FieldTarget> {
        self.types[type_id.0].dispatch.lookup(field)
    }

    pub(crate) fn as_reference(&self, type_id: TypeId) -> bool {
        self.types[type_id.0].as_reference
    }

    pub(crate) fn extensible(&self, type_id: TypeId) -> bool {
        self.types[type_id.0].extensible
    }

    pub(crate) fn surrogate(&self, type_id: TypeId) -> Option<&SurrogateDef> {
        self.types[type_id.0].surrogate.as_ref()
    }

    pub(crate) fn callbacks(&self, type_id: TypeId) -> &Callbacks {
        &self.types[type_id.0].callbacks
    }

    pub(crate) fn construction(&self, type_id: TypeId) -> &Construction {
        &self.types[type_id.0].construction
    }

    pub(crate) fn is_ancestor_or_same(&self, ancestor: TypeId, type_id: TypeId) -> bool {
        let mut cursor = Some(type_id);
        while let Some(t) = cursor {
            if t == ancestor {
                return true;
            }
            cursor = self.types[t.0].base;
        }
        false
    }

    /// The subtype-field path from `declared` down to `concrete`, empty when
    /// they are the same type.
    pub(crate) fn subtype_path(
        &self,
        declared: TypeId,
        concrete: TypeId,
    ) -> Result<Vec<(u32, TypeId)>> {
        if declared == concrete {
            return Ok(Vec::new());
        }
        let mut chain = Vec::new();
        let mut cursor = Some(concrete);
        while let Some(t) = cursor {
            chain.push(t);
            if t == declared {
                break;
            }
            cursor = self.types[t.0].base;
        }
        if chain.last() != Some(&declared) {
            return Err(Error::UnexpectedSubtype {
                declared: self.type_name(declared).to_owned(),
                actual: self.type_name(concrete).to_owned(),
            });
        }
        chain.reverse();
        let mut path = Vec::with_capacity(chain.len() - 1);
        for pair in chain.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            let link = self.types[parent.0]
                .subtypes
                .iter()
                .find(|(_, t)| *t == child)
                .ok_or_else(|| Error::UnexpectedSubtype {
                    declared: self.type_name(declared).to_owned(),
                    actual: self.type_name(concrete).to_owned(),
                })?;
            path.push(*link);
        }
        Ok(path)
    }

    /// Write one type level's own fields, through the compiled plan when the
    /// model was frozen with [`Execution::Compiled`].
    pub(crate) fn write_level_fields(
        &self,
        w: &mut WriterState,
        level: TypeId,
        rec: &Record,
    ) -> Result<()> {
        let t = &self.types[level.0];
        if let Some(plan) = &t.compiled {
            return plan.write_fields(self, w, rec);
        }
        for binding in &t.bindings {
            crate::node::write_binding(self, w, binding, &t.name, rec)?;
        }
        Ok(())
    }

    pub(crate) fn enum_wire_value(&self, id: EnumId, host: i64) -> Result<i64> {
        let e = &self.enums[id.0];
        e.write_map
            .get(&host)
            .copied()
            .ok_or_else(|| Error::UndefinedEnumValue {
                enum_name: e.name.clone(),
                value: host,
            })
    }

    pub(crate) fn enum_host_value(&self, id: EnumId, wire_value: i64) -> Result<i64> {
        let e = &self.enums[id.0];
        e.read_map
            .get(&wire_value)
            .copied()
            .ok_or_else(|| Error::UndefinedEnumValue {
                enum_name: e.name.clone(),
                value: wire_value,
            })
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Reject a `TypeId` minted by a different model.
    fn check_root(&self, root: TypeId) -> Result<()> {
        if root.0 >= self.types.len() {
            return Err(Error::UnknownType(format!(
                "type id {} is not registered in this model",
                root.0
            )));
        }
        Ok(())
    }

    /// Serialize a root object of `root` to bytes. Root messages carry no
    /// outer framing.
    pub fn serialize(&self, root: TypeId, value: &Value) -> Result<Vec<u8>> {
        self.check_root(root)?;
        let mut w = WriterState::new(self.options.max_depth);
        message::write_root(self, &mut w, root, value)?;
        w.into_bytes()
    }

    /// Serialize into an [`io::Write`], returning the byte count.
    pub fn serialize_to_writer<W: io::Write>(
        &self,
        root: TypeId,
        value: &Value,
        out: &mut W,
    ) -> Result<usize> {
        let bytes = self.serialize(root, value)?;
        out.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Deserialize a root object of `root` from the whole input.
    pub fn deserialize(&self, root: TypeId, data: &[u8]) -> Result<Value> {
        self.check_root(root)?;
        let mut r = ReaderState::new(data, &self.options);
        message::read_root(self, &mut r, root, None)
    }

    /// Deserialize, merging into an existing root value. Collections follow
    /// their declared overwrite/append policy; message members merge in place.
    pub fn deserialize_into(&self, root: TypeId, data: &[u8], existing: Value) -> Result<Value> {
        self.check_root(root)?;
        let mut r = ReaderState::new(data, &self.options);
        message::read_root(self, &mut r, root, Some(existing))
    }

    // ------------------------------------------------------------------
    // Length-prefixed streams
    // ------------------------------------------------------------------

    /// Append one length-prefixed item to `out`.
    pub fn serialize_length_prefixed(
        &self,
        root: TypeId,
        value: &Value,
        style: PrefixStyle,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let body = self.serialize(root, value)?;
        match style {
            PrefixStyle::Varint => wire::write_varint(out, body.len() as u64),
            PrefixStyle::Fixed32 => {
                let len = u32::try_from(body.len()).map_err(|_| Error::LengthLimitExceeded {
                    claimed: body.len() as u64,
                    limit: u64::from(u32::MAX),
                    context: WireContext::default(),
                })?;
                wire::write_fixed32(out, len);
            }
            PrefixStyle::Base128 { field } => {
                wire::write_header(out, field, WireType::LengthDelimited);
                wire::write_varint(out, body.len() as u64);
            }
        }
        out.extend_from_slice(&body);
        Ok(())
    }

    /// Read one length-prefixed item, returning the value and the bytes
    /// consumed. With [`PrefixStyle::Base128`], a stream item tagged with a
    /// different field number than the style's is a root-type mismatch.
    pub fn deserialize_length_prefixed(
        &self,
        root: TypeId,
        data: &[u8],
        style: PrefixStyle,
    ) -> Result<(Value, usize)> {
        let mut pos = 0usize;
        if let PrefixStyle::Base128 { field } = style {
            let tag = wire::read_varint32(data, &mut pos)?;
            let (found, wt) = wire::split_tag(tag)?;
            if found != field || wt != WireType::LengthDelimited {
                return Err(Error::RootTypeMismatch {
                    expected: self.type_name(root).to_owned(),
                    found: format!("stream field {found}"),
                });
            }
        }
        let body = self.item_body(data, &mut pos, style)?;
        let value = self.deserialize(root, body)?;
        Ok((value, pos + body.len()))
    }

    /// Read every item of a length-prefixed stream. `resolve` maps the item's
    /// field number to a type; returning `None` skips the item. Styles
    /// without a field number resolve through field 1.
    pub fn deserialize_items<F>(
        &self,
        data: &[u8],
        style: PrefixStyle,
        resolve: F,
    ) -> Result<Vec<Value>>
    where
        F: Fn(u32) -> Option<TypeId>,
    {
        let mut items = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let field = match style {
                PrefixStyle::Base128 { .. } => {
                    let tag = wire::read_varint32(data, &mut pos)?;
                    let (field, wt) = wire::split_tag(tag)?;
                    if wt != WireType::LengthDelimited {
                        return Err(Error::UnsupportedWireType {
                            raw: wt as u8,
                            context: WireContext {
                                field,
                                wire_type: Some(wt),
                                offset: pos,
                                depth: 0,
                            },
                        });
                    }
                    field
                }
                _ => 1,
            };
            let body = self.item_body(data, &mut pos, style)?;
            pos += body.len();
            if let Some(type_id) = resolve(field) {
                items.push(self.deserialize(type_id, body)?);
            }
        }
        Ok(items)
    }

    /// Parse one length prefix and slice the item body.
    fn item_body<'a>(
        &self,
        data: &'a [u8],
        pos: &mut usize,
        style: PrefixStyle,
    ) -> Result<&'a [u8]> {
        let len = match style {
            PrefixStyle::Fixed32 => u64::from(wire::read_fixed32(data, pos)?),
            PrefixStyle::Varint | PrefixStyle::Base128 { .. } => wire::read_varint(data, pos)?,
        };
        let len = usize::try_from(len)
            .ok()
            .filter(|l| pos.checked_add(*l).map_or(false, |end| end <= data.len()))
            .ok_or(Error::TruncatedOrCorrupt(WireContext {
                offset: *pos,
                ..WireContext::default()
            }))?;
        Ok(&data[*pos..*pos + len])
    }

    #[cfg(test)]
    pub(crate) fn empty_for_tests() -> Model {
        Model {
            options: ModelOptions::default(),
            types: Vec::new(),
            enums: Vec::new(),
            execution: Execution::Interpreted,
        }
    }
}

/// How items in a length-prefixed stream are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixStyle {
    /// Varint byte length before each item.
    Varint,
    /// Little-endian fixed 4-byte length before each item.
    Fixed32,
    /// Each item framed as a tagged length-delimited field, so heterogeneous
    /// streams can dispatch on the field number.
    Base128 { field: u32 },
}
