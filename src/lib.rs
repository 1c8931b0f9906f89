// ABOUTME: Protobuf-compatible binary object serialization driven by a runtime type model.
// ABOUTME: Adds object-graph references, prefixed array framing, enum mapping and subtypes.

//! # protograph
//!
//! A protobuf-compatible binary serialization engine driven by a runtime type
//! model instead of derive macros or generated code. Message types, fields,
//! enums and inheritance chains are registered on a [`ModelBuilder`] at
//! startup; freezing produces an immutable [`Model`] whose serialize and
//! deserialize entry points operate on dynamic [`Value`] trees.
//!
//! On top of the plain protobuf wire format the engine adds:
//!
//! - **As-reference object graphs**: types tracked by identity are written
//!   once and back-referenced afterwards, so shared instances and cycles
//!   round-trip.
//! - **Length-prefixed collection framing**: an optional element-count
//!   sentinel before repeated entries, enforced against a read limit before
//!   any allocation happens.
//! - **Custom enum mapping**: declared wire values decoupled from the
//!   underlying host values.
//! - **Subtype polymorphism**: inheritance chains encoded as nested
//!   discriminator sub-messages, readable in any field order.
//!
//! ## Quick Start
//!
//! ```rust
//! use protograph::{
//!     Execution, FieldDef, LeafKind, ModelBuilder, ScalarFormat, Value,
//! };
//!
//! # fn main() -> protograph::Result<()> {
//! let mut b = ModelBuilder::new();
//! let point = b
//!     .message("Point")
//!     .field(1, FieldDef::scalar(LeafKind::I32(ScalarFormat::Varint)))
//!     .field(2, FieldDef::scalar(LeafKind::I32(ScalarFormat::Varint)))
//!     .build()?;
//! let model = b.freeze(Execution::Interpreted)?;
//!
//! let rec = model.new_record(point);
//! rec.borrow_mut().slots[0] = Value::I32(10);
//! rec.borrow_mut().slots[1] = Value::I32(20);
//!
//! let bytes = model.serialize(point, &Value::Record(rec))?;
//! assert_eq!(bytes, vec![0x08, 0x0a, 0x10, 0x14]);
//!
//! let back = model.deserialize(point, &bytes)?;
//! # let _ = back;
//! # Ok(())
//! # }
//! ```
//!
//! ## Resource Limits
//!
//! Defaults, configurable through [`ModelOptions`]:
//! - Maximum nesting depth: 512
//! - Maximum collection size: 1,000,000 elements
//! - Length sentinel field number: 16383

pub mod compile;
pub mod error;
pub mod leaf;
pub mod message;
pub mod model;
pub mod node;
pub mod reader;
pub mod value;
pub mod wire;
pub mod writer;

// Re-export commonly used items at the crate root
pub use error::{Error, Result, WireContext};
pub use leaf::{DecimalFormat, GuidFormat, LeafKind, ScalarFormat, TemporalFormat};
pub use model::{
    CollectionDef, Construction, Execution, FactoryFn, FieldDef, FieldKind, Framing, LifecycleFn,
    MessageBuilder, Model, ModelBuilder, ModelOptions, PrefixStyle, SurrogateFn,
};
pub use node::{SpecifiedGet, SpecifiedHook, SpecifiedSet};
pub use value::{
    DateTime, Decimal, Duration, EnumId, Guid, LeafValue, Record, RecordRef, TypeId, Value,
};
pub use wire::WireType;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_start_shape() {
        let mut b = ModelBuilder::new();
        let point = b
            .message("Point")
            .field(1, FieldDef::scalar(LeafKind::I32(ScalarFormat::Varint)))
            .field(2, FieldDef::scalar(LeafKind::I32(ScalarFormat::Varint)))
            .build()
            .unwrap();
        let model = b.freeze(Execution::Interpreted).unwrap();

        let rec = model.new_record(point);
        rec.borrow_mut().slots[0] = Value::I32(10);
        rec.borrow_mut().slots[1] = Value::I32(20);
        let bytes = model.serialize(point, &Value::Record(rec)).unwrap();
        assert_eq!(bytes, vec![0x08, 0x0a, 0x10, 0x14]);
    }

    #[test]
    fn test_model_is_shareable_across_threads() {
        let mut b = ModelBuilder::new();
        let point = b
            .message("Point")
            .field(1, FieldDef::scalar(LeafKind::I32(ScalarFormat::Varint)))
            .build()
            .unwrap();
        let model = b.freeze(Execution::Compiled).unwrap();

        let handles: Vec<_> = (1..5)
            .map(|i| {
                let model = model.clone();
                std::thread::spawn(move || {
                    let rec = model.new_record(point);
                    rec.borrow_mut().slots[0] = Value::I32(i);
                    model.serialize(point, &Value::Record(rec)).unwrap()
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), vec![0x08, (i + 1) as u8]);
        }
    }
}
