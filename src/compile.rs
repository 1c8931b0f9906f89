// ABOUTME: Precompiled execution strategy: field plans lowered to closures at
// ABOUTME: freeze time, with headers pre-encoded for plain leaf fields.

use crate::error::{Error, Result};
use crate::model::Model;
use crate::node::{self, BindingNode, SerializerNode};
use crate::value::Value;
use crate::wire;
use crate::writer::WriterState;

type WriteFn =
    Box<dyn Fn(&Model, &mut WriterState, &crate::value::Record) -> Result<()> + Send + Sync>;

/// One type's field plans, lowered to closures. Output is byte-identical to
/// the interpreted walk over the same bindings.
pub(crate) struct CompiledPlan {
    fields: Vec<WriteFn>,
}

impl CompiledPlan {
    pub(crate) fn write_fields(
        &self,
        model: &Model,
        w: &mut WriterState,
        rec: &crate::value::Record,
    ) -> Result<()> {
        for field in &self.fields {
            (field)(model, w, rec)?;
        }
        Ok(())
    }
}

pub(crate) fn compile_type(type_name: &str, bindings: &[BindingNode]) -> CompiledPlan {
    CompiledPlan {
        fields: bindings
            .iter()
            .map(|b| compile_binding(type_name, b))
            .collect(),
    }
}

fn compile_binding(type_name: &str, binding: &BindingNode) -> WriteFn {
    // Fast path: a plain leaf with no hooks gets its header bytes resolved
    // now instead of re-encoded per write.
    if let SerializerNode::Leaf(kind) = &binding.tail {
        if binding.specified.is_none() && binding.default.is_none() {
            let mut header = Vec::new();
            wire::write_header(&mut header, binding.field, kind.wire_type());
            let kind = *kind;
            let slot = binding.slot;
            let required = binding.required;
            let field = binding.field;
            let type_name = type_name.to_owned();
            return Box::new(move |model, w, rec| {
                let value = rec.slots.get(slot).unwrap_or(&Value::Null);
                if value.is_null() {
                    if required {
                        return Err(Error::MissingRequiredField {
                            type_name: type_name.clone(),
                            field,
                        });
                    }
                    return Ok(());
                }
                w.write_raw(&header);
                crate::leaf::write_leaf(model, w, &kind, value)
            });
        }
    }
    let binding = binding.clone();
    let type_name = type_name.to_owned();
    Box::new(move |model, w, rec| node::write_binding(model, w, &binding, &type_name, rec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::{LeafKind, ScalarFormat};

    #[test]
    fn test_fast_path_matches_interpreter() {
        let binding = BindingNode {
            field: 3,
            slot: 0,
            required: false,
            default: None,
            specified: None,
            tail: SerializerNode::Leaf(LeafKind::I32(ScalarFormat::ZigZag)),
        };
        let model = Model::empty_for_tests();
        let rec = crate::value::Record {
            type_id: None,
            slots: vec![Value::I32(-40)],
            extensions: Vec::new(),
        };

        let mut interpreted = WriterState::new(16);
        node::write_binding(&model, &mut interpreted, &binding, "T", &rec).unwrap();
        let plan = compile_type("T", std::slice::from_ref(&binding));
        let mut compiled = WriterState::new(16);
        plan.write_fields(&model, &mut compiled, &rec).unwrap();
        assert_eq!(
            interpreted.into_bytes().unwrap(),
            compiled.into_bytes().unwrap()
        );
    }

    #[test]
    fn test_required_null_fails() {
        let binding = BindingNode {
            field: 1,
            slot: 0,
            required: true,
            default: None,
            specified: None,
            tail: SerializerNode::Leaf(LeafKind::Str),
        };
        let model = Model::empty_for_tests();
        let rec = crate::value::Record {
            type_id: None,
            slots: vec![Value::Null],
            extensions: Vec::new(),
        };
        let plan = compile_type("T", std::slice::from_ref(&binding));
        let mut w = WriterState::new(16);
        let err = plan.write_fields(&model, &mut w, &rec).unwrap_err();
        assert!(matches!(err, Error::MissingRequiredField { field: 1, .. }));
    }
}
