//! Compiles `Entity @id == <id|?param> { ... }` into an update instruction.
//!
//! Fields are assigned plainly. Linked relations change only through
//! `@add`/`@del`, owned relations never change from the owner's side: the
//! child moves by assigning its `@parent`.
use std::collections::HashSet;

use tracing::trace;

use crate::datatype::{Arg, Args, OtherHasher, Value};
use crate::dsl::{Node, Target, UpdateEntry, parse_update};
use crate::error::{DslError, FcError, Result};
use crate::instruction::{
    Accessed, InputValue, Instruction, PropertyKey, Values, field_value, ref_value, ref_values, semantic,
};
use crate::refs::{LinkOp, RefId, RefLink};
use crate::schema::{ID, Property, RelationKind, Schema};

pub fn compile(schema: &Schema, dsl: &str, args: &Args) -> Result<Instruction> {
    let ast = parse_update(dsl)?;
    let mut errors = Vec::new();
    let Some(entity) = schema.get(&ast.entity) else {
        return Err(FcError::Semantic(vec![DslError::UnknownEntity(ast.entity)]));
    };
    let ref_id = target_ref(entity.name(), &ast.target, args).unwrap_or_else(|e| {
        errors.push(e);
        RefId::new()
    });

    let mut values: Values = Vec::new();
    let mut accessed = Accessed::new();
    accessed.insert(PropertyKey::new(entity.name(), ID));
    let mut seen: HashSet<&str, OtherHasher> = HashSet::default();

    for (name, entry) in &ast.body {
        let key = PropertyKey::new(entity.name(), name);
        let target = key.to_string();
        let Some(property) = entity.get(name) else {
            errors.push(DslError::UnknownProperty {
                entity: entity.name().to_owned(),
                property: name.clone(),
            });
            continue;
        };
        if !seen.insert(name.as_str()) {
            errors.push(DslError::InvalidValue {
                target,
                reason: "entry given more than once".into(),
            });
            continue;
        }
        if !property.is_input() {
            errors.push(DslError::NotInput(target));
            continue;
        }
        accessed.insert(key);

        let compiled = match (property, entry) {
            (Property::Field(field), UpdateEntry::Set(node)) => {
                field_value(entity.name(), field, node, args).map(InputValue::Value)
            }
            (Property::Field(_), UpdateEntry::Link(op, _)) => Err(DslError::Shape {
                target,
                expected: format!("a value, {} only applies to linked relations", op),
            }),
            (Property::Reference(r), _) if r.kind == RelationKind::Owned => Err(DslError::OwnedMutation(target)),
            (Property::Collection(c), _) if c.kind == RelationKind::Owned => Err(DslError::OwnedMutation(target)),
            (Property::Reference(r), UpdateEntry::Set(node)) if r.is_parent() => {
                ref_value(node, args, &target).map(InputValue::Ref)
            }
            (Property::Reference(r), UpdateEntry::Set(Node::Value(Value::Null))) if r.optional => {
                // clears every link of an optional reference
                Ok(InputValue::Refs(Vec::new()))
            }
            (Property::Reference(_), UpdateEntry::Set(node)) | (Property::Collection(_), UpdateEntry::Set(node)) => {
                Err(DslError::Shape {
                    target,
                    expected: format!("@add or @del before the linked value, found {}", node.shape()),
                })
            }
            (Property::Reference(r), UpdateEntry::Link(op, node)) => {
                if r.is_parent() {
                    Err(DslError::Shape {
                        target,
                        expected: "a plain id for @parent".into(),
                    })
                } else if *op == LinkOp::Del && !r.optional {
                    Err(DslError::InvalidValue {
                        target,
                        reason: "@del would leave a required reference empty".into(),
                    })
                } else {
                    ref_value(node, args, &target).map(|id| InputValue::Link(RefLink::new(*op, id)))
                }
            }
            (Property::Collection(_), UpdateEntry::Link(op, node)) => {
                let ids = if is_many(node, args) {
                    ref_values(node, args, &target)
                } else {
                    ref_value(node, args, &target).map(|id| vec![id])
                };
                ids.map(|ids| InputValue::Links(ids.into_iter().map(|id| RefLink::new(*op, id)).collect()))
            }
        };
        match compiled {
            Ok(value) => values.push((name.clone(), value)),
            Err(e) => errors.push(e),
        }
    }

    let instruction = Instruction::Update {
        entity: entity.name().to_owned(),
        ref_id,
        values,
        accessed,
    };
    trace!("compiled {}", instruction);
    semantic(errors, instruction)
}

// a list literal, or a parameter bound to a list
fn is_many(node: &Node, args: &Args) -> bool {
    match node {
        Node::List(_) => true,
        Node::Param(name) => matches!(args.get(name), Some(Arg::Refs(_)) | Some(Arg::Value(Value::List(_)))),
        _ => false,
    }
}

/// The row addressed by `@id == ...` in updates and deletes.
pub(crate) fn target_ref(entity: &str, target: &Target, args: &Args) -> std::result::Result<RefId, DslError> {
    match target {
        Target::Id(id) => Ok(RefId::from_id(*id)),
        Target::Param(name) => ref_value(&Node::Param(name.clone()), args, &PropertyKey::new(entity, ID).to_string()),
    }
}
