//! Compiles `Entity { prop: value, ... }` into create instructions.
//!
//! Nested objects under owned relations become their own creates, emitted
//! after their owner and carrying `@parent` set to the owner's id.
use std::collections::{BTreeMap, HashSet};

use tracing::trace;

use crate::datatype::{Args, OtherHasher, Value, check};
use crate::dsl::{Node, parse_create};
use crate::error::{DslError, Result};
use crate::instruction::{
    Accessed, InputValue, Instruction, PropertyKey, Values, field_value, ref_value, ref_values, semantic,
};
use crate::refs::{RefId, RefTree};
use crate::schema::{Entity, PARENT, Property, RelationKind, Schema};

pub fn compile(schema: &Schema, dsl: &str, args: &Args) -> Result<(Vec<Instruction>, RefTree)> {
    let ast = parse_create(dsl)?;
    let mut compiler = CreateCompiler {
        schema,
        args,
        errors: Vec::new(),
    };
    let Some(entity) = schema.get(&ast.entity) else {
        return semantic(vec![DslError::UnknownEntity(ast.entity)], (Vec::new(), RefTree::default()));
    };
    let (tree, instructions) = compiler.entity(entity, &ast.body, None);
    trace!("compiled create of {} into {} instructions", entity.name(), instructions.len());
    semantic(compiler.errors, (instructions, tree))
}

struct CreateCompiler<'a> {
    schema: &'a Schema,
    args: &'a Args,
    errors: Vec<DslError>,
}

impl<'a> CreateCompiler<'a> {
    // one level of the nested object, the owner's create comes first
    fn entity(&mut self, entity: &Entity, body: &[(String, Node)], parent: Option<&RefId>) -> (RefTree, Vec<Instruction>) {
        let root = RefId::new();
        let mut tree = RefTree::new(root.clone());
        let mut values: Values = Vec::new();
        let mut accessed = Accessed::new();
        let mut children: Vec<Instruction> = Vec::new();
        let mut seen: HashSet<&str, OtherHasher> = HashSet::default();

        if let Some(parent) = parent {
            seen.insert(PARENT);
            values.push((PARENT.to_owned(), InputValue::Ref(parent.clone())));
            accessed.insert(PropertyKey::new(entity.name(), PARENT));
        }

        for (name, node) in body {
            let target = PropertyKey::new(entity.name(), name);
            if !seen.insert(name.as_str()) {
                self.errors.push(DslError::InvalidValue {
                    target: target.to_string(),
                    reason: if name == PARENT {
                        "@parent is set by the enclosing object".into()
                    } else {
                        "entry given more than once".into()
                    },
                });
                continue;
            }
            let Some(property) = entity.get(name) else {
                self.errors.push(DslError::UnknownProperty {
                    entity: entity.name().to_owned(),
                    property: name.clone(),
                });
                continue;
            };
            if !property.is_input() {
                self.errors.push(DslError::NotInput(target.to_string()));
                continue;
            }
            accessed.insert(target.clone());
            let target = target.to_string();

            match property {
                Property::Field(field) => match field_value(entity.name(), field, node, self.args) {
                    Ok(value) => values.push((name.clone(), InputValue::Value(value))),
                    Err(e) => self.errors.push(e),
                },
                Property::Reference(reference) => {
                    if matches!(node, Node::Value(Value::Null)) {
                        if !reference.optional {
                            self.errors.push(DslError::MissingValue(target));
                        }
                        continue;
                    }
                    match (reference.kind, node) {
                        (RelationKind::Owned, Node::Object(nested)) => {
                            let Some(child) = self.target(&reference.target) else {
                                continue;
                            };
                            let (subtree, created) = self.entity(child, nested, Some(&root));
                            values.push((name.clone(), InputValue::Ref(subtree.root().clone())));
                            tree.push_ref(name, subtree);
                            children.extend(created);
                        }
                        (RelationKind::Owned, other) => self.errors.push(DslError::Shape {
                            target,
                            expected: format!("Expecting an object for an owned reference, found {}", other.shape()),
                        }),
                        (RelationKind::Linked, node) => match ref_value(node, self.args, &target) {
                            Ok(id) => values.push((name.clone(), InputValue::Ref(id))),
                            Err(e) => self.errors.push(e),
                        },
                    }
                }
                Property::Collection(collection) => match (collection.kind, node) {
                    (RelationKind::Owned, Node::List(items)) => {
                        let Some(child) = self.target(&collection.target) else {
                            continue;
                        };
                        let mut ids = Vec::with_capacity(items.len());
                        for item in items {
                            let Node::Object(nested) = item else {
                                self.errors.push(DslError::Shape {
                                    target: target.clone(),
                                    expected: format!("Expecting a list of objects, found {}", item.shape()),
                                });
                                continue;
                            };
                            let (subtree, created) = self.entity(child, nested, Some(&root));
                            ids.push(subtree.root().clone());
                            tree.push_col(name, subtree);
                            children.extend(created);
                        }
                        values.push((name.clone(), InputValue::Refs(ids)));
                    }
                    (RelationKind::Owned, other) => self.errors.push(DslError::Shape {
                        target,
                        expected: format!("Expecting a list of objects, found {}", other.shape()),
                    }),
                    (RelationKind::Linked, node) => match ref_values(node, self.args, &target) {
                        Ok(ids) => values.push((name.clone(), InputValue::Refs(ids))),
                        Err(e) => self.errors.push(e),
                    },
                },
            }
        }

        for property in entity.inputs() {
            if seen.contains(property.name()) || property.is_optional() {
                continue;
            }
            self.errors
                .push(DslError::MissingValue(PropertyKey::new(entity.name(), property.name()).to_string()));
        }

        self.derive(entity, &mut values, &mut accessed);

        let mut instructions = vec![Instruction::Create {
            entity: entity.name().to_owned(),
            ref_id: root,
            values,
            accessed,
        }];
        instructions.extend(children);
        (tree, instructions)
    }

    fn target(&mut self, name: &str) -> Option<&'a Entity> {
        match self.schema.get(name) {
            Some(e) => Some(e),
            None => {
                self.errors.push(DslError::UnknownEntity(name.to_owned()));
                None
            }
        }
    }

    fn derive(&mut self, entity: &Entity, values: &mut Values, accessed: &mut Accessed) {
        let inputs: BTreeMap<String, Value> = values
            .iter()
            .filter_map(|(n, v)| match v {
                InputValue::Value(v) => Some((n.clone(), v.clone())),
                _ => None,
            })
            .collect();
        for field in entity.fields() {
            let Some(value) = field.derive_from(&inputs) else {
                continue;
            };
            if !value.is_null() && !field.field_type.is_container() && !check(field.field_type, &value) {
                self.errors.push(DslError::InvalidValue {
                    target: PropertyKey::new(entity.name(), &field.name).to_string(),
                    reason: format!("derived value {} is not a {}", value, field.field_type),
                });
                continue;
            }
            accessed.insert(PropertyKey::new(entity.name(), &field.name));
            values.push((field.name.clone(), InputValue::Value(value)));
        }
    }
}
