//! Compiled instructions and the batch they are collected into.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::datatype::{Arg, Args, Value, check, coerce, convert, try_type};
use crate::dsl::Node;
use crate::error::{DslError, FcError, Result};
use crate::refs::{RefId, RefLink, RefTree};
use crate::schema::{Field, Schema};
use crate::security::AccessKind;
use crate::{create, delete, update};

/// Identifies a property as `Entity::property`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    pub entity: String,
    pub property: String,
}

impl PropertyKey {
    pub fn new(entity: &str, property: &str) -> Self {
        Self {
            entity: entity.to_owned(),
            property: property.to_owned(),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::{}", self.entity, self.property)
    }
}

/// Every property an instruction or a query touches.
pub type Accessed = BTreeSet<PropertyKey>;

#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Value(Value),
    Ref(RefId),
    Refs(Vec<RefId>),
    Link(RefLink),
    Links(Vec<RefLink>),
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputValue::Value(v) => write!(f, "{}", v),
            InputValue::Ref(r) => write!(f, "@{}", r),
            InputValue::Refs(refs) => {
                let refs: Vec<String> = refs.iter().map(|r| format!("@{}", r)).collect();
                write!(f, "[{}]", refs.join(", "))
            }
            InputValue::Link(l) => write!(f, "{} {}", l.op, l.ref_id),
            InputValue::Links(links) => {
                let links: Vec<String> = links.iter().map(|l| format!("{} {}", l.op, l.ref_id)).collect();
                write!(f, "[{}]", links.join(", "))
            }
        }
    }
}

pub type Values = Vec<(String, InputValue)>;

#[derive(Debug, Clone)]
pub enum Instruction {
    Create {
        entity: String,
        ref_id: RefId,
        values: Values,
        accessed: Accessed,
    },
    Update {
        entity: String,
        ref_id: RefId,
        values: Values,
        accessed: Accessed,
    },
    Delete {
        entity: String,
        ref_id: RefId,
        accessed: Accessed,
    },
}

impl Instruction {
    pub fn kind(&self) -> AccessKind {
        match self {
            Instruction::Create { .. } => AccessKind::Create,
            Instruction::Update { .. } => AccessKind::Update,
            Instruction::Delete { .. } => AccessKind::Delete,
        }
    }
    pub fn entity(&self) -> &str {
        match self {
            Instruction::Create { entity, .. }
            | Instruction::Update { entity, .. }
            | Instruction::Delete { entity, .. } => entity,
        }
    }
    pub fn ref_id(&self) -> &RefId {
        match self {
            Instruction::Create { ref_id, .. }
            | Instruction::Update { ref_id, .. }
            | Instruction::Delete { ref_id, .. } => ref_id,
        }
    }
    pub fn values(&self) -> &[(String, InputValue)] {
        match self {
            Instruction::Create { values, .. } | Instruction::Update { values, .. } => values,
            Instruction::Delete { .. } => &[],
        }
    }
    pub fn value(&self, name: &str) -> Option<&InputValue> {
        self.values().iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
    pub fn accessed(&self) -> &Accessed {
        match self {
            Instruction::Create { accessed, .. }
            | Instruction::Update { accessed, .. }
            | Instruction::Delete { accessed, .. } => accessed,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self.kind() {
            AccessKind::Create => "Create",
            AccessKind::Update => "Update",
            _ => "Delete",
        };
        write!(f, "{}({}) @id={}", name, self.entity(), self.ref_id())?;
        if let Instruction::Delete { .. } = self {
            return Ok(());
        }
        let values: Vec<String> = self.values().iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        write!(f, " - {{{}}}", values.join(", "))
    }
}

/// An ordered batch of instructions compiled against one schema snapshot.
/// Nothing reaches the store until the batch is handed to the persistor.
pub struct Transaction {
    schema: Arc<Schema>,
    instructions: Vec<Instruction>,
}

impl Transaction {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            instructions: Vec::new(),
        }
    }
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
    /// Compiles a create and returns the ids of every row it will insert.
    pub fn create(&mut self, dsl: &str, args: &Args) -> Result<RefTree> {
        let (instructions, tree) = create::compile(&self.schema, dsl, args)?;
        self.instructions.extend(instructions);
        Ok(tree)
    }
    pub fn update(&mut self, dsl: &str, args: &Args) -> Result<()> {
        let instruction = update::compile(&self.schema, dsl, args)?;
        self.instructions.push(instruction);
        Ok(())
    }
    pub fn delete(&mut self, dsl: &str, args: &Args) -> Result<()> {
        let instruction = delete::compile(&self.schema, dsl, args)?;
        self.instructions.push(instruction);
        Ok(())
    }
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }
}

// ------------- helpers shared by the compilers -------------
pub(crate) fn semantic<T>(errors: Vec<DslError>, ok: T) -> Result<T> {
    if errors.is_empty() {
        Ok(ok)
    } else {
        Err(FcError::Semantic(errors))
    }
}

/// Resolves a field entry to a value of the declared type.
pub(crate) fn field_value(
    entity: &str,
    field: &Field,
    node: &Node,
    args: &Args,
) -> std::result::Result<Value, DslError> {
    let target = PropertyKey::new(entity, &field.name).to_string();
    let value = match node {
        Node::Value(v) => v.clone(),
        Node::Param(name) => match args.get(name) {
            Some(Arg::Value(v)) => v.clone(),
            Some(_) => {
                return Err(DslError::InvalidValue {
                    target,
                    reason: format!("'?{}' is bound to a reference, expecting a {}", name, field.field_type),
                });
            }
            None => return Err(DslError::UnresolvedParameter { name: name.clone(), target }),
        },
        Node::List(_) | Node::Object(_) => plain(node, args, &target)?,
    };
    if value.is_null() {
        return if field.optional {
            Ok(Value::Null)
        } else {
            Err(DslError::MissingValue(target))
        };
    }
    typed(&target, field, value)
}

fn typed(target: &str, field: &Field, value: Value) -> std::result::Result<Value, DslError> {
    let Some(attempted) = convert(&value) else {
        return Err(DslError::MissingValue(target.to_owned()));
    };
    if !try_type(field.field_type, attempted) {
        return Err(DslError::TypeMismatch {
            target: target.to_owned(),
            declared: field.field_type,
            attempted,
        });
    }
    let value = coerce(field.field_type, value).map_err(|reason| DslError::InvalidValue {
        target: target.to_owned(),
        reason,
    })?;
    debug_assert!(field.field_type.is_container() || check(field.field_type, &value));
    if !field.accepts(&value) {
        return Err(DslError::CheckFailed(target.to_owned()));
    }
    Ok(value)
}

// lists and objects inside a field become list and map values
fn plain(node: &Node, args: &Args, target: &str) -> std::result::Result<Value, DslError> {
    match node {
        Node::Value(v) => Ok(v.clone()),
        Node::Param(name) => args.value(name).cloned().ok_or_else(|| DslError::UnresolvedParameter {
            name: name.clone(),
            target: target.to_owned(),
        }),
        Node::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|i| plain(i, args, target))
                .collect::<std::result::Result<_, _>>()?,
        )),
        Node::Object(entries) => Ok(Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), plain(v, args, target)?)))
                .collect::<std::result::Result<_, DslError>>()?,
        )),
    }
}

/// A single row id given as a literal or a bound parameter.
pub(crate) fn ref_value(node: &Node, args: &Args, target: &str) -> std::result::Result<RefId, DslError> {
    match node {
        Node::Value(Value::Long(id)) => Ok(RefId::from_id(*id)),
        Node::Param(name) => match args.get(name) {
            Some(Arg::Ref(r)) => Ok(r.clone()),
            Some(Arg::Value(v)) => v.as_long().map(RefId::from_id).ok_or_else(|| DslError::InvalidValue {
                target: target.to_owned(),
                reason: format!("'?{}' is not a reference", name),
            }),
            Some(Arg::Refs(_)) => Err(DslError::Shape {
                target: target.to_owned(),
                expected: format!("a single reference in '?{}', found a list", name),
            }),
            None => Err(DslError::UnresolvedParameter {
                name: name.clone(),
                target: target.to_owned(),
            }),
        },
        other => Err(DslError::Shape {
            target: target.to_owned(),
            expected: format!("Expecting typeOf (null, long, param), found {}", other.shape()),
        }),
    }
}

/// Row ids given as a list of literals and parameters, or a parameter bound to a list.
pub(crate) fn ref_values(node: &Node, args: &Args, target: &str) -> std::result::Result<Vec<RefId>, DslError> {
    match node {
        Node::List(items) => items.iter().map(|i| ref_value(i, args, target)).collect(),
        Node::Param(name) => match args.get(name) {
            Some(Arg::Refs(refs)) => Ok(refs.clone()),
            Some(Arg::Ref(r)) => Ok(vec![r.clone()]),
            Some(Arg::Value(Value::List(items))) => items
                .iter()
                .map(|v| {
                    v.as_long().map(RefId::from_id).ok_or_else(|| DslError::InvalidValue {
                        target: target.to_owned(),
                        reason: format!("'?{}' holds a non id element {}", name, v),
                    })
                })
                .collect(),
            Some(Arg::Value(_)) => Err(DslError::Shape {
                target: target.to_owned(),
                expected: format!("a list of references in '?{}'", name),
            }),
            None => Err(DslError::UnresolvedParameter {
                name: name.clone(),
                target: target.to_owned(),
            }),
        },
        other => Err(DslError::Shape {
            target: target.to_owned(),
            expected: format!("Expecting typeOf (list, param), found {}", other.shape()),
        }),
    }
}
