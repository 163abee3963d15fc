//! Compiles `Entity [| filter |] [limit L] [page P] { selection }` into a
//! [`QTree`] and validates arguments when a compiled query runs.
use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use crate::datatype::{Arg, Args, FieldType, OtherHasher, Value, coerce, convert, try_type};
use crate::dsl::{Bound, Comparator, ExprAst, ItemAst, Node, SelectAst, SortDir, parse_query};
use crate::error::{DslError, FcError, Result};
use crate::instruction::{Accessed, PropertyKey, semantic};
use crate::schema::{Entity, ID, PARENT, Property, RelationKind, Schema};

/// A parameter declared by a query, typed by the position it appears in.
#[derive(Debug, Clone, PartialEq)]
pub struct QParameter {
    pub name: String,
    pub field_type: FieldType,
    pub is_limit_or_page: bool,
    pub is_list: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QOperand {
    Value(Value),
    List(Vec<Value>),
    Param(String),
}

/// One relation crossed by a filter path.
#[derive(Debug, Clone, PartialEq)]
pub struct QStep {
    pub relation: String,
    pub kind: RelationKind,
    pub source: String,
    pub target: String,
}

impl QStep {
    pub fn is_parent(&self) -> bool {
        self.relation == PARENT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QPredicate {
    pub steps: Vec<QStep>,
    pub field: String,
    pub field_type: FieldType,
    pub comparator: Comparator,
    pub operand: QOperand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QExpression {
    And(Box<QExpression>, Box<QExpression>),
    Or(Box<QExpression>, Box<QExpression>),
    Predicate(QPredicate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QBound {
    Literal(i64),
    Param(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QSort {
    pub dir: SortDir,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QField {
    pub name: String,
    pub field_type: FieldType,
    pub sort: Option<QSort>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QRelation {
    pub name: String,
    pub kind: RelationKind,
    pub many: bool,
    pub tree: QTree,
}

impl QRelation {
    pub fn is_parent(&self) -> bool {
        self.name == PARENT
    }
}

/// Selected fields and relations of one level. `@id` is always the first field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QSelect {
    pub fields: Vec<QField>,
    pub relations: Vec<QRelation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QTree {
    pub entity: String,
    pub filter: Option<QExpression>,
    pub limit: Option<QBound>,
    pub page: Option<QBound>,
    pub select: QSelect,
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub hash: String,
    pub tree: QTree,
    pub parameters: Vec<QParameter>,
    pub accessed: Accessed,
}

pub fn compile(schema: &Schema, dsl: &str) -> Result<CompiledQuery> {
    let ast = parse_query(dsl)?;
    let mut compiler = QueryCompiler {
        schema,
        errors: Vec::new(),
        parameters: Vec::new(),
        accessed: Accessed::new(),
    };
    let Some(entity) = schema.get(&ast.entity) else {
        return Err(FcError::Semantic(vec![DslError::UnknownEntity(ast.entity)]));
    };
    let tree = compiler.level(entity, &ast.body, true);
    let compiled = CompiledQuery {
        hash: hash(dsl),
        tree,
        parameters: compiler.parameters,
        accessed: compiler.accessed,
    };
    trace!("compiled query {} {:?}", compiled.hash, compiled.tree);
    semantic(compiler.errors, compiled)
}

/// Stable hash of the query text with whitespace runs collapsed.
pub fn hash(dsl: &str) -> String {
    let compact = dsl.split_whitespace().collect::<Vec<_>>().join(" ");
    blake3::hash(compact.as_bytes()).to_hex().to_string()
}

/// `@id == id` on the level it is attached to.
pub fn id_equals(id: i64) -> QExpression {
    QExpression::Predicate(QPredicate {
        steps: Vec::new(),
        field: ID.to_owned(),
        field_type: FieldType::Long,
        comparator: Comparator::Eq,
        operand: QOperand::Value(Value::Long(id)),
    })
}

struct QueryCompiler<'a> {
    schema: &'a Schema,
    errors: Vec<DslError>,
    parameters: Vec<QParameter>,
    accessed: Accessed,
}

impl<'a> QueryCompiler<'a> {
    fn access(&mut self, entity: &str, property: &str) {
        self.accessed.insert(PropertyKey::new(entity, property));
    }

    fn register(&mut self, parameter: QParameter) {
        if self.parameters.iter().any(|p| p.name == parameter.name) {
            self.errors.push(DslError::ParameterCollision(parameter.name));
        } else {
            self.parameters.push(parameter);
        }
    }

    fn level(&mut self, entity: &'a Entity, body: &SelectAst, paged: bool) -> QTree {
        self.access(entity.name(), ID);
        let filter = body.filter.as_ref().and_then(|f| self.expression(entity, f));
        let limit = body.limit.as_ref().and_then(|b| self.bound(entity, "limit", b, paged));
        let page = body.page.as_ref().and_then(|b| self.bound(entity, "page", b, paged));
        if page.is_some() && limit.is_none() {
            self.errors.push(DslError::Pagination(format!("'{}' has a page without a limit", entity.name())));
        }
        QTree {
            entity: entity.name().to_owned(),
            filter,
            limit,
            page,
            select: self.select(entity, &body.items),
        }
    }

    fn bound(&mut self, entity: &Entity, what: &str, bound: &Bound, paged: bool) -> Option<QBound> {
        if !paged {
            self.errors.push(DslError::Pagination(format!(
                "{} is not allowed on the single reference to '{}'",
                what,
                entity.name()
            )));
            return None;
        }
        match bound {
            Bound::Literal(n) if *n < 1 => {
                self.errors.push(DslError::Pagination(format!("{} must be greater than 0, found {}", what, n)));
                None
            }
            Bound::Literal(n) => Some(QBound::Literal(*n)),
            Bound::Param(name) => {
                self.register(QParameter {
                    name: name.clone(),
                    field_type: FieldType::Long,
                    is_limit_or_page: true,
                    is_list: false,
                });
                Some(QBound::Param(name.clone()))
            }
        }
    }

    fn select(&mut self, entity: &'a Entity, items: &[ItemAst]) -> QSelect {
        let mut select = QSelect::default();
        let id = entity.fields().find(|f| f.name == ID).map(|f| f.field_type).unwrap_or(FieldType::Long);
        select.fields.push(QField {
            name: ID.to_owned(),
            field_type: id,
            sort: None,
        });
        let mut orders: BTreeSet<i64> = BTreeSet::new();

        for item in items {
            match item {
                ItemAst::All => {
                    for field in entity.user_fields() {
                        if select.fields.iter().any(|f| f.name == field.name) {
                            continue;
                        }
                        self.access(entity.name(), &field.name);
                        select.fields.push(QField {
                            name: field.name.clone(),
                            field_type: field.field_type,
                            sort: None,
                        });
                    }
                }
                ItemAst::Field { name, sort } => {
                    let Some(property) = self.property(entity, name) else {
                        continue;
                    };
                    let Property::Field(field) = property else {
                        self.errors.push(DslError::Shape {
                            target: PropertyKey::new(entity.name(), name).to_string(),
                            expected: "a { selection } after a relation".into(),
                        });
                        continue;
                    };
                    let sort = match sort {
                        Some((_, order)) if *order < 1 => {
                            self.errors.push(DslError::InvalidValue {
                                target: PropertyKey::new(entity.name(), name).to_string(),
                                reason: format!("sort order must be greater than 0, found {}", order),
                            });
                            None
                        }
                        Some((dir, order)) => {
                            if !orders.insert(*order) {
                                self.errors.push(DslError::DuplicateOrder {
                                    entity: entity.name().to_owned(),
                                    order: *order,
                                });
                            }
                            Some(QSort { dir: *dir, order: *order })
                        }
                        None => None,
                    };
                    self.access(entity.name(), name);
                    match select.fields.iter_mut().find(|f| &f.name == name) {
                        Some(existing) => existing.sort = sort.or(existing.sort),
                        None => select.fields.push(QField {
                            name: name.clone(),
                            field_type: field.field_type,
                            sort,
                        }),
                    }
                }
                ItemAst::Relation { name, body } => {
                    let Some(property) = self.property(entity, name) else {
                        continue;
                    };
                    let (target, kind, many) = match property {
                        Property::Field(_) => {
                            self.errors.push(DslError::Shape {
                                target: PropertyKey::new(entity.name(), name).to_string(),
                                expected: "a field without a { selection }".into(),
                            });
                            continue;
                        }
                        Property::Reference(r) => (r.target.as_str(), r.kind, false),
                        Property::Collection(c) => (c.target.as_str(), c.kind, true),
                    };
                    let Some(child) = self.entity(target) else {
                        continue;
                    };
                    self.access(entity.name(), name);
                    let tree = self.level(child, body, many);
                    select.relations.push(QRelation {
                        name: name.clone(),
                        kind,
                        many,
                        tree,
                    });
                }
            }
        }
        select
    }

    fn entity(&mut self, name: &str) -> Option<&'a Entity> {
        let found = self.schema.get(name);
        if found.is_none() {
            self.errors.push(DslError::UnknownEntity(name.to_owned()));
        }
        found
    }

    fn property(&mut self, entity: &'a Entity, name: &str) -> Option<&'a Property> {
        let found = entity.get(name);
        if found.is_none() {
            self.errors.push(DslError::UnknownProperty {
                entity: entity.name().to_owned(),
                property: name.to_owned(),
            });
        }
        found
    }

    fn expression(&mut self, entity: &'a Entity, expr: &ExprAst) -> Option<QExpression> {
        match expr {
            ExprAst::And(l, r) => {
                let (l, r) = (self.expression(entity, l), self.expression(entity, r));
                Some(QExpression::And(Box::new(l?), Box::new(r?)))
            }
            ExprAst::Or(l, r) => {
                let (l, r) = (self.expression(entity, l), self.expression(entity, r));
                Some(QExpression::Or(Box::new(l?), Box::new(r?)))
            }
            ExprAst::Predicate {
                path,
                comparator,
                operand,
            } => self.predicate(entity, path, *comparator, operand).map(QExpression::Predicate),
        }
    }

    fn predicate(
        &mut self,
        entity: &'a Entity,
        path: &[String],
        comparator: Comparator,
        operand: &Node,
    ) -> Option<QPredicate> {
        let mut current = entity;
        let mut steps = Vec::new();
        let full = path.join(".");
        let (last, relations) = path.split_last()?;

        for name in relations {
            let property = self.property(current, name)?;
            let Some((target, kind)) = property.relation() else {
                self.errors.push(DslError::InvalidPath {
                    path: full.clone(),
                    valid: current
                        .properties()
                        .filter(|p| p.relation().is_some())
                        .map(|p| p.name().to_owned())
                        .collect::<Vec<_>>(),
                });
                return None;
            };
            self.access(current.name(), name);
            let next = self.entity(target)?;
            steps.push(QStep {
                relation: name.clone(),
                kind,
                source: current.name().to_owned(),
                target: next.name().to_owned(),
            });
            current = next;
        }

        let property = self.property(current, last)?;
        let Property::Field(field) = property else {
            let valid = match property.relation().and_then(|(t, _)| self.schema.get(t)) {
                Some(target) => target.fields().map(|f| format!("{}.{}", last, f.name)).collect(),
                None => Vec::new(),
            };
            self.errors.push(DslError::InvalidPath { path: full, valid });
            return None;
        };
        self.access(current.name(), last);
        let target = PropertyKey::new(current.name(), last).to_string();
        if field.field_type.is_container() {
            self.errors.push(DslError::InvalidValue {
                target,
                reason: format!("{} fields cannot be filtered", field.field_type),
            });
            return None;
        }

        let operand = match (comparator, operand) {
            (_, Node::Param(name)) => {
                self.register(QParameter {
                    name: name.clone(),
                    field_type: field.field_type,
                    is_limit_or_page: false,
                    is_list: comparator == Comparator::In,
                });
                QOperand::Param(name.clone())
            }
            (Comparator::In, Node::List(items)) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Node::Value(v) if !v.is_null() => values.push(self.literal(&target, field.field_type, v.clone())?),
                        other => {
                            self.errors.push(DslError::Shape {
                                target: target.clone(),
                                expected: format!("a list of literals, found {}", other.shape()),
                            });
                            return None;
                        }
                    }
                }
                QOperand::List(values)
            }
            (Comparator::In, other) => {
                self.errors.push(DslError::Shape {
                    target,
                    expected: format!("a list or a parameter after in, found {}", other.shape()),
                });
                return None;
            }
            (Comparator::Eq | Comparator::Neq, Node::Value(Value::Null)) => QOperand::Value(Value::Null),
            (_, Node::Value(v)) if !v.is_null() => QOperand::Value(self.literal(&target, field.field_type, v.clone())?),
            (_, other) => {
                self.errors.push(DslError::Shape {
                    target,
                    expected: format!("a literal or a parameter, found {}", other.shape()),
                });
                return None;
            }
        };

        Some(QPredicate {
            steps,
            field: last.clone(),
            field_type: field.field_type,
            comparator,
            operand,
        })
    }

    fn literal(&mut self, target: &str, declared: FieldType, value: Value) -> Option<Value> {
        match typed(target, declared, value) {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }
}

fn typed(target: &str, declared: FieldType, value: Value) -> std::result::Result<Value, DslError> {
    let attempted = convert(&value).ok_or_else(|| DslError::MissingValue(target.to_owned()))?;
    if !try_type(declared, attempted) {
        return Err(DslError::TypeMismatch {
            target: target.to_owned(),
            declared,
            attempted,
        });
    }
    coerce(declared, value).map_err(|reason| DslError::InvalidValue {
        target: target.to_owned(),
        reason,
    })
}

/// Arguments checked against the declared parameters of a query.
pub type Bindings = HashMap<String, Value, OtherHasher>;

impl CompiledQuery {
    /// Checks that every declared parameter is bound to a value of its type.
    pub fn bind(&self, args: &Args) -> Result<Bindings> {
        let mut bindings = Bindings::default();
        for parameter in &self.parameters {
            let name = &parameter.name;
            let value = match args.get(name) {
                Some(Arg::Value(v)) => v.clone(),
                Some(Arg::Ref(r)) => r
                    .id()
                    .map(Value::Long)
                    .ok_or_else(|| FcError::Execution(format!("Reference bound to '?{}' has no id yet", name)))?,
                Some(Arg::Refs(_)) => {
                    return Err(FcError::Execution(format!("'?{}' cannot be bound to a list of references", name)));
                }
                None => return Err(FcError::Execution(format!("Expecting an argument value for '?{}'", name))),
            };
            let value = if parameter.is_limit_or_page {
                match value.as_long() {
                    Some(n) if n >= 1 => Value::Long(n),
                    _ => {
                        return Err(FcError::Execution(format!(
                            "'?{}' must be an integer greater than 0, found {}",
                            name, value
                        )));
                    }
                }
            } else if parameter.is_list {
                let Value::List(items) = value else {
                    return Err(FcError::Execution(format!("'?{}' must be a list, found {}", name, value)));
                };
                let items = items
                    .into_iter()
                    .map(|v| typed(name, parameter.field_type, v))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| FcError::Execution(e.to_string()))?;
                Value::List(items)
            } else if value.is_null() {
                value
            } else {
                typed(name, parameter.field_type, value).map_err(|e| FcError::Execution(e.to_string()))?
            };
            bindings.insert(name.clone(), value);
        }
        Ok(bindings)
    }
}
