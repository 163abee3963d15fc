//! The schema model: entities, their typed properties and the ownership graph.
//!
//! A [`Schema`] is built once, then [committed](Schema::commit) and shared
//! read-only. Every structural change after that goes through
//! [`Schema::change`], which hands back an independent, uncommitted copy.
//!
//! Owning a relation wires the target entity back to its owner through an
//! implicit linked `@parent` reference. Children always carry that column, for
//! owned single references as much as for owned collections.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

// so regular expressions don't have to be recompiled
use lazy_static::lazy_static;
use regex::Regex;

use crate::datatype::{FieldType, OtherHasher, Value};
use crate::error::{FcError, Result};

pub const ID: &str = "@id";
pub const PARENT: &str = "@parent";

lazy_static! {
    static ref NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Master,
    Detail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Owned,
    Linked,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RelationKind::Owned => write!(f, "owned"),
            RelationKind::Linked => write!(f, "linked"),
        }
    }
}

pub type CheckFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
/// Computes a field from the other values of the row being created.
pub type DeriveFn = Arc<dyn Fn(&BTreeMap<String, Value>) -> Value + Send + Sync>;

// ------------- Properties -------------
#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub optional: bool,
    pub input: bool,
    pub unique: bool,
    check: Option<CheckFn>,
    derive: Option<DeriveFn>,
    entity: Option<String>,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
            optional: false,
            input: true,
            unique: false,
            check: None,
            derive: None,
            entity: None,
        }
    }
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
    pub fn not_input(mut self) -> Self {
        self.input = false;
        self
    }
    pub fn check(mut self, check: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.check = Some(Arc::new(check));
        self
    }
    /// A derived field is never an input.
    pub fn derive(mut self, derive: impl Fn(&BTreeMap<String, Value>) -> Value + Send + Sync + 'static) -> Self {
        self.derive = Some(Arc::new(derive));
        self.input = false;
        self
    }
    pub fn is_derived(&self) -> bool {
        self.derive.is_some()
    }
    pub fn accepts(&self, value: &Value) -> bool {
        self.check.as_ref().is_none_or(|check| check(value))
    }
    pub fn derive_from(&self, values: &BTreeMap<String, Value>) -> Option<Value> {
        self.derive.as_ref().map(|derive| derive(values))
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("optional", &self.optional)
            .field("input", &self.input)
            .field("unique", &self.unique)
            .field("check", &self.check.is_some())
            .field("derive", &self.derive.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub optional: bool,
    pub input: bool,
    pub unique: bool,
    entity: Option<String>,
}

impl Reference {
    pub fn new(name: &str, kind: RelationKind, target: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            target: target.to_owned(),
            optional: false,
            input: true,
            unique: false,
            entity: None,
        }
    }
    pub fn owned(name: &str, target: &str) -> Self {
        Self::new(name, RelationKind::Owned, target)
    }
    pub fn linked(name: &str, target: &str) -> Self {
        Self::new(name, RelationKind::Linked, target)
    }
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
    pub fn not_input(mut self) -> Self {
        self.input = false;
        self
    }
    pub fn is_parent(&self) -> bool {
        self.name == PARENT
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub input: bool,
    entity: Option<String>,
}

impl Collection {
    pub fn new(name: &str, kind: RelationKind, target: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            target: target.to_owned(),
            input: true,
            entity: None,
        }
    }
    pub fn owned(name: &str, target: &str) -> Self {
        Self::new(name, RelationKind::Owned, target)
    }
    pub fn linked(name: &str, target: &str) -> Self {
        Self::new(name, RelationKind::Linked, target)
    }
    pub fn not_input(mut self) -> Self {
        self.input = false;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Property {
    Field(Field),
    Reference(Reference),
    Collection(Collection),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Property::Field(f) => &f.name,
            Property::Reference(r) => &r.name,
            Property::Collection(c) => &c.name,
        }
    }
    pub fn is_input(&self) -> bool {
        match self {
            Property::Field(f) => f.input,
            Property::Reference(r) => r.input,
            Property::Collection(c) => c.input,
        }
    }
    /// Collections are never required.
    pub fn is_optional(&self) -> bool {
        match self {
            Property::Field(f) => f.optional,
            Property::Reference(r) => r.optional,
            Property::Collection(_) => true,
        }
    }
    /// The entity this property was added to, if any.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Property::Field(f) => f.entity.as_deref(),
            Property::Reference(r) => r.entity.as_deref(),
            Property::Collection(c) => c.entity.as_deref(),
        }
    }
    fn bind(&mut self, entity: &str) {
        let slot = match self {
            Property::Field(f) => &mut f.entity,
            Property::Reference(r) => &mut r.entity,
            Property::Collection(c) => &mut c.entity,
        };
        *slot = Some(entity.to_owned());
    }
    /// Target entity and kind of a relation.
    pub fn relation(&self) -> Option<(&str, RelationKind)> {
        match self {
            Property::Field(_) => None,
            Property::Reference(r) => Some((&r.target, r.kind)),
            Property::Collection(c) => Some((&c.target, c.kind)),
        }
    }
}

impl From<Field> for Property {
    fn from(f: Field) -> Self {
        Property::Field(f)
    }
}
impl From<Reference> for Property {
    fn from(r: Reference) -> Self {
        Property::Reference(r)
    }
}
impl From<Collection> for Property {
    fn from(c: Collection) -> Self {
        Property::Collection(c)
    }
}

// ------------- Entity -------------
#[derive(Debug, Clone)]
pub struct Entity {
    name: String,
    kind: EntityKind,
    owned_by: Option<(String, String)>,
    properties: Vec<Property>,
    index: HashMap<String, usize, OtherHasher>,
}

impl Entity {
    fn new(name: &str, kind: EntityKind) -> Self {
        let mut id = Field::new(ID, FieldType::Long).not_input().unique();
        id.entity = Some(name.to_owned());
        let mut entity = Self {
            name: name.to_owned(),
            kind,
            owned_by: None,
            properties: Vec::new(),
            index: HashMap::default(),
        };
        entity.push(Property::Field(id));
        entity
    }
    fn push(&mut self, property: Property) {
        self.index.insert(property.name().to_owned(), self.properties.len());
        self.properties.push(property);
    }
    fn take(&mut self, name: &str) -> Option<Property> {
        let position = self.index.remove(name)?;
        let property = self.properties.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(property)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> EntityKind {
        self.kind
    }
    /// The owning entity and the relation through which it owns this one.
    pub fn owned_by(&self) -> Option<(&str, &str)> {
        self.owned_by.as_ref().map(|(e, p)| (e.as_str(), p.as_str()))
    }
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.index.get(name).map(|i| &self.properties[*i])
    }
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.properties.iter().filter_map(|p| match p {
            Property::Field(f) => Some(f),
            _ => None,
        })
    }
    /// Declared fields without the implicit `@id`.
    pub fn user_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields().filter(|f| f.name != ID)
    }
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.properties.iter().filter_map(|p| match p {
            Property::Reference(r) => Some(r),
            _ => None,
        })
    }
    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.properties.iter().filter_map(|p| match p {
            Property::Collection(c) => Some(c),
            _ => None,
        })
    }
    pub fn owned_refs(&self) -> impl Iterator<Item = &Reference> {
        self.references().filter(|r| r.kind == RelationKind::Owned)
    }
    pub fn linked_refs(&self) -> impl Iterator<Item = &Reference> {
        self.references().filter(|r| r.kind == RelationKind::Linked)
    }
    pub fn owned_cols(&self) -> impl Iterator<Item = &Collection> {
        self.collections().filter(|c| c.kind == RelationKind::Owned)
    }
    pub fn linked_cols(&self) -> impl Iterator<Item = &Collection> {
        self.collections().filter(|c| c.kind == RelationKind::Linked)
    }
    pub fn inputs(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_input())
    }
    /// Linked relations stored in auxiliary tables, that is every linked
    /// relation except `@parent`.
    pub fn aux_relations(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().filter_map(|p| match p {
            Property::Reference(r) if r.kind == RelationKind::Linked && !r.is_parent() => Some(r.name.as_str()),
            Property::Collection(c) if c.kind == RelationKind::Linked => Some(c.name.as_str()),
            _ => None,
        })
    }
    pub fn has_parent(&self) -> bool {
        self.index.contains_key(PARENT)
    }
}

// ------------- Schema -------------
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: Vec<Entity>,
    index: HashMap<String, usize, OtherHasher>,
    committed: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_committed(&self) -> bool {
        self.committed
    }
    pub fn commit(&mut self) {
        self.committed = true;
    }
    /// An independent, uncommitted copy of this schema.
    pub fn change(&self) -> Schema {
        Schema {
            entities: self.entities.clone(),
            index: self.index.clone(),
            committed: false,
        }
    }
    fn check_change(&self) -> Result<()> {
        if self.committed {
            return Err(FcError::Schema(
                "Cannot change a committed schema. Invoke 'change' and set the desired changes".into(),
            ));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.index.get(name).map(|i| &self.entities[*i])
    }
    fn get_mut(&mut self, name: &str) -> Option<&mut Entity> {
        self.index.get(name).map(|i| &mut self.entities[*i])
    }
    pub fn find(&self, name: &str) -> Result<&Entity> {
        self.get(name)
            .ok_or_else(|| FcError::Schema(format!("Entity '{}' not found", name)))
    }
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }
    pub fn masters(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.kind == EntityKind::Master)
    }
    pub fn details(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.kind == EntityKind::Detail)
    }

    pub fn add_entity(&mut self, name: &str, kind: EntityKind) -> Result<()> {
        self.check_change()?;
        if !NAME.is_match(name) {
            return Err(FcError::Schema(format!("Invalid entity name '{}'", name)));
        }
        if self.index.contains_key(name) {
            return Err(FcError::Schema(format!("Entity '{}' already exists in the schema", name)));
        }
        self.index.insert(name.to_owned(), self.entities.len());
        self.entities.push(Entity::new(name, kind));
        Ok(())
    }

    /// Starts an entity and returns a builder to declare its properties.
    pub fn entity(&mut self, name: &str, kind: EntityKind) -> Result<EntityBuilder<'_>> {
        self.add_entity(name, kind)?;
        Ok(EntityBuilder {
            schema: self,
            entity: name.to_owned(),
        })
    }

    pub fn add_property(&mut self, entity: &str, property: impl Into<Property>) -> Result<()> {
        let mut property = property.into();
        self.check_change()?;
        if let Some(bound) = property.entity() {
            return Err(FcError::Schema(format!(
                "Property '{}' is already being used by the entity '{}'",
                property.name(),
                bound
            )));
        }
        if !NAME.is_match(property.name()) {
            return Err(FcError::Schema(format!("Invalid property name '{}'", property.name())));
        }
        let owner = self.find(entity)?;
        if owner.get(property.name()).is_some() {
            return Err(FcError::Schema(format!(
                "Property '{}' already exists in the entity '{}'",
                property.name(),
                entity
            )));
        }

        let parent = match &property {
            Property::Field(_) => None,
            Property::Reference(r) => self.relate(entity, &r.name, &r.target, r.kind, true)?,
            Property::Collection(c) => self.relate(entity, &c.name, &c.target, c.kind, false)?,
        };
        property.bind(entity);
        if let Some((target, relation, mut parent)) = parent {
            parent.bind(&target);
            if let Some(child) = self.get_mut(&target) {
                child.owned_by = Some((entity.to_owned(), relation));
                child.push(parent);
            }
        }
        if let Some(owner) = self.get_mut(entity) {
            owner.push(property);
        }
        Ok(())
    }

    // validates a relation and, when owned, prepares the `@parent` of the target
    fn relate(
        &self,
        entity: &str,
        name: &str,
        target: &str,
        kind: RelationKind,
        single: bool,
    ) -> Result<Option<(String, String, Property)>> {
        let child = self.get(target).ok_or_else(|| {
            FcError::Schema(format!(
                "Relation '{}::{}' targets the unknown entity '{}'",
                entity, name, target
            ))
        })?;
        if kind == RelationKind::Linked {
            return Ok(None);
        }
        if child.kind != EntityKind::Detail {
            return Err(FcError::Schema(format!(
                "Only entities of kind DETAIL can be owned. '{}::{}' trying to own '{}'",
                entity, name, target
            )));
        }
        if let Some((owner, _)) = child.owned_by() {
            return Err(FcError::Schema(format!(
                "Entity '{}' already owned by '{}'",
                target, owner
            )));
        }
        let mut parent = Reference::linked(PARENT, entity);
        parent.unique = single;
        Ok(Some((target.to_owned(), name.to_owned(), Property::Reference(parent))))
    }

    pub fn remove_property(&mut self, entity: &str, name: &str) -> Result<()> {
        self.check_change()?;
        if name == ID || name == PARENT {
            return Err(FcError::Schema(format!("Cannot remove '{}' from an entity", name)));
        }
        let owner = self
            .get_mut(entity)
            .ok_or_else(|| FcError::Schema(format!("Entity '{}' not found", entity)))?;
        let property = owner.take(name).ok_or_else(|| {
            FcError::Schema(format!("Property '{}' not found in entity '{}'", name, entity))
        })?;
        if let Some((target, RelationKind::Owned)) = property.relation() {
            self.release(target);
        }
        Ok(())
    }

    /// Removes an entity nothing else refers to. Entities it owns lose their `@parent`.
    pub fn remove_entity(&mut self, name: &str) -> Result<()> {
        self.check_change()?;
        self.find(name)?;
        for other in self.entities.iter().filter(|e| e.name != name) {
            let used = other
                .properties()
                .filter(|p| !matches!(p, Property::Reference(r) if r.is_parent()))
                .any(|p| matches!(p.relation(), Some((target, _)) if target == name));
            if used {
                return Err(FcError::Schema(format!(
                    "Entity '{}' is still referenced by '{}'",
                    name, other.name
                )));
            }
        }
        let owned: Vec<String> = self
            .entities
            .iter()
            .filter(|e| matches!(e.owned_by(), Some((owner, _)) if owner == name))
            .map(|e| e.name.clone())
            .collect();
        for target in owned {
            self.release(&target);
        }
        if let Some(position) = self.index.remove(name) {
            self.entities.remove(position);
            for slot in self.index.values_mut() {
                if *slot > position {
                    *slot -= 1;
                }
            }
        }
        Ok(())
    }

    fn release(&mut self, target: &str) {
        if let Some(child) = self.get_mut(target) {
            child.owned_by = None;
            child.take(PARENT);
        }
    }
}

/// Declares the properties of a freshly added entity.
pub struct EntityBuilder<'s> {
    schema: &'s mut Schema,
    entity: String,
}

impl EntityBuilder<'_> {
    pub fn property(self, property: impl Into<Property>) -> Result<Self> {
        self.schema.add_property(&self.entity, property)?;
        Ok(self)
    }
    pub fn field(self, name: &str, field_type: FieldType) -> Result<Self> {
        self.property(Field::new(name, field_type))
    }
    pub fn owned_ref(self, name: &str, target: &str) -> Result<Self> {
        self.property(Reference::owned(name, target))
    }
    pub fn linked_ref(self, name: &str, target: &str) -> Result<Self> {
        self.property(Reference::linked(name, target))
    }
    pub fn owned_col(self, name: &str, target: &str) -> Result<Self> {
        self.property(Collection::owned(name, target))
    }
    pub fn linked_col(self, name: &str, target: &str) -> Result<Self> {
        self.property(Collection::linked(name, target))
    }
    pub fn name(&self) -> &str {
        &self.entity
    }
}
