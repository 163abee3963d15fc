// used for persistence
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};

use tracing::{debug, info, warn};

use crate::datatype::Value;
use crate::error::{FcError, Result};
use crate::instruction::{InputValue, Instruction};
use crate::refs::{LinkOp, RefId, RefLink};
use crate::schema::{Entity, ID, PARENT, Property, RelationKind, Schema};
use crate::sql::{INV, REF, aux_table, column_type, id, parent, quote, table, to_column};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

/// Owns the row store connection. Tables follow the schema: one per entity
/// and one link table per linked relation.
pub struct Persistor {
    db: Connection,
}

impl Persistor {
    pub fn new(mode: &PersistenceMode, foreign_keys: bool) -> Result<Persistor> {
        let db = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        db.pragma_update(None, "foreign_keys", foreign_keys)?;
        info!(mode = ?mode, foreign_keys, "row store opened");
        Ok(Persistor { db })
    }

    pub fn connection(&self) -> &Connection {
        &self.db
    }

    /// Creates the missing tables of a schema and adds columns for fields
    /// declared after a table was created.
    pub fn bootstrap(&mut self, schema: &Schema) -> Result<()> {
        let tx = self.db.transaction()?;
        for entity in schema.entities() {
            let ddl = entity_table(entity);
            debug!(sql = %ddl, "bootstrap");
            tx.execute_batch(&ddl)?;
            add_missing_columns(&tx, entity)?;
            for property in entity.properties() {
                if let Some(ddl) = link_table(entity, property) {
                    debug!(sql = %ddl, "bootstrap");
                    tx.execute_batch(&ddl)?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Applies a batch inside one store transaction. Any failure rolls the
    /// whole batch back.
    pub fn execute(&mut self, schema: &Schema, instructions: &[Instruction]) -> Result<()> {
        info!(instructions = instructions.len(), "executing batch");
        let tx = self.db.transaction()?;
        for instruction in instructions {
            let applied = match instruction {
                Instruction::Create { .. } => create(&tx, schema, instruction),
                Instruction::Update { .. } => update(&tx, schema, instruction),
                Instruction::Delete { .. } => delete(&tx, schema, instruction),
            };
            if let Err(e) = applied {
                warn!(error = %e, instruction = %instruction, "batch rolled back");
                return Err(e);
            }
        }
        tx.commit()?;
        info!(instructions = instructions.len(), "batch committed");
        Ok(())
    }
}

// ------------- DDL -------------
fn field_column(entity: &Entity, name: &str) -> Option<String> {
    let Some(Property::Field(field)) = entity.get(name) else {
        return None;
    };
    let mut ddl = format!("{} {}", quote(&field.name), column_type(field.field_type));
    if !field.optional && (field.input || field.is_derived()) {
        ddl.push_str(" not null");
    }
    if field.unique {
        ddl.push_str(" unique");
    }
    Some(ddl)
}

fn entity_table(entity: &Entity) -> String {
    let mut columns = vec![format!("{} integer primary key autoincrement", id())];
    for field in entity.user_fields() {
        columns.extend(field_column(entity, &field.name));
    }
    if let Some(Property::Reference(reference)) = entity.get(PARENT) {
        let mut ddl = format!("{} integer not null", parent());
        if reference.unique {
            ddl.push_str(" unique");
        }
        ddl.push_str(&format!(" references {}({})", table(&reference.target), id()));
        columns.push(ddl);
    }
    format!(
        "create table if not exists {} (\n    {}\n);",
        table(entity.name()),
        columns.join(",\n    ")
    )
}

fn link_table(entity: &Entity, property: &Property) -> Option<String> {
    let (target, kind) = property.relation()?;
    if kind != RelationKind::Linked || property.name() == PARENT {
        return None;
    }
    let unique = match property {
        Property::Reference(r) if r.unique => format!(",\n    unique ({})", quote(REF)),
        _ => String::new(),
    };
    Some(format!(
        "create table if not exists {} (\n    {inv} integer not null references {}({id}),\n    {refc} integer not null references {}({id}),\n    primary key ({inv}, {refc}){}\n);",
        aux_table(entity.name(), property.name()),
        table(entity.name()),
        table(target),
        unique,
        inv = quote(INV),
        refc = quote(REF),
        id = id(),
    ))
}

// added columns are nullable, existing rows have no value for them
fn add_missing_columns(tx: &Transaction, entity: &Entity) -> Result<()> {
    let mut statement = tx.prepare(&format!("pragma table_info({})", table(entity.name())))?;
    let existing = statement
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    for field in entity.user_fields() {
        if existing.iter().any(|c| c == &field.name) {
            continue;
        }
        let sql = format!(
            "alter table {} add column {} {}",
            table(entity.name()),
            quote(&field.name),
            column_type(field.field_type)
        );
        debug!(sql = %sql, "bootstrap");
        tx.execute_batch(&sql)?;
    }
    if let Some(Property::Reference(reference)) = entity.get(PARENT) {
        if !existing.iter().any(|c| c == PARENT) {
            let sql = format!(
                "alter table {} add column {} integer references {}({})",
                table(entity.name()),
                parent(),
                table(&reference.target),
                id()
            );
            debug!(sql = %sql, "bootstrap");
            tx.execute_batch(&sql)?;
        }
    }
    Ok(())
}

// ------------- DML -------------
fn assigned(ref_id: &RefId, what: &str) -> Result<i64> {
    ref_id
        .id()
        .ok_or_else(|| FcError::Execution(format!("{} has no id, its row was not created yet", what)))
}

fn single(affected: usize, what: String) -> Result<()> {
    if affected != 1 {
        return Err(FcError::StorageIntegrity(format!(
            "{} affected {} rows, expected exactly 1",
            what, affected
        )));
    }
    Ok(())
}

fn run(tx: &Transaction, sql: &str, values: &[Value]) -> Result<usize> {
    debug!(sql = %sql, params = values.len(), "execute");
    Ok(tx.execute(sql, params_from_iter(values.iter()))?)
}

fn link(tx: &Transaction, entity: &str, relation: &str, inv: i64, reference: i64) -> Result<()> {
    let sql = format!(
        "insert into {} ({}, {}) values (?1, ?2)",
        aux_table(entity, relation),
        quote(INV),
        quote(REF)
    );
    debug!(sql = %sql, params = 2, "execute");
    let affected = tx.execute(&sql, params![inv, reference])?;
    single(affected, format!("Linking {}::{} {} to {}", entity, relation, inv, reference))
}

fn unlink(tx: &Transaction, entity: &str, relation: &str, inv: i64, reference: i64) -> Result<()> {
    let sql = format!(
        "delete from {} where {} = ?1 and {} = ?2",
        aux_table(entity, relation),
        quote(INV),
        quote(REF)
    );
    debug!(sql = %sql, params = 2, "execute");
    let affected = tx.execute(&sql, params![inv, reference])?;
    single(affected, format!("Unlinking {}::{} {} from {}", entity, relation, inv, reference))
}

fn unlink_all(tx: &Transaction, entity: &str, relation: &str, inv: i64) -> Result<usize> {
    let sql = format!("delete from {} where {} = ?1", aux_table(entity, relation), quote(INV));
    debug!(sql = %sql, params = 1, "execute");
    Ok(tx.execute(&sql, params![inv])?)
}

fn create(tx: &Transaction, schema: &Schema, instruction: &Instruction) -> Result<()> {
    let entity = schema.find(instruction.entity())?;
    let mut columns = Vec::new();
    let mut values = Vec::new();
    let mut links: Vec<(&str, &RefId)> = Vec::new();

    for (name, input) in instruction.values() {
        match (entity.get(name), input) {
            (Some(Property::Field(field)), InputValue::Value(value)) => {
                columns.push(quote(name));
                values.push(to_column(field.field_type, value)?);
            }
            (Some(Property::Reference(r)), InputValue::Ref(ref_id)) if r.is_parent() => {
                columns.push(parent());
                values.push(Value::Long(assigned(ref_id, PARENT)?));
            }
            // owned children carry the link through their own @parent
            (Some(p), _) if matches!(p.relation(), Some((_, RelationKind::Owned))) => {}
            (Some(Property::Reference(_)), InputValue::Ref(ref_id)) => links.push((name.as_str(), ref_id)),
            (Some(Property::Collection(_)), InputValue::Refs(ids)) => {
                links.extend(ids.iter().map(|r| (name.as_str(), r)));
            }
            _ => {
                return Err(FcError::Execution(format!(
                    "{}::{} cannot be created from {}",
                    entity.name(),
                    name,
                    input
                )));
            }
        }
    }

    let sql = if columns.is_empty() {
        format!("insert into {} default values", table(entity.name()))
    } else {
        let holders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "insert into {} ({}) values ({})",
            table(entity.name()),
            columns.join(", "),
            holders.join(", ")
        )
    };
    let affected = run(tx, &sql, &values)?;
    single(affected, format!("Create({})", entity.name()))?;
    let row = tx.last_insert_rowid();
    if !instruction.ref_id().assign(row) {
        return Err(FcError::Execution(format!(
            "Create({}) targets an id that is already assigned: {}",
            entity.name(),
            instruction.ref_id()
        )));
    }

    for (relation, ref_id) in links {
        let reference = assigned(ref_id, &format!("{}::{}", entity.name(), relation))?;
        link(tx, entity.name(), relation, row, reference)?;
    }
    Ok(())
}

fn update(tx: &Transaction, schema: &Schema, instruction: &Instruction) -> Result<()> {
    let entity = schema.find(instruction.entity())?;
    let row = assigned(instruction.ref_id(), &format!("{} {}", entity.name(), ID))?;
    let mut sets = Vec::new();
    let mut values = Vec::new();

    for (name, input) in instruction.values() {
        match input {
            InputValue::Value(value) => {
                let Some(Property::Field(field)) = entity.get(name) else {
                    return Err(FcError::Execution(format!("{}::{} is not a field", entity.name(), name)));
                };
                sets.push(format!("{} = ?{}", quote(name), values.len() + 1));
                values.push(to_column(field.field_type, value)?);
            }
            InputValue::Ref(ref_id) if name == PARENT => {
                sets.push(format!("{} = ?{}", parent(), values.len() + 1));
                values.push(Value::Long(assigned(ref_id, PARENT)?));
            }
            _ => {}
        }
    }
    // an update without columns still has to hit its row
    if sets.is_empty() {
        sets.push(format!("{} = {}", id(), id()));
    }
    let sql = format!(
        "update {} set {} where {} = ?{}",
        table(entity.name()),
        sets.join(", "),
        id(),
        values.len() + 1
    );
    values.push(Value::Long(row));
    let affected = run(tx, &sql, &values)?;
    single(affected, format!("Update({}) @id={}", entity.name(), row))?;

    for (name, input) in instruction.values() {
        match input {
            InputValue::Refs(ids) if ids.is_empty() => {
                unlink_all(tx, entity.name(), name, row)?;
            }
            InputValue::Link(RefLink { op, ref_id }) => {
                let reference = assigned(ref_id, &format!("{}::{}", entity.name(), name))?;
                match op {
                    // a reference holds one link at most
                    LinkOp::Add => {
                        unlink_all(tx, entity.name(), name, row)?;
                        link(tx, entity.name(), name, row, reference)?;
                    }
                    LinkOp::Del => unlink(tx, entity.name(), name, row, reference)?,
                }
            }
            InputValue::Links(links) => {
                for RefLink { op, ref_id } in links {
                    let reference = assigned(ref_id, &format!("{}::{}", entity.name(), name))?;
                    match op {
                        LinkOp::Add => link(tx, entity.name(), name, row, reference)?,
                        LinkOp::Del => unlink(tx, entity.name(), name, row, reference)?,
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// the row only, links pointing at it are left to the store
fn delete(tx: &Transaction, schema: &Schema, instruction: &Instruction) -> Result<()> {
    let entity = schema.find(instruction.entity())?;
    let row = assigned(instruction.ref_id(), &format!("{} {}", entity.name(), ID))?;
    let sql = format!("delete from {} where {} = ?1", table(entity.name()), id());
    let affected = run(tx, &sql, &[Value::Long(row)])?;
    single(affected, format!("Delete({}) @id={}", entity.name(), row))
}

/// Reads back the stored `@parent` of a detail row.
pub fn parent_of(db: &Connection, entity: &str, row: i64) -> Result<Option<i64>> {
    let sql = format!("select {} from {} where {} = ?1", parent(), table(entity), id());
    debug!(sql = %sql, params = 1, "query");
    Ok(db.query_row(&sql, params![row], |r| r.get::<_, i64>(0)).optional()?)
}
