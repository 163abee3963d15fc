//! The entry point tying a committed schema to a row store.
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::info;

use crate::datatype::Args;
use crate::error::{FcError, Result};
use crate::instruction::{Accessed, PropertyKey, Transaction};
use crate::mapper::QueryExecutor;
use crate::persist::{PersistenceMode, Persistor};
use crate::query::{self, CompiledQuery, QField, QSelect, QTree};
use crate::result::{QResult, Row};
use crate::schema::Schema;
use crate::security::{AccessKind, AllowAll, Authorizer};
use crate::settings::Settings;

pub struct Database {
    schema: RwLock<Arc<Schema>>,
    persistor: Mutex<Persistor>,
    authorizer: Box<dyn Authorizer>,
}

impl Database {
    /// Commits the schema and creates its tables.
    pub fn new(mode: PersistenceMode, schema: Schema) -> Result<Database> {
        Self::build(Persistor::new(&mode, false)?, schema)
    }

    pub fn open(settings: &Settings, schema: Schema) -> Result<Database> {
        Self::build(
            Persistor::new(&settings.persistence_mode(), settings.database.foreign_keys)?,
            schema,
        )
    }

    fn build(mut persistor: Persistor, mut schema: Schema) -> Result<Database> {
        schema.commit();
        persistor.bootstrap(&schema)?;
        Ok(Database {
            schema: RwLock::new(Arc::new(schema)),
            persistor: Mutex::new(persistor),
            authorizer: Box::new(AllowAll),
        })
    }

    pub fn with_authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Box::new(authorizer);
        self
    }

    /// The current schema snapshot.
    pub fn schema(&self) -> Result<Arc<Schema>> {
        let schema = self.schema.read().map_err(|e| FcError::Lock(e.to_string()))?;
        Ok(Arc::clone(&schema))
    }

    /// Applies `change` to an uncommitted copy of the schema, then commits
    /// it, creates what the store is missing and swaps it in. Snapshots
    /// already handed out stay as they were.
    pub fn change_schema(&self, change: impl FnOnce(&mut Schema) -> Result<()>) -> Result<Arc<Schema>> {
        let mut current = self.schema.write().map_err(|e| FcError::Lock(e.to_string()))?;
        let mut changed = current.change();
        change(&mut changed)?;
        changed.commit();
        self.persistor()?.bootstrap(&changed)?;
        let changed = Arc::new(changed);
        *current = Arc::clone(&changed);
        info!(entities = changed.entities().count(), "schema changed");
        Ok(changed)
    }

    fn persistor(&self) -> Result<MutexGuard<'_, Persistor>> {
        self.persistor.lock().map_err(|e| FcError::Lock(e.to_string()))
    }

    /// Collects instructions through `build` and executes them as one
    /// store transaction. Returns what `build` returned, typically the ids
    /// of the created rows.
    pub fn tx<T>(&self, build: impl FnOnce(&mut Transaction) -> Result<T>) -> Result<T> {
        let schema = self.schema()?;
        let mut transaction = Transaction::new(Arc::clone(&schema));
        let out = build(&mut transaction)?;
        for instruction in transaction.instructions() {
            self.authorizer.authorize(instruction.kind(), instruction.accessed())?;
        }
        self.persistor()?.execute(&schema, transaction.instructions())?;
        Ok(out)
    }

    pub fn query(&self, dsl: &str) -> Result<Query<'_>> {
        let schema = self.schema()?;
        let compiled = query::compile(&schema, dsl)?;
        Ok(Query { db: self, compiled })
    }

    /// The row with `@id` and every field, or `None` when it does not exist.
    pub fn get(&self, entity: &str, id: i64) -> Result<Option<Row>> {
        let schema = self.schema()?;
        let entity = schema.find(entity)?;
        let mut accessed = Accessed::new();
        let fields: Vec<QField> = entity
            .fields()
            .map(|f| {
                accessed.insert(PropertyKey::new(entity.name(), &f.name));
                QField {
                    name: f.name.clone(),
                    field_type: f.field_type,
                    sort: None,
                }
            })
            .collect();
        let tree = QTree {
            entity: entity.name().to_owned(),
            filter: Some(query::id_equals(id)),
            limit: None,
            page: None,
            select: QSelect {
                fields,
                relations: Vec::new(),
            },
        };
        self.authorizer.authorize(AccessKind::Query, &accessed)?;
        let persistor = self.persistor()?;
        let bindings = query::Bindings::default();
        let result = QueryExecutor::new(persistor.connection(), &bindings).execute(&tree)?;
        Ok(result.into_iter().next())
    }

    pub(crate) fn run(&self, compiled: &CompiledQuery, args: &Args) -> Result<QResult> {
        self.authorizer.authorize(AccessKind::Query, &compiled.accessed)?;
        let bindings = compiled.bind(args)?;
        let persistor = self.persistor()?;
        QueryExecutor::new(persistor.connection(), &bindings).execute(&compiled.tree)
    }
}

/// A compiled query ready to run against its database.
pub struct Query<'db> {
    db: &'db Database,
    compiled: CompiledQuery,
}

impl Query<'_> {
    pub fn compiled(&self) -> &CompiledQuery {
        &self.compiled
    }
    pub fn hash(&self) -> &str {
        &self.compiled.hash
    }
    pub fn exec(&self, args: &Args) -> Result<QResult> {
        self.db.run(&self.compiled, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::FieldType;
    use crate::schema::EntityKind;

    #[test]
    fn old_snapshots_survive_a_schema_change() {
        let mut schema = Schema::new();
        schema
            .entity("Country", EntityKind::Master)
            .unwrap()
            .field("name", FieldType::Text)
            .unwrap();
        let db = Database::new(PersistenceMode::InMemory, schema).unwrap();
        let before = db.schema().unwrap();
        db.change_schema(|s| {
            s.add_property("Country", crate::schema::Field::new("code", FieldType::Text).optional())
        })
        .unwrap();
        assert!(before.find("Country").unwrap().get("code").is_none());
        assert!(db.schema().unwrap().find("Country").unwrap().get("code").is_some());
    }
}
