//! fcdb – a typed entity schema, a compact DSL and a relational mapping
//! engine over SQLite.
//!
//! An application declares entities with typed fields and two kinds of
//! relations:
//! * *owned* relations are composition. Only `DETAIL` entities can be owned,
//!   and an owned entity gains a `@parent` reference pointing at its owner.
//! * *linked* relations are associations between independent rows, stored
//!   in a link table `"<Entity>_<relation>"` of `(@inv, @ref)` pairs.
//!
//! Data is then written and read through a small DSL:
//! * create: `User { name: "Pedro", address: { city: "Aveiro", country: ?pt } }`
//! * update: `Address @id == ?id { city: "Porto" }`, with `@add`/`@del` for links
//! * delete: `User @id == ?id`
//! * query: `User | address.city == "Aveiro" | limit 10 { *, address { city } }`
//!
//! ## Modules
//! * [`schema`] – entities, properties and the ownership rules.
//! * [`datatype`] – field types, the [`datatype::Value`] enum and the type engine.
//! * [`dsl`] – the pest grammar and its syntax trees.
//! * [`create`], [`update`], [`delete`] – compile DSL text into [`instruction::Instruction`]s.
//! * [`query`] – compiles queries into a [`query::QTree`].
//! * [`mapper`] – executes a query tree with joins and correlated sub-queries.
//! * [`persist`] – owns the SQLite connection, creates tables and applies batches.
//! * [`database`] – the facade tying all of the above together.
//!
//! ## Quick Start
//! ```
//! use fcdb::{Args, Database, EntityKind, FieldType, PersistenceMode, Schema};
//! let mut schema = Schema::new();
//! schema
//!     .entity("Country", EntityKind::Master)?
//!     .field("name", FieldType::Text)?
//!     .field("code", FieldType::Text)?;
//! let db = Database::new(PersistenceMode::InMemory, schema)?;
//! db.tx(|tx| tx.create(r#"Country { name: "Portugal", code: "PT" }"#, &Args::new()))?;
//! let rows = db
//!     .query("Country | code == ?code | { name }")?
//!     .exec(&Args::new().with("code", "PT"))?;
//! assert_eq!(rows.to_string(), "[{@id=1, name=Portugal}]");
//! # Ok::<(), fcdb::FcError>(())
//! ```
//!
//! ## License
//! Dual licensed under Apache-2.0 and MIT.

pub mod create;
pub mod database;
pub mod datatype;
pub mod delete;
pub mod dsl;
pub mod error;
pub mod instruction;
pub mod mapper;
pub mod persist;
pub mod query;
pub mod refs;
pub mod result;
pub mod schema;
pub mod security;
pub mod settings;
pub mod sql;
pub mod update;

pub use database::{Database, Query};
pub use datatype::{Arg, Args, FieldType, Value};
pub use error::{DslError, FcError, Result};
pub use instruction::{Instruction, Transaction};
pub use persist::PersistenceMode;
pub use refs::{RefId, RefTree};
pub use result::{Data, QResult, Row};
pub use schema::{Collection, EntityKind, Field, Reference, RelationKind, Schema};
pub use security::{AccessKind, AllowAll, Authorizer, DenyProperties};
pub use settings::Settings;
