#![allow(dead_code)]
use std::sync::Once;

use fcdb::{Args, Collection, Database, EntityKind, Field, FieldType, PersistenceMode, Reference, Schema, Settings};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test writer subscriber once, `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Settings::default().log.filter));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

pub fn schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .entity("Simple", EntityKind::Master)
        .unwrap()
        .field("aText", FieldType::Text)
        .unwrap()
        .field("aInt", FieldType::Int)
        .unwrap()
        .field("aLong", FieldType::Long)
        .unwrap()
        .field("aFloat", FieldType::Float)
        .unwrap()
        .field("aDouble", FieldType::Double)
        .unwrap()
        .field("aBool", FieldType::Bool)
        .unwrap()
        .field("aTime", FieldType::Time)
        .unwrap()
        .field("aDate", FieldType::Date)
        .unwrap()
        .field("aDateTime", FieldType::DateTime)
        .unwrap()
        .field("aList", FieldType::List)
        .unwrap()
        .field("aMap", FieldType::Map)
        .unwrap();
    schema
        .entity("Ordered", EntityKind::Master)
        .unwrap()
        .field("aText", FieldType::Text)
        .unwrap()
        .field("aFloat", FieldType::Float)
        .unwrap()
        .field("aDateTime", FieldType::DateTime)
        .unwrap();

    // owned/linked references
    schema
        .entity("Country", EntityKind::Master)
        .unwrap()
        .field("name", FieldType::Text)
        .unwrap()
        .field("code", FieldType::Text)
        .unwrap();
    schema
        .entity("Address", EntityKind::Detail)
        .unwrap()
        .field("city", FieldType::Text)
        .unwrap()
        .linked_ref("country", "Country")
        .unwrap();
    schema
        .entity("User", EntityKind::Master)
        .unwrap()
        .field("name", FieldType::Text)
        .unwrap()
        .property(Field::new("email", FieldType::Text).optional())
        .unwrap()
        .property(Reference::owned("address", "Address"))
        .unwrap();

    // owned/linked collections
    schema
        .entity("Permission", EntityKind::Master)
        .unwrap()
        .field("name", FieldType::Text)
        .unwrap()
        .field("url", FieldType::Text)
        .unwrap();
    schema
        .entity("RoleDetail", EntityKind::Detail)
        .unwrap()
        .field("name", FieldType::Text)
        .unwrap()
        .field("active", FieldType::Bool)
        .unwrap()
        .property(Collection::linked("perms", "Permission"))
        .unwrap();
    schema
        .entity("Role", EntityKind::Master)
        .unwrap()
        .field("name", FieldType::Text)
        .unwrap()
        .owned_col("details", "RoleDetail")
        .unwrap();
    schema
}

/// An in-memory database with the schema above and no rows.
pub fn empty() -> Database {
    init_tracing();
    Database::new(PersistenceMode::InMemory, schema()).unwrap()
}

/// An in-memory database seeded with the rows every query test reads.
pub fn setup() -> Database {
    let db = empty();
    db.tx(|tx| {
        let none = Args::new();
        tx.create(r#"Ordered { aText: "b1-text", aFloat: 1.4, aDateTime: #2020-01-02T15:00:00 }"#, &none)?;
        tx.create(r#"Ordered { aText: "a1-text", aFloat: 1.2, aDateTime: #2020-01-01T15:00:00 }"#, &none)?;
        tx.create(r#"Ordered { aText: "c1-text", aFloat: 1.3, aDateTime: #2020-01-01T15:30:00 }"#, &none)?;
        tx.create(r#"Ordered { aText: "d1-text", aFloat: 2.6, aDateTime: #2019-01-01T15:30:10 }"#, &none)?;
        tx.create(r#"Ordered { aText: "a2-text", aFloat: 2.5, aDateTime: #2019-02-01T15:30:00 }"#, &none)?;

        tx.create(
            r#"Simple {
                aText: "newText",
                aInt: 10,
                aLong: 20,
                aFloat: 10.0,
                aDouble: 20.0,
                aBool: true,
                aTime: #15:10:30,
                aDate: #2020-10-25,
                aDateTime: #2020-10-25T15:10:30,
                aList: [1, "2"],
                aMap: { one: 1, two: 2 }
            }"#,
            &none,
        )?;

        let portugal = tx.create(r#"Country { name: "Portugal", code: "PT" }"#, &none)?;
        let spain = tx.create(r#"Country { name: "Spain", code: "ES" }"#, &none)?;

        tx.create(
            r#"User {
                name: "Pedro",
                email: "pedro@mail.com",
                address: { city: "Aveiro", country: ?country }
            }"#,
            &Args::new().with("country", &portugal),
        )?;
        tx.create(
            r#"User {
                name: "Alex",
                email: "alex@mail.com",
                address: { city: "Barcelona", country: ?country }
            }"#,
            &Args::new().with("country", &spain),
        )?;

        let perm1 = tx.create(r#"Permission { name: "perm-1", url: "http://url-1" }"#, &none)?;
        let perm2 = tx.create(r#"Permission { name: "perm-2", url: "http://url-2" }"#, &none)?;
        let perm3 = tx.create(r#"Permission { name: "perm-3", url: "http://url-3" }"#, &none)?;
        let perm4 = tx.create(r#"Permission { name: "perm-4", url: "http://url-4" }"#, &none)?;

        tx.create(
            r#"Role {
                name: "role-name-1",
                details: [
                    { name: "role-det-11", active: true, perms: ?perms1 },
                    { name: "role-det-12", active: false, perms: ?perms2 }
                ]
            }"#,
            &Args::new()
                .with("perms1", vec![&perm1, &perm2])
                .with("perms2", vec![&perm3, &perm4]),
        )?;
        tx.create(
            r#"Role {
                name: "role-name-2",
                details: [
                    { name: "role-det-21", active: true, perms: ?perms1 },
                    { name: "role-det-22", active: false, perms: ?perms2 }
                ]
            }"#,
            &Args::new()
                .with("perms1", vec![&perm4, &perm3])
                .with("perms2", vec![&perm2, &perm1]),
        )?;
        Ok(())
    })
    .unwrap();
    db
}
