mod common;

use fcdb::error::DslError;
use fcdb::query::{self, QBound};
use fcdb::{AccessKind, Args, DenyProperties, FcError, FieldType, Value};

fn errors(dsl: &str) -> Vec<DslError> {
    match query::compile(&common::schema(), dsl) {
        Err(e @ FcError::Semantic(_)) => e.semantic().to_vec(),
        other => panic!("expected a compile error for {}, found {:?}", dsl, other.map(|c| c.tree)),
    }
}

#[test]
fn pagination_rules() {
    assert_eq!(
        errors("User { name, address limit 1 { city } }"),
        vec![DslError::Pagination("limit is not allowed on the single reference to 'Address'".into())]
    );
    assert_eq!(
        errors("Ordered page 2 { * }"),
        vec![DslError::Pagination("'Ordered' has a page without a limit".into())]
    );
    assert_eq!(
        errors("Ordered limit 0 { * }"),
        vec![DslError::Pagination("limit must be greater than 0, found 0".into())]
    );

    let compiled = query::compile(&common::schema(), "Role { details limit ?l page 2 { name } }").unwrap();
    let details = &compiled.tree.select.relations[0];
    assert!(details.many);
    assert_eq!(details.tree.limit, Some(QBound::Param("l".into())));
    assert_eq!(details.tree.page, Some(QBound::Literal(2)));
}

#[test]
fn parameters_are_declared_once() {
    assert_eq!(
        errors("Ordered | aText == ?x or aFloat > ?x | { * }"),
        vec![DslError::ParameterCollision("x".into())]
    );

    let compiled = query::compile(&common::schema(), "Ordered | aText in ?names | limit ?l { aText }").unwrap();
    let declared: Vec<_> = compiled
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.field_type, p.is_list, p.is_limit_or_page))
        .collect();
    assert_eq!(
        declared,
        vec![("names", FieldType::Text, true, false), ("l", FieldType::Long, false, true)]
    );
}

#[test]
fn paths_must_end_on_fields() {
    assert_eq!(
        errors(r#"User | address == 1 | { name }"#),
        vec![DslError::InvalidPath {
            path: "address".into(),
            valid: vec!["address.@id".into(), "address.city".into()],
        }]
    );
    assert_eq!(
        errors(r#"User | name.city == "x" | { name }"#),
        vec![DslError::InvalidPath {
            path: "name.city".into(),
            valid: vec!["address".into()],
        }]
    );
    assert_eq!(
        errors(r#"Address | city.name == "x" | { city }"#),
        vec![DslError::InvalidPath {
            path: "city.name".into(),
            valid: vec!["country".into(), "@parent".into()],
        }]
    );
    assert_eq!(
        errors(r#"User | address.street == "x" | { name }"#),
        vec![DslError::UnknownProperty {
            entity: "Address".into(),
            property: "street".into(),
        }]
    );
}

#[test]
fn selection_rules() {
    assert_eq!(
        errors("Ordered { (asc 1) aText, (dsc 1) aFloat }"),
        vec![DslError::DuplicateOrder {
            entity: "Ordered".into(),
            order: 1,
        }]
    );
    assert!(matches!(
        errors("Ordered { (asc 0) aText }").as_slice(),
        [DslError::InvalidValue { .. }]
    ));
    assert!(matches!(errors("User { address }").as_slice(), [DslError::Shape { .. }]));
    assert!(matches!(errors("User { name { x } }").as_slice(), [DslError::Shape { .. }]));
    assert_eq!(errors("Nope { * }"), vec![DslError::UnknownEntity("Nope".into())]);
}

#[test]
fn filters_are_typed() {
    assert_eq!(
        errors(r#"Ordered | aFloat == "x" | { * }"#),
        vec![DslError::TypeMismatch {
            target: "Ordered::aFloat".into(),
            declared: FieldType::Float,
            attempted: FieldType::Text,
        }]
    );
    assert!(matches!(
        errors("Simple | aList == 1 | { * }").as_slice(),
        [DslError::InvalidValue { target, .. }] if target == "Simple::aList"
    ));
    assert!(matches!(
        errors(r#"Country | code in "PT" | { * }"#).as_slice(),
        [DslError::Shape { .. }]
    ));
    assert!(matches!(
        errors(r#"Country | code > null | { * }"#).as_slice(),
        [DslError::Shape { .. }]
    ));
}

#[test]
fn errors_are_accumulated() {
    let found = errors(r#"User | age == 1 | { foo, (asc 1) name, (asc 1) email }"#);
    assert_eq!(found.len(), 3);
    assert!(found.contains(&DslError::UnknownProperty {
        entity: "User".into(),
        property: "age".into(),
    }));
    assert!(found.contains(&DslError::UnknownProperty {
        entity: "User".into(),
        property: "foo".into(),
    }));
    let err = query::compile(&common::schema(), "User | age == 1 | { name }").unwrap_err();
    assert_eq!(err.to_string(), "Compile error: Property 'age' not found in entity 'User'");
}

#[test]
fn hash_ignores_whitespace() {
    let schema = common::schema();
    let a = query::compile(&schema, "Ordered | aFloat > 1.3 | { aText }").unwrap();
    let b = query::compile(&schema, "Ordered  |  aFloat > 1.3\n|\t{ aText }").unwrap();
    let c = query::compile(&schema, "Ordered | aFloat > 1.4 | { aText }").unwrap();
    assert_eq!(a.hash, b.hash);
    assert_ne!(a.hash, c.hash);
    assert_eq!(a.hash.len(), 64);
}

#[test]
fn accessed_properties() {
    let compiled = query::compile(&common::schema(), r#"User | address.city == "Aveiro" | { name }"#).unwrap();
    let accessed: Vec<String> = compiled.accessed.iter().map(|k| k.to_string()).collect();
    let mut expected = vec!["Address::city", "User::@id", "User::address", "User::name"];
    expected.sort();
    let mut accessed = accessed;
    accessed.sort();
    assert_eq!(accessed, expected);
}

#[test]
fn arguments_are_checked_when_bound() {
    let compiled = query::compile(&common::schema(), "Ordered | aText in ?names | limit ?l { aText }").unwrap();

    let bound = compiled
        .bind(
            &Args::new()
                .with("names", vec![Value::from("a1-text")])
                .with("l", 2),
        )
        .unwrap();
    assert_eq!(bound.get("l"), Some(&Value::Long(2)));
    assert_eq!(
        bound.get("names"),
        Some(&Value::List(vec![Value::Text("a1-text".into())]))
    );

    let err = compiled
        .bind(&Args::new().with("names", vec![Value::from("a1-text")]).with("l", 0))
        .unwrap_err();
    assert!(matches!(err, FcError::Execution(_)));

    let err = compiled.bind(&Args::new().with("names", "a1-text").with("l", 1)).unwrap_err();
    assert_eq!(err.to_string(), "Execution error: '?names' must be a list, found a1-text");

    let err = compiled
        .bind(&Args::new().with("names", vec![Value::from(1)]).with("l", 1))
        .unwrap_err();
    assert!(matches!(err, FcError::Execution(_)));
}

#[test]
fn denied_queries_do_not_run() {
    let db = common::setup().with_authorizer(DenyProperties::new().deny(AccessKind::Query, "User", "email"));
    let rows = db.query("User { name }").unwrap().exec(&Args::new()).unwrap();
    assert_eq!(rows.len(), 2);
    let err = db.query("User { * }").unwrap().exec(&Args::new()).unwrap_err();
    assert_eq!(err.to_string(), "Unauthorized: No query access to User::email");
    let err = db
        .query(r#"User | email == "pedro@mail.com" | { name }"#)
        .unwrap()
        .exec(&Args::new())
        .unwrap_err();
    assert!(matches!(err, FcError::Authorization(_)));
    assert!(matches!(db.get("User", 1), Err(FcError::Authorization(_))));
}

#[test]
fn denied_instructions_roll_back_the_batch() {
    let db = common::empty().with_authorizer(DenyProperties::new().deny(AccessKind::Create, "User", "email"));
    let err = db
        .tx(|tx| {
            let pt = tx.create(r#"Country { name: "Portugal", code: "PT" }"#, &Args::new())?;
            tx.create(
                r#"User { name: "Pedro", email: "p@mail.com", address: { city: "Aveiro", country: ?pt } }"#,
                &Args::new().with("pt", &pt),
            )
        })
        .unwrap_err();
    assert!(matches!(err, FcError::Authorization(_)));
    let rows = db.query("Country { * }").unwrap().exec(&Args::new()).unwrap();
    assert!(rows.is_empty());
}
