mod common;

use std::sync::Arc;

use fcdb::instruction::InputValue;
use fcdb::refs::LinkOp;
use fcdb::{AccessKind, Args, DslError, FcError, FieldType, Instruction, RefId, Transaction, Value};

fn setup() -> Transaction {
    let mut schema = common::schema();
    schema.commit();
    Transaction::new(Arc::new(schema))
}

fn semantic(err: FcError) -> Vec<DslError> {
    err.semantic().to_vec()
}

#[test]
fn nested_create_emits_owner_first() {
    let mut tx = setup();
    let tree = tx
        .create(
            r#"Role {
                name: "admin",
                details: [
                    { name: "d1", active: true, perms: [1, 2] },
                    { name: "d2", active: false, perms: ?perms }
                ]
            }"#,
            &Args::new().with("perms", vec![RefId::from_id(3), RefId::from_id(4)]),
        )
        .unwrap();
    let instructions = tx.instructions();
    assert_eq!(instructions.len(), 3);
    assert!(matches!(&instructions[0], Instruction::Create { entity, .. } if entity == "Role"));
    assert_eq!(instructions[0].ref_id(), tree.root());
    for (i, instruction) in instructions[1..].iter().enumerate() {
        assert_eq!(instruction.kind(), AccessKind::Create);
        assert_eq!(instruction.entity(), "RoleDetail");
        assert_eq!(instruction.ref_id(), tree.find_at("details", i).unwrap());
        assert_eq!(instruction.value("@parent"), Some(&InputValue::Ref(tree.root().clone())));
    }
    let linked = |i: usize| match instructions[i].value("perms") {
        Some(InputValue::Refs(ids)) => ids.iter().map(|r| r.id().unwrap()).collect::<Vec<_>>(),
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(linked(1), vec![1, 2]);
    assert_eq!(linked(2), vec![3, 4]);
    assert_eq!(tree.count("details"), 2);
    assert!(instructions[0].accessed().iter().any(|k| k.to_string() == "Role::details"));
}

#[test]
fn nested_reference_addresses() {
    let mut tx = setup();
    let tree = tx
        .create(
            r#"User { name: "Pedro", address: { city: "Aveiro", country: ?c } }"#,
            &Args::new().with("c", RefId::from_id(1)),
        )
        .unwrap();
    let address = tree.find("address").unwrap();
    assert!(!address.is_assigned());
    let instructions = tx.instructions();
    assert_eq!(instructions[1].entity(), "Address");
    assert_eq!(instructions[1].ref_id(), address);
    assert_eq!(instructions[1].value("@parent"), Some(&InputValue::Ref(tree.root().clone())));
    assert_eq!(instructions[1].value("country"), Some(&InputValue::Ref(RefId::from_id(1))));
    assert_eq!(instructions[1].value("city"), Some(&InputValue::Value(Value::from("Aveiro"))));
}

#[test]
fn literals_are_narrowed_to_declared_types() {
    let mut tx = setup();
    tx.create(
        r#"Simple {
            aText: "t", aInt: 10, aLong: 20, aFloat: 1.5, aDouble: 2.5, aBool: false,
            aTime: #10:00:00, aDate: #2020-10-25, aDateTime: #2020-10-25T15:10:30,
            aList: [1, #2020-10-25, { k: "v" }], aMap: { a: [1, 2] }
        }"#,
        &Args::new(),
    )
    .unwrap();
    let create = &tx.instructions()[0];
    assert_eq!(create.value("aInt"), Some(&InputValue::Value(Value::Int(10))));
    assert_eq!(create.value("aLong"), Some(&InputValue::Value(Value::Long(20))));
    assert_eq!(create.value("aFloat"), Some(&InputValue::Value(Value::Float(1.5))));
    assert_eq!(create.value("aDouble"), Some(&InputValue::Value(Value::Double(2.5))));
}

#[test]
fn create_errors_are_accumulated() {
    let mut tx = setup();
    let err = tx
        .create(r#"Simple { aText: 1, aInt: "x", unknown: 3 }"#, &Args::new())
        .unwrap_err();
    let errors = semantic(err);
    assert!(errors.contains(&DslError::TypeMismatch {
        target: "Simple::aText".into(),
        declared: FieldType::Text,
        attempted: FieldType::Long,
    }));
    assert!(errors.contains(&DslError::TypeMismatch {
        target: "Simple::aInt".into(),
        declared: FieldType::Int,
        attempted: FieldType::Text,
    }));
    assert!(errors.contains(&DslError::UnknownProperty {
        entity: "Simple".into(),
        property: "unknown".into(),
    }));
    assert!(errors.contains(&DslError::MissingValue("Simple::aLong".into())));
    assert!(tx.instructions().is_empty());
}

#[test]
fn create_shape_errors() {
    let mut tx = setup();
    let err = tx.create(r#"User { name: "x", address: 1 }"#, &Args::new()).unwrap_err();
    assert!(matches!(&semantic(err)[..], [DslError::Shape { target, .. }] if target == "User::address"));

    let err = tx
        .create(r#"Address { city: "x", country: { name: "y" }, @parent: 1 }"#, &Args::new())
        .unwrap_err();
    let errors = semantic(err);
    assert!(matches!(&errors[..], [DslError::Shape { target, expected }]
        if target == "Address::country" && expected.starts_with("Expecting typeOf (null, long, param)")));

    // a detail created on its own names its owner
    let err = tx.create(r#"Address { city: "x", country: 1 }"#, &Args::new()).unwrap_err();
    assert_eq!(semantic(err), vec![DslError::MissingValue("Address::@parent".into())]);
    tx.create(r#"Address { city: "x", country: 1, @parent: 1 }"#, &Args::new()).unwrap();

    // but not inside its owner
    let err = tx
        .create(r#"User { name: "x", address: { city: "y", country: 1, @parent: 2 } }"#, &Args::new())
        .unwrap_err();
    assert!(matches!(&semantic(err)[..], [DslError::InvalidValue { target, .. }] if target == "Address::@parent"));

    let err = tx.create(r#"Nothing { a: 1 }"#, &Args::new()).unwrap_err();
    assert_eq!(semantic(err), vec![DslError::UnknownEntity("Nothing".into())]);
}

#[test]
fn unresolved_parameters() {
    let mut tx = setup();
    let err = tx.create(r#"Country { name: ?name, code: "PT" }"#, &Args::new()).unwrap_err();
    assert_eq!(
        semantic(err),
        vec![DslError::UnresolvedParameter {
            name: "name".into(),
            target: "Country::name".into()
        }]
    );
}

#[test]
fn update_fields_and_links() {
    let mut tx = setup();
    tx.update(r#"Address @id == ?id { city: "Porto" }"#, &Args::new().with("id", 1i64))
        .unwrap();
    tx.update(r#"Address @id = 1 { country: @add 2 }"#, &Args::new()).unwrap();
    tx.update(r#"RoleDetail @id == 1 { perms: @del [1, 2] }"#, &Args::new()).unwrap();
    tx.update(r#"RoleDetail @id == 1 { perms: @add ?p, @parent: 2 }"#, &Args::new().with("p", RefId::from_id(3)))
        .unwrap();

    let instructions = tx.instructions();
    assert_eq!(instructions[0].ref_id().id(), Some(1));
    assert_eq!(instructions[0].value("city"), Some(&InputValue::Value(Value::from("Porto"))));
    assert!(matches!(instructions[1].value("country"), Some(InputValue::Link(l)) if l.op == LinkOp::Add && l.ref_id.id() == Some(2)));
    match instructions[2].value("perms") {
        Some(InputValue::Links(links)) => {
            assert_eq!(links.len(), 2);
            assert!(links.iter().all(|l| l.op == LinkOp::Del));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(instructions[3].value("perms"), Some(InputValue::Links(l)) if l.len() == 1));
    assert_eq!(instructions[3].value("@parent"), Some(&InputValue::Ref(RefId::from_id(2))));
    assert_eq!(instructions[3].to_string(), "Update(RoleDetail) @id=1 - {perms=[@add 3], @parent=@2}");
}

#[test]
fn relations_cannot_be_replaced_through_update() {
    let mut tx = setup();
    let err = tx
        .update(r#"Address @id == ?id { country: { name: "Spain", code: "ES" } }"#, &Args::new().with("id", 1i64))
        .unwrap_err();
    assert!(matches!(&semantic(err)[..], [DslError::Shape { target, .. }] if target == "Address::country"));

    let err = tx.update(r#"User @id == 1 { address: { city: "x" } }"#, &Args::new()).unwrap_err();
    assert_eq!(semantic(err), vec![DslError::OwnedMutation("User::address".into())]);

    let err = tx.update(r#"Role @id == 1 { details: @add 3 }"#, &Args::new()).unwrap_err();
    assert_eq!(semantic(err), vec![DslError::OwnedMutation("Role::details".into())]);

    let err = tx.update(r#"User @id == 1 { name: @add 3 }"#, &Args::new()).unwrap_err();
    assert!(matches!(&semantic(err)[..], [DslError::Shape { .. }]));

    let err = tx.update(r#"User @id == 1 { @id: 3 }"#, &Args::new()).unwrap_err();
    assert_eq!(semantic(err), vec![DslError::NotInput("User::@id".into())]);
    assert!(tx.instructions().is_empty());
}

#[test]
fn delete_targets() {
    let mut tx = setup();
    tx.delete("User @id == 2", &Args::new()).unwrap();
    tx.delete("User @id == ?id", &Args::new().with("id", RefId::from_id(3))).unwrap();
    assert_eq!(tx.instructions()[0].to_string(), "Delete(User) @id=2");
    assert_eq!(tx.instructions()[1].ref_id().id(), Some(3));
    assert!(tx.instructions()[1].accessed().iter().any(|k| k.to_string() == "User::@id"));

    let err = tx.delete("User @id == ?id", &Args::new()).unwrap_err();
    assert!(matches!(&semantic(err)[..], [DslError::UnresolvedParameter { .. }]));
}

#[test]
fn syntax_errors_have_positions() {
    let mut tx = setup();
    let err = tx.create("User { name: }", &Args::new()).unwrap_err();
    match err {
        FcError::Syntax(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].line, 1);
            assert!(errors[0].col > 1);
        }
        other => panic!("unexpected {}", other),
    }
}
