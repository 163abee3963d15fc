//! Compiles `Entity @id == <id|?param>` into a delete instruction. Owned
//! children are left to the store.
use crate::datatype::Args;
use crate::dsl::parse_delete;
use crate::error::{DslError, FcError, Result};
use crate::instruction::{Accessed, Instruction, PropertyKey};
use crate::schema::{ID, Schema};
use crate::update::target_ref;

pub fn compile(schema: &Schema, dsl: &str, args: &Args) -> Result<Instruction> {
    let ast = parse_delete(dsl)?;
    let entity = schema
        .get(&ast.entity)
        .ok_or_else(|| FcError::Semantic(vec![DslError::UnknownEntity(ast.entity.clone())]))?;
    let ref_id = target_ref(entity.name(), &ast.target, args).map_err(|e| FcError::Semantic(vec![e]))?;
    let mut accessed = Accessed::new();
    accessed.insert(PropertyKey::new(entity.name(), ID));
    Ok(Instruction::Delete {
        entity: entity.name().to_owned(),
        ref_id,
        accessed,
    })
}
