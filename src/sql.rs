// used for persistence
use rusqlite::types::{FromSql, ToSql, ToSqlOutput, ValueRef};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::datatype::{FieldType, Value};
use crate::error::{FcError, Result};
use crate::schema::{ID, PARENT};

pub const INV: &str = "@inv";
pub const REF: &str = "@ref";

pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `alias."column"`
pub fn column(alias: &str, name: &str) -> String {
    format!("{}.{}", alias, quote(name))
}

pub fn table(entity: &str) -> String {
    quote(entity)
}

/// Link table of a linked relation, one `(@inv, @ref)` row per link.
pub fn aux_table(entity: &str, relation: &str) -> String {
    quote(&format!("{}_{}", entity, relation))
}

pub fn column_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Int | FieldType::Long | FieldType::Bool => "integer",
        FieldType::Float | FieldType::Double => "real",
        _ => "text",
    }
}

pub fn id() -> String {
    quote(ID)
}
pub fn parent() -> String {
    quote(PARENT)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
            Value::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            Value::Int(i) => Ok(ToSqlOutput::from(*i)),
            Value::Long(l) => Ok(ToSqlOutput::from(*l)),
            Value::Float(x) => Ok(ToSqlOutput::from(f64::from(*x))),
            Value::Double(x) => Ok(ToSqlOutput::from(*x)),
            Value::Bool(b) => Ok(ToSqlOutput::from(*b)),
            Value::Time(t) => t.to_sql(),
            Value::Date(d) => d.to_sql(),
            Value::DateTime(d) => d.to_sql(),
            Value::List(_) | Value::Map(_) => serde_json::to_string(self)
                .map(ToSqlOutput::from)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e))),
        }
    }
}

/// The value written to a column of `field_type`. List and map columns hold
/// JSON whatever the variant of the value.
pub fn to_column(field_type: FieldType, value: &Value) -> Result<Value> {
    match (field_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldType::List | FieldType::Map, value) => Ok(Value::Text(serde_json::to_string(value)?)),
        (_, value) => Ok(value.clone()),
    }
}

/// Reads a stored column back into the declared type of its field.
pub fn from_sql(field_type: FieldType, raw: ValueRef<'_>) -> Result<Value> {
    if let ValueRef::Null = raw {
        return Ok(Value::Null);
    }
    let convert = |e: rusqlite::types::FromSqlError| FcError::Persistence(format!("reading a {}: {}", field_type, e));
    let value = match field_type {
        FieldType::Text => Value::Text(String::column_result(raw).map_err(convert)?),
        FieldType::Int => Value::Int(i32::column_result(raw).map_err(convert)?),
        FieldType::Long => Value::Long(i64::column_result(raw).map_err(convert)?),
        FieldType::Float => Value::Float(f64::column_result(raw).map_err(convert)? as f32),
        FieldType::Double => Value::Double(f64::column_result(raw).map_err(convert)?),
        FieldType::Bool => Value::Bool(bool::column_result(raw).map_err(convert)?),
        FieldType::Time => Value::Time(NaiveTime::column_result(raw).map_err(convert)?),
        FieldType::Date => Value::Date(NaiveDate::column_result(raw).map_err(convert)?),
        FieldType::DateTime => Value::DateTime(NaiveDateTime::column_result(raw).map_err(convert)?),
        FieldType::List | FieldType::Map => {
            let text = raw.as_str().map_err(convert)?;
            serde_json::from_str(text)?
        }
    };
    Ok(value)
}
