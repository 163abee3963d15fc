// used for time, date and datetime values
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
// list and map values are persisted through serde
use serde::{Deserialize, Serialize};

// used to print out readable forms of a value
use std::fmt;

// other maps use HashMap with a fast hasher
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::{BTreeMap, HashMap};

use crate::refs::{RefId, RefTree};

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// ------------- FieldType -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Time,
    Date,
    DateTime,
    List,
    Map,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Int => "int",
            FieldType::Long => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::Time => "time",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::List => "list",
            FieldType::Map => "map",
        }
    }
    /// List and map fields hold any nested value.
    pub fn is_container(&self) -> bool {
        matches!(self, FieldType::List | FieldType::Map)
    }
}
impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ------------- Value -------------
/// Every value that can enter the system, either as a DSL literal, a bound
/// argument or a stored column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Null,
    Text(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Time(NaiveTime),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i as i64),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Text(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Double(x) => write!(f, "{:?}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(d) => write!(f, "{}", d.format(DATETIME_FORMAT)),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Map(entries) => {
                let entries: Vec<String> = entries.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
        }
    }
}

macro_rules! value_from {
    ($($host:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$host> for Value {
                fn from(v: $host) -> Self {
                    Value::$variant(v)
                }
            }
        )+
    };
}
value_from!(
    String => Text,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    NaiveTime => Time,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    Vec<Value> => List,
    BTreeMap<String, Value> => Map,
);
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

// ------------- Type Engine -------------
/// Maps a value to its field type. `Null` carries no type.
pub fn convert(value: &Value) -> Option<FieldType> {
    let field_type = match value {
        Value::Null => return None,
        Value::Text(_) => FieldType::Text,
        Value::Int(_) => FieldType::Int,
        Value::Long(_) => FieldType::Long,
        Value::Float(_) => FieldType::Float,
        Value::Double(_) => FieldType::Double,
        Value::Bool(_) => FieldType::Bool,
        Value::Time(_) => FieldType::Time,
        Value::Date(_) => FieldType::Date,
        Value::DateTime(_) => FieldType::DateTime,
        Value::List(_) => FieldType::List,
        Value::Map(_) => FieldType::Map,
    };
    Some(field_type)
}

/// Exact check of a value against a declared type.
pub fn check(field_type: FieldType, value: &Value) -> bool {
    convert(value) == Some(field_type)
}

/// Implicit widening between a declared type and the lexical type of a literal.
/// Int accepts long, float accepts double. Lists and maps accept anything.
pub fn try_type(declared: FieldType, attempted: FieldType) -> bool {
    if declared.is_container() {
        return true;
    }
    let widened = match declared {
        FieldType::Int => FieldType::Long,
        FieldType::Float => FieldType::Double,
        other => other,
    };
    attempted == declared || attempted == widened
}

/// Narrows a widened value back into the declared type. Callers must have
/// passed `try_type` first.
pub fn coerce(declared: FieldType, value: Value) -> std::result::Result<Value, String> {
    match (declared, value) {
        (FieldType::Int, Value::Long(l)) => i32::try_from(l)
            .map(Value::Int)
            .map_err(|_| format!("{} does not fit into an int", l)),
        (FieldType::Float, Value::Double(d)) => {
            if d.is_finite() && d.abs() > f32::MAX as f64 {
                Err(format!("{} does not fit into a float", d))
            } else {
                Ok(Value::Float(d as f32))
            }
        }
        (_, value) => Ok(value),
    }
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).ok()
}
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok()
}

// ------------- Arguments -------------
/// A value bound to a `?name` parameter.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Ref(RefId),
    Refs(Vec<RefId>),
}

macro_rules! arg_from_value {
    ($($host:ty),+ $(,)?) => {
        $(
            impl From<$host> for Arg {
                fn from(v: $host) -> Self {
                    Arg::Value(Value::from(v))
                }
            }
        )+
    };
}
arg_from_value!(String, &str, i32, i64, f32, f64, bool, NaiveTime, NaiveDate, NaiveDateTime, Vec<Value>, BTreeMap<String, Value>);

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}
impl From<RefId> for Arg {
    fn from(r: RefId) -> Self {
        Arg::Ref(r)
    }
}
impl From<&RefId> for Arg {
    fn from(r: &RefId) -> Self {
        Arg::Ref(r.clone())
    }
}
impl From<RefTree> for Arg {
    fn from(t: RefTree) -> Self {
        Arg::Ref(t.root().clone())
    }
}
impl From<&RefTree> for Arg {
    fn from(t: &RefTree) -> Self {
        Arg::Ref(t.root().clone())
    }
}
impl From<Vec<RefId>> for Arg {
    fn from(refs: Vec<RefId>) -> Self {
        Arg::Refs(refs)
    }
}
impl From<Vec<RefTree>> for Arg {
    fn from(trees: Vec<RefTree>) -> Self {
        Arg::Refs(trees.iter().map(|t| t.root().clone()).collect())
    }
}
impl From<Vec<&RefTree>> for Arg {
    fn from(trees: Vec<&RefTree>) -> Self {
        Arg::Refs(trees.iter().map(|t| t.root().clone()).collect())
    }
}

/// Named parameter bindings supplied next to a DSL text.
#[derive(Debug, Clone, Default)]
pub struct Args {
    bound: HashMap<String, Arg, OtherHasher>,
}
impl Args {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, name: &str, arg: impl Into<Arg>) -> Self {
        self.bound.insert(name.to_owned(), arg.into());
        self
    }
    pub fn set(&mut self, name: &str, arg: impl Into<Arg>) {
        self.bound.insert(name.to_owned(), arg.into());
    }
    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.bound.get(name)
    }
    /// The plain value bound to a name, if the binding is not a reference.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.bound.get(name) {
            Some(Arg::Value(v)) => Some(v),
            _ => None,
        }
    }
    pub fn len(&self) -> usize {
        self.bound.len()
    }
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_rule() {
        assert!(try_type(FieldType::Int, FieldType::Long));
        assert!(try_type(FieldType::Int, FieldType::Int));
        assert!(try_type(FieldType::Float, FieldType::Double));
        assert!(!try_type(FieldType::Long, FieldType::Double));
        assert!(!try_type(FieldType::Text, FieldType::Long));
        assert!(try_type(FieldType::List, FieldType::List));
        assert!(try_type(FieldType::List, FieldType::Date));
        assert!(try_type(FieldType::Map, FieldType::Text));
        assert!(try_type(FieldType::Map, FieldType::List));
    }

    #[test]
    fn coercion_narrows_literals() {
        assert_eq!(coerce(FieldType::Int, Value::Long(10)).unwrap(), Value::Int(10));
        assert_eq!(coerce(FieldType::Float, Value::Double(1.5)).unwrap(), Value::Float(1.5));
        assert!(coerce(FieldType::Int, Value::Long(i64::MAX)).is_err());
        assert_eq!(coerce(FieldType::Long, Value::Long(7)).unwrap(), Value::Long(7));
    }

    #[test]
    fn convert_and_check() {
        assert_eq!(convert(&Value::from("a")), Some(FieldType::Text));
        assert_eq!(convert(&Value::Null), None);
        assert!(check(FieldType::Bool, &Value::Bool(true)));
        assert!(!check(FieldType::Long, &Value::Int(1)));
    }

    #[test]
    fn temporal_display_uses_dsl_forms() {
        let dt = parse_datetime("2020-10-25T15:10:30").unwrap();
        assert_eq!(Value::DateTime(dt).to_string(), "2020-10-25T15:10:30");
        assert_eq!(Value::Time(parse_time("15:10:30").unwrap()).to_string(), "15:10:30");
        assert_eq!(Value::Double(10.0).to_string(), "10.0");
    }
}
