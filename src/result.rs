//! The nested rows returned by a query.
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::datatype::Value;
use crate::schema::ID;

#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Value(Value),
    One(Row),
    Many(Vec<Row>),
}

/// One result row. `@id` is always the first entry. An absent to-one
/// relation is left out, an empty to-many relation is an empty list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, Data)>,
}

impl Row {
    pub(crate) fn new() -> Self {
        Self::default()
    }
    pub(crate) fn push(&mut self, name: &str, data: Data) {
        self.entries.push((name.to_owned(), data));
    }
    /// Replaces the entry `name`, or appends it.
    pub(crate) fn set(&mut self, name: &str, data: Data) {
        match self.entries.iter().position(|(n, _)| n == name) {
            Some(i) => self.entries[i].1 = data,
            None => self.push(name, data),
        }
    }
    pub(crate) fn one_mut(&mut self, name: &str) -> Option<&mut Row> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, Data::One(r))) => Some(r),
            _ => None,
        }
    }
    pub fn id(&self) -> Option<i64> {
        self.value(ID).and_then(|v| v.as_long())
    }
    pub fn get(&self, name: &str) -> Option<&Data> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(Data::Value(v)) => Some(v),
            _ => None,
        }
    }
    pub fn one(&self, name: &str) -> Option<&Row> {
        match self.get(name) {
            Some(Data::One(r)) => Some(r),
            _ => None,
        }
    }
    pub fn many(&self, name: &str) -> Option<&[Row]> {
        match self.get(name) {
            Some(Data::Many(rows)) => Some(rows),
            _ => None,
        }
    }
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Data)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QResult {
    pub rows: Vec<Row>,
}

impl QResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl IntoIterator for QResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;
    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

// ------------- Display -------------
fn rows(f: &mut fmt::Formatter, rows: &[Row]) -> fmt::Result {
    write!(f, "[")?;
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", row)?;
    }
    write!(f, "]")
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Data::Value(v) => write!(f, "{}", v),
            Data::One(row) => write!(f, "{}", row),
            Data::Many(many) => rows(f, many),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, data)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, data)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for QResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        rows(f, &self.rows)
    }
}

// ------------- JSON -------------
// values are written plainly, temporal values in their DSL form
struct Plain<'a>(&'a Value);

impl Serialize for Plain<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Int(i) => serializer.serialize_i32(*i),
            Value::Long(l) => serializer.serialize_i64(*l),
            Value::Float(x) => serializer.serialize_f32(*x),
            Value::Double(x) => serializer.serialize_f64(*x),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Time(_) | Value::Date(_) | Value::DateTime(_) => serializer.serialize_str(&self.0.to_string()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Plain(item))?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, &Plain(v))?;
                }
                map.end()
            }
        }
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Data::Value(v) => Plain(v).serialize(serializer),
            Data::One(row) => row.serialize(serializer),
            Data::Many(rows) => rows.serialize(serializer),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, data) in &self.entries {
            map.serialize_entry(name, data)?;
        }
        map.end()
    }
}

impl Serialize for QResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_json() {
        let mut address = Row::new();
        address.push("@id", Data::Value(Value::Long(1)));
        address.push("city", Data::Value(Value::Text("Aveiro".into())));
        let mut user = Row::new();
        user.push("@id", Data::Value(Value::Long(1)));
        user.push("name", Data::Value(Value::Text("Pedro".into())));
        user.push("address", Data::One(address));
        user.push("roles", Data::Many(Vec::new()));
        let result = QResult { rows: vec![user] };

        assert_eq!(result.to_string(), "[{@id=1, name=Pedro, address={@id=1, city=Aveiro}, roles=[]}]");
        assert_eq!(
            result.to_json().unwrap(),
            r#"[{"@id":1,"name":"Pedro","address":{"@id":1,"city":"Aveiro"},"roles":[]}]"#
        );
        assert_eq!(result.rows[0].id(), Some(1));
        assert_eq!(result.rows[0].one("address").and_then(|a| a.value("city")), Some(&Value::Text("Aveiro".into())));
    }
}
