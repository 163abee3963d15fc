//! Executes a [`QTree`] against the row store.
//!
//! Every level is a single select: the level's own columns plus every to-one
//! relation joined in with a LEFT JOIN (their filters become join
//! conditions). To-many relations are independent selects restricted to the
//! ids of the rows above them, passed as one JSON array, and are stitched back
//! in afterwards, grouped by the correlating column. Filter paths crossing relations are rendered as
//! correlated `IN (SELECT ...)` sub-selects so no fan-out reaches a level.
use std::collections::HashMap;

use roaring::RoaringTreemap;
use rusqlite::{Connection, params_from_iter};
use tracing::debug;

use crate::datatype::{FieldType, OtherHasher, Value};
use crate::dsl::{Comparator, SortDir};
use crate::error::{FcError, Result};
use crate::query::{Bindings, QBound, QExpression, QOperand, QPredicate, QRelation, QStep, QTree};
use crate::result::{Data, QResult, Row};
use crate::schema::{ID, PARENT, RelationKind};
use crate::sql::{INV, REF, aux_table, column, from_sql, table};

// where the columns of one joined level sit in the select list
struct Layout<'t> {
    entity: &'t str,
    id: usize,
    fields: Vec<(&'t str, FieldType, usize)>,
    slots: Vec<Slot<'t>>,
}

enum Slot<'t> {
    One(&'t str, Layout<'t>),
    Many(&'t QRelation),
}

// restricts a to-many level to the rows above it
struct Scope<'s> {
    source: &'s str,
    relation: &'s QRelation,
    ids: RoaringTreemap,
}

struct SortKey {
    order: i64,
    depth: usize,
    expr: String,
    dir: SortDir,
}

pub struct QueryExecutor<'a> {
    conn: &'a Connection,
    bindings: &'a Bindings,
    aliases: usize,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(conn: &'a Connection, bindings: &'a Bindings) -> Self {
        Self {
            conn,
            bindings,
            aliases: 0,
        }
    }

    pub fn execute(&mut self, tree: &QTree) -> Result<QResult> {
        let rows = self.level(tree, None)?;
        Ok(QResult {
            rows: rows.into_iter().map(|(_, row)| row).collect(),
        })
    }

    fn alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        format!("{}{}", prefix, self.aliases)
    }

    fn bound(&self, bound: &Option<QBound>) -> Result<Option<i64>> {
        match bound {
            None => Ok(None),
            Some(QBound::Literal(n)) => Ok(Some(*n)),
            Some(QBound::Param(name)) => self
                .bindings
                .get(name)
                .and_then(|v| v.as_long())
                .map(Some)
                .ok_or_else(|| FcError::Execution(format!("Expecting an argument value for '?{}'", name))),
        }
    }

    // one select for the level, then one per to-many relation below it
    fn level(&mut self, tree: &QTree, scope: Option<&Scope<'_>>) -> Result<Vec<(i64, Row)>> {
        let main = self.alias("t");
        let mut cols = Vec::new();
        let mut joins = String::new();
        let mut params: Vec<Value> = Vec::new();
        let mut sorts = Vec::new();
        let layout = self.plan(tree, &main, 0, &mut cols, &mut joins, &mut params, &mut sorts)?;

        let mut from = format!("{} {}", table(&tree.entity), main);
        let mut conditions = Vec::new();
        let mut fallback = vec![column(&main, ID)];
        let mut fk = None;
        if let Some(scope) = scope {
            let correlation = match scope.relation.kind {
                RelationKind::Owned => column(&main, PARENT),
                RelationKind::Linked => {
                    let link = self.alias("s");
                    from.push_str(&format!(
                        " JOIN {} {} ON {} = {}",
                        aux_table(scope.source, &scope.relation.name),
                        link,
                        column(&link, REF),
                        column(&main, ID)
                    ));
                    fallback.insert(0, format!("{}.rowid", link));
                    column(&link, INV)
                }
            };
            // one parameter whatever the number of owners
            conditions.push(format!("{} IN (SELECT value FROM json_each(?))", correlation));
            let ids: Vec<u64> = scope.ids.iter().collect();
            params.push(Value::Text(serde_json::to_string(&ids)?));
            fk = Some(cols.len());
            cols.push(correlation);
        }
        if let Some(filter) = &tree.filter {
            conditions.push(self.expression(filter, &main, &mut params)?);
        }

        let mut sql = format!("SELECT {} FROM {}{}", cols.join(", "), from, joins);
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        sorts.sort_by_key(|s: &SortKey| (s.order, s.depth));
        let mut order: Vec<String> = sorts
            .iter()
            .map(|s| match s.dir {
                SortDir::Asc => format!("{} ASC", s.expr),
                SortDir::Dsc => format!("{} DESC", s.expr),
            })
            .collect();
        order.extend(fallback);
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

        let limit = self.bound(&tree.limit)?;
        let page = self.bound(&tree.page)?.unwrap_or(1);
        let offset = page.saturating_sub(1).saturating_mul(limit.unwrap_or(0));
        if let (Some(limit), None) = (limit, scope) {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Long(limit));
            params.push(Value::Long(offset));
        }

        debug!("{} [{} params]", sql, params.len());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut raw = stmt.query(params_from_iter(params.iter()))?;
        let mut fks = Vec::new();
        let mut rows = Vec::new();
        while let Some(record) = raw.next()? {
            let Some(row) = assemble(&layout, record)? else {
                continue;
            };
            let owner = match fk {
                Some(i) => record.get::<_, i64>(i)?,
                None => 0,
            };
            fks.push(owner);
            rows.push(row);
        }
        drop(raw);
        drop(stmt);

        // pages of a to-many level are counted per owning row
        if let (Some(limit), Some(_)) = (limit, scope) {
            let mut seen: HashMap<i64, i64, OtherHasher> = HashMap::default();
            let mut kept = Vec::with_capacity(rows.len());
            for (owner, row) in fks.into_iter().zip(rows) {
                let n = seen.entry(owner).or_insert(0);
                if *n >= offset && *n - offset < limit {
                    kept.push((owner, row));
                }
                *n += 1;
            }
            (fks, rows) = kept.into_iter().unzip();
        }

        self.descend(&layout, &mut Vec::new(), &mut rows)?;
        Ok(fks.into_iter().zip(rows).collect())
    }

    // columns and LEFT JOINs of a level and of every to-one relation under it
    #[allow(clippy::too_many_arguments)]
    fn plan<'t>(
        &mut self,
        tree: &'t QTree,
        alias: &str,
        depth: usize,
        cols: &mut Vec<String>,
        joins: &mut String,
        params: &mut Vec<Value>,
        sorts: &mut Vec<SortKey>,
    ) -> Result<Layout<'t>> {
        let mut layout = Layout {
            entity: tree.entity.as_str(),
            id: cols.len(),
            fields: Vec::new(),
            slots: Vec::new(),
        };
        cols.push(column(alias, ID));
        for field in &tree.select.fields {
            let expr = column(alias, &field.name);
            if let Some(sort) = field.sort {
                sorts.push(SortKey {
                    order: sort.order,
                    depth,
                    expr: expr.clone(),
                    dir: sort.dir,
                });
            }
            if field.name == ID {
                continue;
            }
            layout.fields.push((field.name.as_str(), field.field_type, cols.len()));
            cols.push(expr);
        }

        for relation in &tree.select.relations {
            if relation.many {
                layout.slots.push(Slot::Many(relation));
                continue;
            }
            let child = self.alias("t");
            let target = table(&relation.tree.entity);
            let on = if relation.is_parent() {
                format!("{} = {}", column(&child, ID), column(alias, PARENT))
            } else {
                match relation.kind {
                    RelationKind::Owned => format!("{} = {}", column(&child, PARENT), column(alias, ID)),
                    RelationKind::Linked => {
                        let link = self.alias("l");
                        joins.push_str(&format!(
                            " LEFT JOIN {} {} ON {} = {}",
                            aux_table(&tree.entity, &relation.name),
                            link,
                            column(&link, INV),
                            column(alias, ID)
                        ));
                        format!("{} = {}", column(&child, ID), column(&link, REF))
                    }
                }
            };
            let mut join = format!(" LEFT JOIN {} {} ON {}", target, child, on);
            if let Some(filter) = &relation.tree.filter {
                let condition = self.expression(filter, &child, params)?;
                join.push_str(&format!(" AND {}", condition));
            }
            joins.push_str(&join);
            let nested = self.plan(&relation.tree, &child, depth + 1, cols, joins, params, sorts)?;
            layout.slots.push(Slot::One(relation.name.as_str(), nested));
        }
        Ok(layout)
    }

    // fills the to-many relations of every row reached through `path`
    fn descend(&mut self, layout: &Layout<'_>, path: &mut Vec<String>, rows: &mut [Row]) -> Result<()> {
        for slot in &layout.slots {
            match slot {
                Slot::One(name, nested) => {
                    path.push((*name).to_owned());
                    self.descend(nested, path, rows)?;
                    path.pop();
                }
                Slot::Many(relation) => {
                    let mut ids = RoaringTreemap::new();
                    for row in rows.iter() {
                        if let Some(id) = at(row, path).and_then(|r| r.id()).and_then(|id| u64::try_from(id).ok()) {
                            ids.insert(id);
                        }
                    }
                    if ids.is_empty() {
                        continue;
                    }
                    let scope = Scope {
                        source: layout.entity,
                        relation: *relation,
                        ids,
                    };
                    let mut groups: HashMap<i64, Vec<Row>, OtherHasher> = HashMap::default();
                    for (owner, row) in self.level(&relation.tree, Some(&scope))? {
                        groups.entry(owner).or_default().push(row);
                    }
                    for row in rows.iter_mut() {
                        let Some(target) = at_mut(row, path) else {
                            continue;
                        };
                        if let Some(id) = target.id() {
                            let children = groups.get(&id).cloned().unwrap_or_default();
                            target.set(&relation.name, Data::Many(children));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn expression(&mut self, expr: &QExpression, alias: &str, params: &mut Vec<Value>) -> Result<String> {
        match expr {
            QExpression::And(l, r) => {
                let l = self.expression(l, alias, params)?;
                let r = self.expression(r, alias, params)?;
                Ok(format!("({} AND {})", l, r))
            }
            QExpression::Or(l, r) => {
                let l = self.expression(l, alias, params)?;
                let r = self.expression(r, alias, params)?;
                Ok(format!("({} OR {})", l, r))
            }
            QExpression::Predicate(p) => self.predicate(p, &p.steps, alias, params),
        }
    }

    fn predicate(&mut self, p: &QPredicate, steps: &[QStep], alias: &str, params: &mut Vec<Value>) -> Result<String> {
        let Some((step, rest)) = steps.split_first() else {
            return self.comparison(p, alias, params);
        };
        let next = self.alias("f");
        let target = table(&step.target);
        if step.is_parent() {
            let inner = self.predicate(p, rest, &next, params)?;
            return Ok(format!(
                "{} IN (SELECT {} FROM {} {} WHERE {})",
                column(alias, PARENT),
                column(&next, ID),
                target,
                next,
                inner
            ));
        }
        match step.kind {
            RelationKind::Owned => {
                let inner = self.predicate(p, rest, &next, params)?;
                Ok(format!(
                    "{} IN (SELECT {} FROM {} {} WHERE {})",
                    column(alias, ID),
                    column(&next, PARENT),
                    target,
                    next,
                    inner
                ))
            }
            RelationKind::Linked => {
                let link = self.alias("a");
                let inner = self.predicate(p, rest, &next, params)?;
                Ok(format!(
                    "{} IN (SELECT {} FROM {} {} JOIN {} {} ON {} = {} WHERE {})",
                    column(alias, ID),
                    column(&link, INV),
                    aux_table(&step.source, &step.relation),
                    link,
                    target,
                    next,
                    column(&next, ID),
                    column(&link, REF),
                    inner
                ))
            }
        }
    }

    fn comparison(&self, p: &QPredicate, alias: &str, params: &mut Vec<Value>) -> Result<String> {
        let col = column(alias, &p.field);
        let value = match &p.operand {
            QOperand::Value(v) => v.clone(),
            QOperand::List(items) => Value::List(items.clone()),
            QOperand::Param(name) => self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| FcError::Execution(format!("Expecting an argument value for '?{}'", name)))?,
        };
        match (p.comparator, value) {
            (Comparator::In, Value::List(items)) if items.is_empty() => Ok("0 = 1".into()),
            (Comparator::In, Value::List(items)) => {
                let marks = vec!["?"; items.len()].join(", ");
                params.extend(items);
                Ok(format!("{} IN ({})", col, marks))
            }
            (Comparator::In, other) => Err(FcError::Execution(format!("'{}' in expects a list, found {}", p.field, other))),
            (Comparator::Eq, Value::Null) => Ok(format!("{} IS NULL", col)),
            (Comparator::Neq, Value::Null) => Ok(format!("{} IS NOT NULL", col)),
            (comparator, value) => {
                params.push(value);
                Ok(format!("{} {} ?", col, comparator.sql()))
            }
        }
    }
}

// an absent to-one relation has a NULL id and is left out of its owner
fn assemble(layout: &Layout<'_>, record: &rusqlite::Row<'_>) -> Result<Option<Row>> {
    let Some(id) = record.get::<_, Option<i64>>(layout.id)? else {
        return Ok(None);
    };
    let mut row = Row::new();
    row.push(ID, Data::Value(Value::Long(id)));
    for (name, field_type, index) in &layout.fields {
        row.push(name, Data::Value(from_sql(*field_type, record.get_ref(*index)?)?));
    }
    for slot in &layout.slots {
        match slot {
            Slot::One(name, nested) => {
                if let Some(child) = assemble(nested, record)? {
                    row.push(name, Data::One(child));
                }
            }
            Slot::Many(relation) => row.push(&relation.name, Data::Many(Vec::new())),
        }
    }
    Ok(Some(row))
}

fn at<'r>(row: &'r Row, path: &[String]) -> Option<&'r Row> {
    path.iter().try_fold(row, |r, name| r.one(name))
}

fn at_mut<'r>(row: &'r mut Row, path: &[String]) -> Option<&'r mut Row> {
    let mut current = row;
    for name in path {
        current = current.one_mut(name)?;
    }
    Some(current)
}
