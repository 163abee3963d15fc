//! Syntax trees of the DSL, built from the pest grammar in `dsl.pest`.
//!
//! Parsing only checks the shape of the text. Names are resolved and values
//! type checked by the compilers in [`crate::create`], [`crate::update`],
//! [`crate::delete`] and [`crate::query`].
use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::datatype::{Value, parse_date, parse_datetime, parse_time};
use crate::error::{FcError, Result, SyntaxError};
use crate::refs::LinkOp;

#[derive(Parser)]
#[grammar = "dsl.pest"]
struct DslParser;

/// A value position in the DSL.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Value(Value),
    Param(String),
    List(Vec<Node>),
    Object(Vec<(String, Node)>),
}

impl Node {
    pub fn shape(&self) -> &'static str {
        match self {
            Node::Value(Value::Null) => "null",
            Node::Value(_) => "value",
            Node::Param(_) => "parameter",
            Node::List(_) => "list",
            Node::Object(_) => "object",
        }
    }
}

/// The row addressed by an update or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Id(i64),
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateAst {
    pub entity: String,
    pub body: Vec<(String, Node)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEntry {
    Set(Node),
    Link(LinkOp, Node),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAst {
    pub entity: String,
    pub target: Target,
    pub body: Vec<(String, UpdateEntry)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteAst {
    pub entity: String,
    pub target: Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
}

impl Comparator {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Neq => "<>",
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Gte => ">=",
            Comparator::Lte => "<=",
            Comparator::In => "IN",
        }
    }
}

/// A literal or parameter given to `limit` and `page`.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Literal(i64),
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprAst {
    And(Box<ExprAst>, Box<ExprAst>),
    Or(Box<ExprAst>, Box<ExprAst>),
    Predicate {
        path: Vec<String>,
        comparator: Comparator,
        operand: Node,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Dsc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemAst {
    All,
    Field {
        name: String,
        sort: Option<(SortDir, i64)>,
    },
    Relation {
        name: String,
        body: SelectAst,
    },
}

/// Filter, pagination and selection of one query level.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectAst {
    pub filter: Option<ExprAst>,
    pub limit: Option<Bound>,
    pub page: Option<Bound>,
    pub items: Vec<ItemAst>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryAst {
    pub entity: String,
    pub body: SelectAst,
}

type Parsed<T> = std::result::Result<T, SyntaxError>;

fn syntax(e: pest::error::Error<Rule>) -> FcError {
    let (line, col) = match e.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    FcError::Syntax(vec![SyntaxError {
        message: e.variant.message().to_string(),
        line,
        col,
    }])
}

fn fail(pair: &Pair<Rule>, message: String) -> SyntaxError {
    let (line, col) = pair.as_span().start_pos().line_col();
    SyntaxError { message, line, col }
}

fn parse(rule: Rule, text: &str) -> Result<Pair<'_, Rule>> {
    let mut pairs = DslParser::parse(rule, text).map_err(syntax)?;
    pairs
        .next()
        .ok_or_else(|| FcError::Syntax(vec![SyntaxError { message: "empty input".into(), line: 1, col: 1 }]))
}

pub fn parse_create(text: &str) -> Result<CreateAst> {
    let root = parse(Rule::create, text)?;
    let mut inner = root.into_inner();
    let (entity, object) = (next(&mut inner)?, next(&mut inner)?);
    Ok(CreateAst {
        entity: entity.as_str().to_owned(),
        body: entries(object).map_err(|e| FcError::Syntax(vec![e]))?,
    })
}

pub fn parse_update(text: &str) -> Result<UpdateAst> {
    let root = parse(Rule::update, text)?;
    let mut inner = root.into_inner();
    let (entity, target_pair, body) = (next(&mut inner)?, next(&mut inner)?, next(&mut inner)?);
    let build = || -> Parsed<UpdateAst> {
        let mut entries = Vec::new();
        for entry in body.into_inner() {
            let mut parts = entry.into_inner();
            let (Some(name), Some(first)) = (parts.next(), parts.next()) else {
                continue;
            };
            let value = match first.as_rule() {
                Rule::link_op => {
                    let op = if first.as_str() == "@add" { LinkOp::Add } else { LinkOp::Del };
                    let Some(link) = parts.next().and_then(|l| l.into_inner().next()) else {
                        return Err(fail(&first, "expecting a link value".into()));
                    };
                    UpdateEntry::Link(op, node(link)?)
                }
                _ => UpdateEntry::Set(value(first)?),
            };
            entries.push((name.as_str().to_owned(), value));
        }
        Ok(UpdateAst {
            entity: entity.as_str().to_owned(),
            target: target(target_pair)?,
            body: entries,
        })
    };
    build().map_err(|e| FcError::Syntax(vec![e]))
}

pub fn parse_delete(text: &str) -> Result<DeleteAst> {
    let root = parse(Rule::delete, text)?;
    let mut inner = root.into_inner();
    let (entity, target_pair) = (next(&mut inner)?, next(&mut inner)?);
    Ok(DeleteAst {
        entity: entity.as_str().to_owned(),
        target: target(target_pair).map_err(|e| FcError::Syntax(vec![e]))?,
    })
}

pub fn parse_query(text: &str) -> Result<QueryAst> {
    let root = parse(Rule::query, text)?;
    let mut inner = root.into_inner();
    let entity = next(&mut inner)?;
    let body = select(inner).map_err(|e| FcError::Syntax(vec![e]))?;
    Ok(QueryAst {
        entity: entity.as_str().to_owned(),
        body,
    })
}

fn next<'i>(pairs: &mut pest::iterators::Pairs<'i, Rule>) -> Result<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| FcError::Syntax(vec![SyntaxError { message: "unexpected end of input".into(), line: 1, col: 1 }]))
}

fn target(pair: Pair<Rule>) -> Parsed<Target> {
    let Some(inner) = pair.clone().into_inner().next() else {
        return Err(fail(&pair, "expecting an @id target".into()));
    };
    match inner.as_rule() {
        Rule::param => Ok(Target::Param(param_name(&inner))),
        _ => Ok(Target::Id(integer(&inner)?)),
    }
}

fn entries(object: Pair<Rule>) -> Parsed<Vec<(String, Node)>> {
    let mut entries = Vec::new();
    for entry in object.into_inner() {
        let mut parts = entry.into_inner();
        if let (Some(name), Some(v)) = (parts.next(), parts.next()) {
            entries.push((name.as_str().to_owned(), value(v)?));
        }
    }
    Ok(entries)
}

// a `value` wrapper pair
fn value(pair: Pair<Rule>) -> Parsed<Node> {
    match pair.clone().into_inner().next() {
        Some(inner) => node(inner),
        None => Err(fail(&pair, "expecting a value".into())),
    }
}

fn node(pair: Pair<Rule>) -> Parsed<Node> {
    let node = match pair.as_rule() {
        Rule::value | Rule::operand => return value(pair),
        Rule::param => Node::Param(param_name(&pair)),
        Rule::list => Node::List(pair.into_inner().map(value).collect::<Parsed<Vec<_>>>()?),
        Rule::object => Node::Object(entries(pair)?),
        _ => Node::Value(literal(&pair)?),
    };
    Ok(node)
}

fn literal(pair: &Pair<Rule>) -> Parsed<Value> {
    let text = pair.as_str();
    let value = match pair.as_rule() {
        Rule::null => Value::Null,
        Rule::boolean => Value::Bool(text == "true"),
        Rule::integer => Value::Long(integer(pair)?),
        Rule::float => Value::Double(
            text.parse()
                .map_err(|_| fail(pair, format!("invalid float '{}'", text)))?,
        ),
        Rule::text => Value::Text(unescape(pair.clone().into_inner().as_str())),
        Rule::time => Value::Time(
            parse_time(&text[1..]).ok_or_else(|| fail(pair, format!("invalid time '{}'", text)))?,
        ),
        Rule::date => Value::Date(
            parse_date(&text[1..]).ok_or_else(|| fail(pair, format!("invalid date '{}'", text)))?,
        ),
        Rule::datetime => Value::DateTime(
            parse_datetime(&text[1..])
                .ok_or_else(|| fail(pair, format!("invalid datetime '{}'", text)))?,
        ),
        other => return Err(fail(pair, format!("unexpected {:?}", other))),
    };
    Ok(value)
}

fn integer(pair: &Pair<Rule>) -> Parsed<i64> {
    pair.as_str()
        .parse()
        .map_err(|_| fail(pair, format!("integer '{}' out of range", pair.as_str())))
}

fn param_name(pair: &Pair<Rule>) -> String {
    pair.as_str().trim_start_matches('?').to_owned()
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

// ------------- query -------------
fn select(pairs: pest::iterators::Pairs<Rule>) -> Parsed<SelectAst> {
    let mut body = SelectAst {
        filter: None,
        limit: None,
        page: None,
        items: Vec::new(),
    };
    for pair in pairs {
        match pair.as_rule() {
            Rule::filter => {
                if let Some(e) = pair.into_inner().next() {
                    body.filter = Some(expr(e)?);
                }
            }
            Rule::limit => body.limit = Some(bound(pair)?),
            Rule::page => body.page = Some(bound(pair)?),
            Rule::selection => {
                for item in pair.into_inner() {
                    if let Some(inner) = item.into_inner().next() {
                        body.items.push(select_item(inner)?);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(body)
}

fn select_item(pair: Pair<Rule>) -> Parsed<ItemAst> {
    match pair.as_rule() {
        Rule::all => Ok(ItemAst::All),
        Rule::relation => {
            let mut inner = pair.clone().into_inner();
            let Some(name) = inner.next() else {
                return Err(fail(&pair, "expecting a relation name".into()));
            };
            Ok(ItemAst::Relation {
                name: name.as_str().to_owned(),
                body: select(inner)?,
            })
        }
        _ => {
            let mut sort = None;
            let mut name = String::new();
            for part in pair.into_inner() {
                match part.as_rule() {
                    Rule::sort => {
                        let mut s = part.clone().into_inner();
                        let (Some(direction), Some(order)) = (s.next(), s.next()) else {
                            return Err(fail(&part, "expecting (asc|dsc N)".into()));
                        };
                        let direction = if direction.as_str() == "asc" { SortDir::Asc } else { SortDir::Dsc };
                        sort = Some((direction, integer(&order)?));
                    }
                    _ => name = part.as_str().to_owned(),
                }
            }
            Ok(ItemAst::Field { name, sort })
        }
    }
}

fn bound(pair: Pair<Rule>) -> Parsed<Bound> {
    let Some(inner) = pair.clone().into_inner().next() else {
        return Err(fail(&pair, "expecting an integer or a parameter".into()));
    };
    match inner.as_rule() {
        Rule::param => Ok(Bound::Param(param_name(&inner))),
        _ => Ok(Bound::Literal(integer(&inner)?)),
    }
}

// `expr` is a list of `and_expr` joined by `or`, `and` binds tighter
fn expr(pair: Pair<Rule>) -> Parsed<ExprAst> {
    let mut result: Option<ExprAst> = None;
    for part in pair.clone().into_inner() {
        let next = match part.as_rule() {
            Rule::and_expr => and_expr(part)?,
            _ => continue,
        };
        result = Some(match result {
            Some(left) => ExprAst::Or(Box::new(left), Box::new(next)),
            None => next,
        });
    }
    result.ok_or_else(|| fail(&pair, "expecting a filter expression".into()))
}

fn and_expr(pair: Pair<Rule>) -> Parsed<ExprAst> {
    let mut result: Option<ExprAst> = None;
    for part in pair.clone().into_inner() {
        let next = match part.as_rule() {
            Rule::expr => expr(part)?,
            Rule::predicate => predicate(part)?,
            _ => continue,
        };
        result = Some(match result {
            Some(left) => ExprAst::And(Box::new(left), Box::new(next)),
            None => next,
        });
    }
    result.ok_or_else(|| fail(&pair, "expecting a predicate".into()))
}

fn predicate(pair: Pair<Rule>) -> Parsed<ExprAst> {
    let mut inner = pair.clone().into_inner();
    let (Some(path), Some(comparator), Some(operand)) = (inner.next(), inner.next(), inner.next()) else {
        return Err(fail(&pair, "expecting <path> <comparator> <value>".into()));
    };
    let comparator = match comparator.as_str() {
        "==" => Comparator::Eq,
        "!=" => Comparator::Neq,
        ">=" => Comparator::Gte,
        "<=" => Comparator::Lte,
        ">" => Comparator::Gt,
        "<" => Comparator::Lt,
        _ => Comparator::In,
    };
    Ok(ExprAst::Predicate {
        path: path.as_str().split('.').map(str::to_owned).collect(),
        comparator,
        operand: node(operand)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_with_nested_values() {
        let ast = parse_create(
            r#"User { name: "Al \"x\"", age: 3, score: 1.5, at: #2020-10-25T15:10:30,
               address: { city: "Aveiro", country: ?c }, tags: [1, "2", #15:10:30] }"#,
        )
        .unwrap();
        assert_eq!(ast.entity, "User");
        assert_eq!(ast.body[0], ("name".into(), Node::Value(Value::Text("Al \"x\"".into()))));
        assert_eq!(ast.body[1].1, Node::Value(Value::Long(3)));
        assert_eq!(ast.body[2].1, Node::Value(Value::Double(1.5)));
        assert!(matches!(&ast.body[4].1, Node::Object(o) if o[1].1 == Node::Param("c".into())));
        assert!(matches!(&ast.body[5].1, Node::List(l) if l.len() == 3));
    }

    #[test]
    fn update_links_and_targets() {
        let ast = parse_update(r#"Address @id == ?id { city: "B", country: @add ?c, tags: @del [1, 2] }"#).unwrap();
        assert_eq!(ast.target, Target::Param("id".into()));
        assert_eq!(ast.body[1].1, UpdateEntry::Link(LinkOp::Add, Node::Param("c".into())));
        assert!(matches!(&ast.body[2].1, UpdateEntry::Link(LinkOp::Del, Node::List(_))));
        assert_eq!(parse_delete("User @id = 10").unwrap().target, Target::Id(10));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let ast = parse_query("T | a == 1 or b == 2 and c == 3 | { * }").unwrap();
        let Some(ExprAst::Or(_, right)) = ast.body.filter else {
            panic!("expecting an or at the root");
        };
        assert!(matches!(*right, ExprAst::And(_, _)));
    }

    #[test]
    fn query_selection() {
        let ast = parse_query(
            r#"Role | (name == "x" or name in ?names) | limit ?l page 2 {
                *, (dsc 1) name, details | active == true | limit 3 { name, perms { * } }
            }"#,
        )
        .unwrap();
        assert_eq!(ast.body.limit, Some(Bound::Param("l".into())));
        assert_eq!(ast.body.page, Some(Bound::Literal(2)));
        assert_eq!(ast.body.items[0], ItemAst::All);
        assert_eq!(
            ast.body.items[1],
            ItemAst::Field { name: "name".into(), sort: Some((SortDir::Dsc, 1)) }
        );
        let ItemAst::Relation { name, body } = &ast.body.items[2] else {
            panic!("expecting a relation");
        };
        assert_eq!(name, "details");
        assert!(body.filter.is_some());
        assert_eq!(body.limit, Some(Bound::Literal(3)));
    }

    #[test]
    fn syntax_errors_carry_positions() {
        let err = parse_query("User | name == | { * }").unwrap_err();
        match err {
            FcError::Syntax(errors) => assert_eq!(errors[0].line, 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
