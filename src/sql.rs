use std::collections::HashMap;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTool {
        id: Ulid,
        owner_id: Ulid,
        title: Option<String>,
    },
    DeleteTool {
        id: Ulid,
    },
    SelectTools,
    /// Requester is the session's party. `id` is generated when omitted.
    InsertReservation {
        id: Option<Ulid>,
        tool_id: Ulid,
        start: Ms,
        end: Ms,
        contact: String,
        comment: String,
    },
    UpdateStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectToolReservations {
        tool_id: Ulid,
    },
    /// `party_id` defaults to the session's party.
    SelectRequests {
        party_id: Option<Ulid>,
    },
    SelectPetitions {
        party_id: Option<Ulid>,
    },
    SelectPendingRatings {
        party_id: Option<Ulid>,
    },
    InsertRating {
        reservation_id: Ulid,
        rating: i64,
    },
    SelectConflicts {
        tool_id: Ulid,
        start: Ms,
        end: Ms,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [one] => one,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column positions used when an INSERT has no column list.
const TOOL_COLUMNS: &[&str] = &["id", "owner_id", "title"];
const RESERVATION_COLUMNS: &[&str] = &["id", "tool_id", "start", "end", "contact", "comment"];
const RATING_COLUMNS: &[&str] = &["reservation_id", "rating"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = match table.as_str() {
        "tools" => TOOL_COLUMNS,
        "reservations" => RESERVATION_COLUMNS,
        "ratings" => RATING_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = named_insert_values(insert, defaults)?;
    let required = |col: &'static str| row.get(col).copied().ok_or(SqlError::MissingColumn(col));

    match table.as_str() {
        "tools" => Ok(Command::InsertTool {
            id: parse_ulid(required("id")?)?,
            owner_id: parse_ulid(required("owner_id")?)?,
            title: row.get("title").map(|e| parse_string_or_null(e)).transpose()?.flatten(),
        }),
        "reservations" => Ok(Command::InsertReservation {
            id: row.get("id").map(|e| parse_ulid_or_null(e)).transpose()?.flatten(),
            tool_id: parse_ulid(required("tool_id")?)?,
            start: parse_i64(required("start")?)?,
            end: parse_i64(required("end")?)?,
            contact: optional_text(&row, "contact")?,
            comment: optional_text(&row, "comment")?,
        }),
        _ => Ok(Command::InsertRating {
            reservation_id: parse_ulid(required("reservation_id")?)?,
            rating: parse_i64(required("rating")?)?,
        }),
    }
}

fn optional_text(row: &HashMap<String, &Expr>, col: &str) -> Result<String, SqlError> {
    Ok(row
        .get(col)
        .map(|e| parse_string_or_null(e))
        .transpose()?
        .flatten()
        .unwrap_or_default())
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "tools" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = Filters::from_selection(&delete.selection)?;
    filters.only(&["id"])?;
    Ok(Command::DeleteTool {
        id: parse_ulid(filters.eq("id")?)?,
    })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let status = match assignments {
        [assignment] if assignment_column(&assignment.target).as_deref() == Some("status") => {
            let text = parse_string(&assignment.value)?;
            ReservationStatus::parse(&text).ok_or(SqlError::BadStatus(text))?
        }
        _ => return Err(SqlError::Unsupported("UPDATE may only SET status".into())),
    };

    let filters = Filters::from_selection(selection)?;
    filters.only(&["id"])?;
    Ok(Command::UpdateStatus {
        id: parse_ulid(filters.eq("id")?)?,
        status,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let table = match select.from.as_slice() {
        [] => return Err(SqlError::Parse("SELECT without FROM".into())),
        [from] => table_factor_name(&from.relation)?,
        _ => return Err(SqlError::Unsupported("joins".into())),
    };
    let filters = Filters::from_selection(&select.selection)?;

    match table.as_str() {
        "tools" => {
            filters.only(&[])?;
            Ok(Command::SelectTools)
        }
        "reservations" => {
            filters.only(&["id", "tool_id"])?;
            match (filters.get("id"), filters.get("tool_id")) {
                (Some(id), None) => Ok(Command::SelectReservation { id: parse_ulid(id)? }),
                (None, Some(tool_id)) => Ok(Command::SelectToolReservations {
                    tool_id: parse_ulid(tool_id)?,
                }),
                (None, None) => Err(SqlError::MissingFilter("id or tool_id")),
                (Some(_), Some(_)) => {
                    Err(SqlError::Unsupported("filter by id or tool_id, not both".into()))
                }
            }
        }
        "requests" | "petitions" | "pending_ratings" => {
            filters.only(&["party_id"])?;
            let party_id = filters.get("party_id").map(parse_ulid).transpose()?;
            Ok(match table.as_str() {
                "requests" => Command::SelectRequests { party_id },
                "petitions" => Command::SelectPetitions { party_id },
                _ => Command::SelectPendingRatings { party_id },
            })
        }
        "conflicts" => {
            filters.only(&["tool_id", "start", "end"])?;
            Ok(Command::SelectConflicts {
                tool_id: parse_ulid(filters.eq("tool_id")?)?,
                start: parse_i64(filters.ge("start")?)?,
                end: parse_i64(filters.le("end")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Row shape a statement produces, decided from its table alone so it can
/// be answered for a prepared statement before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Reservations,
    Tools,
    Conflict,
    None,
}

pub fn result_shape(sql: &str) -> ResultShape {
    let Ok(stmts) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        return ResultShape::None;
    };
    let table = match stmts.first() {
        Some(Statement::Insert(insert)) => insert_table_name(insert).ok(),
        Some(Statement::Update { table, .. }) => table_factor_name(&table.relation).ok(),
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|from| table_factor_name(&from.relation).ok()),
            _ => None,
        },
        _ => None,
    };
    let is_select = matches!(stmts.first(), Some(Statement::Query(_)));
    match table.as_deref() {
        Some("reservations" | "requests" | "petitions" | "pending_ratings") => {
            ResultShape::Reservations
        }
        Some("tools") if is_select => ResultShape::Tools,
        Some("conflicts") => ResultShape::Conflict,
        _ => ResultShape::None,
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

/// Conjunction of `col = v`, `col >= v` and `col <= v` terms.
#[derive(Default)]
struct Filters<'a> {
    terms: Vec<(String, ast::BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: &'a Option<Expr>) -> Result<Self, SqlError> {
        let mut filters = Self::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp { left, op, right }
                if matches!(
                    op,
                    ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq
                ) =>
            {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                self.terms.push((col, op.clone(), right));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    /// Reject filters on any column outside `allowed`, and any term whose
    /// operator is not the one its column takes: `start >=`, `"end" <=`,
    /// and `=` for everything else.
    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        for (col, op, _) in &self.terms {
            if !allowed.contains(&col.as_str()) {
                return Err(SqlError::UnknownColumn(col.clone()));
            }
            let want = match col.as_str() {
                "start" => ast::BinaryOperator::GtEq,
                "end" => ast::BinaryOperator::LtEq,
                _ => ast::BinaryOperator::Eq,
            };
            if *op != want {
                return Err(SqlError::Unsupported(format!(
                    "filter {col} {op}; only {col} {want} is supported"
                )));
            }
        }
        Ok(())
    }

    fn find(&self, col: &str, op: ast::BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == col && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.find(col, ast::BinaryOperator::Eq)
    }

    fn eq(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn ge(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.find(col, ast::BinaryOperator::GtEq)
            .ok_or(SqlError::MissingFilter(col))
    }

    fn le(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.find(col, ast::BinaryOperator::LtEq)
            .ok_or(SqlError::MissingFilter(col))
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(target: &AssignmentTarget) -> Option<String> {
    match target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        AssignmentTarget::Tuple(_) => None,
    }
}

/// Pair the single VALUES row with its column names, falling back to
/// `defaults` when the statement has no column list.
fn named_insert_values<'a>(
    insert: &'a ast::Insert,
    defaults: &[&str],
) -> Result<HashMap<String, &'a Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let row = match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            [row] => row,
            _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if row.len() > columns.len() || (!insert.columns.is_empty() && row.len() != columns.len()) {
        return Err(SqlError::WrongArity(columns.len(), row.len()));
    }
    for col in &columns {
        if !defaults.contains(&col.as_str()) {
            return Err(SqlError::UnknownColumn(col.clone()));
        }
    }
    Ok(columns.into_iter().zip(row.iter()).collect())
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()));
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected integer, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    BadStatus(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::MissingFilter(c) => write!(f, "missing filter: {c}"),
            SqlError::BadStatus(s) => write!(f, "unknown reservation status: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_tool() {
        let sql = format!("INSERT INTO tools (id, owner_id, title) VALUES ('{A}', '{B}', 'Hedge trimmer')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertTool {
                id: ulid(A),
                owner_id: ulid(B),
                title: Some("Hedge trimmer".into()),
            }
        );
    }

    #[test]
    fn insert_tool_positional_without_title() {
        let sql = format!("INSERT INTO tools VALUES ('{A}', '{B}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertTool { id: ulid(A), owner_id: ulid(B), title: None }
        );
    }

    #[test]
    fn delete_tool() {
        let sql = format!("DELETE FROM tools WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteTool { id: ulid(A) });
    }

    #[test]
    fn select_tools() {
        assert_eq!(parse_sql("SELECT * FROM tools").unwrap(), Command::SelectTools);
    }

    #[test]
    fn insert_reservation_without_id() {
        let sql = format!(
            r#"INSERT INTO reservations (tool_id, start, "end", contact) VALUES ('{A}', 1000, 2000, 'call after 6')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                id: None,
                tool_id: ulid(A),
                start: 1000,
                end: 2000,
                contact: "call after 6".into(),
                comment: String::new(),
            }
        );
    }

    #[test]
    fn insert_reservation_with_id_and_comment() {
        let sql = format!(
            r#"INSERT INTO reservations (id, tool_id, start, "end", comment) VALUES ('{B}', '{A}', '1000', '2000', 'for the fence')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { id, start, end, comment, .. } => {
                assert_eq!(id, Some(ulid(B)));
                assert_eq!((start, end), (1000, 2000));
                assert_eq!(comment, "for the fence");
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn insert_reservation_missing_end() {
        let sql = format!("INSERT INTO reservations (tool_id, start) VALUES ('{A}', 1000)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("end"))));
    }

    #[test]
    fn insert_reservation_arity_mismatch() {
        let sql = format!("INSERT INTO reservations (tool_id, start) VALUES ('{A}', 1000, 2000)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(2, 3))));
    }

    #[test]
    fn insert_rejects_unknown_column() {
        let sql = format!("INSERT INTO reservations (tool_id, owner_id) VALUES ('{A}', '{B}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "owner_id"));
    }

    #[test]
    fn update_status() {
        let sql = format!("UPDATE reservations SET status = 'accepted' WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateStatus { id: ulid(A), status: ReservationStatus::Accepted }
        );
    }

    #[test]
    fn update_status_accepts_aliases() {
        let sql = format!("UPDATE reservations SET status = 'DENIED' WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateStatus { id: ulid(A), status: ReservationStatus::Rejected }
        );
    }

    #[test]
    fn update_unknown_status() {
        let sql = format!("UPDATE reservations SET status = 'lost' WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::BadStatus(s)) if s == "lost"));
    }

    #[test]
    fn update_other_columns_rejected() {
        let sql = format!("UPDATE reservations SET contact = 'x' WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn update_needs_id() {
        let sql = "UPDATE reservations SET status = 'cancelled'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn select_reservation_by_id() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectReservation { id: ulid(A) });
    }

    #[test]
    fn select_reservations_by_tool() {
        let sql = format!("SELECT * FROM reservations WHERE tool_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectToolReservations { tool_id: ulid(A) }
        );
    }

    #[test]
    fn select_reservations_unfiltered() {
        assert!(matches!(
            parse_sql("SELECT * FROM reservations"),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn select_party_views() {
        assert_eq!(
            parse_sql("SELECT * FROM requests").unwrap(),
            Command::SelectRequests { party_id: None }
        );
        let sql = format!("SELECT * FROM petitions WHERE party_id = '{B}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectPetitions { party_id: Some(ulid(B)) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM pending_ratings").unwrap(),
            Command::SelectPendingRatings { party_id: None }
        );
    }

    #[test]
    fn insert_rating() {
        let sql = format!("INSERT INTO ratings (reservation_id, rating) VALUES ('{A}', 4)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRating { reservation_id: ulid(A), rating: 4 }
        );
    }

    #[test]
    fn insert_negative_rating_parses() {
        let sql = format!("INSERT INTO ratings (reservation_id, rating) VALUES ('{A}', -1)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRating { reservation_id: ulid(A), rating: -1 }
        );
    }

    #[test]
    fn select_conflicts() {
        let sql = format!(
            r#"SELECT * FROM conflicts WHERE tool_id = '{A}' AND start >= 1000 AND "end" <= 2000"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectConflicts { tool_id: ulid(A), start: 1000, end: 2000 }
        );
    }

    #[test]
    fn select_conflicts_needs_range() {
        let sql = format!("SELECT * FROM conflicts WHERE tool_id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("start"))));
    }

    #[test]
    fn unknown_filter_column() {
        let sql = format!("SELECT * FROM requests WHERE status = 'pending' AND party_id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "status"));
    }

    #[test]
    fn id_filters_only_take_equality() {
        for sql in [
            format!("SELECT * FROM petitions WHERE party_id <= '{A}'"),
            format!("SELECT * FROM requests WHERE party_id >= '{A}'"),
            format!("SELECT * FROM reservations WHERE tool_id >= '{A}'"),
            format!("DELETE FROM tools WHERE id <= '{A}'"),
            format!("UPDATE reservations SET status = 'accepted' WHERE id >= '{A}'"),
            format!(r#"SELECT * FROM conflicts WHERE tool_id = '{A}' AND start = 1000 AND "end" <= 2000"#),
        ] {
            assert!(
                matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))),
                "{sql} should be refused"
            );
        }
    }

    #[test]
    fn bad_ulid() {
        assert!(matches!(
            parse_sql("DELETE FROM tools WHERE id = 'nope'"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn unknown_table() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "bookings"));
    }

    #[test]
    fn result_shapes_ignore_placeholders() {
        assert_eq!(
            result_shape(r#"INSERT INTO reservations (tool_id, start, "end") VALUES ($1, $2, $3)"#),
            ResultShape::Reservations
        );
        assert_eq!(
            result_shape("UPDATE reservations SET status = $1 WHERE id = $2"),
            ResultShape::Reservations
        );
        assert_eq!(result_shape("SELECT * FROM petitions"), ResultShape::Reservations);
        assert_eq!(result_shape("SELECT * FROM tools"), ResultShape::Tools);
        assert_eq!(
            result_shape("INSERT INTO tools (id, owner_id) VALUES ($1, $2)"),
            ResultShape::None
        );
        assert_eq!(
            result_shape(r#"SELECT * FROM conflicts WHERE tool_id = $1 AND start >= $2 AND "end" <= $3"#),
            ResultShape::Conflict
        );
        assert_eq!(result_shape("not sql"), ResultShape::None);
    }

    #[test]
    fn empty_and_multiple_statements() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(
            parse_sql("SELECT * FROM tools; SELECT * FROM tools"),
            Err(SqlError::Unsupported(_))
        ));
    }
}
