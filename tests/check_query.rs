//! Canned results read back through every client path
//!
//! Each result is fetched with and without fields, under a full and a one-row limit, with 0
//! and 99 warnings, over both framings. Buffered text, streamed text and buffered binary
//! reads must all agree.

mod common;

use pretty_assertions::assert_eq;
use zero_mysql_wire::constant::ColumnFlags;
use zero_mysql_wire::error::Error;
use zero_mysql_wire::handler::{HandlerResult, Outcome, PrepareInfo, Query, SessionInfo};
use zero_mysql_wire::protocol::response::ErrPayload;
use zero_mysql_wire::{Field, Handler, QueryResult, Row, SqlType, Value};

use common::{Client, all_opts, connect_with};

const WITH_WARNINGS: &str = " with warnings";

struct Case {
    name: &'static str,
    fields: Vec<Field>,
    rows: Vec<Row>,
    rows_affected: u64,
    insert_id: u64,
}

impl Case {
    fn select(name: &'static str, fields: Vec<Field>, rows: Vec<Vec<&str>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&fields)
                    .map(|(text, field)| Value::new(field.ty, text))
                    .collect()
            })
            .collect();
        Self {
            name,
            fields,
            rows,
            rows_affected: 0,
            insert_id: 0,
        }
    }

    fn expected(&self, want_fields: bool) -> QueryResult {
        QueryResult {
            fields: (want_fields && !self.fields.is_empty()).then(|| self.fields.clone()),
            rows: self.rows.clone(),
            rows_affected: self.rows_affected,
            insert_id: self.insert_id,
        }
    }
}

fn cases() -> Vec<Case> {
    let type_only = |ty| Field {
        ty,
        ..Field::default()
    };
    let complete = |name: &str, ty, column_length, charset, flags| Field {
        name: name.to_string(),
        table: "table1".to_string(),
        org_table: "org_table1".to_string(),
        database: "db1".to_string(),
        org_name: format!("org_{name}"),
        ty,
        column_length,
        charset,
        decimals: 0,
        flags,
    };

    let all_fields = || -> Vec<Field> {
        SqlType::ALL
            .iter()
            .enumerate()
            .map(|(i, &ty)| Field::new(format!("f{i}"), ty))
            .collect()
    };
    let all_values = vec![
        "-128",
        "255",
        "-32768",
        "65535",
        "-8388608",
        "16777215",
        "-2147483648",
        "4294967295",
        "-9223372036854775808",
        "18446744073709551615",
        "-0.25",
        "1.5",
        "2024-12-25 15:30:45.000123",
        "2024-12-25",
        "-36:30:45",
        "2024-12-25 15:30:45",
        "2024",
        "12345.67",
        "text",
        "\u{0}\u{1}blob",
        "varchar",
        "varbinary",
        "c",
        "bin",
        "\u{1}",
        "red",
        "red,green",
        "geometry",
        r#"{"a":1}"#,
    ];

    vec![
        Case::select(
            "tiny",
            vec![
                Field::new("id", SqlType::Uint32),
                Field::new("name", SqlType::Varchar),
            ],
            vec![vec!["10", "nice name"]],
        ),
        Case {
            name: "insert",
            fields: Vec::new(),
            rows: Vec::new(),
            rows_affected: 1,
            insert_id: 23,
        },
        Case::select(
            "type and name",
            vec![
                Field::new("name", SqlType::Int64),
                Field::new("name2", SqlType::Varchar),
            ],
            vec![vec!["10", "nice name"], vec!["20", "nicer name"]],
        ),
        Case {
            name: "all types",
            fields: all_fields(),
            rows: vec![vec![Value::NULL; SqlType::ALL.len()]],
            rows_affected: 0,
            insert_id: 0,
        },
        Case::select("all types set", all_fields(), vec![all_values]),
        Case::select(
            "first empty string",
            vec![Field::new("name", SqlType::Varchar)],
            vec![vec![""], vec!["nice"]],
        ),
        Case::select(
            "type only",
            vec![type_only(SqlType::Int64), type_only(SqlType::Varchar)],
            vec![vec!["10", "nice name"], vec!["20", "nicer name"]],
        ),
        Case::select(
            "complete",
            vec![
                complete(
                    "id",
                    SqlType::Int64,
                    20,
                    63,
                    ColumnFlags::NOT_NULL_FLAG | ColumnFlags::PRI_KEY_FLAG | ColumnFlags::NUM_FLAG,
                ),
                complete("name", SqlType::Varchar, 255, 33, ColumnFlags::empty()),
            ],
            vec![vec!["10", "nice name"], vec!["20", "nicer name"]],
        ),
    ]
}

fn find(name: &str) -> Option<Case> {
    cases().into_iter().find(|case| case.name == name)
}

fn not_found(sql: &str) -> ErrPayload {
    ErrPayload::new(1146, "42S02", format!("unknown query '{sql}'"))
}

/// Serves [`cases`] by name; a `with warnings` suffix adds 99 warnings
struct CannedHandler;

impl Handler for CannedHandler {
    fn prepare(&mut self, _: &SessionInfo, sql: &str) -> HandlerResult<PrepareInfo> {
        let name = sql.strip_suffix(WITH_WARNINGS).unwrap_or(sql);
        let case = find(name).ok_or_else(|| not_found(sql))?;
        Ok(PrepareInfo {
            param_types: Vec::new(),
            fields: case.fields,
        })
    }

    fn handle(
        &mut self,
        session: &SessionInfo,
        query: &Query<'_>,
        _: bool,
    ) -> HandlerResult<Outcome> {
        let (name, warnings) = match query.sql.strip_suffix(WITH_WARNINGS) {
            Some(name) => (name, 99),
            None => (query.sql, 0),
        };
        let case = find(name).ok_or_else(|| not_found(query.sql))?;
        let outcome = if case.fields.is_empty() {
            Outcome::ok(case.rows_affected, case.insert_id)
        } else {
            Outcome::rows(case.fields, case.rows, session.fetch_batch_size)
        };
        Ok(outcome.with_warnings(warnings))
    }
}

fn check_buffered(conn: &mut Client, case: &Case, sql: &str, warnings: u16) {
    for want_fields in [true, false] {
        let (result, got_warnings) = conn
            .execute_fetch_with_warning_count(sql, case.rows.len(), want_fields)
            .unwrap();
        assert_eq!(result, case.expected(want_fields), "{sql}");
        assert_eq!(got_warnings, warnings, "{sql}");

        if case.rows.len() > 1 {
            let err = conn.execute_fetch(sql, 1, want_fields).unwrap_err();
            assert!(
                matches!(err, Error::RowLimitExceeded { max_rows: 1 }),
                "{sql}: {err:?}"
            );
        }
    }
}

fn check_streamed(conn: &mut Client, case: &Case, sql: &str, warnings: u16) {
    let mut stream = conn.execute_stream_fetch(sql).unwrap();
    assert_eq!(stream.fields(), case.fields.as_slice(), "{sql}");
    assert_eq!(stream.rows_affected(), case.rows_affected, "{sql}");
    let mut rows = Vec::new();
    while let Some(row) = stream.fetch_next().unwrap() {
        rows.push(row);
    }
    assert_eq!(rows, case.rows, "{sql}");
    assert_eq!(stream.warnings(), warnings, "{sql}");
}

fn check_binary(conn: &mut Client, case: &Case, sql: &str) {
    let id = conn.prepare(sql).unwrap();
    assert_eq!(conn.statements().get(id).unwrap().fields, case.fields);
    let result = conn.execute(id, &[], case.rows.len()).unwrap();
    assert_eq!(result, case.expected(true), "{sql}");
    conn.close_statement(id).unwrap();
}

#[test]
fn test_check_query() {
    for opts in all_opts() {
        let (mut conn, _server) = connect_with(opts, CannedHandler);
        for case in cases() {
            for (sql, warnings) in [
                (case.name.to_string(), 0),
                (format!("{}{WITH_WARNINGS}", case.name), 99),
            ] {
                check_buffered(&mut conn, &case, &sql, warnings);
                check_streamed(&mut conn, &case, &sql, warnings);
                check_binary(&mut conn, &case, &sql);
            }
        }
        conn.ping().unwrap();
    }
}

#[test]
fn test_unknown_query() {
    let (mut conn, _server) = connect_with(all_opts()[1].clone(), CannedHandler);
    let err = conn.execute_fetch("nothing", 10, true).unwrap_err();
    assert_eq!(err.code(), 1146);
    let err = conn.prepare("nothing").unwrap_err();
    assert_eq!(err.code(), 1146);
}
