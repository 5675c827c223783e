//! An in-process server on one end of a socket pair and a client on the other

#![allow(dead_code)]

use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};

use zero_mysql_wire::handler::{HandlerResult, Outcome, PrepareInfo, Query, SessionInfo};
use zero_mysql_wire::protocol::response::ErrPayload;
use zero_mysql_wire::{Conn, Field, Handler, Opts, PacketStream, Row, Session, SqlType, Value};

pub type Client = Conn<PacketStream<UnixStream>>;

/// Start a session serving [`TestHandler`] and connect a client to it
pub fn connect(opts: Opts) -> (Client, JoinHandle<zero_mysql_wire::Result<()>>) {
    connect_with(opts, TestHandler::default())
}

pub fn connect_with<H>(opts: Opts, handler: H) -> (Client, JoinHandle<zero_mysql_wire::Result<()>>)
where
    H: Handler + Send + 'static,
{
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let (client, server) = UnixStream::pair().expect("socket pair");
    let server_opts = opts.clone();
    let handle = thread::spawn(move || {
        let mut session = Session::new(PacketStream::new(server), &server_opts)?;
        session.serve(handler)
    });
    let conn = Conn::new(PacketStream::new(client), &opts).expect("client");
    (conn, handle)
}

/// Both framings, legacy EOF first
pub fn all_opts() -> [Opts; 2] {
    [Opts::default().legacy_eof(), Opts::default()]
}

pub fn select_fields() -> Vec<Field> {
    vec![
        Field::new("id", SqlType::Int32),
        Field::new("name", SqlType::Varchar),
    ]
}

pub fn select_rows() -> Vec<Row> {
    vec![
        vec![Value::int32(1), Value::varchar("nice name")],
        vec![Value::int32(2), Value::NULL],
    ]
}

/// Rows `0..n` of a single BIGINT column
pub fn counting_rows(n: i64) -> Vec<Row> {
    (0..n).map(|i| vec![Value::int64(i)]).collect()
}

/// Answers a handful of fixed queries
///
/// * `ok`: affects 3 rows, last insert id 7
/// * `ok with warnings`: 99 warnings
/// * `select rows`, `select rows with warnings`: [`select_rows`]
/// * `large N`: [`counting_rows`]
/// * `empty result`: three columns, no rows
/// * `failing stream`: one row, then an error
/// * `select ?, ...`: echoes the bound parameters
/// * anything else is a syntax error
///
/// `;` separates the statements of a multi-statement query.
#[derive(Debug, Default)]
pub struct TestHandler {
    pending: VecDeque<String>,
}

impl TestHandler {
    fn result(
        session: &SessionInfo,
        sql: &str,
        bind_vars: &[(String, Value)],
    ) -> HandlerResult<Outcome> {
        let batch_size = session.fetch_batch_size;
        Ok(match sql {
            "ok" => Outcome::ok(3, 7),
            "ok with warnings" => Outcome::ok(0, 0).with_warnings(99),
            "select rows" => Outcome::rows(select_fields(), select_rows(), batch_size),
            "select rows with warnings" => {
                Outcome::rows(select_fields(), select_rows(), batch_size).with_warnings(99)
            }
            "empty result" => Outcome::rows(
                vec![
                    Field::new("a", SqlType::Int64),
                    Field::new("b", SqlType::Varchar),
                    Field::new("c", SqlType::Float64),
                ],
                Vec::new(),
                batch_size,
            ),
            "failing stream" => {
                let mut sent = false;
                Outcome::streaming(
                    vec![Field::new("n", SqlType::Int64)],
                    move || -> HandlerResult<Option<Vec<Row>>> {
                        if sent {
                            let message = "query execution was interrupted";
                            return Err(ErrPayload::general(1317, message));
                        }
                        sent = true;
                        Ok(Some(counting_rows(1)))
                    },
                )
            }
            _ if sql.starts_with("large ") => {
                let n = sql["large ".len()..]
                    .parse()
                    .map_err(|_| syntax_error(sql))?;
                Outcome::rows(vec![Field::new("n", SqlType::Int64)], counting_rows(n), batch_size)
            }
            _ if sql.starts_with("select ?") => {
                let fields = bind_vars
                    .iter()
                    .map(|(name, value)| Field::new(name.as_str(), value.ty()))
                    .collect();
                let row = bind_vars.iter().map(|(_, value)| value.clone()).collect();
                Outcome::rows(fields, vec![row], batch_size)
            }
            _ => return Err(syntax_error(sql)),
        })
    }
}

fn syntax_error(sql: &str) -> ErrPayload {
    ErrPayload::new(1064, "42000", format!("syntax error near '{sql}'"))
}

impl Handler for TestHandler {
    fn init_db(&mut self, _: &SessionInfo, schema: &str) -> HandlerResult<()> {
        if schema == "forbidden" {
            return Err(ErrPayload::new(1044, "42000", "access denied"));
        }
        Ok(())
    }

    fn prepare(&mut self, _: &SessionInfo, sql: &str) -> HandlerResult<PrepareInfo> {
        let param_count = sql.matches('?').count();
        let fields = match sql {
            "select rows" => select_fields(),
            _ if sql.starts_with("large ") || sql == "failing stream" => {
                vec![Field::new("n", SqlType::Int64)]
            }
            _ if sql.starts_with("select ?") || sql == "ok" || sql == "empty result" => Vec::new(),
            _ => return Err(syntax_error(sql)),
        };
        Ok(PrepareInfo {
            param_types: vec![SqlType::Varchar; param_count],
            fields,
        })
    }

    fn handle(
        &mut self,
        session: &SessionInfo,
        query: &Query<'_>,
        _: bool,
    ) -> HandlerResult<Outcome> {
        self.pending.clear();
        let mut statements = query.sql.split(';').map(str::trim);
        let first = statements.next().unwrap_or_default();
        self.pending.extend(statements.map(str::to_string));
        Self::result(session, first, query.bind_vars)
    }

    fn more_results(&mut self, session: &SessionInfo) -> HandlerResult<Option<Outcome>> {
        match self.pending.pop_front() {
            Some(sql) => Self::result(session, &sql, &[]).map(Some),
            None => Ok(None),
        }
    }
}
