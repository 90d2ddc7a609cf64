use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::auth::{PartyAuthSource, party_from_user};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, ResultShape};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = ToolshedFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct ToolshedHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ToolshedQueryParser>,
}

impl ToolshedHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ToolshedQueryParser),
        }
    }

    /// The community engine and the acting party for this session.
    fn resolve_session<C: ClientInfo>(&self, client: &C) -> PgWireResult<(Arc<Engine>, PartyId)> {
        let metadata = client.metadata();
        let party = party_from_user(metadata.get("user").map(String::as_str))?;
        let db = metadata
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let engine = self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })?;
        Ok((engine, party))
    }

    async fn run(&self, engine: &Engine, party: PartyId, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(engine, party, cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        party: PartyId,
        cmd: Command,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertTool { id, owner_id, title } => {
                engine
                    .register_tool(id, owner_id, title)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteTool { id } => {
                engine.remove_tool(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectTools => tool_rows(engine.list_tools()),
            Command::InsertReservation {
                id,
                tool_id,
                start,
                end,
                contact,
                comment,
            } => {
                let created = engine
                    .create_reservation(NewReservation {
                        id: id.unwrap_or_else(Ulid::new),
                        tool_id,
                        requester_id: party,
                        span: Span { start, end },
                        contact,
                        comment,
                    })
                    .await
                    .map_err(engine_err)?;
                reservation_rows(vec![created])
            }
            Command::UpdateStatus { id, status } => {
                let updated = engine
                    .transition(id, party, status)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(vec![updated])
            }
            Command::SelectReservation { id } => {
                let found = engine.get_reservation(id).map_err(engine_err)?;
                reservation_rows(vec![found])
            }
            Command::SelectToolReservations { tool_id } => {
                reservation_rows(engine.get_tool_reservations(tool_id))
            }
            Command::SelectRequests { party_id } => {
                reservation_rows(engine.get_requests(party_id.unwrap_or(party)))
            }
            Command::SelectPetitions { party_id } => {
                reservation_rows(engine.get_petitions(party_id.unwrap_or(party)))
            }
            Command::SelectPendingRatings { party_id } => {
                reservation_rows(engine.get_pending_ratings(party_id.unwrap_or(party)))
            }
            Command::InsertRating {
                reservation_id,
                rating,
            } => {
                engine
                    .rate(reservation_id, party, rating)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectConflicts { tool_id, start, end } => {
                let schema = Arc::new(conflict_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&engine.has_conflict(tool_id, start, end))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("tool_id"),
        text_field("requester_id"),
        text_field("owner_id"),
        int8_field("start"),
        int8_field("end"),
        text_field("status"),
        text_field("contact"),
        text_field("comment"),
        int8_field("created_at"),
        int8_field("updated_at"),
    ]
}

fn tool_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("owner_id"), text_field("title")]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![FieldInfo::new(
        "conflict".into(),
        None,
        None,
        Type::BOOL,
        FieldFormat::Text,
    )]
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::result_shape(sql) {
        ResultShape::Reservations => reservation_schema(),
        ResultShape::Tools => tool_schema(),
        ResultShape::Conflict => conflict_schema(),
        ResultShape::None => vec![],
    }
}

fn encode_reservation(schema: &Arc<Vec<FieldInfo>>, r: &Reservation) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.tool_id.to_string())?;
    encoder.encode_field(&r.requester_id.to_string())?;
    encoder.encode_field(&r.owner_id.to_string())?;
    encoder.encode_field(&r.span.start)?;
    encoder.encode_field(&r.span.end)?;
    encoder.encode_field(&r.status.as_str())?;
    encoder.encode_field(&r.contact)?;
    encoder.encode_field(&r.comment)?;
    encoder.encode_field(&r.created_at)?;
    encoder.encode_field(&r.updated_at)?;
    Ok(encoder.take_row())
}

fn reservation_rows(reservations: Vec<Reservation>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<DataRow>> = reservations
        .iter()
        .map(|r| encode_reservation(&schema, r))
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn tool_rows(tools: Vec<ToolInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(tool_schema());
    let rows: Vec<PgWireResult<DataRow>> = tools
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.id.to_string())?;
            encoder.encode_field(&t.owner_id.to_string())?;
            encoder.encode_field(&t.title)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for ToolshedHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, party) = self.resolve_session(client)?;
        debug!(%party, query, "simple query");
        Ok(vec![self.run(&engine, party, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ToolshedQueryParser;

#[async_trait]
impl QueryParser for ToolshedQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ToolshedHandler {
    type Statement = String;
    type QueryParser = ToolshedQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, party) = self.resolve_session(client)?;
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        debug!(%party, sql, "extended query");
        self.run(&engine, party, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split `sql` at every `$N` placeholder outside string literals and quoted
/// identifiers.
fn scan_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let digits = bytes[i + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
                if digits > 0
                    && let Ok(n) = sql[i + 1..i + 1 + digits].parse::<usize>()
                {
                    pieces.push(Piece::Text(&sql[text_start..i]));
                    pieces.push(Piece::Param(n));
                    i += 1 + digits;
                    text_start = i;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    scan_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound text parameters as quoted literals. A placeholder with no
/// bound value becomes NULL.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in scan_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match n.checked_sub(1).and_then(|i| params.get(i)) {
                Some(Some(raw)) => {
                    let text = String::from_utf8_lossy(raw.as_ref());
                    out.push('\'');
                    out.push_str(&text.replace('\'', "''"));
                    out.push('\'');
                }
                _ => out.push_str("NULL"),
            },
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ToolshedFactory {
    handler: Arc<ToolshedHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PartyAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ToolshedFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(ToolshedHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PartyAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ToolshedFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::DatesConflict(_) => "23P01",
        EngineError::RoleMismatch { .. } => "42501",
        EngineError::InvalidState { .. } | EngineError::InvalidTarget(_) => "55000",
        EngineError::ToolBusy(_) => "55006",
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidRange | EngineError::SelfBooking | EngineError::InvalidRating(_) => {
            "22023"
        }
        EngineError::LimitExceeded(_) => "54000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Contention(_) => "40001",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
