//! HTTP/JSON API for the journal
//!
//! `flowjournal serve` → binds the listener and answers requests on a fixed
//! number of worker threads, all sharing one [`Database`] pool.
//!
//! Routing is a pure function ([`route`]) from an [`ApiRequest`] to a
//! [`Reply`], so handlers can be exercised without a socket.

use crate::auth::{self, AuthError};
use crate::db::{Database, DbError};
use crate::journal::{
    DailyEntryInput, FinalReflectionInput, IntroReflectionInput, WeeklyReflectionInput,
    DEFAULT_ENTRY_LIMIT,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Failure of a single API call, mapped onto an HTTP status
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Unauthorized => 401,
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed => 405,
            ApiError::PayloadTooLarge => 413,
            ApiError::Unavailable(_) => 503,
            ApiError::Internal(_) => 500,
        }
    }

    /// Text sent to the client; store faults are not echoed back
    fn detail(&self) -> String {
        match self {
            ApiError::Unavailable(_) => "Service unavailable".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::DuplicateUsername(_) => ApiError::BadRequest("Username already exists".into()),
            DbError::NotFound(_) => ApiError::NotFound(e.to_string()),
            DbError::Pool(_) | DbError::Connection(_) => ApiError::Unavailable(e.to_string()),
            DbError::Query(_) | DbError::Json(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(db) => db.into(),
            AuthError::Missing | AuthError::Malformed | AuthError::Invalid => ApiError::Unauthorized,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Internal(format!("Failed to serialize response: {}", e))
    }
}

// ============================================================================
// Request / Reply
// ============================================================================

/// Transport-independent view of an HTTP request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// Build from a raw URL (`/path?query`)
    pub fn new(method: Method, url: &str, authorization: Option<String>, body: Vec<u8>) -> Self {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
            authorization,
            body,
        }
    }
}

/// JSON response ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    /// Attach a `WWW-Authenticate` challenge
    pub challenge: bool,
}

impl Reply {
    fn json<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        Ok(Self {
            status: 200,
            body: serde_json::to_string(value)?,
            challenge: false,
        })
    }

    fn message(text: &str) -> Result<Self, ApiError> {
        Self::json(&json!({ "message": text }))
    }

    fn error(err: &ApiError) -> Self {
        Self {
            status: err.status(),
            body: json!({ "detail": err.detail() }).to_string(),
            challenge: matches!(err, ApiError::Unauthorized),
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Register,
    UserStatus,
    IntroReflection,
    Entries,
    Entry(&'a str),
    WeeklyReflection,
    WeeklyReflectionByWeek(&'a str),
    WeeklyReflections,
    FinalReflection,
    EmotionWheel,
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let route = match segments.as_slice() {
            ["health"] => Route::Health,
            ["api", "register"] => Route::Register,
            ["api", "user", "status"] => Route::UserStatus,
            ["api", "intro-reflection"] => Route::IntroReflection,
            ["api", "entries"] => Route::Entries,
            ["api", "entries", date] if !date.is_empty() => Route::Entry(date),
            ["api", "weekly-reflection"] => Route::WeeklyReflection,
            ["api", "weekly-reflection", week] if !week.is_empty() => Route::WeeklyReflectionByWeek(week),
            ["api", "weekly-reflections"] => Route::WeeklyReflections,
            ["api", "final-reflection"] => Route::FinalReflection,
            ["api", "settings", "emotion-wheel"] => Route::EmotionWheel,
            _ => return None,
        };
        Some(route)
    }

    fn allows(&self, method: &Method) -> bool {
        match self {
            Route::Health
            | Route::UserStatus
            | Route::Entry(_)
            | Route::WeeklyReflectionByWeek(_)
            | Route::WeeklyReflections => *method == Method::Get,
            Route::Register | Route::WeeklyReflection => *method == Method::Post,
            Route::IntroReflection | Route::Entries | Route::FinalReflection => {
                *method == Method::Get || *method == Method::Post
            }
            Route::EmotionWheel => *method == Method::Get || *method == Method::Put,
        }
    }

    fn requires_auth(&self) -> bool {
        !matches!(self, Route::Health | Route::Register)
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{}', expected YYYY-MM-DD", raw)))
}

fn parse_week(raw: &str) -> Result<i32, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid week number '{}'", raw)))
}

/// Answer one request
pub fn route(db: &Database, request: &ApiRequest) -> Reply {
    match dispatch(db, request) {
        Ok(reply) => reply,
        Err(err) => {
            match &err {
                ApiError::Internal(msg) | ApiError::Unavailable(msg) => error!(error = %msg, "request failed"),
                other => debug!(status = other.status(), error = %other, "request rejected"),
            }
            Reply::error(&err)
        }
    }
}

fn dispatch(db: &Database, request: &ApiRequest) -> Result<Reply, ApiError> {
    let route = Route::parse(&request.path).ok_or_else(|| ApiError::NotFound("Not found".into()))?;
    if !route.allows(&request.method) {
        return Err(ApiError::MethodNotAllowed);
    }

    if !route.requires_auth() {
        return match route {
            Route::Register => {
                let body: RegisterRequest = parse_body(&request.body)?;
                let user_id = db.register(&body.username, &body.password)?;
                Reply::json(&json!({ "message": "User created successfully", "user_id": user_id }))
            }
            _ => Reply::json(&json!({ "status": "healthy" })),
        };
    }

    let user = auth::authenticate(db, request.authorization.as_deref())?;
    let post = request.method == Method::Post;

    match route {
        Route::UserStatus => Reply::json(&db.user_status(user.id)?),

        Route::IntroReflection if post => {
            let body: IntroReflectionInput = parse_body(&request.body)?;
            db.save_intro_reflection(user.id, &body)?;
            Reply::message("Intro reflection saved successfully")
        }
        Route::IntroReflection => Reply::json(&db.get_intro_reflection(user.id)?),

        Route::Entries if post => {
            let body: DailyEntryInput = parse_body(&request.body)?;
            db.save_daily_entry(user.id, &body)?;
            Reply::message("Entry saved successfully")
        }
        Route::Entries => {
            let query: ListQuery = serde_urlencoded::from_str(&request.query)
                .map_err(|e| ApiError::BadRequest(format!("Invalid query: {}", e)))?;
            let limit = query.limit.unwrap_or(DEFAULT_ENTRY_LIMIT);
            if limit < 0 {
                return Err(ApiError::BadRequest("limit must not be negative".into()));
            }
            Reply::json(&db.list_daily_entries(user.id, limit)?)
        }
        Route::Entry(raw) => Reply::json(&db.get_daily_entry(user.id, parse_date(raw)?)?),

        Route::WeeklyReflection => {
            let body: WeeklyReflectionInput = parse_body(&request.body)?;
            db.save_weekly_reflection(user.id, &body)?;
            Reply::message("Weekly reflection saved successfully")
        }
        Route::WeeklyReflectionByWeek(raw) => {
            Reply::json(&db.get_weekly_reflection(user.id, parse_week(raw)?)?)
        }
        Route::WeeklyReflections => Reply::json(&db.list_weekly_reflections(user.id)?),

        Route::FinalReflection if post => {
            let body: FinalReflectionInput = parse_body(&request.body)?;
            db.save_final_reflection(user.id, &body)?;
            Reply::message("Final reflection saved successfully")
        }
        // The API answers a missing final reflection with `null`
        Route::FinalReflection => match db.get_final_reflection(user.id) {
            Ok(reflection) => Reply::json(&reflection),
            Err(DbError::NotFound(_)) => Reply::json(&serde_json::Value::Null),
            Err(e) => Err(e.into()),
        },

        Route::EmotionWheel if request.method == Method::Put => {
            let document: serde_json::Value = parse_body(&request.body)?;
            if !document.is_object() {
                return Err(ApiError::BadRequest("Emotion wheel must be a JSON object".into()));
            }
            db.update_emotion_wheel(user.id, &document)?;
            Reply::message("Emotion wheel updated successfully")
        }
        Route::EmotionWheel => Reply::json(&db.get_emotion_wheel(user.id)?),

        Route::Health | Route::Register => Err(ApiError::MethodNotAllowed),
    }
}

// ============================================================================
// Server
// ============================================================================

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn read_request(request: &mut Request) -> Result<ApiRequest, ApiError> {
    if request.body_length().is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(ApiError::PayloadTooLarge);
    }

    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| ApiError::BadRequest(format!("Failed to read body: {}", e)))?;
    if body.len() > MAX_BODY_BYTES {
        return Err(ApiError::PayloadTooLarge);
    }

    let authorization = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string());

    Ok(ApiRequest::new(request.method().clone(), request.url(), authorization, body))
}

fn respond(request: Request, reply: Reply) {
    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Some(h) = header("Content-Type", "application/json") {
        response.add_header(h);
    }
    if reply.challenge {
        if let Some(h) = header("WWW-Authenticate", &auth::challenge()) {
            response.add_header(h);
        }
    }
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "failed to write response");
    }
}

fn handle_request(db: &Database, mut request: Request) {
    let path = request.url().split('?').next().unwrap_or("/").to_string();
    let span = info_span!(
        "request",
        id = %Uuid::new_v4(),
        method = %request.method(),
        path = %path
    );
    let _guard = span.enter();
    let started = Instant::now();

    let reply = match read_request(&mut request) {
        Ok(api_request) => route(db, &api_request),
        Err(err) => Reply::error(&err),
    };

    info!(
        status = reply.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "handled"
    );
    respond(request, reply);
}

/// Stops a running [`JournalServer`] from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    server: Arc<Server>,
    stopping: Arc<AtomicBool>,
    workers: usize,
}

impl ShutdownHandle {
    /// Ask every worker to exit once its current request is done
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // each unblock releases exactly one waiting worker
        for _ in 0..self.workers {
            self.server.unblock();
        }
    }
}

/// Listening socket plus the worker pool that serves it
pub struct JournalServer {
    server: Arc<Server>,
    db: Arc<Database>,
    workers: usize,
    stopping: Arc<AtomicBool>,
}

impl JournalServer {
    /// Bind the listener; requests are not served until [`run`](Self::run)
    pub fn bind<A: ToSocketAddrs>(addr: A, db: Arc<Database>, workers: usize) -> std::io::Result<Self> {
        let server = Server::http(addr).map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self {
            server: Arc::new(server),
            db,
            workers: workers.max(1),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server: Arc::clone(&self.server),
            stopping: Arc::clone(&self.stopping),
            workers: self.workers,
        }
    }

    /// Serve until [`ShutdownHandle::shutdown`] is called
    pub fn run(self) {
        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let server = Arc::clone(&self.server);
                let db = Arc::clone(&self.db);
                let stopping = Arc::clone(&self.stopping);
                std::thread::Builder::new()
                    .name(format!("flowjournal-worker-{}", worker))
                    .spawn(move || loop {
                        match server.recv() {
                            Ok(request) => handle_request(&db, request),
                            Err(_) if stopping.load(Ordering::SeqCst) => break,
                            Err(e) => warn!(worker, error = %e, "accept failed"),
                        }
                    })
            })
            .collect();

        for handle in handles {
            match handle {
                Ok(handle) => {
                    if handle.join().is_err() {
                        error!("worker thread panicked");
                    }
                }
                Err(e) => error!(error = %e, "failed to spawn worker"),
            }
        }
        info!("server stopped");
    }
}
