//! End-to-end tests for the HTTP API
//!
//! Each test starts a real server on an ephemeral port backed by a fresh
//! SQLite file and talks to it over the network with `ureq`.

use flowjournal::{Credentials, Database, JournalServer, ShutdownHandle};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread::JoinHandle;
use tempfile::TempDir;

struct TestServer {
    base: String,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
    _dir: TempDir,
}

impl TestServer {
    fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("api.db").to_str().unwrap()).unwrap();
        let server = JournalServer::bind("127.0.0.1:0", Arc::new(db), 4).unwrap();
        let addr = server.local_addr().expect("bound to a TCP address");
        let handle = server.shutdown_handle();
        let thread = std::thread::spawn(move || server.run());

        Self {
            base: format!("http://{}", addr),
            handle,
            thread: Some(thread),
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Reply {
    status: u16,
    challenge: Option<String>,
    body: Value,
}

fn finish(result: Result<ureq::Response, ureq::Error>) -> Reply {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(e) => panic!("transport error: {}", e),
    };
    let status = response.status();
    let challenge = response.header("WWW-Authenticate").map(str::to_string);
    let text = response.into_string().unwrap();
    let body = serde_json::from_str(&text).unwrap_or(Value::Null);
    Reply { status, challenge, body }
}

fn auth(username: &str, password: &str) -> String {
    Credentials {
        username: username.into(),
        password: password.into(),
    }
    .to_header()
}

fn get(server: &TestServer, path: &str, authorization: Option<&str>) -> Reply {
    let mut request = ureq::get(&server.url(path));
    if let Some(value) = authorization {
        request = request.set("Authorization", value);
    }
    finish(request.call())
}

fn send(server: &TestServer, method: &str, path: &str, authorization: Option<&str>, body: Value) -> Reply {
    let mut request = ureq::request(method, &server.url(path));
    if let Some(value) = authorization {
        request = request.set("Authorization", value);
    }
    finish(request.send_json(body))
}

fn register(server: &TestServer, username: &str, password: &str) -> String {
    let reply = send(
        server,
        "POST",
        "/api/register",
        None,
        json!({"username": username, "password": password}),
    );
    assert_eq!(reply.status, 200, "register failed: {}", reply.body);
    auth(username, password)
}

// =============================================================================
// Accounts
// =============================================================================

#[test]
fn test_health_is_public() {
    let server = TestServer::start();
    let reply = get(&server, "/health", None);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, json!({"status": "healthy"}));
}

#[test]
fn test_register_and_status() {
    let server = TestServer::start();
    let ana = register(&server, "ana", "secret");

    let status = get(&server, "/api/user/status", Some(&ana));
    assert_eq!(status.status, 200);
    assert_eq!(status.body["username"], "ana");
    assert_eq!(status.body["intro_completed"], false);

    let duplicate = send(
        &server,
        "POST",
        "/api/register",
        None,
        json!({"username": "ana", "password": "x"}),
    );
    assert_eq!(duplicate.status, 400);
    assert_eq!(duplicate.body["detail"], "Username already exists");
}

#[test]
fn test_unauthorized_gets_challenge() {
    let server = TestServer::start();
    register(&server, "ana", "secret");

    let missing = get(&server, "/api/entries", None);
    assert_eq!(missing.status, 401);
    assert_eq!(missing.challenge.as_deref(), Some("Basic realm=\"flowjournal\""));

    let wrong = get(&server, "/api/entries", Some(&auth("ana", "guess")));
    assert_eq!(wrong.status, 401);
    assert!(wrong.challenge.is_some());
}

#[test]
fn test_unknown_route_and_method() {
    let server = TestServer::start();
    assert_eq!(get(&server, "/api/missing", None).status, 404);
    assert_eq!(send(&server, "DELETE", "/api/entries", None, json!({})).status, 405);
}

// =============================================================================
// Journal
// =============================================================================

#[test]
fn test_intro_sets_completed_flag() {
    let server = TestServer::start();
    let ana = register(&server, "ana", "secret");
    let ben = register(&server, "ben", "secret");

    assert_eq!(get(&server, "/api/intro-reflection", Some(&ana)).status, 404);

    let saved = send(
        &server,
        "POST",
        "/api/intro-reflection",
        Some(&ana),
        json!({
            "q1_important_events": "moved", "q2_current_thoughts": "busy",
            "q3_physical_symptoms": "tired", "q4_current_feelings": "hopeful",
            "q5_brought_closer": "friends", "q6_brought_further": "news",
            "q7_change_in_10_weeks": "sleep"
        }),
    );
    assert_eq!(saved.status, 200);

    assert_eq!(get(&server, "/api/user/status", Some(&ana)).body["intro_completed"], true);
    assert_eq!(get(&server, "/api/user/status", Some(&ben)).body["intro_completed"], false);
    assert_eq!(
        get(&server, "/api/intro-reflection", Some(&ana)).body["q7_change_in_10_weeks"],
        "sleep"
    );
}

#[test]
fn test_daily_entries_replace_and_list() {
    let server = TestServer::start();
    let ana = register(&server, "ana", "secret");

    for day in 1..=5 {
        let reply = send(
            &server,
            "POST",
            "/api/entries",
            Some(&ana),
            json!({
                "entry_date": format!("2024-02-0{}", day),
                "energy_level": day,
                "selected_emotions": ["steady"],
                "favorite_moment": "walk"
            }),
        );
        assert_eq!(reply.status, 200);
    }

    // Re-save day 3 without favorite_moment: full replace clears it
    send(
        &server,
        "POST",
        "/api/entries",
        Some(&ana),
        json!({"entry_date": "2024-02-03", "energy_level": 9}),
    );
    let day3 = get(&server, "/api/entries/2024-02-03", Some(&ana)).body;
    assert_eq!(day3["energy_level"], 9);
    assert!(day3["favorite_moment"].is_null());
    assert_eq!(day3["selected_emotions"], json!([]));

    let recent = get(&server, "/api/entries?limit=2", Some(&ana)).body;
    let dates: Vec<&str> = recent
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["entry_date"].as_str().unwrap())
        .collect();
    assert_eq!(dates, vec!["2024-02-05", "2024-02-04"]);

    let missing = get(&server, "/api/entries/2023-12-31", Some(&ana));
    assert_eq!(missing.status, 200);
    assert!(missing.body.is_null());
}

#[test]
fn test_entries_are_private() {
    let server = TestServer::start();
    let ana = register(&server, "ana", "secret");
    let ben = register(&server, "ben", "secret");

    send(
        &server,
        "POST",
        "/api/entries",
        Some(&ana),
        json!({"entry_date": "2024-02-01", "energy_level": 3}),
    );

    assert!(get(&server, "/api/entries/2024-02-01", Some(&ben)).body.is_null());
    assert_eq!(get(&server, "/api/entries", Some(&ben)).body, json!([]));
}

#[test]
fn test_weekly_and_final_reflections() {
    let server = TestServer::start();
    let ana = register(&server, "ana", "secret");

    for week in [1, 3, 2] {
        let reply = send(
            &server,
            "POST",
            "/api/weekly-reflection",
            Some(&ana),
            json!({
                "week_number": week,
                "week_start_date": "2024-02-05",
                "week_end_date": "2024-02-11",
                "next_week_focus": format!("focus {}", week)
            }),
        );
        assert_eq!(reply.status, 200);
    }

    let weeks: Vec<i64> = get(&server, "/api/weekly-reflections", Some(&ana))
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["week_number"].as_i64().unwrap())
        .collect();
    assert_eq!(weeks, vec![3, 2, 1]);
    assert_eq!(
        get(&server, "/api/weekly-reflection/2", Some(&ana)).body["next_week_focus"],
        "focus 2"
    );

    let absent = get(&server, "/api/final-reflection", Some(&ana));
    assert_eq!(absent.status, 200);
    assert!(absent.body.is_null());
}

#[test]
fn test_emotion_wheel_round_trip() {
    let server = TestServer::start();
    let ana = register(&server, "ana", "secret");

    let default = get(&server, "/api/settings/emotion-wheel", Some(&ana));
    assert_eq!(default.body, json!({"custom_emotions": [], "hidden_emotions": []}));

    let wheel = json!({"custom_emotions": ["restless"], "hidden_emotions": ["bored"]});
    let put = send(&server, "PUT", "/api/settings/emotion-wheel", Some(&ana), wheel.clone());
    assert_eq!(put.status, 200);
    assert_eq!(get(&server, "/api/settings/emotion-wheel", Some(&ana)).body, wheel);
}

#[test]
fn test_concurrent_saves_leave_one_row() {
    let server = TestServer::start();
    let ana = register(&server, "ana", "secret");
    let server = Arc::new(server);

    let writers: Vec<_> = (1..=8)
        .map(|energy| {
            let server = Arc::clone(&server);
            let ana = ana.clone();
            std::thread::spawn(move || {
                send(
                    &server,
                    "POST",
                    "/api/entries",
                    Some(&ana),
                    json!({
                        "entry_date": "2024-02-14",
                        "energy_level": energy,
                        "daily_mantra": format!("mantra {}", energy)
                    }),
                )
                .status
            })
        })
        .collect();
    for writer in writers {
        assert_eq!(writer.join().unwrap(), 200);
    }

    let listed = get(&server, "/api/entries", Some(&ana)).body;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let entry = get(&server, "/api/entries/2024-02-14", Some(&ana)).body;
    let energy = entry["energy_level"].as_i64().unwrap();
    assert_eq!(entry["daily_mantra"], format!("mantra {}", energy));
}
