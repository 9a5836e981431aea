use crate::application_port::*;
use crate::domain_model::*;
use crate::infra_fake::FakeTransport;
use nanoid::nanoid;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const FAKE_ACCESS_PREFIX: &str = "fake-access-token:";
pub const FAKE_REFRESH_PREFIX: &str = "fake-refresh-token:";
pub const FAKE_MAGIC_PREFIX: &str = "fake-magic:";

pub const DEMO_PROJECT: &str = "demo";

#[derive(Debug, Clone)]
pub struct FakeBackendConfig {
    /// Requests an access token may authorize before it answers 401.
    pub access_token_uses: u32,
}

impl Default for FakeBackendConfig {
    fn default() -> Self {
        Self {
            access_token_uses: 3,
        }
    }
}

#[derive(Default)]
struct BackendState {
    access_uses: HashMap<String, u32>,
    spent_refresh: HashSet<String>,
    refresh_revoked: bool,
    fail_next_status_change: bool,
    refresh_calls: usize,
    tasks: BTreeMap<String, Vec<Task>>,
}

type SharedState = Arc<Mutex<BackendState>>;

fn locked(state: &SharedState) -> MutexGuard<'_, BackendState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn body_str<'a>(request: &'a HttpRequest, field: &str) -> Option<&'a str> {
    request.body.as_ref()?.get(field)?.as_str()
}

fn error_body(status: u16, message: &str) -> HttpResponse {
    HttpResponse::new(status).with_json(&json!({ "error": message }))
}

/// In-process stand-in for the workdesk API, mounted on a `FakeTransport`.
///
/// Tokens carry a recognizable prefix, so a pair issued by an earlier process is still
/// accepted. Each access token authorizes a limited number of requests, which makes the
/// refresh path easy to exercise. Refresh tokens are single use.
pub struct FakeBackend {
    transport: Arc<FakeTransport>,
    state: SharedState,
    config: FakeBackendConfig,
}

impl FakeBackend {
    pub fn new(config: FakeBackendConfig) -> Self {
        let state: SharedState = Arc::new(Mutex::new(BackendState::default()));
        locked(&state)
            .tasks
            .insert(DEMO_PROJECT.to_owned(), demo_tasks());

        let transport = Arc::new(FakeTransport::new());
        mount(&transport, &state, &config);
        Self {
            transport,
            state,
            config,
        }
    }

    pub fn transport(&self) -> Arc<FakeTransport> {
        self.transport.clone()
    }

    pub fn tasks(&self, project: &ProjectId) -> Vec<Task> {
        locked(&self.state)
            .tasks
            .get(&project.0)
            .cloned()
            .unwrap_or_default()
    }

    pub fn refresh_calls(&self) -> usize {
        locked(&self.state).refresh_calls
    }

    /// The next status change answers 409 without applying.
    pub fn fail_next_status_change(&self) {
        locked(&self.state).fail_next_status_change = true;
    }

    /// Every access token issued or seen so far answers 401 from now on.
    pub fn expire_access_tokens(&self) {
        for uses in locked(&self.state).access_uses.values_mut() {
            *uses = self.config.access_token_uses;
        }
    }

    pub fn revoke_refresh_tokens(&self) {
        locked(&self.state).refresh_revoked = true;
    }
}

fn demo_tasks() -> Vec<Task> {
    [
        ("t-1", "Sketch sprint board", TaskStatus::Todo),
        ("t-2", "Wire login screen", TaskStatus::InProgress),
        ("t-3", "Calendar sync", TaskStatus::InReview),
        ("t-4", "Room booking API", TaskStatus::Done),
    ]
    .into_iter()
    .map(|(id, title, status)| Task {
        id: TaskId(id.to_owned()),
        title: title.to_owned(),
        status,
        assignee: None,
        sprint_id: Some("sprint-1".to_owned()),
    })
    .collect()
}

fn issue_session(state: &mut BackendState) -> Session {
    let session = Session::new(
        format!("{FAKE_ACCESS_PREFIX}{}", nanoid!()),
        format!("{FAKE_REFRESH_PREFIX}{}", nanoid!()),
    );
    state
        .access_uses
        .insert(session.access_token.as_str().to_owned(), 0);
    session
}

fn session_response(status: u16, session: &Session) -> HttpResponse {
    let body = serde_json::to_value(session).unwrap_or(Value::Null);
    HttpResponse::new(status).with_json(&body)
}

fn authorize(state: &mut BackendState, request: &HttpRequest, budget: u32) -> bool {
    let Some(token) = request.bearer_token() else {
        return false;
    };
    if !token.starts_with(FAKE_ACCESS_PREFIX) {
        return false;
    }
    let uses = state.access_uses.entry(token.to_owned()).or_insert(0);
    if *uses >= budget {
        return false;
    }
    *uses += 1;
    true
}

fn mount(transport: &FakeTransport, state: &SharedState, config: &FakeBackendConfig) {
    let shared = state.clone();
    transport.route(Method::Post, LOGIN_PATH, move |request| {
        Ok(match body_str(request, "password") {
            Some(password) if !password.is_empty() => {
                session_response(200, &issue_session(&mut locked(&shared)))
            }
            _ => error_body(401, "invalid credentials"),
        })
    });

    let shared = state.clone();
    transport.route(Method::Post, REGISTER_PATH, move |request| {
        Ok(match (body_str(request, "email"), body_str(request, "password")) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                session_response(201, &issue_session(&mut locked(&shared)))
            }
            _ => error_body(422, "email and password are required"),
        })
    });

    transport.route(Method::Post, MAGIC_LINK_REQUEST_PATH, |_| {
        Ok(HttpResponse::new(202))
    });

    let shared = state.clone();
    transport.route(Method::Post, MAGIC_LINK_VERIFY_PATH, move |request| {
        Ok(match body_str(request, "token") {
            Some(token) if token.starts_with(FAKE_MAGIC_PREFIX) => {
                session_response(200, &issue_session(&mut locked(&shared)))
            }
            _ => error_body(401, "link expired"),
        })
    });

    let shared = state.clone();
    transport.route(Method::Post, REFRESH_PATH, move |request| {
        let mut state = locked(&shared);
        let response = match body_str(request, "refresh_token") {
            Some(token)
                if token.starts_with(FAKE_REFRESH_PREFIX)
                    && !state.refresh_revoked
                    && state.spent_refresh.insert(token.to_owned()) =>
            {
                state.refresh_calls += 1;
                session_response(200, &issue_session(&mut state))
            }
            _ => error_body(401, "refresh token invalid"),
        };
        Ok(response)
    });

    let shared = state.clone();
    let budget = config.access_token_uses;
    transport.route(Method::Get, "/me", move |request| {
        let mut state = locked(&shared);
        Ok(if authorize(&mut state, request, budget) {
            HttpResponse::ok_json(&json!({ "name": "Demo User" }))
        } else {
            HttpResponse::unauthorized()
        })
    });

    let shared = state.clone();
    transport.route_prefix(Method::Get, "/projects/", move |request| {
        let mut state = locked(&shared);
        if !authorize(&mut state, request, budget) {
            return Ok(HttpResponse::unauthorized());
        }
        let project = request
            .path
            .strip_prefix("/projects/")
            .and_then(|rest| rest.strip_suffix("/tasks"));
        Ok(match project.and_then(|id| state.tasks.get(id)) {
            Some(tasks) => {
                HttpResponse::ok_json(&serde_json::to_value(tasks).unwrap_or(Value::Null))
            }
            None => error_body(404, "project not found"),
        })
    });

    let shared = state.clone();
    transport.route_prefix(Method::Patch, "/tasks/", move |request| {
        let mut state = locked(&shared);
        if !authorize(&mut state, request, budget) {
            return Ok(HttpResponse::unauthorized());
        }
        if std::mem::take(&mut state.fail_next_status_change) {
            return Ok(error_body(409, "task was changed by someone else"));
        }
        let task_id = request
            .path
            .strip_prefix("/tasks/")
            .and_then(|rest| rest.strip_suffix("/status"));
        let status = body_str(request, "status").and_then(|s| s.parse::<TaskStatus>().ok());
        let (Some(task_id), Some(status)) = (task_id, status) else {
            return Ok(error_body(422, "malformed status change"));
        };

        let task = state
            .tasks
            .values_mut()
            .flat_map(|tasks| tasks.iter_mut())
            .find(|task| task.id.0 == task_id);
        Ok(match task {
            Some(task) => {
                task.status = status;
                HttpResponse::ok_json(&serde_json::to_value(&*task).unwrap_or(Value::Null))
            }
            None => error_body(404, "task not found"),
        })
    });
}
