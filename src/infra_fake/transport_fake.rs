use crate::domain_model::*;
use crate::domain_port::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Semaphore;

pub type FakeHandler =
    Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => exact == path,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

struct Route {
    method: Method,
    pattern: PathPattern,
    handler: FakeHandler,
}

/// Scripted in-memory transport.
///
/// Routes are matched newest first, so a later `respond` overrides an earlier one.
/// Unmatched requests get a 404. Every request is logged before it is answered, and a
/// path can be held closed with `hold` until `release` lets its requests through.
#[derive(Default)]
pub struct FakeTransport {
    routes: RwLock<Vec<Route>>,
    log: Mutex<Vec<HttpRequest>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn path_only(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_route(&self, method: Method, pattern: PathPattern, handler: FakeHandler) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route {
                method,
                pattern,
                handler,
            });
    }

    pub fn route<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        self.push_route(method, PathPattern::Exact(path.to_owned()), Arc::new(handler));
    }

    pub fn route_prefix<F>(&self, method: Method, prefix: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        self.push_route(method, PathPattern::Prefix(prefix.to_owned()), Arc::new(handler));
    }

    pub fn respond(&self, method: Method, path: &str, response: HttpResponse) {
        self.route(method, path, move |_| Ok(response.clone()));
    }

    pub fn fail(&self, method: Method, path: &str, error: TransportError) {
        self.route(method, path, move |_| Err(error.clone()));
    }

    pub fn hold(&self, path: &str) {
        locked(&self.gates).insert(path.to_owned(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, path: &str) {
        if let Some(gate) = locked(&self.gates).remove(path) {
            gate.close();
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        locked(&self.log).clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        locked(&self.log)
            .iter()
            .filter(|request| path_only(&request.path) == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    fn handler_for(&self, request: &HttpRequest) -> Option<FakeHandler> {
        let path = path_only(&request.path);
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|route| route.method == request.method && route.pattern.matches(path))
            .map(|route| route.handler.clone())
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        locked(&self.log).push(request.clone());

        let gate = locked(&self.gates)
            .get(path_only(&request.path))
            .cloned();
        if let Some(gate) = gate {
            // closed on release; the error is the signal to go on
            let _ = gate.acquire().await;
        }

        // one suspension per exchange, like a real round trip
        tokio::task::yield_now().await;

        match self.handler_for(&request) {
            Some(handler) => handler(&request),
            None => Ok(HttpResponse::new(404)),
        }
    }
}
