//! The test application every container runs.
//!
//! A small "grace"-style app: it reports its own environment and index,
//! and can hand out a session cookie so the router pins the client.

use vizzini_models::EnvironmentSnapshot;

/// Port the app serves its main endpoints on.
pub const PRIMARY_PORT: u32 = 8080;

/// Secondary listener answering every request with a fixed body.
pub const SIDE_CHANNEL_PORT: u32 = 9999;

pub const SIDE_CHANNEL_BODY: &str = "grace side-channel";

/// Banner at the top of `/env` and `/`.
pub const BANNER: &str = "DAQUIRI";

/// Session cookie the app issues on `/stick`.
pub const SESSION_COOKIE: &str = "JSESSIONID";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadRequest {
    pub path: String,
    pub query: Option<String>,
    pub cookies: Vec<(String, String)>,
}

impl WorkloadRequest {
    pub fn get(path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        let path = if path.is_empty() { "/" } else { path };
        Self {
            path: path.to_string(),
            query,
            cookies: Vec::new(),
        }
    }

    /// Value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A `Set-Cookie` directive. `expired` asks the client to drop it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub expired: bool,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expired: false,
        }
    }

    pub fn expire(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            expired: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadResponse {
    pub status: u16,
    pub body: String,
    pub set_cookies: Vec<SetCookie>,
}

impl WorkloadResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            set_cookies: Vec::new(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: "404 page not found".to_string(),
            set_cookies: Vec::new(),
        }
    }

    fn with_cookie(mut self, cookie: SetCookie) -> Self {
        self.set_cookies.push(cookie);
        self
    }
}

/// App state for one container.
#[derive(Debug, Clone)]
pub struct Workload {
    index: i32,
    env: EnvironmentSnapshot,
}

impl Workload {
    pub fn new(index: i32, env: EnvironmentSnapshot) -> Self {
        Self { index, env }
    }

    pub fn env(&self) -> &EnvironmentSnapshot {
        &self.env
    }

    /// Serve `request` on container port `port`. `None` means nothing
    /// listens there.
    pub fn handle(&self, port: u32, request: &WorkloadRequest) -> Option<WorkloadResponse> {
        match port {
            PRIMARY_PORT => Some(self.primary(request)),
            SIDE_CHANNEL_PORT => Some(WorkloadResponse::ok(SIDE_CHANNEL_BODY)),
            _ => None,
        }
    }

    fn primary(&self, request: &WorkloadRequest) -> WorkloadResponse {
        match request.path.as_str() {
            "/" => WorkloadResponse::ok(format!("{BANNER}: grace instance {}", self.index)),
            "/env" if request.query_param("json") == Some("true") => {
                match serde_json::to_string(&self.env) {
                    Ok(body) => WorkloadResponse::ok(body),
                    Err(e) => WorkloadResponse {
                        status: 500,
                        body: e.to_string(),
                        set_cookies: Vec::new(),
                    },
                }
            }
            "/env" => {
                let mut body = format!("{BANNER}\n");
                for (key, value) in self.env.iter() {
                    body.push_str(&format!("{key}={value}\n"));
                }
                WorkloadResponse::ok(body)
            }
            "/index" => WorkloadResponse::ok(self.index.to_string()),
            "/stick" => WorkloadResponse::ok("stuck")
                .with_cookie(SetCookie::new(SESSION_COOKIE, format!("session-{}", self.index))),
            "/unstick" => WorkloadResponse::ok("unstuck").with_cookie(SetCookie::expire(SESSION_COOKIE)),
            _ => WorkloadResponse::not_found(),
        }
    }
}
