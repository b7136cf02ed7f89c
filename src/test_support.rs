//! Test doubles: a minimal HTTP/1.1 server standing in for the download host
//! and the catalog, and a resolver that points items at it.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::backup::item::{MediaItem, ResolvedUrl};
use crate::backup::resolver::{ResolveError, UrlResolver};

/// How the server answers a given request target.
#[derive(Debug, Clone)]
pub enum Route {
    Body(Vec<u8>),
    Json(String),
    Status(u16),
    /// Answer `status` for the first `times` requests, then serve `body`.
    FailFirst {
        status: u16,
        times: usize,
        body: Vec<u8>,
    },
    /// Wait `delay` before sending the body.
    Slow { body: Vec<u8>, delay: Duration },
    /// Announce `announced` bytes, send `body`, close.
    Truncated { announced: usize, body: Vec<u8> },
    /// Send headers and `body` (announcing more), then hang.
    Stall(Vec<u8>),
}

#[derive(Default)]
struct ServerState {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
    requests: Vec<String>,
}

/// Serves routes from a background thread until the process exits. Every
/// response carries `Connection: close`, one request per connection.
pub struct TestServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let server = Self {
            port,
            state: Arc::default(),
            active: Arc::default(),
            peak: Arc::default(),
        };
        let state = Arc::clone(&server.state);
        let active = Arc::clone(&server.active);
        let peak = Arc::clone(&server.peak);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&state);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    handle(stream, &state);
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        server
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn route(&self, target: &str, route: Route) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(target.to_string(), route);
    }

    pub fn hits(&self, target: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.lock().unwrap().hits.values().sum()
    }

    /// Raw request heads in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Highest number of requests handled at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn handle(stream: TcpStream, state: &Mutex<ServerState>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });
    let mut head = String::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
        head.push_str(&line);
    }
    let target = head
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let route = {
        let mut state = state.lock().unwrap();
        state.requests.push(head.clone());
        let hit = {
            let hits = state.hits.entry(target.clone()).or_insert(0);
            *hits += 1;
            *hits
        };
        match state.routes.get(&target) {
            Some(Route::FailFirst {
                status,
                times,
                body,
            }) => {
                if hit <= *times {
                    Route::Status(*status)
                } else {
                    Route::Body(body.clone())
                }
            }
            Some(route) => route.clone(),
            None => Route::Status(404),
        }
    };

    let mut stream = stream;
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    match route {
        Route::Body(body) => respond(&mut stream, 200, "application/octet-stream", &body),
        Route::Json(body) => respond(&mut stream, 200, "application/json", body.as_bytes()),
        Route::Status(status) => respond(&mut stream, status, "text/plain", b""),
        Route::FailFirst { .. } => unreachable!("resolved above"),
        Route::Slow { body, delay } => {
            thread::sleep(delay);
            respond(&mut stream, 200, "application/octet-stream", &body);
        }
        Route::Truncated { announced, body } => {
            let _ = write_head(&mut stream, 200, "application/octet-stream", announced);
            let _ = stream.write_all(&body);
        }
        Route::Stall(body) => {
            let _ = write_head(&mut stream, 200, "application/octet-stream", body.len() + 1024);
            let _ = stream.write_all(&body);
            let _ = stream.flush();
            let until = Instant::now() + Duration::from_secs(10);
            while Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn write_head(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    len: usize,
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, content_type, len
    );
    stream.write_all(head.as_bytes())
}

fn respond(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) {
    let _ = write_head(stream, status, content_type, body.len());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

/// Resolves every item to `<base>/media/<id>` and counts calls per id.
pub struct StaticResolver {
    base: String,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, ResolveError>>,
}

impl StaticResolver {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            calls: Mutex::default(),
            failures: Mutex::default(),
        }
    }

    /// Make every resolution of `id` fail with `error`.
    pub fn fail(&self, id: &str, error: ResolveError) {
        self.failures.lock().unwrap().insert(id.to_string(), error);
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl UrlResolver for StaticResolver {
    async fn resolve(&self, item: &MediaItem) -> Result<ResolvedUrl, ResolveError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(item.id.clone())
            .or_insert(0) += 1;
        if let Some(error) = self.failures.lock().unwrap().get(&item.id) {
            return Err(error.clone());
        }
        Ok(ResolvedUrl::new(
            format!("{}/media/{}", self.base, item.id),
            Instant::now(),
        ))
    }
}
