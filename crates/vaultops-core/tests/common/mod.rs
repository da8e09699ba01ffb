//! Shared fixtures for engine scenario tests: an in-memory state store
//! and a minimal HTTP target that records every request it serves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use vaultops_core::store::{StateStore, StoreError};

/// In-memory [`StateStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().expect("store lock").get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .lock()
            .expect("store lock")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().expect("store lock").remove(key);
        Ok(())
    }
}

/// One request the mock target served.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }
}

/// A canned response keyed by `(method, path)`.
type Routes = HashMap<(String, String), (u16, String)>;

/// Minimal HTTP/1.1 server backing the engine tests. Requests are served
/// one at a time, matching the engine's sequential apply.
pub struct MockTarget {
    endpoint: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    routes: Arc<Mutex<Routes>>,
}

impl MockTarget {
    /// Binds on an ephemeral localhost port and starts serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock target");
        let endpoint = format!("http://{}", listener.local_addr().expect("local addr"));
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let routes: Arc<Mutex<Routes>> = Arc::default();

        let task_requests = Arc::clone(&requests);
        let task_routes = Arc::clone(&routes);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                serve_connection(socket, &task_requests, &task_routes).await;
            }
        });

        Self {
            endpoint,
            requests,
            routes,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Registers a canned response; unrouted requests get 204.
    pub fn route(&self, method: &str, path: &str, status: u16, body: &str) {
        self.routes.lock().expect("routes lock").insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().expect("requests lock").clear();
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    requests: &Arc<Mutex<Vec<RecordedRequest>>>,
    routes: &Arc<Mutex<Routes>>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };

    let canned = routes
        .lock()
        .expect("routes lock")
        .get(&(request.method.clone(), request.path.clone()))
        .cloned();
    requests.lock().expect("requests lock").push(request);

    let (status, body) = canned.unwrap_or((204, String::new()));
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}",
        reason(status),
        body.len(),
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
