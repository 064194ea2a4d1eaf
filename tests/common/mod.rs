//! Shared utilities for integration tests.

#![allow(dead_code)]

use admission_gate::config::GateConfig;
use admission_gate::{Components, GateServer};
use admission_gate::authn::builder::CredentialStores;
use axum::Router;
use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One request seen by a mock webhook.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub body: String,
}

/// Requests a mock webhook has received, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Recorded>>>);

impl Journal {
    pub fn all(&self) -> Vec<Recorded> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.all().iter().filter(|r| r.path == path).count()
    }
}

/// Start a programmable mock webhook on an ephemeral port. The handler gets
/// the request path and body and returns `(status, json body)`.
pub async fn start_programmable_webhook<F, Fut>(f: F) -> (SocketAddr, Journal)
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let journal = Journal::default();
    let f = Arc::new(f);

    let recorded = journal.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let _ = serve_one(socket, f, recorded).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    (addr, journal)
}

async fn serve_one<F, Fut>(mut socket: TcpStream, f: Arc<F>, journal: Journal) -> std::io::Result<()>
where
    F: Fn(String, String) -> Fut,
    Fut: Future<Output = (u16, String)>,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    journal.0.lock().unwrap().push(Recorded {
        path: path.clone(),
        body: body.clone(),
    });

    let (status, reply) = f(path, body).await;
    let status_text = match status {
        200 => "200 OK",
        401 => "401 Unauthorized",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_text,
        reply.len(),
        reply
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// Write a descriptor pointing at `url` into `dir`.
pub fn write_descriptor(dir: &Path, name: &str, url: &str) -> PathBuf {
    let path = dir.join(format!("{name}.yaml"));
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        "clusters:\n  - name: mock\n    cluster:\n      server: {url}\n\
         users:\n  - name: gate\n    user: {{}}\n\
         contexts:\n  - name: webhook\n    context:\n      cluster: mock\n      user: gate\n\
         current-context: webhook\n"
    )
    .unwrap();
    path
}

/// Write an audit policy recording everything at `level`.
pub fn write_policy(dir: &Path, level: &str) -> PathBuf {
    let path = dir.join("policy.yaml");
    std::fs::write(&path, format!("rules:\n  - level: {level}\n")).unwrap();
    path
}

/// A gate serving on an ephemeral port.
pub struct RunningGate {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    pub handle: JoinHandle<Result<(), admission_gate::ServerError>>,
}

impl RunningGate {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Begin the shutdown cascade.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn start_gate(config: GateConfig, api: Router) -> RunningGate {
    let components = Components::from_config(&config, &CredentialStores::default()).unwrap();
    let server = GateServer::new(&config, components, api);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(listener, async move {
        let _ = rx.await;
    }));
    RunningGate {
        addr,
        stop: Some(tx),
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
