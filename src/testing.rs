//! In-process lock server for tests
//!
//! Speaks both wire encodings, keeps a lock table with per-connection
//! ownership and answers contended acquires the way the real server does:
//! `LOCKPENDING` first, then `LOCKED` or `ACQUIRETIMEOUT`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::protocol::{
    line_reader, read_line, write_line, CodecKind, LineReader, LockMode, Response, Status,
    GREETING,
};

/// Knobs for misbehaving servers
#[derive(Debug, Clone)]
pub(crate) struct FakeServerOptions {
    pub codec: CodecKind,
    pub greeting: String,
    /// Answer the first WISDOM with a line longer than any client accepts
    pub oversized_wisdom: bool,
    /// Follow a LOCKPENDING with a second LOCKPENDING
    pub double_pending: bool,
}

impl Default for FakeServerOptions {
    fn default() -> Self {
        Self {
            codec: CodecKind::Text,
            greeting: GREETING.to_string(),
            oversized_wisdom: false,
            double_pending: false,
        }
    }
}

pub(crate) const WISDOM: &str = "A lock unasked for is a lock never granted";

#[derive(Debug, Clone)]
struct Held {
    lock_id: String,
    owner: u64,
    mode: LockMode,
}

#[derive(Default)]
struct LockTable {
    held: Vec<Held>,
}

impl LockTable {
    fn try_grant(&mut self, lock_id: &str, owner: u64, mode: LockMode) -> bool {
        if self.holds(lock_id, owner) {
            return true;
        }

        let conflict = self.held.iter().any(|h| {
            h.lock_id == lock_id
                && h.owner != owner
                && (h.mode == LockMode::Write || mode == LockMode::Write)
        });
        if conflict {
            return false;
        }

        self.held.push(Held { lock_id: lock_id.to_string(), owner, mode });
        true
    }

    fn release(&mut self, lock_id: &str, owner: u64) -> bool {
        let before = self.held.len();
        self.held.retain(|h| !(h.lock_id == lock_id && h.owner == owner));
        self.held.len() != before
    }

    fn release_all(&mut self, owner: u64) -> Vec<String> {
        let released = self
            .held
            .iter()
            .filter(|h| h.owner == owner)
            .map(|h| h.lock_id.clone())
            .collect();
        self.held.retain(|h| h.owner != owner);
        released
    }

    fn holds(&self, lock_id: &str, owner: u64) -> bool {
        self.held.iter().any(|h| h.lock_id == lock_id && h.owner == owner)
    }

    fn show(&self) -> Vec<String> {
        self.held.iter().map(|h| h.lock_id.clone()).collect()
    }
}

struct Shared {
    options: FakeServerOptions,
    table: Mutex<LockTable>,
    next_owner: AtomicU64,
    oversize_pending: AtomicBool,
}

/// Running fake server; stops accepting when dropped
pub(crate) struct FakeServer {
    pub address: SocketAddr,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::with_options(FakeServerOptions::default()).await
    }

    pub async fn with_options(options: FakeServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            oversize_pending: AtomicBool::new(options.oversized_wisdom),
            options,
            table: Mutex::new(LockTable::default()),
            next_owner: AtomicU64::new(1),
        });

        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let owner = shared.next_owner.fetch_add(1, Ordering::Relaxed);
                    let _ = serve(socket, owner, &shared).await;
                    shared.table.lock().await.release_all(owner);
                });
            }
        });

        Self { address, handle }
    }

    pub fn host(&self) -> String {
        self.address.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One accepted connection of a `ScriptedServer`, already greeted
pub(crate) struct ScriptedPeer {
    reader: LineReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ScriptedPeer {
    /// Next line from the client
    pub async fn expect(&mut self) -> crate::Result<String> {
        read_line(&mut self.reader).await
    }

    /// Send raw bytes, terminator included
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await
    }

    pub async fn send(&mut self, line: &str) -> crate::Result<()> {
        write_line(&mut self.writer, line).await
    }

    /// Read and ignore everything until the client hangs up
    pub async fn idle(&mut self) {
        while self.expect().await.is_ok() {}
    }
}

/// Server that greets one client and then follows a fixed script
pub(crate) struct ScriptedServer {
    pub address: SocketAddr,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start<F, Fut>(script: F) -> Self
    where
        F: FnOnce(ScriptedPeer) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let (read, mut writer) = socket.into_split();
            if write_line(&mut writer, GREETING).await.is_err() {
                return;
            }
            script(ScriptedPeer {
                reader: line_reader(read, 64 * 1024),
                writer,
            })
            .await;
        });

        Self { address, handle }
    }

    pub fn host(&self) -> String {
        self.address.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

enum Request {
    Wisdom,
    Show,
    Acquire {
        lock_id: String,
        timeout: Option<u64>,
        mode: LockMode,
    },
    Release {
        lock_id: String,
    },
    ReleaseAll,
    Quit,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRequest {
    command: String,
    lock_id: Option<String>,
    timeout: Option<u64>,
    mode: Option<LockMode>,
}

fn parse_request(codec: CodecKind, line: &str) -> Option<Request> {
    let (verb, lock_id, timeout, mode) = match codec {
        CodecKind::Text => {
            let mut tokens = line.split_whitespace();
            let verb = tokens.next()?.to_string();
            let lock_id = tokens.next().map(str::to_string);
            let timeout = tokens.next().and_then(|t| t.parse().ok());
            let mode = tokens.next().and_then(|m| m.parse().ok());
            (verb, lock_id, timeout, mode)
        }
        CodecKind::Json => {
            let req: JsonRequest = serde_json::from_str(line).ok()?;
            (req.command, req.lock_id, req.timeout, req.mode)
        }
    };

    let request = match verb.as_str() {
        "WISDOM" => Request::Wisdom,
        "SHOW" => Request::Show,
        "ACQUIRE" => Request::Acquire {
            lock_id: lock_id?,
            timeout,
            mode: mode.unwrap_or_default(),
        },
        "RELEASE" => Request::Release { lock_id: lock_id? },
        "RELEASEALL" => Request::ReleaseAll,
        "QUIT" => Request::Quit,
        _ => return None,
    };
    Some(request)
}

fn status_line(codec: CodecKind, status: Status, lock_id: Option<&str>) -> String {
    match codec {
        CodecKind::Text => match lock_id {
            Some(id) => format!("{} {}", status, id),
            None => status.to_string(),
        },
        CodecKind::Json => serde_json::to_string(&Response::with_status(
            status,
            lock_id.map(str::to_string),
        ))
        .unwrap(),
    }
}

async fn serve(socket: TcpStream, owner: u64, shared: &Shared) -> std::io::Result<()> {
    let codec = shared.options.codec;
    let (read, mut write) = socket.into_split();
    let mut reader = line_reader(read, 64 * 1024);

    write
        .write_all(format!("{}\n", shared.options.greeting).as_bytes())
        .await?;

    loop {
        let line = match read_line(&mut reader).await {
            Ok(line) => line,
            Err(_) => return Ok(()),
        };
        let Some(request) = parse_request(codec, &line) else {
            write.write_all(b"ERROR\n").await?;
            continue;
        };

        let out = match request {
            Request::Wisdom => {
                let quote = if shared.oversize_pending.swap(false, Ordering::SeqCst) {
                    "z".repeat(2048)
                } else {
                    WISDOM.to_string()
                };
                match codec {
                    CodecKind::Text => quote,
                    CodecKind::Json => serde_json::json!({ "quote": quote }).to_string(),
                }
            }
            Request::Show => {
                let locks = shared.table.lock().await.show();
                match codec {
                    CodecKind::Text => locks.join(" "),
                    CodecKind::Json => serde_json::json!({ "locks": locks }).to_string(),
                }
            }
            Request::Acquire { lock_id, timeout, mode } => {
                if shared.table.lock().await.try_grant(&lock_id, owner, mode) {
                    status_line(codec, Status::Locked, Some(&lock_id))
                } else if let Some(timeout) = timeout {
                    let pending = status_line(codec, Status::LockPending, Some(&lock_id));
                    write.write_all(format!("{}\n", pending).as_bytes()).await?;
                    if shared.options.double_pending {
                        pending
                    } else {
                        wait_for_lock(shared, &lock_id, owner, mode, timeout).await;
                        let granted = shared.table.lock().await.holds(&lock_id, owner);
                        let status = if granted { Status::Locked } else { Status::AcquireTimeout };
                        status_line(codec, status, Some(&lock_id))
                    }
                } else {
                    status_line(codec, Status::AcquireTimeout, Some(&lock_id))
                }
            }
            Request::Release { lock_id } => {
                let status = if shared.table.lock().await.release(&lock_id, owner) {
                    Status::Released
                } else {
                    Status::NoLockToRelease
                };
                status_line(codec, status, Some(&lock_id))
            }
            Request::ReleaseAll => {
                let released = shared.table.lock().await.release_all(owner);
                if released.is_empty() {
                    status_line(codec, Status::NoLocksToReleaseAll, None)
                } else {
                    released
                        .iter()
                        .map(|id| status_line(codec, Status::Released, Some(id)))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Request::Quit => {
                let bye = status_line(codec, Status::Bye, None);
                write.write_all(format!("{}\n", bye).as_bytes()).await?;
                return Ok(());
            }
        };

        write.write_all(format!("{}\n", out).as_bytes()).await?;
    }
}

async fn wait_for_lock(
    shared: &Shared,
    lock_id: &str,
    owner: u64,
    mode: LockMode,
    timeout_ms: u64,
) {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if shared.table.lock().await.try_grant(lock_id, owner, mode) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
