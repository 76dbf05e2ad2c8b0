//! Lock Server Connection
//!
//! One persistent TCP connection to one lock server node. Every public
//! operation holds the transport for its whole request/response exchange,
//! so concurrent callers on the same connection never see each other's replies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::{ClientConfig, NodeConfig};
use crate::error::{Error, Result};
use crate::listener::ListenerRegistry;
use crate::protocol::{
    line_reader, read_line, try_read_line, write_line, Codec, Command, CommandKind, LineReader,
    LockMode, Response, Status, GREETING, MAX_MESSAGE_BYTES,
};

/// Tunables for a single connection
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// TCP connect plus greeting timeout
    pub connect_timeout: Duration,
    /// How long QUIT waits for an acknowledgement
    pub quit_ack_timeout: Duration,
    /// Upper bound on the wait after LOCKPENDING (None = wait for the server)
    pub pending_wait: Option<Duration>,
    /// Expected greeting token
    pub greeting: String,
    /// Inbound message cap
    pub max_message_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            quit_ack_timeout: Duration::from_secs(1),
            pending_wait: None,
            greeting: GREETING.to_string(),
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }
}

impl From<&ClientConfig> for ConnectionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            quit_ack_timeout: config.quit_ack_timeout(),
            pending_wait: config.pending_wait(),
            greeting: config.greeting.clone(),
            max_message_bytes: config.max_message_bytes,
        }
    }
}

/// Established transport
struct Transport {
    reader: LineReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Verb of an exchange that started but never finished
    in_flight: Option<&'static str>,
}

impl Transport {
    async fn send(&mut self, codec: &dyn Codec, command: &Command) -> Result<()> {
        let line = codec.encode(command)?;
        self.in_flight = Some(command.verb());
        write_line(&mut self.writer, &line).await
    }

    async fn receive(&mut self, codec: &dyn Codec, kind: CommandKind) -> Result<Response> {
        let line = read_line(&mut self.reader).await?;
        codec.decode(kind, &line)
    }

    fn try_receive_line(&mut self) -> Option<Result<String>> {
        try_read_line(&mut self.reader)
    }

    fn try_receive(&mut self, codec: &dyn Codec, kind: CommandKind) -> Option<Result<Response>> {
        self.try_receive_line()
            .map(|line| line.and_then(|l| codec.decode(kind, &l)))
    }

    /// Shut down both halves; every step is attempted and failures collected
    async fn close(mut self) -> Vec<String> {
        let mut failures = Vec::new();

        if let Err(e) = self.writer.shutdown().await {
            failures.push(format!("shutdown write side: {}", e));
        }

        let read_half = self.reader.into_inner();
        match read_half.reunite(self.writer) {
            Ok(stream) => drop(stream),
            Err(e) => failures.push(format!("release socket: {}", e)),
        }

        failures
    }
}

/// Connection to one lock server node
pub struct LockConnection {
    host: String,
    port: u16,
    address: String,
    codec: Arc<dyn Codec>,
    settings: ConnectionSettings,
    transport: Mutex<Option<Transport>>,
    connected: AtomicBool,
    listeners: ListenerRegistry,
}

impl LockConnection {
    /// Create a connection; nothing is dialed until `connect`
    pub fn new(
        host: impl Into<String>,
        port: u16,
        codec: Arc<dyn Codec>,
        settings: ConnectionSettings,
    ) -> Self {
        let host = host.into();
        Self {
            address: format!("{}:{}", host, port),
            host,
            port,
            codec,
            settings,
            transport: Mutex::new(None),
            connected: AtomicBool::new(false),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Create a connection from configuration
    pub fn from_config(node: &NodeConfig, client: &ClientConfig) -> Self {
        Self::new(
            node.host.clone(),
            node.port,
            client.codec.build(),
            ConnectionSettings::from(client),
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Observers notified after each resolved acquire
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Open the transport and check the server's greeting
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.transport.lock().await;

        if let Some(old) = guard.take() {
            self.connected.store(false, Ordering::Release);
            for failure in old.close().await {
                tracing::warn!("Closing previous connection to {}: {}", self.address, failure);
            }
        }

        let stream = self.dial().await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = line_reader(read_half, self.settings.max_message_bytes);

        let greeting = match timeout(self.settings.connect_timeout, read_line(&mut reader)).await {
            Ok(Ok(line)) => line,
            Ok(Err(Error::Io(e))) => {
                return Err(Error::ConnectionFailed {
                    address: self.address.clone(),
                    reason: e.to_string(),
                });
            }
            Ok(Err(e)) => {
                return Err(Error::Handshake {
                    address: self.address.clone(),
                    received: e.to_string(),
                });
            }
            Err(_) => return Err(Error::ConnectionTimeout(self.address.clone())),
        };

        if greeting != self.settings.greeting {
            tracing::warn!("Unexpected greeting from {}: {:?}", self.address, greeting);
            return Err(Error::Handshake {
                address: self.address.clone(),
                received: greeting,
            });
        }

        *guard = Some(Transport {
            reader,
            writer: write_half,
            in_flight: None,
        });
        self.connected.store(true, Ordering::Release);

        tracing::info!("Connected to lock server {} ({} codec)", self.address, self.codec.name());
        Ok(())
    }

    /// Local check only; never touches the network
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Say goodbye and close the transport. Always ends disconnected.
    pub async fn quit(&self) -> Result<()> {
        let mut guard = self.transport.lock().await;
        self.connected.store(false, Ordering::Release);

        let Some(mut transport) = guard.take() else {
            return Ok(());
        };

        let mut failures = Vec::new();
        match transport.send(self.codec.as_ref(), &Command::Quit).await {
            Ok(()) => {
                let ack = timeout(
                    self.settings.quit_ack_timeout,
                    transport.receive(self.codec.as_ref(), CommandKind::Quit),
                )
                .await;
                match ack {
                    Ok(Ok(response)) => {
                        tracing::debug!("{} acknowledged quit: {:?}", self.address, response.status)
                    }
                    Ok(Err(e)) => {
                        tracing::debug!("No quit acknowledgement from {}: {}", self.address, e)
                    }
                    Err(_) => {
                        tracing::debug!("Quit acknowledgement from {} timed out", self.address)
                    }
                }
            }
            Err(e) => failures.push(format!("send QUIT: {}", e)),
        }

        failures.extend(transport.close().await);
        tracing::info!("Disconnected from lock server {}", self.address);

        if failures.is_empty() {
            Ok(())
        } else {
            for failure in &failures {
                tracing::warn!("Closing connection to {}: {}", self.address, failure);
            }
            Err(Error::Close(failures))
        }
    }

    /// A quote from the server
    pub async fn wisdom(&self) -> Result<String> {
        let mut guard = self.transport.lock().await;
        let result = self.round_trip(&mut guard, &Command::Wisdom).await;
        let response = self.settle(&mut guard, result)?;

        response
            .quote
            .ok_or_else(|| Error::Protocol("WISDOM reply carried no quote".into()))
    }

    /// Lock ids currently held on this node, in server order
    pub async fn show(&self) -> Result<Vec<String>> {
        let mut guard = self.transport.lock().await;
        let result = self.round_trip(&mut guard, &Command::Show).await;
        Ok(self.settle(&mut guard, result)?.locks)
    }

    /// Acquire a write lock, answered immediately by the server
    pub async fn acquire(&self, lock_id: &str) -> Result<Status> {
        self.acquire_inner(lock_id, None, None).await
    }

    /// Acquire a write lock, letting the server queue us for up to `wait`
    pub async fn acquire_with_timeout(&self, lock_id: &str, wait: Duration) -> Result<Status> {
        self.acquire_inner(lock_id, Some(wait), None).await
    }

    /// Acquire in the given mode, letting the server queue us for up to `wait`
    pub async fn acquire_with_mode(
        &self,
        lock_id: &str,
        wait: Duration,
        mode: LockMode,
    ) -> Result<Status> {
        self.acquire_inner(lock_id, Some(wait), Some(mode)).await
    }

    async fn acquire_inner(
        &self,
        lock_id: &str,
        wait: Option<Duration>,
        mode: Option<LockMode>,
    ) -> Result<Status> {
        let command = Command::Acquire {
            lock_id: lock_id.to_string(),
            timeout: wait,
            mode,
        };

        let mut guard = self.transport.lock().await;
        let result = self.acquire_exchange(&mut guard, &command, lock_id).await;
        let result = self.settle(&mut guard, result);
        drop(guard);

        match &result {
            Ok(status) if status.is_granted() => self.listeners.notify_acquired(lock_id).await,
            Ok(_) | Err(Error::LockTimeout { .. }) => self.listeners.notify_failed(lock_id).await,
            Err(_) => {}
        }
        result
    }

    /// One round trip, plus at most one more read when the server says LOCKPENDING
    async fn acquire_exchange(
        &self,
        slot: &mut Option<Transport>,
        command: &Command,
        lock_id: &str,
    ) -> Result<Status> {
        let first = self.round_trip(slot, command).await?;
        let status = first.require_status()?;
        if !status.is_pending() {
            tracing::debug!("ACQUIRE {} on {}: {}", lock_id, self.address, status);
            return Ok(status.clone());
        }

        tracing::debug!("ACQUIRE {} pending on {}", lock_id, self.address);
        let transport = self.transport_mut(slot)?;
        let resolution = transport.receive(self.codec.as_ref(), CommandKind::Acquire);
        let follow_up = match self.settings.pending_wait {
            Some(limit) => timeout(limit, resolution).await.map_err(|_| {
                Error::Protocol(format!(
                    "no resolution for pending lock {} within {:?}",
                    lock_id, limit
                ))
            })??,
            None => resolution.await?,
        };

        match follow_up.require_status()? {
            Status::AcquireTimeout => Err(Error::LockTimeout {
                lock_id: lock_id.to_string(),
            }),
            // Unresolved upstream: a second pending is treated as desync
            Status::LockPending => Err(Error::Protocol(format!(
                "second LOCKPENDING while waiting for {}",
                lock_id
            ))),
            status => {
                tracing::debug!("ACQUIRE {} on {} resolved: {}", lock_id, self.address, status);
                Ok(status.clone())
            }
        }
    }

    /// Release one lock
    pub async fn release(&self, lock_id: &str) -> Result<Status> {
        let command = Command::Release {
            lock_id: lock_id.to_string(),
        };

        let mut guard = self.transport.lock().await;
        let result = match self.round_trip(&mut guard, &command).await {
            Ok(response) => match response.require_status() {
                Ok(Status::NoLockToRelease) => Err(Error::NoSuchLock {
                    lock_id: lock_id.to_string(),
                }),
                Ok(status) => Ok(status.clone()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.settle(&mut guard, result)
    }

    /// Release everything this connection holds; returns the released ids in arrival order
    pub async fn release_all(&self) -> Result<Vec<String>> {
        let mut guard = self.transport.lock().await;
        let result = self.release_all_exchange(&mut guard).await;
        self.settle(&mut guard, result)
    }

    async fn release_all_exchange(&self, slot: &mut Option<Transport>) -> Result<Vec<String>> {
        let first = self.round_trip(slot, &Command::ReleaseAll).await?;
        if *first.require_status()? == Status::NoLocksToReleaseAll {
            return Ok(Vec::new());
        }

        let mut released = Vec::new();
        collect_released(&mut released, first);

        // Whatever else is already buffered belongs to this reply
        let transport = self.transport_mut(slot)?;
        while let Some(next) = transport.try_receive(self.codec.as_ref(), CommandKind::ReleaseAll) {
            collect_released(&mut released, next?);
        }

        tracing::debug!("RELEASEALL on {} released {} lock(s)", self.address, released.len());
        Ok(released)
    }

    fn transport_mut<'a>(&self, slot: &'a mut Option<Transport>) -> Result<&'a mut Transport> {
        slot.as_mut()
            .ok_or_else(|| Error::NotConnected(self.address.clone()))
    }

    /// Send one command and read its direct reply
    async fn round_trip(
        &self,
        slot: &mut Option<Transport>,
        command: &Command,
    ) -> Result<Response> {
        command.validate()?;

        let transport = self.transport_mut(slot)?;
        if let Some(verb) = transport.in_flight {
            return Err(Error::Protocol(format!(
                "{} was abandoned before its reply arrived",
                verb
            )));
        }

        // Nothing is outstanding, so anything already buffered is a stray reply
        if let Some(stray) = transport.try_receive_line() {
            let line = stray?;
            return Err(Error::Protocol(format!(
                "unsolicited line before {}: {:?}",
                command.verb(),
                line
            )));
        }

        tracing::debug!("{} -> {}", command.verb(), self.address);
        transport.send(self.codec.as_ref(), command).await?;
        transport.receive(self.codec.as_ref(), command.kind()).await
    }

    /// Finish an exchange: desync or I/O failures drop the transport
    fn settle<T>(&self, slot: &mut Option<Transport>, result: Result<T>) -> Result<T> {
        match &result {
            Err(e) if e.requires_reconnect() => {
                tracing::warn!("Dropping connection to {}: {}", self.address, e);
                // Dropping the halves closes the socket
                slot.take();
                self.connected.store(false, Ordering::Release);
            }
            _ => {
                if let Some(transport) = slot.as_mut() {
                    transport.in_flight = None;
                }
            }
        }
        result
    }

    async fn dial(&self) -> Result<TcpStream> {
        let result = timeout(
            self.settings.connect_timeout,
            TcpStream::connect(&self.address),
        )
        .await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(self.address.clone())),
        }
    }
}

fn collect_released(released: &mut Vec<String>, response: Response) {
    released.extend(response.lock_id);
    released.extend(response.locks);
}

impl std::fmt::Debug for LockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockConnection")
            .field("address", &self.address)
            .field("codec", &self.codec.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}
