use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("could not connect to game bridge at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("game bridge i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("game bridge closed the connection without replying")]
    Closed,
    #[error("game rejected command: {0}")]
    Rejected(String),
}

/// Capability to run one command against the game.
///
/// Implementations may be slow or hang; the runtime bounds every call with a
/// timeout and drops the future when it expires.
#[async_trait]
pub trait GameCommandAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, command: &str) -> Result<String, AdapterError>;

    /// Called after an attempt for `command` was abandoned on timeout.
    fn cancel(&self, _command: &str) {}
}

/// Adapter that reports the command back without touching a game.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAdapter;

#[async_trait]
impl GameCommandAdapter for EchoAdapter {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, command: &str) -> Result<String, AdapterError> {
        Ok(format!("executed: {command}"))
    }
}

/// Line-oriented TCP bridge to a running game.
///
/// Each command opens a connection, sends one newline-terminated line and
/// reads one line back. A reply starting with `ERR ` is a rejection.
#[derive(Debug, Clone)]
pub struct TcpGameAdapter {
    endpoint: String,
    command_prefix: String,
    connect_timeout: Duration,
}

impl TcpGameAdapter {
    pub fn new(endpoint: impl Into<String>, command_prefix: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            command_prefix: command_prefix.into(),
            connect_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn prefixed(&self, command: &str) -> String {
        let command = command.trim();
        if self.command_prefix.is_empty() || command.starts_with(&self.command_prefix) {
            command.to_string()
        } else {
            format!("{}{}", self.command_prefix, command)
        }
    }

    async fn connect(&self) -> Result<TcpStream, AdapterError> {
        let connect_err = |source| AdapterError::Connect {
            endpoint: self.endpoint.clone(),
            source,
        };
        let connect = TcpStream::connect(self.endpoint.as_str());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(stream) => stream.map_err(connect_err),
            Err(_) => Err(connect_err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))),
        }
    }
}

#[async_trait]
impl GameCommandAdapter for TcpGameAdapter {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn execute(&self, command: &str) -> Result<String, AdapterError> {
        let line = self.prefixed(command);
        let mut stream = self.connect().await?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(
                target: "mc_assist::adapter",
                endpoint = %self.endpoint,
                error = %err,
                "adapter.nodelay_failed"
            );
        }

        let (reader, mut writer) = stream.split();
        writer.write_all(format!("{line}\n").as_bytes()).await?;
        writer.flush().await?;

        let mut reply = String::new();
        let read = BufReader::new(reader).read_line(&mut reply).await?;
        if read == 0 {
            return Err(AdapterError::Closed);
        }
        let reply = reply.trim_end_matches(&['\r', '\n'][..]).to_string();
        debug!(
            target: "mc_assist::adapter",
            endpoint = %self.endpoint,
            command = %line,
            %reply,
            "adapter.reply"
        );
        match reply.strip_prefix("ERR ") {
            Some(reason) => Err(AdapterError::Rejected(reason.to_string())),
            None => Ok(reply),
        }
    }
}
