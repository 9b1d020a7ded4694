//! Local control socket
//!
//! One request line per connection, one JSON reply line back. The socket name
//! is derived from the lock id, so a second process for the same lock finds
//! it already bound.

use crate::config::app_id;
use crate::controller::{AccessController, StatusReport};
use crate::rfid::ScanOutcome;
use interprocess::local_socket::tokio::Stream as AsyncStream;
use interprocess::local_socket::traits::tokio::Listener;
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, Name, ToNsName};
use log::{debug, info, warn};
use serde::Serialize;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Trigger,
    Status,
    Lock,
    Unlock(Option<Duration>),
    Reload,
    /// Inject a card id as if read by the RFID reader.
    Scan(String),
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".into());
        };
        let arg = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments for {:?}", verb));
        }

        let command = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("trigger", None) => ControlCommand::Trigger,
            ("status", None) => ControlCommand::Status,
            ("lock", None) => ControlCommand::Lock,
            ("reload", None) => ControlCommand::Reload,
            ("unlock", None) => ControlCommand::Unlock(None),
            ("unlock", Some(secs)) => {
                let value: f64 = secs
                    .parse()
                    .map_err(|_| format!("invalid unlock duration {:?}", secs))?;
                match Duration::try_from_secs_f64(value) {
                    Ok(duration) if !duration.is_zero() => ControlCommand::Unlock(Some(duration)),
                    _ => return Err(format!("unlock duration out of range: {:?}", secs)),
                }
            }
            ("scan", Some(card)) => ControlCommand::Scan(card.to_string()),
            (verb, _) => return Err(format!("unknown command {:?}", verb)),
        };
        Ok(command)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    Ok { message: String },
    Status(StatusReport),
    Error { message: String },
}

impl Reply {
    fn ok(message: impl Into<String>) -> Self {
        Reply::Ok {
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }
}

pub fn socket_name(lock_id: &str) -> io::Result<Name<'static>> {
    app_id(lock_id).to_ns_name::<GenericNamespaced>()
}

/// Execute one command against the controller.
pub fn execute(controller: &Arc<AccessController>, command: ControlCommand) -> Reply {
    match command {
        ControlCommand::Trigger => {
            let decision = controller.trigger();
            if decision.is_accepted() {
                Reply::ok("authentication started")
            } else {
                Reply::error(decision.to_string())
            }
        }
        ControlCommand::Status => Reply::Status(controller.status()),
        ControlCommand::Lock => {
            if controller.force_lock() {
                Reply::ok("locked")
            } else {
                Reply::error("lock command failed")
            }
        }
        ControlCommand::Unlock(duration) => {
            if controller.force_unlock(duration) {
                Reply::ok("unlocked")
            } else {
                Reply::error("unlock command failed")
            }
        }
        ControlCommand::Reload => match controller.reload_credentials() {
            Ok(()) => Reply::ok("credentials reloaded"),
            Err(e) => Reply::error(e.to_string()),
        },
        ControlCommand::Scan(card) => match controller.arbiter().submit(&card) {
            ScanOutcome::Accepted { label } => Reply::ok(format!("card accepted: {}", label)),
            ScanOutcome::Unauthorized => Reply::error("card not authorized"),
            ScanOutcome::NotAllowed => Reply::error("no RFID window open"),
        },
    }
}

/// Serve the control socket until cancelled. Fails if the name is taken.
pub async fn serve(controller: Arc<AccessController>, cancel: CancellationToken) -> io::Result<()> {
    let name = socket_name(controller.lock_id())?;
    let listener = ListenerOptions::new().name(name).create_tokio()?;
    info!("Control socket ready for {}", app_id(controller.lock_id()));

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Control socket accept failed: {}", e);
                    continue;
                }
            }
        };

        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(&controller, stream).await {
                debug!("Control connection closed: {}", e);
            }
        });
    }
    Ok(())
}

async fn handle_connection(controller: &Arc<AccessController>, stream: AsyncStream) -> io::Result<()> {
    let mut reader = tokio::io::BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        // instance check from a second process
        return Ok(());
    }

    let reply = match ControlCommand::parse(&line) {
        Ok(command) => {
            info!("Control command: {:?}", command);
            execute(controller, command)
        }
        Err(e) => Reply::error(e),
    };

    let mut out = serde_json::to_string(&reply).map_err(io::Error::other)?;
    out.push('\n');
    let stream = reader.get_mut();
    stream.write_all(out.as_bytes()).await?;
    stream.flush().await
}

/// Send one command to a running instance and return its reply line.
pub fn send(lock_id: &str, command: &str) -> io::Result<String> {
    use interprocess::local_socket::traits::Stream as _;

    let mut stream = interprocess::local_socket::Stream::connect(socket_name(lock_id)?)?;
    stream.write_all(command.trim().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    Ok(reply.trim_end().to_string())
}
