//! Readiness lines a managed PT prints on stdout while it starts.

use crate::error::{PtError, Result};
use crate::process::types::{FailedTransport, LiveTransport};
use tracing::{debug, error, info, warn};

/// Managed transport protocol version this crate speaks
pub const PROTOCOL_VERSION: &str = "1";

/// One line of PT stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtMessage {
    Version(String),
    VersionError(String),
    EnvError(String),
    SMethod {
        name: String,
        address: String,
        args: Option<String>,
    },
    SMethodError {
        name: String,
        message: String,
    },
    SMethodsDone,
    Log(String),
    Status(String),
    Unknown(String),
}

impl PtMessage {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        let (keyword, args) = line.split_once(' ').unwrap_or((line, ""));

        match keyword {
            "VERSION" => PtMessage::Version(args.to_string()),
            "VERSION-ERROR" => PtMessage::VersionError(args.to_string()),
            "ENV-ERROR" => PtMessage::EnvError(args.to_string()),
            "SMETHOD" => {
                let mut parts = args.splitn(3, ' ');
                match (parts.next(), parts.next()) {
                    (Some(name), Some(address)) if !name.is_empty() && !address.is_empty() => {
                        PtMessage::SMethod {
                            name: name.to_string(),
                            address: address.to_string(),
                            args: parts.next().map(str::to_string),
                        }
                    }
                    _ => PtMessage::Unknown(line.to_string()),
                }
            }
            "SMETHOD-ERROR" if !args.is_empty() => {
                let (name, message) = args.split_once(' ').unwrap_or((args, ""));
                PtMessage::SMethodError {
                    name: name.to_string(),
                    message: message.to_string(),
                }
            }
            "SMETHODS" if args == "DONE" => PtMessage::SMethodsDone,
            "LOG" => PtMessage::Log(args.to_string()),
            "STATUS" => PtMessage::Status(args.to_string()),
            _ => PtMessage::Unknown(line.to_string()),
        }
    }
}

/// Collects the PT's answers for each requested transport
#[derive(Debug, Clone)]
pub struct Handshake {
    requested: Vec<String>,
    live: Vec<LiveTransport>,
    failed: Vec<FailedTransport>,
    done: bool,
}

impl Handshake {
    pub fn new<I, S>(requested: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requested: requested.into_iter().map(Into::into).collect(),
            live: Vec::new(),
            failed: Vec::new(),
            done: false,
        }
    }

    /// Feed one stdout line
    ///
    /// # Returns
    /// * `Ok(true)` - `SMETHODS DONE` was received
    /// * `Ok(false)` - More lines are expected
    /// * `Err(PtError::HandshakeError)` - The PT rejected its environment or
    ///   protocol version
    pub fn handle_line(&mut self, line: &str) -> Result<bool> {
        debug!("PT stdout: {}", line);

        match PtMessage::parse(line) {
            PtMessage::Version(version) => {
                if version == PROTOCOL_VERSION {
                    debug!("PT using protocol version {}", version);
                } else {
                    warn!("PT announced unexpected protocol version {}", version);
                }
            }
            PtMessage::VersionError(message) => {
                error!("PT protocol version error: {}", message);
                return Err(PtError::HandshakeError(format!(
                    "VERSION-ERROR {}",
                    message
                )));
            }
            PtMessage::EnvError(message) => {
                error!("PT environment variable error: {}", message);
                return Err(PtError::HandshakeError(format!("ENV-ERROR {}", message)));
            }
            PtMessage::SMethod {
                name,
                address,
                args,
            } => {
                if !self.is_requested(&name) {
                    warn!("PT reported transport '{}' that was never requested", name);
                } else if self.is_answered(&name) {
                    warn!("PT reported transport '{}' more than once", name);
                } else {
                    info!("PT server transport '{}' listening on {}", name, address);
                    self.live.push(LiveTransport {
                        name,
                        address,
                        args,
                    });
                }
            }
            PtMessage::SMethodError { name, message } => {
                warn!("PT server transport '{}' error: {}", name, message);
                if self.is_requested(&name) && !self.is_answered(&name) {
                    self.failed.push(FailedTransport { name, message });
                }
            }
            PtMessage::SMethodsDone => {
                info!("PT server initialization complete");
                self.done = true;
            }
            PtMessage::Log(message) => info!("PT log: {}", message),
            PtMessage::Status(message) => info!("PT status: {}", message),
            PtMessage::Unknown(line) => {
                warn!("Unexpected PT stdout communication: {}", line);
            }
        }

        Ok(self.done)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Requested transports the PT never answered for
    pub fn ignored(&self) -> Vec<&str> {
        self.requested
            .iter()
            .filter(|name| !self.is_answered(name))
            .map(String::as_str)
            .collect()
    }

    pub fn live(&self) -> &[LiveTransport] {
        &self.live
    }

    pub fn failed(&self) -> &[FailedTransport] {
        &self.failed
    }

    pub fn into_parts(self) -> (Vec<LiveTransport>, Vec<FailedTransport>) {
        (self.live, self.failed)
    }

    fn is_requested(&self, name: &str) -> bool {
        self.requested.iter().any(|r| r == name)
    }

    fn is_answered(&self, name: &str) -> bool {
        self.live.iter().any(|t| t.name == name) || self.failed.iter().any(|t| t.name == name)
    }
}
