//! Errors raised by a session and its transfers.
//!
//! Every failure is an [`FtpError`] value; nothing in the crate unwinds.
//! Timeouts and interrupts are ordinary errors too, and the outer command
//! loop recognises them with [`FtpError::is_restart`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    /// Human readable text; the server's reply text when there was one.
    pub message: String,
    /// Reply code behind the failure.
    pub code: Option<u16>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    // control connection
    ConnectionFailed,
    NoControlConnection,
    /// Connection dropped by the peer or a write failed.
    Disconnected,
    Timeout,
    /// An interrupt escalated.
    Cancelled,

    // refused by the server
    AuthFailed,
    /// 4xx
    Transient,
    /// 5xx, when nothing more specific fits.
    ServerError,
    PermissionDenied,
    /// Missing remote file, or a glob that matched nothing.
    NotFound,
    /// Server or session lacks the capability (e.g. `SITE CHMOD`, FxP on IPv6).
    Unsupported,
    /// A 1xx/2xx/3xx reply where another class was required.
    UnexpectedReply,

    // transfers
    DataChannelFailed,
    TransferFailed,
    /// Reply, PASV address or listing that could not be parsed.
    ProtocolError,
    /// Local file I/O.
    IoError,

    // caller mistakes
    SessionNotFound,
    InvalidConfig,
}

pub type FtpResult<T> = Result<T, FtpError>;

macro_rules! kind_constructors {
    ($($name:ident => $kind:ident),* $(,)?) => {
        $(
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(FtpErrorKind::$kind, message)
            }
        )*
    };
}

impl FtpError {
    pub fn new(kind: FtpErrorKind, message: impl Into<String>) -> Self {
        FtpError {
            kind,
            message: message.into(),
            code: None,
            session_id: None,
        }
    }

    kind_constructors! {
        connection_failed => ConnectionFailed,
        disconnected => Disconnected,
        timeout => Timeout,
        cancelled => Cancelled,
        auth_failed => AuthFailed,
        not_found => NotFound,
        unsupported => Unsupported,
        data_channel => DataChannelFailed,
        transfer_failed => TransferFailed,
        protocol_error => ProtocolError,
        io_error => IoError,
        invalid_config => InvalidConfig,
    }

    pub fn no_control_connection() -> Self {
        Self::new(FtpErrorKind::NoControlConnection, "No control connection")
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            FtpErrorKind::SessionNotFound,
            format!("No open session with id {}", id),
        )
        .with_session(id)
    }

    pub fn with_code(self, code: u16) -> Self {
        FtpError {
            code: Some(code),
            ..self
        }
    }

    pub fn with_session(self, id: impl Into<String>) -> Self {
        FtpError {
            session_id: Some(id.into()),
            ..self
        }
    }

    /// Turn a refused reply into an error. The reply class picks the broad
    /// kind; 530-ish and 550-ish texts are refined further.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code / 100 {
            4 if code == 425 || code == 426 => FtpErrorKind::DataChannelFailed,
            4 => FtpErrorKind::Transient,
            5 if code == 530 || code == 532 => FtpErrorKind::AuthFailed,
            5 if code == 550 || code == 553 => refine_unavailable(text),
            5 => FtpErrorKind::ServerError,
            _ => FtpErrorKind::UnexpectedReply,
        };
        Self::new(kind, text).with_code(code)
    }

    /// Errors the outer command loop answers with a restart: the session
    /// may be gone but the program carries on.
    pub fn is_restart(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::Timeout | FtpErrorKind::Cancelled | FtpErrorKind::Disconnected
        )
    }

    /// Restart errors, plus a session that was never connected. Lookups
    /// that tolerate server refusals still fail on these.
    pub fn is_fatal(&self) -> bool {
        self.is_restart() || self.kind == FtpErrorKind::NoControlConnection
    }

    /// 4xx replies, including a 421 that could not be recovered from.
    pub fn is_transient(&self) -> bool {
        self.kind == FtpErrorKind::Transient || self.code.map_or(false, |c| c / 100 == 4)
    }
}

fn refine_unavailable(text: &str) -> FtpErrorKind {
    let lower = text.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") {
        FtpErrorKind::PermissionDenied
    } else if lower.contains("no such") || lower.contains("not found") {
        FtpErrorKind::NotFound
    } else {
        FtpErrorKind::ServerError
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[FTP {:?}", self.kind)?;
        if let Some(code) = self.code {
            write!(f, " {}", code)?;
        }
        write!(f, "] {}", self.message)
    }
}

impl std::error::Error for FtpError {}

impl From<io::Error> for FtpError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::disconnected(e.to_string()),
            _ => Self::io_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_reply_codes() {
        let kind = |code, text| FtpError::from_reply(code, text).kind;
        assert_eq!(kind(421, "bye"), FtpErrorKind::Transient);
        assert_eq!(kind(426, "aborted"), FtpErrorKind::DataChannelFailed);
        assert_eq!(kind(530, "Login incorrect"), FtpErrorKind::AuthFailed);
        assert_eq!(kind(550, "x: No such file or directory"), FtpErrorKind::NotFound);
        assert_eq!(kind(550, "Permission denied"), FtpErrorKind::PermissionDenied);
        assert_eq!(kind(553, "Could not create file"), FtpErrorKind::ServerError);
        assert_eq!(kind(502, "not implemented"), FtpErrorKind::ServerError);
        assert_eq!(kind(150, "Opening"), FtpErrorKind::UnexpectedReply);
    }

    #[test]
    fn display_includes_code() {
        let e = FtpError::from_reply(451, "Local error");
        assert_eq!(e.to_string(), "[FTP Transient 451] Local error");
        assert!(e.is_transient());
        assert_eq!(
            FtpError::no_control_connection().to_string(),
            "[FTP NoControlConnection] No control connection"
        );
    }

    #[test]
    fn io_errors() {
        let e: FtpError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(e.kind, FtpErrorKind::Timeout);
        assert!(e.is_restart());

        let e: FtpError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(e.kind, FtpErrorKind::Disconnected);

        let e: FtpError = io::Error::new(io::ErrorKind::PermissionDenied, "ro").into();
        assert_eq!(e.kind, FtpErrorKind::IoError);
        assert!(!e.is_fatal());
    }
}
