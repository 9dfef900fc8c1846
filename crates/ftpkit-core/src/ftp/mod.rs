//! FTP client core (RFC 959, with RFC 2428 EPSV/EPRT and RFC 3659 MLSD).
//!
//! Architecture:
//! - `types`: replies, transfer modes, configuration
//! - `error`: FTP-specific error type
//! - `protocol`: control channel reply codec
//! - `connection`: TCP transport, urgent data
//! - `security`: pluggable protection of the control channel
//! - `signals`: deadlines and interrupt escalation
//! - `client`: session state, login, command dispatch
//! - `transfer`: data channel negotiation (PASV/EPSV/PORT/EPRT)
//! - `ascii`: line-ending conversion for ASCII transfers
//! - `file_ops`: download, upload, listing retrieval, abort
//! - `directory`: CWD, MKD, RMD, rename, SIZE/MDTM, cached listings
//! - `parser`: Unix/DOS/EPLF/MLSD listing parser
//! - `remote`: remote file and directory records
//! - `cache`: directory cache with pending flushes
//! - `path`: remote path arithmetic
//! - `remote_glob`: wildcard expansion against listings
//! - `fxp`: server-to-server copy
//! - `pool`: open sessions and the current one

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod security;
pub mod signals;
pub mod client;
pub mod transfer;
pub mod ascii;
pub mod file_ops;
pub mod directory;
pub mod parser;
pub mod remote;
pub mod cache;
pub mod path;
pub mod remote_glob;
pub mod fxp;
pub mod pool;

pub use types::*;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use client::FtpSession;
pub use cache::DirectoryCache;
pub use parser::{parse_entry, parse_listing, ListingDialect, ParsedEntry};
pub use remote::{RemoteDirectory, RemoteFile};
pub use remote_glob::{contains_wildcards, exclude_dotdirs};
pub use signals::{
    spawn_signal_listener, with_deadline, Escalation, InterruptHandle, InterruptPolicy,
};
pub use security::{ClearMechanism, ProtectionLevel, SecurityMechanism};
pub use transfer::DataChannel;
pub use file_ops::ProgressHook;
pub use fxp::fxp_file;
pub use pool::FtpPool;
