//! # ftpkit-core
//!
//! Transfer core of an interactive FTP client:
//!   • Reply reading and command dispatch with one-shot reconnect on 421
//!   • Passive / active data channels (PASV, EPSV, PORT, EPRT)
//!   • ASCII and binary transfers with restart, abort and progress hooks
//!   • LIST parsing for Unix, DOS, EPLF and MLSD output
//!   • A remote directory cache with deferred invalidation
//!   • Remote wildcard expansion
//!   • Reply deadlines and escalating interrupt handling
//!   • Server-to-server (FxP) copies

pub mod ftp;

pub use ftp::*;
