//! Security mechanism boundary (RFC 2228).
//!
//! Authentication handshakes live outside this crate. What lives here is the
//! narrow contract a mechanism has to satisfy once it is in place, plus the
//! framing the client applies around it:
//! - protected replies (631/632/633) are base64 + `decode`
//! - protected commands are `MIC`/`ENC`/`CONF` + base64 of `encode`
//! - protected data is a stream of 4-byte big-endian length + encoded block

use crate::ftp::error::{FtpError, FtpResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Default `PBSZ` buffer size requested after login.
pub const DEFAULT_BUFFER_SIZE: usize = 1_048_576;

// ─── Protection levels ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProtectionLevel {
    Clear,
    Safe,
    Confidential,
    Private,
}

impl Default for ProtectionLevel {
    fn default() -> Self {
        Self::Clear
    }
}

impl ProtectionLevel {
    pub fn name(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Safe => "safe",
            Self::Confidential => "confidential",
            Self::Private => "private",
        }
    }

    /// Letter used with `PROT`.
    pub fn prot_char(self) -> char {
        match self {
            Self::Clear => 'C',
            Self::Safe => 'S',
            Self::Confidential => 'E',
            Self::Private => 'P',
        }
    }

    /// Case-insensitive, accepts any unambiguous prefix ("conf", "p").
    pub fn from_name(name: &str) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        let lower = name.to_ascii_lowercase();
        [Self::Clear, Self::Safe, Self::Confidential, Self::Private]
            .into_iter()
            .find(|l| l.name().starts_with(&lower))
    }

    /// Level carried by a protected reply code.
    pub fn from_reply_code(code: u16) -> Option<Self> {
        match code {
            631 => Some(Self::Safe),
            632 => Some(Self::Private),
            633 => Some(Self::Confidential),
            _ => None,
        }
    }

    fn command_prefix(self) -> Option<&'static str> {
        match self {
            Self::Clear => None,
            Self::Safe => Some("MIC"),
            Self::Private => Some("ENC"),
            Self::Confidential => Some("CONF"),
        }
    }
}

// ─── Mechanism contract ──────────────────────────────────────────────

/// An established security context.
pub trait SecurityMechanism: Send {
    fn name(&self) -> &str;

    fn check_protection_level(&self, level: ProtectionLevel) -> bool;

    fn encode(&mut self, data: &[u8], level: ProtectionLevel) -> FtpResult<Vec<u8>>;

    fn decode(&mut self, data: &[u8], level: ProtectionLevel) -> FtpResult<Vec<u8>>;

    /// Bytes added by `encode` to a block of `len` bytes.
    fn overhead(&self, level: ProtectionLevel, len: usize) -> usize;
}

/// The null mechanism: only the clear level, identity transforms.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClearMechanism;

impl SecurityMechanism for ClearMechanism {
    fn name(&self) -> &str {
        "none"
    }

    fn check_protection_level(&self, level: ProtectionLevel) -> bool {
        level == ProtectionLevel::Clear
    }

    fn encode(&mut self, data: &[u8], _level: ProtectionLevel) -> FtpResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&mut self, data: &[u8], _level: ProtectionLevel) -> FtpResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn overhead(&self, _level: ProtectionLevel, _len: usize) -> usize {
        0
    }
}

/// Look up a built-in mechanism by name.
pub fn mechanism_by_name(name: &str) -> Option<Box<dyn SecurityMechanism>> {
    match name.to_ascii_lowercase().as_str() {
        "none" | "clear" => Some(Box::new(ClearMechanism)),
        _ => None,
    }
}

// ─── Session security state ──────────────────────────────────────────

/// Mechanism plus the levels negotiated for commands and data.
pub struct SecurityContext {
    mech: Box<dyn SecurityMechanism>,
    pub command_prot: ProtectionLevel,
    pub data_prot: ProtectionLevel,
    pub buffer_size: usize,
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("mech", &self.mech.name())
            .field("command_prot", &self.command_prot)
            .field("data_prot", &self.data_prot)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

impl SecurityContext {
    pub fn new(mech: Box<dyn SecurityMechanism>) -> Self {
        Self {
            mech,
            command_prot: ProtectionLevel::Clear,
            data_prot: ProtectionLevel::Clear,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn mechanism_name(&self) -> &str {
        self.mech.name()
    }

    pub fn mechanism_mut(&mut self) -> &mut dyn SecurityMechanism {
        self.mech.as_mut()
    }

    pub fn supports(&self, level: ProtectionLevel) -> bool {
        self.mech.check_protection_level(level)
    }

    pub fn data_protected(&self) -> bool {
        self.data_prot != ProtectionLevel::Clear
    }

    /// Wrap an outgoing command line (without CRLF) for the command level.
    pub fn wrap_command(&mut self, cmd: &str) -> FtpResult<String> {
        let level = self.command_prot;
        match level.command_prefix() {
            None => Ok(cmd.to_string()),
            Some(prefix) => {
                let sealed = self.mech.encode(cmd.as_bytes(), level)?;
                Ok(format!("{} {}", prefix, STANDARD.encode(sealed)))
            }
        }
    }

    /// Largest plaintext block that still fits the negotiated buffer.
    pub fn max_plain_block(&self) -> usize {
        let overhead = self.mech.overhead(self.data_prot, self.buffer_size);
        self.buffer_size.saturating_sub(overhead).max(1)
    }

    /// Encode `data` into one or more length-prefixed frames.
    pub fn seal_data(&mut self, data: &[u8]) -> FtpResult<Vec<u8>> {
        let level = self.data_prot;
        let block = self.max_plain_block();
        let mut out = Vec::with_capacity(data.len() + 16);
        for chunk in data.chunks(block) {
            let sealed = self.mech.encode(chunk, level)?;
            push_frame(&mut out, &sealed)?;
        }
        Ok(out)
    }

    /// Terminating frame sent when an upload completes.
    pub fn seal_end(&mut self) -> FtpResult<Vec<u8>> {
        let sealed = self.mech.encode(&[], self.data_prot)?;
        let mut out = Vec::with_capacity(4 + sealed.len());
        push_frame(&mut out, &sealed)?;
        Ok(out)
    }
}

fn push_frame(out: &mut Vec<u8>, sealed: &[u8]) -> FtpResult<()> {
    let len = u32::try_from(sealed.len())
        .map_err(|_| FtpError::protocol_error("protected block too large"))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(sealed);
    Ok(())
}

/// Reassembles length-prefixed frames split across socket reads.
#[derive(Debug, Default)]
pub struct ProtectedReader {
    pending: Vec<u8>,
}

impl ProtectedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, return whatever plaintext completed frames yield.
    pub fn feed(&mut self, raw: &[u8], ctx: &mut SecurityContext) -> FtpResult<Vec<u8>> {
        self.pending.extend_from_slice(raw);
        let mut plain = Vec::new();
        loop {
            if self.pending.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            if self.pending.len() < 4 + len {
                break;
            }
            let frame: Vec<u8> = self.pending.drain(..4 + len).skip(4).collect();
            let decoded = ctx.mech.decode(&frame, ctx.data_prot)?;
            plain.extend_from_slice(&decoded);
        }
        Ok(plain)
    }

    /// True when a partial frame is still buffered.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Decode a 631/632/633 reply line into the plaintext reply it carries.
pub fn unwrap_protected_line(
    line: &str,
    level: ProtectionLevel,
    mech: &mut dyn SecurityMechanism,
) -> FtpResult<String> {
    let payload = line.get(4..).unwrap_or("").trim();
    let raw = STANDARD
        .decode(payload)
        .map_err(|e| FtpError::protocol_error(format!("bad base64 in protected reply: {}", e)))?;
    let plain = mech.decode(&raw, level)?;
    let text = String::from_utf8_lossy(&plain);
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}
