//! Control channel codec (RFC 959 §4, RFC 854 escapes).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading reply lines byte by byte, answering Telnet option negotiation
//! - Concatenating multi-line replies and parsing the 3-digit code
//! - Unwrapping 631/632/633 protected replies
//! - Telnet IP + DM as urgent data ahead of `ABOR`

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::security::{unwrap_protected_line, ProtectionLevel, SecurityContext};
use crate::ftp::types::FtpResponse;
use socket2::SockRef;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

// ── Telnet bytes ─────────────────────────────────────────────────────

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
/// Interrupt Process.
pub const IP: u8 = 244;
/// Data Mark.
pub const DM: u8 = 242;

/// Longest reply line kept; the rest of the line is discarded.
pub const MAX_REPLY: usize = 512;

/// The FTP command/reply codec operating on split halves.
pub struct FtpCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// One byte of lookahead returned by a bare CR.
    pushback: Option<u8>,
}

impl FtpCodec {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            pushback: None,
        }
    }

    pub fn peer_addr(&self) -> FtpResult<SocketAddr> {
        Ok(self.reader.get_ref().peer_addr()?)
    }

    pub fn local_addr(&self) -> FtpResult<SocketAddr> {
        Ok(self.reader.get_ref().local_addr()?)
    }

    /// Send a command line. The trailing CRLF is added here.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let line = format!("{}\r\n", cmd);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> FtpResult<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Telnet IP and the first IAC of the synch go out as urgent data, then
    /// the Data Mark in-band.
    pub async fn send_telnet_interrupt(&mut self) -> FtpResult<()> {
        {
            let sock = SockRef::from(self.writer.as_ref());
            sock.send_out_of_band(&[IAC, IP, IAC])?;
        }
        log::trace!("--> IAC IP IAC (urgent) DM");
        self.write_raw(&[DM]).await
    }

    /// Unread reply bytes are waiting on the control channel.
    pub fn has_pending(&self) -> bool {
        if self.pushback.is_some() || !self.reader.buffer().is_empty() {
            return true;
        }
        let sock = SockRef::from(self.reader.get_ref().as_ref());
        let mut probe = [MaybeUninit::<u8>::uninit(); 1];
        matches!(sock.peek(&mut probe), Ok(n) if n > 0)
    }

    async fn next_byte(&mut self) -> FtpResult<Option<u8>> {
        if let Some(b) = self.pushback.take() {
            return Ok(Some(b));
        }
        let buf = self.reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(None);
        }
        let b = buf[0];
        self.reader.consume(1);
        Ok(Some(b))
    }

    async fn require_byte(&mut self) -> FtpResult<u8> {
        self.next_byte()
            .await?
            .ok_or_else(|| FtpError::disconnected("Server has closed control connection"))
    }

    /// Read one reply line, CRLF stripped, Telnet commands answered.
    pub async fn read_line(&mut self) -> FtpResult<String> {
        let mut line: Vec<u8> = Vec::with_capacity(128);
        let mut truncated = false;
        let mut keep = |line: &mut Vec<u8>, c: u8| {
            if line.len() < MAX_REPLY {
                line.push(c);
            } else {
                truncated = true;
            }
        };

        loop {
            let c = self.require_byte().await?;
            match c {
                IAC => {
                    let cmd = self.require_byte().await?;
                    match cmd {
                        WILL | WONT => {
                            let opt = self.require_byte().await?;
                            self.write_raw(&[IAC, DONT, opt]).await?;
                        }
                        DO | DONT => {
                            let opt = self.require_byte().await?;
                            self.write_raw(&[IAC, WONT, opt]).await?;
                        }
                        _ => {}
                    }
                }
                b'\r' => match self.require_byte().await? {
                    b'\n' => break,
                    0 => keep(&mut line, b'\r'),
                    other => {
                        self.pushback = Some(other);
                        keep(&mut line, b'\r');
                    }
                },
                b'\n' => break,
                _ => keep(&mut line, c),
            }
        }

        if truncated {
            log::warn!("Reply too long (truncated)");
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Read one line and, if it is a protected reply, replace it with the
    /// plaintext. `Ok(None)` means the protected reply failed to decode.
    async fn read_reply_line(
        &mut self,
        security: Option<&mut SecurityContext>,
    ) -> FtpResult<Option<String>> {
        let line = self.read_line().await?;
        let level = parse_code(&line).and_then(ProtectionLevel::from_reply_code);
        match (level, security) {
            (Some(level), Some(ctx)) => {
                match unwrap_protected_line(&line, level, ctx.mechanism_mut()) {
                    Ok(plain) => {
                        log::trace!("<== {}", plain);
                        Ok(Some(plain))
                    }
                    Err(e) => {
                        log::error!("Failed to decode {} reply: {}", level.name(), e);
                        Ok(None)
                    }
                }
            }
            _ => Ok(Some(line)),
        }
    }

    /// Read a complete reply (possibly multi-line).
    ///
    /// Multi-line replies look like:
    /// ```text
    /// 220-Welcome to my FTP server
    /// 220-This is line 2
    /// 220 End of greeting
    /// ```
    pub async fn read_response(
        &mut self,
        mut security: Option<&mut SecurityContext>,
    ) -> FtpResult<FtpResponse> {
        let first = match self.read_reply_line(security.as_deref_mut()).await? {
            Some(line) => line,
            None => return Ok(FtpResponse::new(0, Vec::new())),
        };
        let code = parse_code(&first).ok_or_else(|| {
            FtpError::protocol_error(format!("Invalid reply code in: '{}'", first))
        })?;
        let mut lines = vec![first];

        let is_multi = lines[0].len() > 3 && lines[0].as_bytes()[3] == b'-';
        if is_multi {
            let terminator = format!("{} ", &lines[0][..3]);
            loop {
                let next = match self.read_reply_line(security.as_deref_mut()).await? {
                    Some(line) => line,
                    None => return Ok(FtpResponse::new(0, lines)),
                };
                let done = next.starts_with(&terminator);
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        Ok(FtpResponse::new(code, lines))
    }
}

/// Parse the 3-digit code at the start of a line.
pub fn parse_code(line: &str) -> Option<u16> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
