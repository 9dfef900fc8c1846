//! Data-channel negotiation.
//!
//! Supports four modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects
//! - **EPSV**: extended passive, used when the control connection is IPv6
//! - **PORT**: client listens, server connects
//! - **EPRT**: extended active, IPv6
//!
//! Passive channels are connected before the transfer command is sent;
//! active ones are accepted after the server's preliminary reply.

use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::signals::with_deadline;
use crate::ftp::types::{ReplyClass, Verbosity};
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

lazy_static::lazy_static! {
    static ref PASV_RE: Regex =
        Regex::new(r"(\d+),\s*(\d+),\s*(\d+),\s*(\d+),\s*(\d+),\s*(\d+)").unwrap();
    static ref EPSV_RE: Regex = Regex::new(r"\|\|\|(\d+)\|").unwrap();
}

/// A data connection, or the promise of one.
#[derive(Debug)]
pub enum DataChannel {
    Passive(TcpStream),
    Active(TcpListener),
}

impl DataChannel {
    /// The connected stream; waits for the server in active mode.
    pub async fn establish(self, limit: Option<Duration>) -> FtpResult<TcpStream> {
        match self {
            Self::Passive(stream) => Ok(stream),
            Self::Active(listener) => {
                let (stream, peer) = with_deadline(limit, "Data connection", async {
                    listener
                        .accept()
                        .await
                        .map_err(|e| FtpError::data_channel(format!("accept: {}", e)))
                })
                .await?;
                log::trace!("accepted data connection from {}", peer);
                Ok(stream)
            }
        }
    }
}

// ─── PASV / PORT encoding ────────────────────────────────────────────

/// Parse `h1,h2,h3,h4,p1,p2` from the text of a 227 reply.
pub fn parse_pasv_reply(text: &str) -> FtpResult<SocketAddrV4> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Error parsing PASV reply: '{}'", text)))?;
    let mut nums = [0u8; 6];
    for (i, n) in nums.iter_mut().enumerate() {
        *n = caps[i + 1].parse().map_err(|_| {
            FtpError::protocol_error(format!("Error parsing PASV reply: '{}'", text))
        })?;
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) << 8 | u16::from(nums[5]);
    Ok(SocketAddrV4::new(ip, port))
}

/// `a,b,c,d,p1,p2` for `PORT`.
pub fn encode_port_argument(addr: SocketAddrV4) -> String {
    let [a, b, c, d] = addr.ip().octets();
    let port = addr.port();
    format!("{},{},{},{},{},{}", a, b, c, d, port >> 8, port & 0xff)
}

/// Port from `(|||port|)` in a 229 reply.
pub fn parse_epsv_reply(text: &str) -> FtpResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Error parsing EPSV reply: '{}'", text)))?;
    caps[1]
        .parse()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

// ─── PASV address sanity check ───────────────────────────────────────

fn is_private(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10 || (o[0] == 172 && (16..32).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
}

fn is_loopback(ip: Ipv4Addr) -> bool {
    ip == Ipv4Addr::LOCALHOST
}

fn is_multicast(ip: Ipv4Addr) -> bool {
    (224..240).contains(&ip.octets()[0])
}

fn is_reserved(ip: Ipv4Addr) -> bool {
    let first = ip.octets()[0];
    first == 0 || (first == 127 && !is_loopback(ip)) || first >= 240
}

/// Replace an implausible PASV address with the control connection's peer.
/// Servers behind NAT often advertise their inside address.
pub fn sanitize_pasv_address(pasv: Ipv4Addr, control_peer: Ipv4Addr) -> Ipv4Addr {
    if is_reserved(pasv)
        || is_multicast(pasv)
        || is_private(pasv) != is_private(control_peer)
        || is_loopback(pasv) != is_loopback(control_peer)
    {
        log::warn!("Address returned by PASV seems to be incorrect");
        control_peer
    } else {
        pasv
    }
}

// ─── Session side ────────────────────────────────────────────────────

impl FtpSession {
    /// Issue `PASV` (or `EPSV` over IPv6) and return where to connect.
    pub async fn request_passive(&mut self) -> FtpResult<SocketAddr> {
        if !self.features.pasv {
            log::error!("Host doesn't support passive mode");
            return Err(FtpError::unsupported("Host doesn't support passive mode"));
        }
        let peer = self.peer.ok_or_else(FtpError::no_control_connection)?;

        self.set_tmp_verbosity(Verbosity::None);
        let cmd = if peer.is_ipv6() { "EPSV" } else { "PASV" };
        let resp = self.execute(cmd).await?;
        if resp.class() != ReplyClass::Complete {
            log::error!("Unable to enter passive mode");
            if resp.class() == ReplyClass::Error {
                // no use trying it again
                self.features.pasv = false;
            }
            return Err(FtpError::data_channel(format!(
                "Unable to enter passive mode: {}",
                resp.message()
            ))
            .with_code(resp.code));
        }

        match peer.ip() {
            IpAddr::V6(_) => {
                let port = parse_epsv_reply(resp.message())?;
                Ok(SocketAddr::new(peer.ip(), port))
            }
            IpAddr::V4(control) => {
                let addr = parse_pasv_reply(resp.message())?;
                let ip = sanitize_pasv_address(*addr.ip(), control);
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, addr.port())))
            }
        }
    }

    /// Prepare the data channel for the next transfer command.
    pub async fn open_data_channel(&mut self) -> FtpResult<DataChannel> {
        if !self.is_connected() {
            return Err(FtpError::no_control_connection().with_session(&self.id));
        }

        if self.is_passive() {
            log::trace!("Initializing passive connection");
            let addr = self.request_passive().await?;
            let stream = with_deadline(self.options.open_timeout(), "Data connection", async {
                TcpStream::connect(addr).await.map_err(|e| {
                    FtpError::data_channel(format!(
                        "Could not connect to address from PASV/EPSV ({}): {}",
                        addr, e
                    ))
                })
            })
            .await?;
            return Ok(DataChannel::Passive(stream));
        }

        log::trace!("Initializing active connection");
        let local = match self.codec.as_ref() {
            Some(codec) => codec.local_addr()?,
            None => return Err(FtpError::no_control_connection()),
        };
        let listener = TcpListener::bind(SocketAddr::new(local.ip(), 0))
            .await
            .map_err(|e| FtpError::data_channel(format!("bind: {}", e)))?;
        let cmd = match listener.local_addr()? {
            SocketAddr::V4(v4) => format!("PORT {}", encode_port_argument(v4)),
            SocketAddr::V6(v6) => format!("EPRT |2|{}|{}|", v6.ip(), v6.port()),
        };

        self.set_tmp_verbosity(Verbosity::Error);
        let resp = self.execute(&cmd).await?;
        if resp.class() != ReplyClass::Complete {
            log::trace!("PORT/EPRT not successful");
            return Err(FtpError::data_channel(format!(
                "PORT/EPRT not successful: {}",
                resp.message()
            ))
            .with_code(resp.code));
        }
        Ok(DataChannel::Active(listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pasv() {
        let addr = parse_pasv_reply("Entering Passive Mode (10,0,0,1,19,136)").unwrap();
        assert_eq!(addr, "10.0.0.1:5000".parse().unwrap());
        // some servers drop the parentheses
        let addr = parse_pasv_reply("Entering Passive Mode 192,168,1,2,4,1").unwrap();
        assert_eq!(addr.port(), 1025);
        assert!(parse_pasv_reply("Entering Passive Mode (300,0,0,1,19,136)").is_err());
        assert!(parse_pasv_reply("no numbers here").is_err());
    }

    #[test]
    fn port_argument_matches_pasv_encoding() {
        let addr: SocketAddrV4 = "172.16.5.9:65535".parse().unwrap();
        let arg = encode_port_argument(addr);
        assert_eq!(arg, "172,16,5,9,255,255");
        assert_eq!(parse_pasv_reply(&arg).unwrap(), addr);
    }

    #[test]
    fn test_parse_epsv() {
        assert_eq!(
            parse_epsv_reply("Entering Extended Passive Mode (|||6446|)").unwrap(),
            6446
        );
        assert!(parse_epsv_reply("Entering Extended Passive Mode").is_err());
    }

    #[test]
    fn pasv_sanity_check() {
        let public: Ipv4Addr = "203.0.113.7".parse().unwrap();
        let inside: Ipv4Addr = "10.1.2.3".parse().unwrap();
        // NAT: private address advertised to a public client
        assert_eq!(sanitize_pasv_address(inside, public), public);
        // same side of the fence
        assert_eq!(sanitize_pasv_address(inside, "10.9.9.9".parse().unwrap()), inside);
        assert_eq!(
            sanitize_pasv_address(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST),
            Ipv4Addr::LOCALHOST
        );
        // reserved and multicast
        assert_eq!(sanitize_pasv_address("0.0.0.0".parse().unwrap(), public), public);
        assert_eq!(sanitize_pasv_address("127.0.0.2".parse().unwrap(), public), public);
        assert_eq!(sanitize_pasv_address("224.0.0.1".parse().unwrap(), public), public);
        let other: Ipv4Addr = "198.51.100.1".parse().unwrap();
        assert_eq!(sanitize_pasv_address(other, public), other);
    }
}
