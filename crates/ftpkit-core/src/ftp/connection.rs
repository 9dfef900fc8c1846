//! TCP transport for the FTP control connection.
//!
//! Connecting and reading the greeting both count against the open timeout.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::signals::with_deadline;
use crate::ftp::types::{FtpConnectionConfig, FtpResponse};
use std::time::Duration;
use tokio::net::TcpStream;

/// Establish the control connection and return a ready-to-use codec
/// **plus** the final greeting reply.
///
/// A `120` ("service ready in nnn minutes") is followed by another reply;
/// the one returned is whatever comes after it.
pub async fn connect(
    config: &FtpConnectionConfig,
    open_timeout: Option<Duration>,
) -> FtpResult<(FtpCodec, FtpResponse)> {
    let addr = if config.host.contains(':') {
        format!("[{}]:{}", config.host, config.port)
    } else {
        format!("{}:{}", config.host, config.port)
    };

    with_deadline(open_timeout, &format!("Connection to {}", addr), async {
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true).ok();

        let mut codec = FtpCodec::from_tcp(tcp);
        let mut banner = codec.read_response(None).await?;
        if banner.code == 120 {
            log::info!("{}", banner.message());
            banner = codec.read_response(None).await?;
        }
        Ok((codec, banner))
    })
    .await
}
