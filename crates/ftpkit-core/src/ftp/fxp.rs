//! FxP: server-to-server copy. The source is put in passive mode and the
//! destination is pointed at it with `PORT`; file data never passes
//! through this process.

use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::transfer::encode_port_argument;
use crate::ftp::types::*;
use std::net::SocketAddr;

/// Copy `src_file` on `src` to `dst_file` on `dst`.
pub async fn fxp_file(
    src: &mut FtpSession,
    src_file: &str,
    dst: &mut FtpSession,
    dst_file: &str,
    how: PutMode,
    mode: TransferType,
) -> FtpResult<()> {
    // source side
    src.set_type(mode).await?;
    let addr = match src.request_passive().await? {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => {
            return Err(FtpError::unsupported("FxP over IPv6 is not supported"));
        }
    };
    src.ti = TransferInfo::default();

    // destination side
    dst.set_type(mode).await?;
    dst.expect(
        &format!("PORT {}", encode_port_argument(addr)),
        ReplyClass::Complete,
    )
    .await?;
    dst.ti = TransferInfo::default();

    let rp = if how == PutMode::Resume {
        match dst.get_file(dst_file).await?.and_then(|f| f.size) {
            Some(size) => size,
            None => dst.remote_size_for_resume(dst_file).await,
        }
    } else {
        0
    };
    if rp > 0 {
        dst.expect(&format!("REST {}", rp), ReplyClass::Continue).await?;
        src.expect(&format!("REST {}", rp), ReplyClass::Continue).await?;
    }

    let use_stou = match how {
        PutMode::Unique if !dst.features.stou => {
            return Err(FtpError::unsupported("Server does not support STOU").with_code(502));
        }
        PutMode::Unique => true,
        PutMode::TryUnique => dst.features.stou,
        _ => false,
    };
    let resp = if use_stou {
        let r = dst.execute(&format!("STOU {}", dst_file)).await?;
        if r.code == 502 {
            dst.features.stou = false;
        }
        r
    } else if how == PutMode::Append {
        dst.execute(&format!("APPE {}", dst_file)).await?
    } else {
        dst.execute(&format!("STOR {}", dst_file)).await?
    };
    if resp.class() != ReplyClass::Preliminary {
        return Err(resp.into_error().with_session(&dst.id));
    }
    dst.mark_containing_for_flush(dst_file);

    let resp = src.execute(&format!("RETR {}", src_file)).await?;
    if resp.class() != ReplyClass::Preliminary {
        dst.abort_transfer(None).await;
        return Err(resp.into_error().with_session(&src.id));
    }

    // the copy takes as long as it takes
    let dst_reply = read_unbounded(dst).await;
    let src_reply = read_unbounded(src).await;

    if let Err(e) = &src_reply {
        log::warn!("FxP source: {}", e);
    }
    let resp = dst_reply?;
    if resp.class() != ReplyClass::Complete {
        return Err(FtpError::transfer_failed(resp.last_line())
            .with_code(resp.code)
            .with_session(&dst.id));
    }
    Ok(())
}

async fn read_unbounded(session: &mut FtpSession) -> FtpResult<FtpResponse> {
    let saved = session.reply_timeout.take();
    let r = session.read_reply().await;
    session.reply_timeout = saved;
    r
}
