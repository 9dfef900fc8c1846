//! Transfer engine: RETR/STOR/APPE/STOU, listings, and the ABOR dance.
//!
//! Every transfer goes `Negotiating → Transferring → {Completed, Aborted,
//! Failed}`; the record of the last one stays on the session as
//! [`FtpSession::transfer_info`].

use crate::ftp::ascii::{encode_ascii, AsciiDecoder};
use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::security::ProtectedReader;
use crate::ftp::signals::InterruptPolicy;
use crate::ftp::types::*;
use std::io::SeekFrom;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, Interest};
use tokio::net::TcpStream;

/// Chunk size for data-channel reads and local file reads.
pub const FTP_BUFSIZ: usize = 4096;

/// Readiness waits wake up this often to count stalls and report progress.
const WAIT_TICK: Duration = Duration::from_millis(500);

/// Upper bound for draining the data channel after `ABOR`.
const DRAIN_LIMIT: Duration = Duration::from_secs(10);

/// Progress callback, called with the current transfer record.
pub type ProgressHook<'a> = Option<&'a mut (dyn FnMut(&TransferInfo) + Send)>;

/// Throttles the hook: once at start, at most once a second, once at the end.
struct Progress<'a> {
    hook: ProgressHook<'a>,
    last: Instant,
}

impl<'a> Progress<'a> {
    fn new(hook: ProgressHook<'a>) -> Self {
        Self {
            hook,
            last: Instant::now(),
        }
    }

    fn fire(&mut self, ti: &TransferInfo) {
        if let Some(h) = self.hook.as_mut() {
            (*h)(ti);
        }
        self.last = Instant::now();
    }

    fn tick(&mut self, ti: &TransferInfo) {
        if self.last.elapsed() >= Duration::from_secs(1) {
            self.fire(ti);
        }
    }
}

enum Wait {
    Ready,
    Interrupted,
    Failed(FtpError),
}

enum CopyEnd {
    /// End of stream without interruption.
    Done,
    Interrupted,
    Failed(FtpError),
}

impl FtpSession {
    // ─── Setup ───────────────────────────────────────────────────

    /// Send `TYPE` unless the server is already in `mode`.
    pub async fn set_type(&mut self, mode: TransferType) -> FtpResult<()> {
        if self.prev_type == Some(mode) {
            return Ok(());
        }
        self.expect(&format!("TYPE {}", mode.type_char()), ReplyClass::Complete)
            .await?;
        self.prev_type = Some(mode);
        Ok(())
    }

    /// Start a fresh transfer record.
    fn reset_transfer_info(&mut self, remote: &str, local: &str, total: Option<u64>, is_put: bool) {
        self.ti = TransferInfo {
            remote_name: remote.to_string(),
            local_name: local.to_string(),
            total_size: total,
            is_put,
            state: TransferState::Negotiating,
            ..TransferInfo::default()
        };
    }

    /// `REST` for a pending restart offset.
    async fn send_restart(&mut self, offset: u64) -> FtpResult<()> {
        if offset == 0 {
            return Ok(());
        }
        let resp = self.execute(&format!("REST {}", offset)).await?;
        if resp.class() != ReplyClass::Continue {
            self.ti.state = TransferState::Failed;
            return Err(FtpError::transfer_failed(format!(
                "Server refused to restart at {}: {}",
                offset,
                resp.message()
            ))
            .with_code(resp.code));
        }
        self.ti.size = offset;
        self.ti.restart_size = offset;
        Ok(())
    }

    fn fail_negotiation(&mut self, resp: FtpResponse) -> FtpError {
        self.ti.state = TransferState::Failed;
        resp.into_error().with_session(&self.id)
    }

    /// Open the data channel and issue `RETR`.
    async fn init_receive(&mut self, path: &str, mode: TransferType) -> FtpResult<TcpStream> {
        let rp = std::mem::take(&mut self.restart_offset);

        let channel = self.open_data_channel().await?;
        self.set_type(mode).await?;
        self.send_restart(rp).await?;

        let resp = self.execute(&format!("RETR {}", path)).await?;
        if resp.class() != ReplyClass::Preliminary {
            return Err(self.fail_negotiation(resp));
        }

        let stream = channel.establish(self.reply_timeout).await.map_err(|e| {
            log::error!("data connection not accepted");
            e
        })?;

        let abs = self.path_absolute(path);
        let cached = self.cache.get_file(&abs).and_then(|f| f.size);
        self.ti.total_size = cached.or_else(|| size_from_retr_reply(resp.last_line()));
        Ok(stream)
    }

    // ─── Downloads ───────────────────────────────────────────────

    /// Download `path` into `out`.
    pub async fn receive<W>(
        &mut self,
        path: &str,
        out: &mut W,
        mode: TransferType,
        hook: ProgressHook<'_>,
    ) -> FtpResult<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.reset_transfer_info(path, "local", None, false);
        let stream = self.init_receive(path, mode).await?;
        self.do_receive(stream, out, mode, hook).await
    }

    /// Download `remote` into the local file `local`.
    pub async fn getfile(
        &mut self,
        remote: &str,
        local: &Path,
        how: GetMode,
        mode: TransferType,
        hook: ProgressHook<'_>,
    ) -> FtpResult<()> {
        let rp = match fs::metadata(local).await {
            Ok(meta) => {
                if meta.is_dir() {
                    return Err(FtpError::io_error(format!("{}: is a directory", local.display())));
                }
                if meta.permissions().readonly() {
                    return Err(FtpError::io_error(format!(
                        "{}: permission denied",
                        local.display()
                    )));
                }
                if how == GetMode::Resume {
                    meta.len()
                } else {
                    0
                }
            }
            Err(_) => 0,
        };

        self.reset_transfer_info(remote, &local.display().to_string(), None, false);
        self.restart_offset = rp;
        let stream = self.init_receive(remote, mode).await?;

        let mut opts = fs::OpenOptions::new();
        if rp > 0 || how == GetMode::Append {
            opts.append(true).create(true);
        } else {
            opts.write(true).create(true).truncate(true);
        }
        let mut file = match opts.open(local).await {
            Ok(f) => f,
            Err(e) => {
                log::error!("{}: {}", local.display(), e);
                self.abort_transfer(Some(stream)).await;
                self.ti.state = TransferState::Failed;
                return Err(FtpError::io_error(format!("{}: {}", local.display(), e)));
            }
        };

        let r = self.do_receive(stream, &mut file, mode, hook).await;
        if let Err(e) = file.flush().await {
            log::error!("{}: {}", local.display(), e);
        }
        r
    }

    async fn do_receive<W>(
        &mut self,
        mut stream: TcpStream,
        out: &mut W,
        mode: TransferType,
        hook: ProgressHook<'_>,
    ) -> FtpResult<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut progress = Progress::new(hook);
        let previous = self.enter_transfer();
        let end = self.recv_loop(&mut stream, out, mode, &mut progress).await;
        let result = self.conclude(end, stream, &mut progress).await;
        self.leave_transfer(previous);
        result
    }

    async fn recv_loop<W>(
        &mut self,
        stream: &mut TcpStream,
        out: &mut W,
        mode: TransferType,
        progress: &mut Progress<'_>,
    ) -> CopyEnd
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        progress.fire(&self.ti);
        self.ti.begin = false;

        let mut buf = vec![0u8; FTP_BUFSIZ];
        let mut decoder = AsciiDecoder::new();
        let mut reader = ProtectedReader::new();
        let mut converted = Vec::with_capacity(FTP_BUFSIZ + 1);

        loop {
            match self.wait_for_data(stream, Interest::READABLE, progress).await {
                Wait::Ready => {}
                Wait::Interrupted => return CopyEnd::Interrupted,
                Wait::Failed(e) => return CopyEnd::Failed(e),
            }
            let n = match stream.try_read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    return CopyEnd::Failed(FtpError::transfer_failed(format!("read error: {}", e)))
                }
            };
            if self.interrupts.is_interrupted() {
                log::trace!("break due to interrupt");
                self.ti.interrupted = true;
                return CopyEnd::Interrupted;
            }

            let plain = match self.security.as_mut() {
                Some(ctx) if ctx.data_protected() => match reader.feed(&buf[..n], ctx) {
                    Ok(p) => p,
                    Err(e) => return CopyEnd::Failed(e),
                },
                _ => buf[..n].to_vec(),
            };

            let chunk: &[u8] = match mode {
                TransferType::Binary => &plain,
                TransferType::Ascii => {
                    converted.clear();
                    decoder.decode(&plain, &mut converted);
                    &converted
                }
            };
            if let Err(e) = out.write_all(chunk).await {
                return CopyEnd::Failed(FtpError::io_error(format!("write error: {}", e)));
            }
            self.ti.size += chunk.len() as u64;
            self.ti.barelfs = decoder.bare_lfs;
            progress.tick(&self.ti);
        }

        if reader.has_partial() {
            log::warn!("data channel closed inside a protected block");
        }
        converted.clear();
        decoder.finish(&mut converted);
        if !converted.is_empty() {
            if let Err(e) = out.write_all(&converted).await {
                return CopyEnd::Failed(FtpError::io_error(format!("write error: {}", e)));
            }
            self.ti.size += converted.len() as u64;
        }
        if let Err(e) = out.flush().await {
            return CopyEnd::Failed(FtpError::io_error(format!("write error: {}", e)));
        }
        CopyEnd::Done
    }

    // ─── Uploads ─────────────────────────────────────────────────

    /// Upload everything `input` yields to `path`.
    pub async fn send<R>(
        &mut self,
        path: &str,
        input: &mut R,
        how: PutMode,
        mode: TransferType,
        hook: ProgressHook<'_>,
    ) -> FtpResult<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.reset_transfer_info(path, "local", None, true);
        self.send_inner(path, input, how, mode, hook).await
    }

    /// Upload the local file `local` to `remote`.
    pub async fn putfile(
        &mut self,
        local: &Path,
        remote: &str,
        how: PutMode,
        mode: TransferType,
        hook: ProgressHook<'_>,
    ) -> FtpResult<()> {
        let meta = fs::metadata(local)
            .await
            .map_err(|e| FtpError::io_error(format!("{}: {}", local.display(), e)))?;
        if meta.is_dir() {
            return Err(FtpError::io_error(format!("{}: is a directory", local.display())));
        }
        let mut file = fs::File::open(local)
            .await
            .map_err(|e| FtpError::io_error(format!("{}: {}", local.display(), e)))?;

        let offset = if how == PutMode::Resume {
            self.remote_size_for_resume(remote).await
        } else {
            0
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
                FtpError::io_error(format!("{}: {}, transfer cancelled", local.display(), e))
            })?;
        }

        self.reset_transfer_info(remote, &local.display().to_string(), Some(meta.len()), true);
        self.restart_offset = offset;
        self.send_inner(remote, &mut file, how, mode, hook).await
    }

    /// Current remote size of `path` (cache first, then `SIZE`); 0 when
    /// unknown, which means "start over".
    pub(crate) async fn remote_size_for_resume(&mut self, path: &str) -> u64 {
        let abs = self.path_absolute(path);
        if let Some(size) = self.cache.get_file(&abs).and_then(|f| f.size) {
            return size;
        }
        match self.filesize(path).await {
            Ok(Some(size)) => size,
            _ => {
                log::error!("unable to get remote filesize of '{}', unable to resume", path);
                0
            }
        }
    }

    async fn send_inner<R>(
        &mut self,
        path: &str,
        input: &mut R,
        mut how: PutMode,
        mode: TransferType,
        hook: ProgressHook<'_>,
    ) -> FtpResult<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let rp = std::mem::take(&mut self.restart_offset);

        if how == PutMode::Unique && !self.features.stou {
            self.ti.state = TransferState::Failed;
            return Err(FtpError::unsupported("Server does not support STOU"));
        }
        if how == PutMode::TryUnique && !self.features.stou {
            how = PutMode::Normal;
        }

        let channel = self.open_data_channel().await?;
        self.set_type(mode).await?;
        self.send_restart(rp).await?;

        self.set_tmp_verbosity(Verbosity::Error);
        let resp = match how {
            PutMode::Append => self.execute(&format!("APPE {}", path)).await?,
            PutMode::Unique | PutMode::TryUnique => {
                let r = self.execute(&format!("STOU {}", path)).await?;
                if r.code == 502 || r.code == 504 {
                    self.features.stou = false;
                    if how == PutMode::TryUnique {
                        how = PutMode::Normal;
                        self.execute(&format!("STOR {}", path)).await?
                    } else {
                        r
                    }
                } else {
                    r
                }
            }
            PutMode::Normal | PutMode::Resume => self.execute(&format!("STOR {}", path)).await?,
        };
        if resp.class() != ReplyClass::Preliminary {
            return Err(self.fail_negotiation(resp));
        }

        if matches!(how, PutMode::Unique | PutMode::TryUnique) {
            if let Some(name) = unique_name_from_reply(resp.last_line()) {
                log::trace!("parsed unique filename as '{}'", name);
                self.ti.remote_name = name;
            }
        }

        let mut stream = channel.establish(self.reply_timeout).await.map_err(|e| {
            log::error!("data connection not accepted");
            e
        })?;
        self.mark_containing_for_flush(path);

        let mut progress = Progress::new(hook);
        let previous = self.enter_transfer();
        let end = self.send_loop(&mut stream, input, mode, &mut progress).await;
        let result = self.conclude(end, stream, &mut progress).await;
        self.leave_transfer(previous);
        result
    }

    async fn send_loop<R>(
        &mut self,
        stream: &mut TcpStream,
        input: &mut R,
        mode: TransferType,
        progress: &mut Progress<'_>,
    ) -> CopyEnd
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        progress.fire(&self.ti);
        self.ti.begin = false;

        let mut buf = vec![0u8; FTP_BUFSIZ];
        let mut converted = Vec::with_capacity(FTP_BUFSIZ * 2);
        loop {
            let n = match input.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return CopyEnd::Failed(FtpError::io_error(format!("read error: {}", e))),
            };
            if self.interrupts.is_interrupted() {
                self.ti.interrupted = true;
                return CopyEnd::Interrupted;
            }

            let payload: &[u8] = match mode {
                TransferType::Binary => &buf[..n],
                TransferType::Ascii => {
                    converted.clear();
                    encode_ascii(&buf[..n], &mut converted);
                    &converted
                }
            };
            let len = payload.len() as u64;
            let wire = match self.security.as_mut() {
                Some(ctx) if ctx.data_protected() => match ctx.seal_data(payload) {
                    Ok(w) => w,
                    Err(e) => return CopyEnd::Failed(e),
                },
                _ => payload.to_vec(),
            };
            if let Some(end) = self.write_data(stream, &wire, progress).await {
                return end;
            }
            self.ti.size += len;
            progress.tick(&self.ti);
        }

        let trailer = match self.security.as_mut() {
            Some(ctx) if ctx.data_protected() => match ctx.seal_end() {
                Ok(t) => t,
                Err(e) => return CopyEnd::Failed(e),
            },
            _ => Vec::new(),
        };
        if !trailer.is_empty() {
            if let Some(end) = self.write_data(stream, &trailer, progress).await {
                return end;
            }
        }
        if let Err(e) = stream.shutdown().await {
            return CopyEnd::Failed(FtpError::transfer_failed(format!("write error: {}", e)));
        }
        CopyEnd::Done
    }

    /// Write all of `data`, waiting for the socket between partial writes.
    async fn write_data(
        &mut self,
        stream: &TcpStream,
        mut data: &[u8],
        progress: &mut Progress<'_>,
    ) -> Option<CopyEnd> {
        while !data.is_empty() {
            match self.wait_for_data(stream, Interest::WRITABLE, progress).await {
                Wait::Ready => {}
                Wait::Interrupted => return Some(CopyEnd::Interrupted),
                Wait::Failed(e) => return Some(CopyEnd::Failed(e)),
            }
            match stream.try_write(data) {
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    return Some(CopyEnd::Failed(FtpError::transfer_failed(format!(
                        "write error: {}",
                        e
                    ))))
                }
            }
        }
        None
    }

    // ─── Listings ────────────────────────────────────────────────

    /// Run a listing command (`LIST`, `NLST`, `MLSD`) and return its
    /// output with line endings converted.
    pub async fn list(&mut self, cmd: &str, param: Option<&str>) -> FtpResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(FtpError::no_control_connection().with_session(&self.id));
        }
        self.reset_transfer_info(param.unwrap_or("remote"), "listing", None, false);

        let channel = self.open_data_channel().await.map_err(|e| {
            log::error!("transfer initialization failed");
            e
        })?;
        self.set_tmp_verbosity(Verbosity::None);
        let line = match param {
            Some(p) => format!("{} {}", cmd, p),
            None => cmd.to_string(),
        };
        let resp = self.execute(&line).await?;
        if resp.class() != ReplyClass::Preliminary {
            return Err(self.fail_negotiation(resp));
        }
        let stream = channel.establish(self.reply_timeout).await?;

        let mut out = Vec::new();
        self.do_receive(stream, &mut out, TransferType::Ascii, None)
            .await?;
        Ok(out)
    }

    // ─── Waiting, aborting, finishing ────────────────────────────

    fn enter_transfer(&mut self) -> InterruptPolicy {
        self.ti.state = TransferState::Transferring;
        self.interrupts.set_in_transfer(true);
        self.interrupts.set_policy(InterruptPolicy::Close)
    }

    fn leave_transfer(&mut self, previous: InterruptPolicy) {
        self.interrupts.set_in_transfer(false);
        self.interrupts.set_policy(previous);
    }

    /// Wait until the data socket is ready, ticking every 500 ms. A hangup
    /// wakes the wait but the transfer carries on.
    async fn wait_for_data(
        &mut self,
        stream: &TcpStream,
        interest: Interest,
        progress: &mut Progress<'_>,
    ) -> Wait {
        let interrupts = self.interrupts.clone();
        loop {
            if interrupts.is_interrupted() {
                self.ti.interrupted = true;
                return Wait::Interrupted;
            }
            let ready = tokio::select! {
                r = stream.ready(interest) => Some(r),
                _ = tokio::time::sleep(WAIT_TICK) => None,
                _ = interrupts.notified() => {
                    if interrupts.hangup_received() {
                        log::debug!("hangup during transfer, continuing");
                    }
                    Some(Ok(tokio::io::Ready::EMPTY))
                }
            };
            match ready {
                Some(Ok(r)) if r.is_empty() => {}
                Some(Ok(_)) => {
                    self.ti.stalled = 0;
                    return Wait::Ready;
                }
                Some(Err(e)) => {
                    return Wait::Failed(FtpError::transfer_failed(format!("data channel: {}", e)))
                }
                None => {
                    self.ti.stalled += 1;
                    progress.tick(&self.ti);
                }
            }
        }
    }

    async fn conclude(
        &mut self,
        end: CopyEnd,
        stream: TcpStream,
        progress: &mut Progress<'_>,
    ) -> FtpResult<()> {
        self.ti.finished = true;
        match end {
            CopyEnd::Done => {
                drop(stream);
                progress.fire(&self.ti);
                self.read_final_reply().await
            }
            CopyEnd::Interrupted => {
                let sent_abor = self.abort_transfer(Some(stream)).await;
                progress.fire(&self.ti);
                if !sent_abor {
                    let _ = self.read_final_reply().await;
                }
                self.ti.interrupted = true;
                self.ti.state = TransferState::Aborted;
                Err(FtpError::cancelled("Transfer interrupted").with_session(&self.id))
            }
            CopyEnd::Failed(e) => {
                log::error!("{}", e.message);
                self.ti.ioerror = true;
                let sent_abor = self.abort_transfer(Some(stream)).await;
                progress.fire(&self.ti);
                if !sent_abor {
                    let _ = self.read_final_reply().await;
                }
                self.ti.state = TransferState::Failed;
                Err(e.with_session(&self.id))
            }
        }
    }

    /// The reply that follows the data channel closing; only 2xx succeeds.
    async fn read_final_reply(&mut self) -> FtpResult<()> {
        let resp = match self.read_reply().await {
            Ok(r) => r,
            Err(e) => {
                self.ti.state = TransferState::Failed;
                return Err(e);
            }
        };
        if resp.class() != ReplyClass::Complete {
            log::trace!("transfer failed");
            self.ti.ioerror = true;
            self.ti.state = TransferState::Failed;
            return Err(FtpError::transfer_failed(resp.message())
                .with_code(resp.code)
                .with_session(&self.id));
        }
        self.ti.state = TransferState::Completed;
        Ok(())
    }

    /// Abort the running transfer. When the server has already replied the
    /// data channel is only drained and `false` is returned; otherwise
    /// `ABOR` goes out after an urgent Telnet interrupt and both of its
    /// replies are consumed.
    pub(crate) async fn abort_transfer(&mut self, data: Option<TcpStream>) -> bool {
        let pending = match self.codec.as_ref() {
            Some(codec) => codec.has_pending(),
            None => return true,
        };
        if pending {
            log::trace!("There is data on the control channel, won't send ABOR");
            drain(data).await;
            return false;
        }

        self.ti.interrupted = true;
        log::warn!("Waiting for remote to finish abort...");

        let line = match self.security.as_mut() {
            Some(ctx) => ctx.wrap_command("ABOR").unwrap_or_else(|e| {
                log::error!("{}", e);
                "ABOR".to_string()
            }),
            None => "ABOR".to_string(),
        };
        let debug = self.effective_verbosity() == Verbosity::Debug;
        let host = self.host_label().to_string();
        let sent = match self.codec.as_mut() {
            Some(codec) => {
                log::trace!("--> telnet interrupt");
                if let Err(e) = codec.send_telnet_interrupt().await {
                    log::error!("telnet interrupt: {}", e);
                }
                codec.send_command(&line).await
            }
            None => return true,
        };
        if let Err(e) = sent {
            log::error!("Lost control connection: {}", e);
            self.close();
            return true;
        }
        if debug {
            log::info!("--> [{}] ABOR", host);
        } else {
            log::trace!("--> [{}] ABOR", host);
        }

        drain(data).await;

        match self.read_reply().await {
            Ok(r) if r.code == 426 || r.code == 226 => {}
            Ok(_) => log::trace!("Expected a 426 or 226 reply"),
            Err(e) => {
                log::debug!("abort: {}", e);
                return true;
            }
        }
        match self.read_reply().await {
            Ok(r) if r.code == 226 || r.code == 225 => {}
            Ok(_) => log::trace!("Expected a 226 or 225 reply"),
            Err(e) => log::debug!("abort: {}", e),
        }
        true
    }
}

/// Read and discard whatever is left on a data connection.
async fn drain(data: Option<TcpStream>) {
    let mut stream = match data {
        Some(s) => s,
        None => return,
    };
    let mut buf = vec![0u8; FTP_BUFSIZ];
    let _ = tokio::time::timeout(DRAIN_LIMIT, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}

/// Size announced in a `RETR` reply such as
/// `150 Opening BINARY mode data connection for foo (14429793 bytes)`.
pub fn size_from_retr_reply(text: &str) -> Option<u64> {
    let end = text.find(" bytes")?;
    let head = &text[..end];
    let start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    head[start..].parse().ok()
}

/// Remote name chosen by the server for `STOU`.
pub fn unique_name_from_reply(text: &str) -> Option<String> {
    let rest = match text.find(" for ") {
        Some(i) => &text[i + 5..],
        None => &text[text.find("FILE: ")? + 6..],
    };
    let rest = rest.trim();
    let name = match rest.chars().next()? {
        q @ ('\'' | '"') => {
            let inner = &rest[1..];
            &inner[..inner.find(q).unwrap_or(inner.len())]
        }
        _ => rest
            .split_whitespace()
            .next()
            .unwrap_or(rest)
            .trim_end_matches('.'),
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
