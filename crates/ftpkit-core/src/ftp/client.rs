//! Stateful FTP session: owns the control connection and issues commands.
//!
//! Lifecycle: `open()` → greeting → `login()` (optional security mechanism,
//! USER/PASS, PWD, CWD to the URL directory) → commands → `quit()`.
//!
//! Every command goes through [`FtpSession::execute`], which adds the
//! transparent reconnect-on-421 behaviour. `directory.rs`, `file_ops.rs`
//! and `remote_glob.rs` add further `impl FtpSession` blocks on top of it.

use crate::ftp::cache::DirectoryCache;
use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::parser::ListingDialect;
use crate::ftp::path;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::security::{
    mechanism_by_name, ProtectionLevel, SecurityContext, SecurityMechanism,
};
use crate::ftp::signals::{with_deadline, InterruptHandle, InterruptPolicy};
use crate::ftp::types::*;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

/// One control connection and everything derived from it.
pub struct FtpSession {
    pub id: String,
    pub(crate) codec: Option<FtpCodec>,
    pub(crate) url: Option<FtpConnectionConfig>,
    pub(crate) options: ClientOptions,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) logged_in: bool,
    pub(crate) curdir: String,
    pub(crate) homedir: String,
    pub(crate) prevdir: String,
    pub(crate) last_reply: Option<FtpResponse>,
    pub(crate) verbosity: Verbosity,
    pub(crate) tmp_verbosity: Option<Verbosity>,
    pub(crate) reply_timeout: Option<Duration>,
    /// Last `TYPE` sent; `None` until the first one.
    pub(crate) prev_type: Option<TransferType>,
    /// Offset for the next transfer, consumed by it.
    pub(crate) restart_offset: u64,
    pub(crate) security: Option<SecurityContext>,
    pub(crate) cache: DirectoryCache,
    pub(crate) dialect: ListingDialect,
    pub(crate) features: ServerFeatures,
    pub(crate) last_mkpath: Option<String>,
    pub(crate) interrupts: InterruptHandle,
    /// The transfer in progress, or the last one.
    pub(crate) ti: TransferInfo,
}

impl FtpSession {
    pub fn new(options: ClientOptions) -> Self {
        Self::with_interrupts(options, InterruptHandle::new())
    }

    /// Share `interrupts` with a signal listener (or other sessions).
    pub fn with_interrupts(options: ClientOptions, interrupts: InterruptHandle) -> Self {
        let mut session = Self {
            id: Uuid::new_v4().to_string(),
            codec: None,
            url: None,
            verbosity: options.verbosity,
            cache: DirectoryCache::new(options.cache_timeout()),
            reply_timeout: options.reply_timeout(),
            options,
            peer: None,
            logged_in: false,
            curdir: String::new(),
            homedir: String::new(),
            prevdir: String::new(),
            last_reply: None,
            tmp_verbosity: None,
            prev_type: None,
            restart_offset: 0,
            security: None,
            dialect: ListingDialect::Unknown,
            features: ServerFeatures::default(),
            last_mkpath: None,
            interrupts,
            ti: TransferInfo::default(),
        };
        session.reset_vars();
        session
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.codec.is_some()
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn url(&self) -> Option<&FtpConnectionConfig> {
        self.url.as_ref()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn curdir(&self) -> &str {
        &self.curdir
    }

    pub fn homedir(&self) -> &str {
        &self.homedir
    }

    pub fn prevdir(&self) -> &str {
        &self.prevdir
    }

    pub fn last_reply(&self) -> Option<&FtpResponse> {
        self.last_reply.as_ref()
    }

    /// Full code of the last reply, 0 when there is none.
    pub fn reply_code(&self) -> u16 {
        self.last_reply.as_ref().map(|r| r.code).unwrap_or(0)
    }

    pub fn reply_class(&self) -> ReplyClass {
        self.last_reply
            .as_ref()
            .map(FtpResponse::class)
            .unwrap_or(ReplyClass::None)
    }

    pub fn features(&self) -> &ServerFeatures {
        &self.features
    }

    pub fn dialect(&self) -> ListingDialect {
        self.dialect
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut DirectoryCache {
        &mut self.cache
    }

    pub fn interrupts(&self) -> &InterruptHandle {
        &self.interrupts
    }

    pub fn transfer_info(&self) -> &TransferInfo {
        &self.ti
    }

    pub fn set_reply_timeout(&mut self, limit: Option<Duration>) {
        self.reply_timeout = limit;
    }

    /// Offset the next transfer starts at; consumed by that transfer.
    pub fn set_restart_offset(&mut self, offset: u64) {
        self.restart_offset = offset;
    }

    pub fn set_verbosity(&mut self, v: Verbosity) {
        self.verbosity = v;
    }

    /// Override the verbosity for the next reply only, unless the session
    /// is already more verbose than error-only.
    pub fn set_tmp_verbosity(&mut self, v: Verbosity) {
        if self.verbosity <= Verbosity::Error {
            self.tmp_verbosity = Some(v);
        }
    }

    pub(crate) fn effective_verbosity(&self) -> Verbosity {
        self.tmp_verbosity.unwrap_or(self.verbosity)
    }

    /// Passive mode: the URL's override, else the process-wide default.
    pub fn is_passive(&self) -> bool {
        self.url
            .as_ref()
            .and_then(|u| u.passive)
            .unwrap_or(self.options.passive_default)
    }

    pub(crate) fn host_label(&self) -> &str {
        self.url.as_ref().map(|u| u.host.as_str()).unwrap_or("?")
    }

    /// Resolve `path` against the current and home directories.
    pub fn path_absolute(&self, path: &str) -> String {
        path::absolute(path, &self.curdir, &self.homedir)
    }

    // ─── Cache invalidation ──────────────────────────────────────

    pub fn mark_for_flush(&mut self, path: &str) {
        let abs = self.path_absolute(path);
        self.cache.mark_for_flush(&abs);
    }

    /// Mark the directory holding `path`; a bare name lives in the
    /// current directory.
    pub fn mark_containing_for_flush(&mut self, path: &str) {
        let dir = match path::base_dir(path) {
            Some(d) => d.to_string(),
            None => self.curdir.clone(),
        };
        self.mark_for_flush(&dir);
    }

    /// End of one command-loop iteration: apply pending invalidations and
    /// clear the interrupt counter.
    pub fn end_command_cycle(&mut self) {
        self.cache.flush_pending();
        self.interrupts.reset();
    }

    // ─── Lifecycle ───────────────────────────────────────────────

    /// Clear every transient field; the cache is emptied.
    pub fn reset_vars(&mut self) {
        self.codec = None;
        self.peer = None;
        self.url = None;
        self.logged_in = false;
        self.features = ServerFeatures::default();
        self.cache.clear_all();
        self.cache.set_timeout(self.options.cache_timeout());
        self.prev_type = None;
        self.restart_offset = 0;
        self.last_reply = None;
        self.tmp_verbosity = None;
        self.reply_timeout = self.options.reply_timeout();
        self.last_mkpath = None;
        self.dialect = ListingDialect::Unknown;
        self.security = None;
        self.curdir.clear();
        self.homedir.clear();
        self.prevdir.clear();
    }

    /// Connect and read the greeting. Only a `220` greeting counts.
    pub async fn open(&mut self, url: FtpConnectionConfig) -> FtpResult<()> {
        if url.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }
        if self.is_connected() {
            self.close();
        }
        self.reset_vars();

        log::info!("Connecting to {} port {}", url.host, url.port);
        let (codec, banner) = connection::connect(&url, self.options.open_timeout())
            .await
            .map_err(|e| e.with_session(&self.id))?;
        self.print_reply(&banner);
        if banner.code != 220 {
            return Err(FtpError::connection_failed(format!(
                "Unexpected greeting from {}: {}",
                url.host,
                banner.last_line()
            ))
            .with_code(banner.code)
            .with_session(&self.id));
        }

        self.peer = codec.peer_addr().ok();
        self.codec = Some(codec);
        self.last_reply = Some(banner);
        log::info!("Connected to {}", url.host);
        self.url = Some(url);
        Ok(())
    }

    /// Authenticate with the URL's credentials.
    pub async fn login(&mut self) -> FtpResult<LoginOutcome> {
        if !self.is_connected() {
            return Err(FtpError::no_control_connection().with_session(&self.id));
        }
        let url = self
            .url
            .clone()
            .ok_or_else(|| FtpError::invalid_config("No URL for this session"))?;

        if !url.is_anonymous() && self.security.is_none() {
            self.select_mechanism(&url);
        }

        let username = url.username.clone().unwrap_or_else(|| "anonymous".into());
        let mut reply = self.execute(&format!("USER {}", username)).await?;
        if reply.class() == ReplyClass::Continue {
            let password = match (&url.password, url.is_anonymous()) {
                (Some(p), _) => p.clone(),
                (None, true) => self.options.anon_password.clone(),
                (None, false) => {
                    return Err(FtpError::auth_failed(format!(
                        "No password given for user '{}'",
                        username
                    )))
                }
            };
            reply = self.execute(&format!("PASS {}", password)).await?;
        }

        if !reply.is_success() {
            if reply.code == 530 && self.logged_in {
                log::info!("Already logged in");
                return Ok(LoginOutcome::AlreadyLoggedIn);
            }
            log::error!("Login failed: {}", reply.message());
            return Err(reply.into_error().with_session(&self.id));
        }

        self.logged_in = true;
        log::info!("Logged in to {} as {}", url.host, username);

        if let Some(level) = url.protection {
            if let Err(e) = self.set_protection_level(level).await {
                log::warn!("Could not set protection level: {}", e);
            }
        }

        self.homedir = self.getcurdir().await?;
        self.curdir = self.homedir.clone();
        self.prevdir = self.homedir.clone();
        if let Some(dir) = url.directory.as_deref() {
            if let Err(e) = self.chdir(dir).await {
                log::warn!("Could not change to initial directory {}: {}", dir, e);
            }
        }
        Ok(LoginOutcome::LoggedIn)
    }

    fn select_mechanism(&mut self, url: &FtpConnectionConfig) {
        let names = if url.mechanisms.is_empty() {
            &self.options.default_mechanisms
        } else {
            &url.mechanisms
        };
        let mut selected = None;
        for name in names {
            match mechanism_by_name(name) {
                Some(mech) => {
                    log::debug!("Using security mechanism {}", name);
                    selected = Some(mech);
                    break;
                }
                None => log::error!("Unknown security mechanism '{}'", name),
            }
        }
        if let Some(mech) = selected {
            self.security = Some(SecurityContext::new(mech));
        }
    }

    /// Install an already-established mechanism (its handshake done
    /// elsewhere) and the level used for commands from now on.
    pub fn install_security(
        &mut self,
        mech: Box<dyn SecurityMechanism>,
        command_prot: ProtectionLevel,
    ) {
        let mut ctx = SecurityContext::new(mech);
        ctx.command_prot = command_prot;
        self.security = Some(ctx);
    }

    /// Negotiate `PBSZ`/`PROT` for the data channel.
    pub async fn set_protection_level(&mut self, level: ProtectionLevel) -> FtpResult<()> {
        let (name, supported, buffer_size) = match self.security.as_ref() {
            Some(ctx) => (
                ctx.mechanism_name().to_string(),
                ctx.supports(level),
                ctx.buffer_size,
            ),
            None => return Err(FtpError::unsupported("No security mechanism in use")),
        };
        if !supported {
            return Err(FtpError::unsupported(format!(
                "{} does not support {} protection",
                name,
                level.name()
            )));
        }

        let mut negotiated = buffer_size;
        if level != ProtectionLevel::Clear {
            let r = self
                .execute(&format!("PBSZ {}", buffer_size))
                .await?
                .expect(ReplyClass::Complete)?;
            if let Some(pos) = r.last_line().find("PBSZ=") {
                let digits: String = r.last_line()[pos + 5..]
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect();
                if let Ok(n) = digits.parse::<usize>() {
                    negotiated = negotiated.min(n);
                }
            }
        }
        self.execute(&format!("PROT {}", level.prot_char()))
            .await?
            .expect(ReplyClass::Complete)?;

        if let Some(ctx) = self.security.as_mut() {
            ctx.buffer_size = negotiated;
            ctx.data_prot = level;
        }
        Ok(())
    }

    /// Reconnect to the same URL, log in again and return to the current
    /// directory.
    pub async fn reopen(&mut self) -> FtpResult<()> {
        let mut url = self
            .url
            .clone()
            .ok_or_else(|| FtpError::invalid_config("No URL to reopen"))?;
        if !self.curdir.is_empty() {
            url.directory = Some(self.curdir.clone());
        }
        log::info!("Reopening connection to {}", url.host);
        self.open(url).await?;
        self.login().await?;
        Ok(())
    }

    fn reopen_boxed(&mut self) -> Pin<Box<dyn Future<Output = FtpResult<()>> + Send + '_>> {
        Box::pin(self.reopen())
    }

    /// Say goodbye and close.
    pub async fn quit(&mut self) -> FtpResult<()> {
        if self.is_connected() {
            self.reply_timeout = Some(Duration::from_secs(10));
            self.set_tmp_verbosity(Verbosity::Command);
            if let Err(e) = self.execute("QUIT").await {
                log::debug!("QUIT: {}", e);
            }
        }
        self.close();
        Ok(())
    }

    /// Drop the connection without a `QUIT`.
    pub fn close(&mut self) {
        if self.is_connected() {
            log::debug!("Closing connection to {}", self.host_label());
        }
        self.reset_vars();
    }

    // ─── Command dispatch ────────────────────────────────────────

    async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        let shown = redact(cmd);
        if self.effective_verbosity() == Verbosity::Debug {
            log::info!("--> [{}] {}", self.host_label(), shown);
        } else {
            log::trace!("--> [{}] {}", self.host_label(), shown);
        }

        let line = match self.security.as_mut() {
            Some(ctx) => ctx.wrap_command(cmd)?,
            None => cmd.to_string(),
        };
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(FtpError::no_control_connection)?;
        if let Err(e) = codec.send_command(&line).await {
            log::error!("Lost control connection: {}", e);
            self.close();
            return Err(FtpError::disconnected(format!("Lost control connection: {}", e)));
        }
        Ok(())
    }

    /// Send one command and read its reply.
    ///
    /// A `421` is answered by reopening the session and resubmitting the
    /// command once, if auto-reconnect is on and the session was logged
    /// in; the returned reply then has `reconnected` set.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        if !self.is_connected() {
            self.last_reply = None;
            return Err(FtpError::no_control_connection().with_session(&self.id));
        }

        let mut reconnected = false;
        loop {
            self.send_command(cmd).await?;
            let mut resp = self.read_reply().await?;

            if resp.code == 421 {
                let is_quit = cmd.trim().eq_ignore_ascii_case("QUIT");
                if self.options.auto_reconnect && self.logged_in && !is_quit {
                    if reconnected {
                        log::error!("Reconnect failed");
                        self.close();
                        return Err(FtpError::from_reply(421, "Reconnect failed")
                            .with_session(&self.id));
                    }
                    log::warn!("Server closed the connection, reconnecting...");
                    self.reopen_boxed().await?;
                    reconnected = true;
                    continue;
                }
                let err = resp.into_error().with_session(&self.id);
                self.close();
                return Err(err);
            }

            resp.reconnected = reconnected;
            return Ok(resp);
        }
    }

    /// Send a command and require a reply of `class`.
    pub async fn expect(&mut self, cmd: &str, class: ReplyClass) -> FtpResult<FtpResponse> {
        self.execute(cmd).await?.expect(class)
    }

    /// Read one reply under the reply timeout.
    ///
    /// A timeout or a lost connection closes the session. An interrupt
    /// escalation unwinds with `Cancelled`.
    pub async fn read_reply(&mut self) -> FtpResult<FtpResponse> {
        let interrupts = self.interrupts.clone();
        let limit = self.reply_timeout;
        let codec = match self.codec.as_mut() {
            Some(c) => c,
            None => return Err(FtpError::no_control_connection().with_session(&self.id)),
        };
        let security = self.security.as_mut();

        let outcome = tokio::select! {
            r = with_deadline(limit, "Reply", codec.read_response(security)) => Some(r),
            _ = interrupts.escalated() => None,
        };

        match outcome {
            None => {
                self.handle_escalation().await;
                Err(FtpError::cancelled("Command aborted").with_session(&self.id))
            }
            Some(Err(e)) => {
                match e.kind {
                    FtpErrorKind::Timeout => {
                        log::error!(
                            "Tired of waiting for reply, timeout after {} seconds",
                            limit.map(|d| d.as_secs()).unwrap_or(0)
                        );
                        self.close();
                    }
                    FtpErrorKind::Disconnected | FtpErrorKind::IoError => {
                        log::error!("{}", e.message);
                        self.close();
                    }
                    _ => {}
                }
                self.last_reply = None;
                Err(e.with_session(&self.id))
            }
            Some(Ok(resp)) => {
                self.print_reply(&resp);
                self.last_reply = Some(resp.clone());
                self.tmp_verbosity = None;
                Ok(resp)
            }
        }
    }

    async fn handle_escalation(&mut self) {
        match self.interrupts.policy() {
            InterruptPolicy::Close => {
                log::warn!("Closing connection to {}", self.host_label());
                self.close();
            }
            InterruptPolicy::Abort => {
                log::warn!("Command aborted");
                self.flush_reply().await;
            }
            InterruptPolicy::Jump => {}
        }
        self.interrupts.reset();
    }

    /// Read and log replies for as long as the server has more to say.
    pub async fn flush_reply(&mut self) {
        loop {
            let codec = match self.codec.as_mut() {
                Some(c) if c.has_pending() => c,
                _ => return,
            };
            let security = self.security.as_mut();
            let r = with_deadline(
                Some(Duration::from_secs(1)),
                "Reply",
                codec.read_response(security),
            )
            .await;
            match r {
                Ok(resp) => {
                    self.print_reply(&resp);
                    self.last_reply = Some(resp);
                }
                Err(e) => {
                    log::debug!("flush_reply: {}", e);
                    if e.kind == FtpErrorKind::Disconnected {
                        self.close();
                    }
                    return;
                }
            }
        }
    }

    pub(crate) fn print_reply(&self, resp: &FtpResponse) {
        let host = self.host_label();
        for line in &resp.lines {
            log::trace!("<-- [{}] {}", host, line);
        }
        let v = self.effective_verbosity();
        let class = resp.class();
        if v == Verbosity::Debug {
            for line in &resp.lines {
                log::info!("<-- [{}] {}", host, line);
            }
        } else if v >= Verbosity::Command
            || (v == Verbosity::Error && class >= ReplyClass::Transient)
        {
            if class >= ReplyClass::Transient {
                log::warn!("{}", resp.message());
            } else {
                log::info!("{}", resp.message());
            }
        }
    }
}

/// Hide the argument of `PASS`.
fn redact(cmd: &str) -> String {
    match cmd.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("PASS ") => "PASS ********".to_string(),
        _ => cmd.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_redacted() {
        assert_eq!(redact("PASS hunter2"), "PASS ********");
        assert_eq!(redact("pass x"), "PASS ********");
        assert_eq!(redact("PASV"), "PASV");
        assert_eq!(redact("USER bob"), "USER bob");
    }

    #[tokio::test]
    async fn execute_without_connection() {
        let mut s = FtpSession::new(ClientOptions::default());
        let err = s.execute("NOOP").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::NoControlConnection);
        assert_eq!(s.reply_code(), 0);
        assert_eq!(s.reply_class(), ReplyClass::None);
    }

    #[test]
    fn tmp_verbosity_only_when_quiet() {
        let mut s = FtpSession::new(ClientOptions::default());
        s.set_tmp_verbosity(Verbosity::Command);
        assert_eq!(s.effective_verbosity(), Verbosity::Command);

        let mut loud = FtpSession::new(ClientOptions {
            verbosity: Verbosity::Debug,
            ..ClientOptions::default()
        });
        loud.set_tmp_verbosity(Verbosity::None);
        assert_eq!(loud.effective_verbosity(), Verbosity::Debug);
    }

    #[test]
    fn passive_follows_url_override() {
        let mut s = FtpSession::new(ClientOptions::default());
        assert!(s.is_passive());
        s.url = Some(FtpConnectionConfig {
            passive: Some(false),
            ..FtpConnectionConfig::new("h")
        });
        assert!(!s.is_passive());
    }

    #[test]
    fn containing_dir_of_bare_name_is_curdir() {
        let mut s = FtpSession::new(ClientOptions::default());
        s.curdir = "/pub".into();
        s.homedir = "/".into();
        s.mark_containing_for_flush("x");
        s.mark_containing_for_flush("/pub/y");
        s.mark_containing_for_flush("sub/z");
        assert_eq!(s.cache().pending(), &["/pub".to_string(), "/pub/sub".to_string()]);
    }
}
