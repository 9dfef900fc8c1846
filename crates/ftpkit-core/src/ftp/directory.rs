//! Directory operations (CWD, MKD, RMD, rename and friends) plus fetching
//! listings through the cache.
//!
//! Mutating commands mark the affected directories for flush right after
//! a successful reply; the cache drops them at the end of the command cycle.

use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser::{self, ListingDialect};
use crate::ftp::path;
use crate::ftp::remote::{RemoteDirectory, RemoteFile};
use crate::ftp::types::*;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// CWD replies that already name the new directory.
const CWD_REPLY_PREFIXES: [&str; 3] = [
    // Troll-ftpd
    "250 Changed to ",
    // PureFTPd
    "250 OK. Current directory is ",
    // Serv-U
    "250 Directory changed to ",
];

impl FtpSession {
    // ─── PWD / CWD ───────────────────────────────────────────────

    /// Ask the server for the working directory. A reply without a quoted
    /// path yields `CWD?`.
    pub async fn getcurdir(&mut self) -> FtpResult<String> {
        self.set_tmp_verbosity(Verbosity::None);
        let resp = self.execute("PWD").await?;
        if resp.class() != ReplyClass::Complete {
            return Ok("CWD?".to_string());
        }
        Ok(quoted_path(&resp.text())
            .map(|p| path::dos2unix(path::strip_slash(p)))
            .unwrap_or_else(|| "CWD?".to_string()))
    }

    fn update_curdir(&mut self, dir: &str) {
        self.prevdir = std::mem::replace(&mut self.curdir, path::dos2unix(dir));
    }

    /// `CWD`. The new directory is taken from the reply when the server
    /// names it, otherwise from a `PWD`.
    pub async fn chdir(&mut self, dir: &str) -> FtpResult<()> {
        self.set_tmp_verbosity(Verbosity::Command);
        let resp = self.execute(&format!("CWD {}", dir)).await?;
        if resp.class() != ReplyClass::Complete {
            return Err(resp.into_error().with_session(&self.id));
        }

        let line = resp.last_line().trim_end();
        let parsed = CWD_REPLY_PREFIXES
            .iter()
            .find_map(|prefix| {
                line.get(..prefix.len())
                    .filter(|head| head.eq_ignore_ascii_case(prefix))
                    .map(|_| line[prefix.len()..].to_string())
            })
            .or_else(|| {
                // WarFTPD: 250 "/foo/bar/" is current directory
                if line.contains(" is current directory") {
                    quoted_path(line).map(|p| path::strip_slash(p).to_string())
                } else {
                    None
                }
            });

        match parsed {
            Some(p) => {
                self.update_curdir(&p);
                log::trace!("Parsed cwd '{}' from reply", self.curdir);
            }
            None => {
                let cur = self.getcurdir().await?;
                self.update_curdir(&cur);
            }
        }
        Ok(())
    }

    pub async fn cdup(&mut self) -> FtpResult<()> {
        self.set_tmp_verbosity(Verbosity::Command);
        let resp = self.execute("CDUP").await?;
        if resp.class() != ReplyClass::Complete {
            return Err(resp.into_error().with_session(&self.id));
        }
        let cur = self.getcurdir().await?;
        self.update_curdir(&cur);
        Ok(())
    }

    /// `PWD` with the reply shown to the user.
    pub async fn pwd(&mut self) -> FtpResult<FtpResponse> {
        self.set_tmp_verbosity(Verbosity::Command);
        self.execute("PWD").await
    }

    // ─── MKD / RMD ───────────────────────────────────────────────

    async fn mkdir_verb(&mut self, dir: &str, verb: Verbosity) -> FtpResult<FtpResponse> {
        let p = path::strip_slash(dir).to_string();
        self.set_tmp_verbosity(verb);
        let resp = self.execute(&format!("MKD {}", p)).await?;
        if resp.class() == ReplyClass::Complete {
            self.mark_containing_for_flush(&p);
        }
        Ok(resp)
    }

    pub async fn mkdir(&mut self, dir: &str) -> FtpResult<()> {
        let resp = self.mkdir_verb(dir, Verbosity::Error).await?;
        resp.expect(ReplyClass::Complete).map(|_| ())
    }

    /// Create `dir` and every missing parent. Components inside the current
    /// directory or the previously created path are skipped. Returns
    /// whether any directory was created.
    pub async fn mkpath(&mut self, dir: &str) -> FtpResult<bool> {
        if self.already_made(dir) {
            return Ok(false);
        }

        let collapsed = path::collapse(dir);
        let mut built = if collapsed.starts_with('/') {
            Some(String::new())
        } else {
            None
        };
        let mut created = false;
        for comp in collapsed.split('/').filter(|c| !c.is_empty()) {
            let next = match built.take() {
                Some(prefix) => format!("{}/{}", prefix, comp),
                None => comp.to_string(),
            };
            built = Some(next.clone());

            if self.already_made(&next) || next == "." {
                continue;
            }
            let resp = self.mkdir_verb(&next, Verbosity::None).await?;
            created |= resp.class() == ReplyClass::Complete;
        }

        self.last_mkpath = Some(self.path_absolute(dir));
        Ok(created)
    }

    /// `p` lies on the last path made, or on the way to the current directory.
    fn already_made(&self, p: &str) -> bool {
        let on_last = self
            .last_mkpath
            .as_deref()
            .map(|last| path::is_prefix_dir(p, last))
            .unwrap_or(false);
        on_last || path::is_prefix_dir(p, &self.curdir)
    }

    pub async fn rmdir(&mut self, dir: &str) -> FtpResult<()> {
        let p = path::strip_slash(dir).to_string();
        self.set_tmp_verbosity(Verbosity::Error);
        let resp = self.execute(&format!("RMD {}", p)).await?;
        if resp.class() != ReplyClass::Complete {
            return Err(resp.into_error().with_session(&self.id));
        }
        self.mark_for_flush(&p);
        self.mark_containing_for_flush(&p);
        Ok(())
    }

    // ─── DELE / SITE CHMOD / RNFR+RNTO ───────────────────────────

    pub async fn unlink(&mut self, file: &str) -> FtpResult<()> {
        let resp = self.execute(&format!("DELE {}", file)).await?;
        if resp.class() != ReplyClass::Complete {
            return Err(resp.into_error().with_session(&self.id));
        }
        self.mark_containing_for_flush(file);
        Ok(())
    }

    /// `SITE CHMOD <mode> <path>`; mode is passed through as given.
    pub async fn chmod(&mut self, file: &str, mode: &str) -> FtpResult<()> {
        if !self.features.site_chmod {
            log::error!("Server doesn't support SITE CHMOD");
            return Err(FtpError::unsupported("Server doesn't support SITE CHMOD"));
        }
        self.set_tmp_verbosity(Verbosity::None);
        let resp = self.execute(&format!("SITE CHMOD {} {}", mode, file)).await?;
        if resp.code == 502 {
            self.features.site_chmod = false;
        }
        if resp.class() != ReplyClass::Complete {
            return Err(resp.into_error().with_session(&self.id));
        }
        self.mark_containing_for_flush(file);
        Ok(())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let from = path::strip_slash(from).to_string();
        let to = path::strip_slash(to).to_string();

        let resp = self.execute(&format!("RNFR {}", from)).await?;
        if resp.class() != ReplyClass::Continue {
            return Err(resp.into_error().with_session(&self.id));
        }
        let resp = self.execute(&format!("RNTO {}", to)).await?;
        if resp.class() != ReplyClass::Complete {
            return Err(resp.into_error().with_session(&self.id));
        }
        self.mark_containing_for_flush(&from);
        self.mark_containing_for_flush(&to);
        Ok(())
    }

    // ─── SITE IDLE / NOOP / HELP ─────────────────────────────────

    pub async fn idle(&mut self, seconds: Option<&str>) -> FtpResult<()> {
        if !self.features.site_idle {
            log::error!("Server doesn't support SITE IDLE");
            return Err(FtpError::unsupported("Server doesn't support SITE IDLE"));
        }
        self.set_tmp_verbosity(Verbosity::Command);
        let cmd = match seconds {
            Some(s) => format!("SITE IDLE {}", s),
            None => "SITE IDLE".to_string(),
        };
        let resp = self.execute(&cmd).await?;
        if resp.code == 502 {
            self.features.site_idle = false;
        }
        resp.expect(ReplyClass::Complete).map(|_| ())
    }

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.set_tmp_verbosity(Verbosity::Command);
        self.expect("NOOP", ReplyClass::Complete).await.map(|_| ())
    }

    pub async fn help(&mut self, topic: Option<&str>) -> FtpResult<FtpResponse> {
        self.set_tmp_verbosity(Verbosity::Command);
        let cmd = match topic {
            Some(t) => format!("HELP {}", t),
            None => "HELP".to_string(),
        };
        self.expect(&cmd, ReplyClass::Complete).await
    }

    // ─── SIZE / MDTM ─────────────────────────────────────────────

    /// Remote size via `SIZE` (in binary type, where it is exact).
    /// `None` when the server can't tell.
    pub async fn filesize(&mut self, file: &str) -> FtpResult<Option<u64>> {
        if !self.features.size {
            return Ok(None);
        }
        self.set_type(TransferType::Binary).await?;
        self.set_tmp_verbosity(Verbosity::Error);
        let resp = self.execute(&format!("SIZE {}", file)).await?;
        if resp.code == 502 {
            self.features.size = false;
            return Ok(None);
        }
        if resp.class() != ReplyClass::Complete {
            return Ok(None);
        }
        Ok(resp
            .message()
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok()))
    }

    /// Modification time via `MDTM`, always UTC.
    pub async fn filetime(&mut self, file: &str) -> FtpResult<Option<DateTime<Utc>>> {
        if !self.is_connected() {
            return Err(FtpError::no_control_connection().with_session(&self.id));
        }
        if !self.features.mdtm {
            return Ok(None);
        }
        self.set_tmp_verbosity(Verbosity::None);
        let resp = self.execute(&format!("MDTM {}", file)).await?;
        if resp.code == 202 {
            self.features.mdtm = false;
            return Ok(None);
        }
        if resp.code != 213 {
            return Ok(None);
        }
        Ok(parse_mdtm(resp.message()))
    }

    // ─── Listings ────────────────────────────────────────────────

    /// Fetch and cache the listing of `dir`, bypassing the cache.
    pub async fn read_directory(&mut self, dir: &str) -> FtpResult<&RemoteDirectory> {
        let abs = path::strip_slash(&self.path_absolute(dir)).to_string();
        let is_curdir = abs == self.curdir;

        // List from inside the directory: some servers list a directory
        // argument as the entry itself, and links to directories need it.
        if !is_curdir {
            let resp = self.execute(&format!("CWD {}", abs)).await?;
            if resp.class() != ReplyClass::Complete {
                return Err(resp.into_error().with_session(&self.id));
            }
        }

        let mlsd = if self.features.mlsd {
            let r = self.list("MLSD", None).await;
            if r.is_err() && self.reply_class() == ReplyClass::Error {
                self.features.mlsd = false;
            }
            Some(r)
        } else {
            None
        };
        let outcome = match mlsd {
            Some(r) if self.features.mlsd => r.map(|raw| (raw, true)),
            _ => self.list("LIST", None).await.map(|raw| (raw, false)),
        };

        if !is_curdir && self.is_connected() {
            let back = self.curdir.clone();
            if let Err(e) = self.execute(&format!("CWD {}", back)).await {
                log::warn!("Could not return to {}: {}", back, e);
            }
        }

        let (raw, is_mlsd) = outcome?;
        let text = String::from_utf8_lossy(&raw);
        let start = if is_mlsd {
            ListingDialect::Mlsd
        } else {
            self.dialect
        };
        let (parsed, dialect) = parser::parse_listing(&text, &abs, start);
        if !is_mlsd {
            self.dialect = dialect;
        }
        let rdir = parsed.map_err(|e| e.with_session(&self.id))?;

        log::trace!("added directory '{}' to cache", abs);
        self.cache.insert(rdir);
        self.cache
            .get_directory(&abs)
            .ok_or_else(|| FtpError::not_found(format!("{}: not cached", abs)))
    }

    /// Listing of `dir`, from the cache when present.
    pub async fn get_directory(&mut self, dir: &str) -> FtpResult<&RemoteDirectory> {
        let abs = path::strip_slash(&self.path_absolute(dir)).to_string();
        if self.cache.contains(&abs) {
            return self
                .cache
                .get_directory(&abs)
                .ok_or_else(|| FtpError::not_found(format!("{}: not cached", abs)));
        }
        self.read_directory(&abs).await
    }

    /// Entry for `file`, reading its directory if needed. A directory that
    /// can't be listed yields `None`; lost connections still fail.
    pub async fn get_file(&mut self, file: &str) -> FtpResult<Option<RemoteFile>> {
        let abs = path::strip_slash(&self.path_absolute(file)).to_string();
        if let Some(f) = self.cache.get_file(&abs) {
            return Ok(Some(f.clone()));
        }
        let dir = path::base_dir(&abs).unwrap_or("/").to_string();
        let name = path::base_name(&abs).to_string();
        match self.get_directory(&dir).await {
            Ok(rdir) => Ok(rdir.get_file(&name).cloned()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::debug!("get_file {}: {}", abs, e);
                Ok(None)
            }
        }
    }

    /// Whether `file` is a directory: `Some(true)`/`Some(false)` when known,
    /// `None` for a link whose target isn't cached.
    pub fn maybe_isdir(&mut self, file: &RemoteFile) -> Option<bool> {
        if file.is_dir() {
            return Some(true);
        }
        if !file.is_link() {
            return Some(false);
        }
        let target = file.link.as_deref()?;
        let dir = path::base_dir(&file.path).unwrap_or("/").to_string();
        let abs = path::absolute(target, &dir, &self.homedir);
        self.cache.get_file(&abs).map(RemoteFile::is_dir)
    }
}

/// Text between the first pair of double quotes.
fn quoted_path(text: &str) -> Option<&str> {
    let start = text.find('"')? + 1;
    let len = text[start..].find('"')?;
    Some(&text[start..start + len])
}

/// `YYYYMMDDHHMMSS[.sss]` from an `MDTM` reply.
fn parse_mdtm(text: &str) -> Option<DateTime<Utc>> {
    let stamp = text.split_whitespace().next()?.get(..14)?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .ok()
        .map(|t| Utc.from_utc_datetime(&t))
}
