//! In-process FTP server for the integration tests.
//!
//! Speaks enough RFC 959 over loopback to drive the client: PASV and PORT
//! data channels, an in-memory file tree, and a few switches for
//! misbehaving (421 hang-ups, silence, never-ending downloads).

#![allow(dead_code)]

use ftpkit_core::{ClientOptions, FtpConnectionConfig, FtpSession};
use socket2::{SockRef, Socket};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
pub struct MockFs {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
}

impl MockFs {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn listing(&self, dir: &str) -> String {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        let direct = |p: &&String| {
            p.len() > prefix.len() && p.starts_with(&prefix) && !p[prefix.len()..].contains('/')
        };

        let mut lines = Vec::new();
        for d in self.dirs.iter().filter(|p| direct(p)) {
            lines.push(format!(
                "drwxr-xr-x    2 ftp      ftp          4096 Jan 15  2024 {}",
                &d[prefix.len()..]
            ));
        }
        for (f, body) in self.files.iter().filter(|(p, _)| direct(p)) {
            lines.push(format!(
                "-rw-r--r--    1 ftp      ftp      {:>8} Jan 15  2024 {}",
                body.len(),
                &f[prefix.len()..]
            ));
        }
        let mut out = format!("total {}\r\n", lines.len());
        for l in lines {
            out.push_str(&l);
            out.push_str("\r\n");
        }
        out
    }
}

#[derive(Default)]
pub struct MockState {
    pub fs: Mutex<MockFs>,
    pub commands: Mutex<Vec<String>>,
    pub connections: AtomicUsize,
    /// Answer the next command with 421 and hang up.
    pub drop_next: AtomicBool,
    /// Read commands but never answer.
    pub hang: AtomicBool,
    /// RETR streams data until ABOR arrives.
    pub endless_retr: AtomicBool,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        state.fs.lock().unwrap().dirs.insert("/".into());

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.connections.fetch_add(1, SeqCst);
                tokio::spawn(serve(stream, shared.clone()));
            }
        });
        Self { addr, state }
    }

    pub fn config(&self) -> FtpConnectionConfig {
        FtpConnectionConfig {
            port: self.addr.port(),
            username: Some("tester".into()),
            password: Some("secret".into()),
            ..FtpConnectionConfig::new("127.0.0.1")
        }
    }

    /// A logged-in session with default options.
    pub async fn session(&self) -> FtpSession {
        self.session_with(self.config()).await
    }

    pub async fn session_with(&self, config: FtpConnectionConfig) -> FtpSession {
        let mut s = FtpSession::new(ClientOptions::default());
        s.open(config).await.unwrap();
        s.login().await.unwrap();
        s
    }

    pub fn add_dir(&self, path: &str) {
        self.state.fs.lock().unwrap().dirs.insert(path.into());
    }

    pub fn add_file(&self, path: &str, body: &[u8]) {
        self.state
            .fs
            .lock()
            .unwrap()
            .files
            .insert(path.into(), body.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.fs.lock().unwrap().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.fs.lock().unwrap().dirs.contains(path)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    /// Commands received that start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

/// Printable ASCII only: drops CRLF and the Telnet bytes before ABOR.
fn clean(line: &[u8]) -> String {
    line.iter()
        .filter(|b| b.is_ascii() && !b.is_ascii_control())
        .map(|&b| b as char)
        .collect()
}

enum Data {
    Passive(TcpListener),
    Active(SocketAddr),
}

struct Conn {
    state: Arc<MockState>,
    wr: OwnedWriteHalf,
    cwd: String,
    data: Option<Data>,
    rest: u64,
    ascii: bool,
    rename_from: Option<String>,
}

async fn serve(stream: TcpStream, state: Arc<MockState>) {
    let (rd, wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut conn = Conn {
        state: state.clone(),
        wr,
        cwd: "/".into(),
        data: None,
        rest: 0,
        ascii: false,
        rename_from: None,
    };
    conn.reply("220 mock FTP server ready").await;

    let mut line = Vec::new();
    loop {
        line.clear();
        match rd.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let text = clean(&line);
        if text.is_empty() {
            continue;
        }
        state.commands.lock().unwrap().push(text.clone());
        if state.hang.load(SeqCst) {
            continue;
        }
        if state.drop_next.swap(false, SeqCst) {
            conn.reply("421 Service not available, closing control connection")
                .await;
            return;
        }

        let (verb, arg) = match text.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (text.to_ascii_uppercase(), String::new()),
        };
        if !conn.handle(&verb, &arg, &mut rd).await {
            return;
        }
    }
}

impl Conn {
    async fn reply(&mut self, text: &str) {
        let _ = self.wr.write_all(format!("{}\r\n", text).as_bytes()).await;
    }

    fn abs(&self, arg: &str) -> String {
        let p = if arg.starts_with('/') {
            arg.to_string()
        } else if self.cwd == "/" {
            format!("/{}", arg)
        } else {
            format!("{}/{}", self.cwd, arg)
        };
        if p.len() > 1 {
            p.trim_end_matches('/').to_string()
        } else {
            p
        }
    }

    fn parent(path: &str) -> String {
        match path.rfind('/') {
            Some(0) | None => "/".into(),
            Some(i) => path[..i].into(),
        }
    }

    async fn open_data(&mut self) -> Option<TcpStream> {
        match self.data.take()? {
            Data::Passive(listener) => listener.accept().await.ok().map(|(s, _)| s),
            Data::Active(addr) => TcpStream::connect(addr).await.ok(),
        }
    }

    /// Returns false when the connection should end.
    async fn handle(&mut self, verb: &str, arg: &str, rd: &mut BufReader<OwnedReadHalf>) -> bool {
        match verb {
            "USER" => self.reply("331 Please specify the password.").await,
            "PASS" => self.reply("230 Login successful.").await,
            "SYST" => self.reply("215 UNIX Type: L8").await,
            "PWD" => {
                let r = format!("257 \"{}\" is the current directory", self.cwd);
                self.reply(&r).await
            }
            "CWD" => {
                let target = if arg == ".." {
                    Self::parent(&self.cwd)
                } else {
                    self.abs(arg)
                };
                let ok = self.state.fs.lock().unwrap().dirs.contains(&target);
                if ok {
                    self.cwd = target;
                    self.reply("250 OK").await
                } else {
                    self.reply("550 Failed to change directory.").await
                }
            }
            "CDUP" => {
                self.cwd = Self::parent(&self.cwd);
                self.reply("250 OK").await
            }
            "TYPE" => {
                self.ascii = arg.eq_ignore_ascii_case("A");
                let r = if self.ascii {
                    "200 Switching to ASCII mode."
                } else {
                    "200 Switching to Binary mode."
                };
                self.reply(r).await
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                self.data = Some(Data::Passive(listener));
                let r = format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{}).",
                    port >> 8,
                    port & 0xff
                );
                self.reply(&r).await
            }
            "PORT" => {
                let n: Vec<u8> = arg.split(',').filter_map(|x| x.trim().parse().ok()).collect();
                if n.len() != 6 {
                    self.reply("501 Illegal PORT command.").await;
                } else {
                    let ip = Ipv4Addr::new(n[0], n[1], n[2], n[3]);
                    let port = u16::from(n[4]) << 8 | u16::from(n[5]);
                    self.data = Some(Data::Active(SocketAddr::V4(SocketAddrV4::new(ip, port))));
                    self.reply("200 PORT command successful.").await
                }
            }
            "REST" => match arg.parse() {
                Ok(n) => {
                    self.rest = n;
                    let r = format!("350 Restart position accepted ({}).", n);
                    self.reply(&r).await
                }
                Err(_) => self.reply("501 Bad REST argument.").await,
            },
            "MLSD" => {
                self.data = None;
                self.reply("500 Unknown command.").await
            }
            "LIST" | "NLST" => {
                let dir = if arg.is_empty() || arg.starts_with('-') {
                    self.cwd.clone()
                } else {
                    self.abs(arg)
                };
                let listing = self.state.fs.lock().unwrap().listing(&dir);
                self.send_data("150 Here comes the directory listing.", listing.into_bytes())
                    .await;
            }
            "RETR" => {
                let path = self.abs(arg);
                let body = self.state.fs.lock().unwrap().files.get(&path).cloned();
                let body = match body {
                    Some(b) => b,
                    None => {
                        self.data = None;
                        self.reply("550 Failed to open file.").await;
                        return true;
                    }
                };
                let start = (std::mem::take(&mut self.rest) as usize).min(body.len());
                let mut wire = Vec::new();
                for &b in &body[start..] {
                    if self.ascii && b == b'\n' {
                        wire.push(b'\r');
                    }
                    wire.push(b);
                }
                let r = format!(
                    "150 Opening {} mode data connection for {} ({} bytes).",
                    if self.ascii { "ASCII" } else { "BINARY" },
                    arg,
                    body.len()
                );
                if self.state.endless_retr.load(SeqCst) {
                    return self.stream_until_abort(&r, rd).await;
                }
                self.send_data(&r, wire).await;
            }
            "STOR" | "APPE" | "STOU" => self.receive_upload(verb, arg).await,
            "SIZE" => {
                let size = self.state.fs.lock().unwrap().files.get(&self.abs(arg)).map(Vec::len);
                match size {
                    Some(n) => self.reply(&format!("213 {}", n)).await,
                    None => self.reply("550 Could not get file size.").await,
                }
            }
            "MDTM" => {
                let ok = self.state.fs.lock().unwrap().files.contains_key(&self.abs(arg));
                if ok {
                    self.reply("213 20240115103000").await
                } else {
                    self.reply("550 Could not get file modification time.").await
                }
            }
            "MKD" => {
                let path = self.abs(arg);
                let created = {
                    let mut fs = self.state.fs.lock().unwrap();
                    if fs.exists(&path) || !fs.dirs.contains(&Self::parent(&path)) {
                        false
                    } else {
                        fs.dirs.insert(path)
                    }
                };
                if created {
                    self.reply(&format!("257 \"{}\" created", arg)).await
                } else {
                    self.reply("550 Create directory operation failed.").await
                }
            }
            "RMD" => {
                let removed = self.state.fs.lock().unwrap().dirs.remove(&self.abs(arg));
                if removed {
                    self.reply("250 Remove directory operation successful.").await
                } else {
                    self.reply("550 Remove directory operation failed.").await
                }
            }
            "DELE" => {
                let removed = self.state.fs.lock().unwrap().files.remove(&self.abs(arg));
                if removed.is_some() {
                    self.reply("250 Delete operation successful.").await
                } else {
                    self.reply("550 Delete operation failed.").await
                }
            }
            "RNFR" => {
                let path = self.abs(arg);
                if self.state.fs.lock().unwrap().exists(&path) {
                    self.rename_from = Some(path);
                    self.reply("350 Ready for RNTO.").await
                } else {
                    self.reply("550 RNFR command failed.").await
                }
            }
            "RNTO" => {
                let to = self.abs(arg);
                let moved = match self.rename_from.take() {
                    Some(from) => {
                        let mut fs = self.state.fs.lock().unwrap();
                        if let Some(body) = fs.files.remove(&from) {
                            fs.files.insert(to, body);
                            true
                        } else if fs.dirs.remove(&from) {
                            fs.dirs.insert(to);
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                };
                if moved {
                    self.reply("250 Rename successful.").await
                } else {
                    self.reply("503 RNFR required first.").await
                }
            }
            "SITE" => {
                if arg.to_ascii_uppercase().starts_with("CHMOD") {
                    self.reply("200 SITE CHMOD command ok.").await
                } else {
                    self.reply("502 SITE command not implemented.").await
                }
            }
            "NOOP" => self.reply("200 NOOP ok.").await,
            "HELP" => {
                self.reply("214-The following commands are recognized.").await;
                self.reply(" ABOR CDUP CWD DELE LIST MKD NOOP PASV PORT PWD QUIT RETR STOR").await;
                self.reply("214 Help OK.").await
            }
            "ABOR" => self.reply("225 No transfer to abort.").await,
            "QUIT" => {
                self.reply("221 Goodbye.").await;
                return false;
            }
            _ => self.reply("502 Command not implemented.").await,
        }
        true
    }

    async fn send_data(&mut self, preliminary: &str, body: Vec<u8>) {
        if self.data.is_none() {
            self.reply("425 Use PORT or PASV first.").await;
            return;
        }
        self.reply(preliminary).await;
        match self.open_data().await {
            Some(mut d) => {
                let _ = d.write_all(&body).await;
                let _ = d.shutdown().await;
                drop(d);
                self.reply("226 Transfer complete.").await
            }
            None => self.reply("425 Can't open data connection.").await,
        }
    }

    async fn receive_upload(&mut self, verb: &str, arg: &str) {
        if self.data.is_none() {
            self.reply("425 Use PORT or PASV first.").await;
            return;
        }
        let (path, preliminary) = if verb == "STOU" {
            let base = self.abs(arg);
            let fs = self.state.fs.lock().unwrap();
            let mut n = 1;
            while fs.exists(&format!("{}.{}", base, n)) {
                n += 1;
            }
            let path = format!("{}.{}", base, n);
            let name = path.rsplit('/').next().unwrap_or_default().to_string();
            (path, format!("150 FILE: {}", name))
        } else {
            (self.abs(arg), "150 Ok to send data.".to_string())
        };
        if !self.state.fs.lock().unwrap().dirs.contains(&Self::parent(&path)) {
            self.data = None;
            self.reply("553 Could not create file.").await;
            return;
        }
        self.reply(&preliminary).await;

        let mut d = match self.open_data().await {
            Some(d) => d,
            None => return self.reply("425 Can't open data connection.").await,
        };
        let mut wire = Vec::new();
        let _ = d.read_to_end(&mut wire).await;
        drop(d);

        let mut body = Vec::with_capacity(wire.len());
        for (i, &b) in wire.iter().enumerate() {
            if self.ascii && b == b'\r' && wire.get(i + 1) == Some(&b'\n') {
                continue;
            }
            body.push(b);
        }

        let rest = std::mem::take(&mut self.rest) as usize;
        {
            let mut fs = self.state.fs.lock().unwrap();
            let entry = fs.files.entry(path).or_default();
            match verb {
                "APPE" => entry.extend_from_slice(&body),
                _ if rest > 0 => {
                    entry.truncate(rest);
                    entry.extend_from_slice(&body);
                }
                _ => *entry = body,
            }
        }
        self.reply("226 Transfer complete.").await
    }

    /// Pour data into the channel until the client sends ABOR.
    async fn stream_until_abort(
        &mut self,
        preliminary: &str,
        rd: &mut BufReader<OwnedReadHalf>,
    ) -> bool {
        if self.data.is_none() {
            self.reply("425 Use PORT or PASV first.").await;
            return true;
        }
        self.reply(preliminary).await;
        let mut d = match self.open_data().await {
            Some(d) => d,
            None => {
                self.reply("425 Can't open data connection.").await;
                return true;
            }
        };

        // The client's Telnet IP arrives as urgent data. A read stops at
        // the urgent mark and tokio then loses read readiness, so the
        // control socket is polled with plain non-blocking recv calls.
        let mut line = rd.buffer().to_vec();
        rd.consume(line.len());
        let chunk = vec![b'x'; 4096];
        let mut buf = [0u8; 512];
        loop {
            tokio::select! {
                r = d.write_all(&chunk) => if r.is_err() {
                    self.reply("426 Connection closed; transfer aborted.").await;
                    return true;
                },
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            }

            let read = {
                let sock = SockRef::from(rd.get_ref().as_ref());
                let mut socket: &Socket = &sock;
                socket.read(&mut buf)
            };
            match read {
                Ok(0) => return false,
                Ok(n) => line.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(_) => return false,
            }

            while let Some(end) = line.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = line.drain(..=end).collect();
                let text = clean(&raw);
                self.state.commands.lock().unwrap().push(text.clone());
                if text.to_ascii_uppercase().ends_with("ABOR") {
                    drop(d);
                    self.reply("426 Connection closed; transfer aborted.").await;
                    self.reply("226 Abort successful.").await;
                    return true;
                }
            }
        }
    }
}
