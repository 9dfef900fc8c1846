//! `LIST` / `MLSD` output parsing.
//!
//! Supports:
//! - Unix `ls -l` style, including `ls -lG` and the MacOS WebStar variant
//! - DOS / IIS style (`MM-DD-YY  HH:MMAM  <DIR>  name`)
//! - EPLF (`+facts,\tname`)
//! - MLSD (RFC 3659 `fact=value;... name`)
//!
//! Servers don't announce their format, so the parser guesses: each line is
//! tried with the dialect that worked last, then the next one in the ring
//! Unix → DOS → EPLF → MLSD → Unix, at most four attempts per line.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::path;
use crate::ftp::remote::{perm_to_string, RemoteDirectory, RemoteFile};
use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Which `LIST` format the server speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ListingDialect {
    #[default]
    Unknown,
    Unix,
    Dos,
    Eplf,
    Mlsd,
}

impl ListingDialect {
    /// The dialect tried after this one fails.
    pub fn next(self) -> Self {
        match self {
            Self::Unknown | Self::Mlsd => Self::Unix,
            Self::Unix => Self::Dos,
            Self::Dos => Self::Eplf,
            Self::Eplf => Self::Mlsd,
        }
    }
}

/// One successfully parsed line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEntry {
    File(RemoteFile),
    /// The `total N` header of a Unix listing.
    Total,
}

// ─── Public API ──────────────────────────────────────────────────────

/// Parse one line of a listing of `dir`, starting with `dialect`.
/// Returns the result together with the dialect to remember.
pub fn parse_entry(
    line: &str,
    dir: &str,
    dialect: ListingDialect,
) -> (FtpResult<ParsedEntry>, ListingDialect) {
    parse_entry_at(line, dir, dialect, Local::now())
}

/// [`parse_entry`] with an explicit "now" for the year heuristics.
pub fn parse_entry_at(
    line: &str,
    dir: &str,
    dialect: ListingDialect,
    now: DateTime<Local>,
) -> (FtpResult<ParsedEntry>, ListingDialect) {
    let mut dialect = match dialect {
        ListingDialect::Unknown => ListingDialect::Unix,
        d => d,
    };
    for _ in 0..4 {
        let parsed = match dialect {
            ListingDialect::Unix | ListingDialect::Unknown => parse_unix(line, dir, now),
            ListingDialect::Dos => parse_dos(line, dir),
            ListingDialect::Eplf => parse_eplf(line, dir),
            ListingDialect::Mlsd => parse_mlsd(line, dir),
        };
        if let Some(entry) = parsed {
            return (Ok(entry), dialect);
        }
        let next = dialect.next();
        log::trace!("{:?} output parsing failed, trying {:?}", dialect, next);
        dialect = next;
    }
    (
        Err(FtpError::protocol_error(format!("parsing failed on '{}'", line))),
        dialect,
    )
}

/// Parse a whole listing of `dir`. Parsing stops at the first empty line;
/// a line no dialect accepts fails the listing.
pub fn parse_listing(
    raw: &str,
    dir: &str,
    dialect: ListingDialect,
) -> (FtpResult<RemoteDirectory>, ListingDialect) {
    parse_listing_at(raw, dir, dialect, Local::now())
}

pub fn parse_listing_at(
    raw: &str,
    dir: &str,
    mut dialect: ListingDialect,
    now: DateTime<Local>,
) -> (FtpResult<RemoteDirectory>, ListingDialect) {
    let mut rdir = RemoteDirectory::new(dir);
    log::trace!("*** start parsing directory listing of '{}' ***", rdir.path);
    for line in raw.split('\n') {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        log::trace!("{}", line);
        let (result, remembered) = parse_entry_at(line, &rdir.path, dialect, now);
        dialect = remembered;
        match result {
            Ok(ParsedEntry::File(f)) => rdir.files.push(f),
            Ok(ParsedEntry::Total) => {}
            Err(e) => {
                log::error!("parsing failed on '{}'", line);
                return (Err(e), dialect);
            }
        }
    }
    log::trace!("*** end parsing directory listing ***");
    (Ok(rdir), dialect)
}

// ─── Field splitting ─────────────────────────────────────────────────

/// Splits like `strsep` but skips runs of the delimiter before a field and
/// consumes exactly one after it.
struct Fields<'a> {
    rest: Option<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: Some(s) }
    }

    fn next(&mut self, delim: char) -> Option<&'a str> {
        let s = self.rest?.trim_start_matches(delim);
        if s.is_empty() {
            self.rest = None;
            return None;
        }
        match s.find(delim) {
            Some(i) => {
                self.rest = Some(&s[i + delim.len_utf8()..]);
                Some(&s[..i])
            }
            None => {
                self.rest = None;
                Some(s)
            }
        }
    }

    fn remainder(&self) -> Option<&'a str> {
        self.rest
    }
}

/// `atoi`/`strtoul`: leading digits, `None` if there are none.
fn leading_number(s: &str) -> Option<u64> {
    let digits: &str = &s[..s.bytes().take_while(u8::is_ascii_digit).count()];
    digits.parse().ok()
}

/// `sscanf("%d")`: optional whitespace and sign, then digits.
fn scan_int(s: &str) -> Option<(i64, &str)> {
    let t = s.trim_start();
    let (neg, body) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let n = body.bytes().take_while(u8::is_ascii_digit).count();
    if n == 0 {
        return None;
    }
    let v: i64 = body[..n].parse().ok()?;
    Some((if neg { -v } else { v }, &body[n..]))
}

fn month_number(s: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(s))
        .map(|i| i as u32)
}

fn local_time(year: i32, month0: u32, day: u32, hour: u32, min: u32) -> Option<DateTime<Local>> {
    Local
        .with_ymd_and_hms(year, month0 + 1, day, hour, min, 0)
        .earliest()
}

// ─── Unix ────────────────────────────────────────────────────────────

/// Month/day/year-or-time of an `ls -l` line. `HH:MM` means "within the
/// last six months": this year, unless that lands more than an hour in
/// the future (last year) or more than 180 days back (next year).
fn parse_unix_time(m: &str, d: &str, y: &str, now: DateTime<Local>) -> Option<DateTime<Utc>> {
    let month = month_number(m)?;
    let day = leading_number(d)? as u32;

    let t = if let Some((hs, ms)) = y.split_once(':') {
        let hour = leading_number(hs)? as u32;
        let min = leading_number(ms)? as u32;
        let mut year = now.year();
        let guess = local_time(year, month, day, hour, min)?;
        if guess > now + chrono::Duration::hours(1) {
            year -= 1;
        }
        if guess < now - chrono::Duration::days(6 * 30) {
            year += 1;
        }
        local_time(year, month, day, hour, min)?
    } else {
        let year = leading_number(y)? as i32;
        local_time(year, month, day, 0, 0)?
    };
    Some(t.with_timezone(&Utc))
}

fn parse_unix(line: &str, dir: &str, now: DateTime<Local>) -> Option<ParsedEntry> {
    if line.starts_with("total ") {
        return Some(ParsedEntry::Total);
    }
    // The permission string is exactly 10 chars; a link count may follow
    // without a space ("drwxrwxr-x156").
    if line.len() < 10 || !line.is_char_boundary(10) {
        return None;
    }
    let (perm, rest) = line.split_at(10);
    let mut fields = Fields::new(rest);

    let mut saved = [""; 5];
    for (i, slot) in saved.iter_mut().enumerate() {
        let mut tok = fields.next(' ')?;
        if i == 3 && tok.ends_with(',') {
            // device major number, the minor follows
            tok = fields.next(' ')?;
        }
        *slot = tok;
    }

    let (nhl, owner, group, size, m, d, y) = if month_number(saved[4]).is_some() {
        // ls -l
        let d = fields.next(' ')?;
        let y = fields.next(' ')?;
        (leading_number(saved[0]).unwrap_or(0), saved[1], saved[2], saved[3], saved[4], d, y)
    } else if month_number(saved[3]).is_some() {
        // ls -lG
        let y = fields.next(' ')?;
        (leading_number(saved[0]).unwrap_or(0), saved[1], "group", saved[2], saved[3], saved[4], y)
    } else if month_number(saved[2]).is_some() {
        // WebStar
        (0, "owner", "group", saved[1], saved[2], saved[3], saved[4])
    } else {
        return None;
    };

    let mtime = parse_unix_time(m, d, y, now);
    if mtime.is_none() {
        log::trace!("unparseable date '{} {} {}'", m, d, y);
    }

    let name_part = fields.remainder().filter(|s| !s.is_empty())?;
    let (name, link) = match name_part.find(" -> ") {
        Some(i) => (&name_part[..i], Some(name_part[i + 4..].to_string())),
        None => (name_part, None),
    };

    Some(ParsedEntry::File(RemoteFile {
        perm: perm.to_string(),
        owner: owner.to_string(),
        group: group.to_string(),
        nhl: nhl as u32,
        size: Some(leading_number(size).unwrap_or(0)),
        mtime,
        link,
        path: path::join(dir, name),
    }))
}

// ─── DOS ─────────────────────────────────────────────────────────────

fn parse_dos(line: &str, dir: &str) -> Option<ParsedEntry> {
    let mut fields = Fields::new(line);

    let date = fields.next(' ')?;
    let (m, rest) = scan_int(date)?;
    let (d, rest) = scan_int(rest.strip_prefix('-')?)?;
    let (y, _) = scan_int(rest.strip_prefix('-')?)?;
    let year = match y {
        0..=69 => 2000 + y,
        70..=99 => 1900 + y,
        _ => y,
    };

    let time = fields.next(' ')?;
    let (h, rest) = scan_int(time)?;
    let rest = rest.strip_prefix(':')?;
    let mm_len = rest.bytes().take(2).take_while(u8::is_ascii_digit).count();
    let mm: u32 = rest[..mm_len].parse().ok()?;
    let ampm: String = rest[mm_len..].trim_start().chars().take(2).collect();
    if ampm.is_empty() {
        return None;
    }
    let hour = match (h, ampm.eq_ignore_ascii_case("PM")) {
        (12, false) if ampm.eq_ignore_ascii_case("AM") => 0,
        (h, true) if h < 12 => h + 12,
        (h, _) => h,
    };

    let size_field = fields.next(' ')?;
    let is_dir = size_field.eq_ignore_ascii_case("<DIR>");
    let size = if is_dir {
        0
    } else {
        leading_number(size_field).unwrap_or(0)
    };

    let name = fields.remainder()?.trim_start_matches(' ');
    if name.is_empty() {
        return None;
    }

    let mtime = if (1..=12).contains(&m) && d > 0 && hour >= 0 {
        local_time(year as i32, (m - 1) as u32, d as u32, hour as u32, mm)
            .map(|t| t.with_timezone(&Utc))
    } else {
        None
    };

    Some(ParsedEntry::File(RemoteFile {
        perm: if is_dir { "drwxr-xr-x" } else { "-rw-r--r--" }.to_string(),
        owner: "owner".into(),
        group: "group".into(),
        nhl: 1,
        size: Some(size),
        mtime,
        link: None,
        path: path::join(dir, name),
    }))
}

// ─── EPLF ────────────────────────────────────────────────────────────

fn parse_eplf(line: &str, dir: &str) -> Option<ParsedEntry> {
    let body = line.strip_prefix('+')?;
    let mut file = RemoteFile {
        size: Some(0),
        ..RemoteFile::fake("")
    };
    let mut name = None;

    let mut facts = Fields::new(body);
    while let Some(fact) = facts.next(',') {
        match fact.as_bytes()[0] {
            b'/' => file.perm.replace_range(..1, "d"),
            b'm' => {
                file.mtime = leading_number(&fact[1..])
                    .and_then(|s| Utc.timestamp_opt(s as i64, 0).single());
            }
            b's' => file.size = Some(leading_number(&fact[1..]).unwrap_or(0)),
            b'\t' => {
                // the name is the last fact and may itself contain commas
                let mut full = fact[1..].to_string();
                if let Some(rest) = facts.remainder() {
                    full.push(',');
                    full.push_str(rest);
                }
                name = Some(full);
                break;
            }
            _ => {}
        }
    }

    file.path = path::join(dir, &name?);
    Some(ParsedEntry::File(file))
}

// ─── MLSD ────────────────────────────────────────────────────────────

fn parse_mlsd(line: &str, dir: &str) -> Option<ParsedEntry> {
    let (facts, name) = line.split_once(' ')?;
    let mut file = RemoteFile {
        size: Some(0),
        path: path::join(dir, path::base_name(name)),
        ..RemoteFile::fake("")
    };
    let mut perm = None;
    let mut is_dir = false;

    let mut fields = Fields::new(facts);
    while let Some(fact) = fields.next(';') {
        let (key, value) = fact.split_once('=')?;
        match key.to_ascii_lowercase().as_str() {
            "size" | "sizd" => file.size = Some(leading_number(value).unwrap_or(0)),
            "type" => {
                let v = value.to_ascii_lowercase();
                if v == "file" {
                    is_dir = false;
                } else if matches!(v.as_str(), "dir" | "cdir" | "pdir") {
                    is_dir = true;
                }
            }
            "modify" => {
                file.mtime = value
                    .get(..14)
                    .and_then(|v| NaiveDateTime::parse_from_str(v, "%Y%m%d%H%M%S").ok())
                    .map(|t| Utc.from_utc_datetime(&t));
            }
            "unix.mode" => {
                let digits: String = value.chars().take_while(|c| c.is_digit(8)).collect();
                perm = Some(perm_to_string(u32::from_str_radix(&digits, 8).unwrap_or(0)));
            }
            "unix.uid" => file.owner = value.to_string(),
            "unix.gid" => file.group = value.to_string(),
            _ => {}
        }
    }

    let mut perm = perm.unwrap_or_else(|| "-rw-r--r--".to_string());
    if is_dir {
        perm.replace_range(..1, "d");
    }
    file.perm = perm;
    Some(ParsedEntry::File(file))
}
