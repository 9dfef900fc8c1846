//! Remote file and directory records.

use crate::ftp::path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Mode bits as found in `UNIX.mode` facts.
const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;
const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_ISVTX: u32 = 0o1000;

/// One entry of a remote listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// `ls -l` style permission string; the first char is the type.
    pub perm: String,
    pub owner: String,
    pub group: String,
    /// Hard link count.
    pub nhl: u32,
    pub size: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    /// Symlink target.
    pub link: Option<String>,
    /// Absolute path.
    pub path: String,
}

impl RemoteFile {
    /// Placeholder for a path assumed to exist.
    pub fn fake(path: &str) -> Self {
        log::trace!("faking file '{}'", path);
        Self {
            perm: "-rw-r--r--".into(),
            owner: "owner".into(),
            group: "group".into(),
            nhl: 0,
            size: None,
            mtime: None,
            link: None,
            path: path.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        path::base_name(&self.path)
    }

    fn type_char(&self) -> char {
        self.perm.chars().next().unwrap_or('-')
    }

    pub fn is_dir(&self) -> bool {
        self.type_char() == 'd'
    }

    pub fn is_link(&self) -> bool {
        self.type_char() == 'l'
    }

    pub fn is_pipe(&self) -> bool {
        self.type_char() == 'p'
    }

    pub fn is_socket(&self) -> bool {
        self.type_char() == 's'
    }

    pub fn is_char_device(&self) -> bool {
        self.type_char() == 'c'
    }

    pub fn is_block_device(&self) -> bool {
        self.type_char() == 'b'
    }

    pub fn is_regular(&self) -> bool {
        !(self.is_dir() || self.is_pipe() || self.is_char_device() || self.is_block_device())
    }

    pub fn is_executable(&self) -> bool {
        self.perm.contains('x')
    }

    /// `.` or `..`
    pub fn is_dotdir(&self) -> bool {
        self.is_dir() && matches!(self.name(), "." | "..")
    }

    /// `ls -F` suffix.
    pub fn class_char(&self) -> Option<char> {
        if self.is_dir() {
            Some('/')
        } else if self.is_link() {
            Some('@')
        } else if self.is_socket() {
            Some('=')
        } else if self.is_pipe() {
            Some('|')
        } else if self.is_executable() {
            Some('*')
        } else {
            None
        }
    }

    /// Permission bits (no type bits) from the permission string.
    pub fn mode(&self) -> u32 {
        string_to_mode(&self.perm)
    }
}

/// Render mode bits as `drwxr-sr-t` style text.
pub fn perm_to_string(mode: u32) -> String {
    let mut attr = ['-'; 10];
    attr[0] = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        S_IFCHR => 'c',
        S_IFBLK => 'b',
        S_IFIFO => 'p',
        S_IFSOCK => 's',
        _ => '-',
    };

    let triads = [
        (0o400, 0o200, 0o100, S_ISUID, 's', 'S'),
        (0o040, 0o020, 0o010, S_ISGID, 's', 'S'),
        (0o004, 0o002, 0o001, S_ISVTX, 't', 'T'),
    ];
    for (i, (r, w, x, special, on, off)) in triads.into_iter().enumerate() {
        let base = 1 + i * 3;
        if mode & r != 0 {
            attr[base] = 'r';
        }
        if mode & w != 0 {
            attr[base + 1] = 'w';
        }
        attr[base + 2] = match (mode & x != 0, mode & special != 0) {
            (true, true) => on,
            (true, false) => 'x',
            (false, true) => off,
            (false, false) => '-',
        };
    }
    attr.iter().collect()
}

/// Inverse of [`perm_to_string`] for the permission part.
pub fn string_to_mode(perm: &str) -> u32 {
    let p: Vec<char> = perm.chars().collect();
    if p.len() < 10 {
        return 0;
    }
    let mut m = 0;
    let specials = [(S_ISUID, 's', 'S'), (S_ISGID, 's', 'S'), (S_ISVTX, 't', 'T')];
    for (i, (special, on, off)) in specials.into_iter().enumerate() {
        let base = 1 + i * 3;
        let shift = 6 - i * 3;
        if p[base] == 'r' {
            m |= 0o4 << shift;
        }
        if p[base + 1] == 'w' {
            m |= 0o2 << shift;
        }
        let c = p[base + 2];
        if c == 'x' {
            m |= 0o1 << shift;
        } else if c == off {
            m |= special;
        } else if c == on {
            m |= special | (0o1 << shift);
        }
    }
    m
}

/// A parsed listing of one remote directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDirectory {
    /// Absolute, without trailing slash.
    pub path: String,
    pub files: Vec<RemoteFile>,
    pub timestamp: DateTime<Utc>,
}

impl RemoteDirectory {
    pub fn new(path: &str) -> Self {
        Self {
            path: path::strip_slash(path).to_string(),
            files: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Look up an entry by base name.
    pub fn get_file(&self, name: &str) -> Option<&RemoteFile> {
        self.files.iter().find(|f| f.name() == name)
    }

    /// Sum of known sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().filter_map(|f| f.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(perm: &str, path: &str) -> RemoteFile {
        RemoteFile {
            perm: perm.into(),
            ..RemoteFile::fake(path)
        }
    }

    #[test]
    fn mode_strings() {
        assert_eq!(perm_to_string(0o040755), "drwxr-xr-x");
        assert_eq!(perm_to_string(0o100644), "-rw-r--r--");
        assert_eq!(perm_to_string(0o104755), "-rwsr-xr-x");
        assert_eq!(perm_to_string(0o102644), "-rw-r-Sr--");
        assert_eq!(perm_to_string(0o041777), "drwxrwxrwt");
        assert_eq!(perm_to_string(0o041776), "drwxrwxrwT");
        assert_eq!(perm_to_string(0o120777), "lrwxrwxrwx");
        assert_eq!(string_to_mode("-rwsr-xr-x"), 0o4755);
        assert_eq!(string_to_mode("drwxrwxrwT"), 0o1776);
    }

    #[test]
    fn predicates() {
        let d = file("drwxr-xr-x", "/pub/..");
        assert!(d.is_dir() && d.is_dotdir());
        assert_eq!(d.class_char(), Some('/'));
        let l = file("lrwxrwxrwx", "/pub/latest");
        assert!(l.is_link() && l.is_regular());
        let f = RemoteFile::fake("/pub/a.txt");
        assert_eq!(f.name(), "a.txt");
        assert_eq!(f.size, None);
        assert!(!f.is_executable());
    }

    #[test]
    fn directory_lookup() {
        let mut dir = RemoteDirectory::new("/pub/");
        assert_eq!(dir.path, "/pub");
        dir.files.push(RemoteFile {
            size: Some(10),
            ..RemoteFile::fake("/pub/a")
        });
        dir.files.push(RemoteFile::fake("/pub/b"));
        assert!(dir.get_file("b").is_some());
        assert!(dir.get_file("c").is_none());
        assert_eq!(dir.total_size(), 10);
    }
}
