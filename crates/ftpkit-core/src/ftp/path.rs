//! Remote path arithmetic.
//!
//! Remote paths are plain `/`-separated strings; nothing here touches the
//! local filesystem.

/// Remove one trailing `/`, except from the root itself.
pub fn strip_slash(path: &str) -> &str {
    if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Everything after the last `/`.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Everything before the last `/`; `None` for a bare name.
pub fn base_dir(path: &str) -> Option<&str> {
    match path.rfind('/') {
        None => None,
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
    }
}

/// `dir/name`, without doubling the slash under the root.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Convert DOS separators to `/`.
pub fn dos2unix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Expand a leading `~` or `~/` against `home`.
pub fn tilde_expand(path: &str, home: &str) -> String {
    if path == "~" {
        home.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        join(home, rest)
    } else {
        path.to_string()
    }
}

/// Resolve `path` against `curdir`/`homedir` and collapse `.` and `..`.
pub fn absolute(path: &str, curdir: &str, homedir: &str) -> String {
    let p = if path.is_empty() {
        curdir.to_string()
    } else if path.starts_with('~') && !homedir.is_empty() {
        tilde_expand(path, homedir)
    } else if path.starts_with('/') || is_drive_path(path) {
        path.to_string()
    } else if let Some(rest) = path.strip_prefix("./") {
        join(curdir, rest)
    } else {
        join(curdir, path)
    };
    collapse(&p)
}

fn is_drive_path(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && (b[2] == b'\\' || b[2] == b'/')
}

/// Remove `//`, `.` and `..` components. `/..` is `/`; a relative path
/// that collapses to nothing becomes `.`.
pub fn collapse(path: &str) -> String {
    if is_drive_path(path) {
        let (drive, rest) = path.split_at(2);
        return format!("{}{}", drive, collapse(&dos2unix(rest)));
    }

    let absolute = path.starts_with('/');
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            c => parts.push(c),
        }
    }

    let mut out = parts.join("/");
    if absolute {
        out.insert(0, '/');
    } else if out.is_empty() {
        out.push('.');
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// True when `dir` equals `path` or is one of its leading components.
pub fn is_prefix_dir(dir: &str, path: &str) -> bool {
    match path.strip_prefix(dir) {
        Some("") => true,
        Some(rest) => rest.starts_with('/') || dir.ends_with('/'),
        None => false,
    }
}
