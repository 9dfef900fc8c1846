//! Remote wildcard expansion over cached (or freshly listed) directories.
//!
//! Only the last path component may carry wildcards. Special characters
//! can be protected with a backslash or by quoting.

use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::path;
use crate::ftp::remote::RemoteFile;
use glob::{MatchOptions, Pattern};

/// Predicate deciding whether a candidate is left out of the result.
pub type GlobExclude<'a> = Option<&'a (dyn Fn(&RemoteFile) -> bool + Send + Sync)>;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    // `*` also picks up dotfiles
    require_literal_leading_dot: false,
};

/// Unquoted, unescaped `*`, `?`, `[` or `]` in `s`.
pub fn contains_wildcards(s: &str) -> bool {
    scan_quoted(s).any(|(c, literal)| !literal && matches!(c, '*' | '?' | '[' | ']'))
}

/// Exclude predicate for `.` and `..`.
pub fn exclude_dotdirs(f: &RemoteFile) -> bool {
    f.is_dotdir()
}

/// Characters of `s` with quotes and escapes removed, each flagged
/// `true` when it was protected.
fn scan_quoted(s: &str) -> impl Iterator<Item = (char, bool)> + '_ {
    let mut chars = s.chars();
    let mut quote: Option<char> = None;
    std::iter::from_fn(move || loop {
        let c = chars.next()?;
        match (c, quote) {
            ('\\', _) => {
                if let Some(next) = chars.next() {
                    return Some((next, true));
                }
                return Some(('\\', true));
            }
            ('"', None) | ('\'', None) => quote = Some(c),
            (q, Some(open)) if q == open => quote = None,
            (_, Some(_)) => return Some((c, true)),
            (_, None) => return Some((c, false)),
        }
    })
}

fn unquote(s: &str) -> String {
    scan_quoted(s).map(|(c, _)| c).collect()
}

/// Pattern source for the glob crate: protected metacharacters become
/// one-character classes.
fn to_pattern(leaf: &str) -> String {
    scan_quoted(leaf)
        .map(|(c, literal)| match c {
            '*' | '?' | '[' | ']' if literal => format!("[{}]", c),
            _ => c.to_string(),
        })
        .collect()
}

/// Does `name` match the (possibly quoted) glob `leaf`?
pub fn match_name(leaf: &str, name: &str) -> bool {
    match Pattern::new(&to_pattern(leaf)) {
        Ok(p) => p.matches_with(name, MATCH_OPTIONS),
        Err(_) => unquote(leaf) == name,
    }
}

impl FtpSession {
    /// Append the entries matching `mask` to `results`; returns how many
    /// were added.
    ///
    /// With `ignore_multiples`, paths already in `results` are skipped.
    /// When nothing matches and `allow_literal_fallback` is set, a mask
    /// whose last component has no wildcards yields a placeholder entry
    /// for that path (it may exist without being listed). Otherwise an
    /// empty match is a `NotFound` error.
    pub async fn glob(
        &mut self,
        mask: &str,
        allow_literal_fallback: bool,
        ignore_multiples: bool,
        results: &mut Vec<RemoteFile>,
        exclude: GlobExclude<'_>,
    ) -> FtpResult<usize> {
        let expanded = path::tilde_expand(mask, &self.homedir);
        let leaf = path::base_name(&expanded).to_string();
        let dir = match path::base_dir(&expanded) {
            Some(d) => unquote(d),
            None => self.curdir.clone(),
        };

        let before = results.len();
        match self.get_directory(&dir).await {
            Ok(rdir) => {
                for f in &rdir.files {
                    if exclude.map(|ex| ex(f)).unwrap_or(false) {
                        continue;
                    }
                    if !match_name(&leaf, f.name()) {
                        continue;
                    }
                    if ignore_multiples && results.iter().any(|r| r.path == f.path) {
                        continue;
                    }
                    results.push(f.clone());
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::debug!("glob: can't read {}: {}", dir, e),
        }

        let added = results.len() - before;
        if added > 0 {
            return Ok(added);
        }
        if !allow_literal_fallback || contains_wildcards(&leaf) {
            return Err(FtpError::not_found(format!("{}: no matches found", mask))
                .with_session(&self.id));
        }

        let abs = unquote(&self.path_absolute(&expanded));
        if ignore_multiples && results.iter().any(|r| r.path == abs) {
            return Ok(0);
        }
        results.push(RemoteFile::fake(&abs));
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_detection() {
        assert!(contains_wildcards("*.txt"));
        assert!(contains_wildcards("file[12]"));
        assert!(!contains_wildcards("plain.txt"));
        assert!(!contains_wildcards(r"literal\*star"));
        assert!(!contains_wildcards("\"quoted ?\""));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let names = ["a.txt", "b.TXT", "readme"];
        let hits: Vec<_> = names.iter().filter(|n| match_name("*.txt", n)).collect();
        assert_eq!(hits, [&"a.txt"]);
    }

    #[test]
    fn star_matches_dotfiles() {
        assert!(match_name("*", ".profile"));
        assert!(match_name("?bashrc", ".bashrc"));
    }

    #[test]
    fn protected_metacharacters_are_literal() {
        assert!(match_name(r"what\?", "what?"));
        assert!(!match_name(r"what\?", "whatx"));
        assert!(match_name("\"a b\"", "a b"));
        // an unbalanced bracket can't be compiled; compare literally
        assert!(match_name("[oops", "[oops"));
    }

    #[test]
    fn dotdirs_are_excluded() {
        let dir = |path: &str| RemoteFile {
            perm: "drwxr-xr-x".into(),
            ..RemoteFile::fake(path)
        };
        assert!(exclude_dotdirs(&dir("/pub/.")));
        assert!(exclude_dotdirs(&dir("/pub/..")));
        assert!(!exclude_dotdirs(&dir("/pub/.git")));
        assert!(!exclude_dotdirs(&RemoteFile::fake("/pub/..")));
    }
}
