//! Small helpers for building shell command strings and host paths.

use std::path::{Path, PathBuf};

/// Single-quotes `value` for a POSIX shell, escaping embedded single quotes.
pub fn shell_quote<S: AsRef<str>>(value: S) -> String {
    format!("'{}'", value.as_ref().replace('\'', r#"'"'"'"#))
}

/// Expands a leading `~` to `$HOME`. Paths without one are returned as is.
pub fn expand_home<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Joins `root` and `subpath` into a directory path with exactly one
/// trailing slash, the way rsync expects directory endpoints.
pub fn join_dir<R: AsRef<str>, S: AsRef<str>>(root: R, subpath: S) -> String {
    let root = root.as_ref().trim_end_matches('/');
    let subpath = subpath.as_ref().trim_matches('/');
    if subpath.is_empty() {
        format!("{root}/")
    } else {
        format!("{root}/{subpath}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/mnt/backup"), "'/mnt/backup'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn test_join_dir() {
        assert_eq!(join_dir("/mnt/backup", "/"), "/mnt/backup/");
        assert_eq!(join_dir("/mnt/backup/", "/home"), "/mnt/backup/home/");
        assert_eq!(join_dir("/", "home/user/"), "/home/user/");
        assert_eq!(join_dir("/data", ""), "/data/");
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/etc/backupchain.yaml"), PathBuf::from("/etc/backupchain.yaml"));
    }

    #[test]
    fn test_expand_home_uses_home() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/.ssh/config"), PathBuf::from(home).join(".ssh/config"));
        }
    }
}
