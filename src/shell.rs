//! Shell quoting for command lines built from untrusted paths and arguments.

use crate::error::{Error, Result};

/// Characters that disqualify a string from being used as an executable name.
///
/// Anything the POSIX shell could interpret is rejected outright rather than
/// quoted, mirroring how `command -v` lookups are guarded.
const INVALID_EXEC_CHARS: &[char] = &[
    ' ', '\t', '\n', '\r', '`', ';', '&', '|', '$', '<', '>', '(', ')', '{', '}', '[', ']', '!',
    '*', '?', '^', '~', '\\',
];

/// Quote an arbitrary string for safe inclusion in a `sh -c` command line.
///
/// The string is wrapped in single quotes with every embedded single quote
/// rewritten to `'\''`. The result always evaluates back to the original
/// bytes; no shell metacharacter inside survives expansion.
///
/// # Example
///
/// ```
/// use hostlink::shell::quote;
///
/// assert_eq!(quote("/tmp/plain"), "'/tmp/plain'");
/// assert_eq!(quote("it's"), r#"'it'\''s'"#);
/// ```
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Validate an executable name before it is interpolated into `command -v`.
///
/// Names containing whitespace or shell metacharacters are rejected with a
/// validation error; quoting alone is not enough of a defense for something
/// that is supposed to be a bare identifier.
pub fn validate_exec_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("executable name is empty".to_string()));
    }
    if name.chars().any(|c| INVALID_EXEC_CHARS.contains(&c)) {
        return Err(Error::Validation(format!(
            "executable name '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_plain_path() {
        assert_eq!(quote("/etc/motd"), "'/etc/motd'");
    }

    #[test]
    fn quote_embedded_single_quote() {
        assert_eq!(quote("it's a file"), r#"'it'\''s a file'"#);
    }

    #[test]
    fn quote_shell_metacharacters_are_inert() {
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(quote("a;b&c|d"), "'a;b&c|d'");
        assert_eq!(quote("`id`"), "'`id`'");
    }

    #[test]
    fn quote_empty_string() {
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn quote_is_stable_under_requoting() {
        // Quoting an already-quoted word still yields a valid shell word.
        let once = quote("weird 'name'");
        let twice = quote(&once);
        assert!(twice.starts_with('\''));
        assert!(twice.ends_with('\''));
    }

    #[test]
    fn exec_name_plain_is_valid() {
        assert!(validate_exec_name("kubectl").is_ok());
        assert!(validate_exec_name("sha256sum").is_ok());
        assert!(validate_exec_name("/usr/bin/env").is_ok());
    }

    #[test]
    fn exec_name_with_injection_is_rejected() {
        for bad in ["sh;id", "a b", "x|y", "e$PATH", "tab\there", "tick`id`"] {
            let err = validate_exec_name(bad).unwrap_err();
            assert!(
                err.to_string().contains("invalid characters"),
                "expected invalid-characters error for {:?}, got {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn exec_name_empty_is_rejected() {
        assert!(validate_exec_name("").is_err());
    }
}
