//! Shell-safe remote command construction
//!
//! Every remote operation in this tool ends up as a string handed to a
//! POSIX shell on the other side of an SSH channel. Hostnames, usernames,
//! and file paths are all interpolated into those strings, so every
//! interpolated argument goes through [`quote`]. Nothing in the engine is
//! allowed to splice a raw value into a command line.

use std::fmt;

/// Quote a single word for a POSIX shell.
///
/// Words made only of safe characters pass through unchanged; anything
/// else is wrapped in single quotes, with embedded single quotes rendered
/// as `'\''`.
pub fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@+%,".contains(c))
    {
        return word.to_string();
    }
    let mut out = String::with_capacity(word.len() + 2);
    out.push('\'');
    for c in word.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Join words into one command line, quoting each.
pub fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builder for a remote command line.
///
/// Arguments are quoted individually; the program name is taken as-is
/// (it is always a literal in this codebase, never derived from input).
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    line: String,
}

impl RemoteCommand {
    /// Start a command with a literal program name.
    pub fn new(program: &str) -> Self {
        Self {
            line: program.to_string(),
        }
    }

    /// Wrap a shell script fragment as `sh -c <quoted script>`. Used for
    /// redirections and pipelines, which cannot be expressed as a plain
    /// argv. The fragment itself must already have its interpolations
    /// quoted via [`quote`]/[`join`].
    pub fn sh(script: &str) -> Self {
        Self {
            line: format!("sh -c {}", quote(script)),
        }
    }

    /// Append one quoted argument.
    pub fn arg(mut self, arg: &str) -> Self {
        self.line.push(' ');
        self.line.push_str(&quote(arg));
        self
    }

    /// Append a literal flag or option (not quoted; must be a compile-time
    /// constant like `-p` or `--create-home`).
    pub fn flag(mut self, flag: &'static str) -> Self {
        self.line.push(' ');
        self.line.push_str(flag);
        self
    }

    /// Append several quoted arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for a in args {
            self = self.arg(a.as_ref());
        }
        self
    }

    /// The finished command line.
    pub fn into_string(self) -> String {
        self.line
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)
    }
}
