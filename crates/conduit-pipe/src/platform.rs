//! Per-OS command line construction.
//!
//! Each entry is pure string building: how to quote a word, how to source a
//! shell profile, and which shell runs the resulting line.

use std::process::Command;

/// Command line construction rules for one OS family.
#[derive(Debug, Clone, Copy)]
pub struct OsStrategy {
    /// Identifier as reported by `std::env::consts::OS`.
    pub os: &'static str,
    /// Shell used when a command line has to be interpreted.
    pub shell: &'static str,
    /// Flag that makes the shell run its next argument.
    pub shell_flag: &'static str,
    quote: fn(&str) -> String,
    source_profile: fn(&str) -> String,
}

const STRATEGIES: &[OsStrategy] = &[
    OsStrategy {
        os: "linux",
        shell: "sh",
        shell_flag: "-c",
        quote: quote_posix,
        source_profile: source_posix,
    },
    OsStrategy {
        os: "macos",
        shell: "/bin/sh",
        shell_flag: "-c",
        quote: quote_posix,
        source_profile: source_posix,
    },
    OsStrategy {
        os: "windows",
        shell: "cmd",
        shell_flag: "/C",
        quote: quote_windows,
        source_profile: source_windows,
    },
];

const UNIX_FALLBACK: OsStrategy = OsStrategy {
    os: "unix",
    shell: "sh",
    shell_flag: "-c",
    quote: quote_posix,
    source_profile: source_posix,
};

impl OsStrategy {
    /// Looks up the strategy for `os`, falling back to generic unix rules.
    pub fn for_os(os: &str) -> &'static OsStrategy {
        STRATEGIES
            .iter()
            .find(|s| s.os == os)
            .unwrap_or(&UNIX_FALLBACK)
    }

    /// The strategy for the OS this binary runs on.
    pub fn current() -> &'static OsStrategy {
        Self::for_os(std::env::consts::OS)
    }

    /// Quotes one word for this shell.
    pub fn quote(&self, word: &str) -> String {
        (self.quote)(word)
    }

    /// Prefix that sources `profile` before the command runs.
    pub fn profile_prefix(&self, profile: &str) -> String {
        (self.source_profile)(profile)
    }

    /// Builds `[profile prefix] "executable" "arg"...`.
    pub fn command_line(&self, executable: &str, argv: &[String], profile: Option<&str>) -> String {
        let mut line = profile.map(|p| self.profile_prefix(p)).unwrap_or_default();
        line.push_str(&self.quote(executable));
        for arg in argv {
            line.push(' ');
            line.push_str(&self.quote(arg));
        }
        line
    }
}

fn quote_posix(word: &str) -> String {
    shell_words::quote(word).into_owned()
}

fn source_posix(profile: &str) -> String {
    format!(". {} && ", quote_posix(profile))
}

fn quote_windows(word: &str) -> String {
    format!("\"{}\"", word.replace('"', "\"\""))
}

fn source_windows(profile: &str) -> String {
    format!("call {} && ", quote_windows(profile))
}

/// Detaches a command from the caller's process group.
#[cfg(unix)]
pub fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

/// Detaches a command from the caller's console.
#[cfg(windows)]
pub fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

/// No native detach facility; the child simply is not waited on.
#[cfg(not(any(unix, windows)))]
pub fn detach(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_os() {
        assert_eq!(OsStrategy::for_os("windows").shell, "cmd");
        assert_eq!(OsStrategy::for_os("linux").shell_flag, "-c");
    }

    #[test]
    fn test_lookup_unknown_os_falls_back() {
        assert_eq!(OsStrategy::for_os("freebsd").os, "unix");
    }

    #[test]
    fn test_posix_command_line_quotes_words() {
        let strategy = OsStrategy::for_os("linux");
        let line = strategy.command_line(
            "/usr/bin/my tool",
            &["plain".into(), "it's".into()],
            None,
        );
        assert_eq!(line, r#"'/usr/bin/my tool' plain 'it'\''s'"#);
    }

    #[test]
    fn test_posix_profile_prefix() {
        let strategy = OsStrategy::for_os("macos");
        let line = strategy.command_line("echo", &["hi".into()], Some("/home/u/.profile"));
        assert_eq!(line, ". /home/u/.profile && echo hi");
    }

    #[test]
    fn test_windows_command_line() {
        let strategy = OsStrategy::for_os("windows");
        let line = strategy.command_line(
            r"C:\Tools\run.exe",
            &["say \"hi\"".into()],
            Some(r"C:\env.bat"),
        );
        assert_eq!(
            line,
            r#"call "C:\env.bat" && "C:\Tools\run.exe" "say ""hi""""#
        );
    }
}
