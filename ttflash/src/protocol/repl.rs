//! MicroPython raw REPL conventions used by the board shell.
//!
//! ## Control bytes
//!
//! ```text
//! +------+--------+---------------------------------------------+
//! | Byte | Key    | Meaning                                     |
//! +------+--------+---------------------------------------------+
//! | 0x01 | Ctrl-A | enter raw REPL                              |
//! | 0x02 | Ctrl-B | leave raw REPL                              |
//! | 0x03 | Ctrl-C | interrupt running code                      |
//! | 0x04 | Ctrl-D | end of transmission: run payload/soft reset |
//! +------+--------+---------------------------------------------+
//! ```
//!
//! ## Status lines
//!
//! Scripts running on the board report state as `key=value` lines, e.g.
//! `tt.sdk_version=release_v2.0.1` or `tt.flash_id=ef4018`.

use std::sync::OnceLock;

use regex::Regex;

/// Raw REPL control bytes.
pub mod control {
    /// Enter raw REPL (Ctrl-A).
    pub const ENTER_RAW: u8 = 0x01;
    /// Exit raw REPL (Ctrl-B).
    pub const EXIT_RAW: u8 = 0x02;
    /// Interrupt (Ctrl-C).
    pub const INTERRUPT: u8 = 0x03;
    /// End of transmission / soft reset (Ctrl-D).
    pub const EOT: u8 = 0x04;

    /// Stop running code and leave raw REPL.
    pub const EXIT_SEQUENCE: &str = "\x03\x03\x02";
    /// Soft reset.
    pub const SOFT_RESET: &str = "\x04";
    /// Enter raw REPL.
    pub const ENTER_SEQUENCE: &str = "\x01";
}

/// Prefix of the line the board prints once it has (re)booted.
pub const BOOT_SENTINEL: &str = "BOOT: ";

/// Prefix stripped from reported SDK versions.
pub const RELEASE_PREFIX: &str = "release_v";

/// Default namespace of board status keys.
pub const DEFAULT_NAMESPACE: &str = "tt";

/// A recognised status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// `<ns>.sdk_version=<version>`, with the release prefix removed.
    SdkVersion(String),
    /// `<ns>.flash_id=<id>`, verbatim.
    FlashId(String),
}

/// Split a `key=value` line at the first `=`.
///
/// Lines without a value are not status lines.
pub fn split_key_value(line: &str) -> Option<(&str, &str)> {
    match line.split_once('=') {
        Some((key, value)) if !value.is_empty() => Some((key, value)),
        _ => None,
    }
}

/// Recognise the status keys of `namespace` in a cleaned line.
pub fn parse_status(line: &str, namespace: &str) -> Option<Status> {
    let (key, value) = split_key_value(line)?;
    let field = key.strip_prefix(namespace)?.strip_prefix('.')?;
    match field {
        "sdk_version" => Some(Status::SdkVersion(
            value
                .strip_prefix(RELEASE_PREFIX)
                .unwrap_or(value)
                .to_string(),
        )),
        "flash_id" => Some(Status::FlashId(value.to_string())),
        _ => None,
    }
}

/// Python statement that makes the board print its SDK version.
pub fn version_query(namespace: &str) -> String {
    format!("print(f\"{namespace}.sdk_version={{{namespace}.version}}\")\r\n")
}

/// Remove raw REPL echo artifacts from a framed line.
///
/// Strips a leading run of `\x04...>OK` acknowledgments (and the `\x04`s
/// that follow them) and every ANSI CSI sequence (`ESC [ 0-9; letter`).
pub fn clean_raw_repl(line: &str) -> String {
    let without_ok = ok_prefix_regex().replace(line, "");
    ansi_regex().replace_all(&without_ok, "").into_owned()
}

#[allow(clippy::expect_used)] // Constant pattern
fn ok_prefix_regex() -> &'static Regex {
    static OK_PREFIX: OnceLock<Regex> = OnceLock::new();
    OK_PREFIX.get_or_init(|| Regex::new(r"^(?:\x04+>OK)+\x04*").expect("invalid regex pattern"))
}

#[allow(clippy::expect_used)] // Constant pattern
fn ansi_regex() -> &'static Regex {
    static ANSI_CSI: OnceLock<Regex> = OnceLock::new();
    ANSI_CSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("invalid regex pattern"))
}
