//! Control protocol line formatting and reply parsing

use crate::error::ControlError;

/// Status code the control port answers with on success
pub const OK_CODE: &str = "250";

/// Position of a line within a (possibly multi-line) reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `ddd-text`: more reply lines follow
    Mid,
    /// `ddd+text`: a data block terminated by a lone `.` follows
    Data,
    /// `<code> <text>`: last line of the reply
    End,
}

/// One `<code><sep><text>` reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: String,
    pub kind: LineKind,
    pub text: String,
}

impl ReplyLine {
    /// Parse a single reply line.
    ///
    /// Three-digit codes followed by `-` or `+` start or continue a
    /// multi-line reply. Anything else is an end line whose code is
    /// everything before the first space; an end line without a space is
    /// rejected.
    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        let line = raw.trim_end_matches(['\r', '\n']);

        if let Some((code, kind, text)) = split_continuation(line) {
            return Ok(Self {
                code: code.to_string(),
                kind,
                text: text.to_string(),
            });
        }

        match line.split_once(' ') {
            Some((code, text)) if !code.is_empty() => Ok(Self {
                code: code.to_string(),
                kind: LineKind::End,
                text: text.to_string(),
            }),
            _ => Err(ControlError::MalformedResponse(line.to_string())),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == OK_CODE
    }

    pub fn is_end(&self) -> bool {
        self.kind == LineKind::End
    }
}

impl std::fmt::Display for ReplyLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

fn split_continuation(line: &str) -> Option<(&str, LineKind, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }

    let kind = match bytes[3] {
        b'-' => LineKind::Mid,
        b'+' => LineKind::Data,
        _ => return None,
    };
    Some((&line[..3], kind, &line[4..]))
}

/// Whether `line` closes a `ddd+` data block
pub fn is_data_terminator(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == "."
}

/// Build the `AUTHENTICATE "<secret>"` command line.
///
/// Quotes and backslashes are escaped; any other control character would
/// break the line framing and is rejected.
pub fn authenticate_command(secret: &str) -> Result<String, ControlError> {
    let mut quoted = String::with_capacity(secret.len() + 2);
    quoted.push('"');
    for c in secret.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            c if c.is_control() => return Err(ControlError::InvalidSecret),
            c => quoted.push(c),
        }
    }
    quoted.push('"');

    Ok(format!("AUTHENTICATE {}\r\n", quoted))
}

pub const NEWNYM_COMMAND: &str = "signal NEWNYM\r\n";
