//! Deck control protocol grammar
//!
//! The deck speaks newline-terminated text over TCP:
//! ```text
//! 200 ok
//! 208 transport info:
//! status: record
//! display timecode: 00:01:02:03
//!
//! ```
//! A status line is a three-digit code followed by text. `1xx` codes are
//! failures, `2xx` are answers and `5xx` are unsolicited notifications (the
//! `500 connection info:` banner sent on connect among them). A status line ending
//! in `:` opens a block of `key: value` lines closed by an empty line.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::model::Clip;

pub const DEFAULT_PORT: u16 = 9993;
pub const SUCCESS: u16 = 200;
pub const CLIPS_INFO: u16 = 205;

static TIMECODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}:\d{2}:\d{2}:\d{2}$").unwrap());

/// `HH:MM:SS:FF`
pub fn is_timecode(text: &str) -> bool {
    TIMECODE.is_match(text)
}

/// A command argument must stay on its own line: no CR, LF or other control characters.
pub fn is_line_safe(value: &str) -> bool {
    !value.chars().any(char::is_control)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status<'a> {
    pub code: u16,
    pub text: &'a str,
}

impl Status<'_> {
    pub fn is_failure(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_notification(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// The line announces a `key: value` block.
    pub fn opens_block(&self) -> bool {
        self.text.ends_with(':')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    Status(Status<'a>),
    Field { key: &'a str, value: &'a str },
    Blank,
    Other(&'a str),
}

pub fn parse_line(raw: &str) -> Line<'_> {
    let line = raw.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Line::Blank;
    }

    if let Some(status) = parse_status(line) {
        return Line::Status(status);
    }

    match line.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => Line::Field {
            key: key.trim(),
            value: value.trim(),
        },
        _ => Line::Other(line),
    }
}

fn parse_status(line: &str) -> Option<Status<'_>> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let text = match bytes.get(3) {
        None => "",
        Some(b' ') => line[4..].trim(),
        Some(_) => return None,
    };
    let code = line[..3].parse().ok()?;
    Some(Status { code, text })
}

/// Parse one clip row (`<index>: <name> <HH:MM:SS:FF>`) from a clips block field.
pub fn parse_clip(key: &str, value: &str) -> Option<Clip> {
    let id = key.parse().ok()?;
    let (name, duration) = value.rsplit_once(' ')?;
    let name = name.trim();
    if name.is_empty() || !is_timecode(duration) {
        return None;
    }
    Some(Clip {
        id,
        name: name.to_string(),
        duration: Some(duration.to_string()),
    })
}

/// Recording codecs the coordinator can select, by friendly name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    ProRes422HQ,
    ProRes422,
    ProRes422LT,
    ProRes422Proxy,
    DNxHD220,
    DNxHD145,
    DNxHD45,
}

impl Codec {
    pub const ALL: [Codec; 7] = [
        Self::ProRes422HQ,
        Self::ProRes422,
        Self::ProRes422LT,
        Self::ProRes422Proxy,
        Self::DNxHD220,
        Self::DNxHD145,
        Self::DNxHD45,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ProRes422HQ => "ProRes422HQ",
            Self::ProRes422 => "ProRes422",
            Self::ProRes422LT => "ProRes422LT",
            Self::ProRes422Proxy => "ProRes422Proxy",
            Self::DNxHD220 => "DNxHD220",
            Self::DNxHD145 => "DNxHD145",
            Self::DNxHD45 => "DNxHD45",
        }
    }

    /// Token the deck uses in `file format:`.
    pub fn device_token(&self) -> &'static str {
        match self {
            Self::ProRes422HQ => "QuickTimeProResHQ",
            Self::ProRes422 => "QuickTimeProRes",
            Self::ProRes422LT => "QuickTimeProResLT",
            Self::ProRes422Proxy => "QuickTimeProResProxy",
            Self::DNxHD220 => "DNxHD220",
            Self::DNxHD145 => "DNxHD145",
            Self::DNxHD45 => "DNxHD45",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn from_device_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.device_token() == token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoInput {
    Sdi,
    Hdmi,
    Component,
}

impl VideoInput {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sdi => "SDI",
            Self::Hdmi => "HDMI",
            Self::Component => "Component",
        }
    }
}

impl fmt::Display for VideoInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sdi" => Ok(Self::Sdi),
            "hdmi" => Ok(Self::Hdmi),
            "component" => Ok(Self::Component),
            _ => Err(format!("unknown video input: {}", s)),
        }
    }
}

/// Transport commands sent as a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Stop,
    Record,
    PreviousClip,
    NextClip,
    GotoClip(u32),
    PlayClip(u32),
    GotoTimecode(String),
}

impl TransportCommand {
    pub fn line(&self) -> String {
        match self {
            Self::Play => "play".to_string(),
            Self::Stop => "stop".to_string(),
            Self::Record => "record".to_string(),
            Self::PreviousClip => "goto: clip id: -1".to_string(),
            Self::NextClip => "goto: clip id: +1".to_string(),
            Self::GotoClip(id) => format!("goto: clip id: {}", id),
            Self::PlayClip(id) => format!("play: clip id: {}", id),
            Self::GotoTimecode(tc) => format!("goto: timecode: {}", tc),
        }
    }

    /// Short name for logs and failure messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Stop => "stop",
            Self::Record => "record",
            Self::PreviousClip => "previous clip",
            Self::NextClip => "next clip",
            Self::GotoClip(_) => "goto clip",
            Self::PlayClip(_) => "play clip",
            Self::GotoTimecode(_) => "goto timecode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        assert_eq!(
            parse_line("200 ok\r\n"),
            Line::Status(Status { code: 200, text: "ok" })
        );
        let Line::Status(status) = parse_line("205 clips info:") else {
            panic!("expected status line");
        };
        assert!(status.opens_block());
        assert!(!status.is_failure());

        let Line::Status(status) = parse_line("500 connection info:") else {
            panic!("expected status line");
        };
        assert!(status.is_notification());

        let Line::Status(status) = parse_line("102 unsupported") else {
            panic!("expected status line");
        };
        assert!(status.is_failure());
    }

    #[test]
    fn test_fields_and_blank() {
        assert_eq!(
            parse_line("display timecode: 00:01:02:03"),
            Line::Field {
                key: "display timecode",
                value: "00:01:02:03"
            }
        );
        assert_eq!(parse_line("\r\n"), Line::Blank);
        assert_eq!(parse_line("garbage"), Line::Other("garbage"));
        // A leading number without a space is not a status line
        assert!(matches!(parse_line("1: Clip.mov 00:00:01:00"), Line::Field { key: "1", .. }));
    }

    #[test]
    fn test_clip_rows() {
        let Line::Field { key, value } = parse_line("1: Interview Take.mov 00:05:23:12") else {
            panic!("expected field");
        };
        let clip = parse_clip(key, value).unwrap();
        assert_eq!(clip.id, 1);
        assert_eq!(clip.name, "Interview Take.mov");
        assert_eq!(clip.duration.as_deref(), Some("00:05:23:12"));

        assert!(parse_clip("clip count", "2").is_none());
        assert!(parse_clip("2", "NoDuration.mov").is_none());
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(Codec::from_name("ProRes422HQ").unwrap().device_token(), "QuickTimeProResHQ");
        assert_eq!(Codec::from_device_token("QuickTimeProResProxy"), Some(Codec::ProRes422Proxy));
        assert_eq!(Codec::from_device_token("DNxHD45"), Some(Codec::DNxHD45));
        assert_eq!(Codec::from_name("H264"), None);
    }

    #[test]
    fn test_transport_lines() {
        assert_eq!(TransportCommand::PreviousClip.line(), "goto: clip id: -1");
        assert_eq!(TransportCommand::NextClip.line(), "goto: clip id: +1");
        assert_eq!(TransportCommand::PlayClip(3).line(), "play: clip id: 3");
        assert_eq!(
            TransportCommand::GotoTimecode("01:00:00:00".to_string()).line(),
            "goto: timecode: 01:00:00:00"
        );
    }

    #[test]
    fn test_video_input_parse() {
        assert_eq!("hdmi".parse::<VideoInput>(), Ok(VideoInput::Hdmi));
        assert_eq!(VideoInput::Component.to_string(), "Component");
        assert!("composite".parse::<VideoInput>().is_err());
    }

    #[test]
    fn test_timecode_validation() {
        assert!(is_timecode("00:00:10:00"));
        assert!(!is_timecode("0:00:10:00"));
        assert!(!is_timecode("00:00:10"));
    }

    #[test]
    fn test_line_safe_arguments() {
        assert!(is_line_safe("DEMO_20250101 S03"));
        assert!(!is_line_safe("SHOW\nrecord"));
        assert!(!is_line_safe("SHOW\r"));
        assert!(!is_line_safe("tab\there"));
    }
}
