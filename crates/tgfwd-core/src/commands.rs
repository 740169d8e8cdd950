use regex::Regex;

use crate::domain::UserId;

/// Commands are accepted from the configured operator only; a missing sender
/// (channel posts, anonymous admins) never qualifies.
pub fn is_operator(sender: Option<UserId>, owner: UserId) -> bool {
    let Some(sender) = sender else {
        return false;
    };
    sender == owner
}

/// A parsed operator command.
///
/// Malformed-but-recognizable input gets its own variant so the handler can
/// reply with the right usage text without re-parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
    SetInterval(u64),
    SetStartId(i32),
    StartFromLink(i32),
    Status,
    BadSetting,
    BadLink,
    Unknown,
}

impl Command {
    /// Parse operator text. Returns `None` for non-command text, which is
    /// ignored silently; any `/`-prefixed text yields a command (possibly
    /// `Unknown`).
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        // Telegram may send `/cmd@botname arg1 ...`
        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("").trim();
        let rest = parts.next().unwrap_or("").trim();

        let cmd = first
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();

        let command = match cmd.as_str() {
            "on" if rest.is_empty() => Command::On,
            "off" if rest.is_empty() => Command::Off,
            "status" if rest.is_empty() => Command::Status,
            "setting" => parse_setting(rest),
            "start" if !rest.is_empty() => match extract_link_message_id(rest) {
                Some(id) => Command::StartFromLink(id),
                None => Command::BadLink,
            },
            _ => Command::Unknown,
        };

        Some(command)
    }
}

fn parse_setting(args: &str) -> Command {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [minutes] => match minutes.parse::<u64>() {
            Ok(m) if m >= 1 => Command::SetInterval(m),
            _ => Command::BadSetting,
        },
        ["start", id] => match id.parse::<i32>() {
            Ok(id) if id >= 0 => Command::SetStartId(id),
            _ => Command::BadSetting,
        },
        _ => Command::BadSetting,
    }
}

/// Extract the message id from a Telegram deep link.
///
/// Accepts private links (`https://t.me/c/<channel>/<id>`) and public ones
/// (`https://t.me/<name>/<id>`).
fn extract_link_message_id(text: &str) -> Option<i32> {
    let re = Regex::new(r"https://t\.me/(?:c/\d+|\w+)/(\d+)").ok()?;
    let caps = re.captures(text)?;
    caps.get(1)?.as_str().parse::<i32>().ok()
}
