//! Text command parsing.
//!
//! A command is recognised only when the first whitespace-delimited token of
//! the message is exactly one of the known tokens; `!foo` is not `!f`.

pub const SET_GAME: &str = "!setgame";
pub const ASK: &str = "!f";

/// A recognised chat command and its argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!setgame <text>`: set (or clear, when blank) the presence text.
    SetGame(String),
    /// `!f <text>`: forward `<text>` to the completion API.
    Ask(String),
}

/// Parse `content` into a [`Command`], or `None` if it is not one.
///
/// The argument is everything after the delimiter that ends the token, with
/// surrounding whitespace trimmed.
pub fn parse_command(content: &str) -> Option<Command> {
    let (token, rest) = split_token(content);
    match token {
        SET_GAME => Some(Command::SetGame(rest.trim().to_string())),
        ASK => Some(Command::Ask(rest.trim().to_string())),
        _ => None,
    }
}

fn split_token(content: &str) -> (&str, &str) {
    match content.find(char::is_whitespace) {
        Some(idx) => (&content[..idx], &content[idx..]),
        None => (content, ""),
    }
}
