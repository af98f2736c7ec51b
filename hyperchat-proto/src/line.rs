//! Classification of lines read from the text sub-stream.
//!
//! Every line a client sends after its handle falls into one of three
//! shapes: a `:`-prefixed command, an `@handle body` directed message, or
//! plain text broadcast to everyone else.

use std::fmt;

/// Prefix that marks a line as a command.
pub const COMMAND_PREFIX: char = ':';

/// Prefix that marks a line as addressed to a single recipient.
pub const DIRECT_PREFIX: char = '@';

/// Line that announces a binary file frame follows on the same stream.
pub const FILE_MARKER: &str = ":file";

const QUIT: &str = ":quit";
const LIST: &str = ":list";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// A command recognised on the text sub-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// End this session.
    Quit,
    /// Ask for the handles of everyone connected.
    List,
    /// A file frame follows. `to` restricts delivery to one handle.
    File {
        /// Optional single recipient (`:file @bob`).
        to: Option<String>,
    },
    /// Any other `:`-prefixed token.
    Unknown(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quit => f.write_str(QUIT),
            Self::List => f.write_str(LIST),
            Self::File { to: None } => f.write_str(FILE_MARKER),
            Self::File { to: Some(to) } => write!(f, "{FILE_MARKER} {DIRECT_PREFIX}{to}"),
            Self::Unknown(name) => f.write_str(name),
        }
    }
}

/// The parsed shape of one line from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingUnit {
    /// Text for every other participant.
    PlainText(String),
    /// Text for exactly one participant.
    Directed {
        /// Recipient handle, without the `@`.
        to: String,
        /// Message body after the first space.
        body: String,
    },
    /// A control command.
    Command(Command),
}

impl IncomingUnit {
    /// Classifies a single line. Trailing CR/LF are ignored.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = trim_line_ending(line);

        if line.starts_with(COMMAND_PREFIX) {
            return Self::Command(parse_command(line));
        }

        if let Some(rest) = line.strip_prefix(DIRECT_PREFIX)
            && let Some((to, body)) = rest.split_once(' ')
            && !to.is_empty()
        {
            return Self::Directed {
                to: to.to_string(),
                body: body.to_string(),
            };
        }

        Self::PlainText(line.to_string())
    }
}

fn parse_command(line: &str) -> Command {
    let mut tokens = line.split(' ');
    let name = tokens.next().unwrap_or_default();
    match name {
        QUIT => Command::Quit,
        LIST => Command::List,
        FILE_MARKER => {
            let to = tokens
                .find(|t| !t.is_empty())
                .and_then(|t| t.strip_prefix(DIRECT_PREFIX))
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            Command::File { to }
        }
        other => Command::Unknown(other.to_string()),
    }
}

/// Strips any trailing `\n` and `\r` characters.
#[must_use]
pub fn trim_line_ending(line: &str) -> &str {
    line.trim_end_matches(LINE_ENDINGS)
}
