use thiserror::Error;

use crate::engine::events::Tags;

/// An IRC protocol message with IRCv3 message tags.
///
/// Wire format: `[@tags] [:prefix] COMMAND [params...] [:trailing]\r\n`
///
/// Examples:
///   `@badges=;display-name=Alice :alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :Hello\r\n`
///   `PING :tmi.twitch.tv\r\n`
///   `:bot!bot@bot.tmi.twitch.tv JOIN #chan\r\n`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IrcMessage {
    pub tags: Tags,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

#[derive(Debug, PartialEq, Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("missing command")]
    MissingCommand,
}

impl IrcMessage {
    /// Build an outbound client command.
    pub fn command(command: &str, params: Vec<String>) -> Self {
        IrcMessage {
            command: command.to_string(),
            params,
            ..Default::default()
        }
    }

    /// Parse a single IRC line (without the trailing \r\n).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut remaining = line;
        let mut tags = Tags::new();

        if let Some(rest) = remaining.strip_prefix('@') {
            let (raw, rest) = rest.split_once(' ').ok_or(ParseError::MissingCommand)?;
            tags = parse_tags(raw);
            remaining = rest.trim_start();
        }

        let mut prefix = None;
        if let Some(rest) = remaining.strip_prefix(':') {
            match rest.split_once(' ') {
                Some((p, rest)) => {
                    prefix = Some(p.to_string());
                    remaining = rest.trim_start();
                }
                None => return Err(ParseError::MissingCommand),
            }
        }

        let command;
        match remaining.split_once(' ') {
            Some((c, rest)) => {
                command = c.to_uppercase();
                remaining = rest.trim_start();
            }
            None => {
                command = remaining.to_uppercase();
                remaining = "";
            }
        }

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        while !remaining.is_empty() {
            if let Some(trailing) = remaining.strip_prefix(':') {
                // Trailing parameter: everything after the colon
                params.push(trailing.to_string());
                break;
            }

            match remaining.split_once(' ') {
                Some((p, rest)) => {
                    params.push(p.to_string());
                    remaining = rest.trim_start();
                }
                None => {
                    params.push(remaining.to_string());
                    break;
                }
            }
        }

        Ok(IrcMessage {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Format this message to IRC wire format (without trailing \r\n).
    /// Tags are never sent; the bot only reads them.
    pub fn format(&self) -> String {
        let mut out = String::with_capacity(512);

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        for (i, param) in self.params.iter().enumerate() {
            out.push(' ');
            if i == self.params.len() - 1 && (param.contains(' ') || param.is_empty()) {
                out.push(':');
            }
            // Strip \r\n to prevent command injection via channel names or tokens
            let sanitized = param.replace(['\r', '\n'], " ");
            out.push_str(&sanitized);
        }

        out
    }

    /// Nickname part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split('!').next().unwrap_or(prefix);
        (!nick.is_empty() && prefix.contains('!')).then_some(nick)
    }

    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

fn parse_tags(raw: &str) -> Tags {
    raw.split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), unescape_tag_value(v)),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// IRCv3 tag value unescaping: `\:` `\s` `\\` `\r` `\n`.
fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
