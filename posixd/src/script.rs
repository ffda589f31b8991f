//! # Session Scripts
//!
//! A line-based format describing a client session against the server, for
//! demos and deterministic runs.
//!
//! ## Format
//!
//! Each line is one command. Objects are bound to names and referred to by
//! name afterwards.
//!
//! - `pipe <name> [buffered|unbuffered] [r|w|rw]`: create a pipe
//! - `lookup <name> <path>`: bind the object linked at a path
//! - `open <name> <path> [r|w|rw] [nonblock]`: open a path, binding what
//!   the server hands out
//! - `pty <master> <slave>`: open `/dev/ptmx` and bind both ends
//! - `close <name> [r|w|rw]`
//! - `write <name> "text" [nonblock]`
//! - `read <name> <size> [nonblock]`
//! - `link <name> <path>` / `unlink <name> <path>`
//! - `queue <name>`: open a notification queue
//! - `subscribe <queue> <target> <types> [flag...]`: flags are `add`,
//!   `delete`, `enable`, `disable`, `oneshot`, `dispatch`, `clear`
//!   (default `add`); types are comma-separated (`data-in,gone`)
//! - `post <target> <type> [count]`: report an event through the sink
//! - `events <queue> <max> [forever|<duration>]`
//! - `getattr <name> poll|mask|size`
//! - `unlock <name>` / `destroy <name>`
//! - `wait <duration>`: pause (`100ms`, `2s`)
//! - Comments start with `#`
//!
//! ## Example
//!
//! ```text
//! # Hand a message through a buffered pipe
//! pipe p buffered rw
//! write p "hello"
//! read p 5
//! close p rw
//! ```

use ipc::{AttrType, EventMask, EventType, IoMode, OpenFlags, SubscriptionFlags, WaitMode};
use std::collections::VecDeque;
use thiserror::Error;

/// Script error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unterminated string")]
    UnterminatedString,

    #[error("Invalid delay format: {0}")]
    InvalidDelay(String),

    #[error("Empty script")]
    EmptyScript,
}

/// One client operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Pipe {
        name: String,
        buffered: bool,
        open: OpenFlags,
    },
    Lookup {
        name: String,
        path: String,
    },
    Open {
        name: String,
        path: String,
        flags: OpenFlags,
    },
    Pty {
        master: String,
        slave: String,
    },
    Close {
        name: String,
        flags: OpenFlags,
    },
    Write {
        name: String,
        data: Vec<u8>,
        mode: IoMode,
    },
    Read {
        name: String,
        size: usize,
        mode: IoMode,
    },
    Link {
        name: String,
        path: String,
    },
    Unlink {
        name: String,
        path: String,
    },
    Queue {
        name: String,
    },
    Subscribe {
        queue: String,
        target: String,
        types: EventMask,
        flags: SubscriptionFlags,
    },
    Post {
        target: String,
        event_type: EventType,
        count: u32,
    },
    Events {
        queue: String,
        max: usize,
        wait: WaitMode,
    },
    GetAttr {
        name: String,
        attr: AttrType,
    },
    Unlock {
        name: String,
    },
    Destroy {
        name: String,
    },
    /// Pause for milliseconds
    Wait(u64),
}

/// A parsed command with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    /// 1-based source line
    pub line: usize,
    /// Source text, trimmed
    pub text: String,
    pub command: ScriptCommand,
}

/// Parsed session script
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    steps: VecDeque<ScriptStep>,
}

impl SessionScript {
    /// Parses a script from text
    pub fn from_text(text: &str) -> Result<Self, ScriptError> {
        let mut steps = VecDeque::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let command = Self::parse_line(line).map_err(|e| ScriptError::ParseError {
                line: index + 1,
                message: e.to_string(),
            })?;
            steps.push_back(ScriptStep {
                line: index + 1,
                text: line.to_string(),
                command,
            });
        }

        if steps.is_empty() {
            return Err(ScriptError::EmptyScript);
        }
        Ok(Self { steps })
    }

    /// Parses one command line
    pub fn parse_line(line: &str) -> Result<ScriptCommand, ScriptError> {
        let tokens = tokenize(line)?;
        let mut args = Args::new(&tokens);
        let verb = args.word("command")?;

        let command = match verb.as_str() {
            "pipe" => {
                let name = args.word("name")?;
                let mut buffered = true;
                let mut open = OpenFlags::read_write();
                while let Some(token) = args.next() {
                    match token.as_str() {
                        "buffered" => buffered = true,
                        "unbuffered" => buffered = false,
                        other => open = parse_access(other)?,
                    }
                }
                ScriptCommand::Pipe {
                    name,
                    buffered,
                    open,
                }
            }
            "lookup" => ScriptCommand::Lookup {
                name: args.word("name")?,
                path: args.word("path")?,
            },
            "open" => {
                let name = args.word("name")?;
                let path = args.word("path")?;
                let flags = parse_open_flags(&mut args)?;
                ScriptCommand::Open { name, path, flags }
            }
            "pty" => ScriptCommand::Pty {
                master: args.word("master")?,
                slave: args.word("slave")?,
            },
            "close" => {
                let name = args.word("name")?;
                let flags = parse_open_flags(&mut args)?;
                ScriptCommand::Close { name, flags }
            }
            "write" => {
                let name = args.word("name")?;
                let data = args.word("data")?.into_bytes();
                let mode = parse_mode(&mut args)?;
                ScriptCommand::Write { name, data, mode }
            }
            "read" => {
                let name = args.word("name")?;
                let size = args.number("size")?;
                let mode = parse_mode(&mut args)?;
                ScriptCommand::Read { name, size, mode }
            }
            "link" => ScriptCommand::Link {
                name: args.word("name")?,
                path: args.word("path")?,
            },
            "unlink" => ScriptCommand::Unlink {
                name: args.word("name")?,
                path: args.word("path")?,
            },
            "queue" => ScriptCommand::Queue {
                name: args.word("name")?,
            },
            "subscribe" => {
                let queue = args.word("queue")?;
                let target = args.word("target")?;
                let types = parse_types(&args.word("types")?)?;
                let mut flags = SubscriptionFlags::default();
                while let Some(token) = args.next() {
                    match token.as_str() {
                        "add" => flags.add = true,
                        "delete" => flags.delete = true,
                        "enable" => flags.enable = true,
                        "disable" => flags.disable = true,
                        "oneshot" => flags.oneshot = true,
                        "dispatch" => flags.dispatch = true,
                        "clear" => flags.clear = true,
                        other => {
                            return Err(ScriptError::InvalidArgument(format!(
                                "subscription flag {}",
                                other
                            )))
                        }
                    }
                }
                if !(flags.add || flags.delete || flags.enable || flags.disable || flags.clear) {
                    flags.add = true;
                }
                ScriptCommand::Subscribe {
                    queue,
                    target,
                    types,
                    flags,
                }
            }
            "post" => {
                let target = args.word("target")?;
                let event_type = parse_type(&args.word("type")?)?;
                let count = match args.next() {
                    Some(count) => count
                        .parse()
                        .map_err(|_| ScriptError::InvalidArgument(format!("count {}", count)))?,
                    None => 1,
                };
                ScriptCommand::Post {
                    target,
                    event_type,
                    count,
                }
            }
            "events" => {
                let queue = args.word("queue")?;
                let max = args.number("max")?;
                let wait = match args.next() {
                    None => WaitMode::NoWait,
                    Some(token) if token == "forever" => WaitMode::Forever,
                    Some(token) => WaitMode::Timeout {
                        millis: parse_duration(token)?,
                    },
                };
                ScriptCommand::Events { queue, max, wait }
            }
            "getattr" => {
                let name = args.word("name")?;
                let attr = match args.word("attribute")?.as_str() {
                    "poll" => AttrType::PollStatus,
                    "mask" => AttrType::EventMask,
                    "size" => AttrType::Size,
                    other => {
                        return Err(ScriptError::InvalidArgument(format!("attribute {}", other)))
                    }
                };
                ScriptCommand::GetAttr { name, attr }
            }
            "unlock" => ScriptCommand::Unlock {
                name: args.word("name")?,
            },
            "destroy" => ScriptCommand::Destroy {
                name: args.word("name")?,
            },
            "wait" => ScriptCommand::Wait(parse_duration(&args.word("duration")?)?),
            other => return Err(ScriptError::UnknownCommand(other.to_string())),
        };

        if let Some(extra) = args.next() {
            return Err(ScriptError::InvalidArgument(format!("unexpected {}", extra)));
        }
        Ok(command)
    }

    /// Returns the next step, if any
    pub fn next_step(&mut self) -> Option<ScriptStep> {
        self.steps.pop_front()
    }

    /// Returns true if the script has more steps
    pub fn has_more(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Returns the number of remaining steps
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

/// Splits a line on whitespace, keeping quoted strings whole
///
/// Inside quotes `\n`, `\t`, `\"` and `\\` are unescaped. A `#` outside
/// quotes starts a trailing comment.
fn tokenize(line: &str) -> Result<Vec<String>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '#' {
            break;
        } else if c == '"' {
            chars.next();
            let mut token = String::new();
            loop {
                match chars.next() {
                    None => return Err(ScriptError::UnterminatedString),
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => token.push('\n'),
                        Some('t') => token.push('\t'),
                        Some(other) => token.push(other),
                        None => return Err(ScriptError::UnterminatedString),
                    },
                    Some(other) => token.push(other),
                }
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }
    Ok(tokens)
}

struct Args<'a> {
    tokens: std::slice::Iter<'a, String>,
}

impl<'a> Args<'a> {
    fn new(tokens: &'a [String]) -> Self {
        Self {
            tokens: tokens.iter(),
        }
    }

    fn next(&mut self) -> Option<&'a String> {
        self.tokens.next()
    }

    fn word(&mut self, what: &'static str) -> Result<String, ScriptError> {
        self.next()
            .cloned()
            .ok_or(ScriptError::MissingArgument(what))
    }

    fn number(&mut self, what: &'static str) -> Result<usize, ScriptError> {
        let token = self.word(what)?;
        token
            .parse()
            .map_err(|_| ScriptError::InvalidArgument(format!("{} {}", what, token)))
    }
}

fn parse_access(token: &str) -> Result<OpenFlags, ScriptError> {
    match token {
        "r" => Ok(OpenFlags::read_only()),
        "w" => Ok(OpenFlags::write_only()),
        "rw" => Ok(OpenFlags::read_write()),
        other => Err(ScriptError::InvalidArgument(format!("access {}", other))),
    }
}

fn parse_open_flags(args: &mut Args<'_>) -> Result<OpenFlags, ScriptError> {
    let mut flags = OpenFlags::read_write();
    while let Some(token) = args.next() {
        flags = match token.as_str() {
            "nonblock" => flags.nonblocking(),
            other => {
                let access = parse_access(other)?;
                OpenFlags {
                    nonblock: flags.nonblock,
                    ..access
                }
            }
        };
    }
    Ok(flags)
}

fn parse_mode(args: &mut Args<'_>) -> Result<IoMode, ScriptError> {
    match args.next().map(String::as_str) {
        None => Ok(IoMode::Blocking),
        Some("nonblock") => Ok(IoMode::NonBlocking),
        Some(other) => Err(ScriptError::InvalidArgument(format!("mode {}", other))),
    }
}

fn parse_type(name: &str) -> Result<EventType, ScriptError> {
    match name {
        "data-in" => Ok(EventType::DATA_IN),
        "data-out" => Ok(EventType::DATA_OUT),
        "error" => Ok(EventType::ERROR),
        "gone" => Ok(EventType::GONE),
        other => other
            .parse::<u8>()
            .ok()
            .and_then(EventType::new)
            .ok_or_else(|| ScriptError::InvalidArgument(format!("event type {}", other))),
    }
}

fn parse_types(list: &str) -> Result<EventMask, ScriptError> {
    list.split(',').map(parse_type).collect()
}

/// Parses a duration string (e.g., "100ms", "1s") into milliseconds
fn parse_duration(s: &str) -> Result<u64, ScriptError> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim()
            .parse::<u64>()
            .map_err(|_| ScriptError::InvalidDelay(s.to_string()))
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim()
            .parse::<u64>()
            .map(|secs| secs * 1000)
            .map_err(|_| ScriptError::InvalidDelay(s.to_string()))
    } else {
        Err(ScriptError::InvalidDelay(s.to_string()))
    }
}
