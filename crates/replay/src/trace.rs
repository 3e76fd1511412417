//! Trace file parser.
//!
//! A trace is a sequence of commands, one per line. Everything after `#` is a
//! comment and blank lines are ignored.
//!
//! ```text
//! alloc <size> [align]   allocate, label the result @0, @1, ...
//! free [@N]              release @N (or the last allocation for stacks)
//! clear                  release every allocation
//! reset                  release the buffer
//! policy first|best      switch the fit policy of a free list
//! dump                   print the chunk map
//! ```

use core::{fmt, num::ParseIntError};

use bufalloc::free_list::{FitPolicy, ParseFitPolicyError};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use snafu_utils::Location;

/// Label of a successful allocation, written `@N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub usize);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Alloc { size: usize, align: Option<usize> },
    Free(Option<Handle>),
    Clear,
    Reset,
    Policy(FitPolicy),
    Dump,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc { size, align: None } => write!(f, "alloc {size}"),
            Self::Alloc {
                size,
                align: Some(align),
            } => write!(f, "alloc {size} {align}"),
            Self::Free(None) => write!(f, "free"),
            Self::Free(Some(handle)) => write!(f, "free {handle}"),
            Self::Clear => write!(f, "clear"),
            Self::Reset => write!(f, "reset"),
            Self::Policy(policy) => write!(f, "policy {policy}"),
            Self::Dump => write!(f, "dump"),
        }
    }
}

/// A command together with the 1-based line it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    pub command: Command,
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum ParseError {
    #[snafu(display("line {line}: unknown command `{command}`"))]
    UnknownCommand {
        line: usize,
        command: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: `{command}` expects {expected}"))]
    MissingArgument {
        line: usize,
        command: &'static str,
        expected: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: unexpected argument `{token}`"))]
    UnexpectedArgument {
        line: usize,
        token: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: invalid number `{token}`"))]
    InvalidNumber {
        line: usize,
        token: String,
        #[snafu(source)]
        source: ParseIntError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: invalid handle `{token}`, expected `@N`"))]
    InvalidHandle {
        line: usize,
        token: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: invalid policy"))]
    InvalidPolicy {
        line: usize,
        #[snafu(source)]
        source: ParseFitPolicyError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Parses a whole trace.
pub fn parse(input: &str) -> Result<Vec<Line>, ParseError> {
    input
        .lines()
        .enumerate()
        .filter_map(|(index, text)| parse_line(index + 1, text).transpose())
        .collect()
}

/// Parses one line, returning `None` for blank and comment-only lines.
pub fn parse_line(number: usize, text: &str) -> Result<Option<Line>, ParseError> {
    let text = text.split_once('#').map_or(text, |(code, _comment)| code);
    let mut tokens = text.split_whitespace();
    let Some(name) = tokens.next() else {
        return Ok(None);
    };

    let command = match name {
        "alloc" => {
            let size = tokens.next().context(parse_error::MissingArgumentSnafu {
                line: number,
                command: "alloc",
                expected: "a size",
            })?;
            let size = number_arg(number, size)?;
            let align = tokens.next().map(|token| number_arg(number, token)).transpose()?;
            Command::Alloc { size, align }
        }
        "free" => Command::Free(tokens.next().map(|token| handle_arg(number, token)).transpose()?),
        "clear" => Command::Clear,
        "reset" => Command::Reset,
        "policy" => {
            let policy = tokens.next().context(parse_error::MissingArgumentSnafu {
                line: number,
                command: "policy",
                expected: "`first` or `best`",
            })?;
            Command::Policy(
                policy
                    .parse()
                    .context(parse_error::InvalidPolicySnafu { line: number })?,
            )
        }
        "dump" => Command::Dump,
        _ => {
            return parse_error::UnknownCommandSnafu {
                line: number,
                command: name,
            }
            .fail();
        }
    };

    if let Some(token) = tokens.next() {
        return parse_error::UnexpectedArgumentSnafu {
            line: number,
            token,
        }
        .fail();
    }
    Ok(Some(Line { number, command }))
}

fn number_arg(line: usize, token: &str) -> Result<usize, ParseError> {
    token
        .parse()
        .context(parse_error::InvalidNumberSnafu { line, token })
}

fn handle_arg(line: usize, token: &str) -> Result<Handle, ParseError> {
    token
        .strip_prefix('@')
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
        .map(Handle)
        .context(parse_error::InvalidHandleSnafu { line, token })
}
