use snafu::{OptionExt, ResultExt, Snafu, ensure};

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: sends a new message, or replaces the draft while editing.
    Text(String),
    /// 1-based position in the listed view.
    Edit(usize),
    Save,
    Cancel,
    Delete(usize),
    List,
    Quit,
    Empty,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("unknown command '/{name}'"))]
    Unknown { stage: &'static str, name: String },
    #[snafu(display("'/{name}' needs a message number"))]
    MissingIndex { stage: &'static str, name: String },
    #[snafu(display("'{raw}' is not a message number"))]
    InvalidIndex {
        stage: &'static str,
        raw: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("message numbers start at 1"))]
    ZeroIndex { stage: &'static str },
    #[snafu(display("'/{name}' takes no arguments"))]
    UnexpectedArgument { stage: &'static str, name: String },
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(body) = trimmed.strip_prefix('/') else {
        return Ok(Command::Text(trimmed.to_string()));
    };

    let mut parts = body.split_whitespace();
    let name = parts.next().unwrap_or_default().to_ascii_lowercase();
    let argument = parts.next();

    match name.as_str() {
        "edit" => parse_index(&name, argument).map(Command::Edit),
        "delete" => parse_index(&name, argument).map(Command::Delete),
        "save" | "cancel" | "list" | "quit" => {
            ensure!(
                argument.is_none(),
                UnexpectedArgumentSnafu {
                    stage: "parse-command-arguments",
                    name: name.clone(),
                }
            );
            Ok(match name.as_str() {
                "save" => Command::Save,
                "cancel" => Command::Cancel,
                "list" => Command::List,
                _ => Command::Quit,
            })
        }
        _ => UnknownSnafu {
            stage: "parse-command-name",
            name,
        }
        .fail(),
    }
}

/// Answer to a pending delete confirmation; anything but yes declines.
pub fn parse_confirmation(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn parse_index(name: &str, argument: Option<&str>) -> Result<usize, CommandError> {
    let raw = argument.context(MissingIndexSnafu {
        stage: "parse-command-index",
        name,
    })?;
    let index = raw.parse::<usize>().context(InvalidIndexSnafu {
        stage: "parse-command-index",
        raw,
    })?;
    ensure!(
        index > 0,
        ZeroIndexSnafu {
            stage: "parse-command-index",
        }
    );
    Ok(index)
}
