//! Line-oriented operator console.
//!
//! Runs on its own thread. Queries and changes are sent to the navigation
//! session as [`ConsoleCommand`]s; `help` and input errors are answered here.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::Sender;

use thiserror::Error;
use tracing::debug;

use crate::arbitration::Strategy;
use crate::tag::normalize_uid;

/// Intent sent from the console to the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Learn,
    StopLearning,
    ShowMappings,
    ShowStats,
    /// `None` shows the current strategy and the choices.
    SetStrategy(Option<Strategy>),
    ShowHistory,
    AddMapping { uid: String, page: u32 },
    RemoveMapping { page: u32 },
    Quit,
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Empty,
    Help,
    Command(ConsoleCommand),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command '{0}' (type 'help')")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid UID '{0}' (expected hex, e.g. 04a21b22)")]
    InvalidUid(String),

    #[error("Invalid page '{0}'")]
    InvalidPage(String),

    #[error("Unknown strategy '{0}' (closest, newest, specific or 1-3)")]
    UnknownStrategy(String),
}

pub const HELP_TEXT: &str = "\
=== Commands ===
learn                     start learning mode (page 1 first)
stop_learning             leave learning mode
mappings | list           show page mappings
stats                     show navigation and multi-tag statistics
strategy [name|1-3]       show or change the tag selection strategy
history                   show recent detections
add_mapping <uid> <page>  map a tag to a page
remove_mapping <page>     remove a page mapping
help                      show this help
quit | exit               stop the program";

const ADD_USAGE: &str = "add_mapping <uid> <page>";
const REMOVE_USAGE: &str = "remove_mapping <page>";

fn parse_page(text: &str) -> Result<u32, ConsoleError> {
    text.parse()
        .map_err(|_| ConsoleError::InvalidPage(text.to_string()))
}

/// Parse one console line. Command words are case-insensitive.
pub fn parse_line(line: &str) -> Result<ConsoleInput, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(ConsoleInput::Empty);
    };
    let args: Vec<&str> = words.collect();

    let command = match head.to_ascii_lowercase().as_str() {
        "help" | "?" => return Ok(ConsoleInput::Help),
        "learn" => ConsoleCommand::Learn,
        "stop_learning" => ConsoleCommand::StopLearning,
        "mappings" | "list" => ConsoleCommand::ShowMappings,
        "stats" => ConsoleCommand::ShowStats,
        "history" => ConsoleCommand::ShowHistory,
        "quit" | "exit" => ConsoleCommand::Quit,
        "strategy" => match args.first() {
            None => ConsoleCommand::SetStrategy(None),
            Some(name) => {
                let strategy = name
                    .parse::<Strategy>()
                    .map_err(|_| ConsoleError::UnknownStrategy(name.to_string()))?;
                ConsoleCommand::SetStrategy(Some(strategy))
            }
        },
        "add_mapping" => {
            let &[uid, page] = args.as_slice() else {
                return Err(ConsoleError::Usage(ADD_USAGE));
            };
            ConsoleCommand::AddMapping {
                uid: normalize_uid(uid).ok_or_else(|| ConsoleError::InvalidUid(uid.to_string()))?,
                page: parse_page(page)?,
            }
        }
        "remove_mapping" => {
            let &[page] = args.as_slice() else {
                return Err(ConsoleError::Usage(REMOVE_USAGE));
            };
            ConsoleCommand::RemoveMapping {
                page: parse_page(page)?,
            }
        }
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(ConsoleInput::Command(command))
}

/// Read commands until EOF, `quit`, or the session hangs up.
///
/// EOF ends only the console; the session keeps polling.
pub fn run_console<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    commands: Sender<ConsoleCommand>,
) -> io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            debug!("Console input closed");
            return Ok(());
        }

        match parse_line(&line) {
            Ok(ConsoleInput::Empty) => {}
            Ok(ConsoleInput::Help) => writeln!(output, "{}", HELP_TEXT)?,
            Ok(ConsoleInput::Command(command)) => {
                let quit = command == ConsoleCommand::Quit;
                if commands.send(command).is_err() {
                    debug!("Session gone; console exiting");
                    return Ok(());
                }
                if quit {
                    return Ok(());
                }
            }
            Err(e) => writeln!(output, "{}", e)?,
        }
        output.flush()?;
    }
}
