//! Operator console commands.
//!
//! One command per line of input:
//!
//! ```text
//! status                   show every line
//! lock <line|all>          switch to Locked
//! unlock <line|all>        switch to Unlocked
//! target <line> <THz>      set a new target
//! reset <line|all>         forget measurement and faults
//! save                     write current targets to the store
//! quit                     unlock everything and exit
//! help                     list commands
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use wlm_core::{Frequency, LineName};

/// Help text printed by the `help` command.
pub const HELP: &str = "\
commands:
  status                 show every line
  lock <line|all>        switch to Locked
  unlock <line|all>      switch to Unlocked
  target <line> <THz>    set a new target
  reset <line|all>       forget measurement and faults
  save                   write current targets to the store
  quit                   unlock everything and exit";

/// Lines addressed by a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSelector {
    All,
    One(LineName),
}

impl FromStr for LineSelector {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        LineName::new(s)
            .map(Self::One)
            .map_err(|e| ConsoleError::InvalidArgument(e.to_string()))
    }
}

impl fmt::Display for LineSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::One(line) => write!(f, "{line}"),
        }
    }
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Status,
    Lock(LineSelector),
    Unlock(LineSelector),
    Target(LineName, Frequency),
    Reset(LineSelector),
    Save,
    Quit,
    Help,
}

/// Console input that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}' (try 'help')")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut words = input.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ConsoleError::Empty);
        };
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("status" | "s", []) => Self::Status,
            ("lock", [line]) => Self::Lock(line.parse()?),
            ("lock", _) => return Err(ConsoleError::Usage("lock <line|all>")),
            ("unlock", [line]) => Self::Unlock(line.parse()?),
            ("unlock", _) => return Err(ConsoleError::Usage("unlock <line|all>")),
            ("target", [line, thz]) => {
                let line = LineName::new(*line)
                    .map_err(|e| ConsoleError::InvalidArgument(e.to_string()))?;
                let target = parse_thz(thz)?;
                Self::Target(line, target)
            }
            ("target", _) => return Err(ConsoleError::Usage("target <line> <THz>")),
            ("reset", [line]) => Self::Reset(line.parse()?),
            ("reset", _) => return Err(ConsoleError::Usage("reset <line|all>")),
            ("save", []) => Self::Save,
            ("quit" | "exit" | "q", []) => Self::Quit,
            ("help" | "?", _) => Self::Help,
            ("status" | "s" | "save" | "quit" | "exit" | "q", _) => {
                return Err(ConsoleError::Usage("command takes no arguments"))
            }
            (other, _) => return Err(ConsoleError::UnknownCommand(other.to_string())),
        };

        Ok(command)
    }
}

fn parse_thz(value: &str) -> Result<Frequency, ConsoleError> {
    let thz: f64 = value
        .parse()
        .map_err(|_| ConsoleError::InvalidArgument(format!("'{value}' is not a number")))?;
    Frequency::from_thz(thz).map_err(|e| ConsoleError::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str) -> LineName {
        LineName::new(name).unwrap()
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("status".parse(), Ok(ConsoleCommand::Status));
        assert_eq!("  SAVE ".parse(), Ok(ConsoleCommand::Save));
        assert_eq!("quit".parse(), Ok(ConsoleCommand::Quit));
        assert_eq!("exit".parse(), Ok(ConsoleCommand::Quit));
        assert_eq!("help".parse(), Ok(ConsoleCommand::Help));
    }

    #[test]
    fn test_parse_line_commands() {
        assert_eq!(
            "lock cooling".parse(),
            Ok(ConsoleCommand::Lock(LineSelector::One(line("cooling"))))
        );
        assert_eq!(
            "unlock all".parse(),
            Ok(ConsoleCommand::Unlock(LineSelector::All))
        );
        assert_eq!(
            "reset clock".parse(),
            Ok(ConsoleCommand::Reset(LineSelector::One(line("clock"))))
        );
    }

    #[test]
    fn test_parse_target() {
        let cmd: ConsoleCommand = "target cooling 710.96242".parse().unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Target(line("cooling"), Frequency::from_units(71_096_242_000))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<ConsoleCommand>(), Err(ConsoleError::Empty));
        assert!(matches!(
            "fly cooling".parse::<ConsoleCommand>(),
            Err(ConsoleError::UnknownCommand(_))
        ));
        assert!(matches!(
            "lock".parse::<ConsoleCommand>(),
            Err(ConsoleError::Usage(_))
        ));
        assert!(matches!(
            "target cooling fast".parse::<ConsoleCommand>(),
            Err(ConsoleError::InvalidArgument(_))
        ));
        assert!(matches!(
            "target cooling -5".parse::<ConsoleCommand>(),
            Err(ConsoleError::InvalidArgument(_))
        ));
        assert!(matches!(
            "save now".parse::<ConsoleCommand>(),
            Err(ConsoleError::Usage(_))
        ));
    }
}
