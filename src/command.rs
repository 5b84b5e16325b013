//! Turret wire commands
//!
//! The microcontroller parses one ASCII token per line. The core only emits
//! the four direction tokens itself; operator commands pass through verbatim.

use crate::error::{TurretError, TurretResult};
use std::fmt;

/// Line terminator appended to every command on the wire.
pub const LINE_TERMINATOR: &str = "\n";

/// A single command for the turret controller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Tilt up
    Up,
    /// Tilt down
    Down,
    /// Pan left
    Left,
    /// Pan right
    Right,
    /// Operator-supplied token, not interpreted here
    Raw(String),
}

impl Command {
    /// Build a pass-through command from an operator token.
    ///
    /// The token is not validated against any command set. It is only
    /// rejected when it would break line framing: empty, or containing a
    /// line break.
    pub fn raw(token: impl Into<String>) -> TurretResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(TurretError::Configuration(
                "Command token cannot be empty".to_string(),
            ));
        }
        if token.contains(['\n', '\r']) {
            return Err(TurretError::Configuration(format!(
                "Command token {token:?} contains a line break"
            )));
        }
        Ok(Command::Raw(token))
    }

    /// Token as sent on the wire, without terminator.
    pub fn token(&self) -> &str {
        match self {
            Command::Up => "UP",
            Command::Down => "DOWN",
            Command::Left => "LEFT",
            Command::Right => "RIGHT",
            Command::Raw(token) => token,
        }
    }

    /// Newline-terminated UTF-8 bytes for the serial link.
    pub fn to_line(&self) -> Vec<u8> {
        format!("{}{}", self.token(), LINE_TERMINATOR).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
