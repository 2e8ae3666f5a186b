//! Command verbs and the per-command enablement policy.
//!
//! Once a frame is parsed, the verb is converted into [`Command`] so dispatch
//! works on an enum instead of repeated string comparisons. Which commands a
//! session may actually use is governed by [`CmdState`]; the only negotiable
//! command in protocol version 0 is `syslog`, the rest are part of the
//! protocol machinery itself.

use crate::error::{RelpError, RelpResult};

/// The command verbs of RELP v0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Open,
    Close,
    Syslog,
    Serverclose,
    Rsp,
}

impl Command {
    /// Wire representation of the verb.
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::Open => "open",
            Command::Close => "close",
            Command::Syslog => "syslog",
            Command::Serverclose => "serverclose",
            Command::Rsp => "rsp",
        }
    }

    /// Parse a received verb. Unknown verbs abort the session with
    /// `InvalidCmd` per the protocol specification.
    pub fn parse(verb: &str) -> RelpResult<Command> {
        match verb {
            "open" => Ok(Command::Open),
            "close" => Ok(Command::Close),
            "syslog" => Ok(Command::Syslog),
            "serverclose" => Ok(Command::Serverclose),
            "rsp" => Ok(Command::Rsp),
            other => Err(RelpError::InvalidCmd(other.to_string())),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enablement state of a negotiable command.
///
/// `Forbidden` is sticky: once set it can never be relaxed again. After the
/// open handshake every command still `Unset` becomes `Forbidden`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CmdState {
    #[default]
    Unset,
    Forbidden,
    Desired,
    Required,
    Enabled,
    Disabled,
}

/// Per-session command enablement table.
///
/// Protocol version 0 negotiates a single extension command (`syslog`), so
/// this is a struct rather than a map; adding a verb means adding a field and
/// extending the match arms.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandStates {
    syslog: CmdState,
}

impl CommandStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the state of a negotiable command by its wire name.
    ///
    /// A `Forbidden` command silently keeps its state; commands that are not
    /// negotiable yield `UnknownCmd`.
    pub fn set(&mut self, cmd: &str, state: CmdState) -> RelpResult<()> {
        match cmd {
            "syslog" => {
                if self.syslog != CmdState::Forbidden {
                    self.syslog = state;
                }
                Ok(())
            }
            other => {
                tracing::debug!(cmd = other, ?state, "tried to set unknown command state");
                Err(RelpError::UnknownCmd(other.to_string()))
            }
        }
    }

    pub fn syslog(&self) -> CmdState {
        self.syslog
    }

    /// Convert every `Unset` command to `Forbidden`. Must run when the
    /// negotiation surface is frozen (connect on the client, open handling on
    /// the server).
    pub fn fix_unset(&mut self) {
        if self.syslog == CmdState::Unset {
            self.syslog = CmdState::Forbidden;
        }
    }

    /// Names of the commands this side may offer to the peer.
    pub fn offerable(&self) -> Vec<&'static str> {
        let mut cmds = Vec::new();
        if matches!(
            self.syslog,
            CmdState::Enabled | CmdState::Desired | CmdState::Required
        ) {
            cmds.push("syslog");
        }
        cmds
    }

    /// True if some command is still `Required` after negotiation, which
    /// means the peer does not support a feature we cannot do without.
    pub fn required_missing(&self) -> bool {
        self.syslog == CmdState::Required
    }
}
