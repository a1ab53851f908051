//! Connection status.

use std::fmt;

/// Whether a connection is usable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnStatus {
    /// Dialed or accepted and reading.
    Online,
    /// Never booted, closed, or lost.
    #[default]
    Offline,
}

impl ConnStatus {
    /// Whether this is [`ConnStatus::Online`].
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("ON-LINE"),
            Self::Offline => f.write_str("OFF-LINE"),
        }
    }
}
