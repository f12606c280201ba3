//! Connection finite-state machine (FSM) types.
//!
//! Both roles walk the same five states, each with its own transition table.
//! Transitions are driven by the engines ([`crate::sender`],
//! [`crate::receiver`]); this module only names the states and checks which
//! moves are legal.
//!
//! ```text
//!  Sender:    Idle ─SYN sent─▶ Connect ─ACK─▶ Transfer ─all data ACKed─▶ Closing ─ACK(FIN)─▶ Terminated
//!  Receiver:  Idle ─SYN rcvd─▶ Connect ─DATA─▶ Transfer ─FIN rcvd──────▶ Closing ─linger───▶ Terminated
//!
//!  Either role: RESET ─▶ Terminated (from any state); the sender also
//!  reaches Terminated from Connect when the SYN budget is spent.
//! ```

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state.
    #[default]
    Idle,
    /// Handshake in progress.
    Connect,
    /// Data segments flowing.
    Transfer,
    /// Sender: FIN outstanding.  Receiver: lingering after FIN.
    Closing,
    /// Connection torn down; nothing further is sent or accepted.
    Terminated,
}

impl ConnectionState {
    /// `true` once the connection is gone.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Terminated
    }

    /// Whether `self → next` is a legal move.
    ///
    /// `Transfer → Closing` with no data in between is legal: an empty file
    /// goes straight from handshake to teardown.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Terminated) => !self.is_terminal(),
            (Idle, Connect) | (Connect, Transfer) | (Transfer, Closing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "NONE",
            ConnectionState::Connect => "CONNECT",
            ConnectionState::Transfer => "TRANSFER",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}
