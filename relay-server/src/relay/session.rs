//! Per-connection session state and the recovery decision inputs.

use relay_shared::models::Handshake;
use tracing::trace;

use super::hub::SessionId;

/// Lifecycle of one connection.
///
/// `Replaying` is entered only for non-recovered sessions, and completes
/// before any inbound publish from that session is processed. `Active` is
/// the steady state; `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connection accepted, recovery decision pending.
    Connecting,
    /// Delivering the replay gap to this session only.
    Replaying,
    /// Inbound publishes are appended and broadcast.
    Active,
    /// Terminal; membership has been released.
    Disconnected,
}

/// One live connection's recovery state.
///
/// Created on connect, discarded on disconnect. Carries no state across
/// disconnects: `recovered` is trusted as supplied by the transport layer
/// and `declared_offset` is an unverified client hint.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    author: String,
    declared_offset: i64,
    recovered: bool,
    phase: SessionPhase,
}

impl Session {
    /// Builds a session from a handshake, applying the `"anonymous"` /
    /// offset-0 defaults.
    #[must_use]
    pub fn new(handshake: &Handshake) -> Self {
        Self {
            id: SessionId::new(),
            author: handshake.author(),
            declared_offset: handshake.declared_offset(),
            recovered: handshake.recovered,
            phase: SessionPhase::Connecting,
        }
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Author label for everything this session publishes.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Highest id the client claims to have already seen.
    #[must_use]
    pub fn declared_offset(&self) -> i64 {
        self.declared_offset
    }

    /// Whether the transport resumed this session with no events missed.
    #[must_use]
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn begin_replay(&mut self) {
        debug_assert_eq!(self.phase, SessionPhase::Connecting);
        self.transition(SessionPhase::Replaying);
    }

    pub(crate) fn activate(&mut self) {
        debug_assert!(matches!(
            self.phase,
            SessionPhase::Connecting | SessionPhase::Replaying
        ));
        self.transition(SessionPhase::Active);
    }

    pub(crate) fn close(&mut self) {
        self.transition(SessionPhase::Disconnected);
    }

    fn transition(&mut self, next: SessionPhase) {
        trace!(session = %self.id, from = ?self.phase, to = ?next, "session transition");
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_applies_handshake_defaults() {
        let session = Session::new(&Handshake::default());

        assert_eq!(session.author(), "anonymous");
        assert_eq!(session.declared_offset(), 0);
        assert!(!session.recovered());
        assert_eq!(session.phase(), SessionPhase::Connecting);
    }

    #[test]
    fn test_session_carries_declared_handshake_values() {
        let session = Session::new(&Handshake {
            username: Some("ada".to_string()),
            server_offset: Some(41),
            recovered: true,
        });

        assert_eq!(session.author(), "ada");
        assert_eq!(session.declared_offset(), 41);
        assert!(session.recovered());
    }

    #[test]
    fn test_fresh_session_walks_the_replay_path() {
        let mut session = Session::new(&Handshake::default());

        session.begin_replay();
        assert_eq!(session.phase(), SessionPhase::Replaying);

        session.activate();
        assert_eq!(session.phase(), SessionPhase::Active);

        session.close();
        assert_eq!(session.phase(), SessionPhase::Disconnected);
    }

    #[test]
    fn test_recovered_session_skips_straight_to_active() {
        let mut session = Session::new(&Handshake {
            username: None,
            server_offset: None,
            recovered: true,
        });

        session.activate();
        assert_eq!(session.phase(), SessionPhase::Active);
    }
}
