//! Session lifecycle ledger
//!
//! Records the state of every session id this process created and enforces
//! a single terminal transition per id. Open sessions are kept until they
//! end; only the most recent [`TERMINAL_RETENTION`] terminal sessions are
//! remembered, older ones become unknown ids.

use std::collections::{HashMap, VecDeque};

use ownerkit_core::{ProxyError, Result, SessionState};
use parking_lot::Mutex;

/// Terminal sessions remembered for late commit or abandon attempts
pub const TERMINAL_RETENTION: usize = 64;

#[derive(Debug, Default)]
struct Entries {
    states: HashMap<i32, SessionState>,
    terminal: VecDeque<i32>,
}

impl Entries {
    fn finish(&mut self, session_id: i32, state: SessionState) {
        self.states.insert(session_id, state);
        self.terminal.push_back(session_id);
        while self.terminal.len() > TERMINAL_RETENTION {
            if let Some(oldest) = self.terminal.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }
}

/// Lifecycle state per session id
#[derive(Debug, Default)]
pub struct SessionLedger {
    entries: Mutex<Entries>,
}

impl SessionLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly created session
    pub fn register(&self, session_id: i32) {
        let mut entries = self.entries.lock();
        // platform ids can be reused once a session is gone
        entries.terminal.retain(|id| *id != session_id);
        entries.states.insert(session_id, SessionState::Created);
    }

    /// Current state, if the id is known
    pub fn state(&self, session_id: i32) -> Option<SessionState> {
        self.entries.lock().states.get(&session_id).copied()
    }

    /// Number of ids currently remembered
    pub fn len(&self) -> usize {
        self.entries.lock().states.len()
    }

    /// Whether no id is remembered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse `attempted` unless the session is open
    pub fn ensure_open(&self, session_id: i32, attempted: &'static str) -> Result<SessionState> {
        let entries = self.entries.lock();
        check_open(&entries.states, session_id, attempted)
    }

    /// Move an open session to `Writing`
    pub fn begin_write(&self, session_id: i32) -> Result<()> {
        let mut entries = self.entries.lock();
        check_open(&entries.states, session_id, "write")?;
        entries.states.insert(session_id, SessionState::Writing);
        Ok(())
    }

    /// Terminal transition to `Committed`
    pub fn mark_committed(&self, session_id: i32) -> Result<()> {
        let mut entries = self.entries.lock();
        check_open(&entries.states, session_id, "commit")?;
        entries.finish(session_id, SessionState::Committed);
        Ok(())
    }

    /// Terminal transition to `Abandoned`; `false` when the session was
    /// already terminal or unknown
    pub fn mark_abandoned(&self, session_id: i32) -> bool {
        let mut entries = self.entries.lock();
        match entries.states.get(&session_id) {
            Some(state) if !state.is_terminal() => {
                entries.finish(session_id, SessionState::Abandoned);
                true
            }
            _ => false,
        }
    }
}

fn check_open(
    states: &HashMap<i32, SessionState>,
    session_id: i32,
    attempted: &'static str,
) -> Result<SessionState> {
    match states.get(&session_id) {
        Some(state) if state.is_terminal() => Err(ProxyError::SessionState {
            session_id,
            state: *state,
            attempted,
        }),
        Some(state) => Ok(*state),
        None => Err(ProxyError::handle_unavailable(format!(
            "install session {session_id}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Write,
        Commit,
        Abandon,
    }

    fn steps() -> impl Strategy<Value = Vec<Step>> {
        proptest::collection::vec(
            prop_oneof![Just(Step::Write), Just(Step::Commit), Just(Step::Abandon)],
            0..12,
        )
    }

    #[test]
    fn abandon_after_commit_is_a_no_op() {
        let ledger = SessionLedger::new();
        ledger.register(7);
        assert!(ledger.begin_write(7).is_ok());
        assert!(ledger.mark_committed(7).is_ok());
        assert!(!ledger.mark_abandoned(7));
        assert_eq!(ledger.state(7), Some(SessionState::Committed));
    }

    #[test]
    fn commit_after_abandon_is_refused() {
        let ledger = SessionLedger::new();
        ledger.register(3);
        assert!(ledger.mark_abandoned(3));
        assert!(!ledger.mark_abandoned(3));
        assert!(matches!(
            ledger.mark_committed(3),
            Err(ProxyError::SessionState { state: SessionState::Abandoned, .. })
        ));
        assert!(ledger.begin_write(3).is_err());
    }

    #[test]
    fn unknown_sessions_are_rejected() {
        let ledger = SessionLedger::new();
        assert!(!ledger.mark_abandoned(11));
        assert!(ledger.ensure_open(11, "commit").is_err());
    }

    #[test]
    fn only_recent_terminal_sessions_are_retained() {
        let ledger = SessionLedger::new();
        ledger.register(0);
        let total = TERMINAL_RETENTION as i32 + 10;
        for id in 1..=total {
            ledger.register(id);
            if id % 2 == 0 {
                assert!(ledger.mark_committed(id).is_ok());
            } else {
                assert!(ledger.mark_abandoned(id));
            }
        }
        // the open session plus the retained terminal ones
        assert_eq!(ledger.len(), TERMINAL_RETENTION + 1);
        assert_eq!(ledger.state(0), Some(SessionState::Created));
        assert_eq!(ledger.state(total), Some(SessionState::Committed));

        assert_eq!(ledger.state(1), None);
        assert!(!ledger.mark_abandoned(1));
        assert!(matches!(
            ledger.mark_committed(2),
            Err(ProxyError::HandleUnavailable { .. })
        ));
    }

    #[test]
    fn reused_ids_start_a_fresh_lifecycle() {
        let ledger = SessionLedger::new();
        ledger.register(5);
        assert!(ledger.mark_abandoned(5));
        ledger.register(5);
        assert_eq!(ledger.state(5), Some(SessionState::Created));
        assert!(ledger.mark_committed(5).is_ok());
        assert_eq!(ledger.len(), 1);
    }

    proptest! {
        #[test]
        fn exactly_one_terminal_transition(steps in steps()) {
            let ledger = SessionLedger::new();
            ledger.register(1);
            let mut terminal_transitions = 0;
            for step in steps {
                let was_terminal = ledger.state(1).map_or(false, |s| s.is_terminal());
                let transitioned = match step {
                    Step::Write => {
                        let ok = ledger.begin_write(1).is_ok();
                        prop_assert_eq!(ok, !was_terminal);
                        false
                    }
                    Step::Commit => ledger.mark_committed(1).is_ok(),
                    Step::Abandon => ledger.mark_abandoned(1),
                };
                if transitioned {
                    prop_assert!(!was_terminal);
                    terminal_transitions += 1;
                }
            }
            prop_assert!(terminal_transitions <= 1);
        }
    }
}
