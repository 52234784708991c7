// Handle Lifecycle
//
// Tracks whether a table handle has loaded a snapshot and may serve
// reads. Transitions are driven by open attempts and explicit close.

/// Lifecycle state of a table handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Created, nothing loaded yet.
    Unopened,

    /// A load is in flight.
    Opening,

    /// A snapshot is published and reads are served.
    Ready,

    /// Closed; every further call fails.
    Closed,
}

/// Events that move a handle between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleEvent {
    BeginOpen,
    OpenSucceeded,
    OpenFailed,
    Close,
}

/// Errors produced during state transitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("table handle has not loaded a snapshot")]
    NotInitialized,

    #[error("table handle is closed")]
    Closed,
}

/// Reducer for handle events.
#[derive(Debug)]
pub struct HandleStateMachine {
    state: HandleState,
}

impl Default for HandleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleStateMachine {
    pub fn new() -> Self {
        Self {
            state: HandleState::Unopened,
        }
    }

    /// Apply a single event.
    pub fn apply(&mut self, event: HandleEvent) -> Result<(), StateError> {
        use HandleEvent::*;
        use HandleState::*;

        self.state = match (self.state, event) {
            (Closed, _) => return Err(StateError::Closed),

            (Unopened, BeginOpen) => Opening,
            (Opening, OpenSucceeded) => Ready,
            (Opening, OpenFailed) => Unopened,

            // Reloads keep serving the published snapshot whatever the outcome
            (Ready, BeginOpen | OpenSucceeded | OpenFailed) => Ready,

            (_, Close) => Closed,

            (state, evt) => {
                return Err(StateError::IllegalTransition(format!(
                    "cannot apply {:?} while in {:?}",
                    evt, state
                )))
            }
        };

        Ok(())
    }

    pub fn current_state(&self) -> HandleState {
        self.state
    }

    /// Fails unless a snapshot has been published at least once.
    pub fn ensure_ready(&self) -> Result<(), StateError> {
        match self.state {
            HandleState::Ready => Ok(()),
            HandleState::Closed => Err(StateError::Closed),
            HandleState::Unopened | HandleState::Opening => Err(StateError::NotInitialized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_lifecycle() {
        let mut sm = HandleStateMachine::new();

        sm.apply(HandleEvent::BeginOpen).unwrap();
        assert_eq!(sm.current_state(), HandleState::Opening);

        sm.apply(HandleEvent::OpenSucceeded).unwrap();
        assert_eq!(sm.current_state(), HandleState::Ready);
        sm.ensure_ready().unwrap();

        sm.apply(HandleEvent::Close).unwrap();
        assert_eq!(sm.ensure_ready(), Err(StateError::Closed));
    }

    #[test]
    fn failed_open_returns_to_unopened() {
        let mut sm = HandleStateMachine::new();
        sm.apply(HandleEvent::BeginOpen).unwrap();
        sm.apply(HandleEvent::OpenFailed).unwrap();

        assert_eq!(sm.current_state(), HandleState::Unopened);
        assert_eq!(sm.ensure_ready(), Err(StateError::NotInitialized));
    }

    #[test]
    fn failed_reload_stays_ready() {
        let mut sm = HandleStateMachine::new();
        sm.apply(HandleEvent::BeginOpen).unwrap();
        sm.apply(HandleEvent::OpenSucceeded).unwrap();

        sm.apply(HandleEvent::BeginOpen).unwrap();
        sm.apply(HandleEvent::OpenFailed).unwrap();
        assert_eq!(sm.current_state(), HandleState::Ready);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut sm = HandleStateMachine::new();

        let err = sm.apply(HandleEvent::OpenSucceeded).unwrap_err();

        assert!(matches!(err, StateError::IllegalTransition(_)));
    }

    #[test]
    fn closed_handle_rejects_everything() {
        let mut sm = HandleStateMachine::new();
        sm.apply(HandleEvent::Close).unwrap();

        assert_eq!(sm.apply(HandleEvent::BeginOpen), Err(StateError::Closed));
        assert_eq!(sm.apply(HandleEvent::Close), Err(StateError::Closed));
    }
}
