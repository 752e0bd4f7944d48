//! Session lifecycle state machine using rust-fsm.
//!
//! This module defines an explicit finite state machine for the session
//! side of authentication, so transient operations (logging in, validating
//! a stored token, refreshing, logging out) are tracked as states instead
//! of being derived from storage checks.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │    SignedOut    │ (initial)
//! └────────┬────────┘
//!          │ LoginAttempt / BootstrapStarted / TokenDetected
//!          ▼
//! ┌─────────────────┐     ┌─────────────────┐     ┌───────────────────┐
//! │    LoggingIn    │     │   Validating    │ ◄── │ PendingValidation │
//! └────────┬────────┘     └────────┬────────┘     └───────────────────┘
//!          │                       │
//!          │ LoginSuccess          │ ServerAccepted ──► SignedIn
//!          │                       │ ServerRejected ──► SignedOut
//!          ▼                       ▼
//! ┌─────────────────┐      RefreshRequested   ┌─────────────────┐
//! │    SignedIn     │ ──────────────────────► │   Refreshing    │
//! └────────┬────────┘                         └────────┬────────┘
//!          │                                           │
//!          │ LogoutRequested                           │ RefreshSuccess/Deferred/Failed
//!          ▼                                           ▼
//! ┌─────────────────┐                         SignedIn / SignedOut
//! │   SigningOut    │
//! └────────┬────────┘
//!          │ LogoutComplete
//!          ▼
//!      SignedOut
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};

// Define the FSM using rust-fsm's declarative macro.
// This generates a module `session_lifecycle` with:
// - session_lifecycle::State (enum)
// - session_lifecycle::Input (enum)
// - session_lifecycle::StateMachine (type alias)
//
// The self-loops (LoginAttempt in LoggingIn, BootstrapStarted in
// Validating, RefreshRequested in Refreshing) exist so an operation whose
// future was dropped mid-flight can be re-entered instead of wedging the
// machine in a transient state.
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_lifecycle(SignedOut)

    SignedOut => {
        TokenDetected => PendingValidation,
        LoginAttempt => LoggingIn,
        BootstrapStarted => Validating
    },
    PendingValidation => {
        BootstrapStarted => Validating,
        LoginAttempt => LoggingIn,
        NoToken => SignedOut
    },
    Validating => {
        BootstrapStarted => Validating,
        LoginAttempt => LoggingIn,
        ServerAccepted => SignedIn,
        ServerRejected => SignedOut
    },
    LoggingIn => {
        LoginAttempt => LoggingIn,
        LoginSuccess => SignedIn,
        LoginFailed => SignedOut
    },
    SignedIn => {
        RefreshRequested => Refreshing,
        LogoutRequested => SigningOut
    },
    Refreshing => {
        RefreshRequested => Refreshing,
        RefreshSuccess => SignedIn,
        RefreshDeferred => SignedIn,
        RefreshFailed => SignedOut
    },
    SigningOut => {
        LogoutComplete => SignedOut
    }
}

// Re-export the generated types with clearer names
pub use session_lifecycle::Input as LifecycleInput;
pub use session_lifecycle::State as LifecycleState;
pub use session_lifecycle::StateMachine as LifecycleMachine;

/// User-friendly lifecycle view for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    /// No session.
    SignedOut,
    /// A durable token exists but has not yet been validated.
    PendingValidation,
    /// A login operation is in flight.
    LoggingIn,
    /// Validating the stored token with the backend.
    Validating,
    /// Signed in with an established session.
    SignedIn,
    /// Refreshing the bearer token.
    Refreshing,
    /// A logout operation is in flight.
    SigningOut,
}

impl AuthPhase {
    /// Returns true if the user has an established session (SignedIn only).
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthPhase::SignedIn)
    }

    /// Returns true if the phase is a transient/in-progress phase.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthPhase::PendingValidation
                | AuthPhase::LoggingIn
                | AuthPhase::Validating
                | AuthPhase::Refreshing
                | AuthPhase::SigningOut
        )
    }
}

impl From<&LifecycleState> for AuthPhase {
    fn from(state: &LifecycleState) -> Self {
        match state {
            LifecycleState::SignedOut => AuthPhase::SignedOut,
            LifecycleState::PendingValidation => AuthPhase::PendingValidation,
            LifecycleState::LoggingIn => AuthPhase::LoggingIn,
            LifecycleState::Validating => AuthPhase::Validating,
            LifecycleState::SignedIn => AuthPhase::SignedIn,
            LifecycleState::Refreshing => AuthPhase::Refreshing,
            LifecycleState::SigningOut => AuthPhase::SigningOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_signed_out() {
        let machine = LifecycleMachine::new();
        assert_eq!(*machine.state(), LifecycleState::SignedOut);
    }

    #[test]
    fn test_login_flow() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), LifecycleState::LoggingIn);

        machine.consume(&LifecycleInput::LoginSuccess).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedIn);
    }

    #[test]
    fn test_login_failure_returns_to_signed_out() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::LoginAttempt).unwrap();
        machine.consume(&LifecycleInput::LoginFailed).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedOut);
    }

    #[test]
    fn test_token_detected_transitions_to_pending_validation() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::TokenDetected).unwrap();
        assert_eq!(*machine.state(), LifecycleState::PendingValidation);
    }

    #[test]
    fn test_bootstrap_flow_accepted() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::TokenDetected).unwrap();
        machine.consume(&LifecycleInput::BootstrapStarted).unwrap();
        assert_eq!(*machine.state(), LifecycleState::Validating);

        machine.consume(&LifecycleInput::ServerAccepted).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedIn);
    }

    #[test]
    fn test_bootstrap_flow_rejected() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::TokenDetected).unwrap();
        machine.consume(&LifecycleInput::BootstrapStarted).unwrap();
        machine.consume(&LifecycleInput::ServerRejected).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedOut);
    }

    #[test]
    fn test_bootstrap_reentry_after_cancellation() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::BootstrapStarted).unwrap();
        assert_eq!(*machine.state(), LifecycleState::Validating);

        // The first check was dropped mid-flight; a second one re-enters
        machine.consume(&LifecycleInput::BootstrapStarted).unwrap();
        assert_eq!(*machine.state(), LifecycleState::Validating);

        machine.consume(&LifecycleInput::ServerAccepted).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedIn);
    }

    #[test]
    fn test_refresh_flow() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::LoginAttempt).unwrap();
        machine.consume(&LifecycleInput::LoginSuccess).unwrap();

        machine.consume(&LifecycleInput::RefreshRequested).unwrap();
        assert_eq!(*machine.state(), LifecycleState::Refreshing);

        machine.consume(&LifecycleInput::RefreshSuccess).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedIn);
    }

    #[test]
    fn test_refresh_deferred_keeps_session() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::LoginAttempt).unwrap();
        machine.consume(&LifecycleInput::LoginSuccess).unwrap();
        machine.consume(&LifecycleInput::RefreshRequested).unwrap();

        // Transport failure: the token was not rejected, session stands
        machine.consume(&LifecycleInput::RefreshDeferred).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedIn);
    }

    #[test]
    fn test_refresh_failure_signs_out() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::LoginAttempt).unwrap();
        machine.consume(&LifecycleInput::LoginSuccess).unwrap();
        machine.consume(&LifecycleInput::RefreshRequested).unwrap();
        machine.consume(&LifecycleInput::RefreshFailed).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedOut);
    }

    #[test]
    fn test_logout_flow() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::LoginAttempt).unwrap();
        machine.consume(&LifecycleInput::LoginSuccess).unwrap();

        machine.consume(&LifecycleInput::LogoutRequested).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SigningOut);

        machine.consume(&LifecycleInput::LogoutComplete).unwrap();
        assert_eq!(*machine.state(), LifecycleState::SignedOut);
    }

    #[test]
    fn test_invalid_transition_returns_error() {
        let mut machine = LifecycleMachine::new();

        // Can't logout from SignedOut
        assert!(machine.consume(&LifecycleInput::LogoutRequested).is_err());

        // Can't claim LoginSuccess from SignedOut
        assert!(machine.consume(&LifecycleInput::LoginSuccess).is_err());

        // Can't refresh without a session
        assert!(machine.consume(&LifecycleInput::RefreshRequested).is_err());
    }

    #[test]
    fn test_cannot_reach_signed_in_from_validating_without_verdict() {
        let mut machine = LifecycleMachine::new();

        machine.consume(&LifecycleInput::BootstrapStarted).unwrap();
        assert!(machine.consume(&LifecycleInput::LoginSuccess).is_err());
        assert_eq!(*machine.state(), LifecycleState::Validating);
    }

    #[test]
    fn test_auth_phase_conversion() {
        assert_eq!(
            AuthPhase::from(&LifecycleState::SignedOut),
            AuthPhase::SignedOut
        );
        assert_eq!(
            AuthPhase::from(&LifecycleState::PendingValidation),
            AuthPhase::PendingValidation
        );
        assert_eq!(
            AuthPhase::from(&LifecycleState::LoggingIn),
            AuthPhase::LoggingIn
        );
        assert_eq!(
            AuthPhase::from(&LifecycleState::Validating),
            AuthPhase::Validating
        );
        assert_eq!(
            AuthPhase::from(&LifecycleState::SignedIn),
            AuthPhase::SignedIn
        );
        assert_eq!(
            AuthPhase::from(&LifecycleState::Refreshing),
            AuthPhase::Refreshing
        );
        assert_eq!(
            AuthPhase::from(&LifecycleState::SigningOut),
            AuthPhase::SigningOut
        );
    }

    #[test]
    fn test_auth_phase_is_authenticated() {
        assert!(AuthPhase::SignedIn.is_authenticated());
        assert!(!AuthPhase::SignedOut.is_authenticated());
        assert!(!AuthPhase::PendingValidation.is_authenticated());
        assert!(!AuthPhase::LoggingIn.is_authenticated());
        assert!(!AuthPhase::Validating.is_authenticated());
        assert!(!AuthPhase::Refreshing.is_authenticated());
        assert!(!AuthPhase::SigningOut.is_authenticated());
    }

    #[test]
    fn test_auth_phase_is_transient() {
        assert!(!AuthPhase::SignedOut.is_transient());
        assert!(!AuthPhase::SignedIn.is_transient());
        assert!(AuthPhase::PendingValidation.is_transient());
        assert!(AuthPhase::LoggingIn.is_transient());
        assert!(AuthPhase::Validating.is_transient());
        assert!(AuthPhase::Refreshing.is_transient());
        assert!(AuthPhase::SigningOut.is_transient());
    }
}
