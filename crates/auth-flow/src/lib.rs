//! Progressive authentication flow for the Shopfront client.
//!
//! This crate provides:
//! - The three-step handshake machine (email → password → OTP) with
//!   per-step tokens and stale-response discard
//! - An explicit FSM for the session lifecycle
//! - The [`AuthManager`] orchestrator driving the handshake, the
//!   token-aware API client and the persisted session store together

mod error;
mod handshake;
mod lifecycle;
mod manager;

pub use error::{AuthError, AuthResult};
pub use handshake::{
    ensure_otp_format, Handshake, HandshakeStage, HandshakeStep, OtpContext, PasswordContext,
};
pub use lifecycle::session_lifecycle;
pub use lifecycle::{AuthPhase, LifecycleInput, LifecycleMachine, LifecycleState};
pub use manager::{AuthManager, LoginOutcome, OtpResume, StepOutcome};
