//! The three-step handshake machine: email → password → OTP.
//!
//! Each step's token lives only inside its state variant, so a call for a
//! later step is impossible to make without actually having advanced: the
//! required token isn't reachable from anywhere else. The machine holds no
//! long-lived secret and can be discarded or reset at any time.
//!
//! An epoch counter is bumped on every transition. Async callers capture
//! the epoch together with the step context before dispatching; a result
//! applied against a stale epoch (the machine was reset or restarted while
//! the request was in flight) is discarded instead of applied.

use crate::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};

/// Where the handshake currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Initial state, nothing validated yet
    Email,
    /// Email accepted; `temp_token` authorizes only the password call
    Password { email: String, temp_token: String },
    /// Password accepted; `otp_token` authorizes only the OTP call
    Otp {
        email: String,
        otp_token: String,
        is_new_user: bool,
    },
    /// Handshake finished; session already committed
    Complete,
}

/// Payload-free view of the step for UI consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStage {
    Email,
    Password,
    Otp,
    Complete,
}

impl From<&HandshakeStep> for HandshakeStage {
    fn from(step: &HandshakeStep) -> Self {
        match step {
            HandshakeStep::Email => HandshakeStage::Email,
            HandshakeStep::Password { .. } => HandshakeStage::Password,
            HandshakeStep::Otp { .. } => HandshakeStage::Otp,
            HandshakeStep::Complete => HandshakeStage::Complete,
        }
    }
}

/// Context captured before dispatching the password-validation call.
#[derive(Debug, Clone)]
pub struct PasswordContext {
    pub email: String,
    pub temp_token: String,
    pub epoch: u64,
}

/// Context captured before dispatching the OTP-confirmation call.
#[derive(Debug, Clone)]
pub struct OtpContext {
    pub email: String,
    pub otp_token: String,
    pub is_new_user: bool,
    pub epoch: u64,
}

/// The handshake state machine.
#[derive(Debug)]
pub struct Handshake {
    step: HandshakeStep,
    epoch: u64,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            step: HandshakeStep::Email,
            epoch: 0,
        }
    }

    pub fn step(&self) -> &HandshakeStep {
        &self.step
    }

    pub fn stage(&self) -> HandshakeStage {
        HandshakeStage::from(&self.step)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start (or restart) the handshake. Valid from any state.
    ///
    /// Returns the epoch the caller must present when applying the result.
    pub fn begin_email(&mut self) -> u64 {
        self.step = HandshakeStep::Email;
        self.epoch += 1;
        self.epoch
    }

    /// Context for the password step, or `InvalidStep` when the email step
    /// has not completed.
    pub fn password_context(&self) -> AuthResult<PasswordContext> {
        match &self.step {
            HandshakeStep::Password { email, temp_token } => Ok(PasswordContext {
                email: email.clone(),
                temp_token: temp_token.clone(),
                epoch: self.epoch,
            }),
            other => Err(AuthError::InvalidStep(format!(
                "password validation requires a validated email, current step is {:?}",
                HandshakeStage::from(other)
            ))),
        }
    }

    /// Context for the OTP step, or `InvalidStep` when the password step
    /// has not completed.
    pub fn otp_context(&self) -> AuthResult<OtpContext> {
        match &self.step {
            HandshakeStep::Otp {
                email,
                otp_token,
                is_new_user,
            } => Ok(OtpContext {
                email: email.clone(),
                otp_token: otp_token.clone(),
                is_new_user: *is_new_user,
                epoch: self.epoch,
            }),
            other => Err(AuthError::InvalidStep(format!(
                "OTP confirmation requires a validated password, current step is {:?}",
                HandshakeStage::from(other)
            ))),
        }
    }

    /// Advance Email → Password with the issued step token.
    pub fn apply_email_ok(
        &mut self,
        epoch: u64,
        email: String,
        temp_token: String,
    ) -> AuthResult<()> {
        self.ensure_current(epoch)?;
        self.step = HandshakeStep::Password { email, temp_token };
        self.epoch += 1;
        Ok(())
    }

    /// Advance Password → Otp with the issued step token.
    pub fn apply_password_ok(
        &mut self,
        epoch: u64,
        otp_token: String,
        is_new_user: bool,
    ) -> AuthResult<()> {
        self.ensure_current(epoch)?;
        let email = match &self.step {
            HandshakeStep::Password { email, .. } => email.clone(),
            other => {
                return Err(AuthError::InvalidStep(format!(
                    "cannot apply a password result in step {:?}",
                    HandshakeStage::from(other)
                )))
            }
        };
        self.step = HandshakeStep::Otp {
            email,
            otp_token,
            is_new_user,
        };
        self.epoch += 1;
        Ok(())
    }

    /// Advance Otp → Complete.
    pub fn apply_otp_ok(&mut self, epoch: u64) -> AuthResult<()> {
        self.ensure_current(epoch)?;
        self.step = HandshakeStep::Complete;
        self.epoch += 1;
        Ok(())
    }

    /// Force Complete without an epoch check (resume path, where the caller
    /// supplied the step context explicitly).
    pub fn complete(&mut self) {
        self.step = HandshakeStep::Complete;
        self.epoch += 1;
    }

    /// Return to `Email`, dropping all held tokens. Callable at any time;
    /// calling it twice is the same as calling it once.
    pub fn reset(&mut self) {
        self.step = HandshakeStep::Email;
        self.epoch += 1;
    }

    fn ensure_current(&self, epoch: u64) -> AuthResult<()> {
        if epoch != self.epoch {
            return Err(AuthError::InvalidStep(
                "the handshake was reset while the request was in flight".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Local OTP format gate: exactly 6 ASCII digits.
pub fn ensure_otp_format(code: &str) -> AuthResult<()> {
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AuthError::Validation(
            "OTP code must be exactly 6 digits".to_string(),
        ))
    }
}
