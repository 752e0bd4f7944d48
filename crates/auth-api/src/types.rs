//! Wire types for the backend auth contract.

use serde::{Deserialize, Serialize};
use session_store::Identity;

// ==========================================
// Request bodies
// ==========================================

#[derive(Debug, Serialize)]
pub struct ValidateEmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatePasswordRequest {
    pub email: String,
    pub password: String,
    pub temp_token: String,
}

/// Progressive login: final OTP confirmation.
#[derive(Debug, Serialize)]
pub struct OtpLoginRequest {
    pub email: String,
    pub otp: String,
    pub otp_token: String,
}

/// Legacy single-shot login (no otp fields).
#[derive(Debug, Serialize)]
pub struct PasswordLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

// ==========================================
// Response bodies
// ==========================================

#[derive(Debug, Deserialize)]
pub struct ValidateEmailResponse {
    #[serde(default)]
    pub success: bool,
    pub temp_token: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidatePasswordResponse {
    #[serde(default)]
    pub success: bool,
    pub otp_token: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
    pub message: Option<String>,
}

/// Response shape shared by both `/auth/login` variants.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    pub token: Option<String>,
    pub user: Option<Identity>,
    #[serde(default)]
    pub is_new_user: bool,
    pub redirect_to: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    pub token: Option<String>,
    pub user: Option<Identity>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub success: bool,
    pub token: Option<String>,
    pub user: Option<Identity>,
}

#[derive(Debug, Deserialize)]
pub struct MeResponse {
    #[serde(default)]
    pub success: bool,
    pub user: Option<Identity>,
}

// ==========================================
// Distilled results handed to callers
// ==========================================

/// Outcome of a successful email validation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailChallenge {
    /// Token authorizing only the password-validation call
    pub temp_token: String,
    pub is_new_user: bool,
}

/// Outcome of a successful password validation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    /// Token authorizing only the OTP-confirmation call
    pub otp_token: String,
    pub is_new_user: bool,
}

/// A fully established session, as returned by login/register.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGrant {
    pub token: String,
    pub identity: Identity,
    pub is_new_user: bool,
    pub redirect_to: Option<String>,
}
