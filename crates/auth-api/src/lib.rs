//! Backend HTTP contract and token-aware client for the Shopfront auth API.
//!
//! This crate provides:
//! - Wire types for every auth endpoint
//! - A [`Transport`] seam with a reqwest-backed production implementation
//! - The [`ApiClient`]: handshake endpoints that bypass the refresh path,
//!   and authenticated dispatch with a bounded one-shot 401 → refresh →
//!   replay policy behind a single-flight gate

mod client;
mod error;
mod transport;
mod types;

pub use client::ApiClient;
pub use error::{ApiError, ApiResult};
pub use transport::{HttpTransport, RawResponse, Transport, TransportRequest};
pub use types::{
    EmailChallenge, LoginResponse, MeResponse, OtpChallenge, OtpLoginRequest,
    PasswordLoginRequest, RefreshResponse, RegisterRequest, RegisterResponse, SessionGrant,
    ValidateEmailRequest, ValidateEmailResponse, ValidatePasswordRequest,
    ValidatePasswordResponse,
};
