//! Backend API client with token-aware dispatch.
//!
//! Two kinds of traffic flow through here:
//!
//! - **Handshake calls** (email/password/OTP validation, both login shapes,
//!   register): inherently unauthenticated or carrying a single-purpose step
//!   token in the body. These never enter the refresh path; a 401 is a
//!   handshake failure, not a session expiry.
//! - **Session calls** (`/auth/me`, anything else issued with the bearer
//!   token): on a 401 the client performs exactly one silent refresh and one
//!   replay before giving up. A refresh the server rejects clears the
//!   session.

use crate::transport::{RawResponse, Transport, TransportRequest};
use crate::types::*;
use crate::{ApiError, ApiResult};
use reqwest::Method;
use serde::de::DeserializeOwned;
use session_store::{Identity, SessionStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Client for the backend auth API.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    /// Serializes refresh attempts so concurrent 401 observers cannot
    /// each hammer the refresh endpoint.
    refresh_gate: Mutex<()>,
}

impl ApiClient {
    /// Create a new API client over the given transport and session store.
    pub fn new(transport: Arc<dyn Transport>, store: Arc<SessionStore>) -> Self {
        Self {
            transport,
            store,
            refresh_gate: Mutex::new(()),
        }
    }

    // ==========================================
    // Handshake endpoints (refresh path bypassed)
    // ==========================================

    /// `POST /auth/validate-email`
    pub async fn validate_email(&self, email: &str) -> ApiResult<EmailChallenge> {
        let body = serde_json::to_value(ValidateEmailRequest {
            email: email.to_string(),
        })
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        let raw = self
            .transport
            .execute(TransportRequest::post("/auth/validate-email", Some(body)))
            .await?;
        let resp: ValidateEmailResponse = parse_body(check_status(raw)?)?;

        if !resp.success {
            return Err(ApiError::Rejected {
                message: message_or(resp.message, "email validation failed"),
            });
        }

        let temp_token = resp
            .temp_token
            .ok_or_else(|| ApiError::Decode("missing temp_token".to_string()))?;

        Ok(EmailChallenge {
            temp_token,
            is_new_user: resp.is_new_user,
        })
    }

    /// `POST /auth/validate-password`
    pub async fn validate_password(
        &self,
        email: &str,
        password: &str,
        temp_token: &str,
    ) -> ApiResult<OtpChallenge> {
        let body = serde_json::to_value(ValidatePasswordRequest {
            email: email.to_string(),
            password: password.to_string(),
            temp_token: temp_token.to_string(),
        })
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        let raw = self
            .transport
            .execute(TransportRequest::post("/auth/validate-password", Some(body)))
            .await?;
        let resp: ValidatePasswordResponse = parse_body(check_status(raw)?)?;

        if !resp.success {
            return Err(ApiError::Rejected {
                message: message_or(resp.message, "password validation failed"),
            });
        }

        let otp_token = resp
            .otp_token
            .ok_or_else(|| ApiError::Decode("missing otp_token".to_string()))?;

        Ok(OtpChallenge {
            otp_token,
            is_new_user: resp.is_new_user,
        })
    }

    /// `POST /auth/login` (progressive shape, with OTP fields)
    pub async fn login_with_otp(
        &self,
        email: &str,
        otp: &str,
        otp_token: &str,
    ) -> ApiResult<SessionGrant> {
        let body = serde_json::to_value(OtpLoginRequest {
            email: email.to_string(),
            otp: otp.to_string(),
            otp_token: otp_token.to_string(),
        })
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        self.login(body).await
    }

    /// `POST /auth/login` (legacy single-shot shape)
    pub async fn login_with_password(&self, email: &str, password: &str) -> ApiResult<SessionGrant> {
        let body = serde_json::to_value(PasswordLoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        self.login(body).await
    }

    async fn login(&self, body: serde_json::Value) -> ApiResult<SessionGrant> {
        let raw = self
            .transport
            .execute(TransportRequest::post("/auth/login", Some(body)))
            .await?;
        let resp: LoginResponse = parse_body(check_status(raw)?)?;

        if !resp.success {
            return Err(ApiError::Rejected {
                message: message_or(resp.message, "login failed"),
            });
        }

        let token = resp
            .token
            .ok_or_else(|| ApiError::Decode("missing token".to_string()))?;
        let identity = resp
            .user
            .ok_or_else(|| ApiError::Decode("missing user".to_string()))?;

        Ok(SessionGrant {
            token,
            identity,
            is_new_user: resp.is_new_user,
            redirect_to: resp.redirect_to,
        })
    }

    /// `POST /auth/register`
    pub async fn register(&self, request: RegisterRequest) -> ApiResult<SessionGrant> {
        let body = serde_json::to_value(&request).map_err(|e| ApiError::Decode(e.to_string()))?;

        let raw = self
            .transport
            .execute(TransportRequest::post("/auth/register", Some(body)))
            .await?;
        let resp: RegisterResponse = parse_body(check_status(raw)?)?;

        if !resp.success {
            return Err(ApiError::Rejected {
                message: message_or(resp.message, "registration failed"),
            });
        }

        let token = resp
            .token
            .ok_or_else(|| ApiError::Decode("missing token".to_string()))?;
        let identity = resp
            .user
            .ok_or_else(|| ApiError::Decode("missing user".to_string()))?;

        Ok(SessionGrant {
            token,
            identity,
            is_new_user: true,
            redirect_to: None,
        })
    }

    // ==========================================
    // Session endpoints (token-aware)
    // ==========================================

    /// `GET /auth/me` through the token-aware path.
    pub async fn me(&self) -> ApiResult<Identity> {
        let raw = self.send_authorized(Method::GET, "/auth/me", None).await?;
        let resp: MeResponse = parse_body(raw)?;

        resp.user
            .ok_or_else(|| ApiError::Decode("missing user".to_string()))
    }

    /// `POST /auth/logout`, best effort.
    ///
    /// Carries the bearer token when one exists but never triggers a
    /// refresh; the caller is tearing the session down anyway.
    pub async fn notify_logout(&self) -> ApiResult<()> {
        let bearer = self.store.current()?.token;
        let raw = self
            .transport
            .execute(TransportRequest::post("/auth/logout", None).with_bearer(bearer))
            .await?;
        check_status(raw)?;
        Ok(())
    }

    /// Explicit refresh of the current session token.
    ///
    /// Same semantics as the silent path: single-flight, token replaced on
    /// success, session cleared when the server rejects the refresh.
    pub async fn refresh(&self) -> ApiResult<String> {
        let seen = self.store.current()?.token.ok_or(ApiError::Unauthorized {
            message: "no session token".to_string(),
        })?;
        self.refresh_locked(&seen).await
    }

    /// Dispatch an authenticated request with the bounded 401 policy:
    /// at most one refresh, at most one replay.
    async fn send_authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ApiResult<RawResponse> {
        let token = self.store.current()?.token.ok_or(ApiError::Unauthorized {
            message: "no session token".to_string(),
        })?;

        let request = TransportRequest {
            method: method.clone(),
            path: path.to_string(),
            body: body.clone(),
            bearer: Some(token.clone()),
        };

        let raw = self.transport.execute(request).await?;
        if raw.status != 401 {
            return check_status(raw);
        }

        debug!(path, "Got 401 with bearer attached, attempting silent refresh");
        let fresh = self.refresh_locked(&token).await?;

        // The single replay. A second 401 is surfaced as-is.
        let retry = TransportRequest {
            method,
            path: path.to_string(),
            body,
            bearer: Some(fresh),
        };
        check_status(self.transport.execute(retry).await?)
    }

    /// `POST /auth/refresh` under the single-flight gate.
    ///
    /// A caller that waited on the gate while another refresh ran either
    /// reuses the replaced token or fails fast if the session is gone.
    async fn refresh_locked(&self, seen_token: &str) -> ApiResult<String> {
        let _gate = self.refresh_gate.lock().await;

        match self.store.current()?.token {
            None => {
                return Err(ApiError::Unauthorized {
                    message: "session cleared during refresh".to_string(),
                })
            }
            Some(current) if current != seen_token => {
                debug!("Token already refreshed by a concurrent caller");
                return Ok(current);
            }
            Some(_) => {}
        }

        let result = self.try_refresh(seen_token).await;

        match result {
            Ok((token, user)) => {
                match user {
                    Some(identity) => self.store.commit(identity, &token)?,
                    None => self.store.replace_token(&token)?,
                }
                info!("Session token refreshed");
                Ok(token)
            }
            Err(e) if e.is_rejection() => {
                warn!(error = %e, "Refresh rejected by server, clearing session");
                self.store.clear()?;
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed in transport, session kept");
                Err(e)
            }
        }
    }

    async fn try_refresh(&self, token: &str) -> ApiResult<(String, Option<Identity>)> {
        let raw = self
            .transport
            .execute(
                TransportRequest::post("/auth/refresh", None).with_bearer(Some(token.to_string())),
            )
            .await?;
        let resp: RefreshResponse = parse_body(check_status(raw)?)?;

        if !resp.success {
            return Err(ApiError::Rejected {
                message: "refresh rejected".to_string(),
            });
        }

        let fresh = resp
            .token
            .ok_or_else(|| ApiError::Decode("missing token".to_string()))?;

        Ok((fresh, resp.user))
    }
}

/// Map a raw response to the error taxonomy; 2xx passes through.
fn check_status(raw: RawResponse) -> ApiResult<RawResponse> {
    match raw.status {
        200..=299 => Ok(raw),
        401 | 403 => Err(ApiError::Unauthorized {
            message: extract_message(&raw.body),
        }),
        400 | 422 => Err(ApiError::Validation {
            message: extract_message(&raw.body),
        }),
        500..=599 => Err(ApiError::Server { status: raw.status }),
        status => Err(ApiError::Http {
            status,
            message: extract_message(&raw.body),
        }),
    }
}

fn parse_body<T: DeserializeOwned>(raw: RawResponse) -> ApiResult<T> {
    serde_json::from_str(&raw.body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Pull the backend's `message` field out of an error body, if present.
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| "request failed".to_string())
}

fn message_or(message: Option<String>, fallback: &str) -> String {
    message.unwrap_or_else(|| fallback.to_string())
}
