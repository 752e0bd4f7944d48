//! The auth orchestrator: the façade UI layers call.
//!
//! Composes the handshake machine, the session lifecycle FSM, the API
//! client and the persisted session store. Handshake step calls are
//! serialized through an async op gate; results are applied to the
//! handshake machine only when its epoch still matches, so a `reset()`
//! that raced an in-flight call discards the response instead of applying
//! it. `login_with_otp` is the only handshake path that commits a session.

use crate::handshake::{ensure_otp_format, Handshake, HandshakeStage};
use crate::lifecycle::{AuthPhase, LifecycleInput, LifecycleMachine};
use crate::{AuthError, AuthResult};
use auth_api::{ApiClient, ApiError, HttpTransport, RegisterRequest, Transport};
use client_core::Config;
use session_store::{Identity, ListenerId, SessionListener, SessionSnapshot, SessionStore};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of an intermediate handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub is_new_user: bool,
}

/// Outcome of a session-creating operation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub identity: Identity,
    pub is_new_user: bool,
    pub redirect_to: Option<String>,
}

/// Explicit OTP step context, for resuming a handshake across a UI remount.
#[derive(Debug, Clone)]
pub struct OtpResume {
    pub email: String,
    pub otp_token: String,
}

/// Orchestrates the progressive auth flow and the session lifecycle.
pub struct AuthManager {
    api: ApiClient,
    store: Arc<SessionStore>,
    handshake: StdMutex<Handshake>,
    lifecycle: StdMutex<LifecycleMachine>,
    /// Serializes handshake and login operations (queue semantics).
    op_gate: Mutex<()>,
}

impl AuthManager {
    /// Create a manager talking to the configured backend.
    pub fn from_config(config: &Config, store: Arc<SessionStore>) -> AuthResult<Self> {
        let base_url = config
            .api_base_url()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        let transport = HttpTransport::new(
            base_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::with_transport(Arc::new(transport), store))
    }

    /// Create a manager over an explicit transport (used in tests).
    pub fn with_transport(transport: Arc<dyn Transport>, store: Arc<SessionStore>) -> Self {
        let mut lifecycle = LifecycleMachine::new();

        // Surface a durable token from a previous run immediately, so the
        // phase reads PendingValidation until check_auth settles it.
        if matches!(store.current(), Ok(s) if s.token.is_some()) {
            let _ = lifecycle.consume(&LifecycleInput::TokenDetected);
        }

        Self {
            api: ApiClient::new(transport, store.clone()),
            store,
            handshake: StdMutex::new(Handshake::new()),
            lifecycle: StdMutex::new(lifecycle),
            op_gate: Mutex::new(()),
        }
    }

    // ==========================================
    // Observers
    // ==========================================

    /// Current lifecycle phase.
    pub fn phase(&self) -> AuthPhase {
        let fsm = self.lifecycle.lock().unwrap();
        AuthPhase::from(fsm.state())
    }

    /// Current handshake stage.
    pub fn handshake_stage(&self) -> HandshakeStage {
        self.handshake.lock().unwrap().stage()
    }

    /// Snapshot of the persisted session.
    pub fn current(&self) -> AuthResult<SessionSnapshot> {
        Ok(self.store.current()?)
    }

    /// True when a committed session exists.
    pub fn is_authenticated(&self) -> bool {
        self.store
            .current()
            .map(|s| s.is_authenticated)
            .unwrap_or(false)
    }

    /// Subscribe to session changes (commit/clear/identity updates).
    pub fn subscribe(&self, listener: SessionListener) -> ListenerId {
        self.store.subscribe(listener)
    }

    /// Remove a session-change listener.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Abandon the handshake and return to the email step. Callable at any
    /// time; an in-flight step result is discarded when it lands.
    pub fn reset_step(&self) {
        self.handshake.lock().unwrap().reset();
    }

    // ==========================================
    // Handshake steps
    // ==========================================

    /// Step 1: validate the email and obtain the password-step token.
    ///
    /// Valid from any state; restarts the handshake.
    pub async fn validate_email(&self, email: &str) -> AuthResult<StepOutcome> {
        let email = email.trim().to_string();
        if email.is_empty() {
            return Err(AuthError::Validation("email is required".to_string()));
        }

        let _op = self.op_gate.lock().await;
        let epoch = self.handshake.lock().unwrap().begin_email();

        let challenge = self
            .api
            .validate_email(&email)
            .await
            .map_err(map_email_error)?;

        self.handshake.lock().unwrap().apply_email_ok(
            epoch,
            email,
            challenge.temp_token,
        )?;

        debug!(is_new_user = challenge.is_new_user, "Email validated");
        Ok(StepOutcome {
            is_new_user: challenge.is_new_user,
        })
    }

    /// Step 2: validate the password using the held temp token.
    ///
    /// Requires the handshake to be in the password step; fails with
    /// `InvalidStep` (without contacting the backend) otherwise. On a
    /// credential rejection the step is left unchanged so the password can
    /// be retried without re-entering the email.
    pub async fn validate_password(&self, password: &str) -> AuthResult<StepOutcome> {
        if password.is_empty() {
            return Err(AuthError::Validation("password is required".to_string()));
        }

        let _op = self.op_gate.lock().await;
        let ctx = self.handshake.lock().unwrap().password_context()?;

        let challenge = self
            .api
            .validate_password(&ctx.email, password, &ctx.temp_token)
            .await
            .map_err(map_credential_error)?;

        self.handshake.lock().unwrap().apply_password_ok(
            ctx.epoch,
            challenge.otp_token,
            challenge.is_new_user,
        )?;

        debug!("Password validated");
        Ok(StepOutcome {
            is_new_user: challenge.is_new_user,
        })
    }

    /// Step 3: confirm the OTP code and commit the session.
    ///
    /// The code must be exactly 6 digits (checked locally). The step
    /// context comes from the handshake machine, or from `resume` when the
    /// UI re-mounted and supplies the email/otp_token pair explicitly.
    /// This is the only handshake path that creates a session.
    pub async fn login_with_otp(
        &self,
        code: &str,
        resume: Option<OtpResume>,
    ) -> AuthResult<LoginOutcome> {
        ensure_otp_format(code)?;

        let _op = self.op_gate.lock().await;
        let (email, otp_token, epoch) = match resume {
            Some(r) => (r.email, r.otp_token, None),
            None => {
                let ctx = self.handshake.lock().unwrap().otp_context()?;
                (ctx.email, ctx.otp_token, Some(ctx.epoch))
            }
        };

        self.transition(&LifecycleInput::LoginAttempt)?;

        let grant = match self.api.login_with_otp(&email, code, &otp_token).await {
            Ok(grant) => grant,
            Err(e) => {
                self.transition_lenient(&LifecycleInput::LoginFailed);
                return Err(map_credential_error(e));
            }
        };

        // Settle the handshake before committing: if it was reset while the
        // call was in flight, the grant is discarded, not applied.
        if let Some(epoch) = epoch {
            if let Err(e) = self.handshake.lock().unwrap().apply_otp_ok(epoch) {
                self.transition_lenient(&LifecycleInput::LoginFailed);
                return Err(e);
            }
        } else {
            self.handshake.lock().unwrap().complete();
        }

        self.store.commit(grant.identity.clone(), &grant.token)?;
        self.transition_lenient(&LifecycleInput::LoginSuccess);

        info!(user_id = grant.identity.id, "Login successful");
        Ok(LoginOutcome {
            identity: grant.identity,
            is_new_user: grant.is_new_user,
            redirect_to: grant.redirect_to,
        })
    }

    // ==========================================
    // Session-creating fallbacks
    // ==========================================

    /// Single round-trip login, skipping the three-step flow.
    ///
    /// Kept for accounts the backend has not migrated to progressive auth.
    pub async fn legacy_login(&self, email: &str, password: &str) -> AuthResult<LoginOutcome> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let _op = self.op_gate.lock().await;
        self.transition(&LifecycleInput::LoginAttempt)?;

        let grant = match self.api.login_with_password(email, password).await {
            Ok(grant) => grant,
            Err(e) => {
                self.transition_lenient(&LifecycleInput::LoginFailed);
                return Err(map_credential_error(e));
            }
        };

        self.store.commit(grant.identity.clone(), &grant.token)?;
        self.handshake.lock().unwrap().complete();
        self.transition_lenient(&LifecycleInput::LoginSuccess);

        info!(user_id = grant.identity.id, "Legacy login successful");
        Ok(LoginOutcome {
            identity: grant.identity,
            is_new_user: grant.is_new_user,
            redirect_to: grant.redirect_to,
        })
    }

    /// Create an account; a successful registration implies login.
    ///
    /// The confirmation match is checked locally before dispatch; the
    /// server remains authoritative.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        confirmation: &str,
    ) -> AuthResult<LoginOutcome> {
        if password != confirmation {
            return Err(AuthError::Validation(
                "password confirmation does not match".to_string(),
            ));
        }
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "name, email and password are required".to_string(),
            ));
        }

        let _op = self.op_gate.lock().await;
        self.transition(&LifecycleInput::LoginAttempt)?;

        let request = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            password_confirmation: confirmation.to_string(),
        };
        let grant = match self.api.register(request).await {
            Ok(grant) => grant,
            Err(e) => {
                self.transition_lenient(&LifecycleInput::LoginFailed);
                return Err(map_register_error(e));
            }
        };

        self.store.commit(grant.identity.clone(), &grant.token)?;
        self.handshake.lock().unwrap().complete();
        self.transition_lenient(&LifecycleInput::LoginSuccess);

        info!(user_id = grant.identity.id, "Registration successful");
        Ok(LoginOutcome {
            identity: grant.identity,
            is_new_user: true,
            redirect_to: grant.redirect_to,
        })
    }

    // ==========================================
    // Session lifecycle
    // ==========================================

    /// Log out: notify the server best-effort, then unconditionally clear
    /// the local session. The client never stays in an
    /// authenticated-looking state because the network call failed.
    pub async fn logout(&self) -> AuthResult<()> {
        let _op = self.op_gate.lock().await;
        self.transition_lenient(&LifecycleInput::LogoutRequested);

        if let Err(e) = self.api.notify_logout().await {
            warn!(error = %e, "Logout notification failed, clearing local session anyway");
        }

        let result = self.store.clear();
        self.handshake.lock().unwrap().reset();
        self.transition_lenient(&LifecycleInput::LogoutComplete);
        self.transition_lenient(&LifecycleInput::NoToken);

        info!("Logged out");
        Ok(result?)
    }

    /// Explicit token refresh, same semantics as the silent path: the token
    /// is replaced on success, and a server rejection clears the session.
    pub async fn refresh(&self) -> AuthResult<()> {
        if self.store.current()?.token.is_none() {
            return Err(AuthError::NotLoggedIn);
        }

        self.transition(&LifecycleInput::RefreshRequested)?;

        match self.api.refresh().await {
            Ok(_) => {
                self.transition_lenient(&LifecycleInput::RefreshSuccess);
                Ok(())
            }
            Err(e) if e.is_transient() => {
                // Token not rejected, session stands
                self.transition_lenient(&LifecycleInput::RefreshDeferred);
                Err(e.into())
            }
            Err(e) => {
                self.transition_lenient(&LifecycleInput::RefreshFailed);
                Err(e.into())
            }
        }
    }

    /// Startup bootstrap: settle whether the durable session is still good.
    ///
    /// - No token: report signed out without any server round-trip.
    /// - Token present: `GET /auth/me` through the token-aware path (which
    ///   silently refreshes once on a 401).
    ///
    /// Any failure (rejection, timeout or network) is reported as
    /// `Ok(false)` and clears the durable session; the caller never sees an
    /// error from a bootstrap check.
    pub async fn check_auth(&self) -> AuthResult<bool> {
        let _op = self.op_gate.lock().await;

        let snapshot = self.store.current()?;
        if snapshot.token.is_none() {
            debug!("No durable token, skipping bootstrap check");
            self.transition_lenient(&LifecycleInput::NoToken);
            return Ok(false);
        }

        if self.transition(&LifecycleInput::BootstrapStarted).is_err() {
            // Already settled (e.g. signed in); nothing to validate.
            return Ok(self.is_authenticated());
        }

        match self.api.me().await {
            Ok(identity) => {
                // The token may have been silently replaced on the way.
                let token = self.store.current()?.token.ok_or(AuthError::NotLoggedIn)?;
                self.store.commit(identity, &token)?;
                self.transition_lenient(&LifecycleInput::ServerAccepted);
                info!("Stored session validated");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Bootstrap auth check failed, treating as signed out");
                // The refresh path may have cleared already; avoid a second
                // listener notification.
                if matches!(self.store.current(), Ok(s) if s.token.is_some()) {
                    let _ = self.store.clear();
                }
                self.transition_lenient(&LifecycleInput::ServerRejected);
                Ok(false)
            }
        }
    }

    // ==========================================
    // Internal
    // ==========================================

    /// Transition the lifecycle FSM, mapping an impossible transition to
    /// `InvalidStep`.
    fn transition(&self, input: &LifecycleInput) -> AuthResult<AuthPhase> {
        let mut fsm = self.lifecycle.lock().unwrap();
        let old_phase = AuthPhase::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStep(format!(
                "cannot apply {:?} in phase {:?}",
                input,
                AuthPhase::from(fsm.state())
            ))
        })?;

        let new_phase = AuthPhase::from(fsm.state());
        drop(fsm);

        if old_phase != new_phase {
            debug!(?old_phase, ?new_phase, "Lifecycle transition");
        }

        Ok(new_phase)
    }

    fn transition_lenient(&self, input: &LifecycleInput) {
        let _ = self.transition(input);
    }
}

fn map_email_error(e: ApiError) -> AuthError {
    match e {
        ApiError::Rejected { message }
        | ApiError::Validation { message }
        | ApiError::Unauthorized { message } => AuthError::Validation(message),
        other => AuthError::Api(other),
    }
}

fn map_credential_error(e: ApiError) -> AuthError {
    match e {
        ApiError::Rejected { message } | ApiError::Unauthorized { message } => {
            AuthError::InvalidCredentials(message)
        }
        ApiError::Validation { message } => AuthError::Validation(message),
        other => AuthError::Api(other),
    }
}

fn map_register_error(e: ApiError) -> AuthError {
    match e {
        ApiError::Rejected { message }
        | ApiError::Validation { message }
        | ApiError::Unauthorized { message } => AuthError::Validation(message),
        other => AuthError::Api(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auth_api::{ApiResult, RawResponse, TransportRequest};
    use session_store::{SessionStorage, StorageResult};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemoryStorage {
        data: StdMutex<HashMap<String, String>>,
    }

    impl MemoryStorage {
        fn new() -> Self {
            Self {
                data: StdMutex::new(HashMap::new()),
            }
        }
    }

    impl SessionStorage for MemoryStorage {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        fn delete(&self, key: &str) -> StorageResult<bool> {
            Ok(self.data.lock().unwrap().remove(key).is_some())
        }
    }

    /// Scripted transport: per-path FIFO queues of canned outcomes.
    #[derive(Default)]
    struct FakeTransport {
        routes: StdMutex<HashMap<String, VecDeque<ApiResult<RawResponse>>>>,
        log: StdMutex<Vec<TransportRequest>>,
    }

    impl FakeTransport {
        fn on(&self, path: &str, status: u16, body: &str) {
            self.routes
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_default()
                .push_back(Ok(RawResponse {
                    status,
                    body: body.to_string(),
                }));
        }

        fn on_err(&self, path: &str, error: ApiError) {
            self.routes
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_default()
                .push_back(Err(error));
        }

        fn calls(&self) -> usize {
            self.log.lock().unwrap().len()
        }

        fn calls_to(&self, path: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.path == path)
                .count()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn execute(&self, request: TransportRequest) -> ApiResult<RawResponse> {
            self.log.lock().unwrap().push(request.clone());
            let mut routes = self.routes.lock().unwrap();
            let queue = routes
                .get_mut(&request.path)
                .unwrap_or_else(|| panic!("unexpected request to {}", request.path));
            queue
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response left for {}", request.path))
        }
    }

    fn identity_json() -> &'static str {
        r#"{"id":1,"name":"Ada","email":"a@b.com","role":"customer"}"#
    }

    fn test_identity() -> Identity {
        serde_json::from_str(identity_json()).unwrap()
    }

    fn manager_with(transport: Arc<FakeTransport>) -> (Arc<AuthManager>, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(Box::new(MemoryStorage::new())));
        let manager = Arc::new(AuthManager::with_transport(transport, store.clone()));
        (manager, store)
    }

    fn script_email_ok(transport: &FakeTransport) {
        transport.on(
            "/auth/validate-email",
            200,
            r#"{"success":true,"temp_token":"T1","is_new_user":false}"#,
        );
    }

    fn script_password_ok(transport: &FakeTransport) {
        transport.on(
            "/auth/validate-password",
            200,
            r#"{"success":true,"otp_token":"T2","is_new_user":false}"#,
        );
    }

    fn script_login_ok(transport: &FakeTransport) {
        transport.on(
            "/auth/login",
            200,
            &format!(
                r#"{{"success":true,"token":"BEARER1","user":{},"is_new_user":false}}"#,
                identity_json()
            ),
        );
    }

    #[tokio::test]
    async fn test_scenario_a_full_handshake() {
        let transport = Arc::new(FakeTransport::default());
        script_email_ok(&transport);
        script_password_ok(&transport);
        script_login_ok(&transport);
        let (manager, store) = manager_with(transport);

        let step = manager.validate_email("a@b.com").await.unwrap();
        assert!(!step.is_new_user);
        assert_eq!(manager.handshake_stage(), HandshakeStage::Password);

        manager.validate_password("secret").await.unwrap();
        assert_eq!(manager.handshake_stage(), HandshakeStage::Otp);

        let outcome = manager.login_with_otp("123456", None).await.unwrap();
        assert_eq!(outcome.identity, test_identity());
        assert_eq!(manager.handshake_stage(), HandshakeStage::Complete);
        assert_eq!(manager.phase(), AuthPhase::SignedIn);

        let snapshot = store.current().unwrap();
        assert!(snapshot.is_authenticated);
        assert_eq!(snapshot.token.as_deref(), Some("BEARER1"));
        assert_eq!(snapshot.identity, Some(test_identity()));
    }

    #[tokio::test]
    async fn test_scenario_b_password_retry_after_rejection() {
        let transport = Arc::new(FakeTransport::default());
        script_email_ok(&transport);
        transport.on(
            "/auth/validate-password",
            401,
            r#"{"message":"invalid credentials"}"#,
        );
        script_password_ok(&transport);
        let (manager, _) = manager_with(transport);

        manager.validate_email("a@b.com").await.unwrap();

        let err = manager.validate_password("wrong").await.unwrap_err();
        match err {
            AuthError::InvalidCredentials(message) => assert_eq!(message, "invalid credentials"),
            other => panic!("expected InvalidCredentials, got {other:?}"),
        }

        // Still holding T1: the password can be retried without
        // re-entering the email.
        assert_eq!(manager.handshake_stage(), HandshakeStage::Password);
        manager.validate_password("secret").await.unwrap();
        assert_eq!(manager.handshake_stage(), HandshakeStage::Otp);
    }

    #[tokio::test]
    async fn test_scenario_c_bootstrap_with_dead_token() {
        let transport = Arc::new(FakeTransport::default());
        transport.on("/auth/me", 401, "{}");
        transport.on("/auth/refresh", 401, "{}");

        let store = Arc::new(SessionStore::new(Box::new(MemoryStorage::new())));
        store.commit(test_identity(), "STALE").unwrap();

        let clear_count = Arc::new(AtomicUsize::new(0));
        let clear_clone = clear_count.clone();
        store.subscribe(Box::new(move |snapshot| {
            if !snapshot.is_authenticated {
                clear_clone.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let manager = AuthManager::with_transport(transport.clone(), store.clone());
        assert_eq!(manager.phase(), AuthPhase::PendingValidation);

        // One refresh attempt, then signed out; no error raised.
        let result = manager.check_auth().await.unwrap();
        assert!(!result);
        assert_eq!(transport.calls_to("/auth/refresh"), 1);
        assert!(!store.current().unwrap().is_authenticated);
        assert!(store.current().unwrap().token.is_none());
        assert_eq!(clear_count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.phase(), AuthPhase::SignedOut);
    }

    #[tokio::test]
    async fn test_check_auth_without_token_skips_server() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager_with(transport.clone());

        let result = manager.check_auth().await.unwrap();
        assert!(!result);
        assert_eq!(transport.calls(), 0);
        assert_eq!(manager.phase(), AuthPhase::SignedOut);
    }

    #[tokio::test]
    async fn test_check_auth_success_recommits_identity() {
        let transport = Arc::new(FakeTransport::default());
        transport.on(
            "/auth/me",
            200,
            &format!(r#"{{"success":true,"user":{}}}"#, identity_json()),
        );

        let store = Arc::new(SessionStore::new(Box::new(MemoryStorage::new())));
        store.commit(test_identity(), "BEARER1").unwrap();
        let manager = AuthManager::with_transport(transport, store.clone());

        let result = manager.check_auth().await.unwrap();
        assert!(result);
        assert_eq!(manager.phase(), AuthPhase::SignedIn);

        let snapshot = store.current().unwrap();
        assert!(snapshot.is_authenticated);
        assert_eq!(snapshot.token.as_deref(), Some("BEARER1"));
    }

    #[tokio::test]
    async fn test_check_auth_network_failure_is_silent_signed_out() {
        let transport = Arc::new(FakeTransport::default());
        transport.on_err("/auth/me", ApiError::Timeout);

        let store = Arc::new(SessionStore::new(Box::new(MemoryStorage::new())));
        store.commit(test_identity(), "BEARER1").unwrap();
        let manager = AuthManager::with_transport(transport, store.clone());

        // Timeout during bootstrap: no error, treated as signed out.
        let result = manager.check_auth().await.unwrap();
        assert!(!result);
        assert!(!store.current().unwrap().is_authenticated);
        assert_eq!(manager.phase(), AuthPhase::SignedOut);
    }

    #[tokio::test]
    async fn test_password_before_email_is_rejected_without_network() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager_with(transport.clone());

        let err = manager.validate_password("secret").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidStep(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_otp_before_password_is_rejected_without_network() {
        let transport = Arc::new(FakeTransport::default());
        script_email_ok(&transport);
        let (manager, _) = manager_with(transport.clone());

        manager.validate_email("a@b.com").await.unwrap();

        let err = manager.login_with_otp("123456", None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidStep(_)));
        assert_eq!(transport.calls_to("/auth/login"), 0);
    }

    #[tokio::test]
    async fn test_otp_format_rejected_locally() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager_with(transport.clone());

        for code in ["12345", "1234567", "12345a", "", "abcdef"] {
            let err = manager.login_with_otp(code, None).await.unwrap_err();
            assert!(matches!(err, AuthError::Validation(_)), "code {code:?}");
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_otp_resume_after_remount() {
        let transport = Arc::new(FakeTransport::default());
        script_login_ok(&transport);
        let (manager, store) = manager_with(transport);

        // Fresh manager, empty handshake: the UI supplies the saved context.
        let outcome = manager
            .login_with_otp(
                "123456",
                Some(OtpResume {
                    email: "a@b.com".to_string(),
                    otp_token: "T2".to_string(),
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.identity.id, 1);
        assert!(store.current().unwrap().is_authenticated);
        assert_eq!(manager.handshake_stage(), HandshakeStage::Complete);
    }

    #[tokio::test]
    async fn test_wrong_otp_keeps_step_for_retry() {
        let transport = Arc::new(FakeTransport::default());
        script_email_ok(&transport);
        script_password_ok(&transport);
        transport.on("/auth/login", 401, r#"{"message":"invalid code"}"#);
        script_login_ok(&transport);
        let (manager, _) = manager_with(transport);

        manager.validate_email("a@b.com").await.unwrap();
        manager.validate_password("secret").await.unwrap();

        let err = manager.login_with_otp("999999", None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(manager.handshake_stage(), HandshakeStage::Otp);
        assert_eq!(manager.phase(), AuthPhase::SignedOut);

        manager.login_with_otp("123456", None).await.unwrap();
        assert_eq!(manager.phase(), AuthPhase::SignedIn);
    }

    #[tokio::test]
    async fn test_reset_during_inflight_step_discards_result() {
        struct GatedTransport {
            inner: FakeTransport,
            release: tokio::sync::Notify,
        }

        #[async_trait]
        impl Transport for GatedTransport {
            async fn execute(&self, request: TransportRequest) -> ApiResult<RawResponse> {
                if request.path == "/auth/validate-password" {
                    self.release.notified().await;
                }
                self.inner.execute(request).await
            }
        }

        let transport = Arc::new(GatedTransport {
            inner: FakeTransport::default(),
            release: tokio::sync::Notify::new(),
        });
        script_email_ok(&transport.inner);
        script_password_ok(&transport.inner);

        let store = Arc::new(SessionStore::new(Box::new(MemoryStorage::new())));
        let manager = Arc::new(AuthManager::with_transport(transport.clone(), store));

        manager.validate_email("a@b.com").await.unwrap();

        let inflight = tokio::spawn({
            let manager = manager.clone();
            async move { manager.validate_password("secret").await }
        });

        // Cancel the handshake while the password call is held in flight.
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.reset_step();
        transport.release.notify_one();

        let result = inflight.await.unwrap();
        assert!(matches!(result, Err(AuthError::InvalidStep(_))));

        // The stale response was discarded, not applied.
        assert_eq!(manager.handshake_stage(), HandshakeStage::Email);
    }

    #[tokio::test]
    async fn test_reset_step_is_idempotent() {
        let transport = Arc::new(FakeTransport::default());
        script_email_ok(&transport);
        let (manager, _) = manager_with(transport);

        manager.validate_email("a@b.com").await.unwrap();
        manager.reset_step();
        manager.reset_step();
        assert_eq!(manager.handshake_stage(), HandshakeStage::Email);
    }

    #[tokio::test]
    async fn test_legacy_login_success() {
        let transport = Arc::new(FakeTransport::default());
        script_login_ok(&transport);
        let (manager, store) = manager_with(transport);

        let outcome = manager.legacy_login("a@b.com", "secret").await.unwrap();
        assert_eq!(outcome.identity.id, 1);
        assert_eq!(manager.phase(), AuthPhase::SignedIn);
        assert!(store.current().unwrap().is_authenticated);
    }

    #[tokio::test]
    async fn test_legacy_login_failure() {
        let transport = Arc::new(FakeTransport::default());
        transport.on("/auth/login", 401, r#"{"message":"invalid credentials"}"#);
        let (manager, store) = manager_with(transport);

        let err = manager.legacy_login("a@b.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(manager.phase(), AuthPhase::SignedOut);
        assert!(!store.current().unwrap().is_authenticated);
    }

    #[tokio::test]
    async fn test_register_confirmation_mismatch_is_local() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager_with(transport.clone());

        let err = manager
            .register("Ada", "a@b.com", "secret", "different")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_register_commits_session() {
        let transport = Arc::new(FakeTransport::default());
        transport.on(
            "/auth/register",
            200,
            &format!(r#"{{"success":true,"token":"BEARER1","user":{}}}"#, identity_json()),
        );
        let (manager, store) = manager_with(transport);

        let outcome = manager
            .register("Ada", "a@b.com", "secret", "secret")
            .await
            .unwrap();
        assert!(outcome.is_new_user);
        assert!(store.current().unwrap().is_authenticated);
        assert_eq!(manager.phase(), AuthPhase::SignedIn);
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_unreachable() {
        let transport = Arc::new(FakeTransport::default());
        script_login_ok(&transport);
        transport.on_err("/auth/logout", ApiError::Timeout);
        let (manager, store) = manager_with(transport);

        manager.legacy_login("a@b.com", "secret").await.unwrap();
        assert!(store.current().unwrap().is_authenticated);

        manager.logout().await.unwrap();
        assert!(!store.current().unwrap().is_authenticated);
        assert!(store.current().unwrap().token.is_none());
        assert_eq!(manager.phase(), AuthPhase::SignedOut);
        assert_eq!(manager.handshake_stage(), HandshakeStage::Email);
    }

    #[tokio::test]
    async fn test_manual_refresh_replaces_token() {
        let transport = Arc::new(FakeTransport::default());
        script_login_ok(&transport);
        transport.on("/auth/refresh", 200, r#"{"success":true,"token":"BEARER2"}"#);
        let (manager, store) = manager_with(transport);

        manager.legacy_login("a@b.com", "secret").await.unwrap();
        manager.refresh().await.unwrap();

        assert_eq!(manager.phase(), AuthPhase::SignedIn);
        assert_eq!(store.current().unwrap().token.as_deref(), Some("BEARER2"));
    }

    #[tokio::test]
    async fn test_manual_refresh_rejection_signs_out() {
        let transport = Arc::new(FakeTransport::default());
        script_login_ok(&transport);
        transport.on("/auth/refresh", 401, "{}");
        let (manager, store) = manager_with(transport);

        manager.legacy_login("a@b.com", "secret").await.unwrap();

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::Api(ApiError::Unauthorized { .. })));
        assert_eq!(manager.phase(), AuthPhase::SignedOut);
        assert!(!store.current().unwrap().is_authenticated);
    }

    #[tokio::test]
    async fn test_manual_refresh_transient_failure_keeps_session() {
        let transport = Arc::new(FakeTransport::default());
        script_login_ok(&transport);
        transport.on("/auth/refresh", 503, "{}");
        let (manager, store) = manager_with(transport);

        manager.legacy_login("a@b.com", "secret").await.unwrap();

        let err = manager.refresh().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(manager.phase(), AuthPhase::SignedIn);
        assert!(store.current().unwrap().is_authenticated);
    }

    #[tokio::test]
    async fn test_refresh_when_signed_out() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager_with(transport);

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::NotLoggedIn));
    }

    #[tokio::test]
    async fn test_email_restart_mid_flow() {
        let transport = Arc::new(FakeTransport::default());
        script_email_ok(&transport);
        script_password_ok(&transport);
        transport.on(
            "/auth/validate-email",
            200,
            r#"{"success":true,"temp_token":"T9","is_new_user":true}"#,
        );
        let (manager, _) = manager_with(transport);

        manager.validate_email("a@b.com").await.unwrap();
        manager.validate_password("secret").await.unwrap();
        assert_eq!(manager.handshake_stage(), HandshakeStage::Otp);

        // Submitting a different email restarts the handshake.
        let step = manager.validate_email("c@d.com").await.unwrap();
        assert!(step.is_new_user);
        assert_eq!(manager.handshake_stage(), HandshakeStage::Password);
    }

    #[tokio::test]
    async fn test_email_validation_failure_surfaces_backend_message() {
        let transport = Arc::new(FakeTransport::default());
        transport.on(
            "/auth/validate-email",
            422,
            r#"{"message":"email is malformed"}"#,
        );
        let (manager, _) = manager_with(transport);

        let err = manager.validate_email("nope").await.unwrap_err();
        match err {
            AuthError::Validation(message) => assert_eq!(message, "email is malformed"),
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(manager.handshake_stage(), HandshakeStage::Email);
    }

    #[tokio::test]
    async fn test_network_failure_keeps_step_tokens() {
        let transport = Arc::new(FakeTransport::default());
        script_email_ok(&transport);
        transport.on_err("/auth/validate-password", ApiError::Timeout);
        script_password_ok(&transport);
        let (manager, _) = manager_with(transport);

        manager.validate_email("a@b.com").await.unwrap();

        let err = manager.validate_password("secret").await.unwrap_err();
        assert!(err.is_transient());

        // Same step, same token: plain retry succeeds.
        assert_eq!(manager.handshake_stage(), HandshakeStage::Password);
        manager.validate_password("secret").await.unwrap();
        assert_eq!(manager.handshake_stage(), HandshakeStage::Otp);
    }

    #[tokio::test]
    async fn test_empty_email_rejected_locally() {
        let transport = Arc::new(FakeTransport::default());
        let (manager, _) = manager_with(transport.clone());

        let err = manager.validate_email("   ").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_session_listener_sees_login_and_logout() {
        let transport = Arc::new(FakeTransport::default());
        script_login_ok(&transport);
        transport.on("/auth/logout", 200, "{}");
        let (manager, _) = manager_with(transport);

        let events = Arc::new(StdMutex::new(Vec::new()));
        let events_clone = events.clone();
        manager.subscribe(Box::new(move |snapshot| {
            events_clone.lock().unwrap().push(snapshot.is_authenticated);
        }));

        manager.legacy_login("a@b.com", "secret").await.unwrap();
        manager.logout().await.unwrap();

        assert_eq!(*events.lock().unwrap(), vec![true, false]);
    }
}
