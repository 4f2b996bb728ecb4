//! Session lifecycle on a kiosk
//!
//! ```text
//! IDLE --authenticate--> AUTHENTICATING --start--> ACTIVE
//! ACTIVE --finalize / remote end--> IDLE
//! IDLE --boot with session file--> ACTIVE (rehydrated) or IDLE (file cleared)
//! ```
//!
//! All state lives in one [`SessionContext`] that changes only through
//! [`SessionContext::apply`]. The session file is the source of truth across
//! restarts: it is written before the context becomes ACTIVE and cleared
//! before the context returns to IDLE, so a crash between the two steps is
//! resolved by the next boot.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    device::DeviceRegistry,
    error::{KioskError, KioskResult},
    models::{PersistedSession, SessionView},
    persist::JsonFile,
    remote::{AuthClient, RemoteError, SessionClient},
};

const EVENT_CAPACITY: usize = 16;

/// End reason recorded when the backend reports the session over
pub const REMOTE_END_REASON: &str = "remote_ended";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Authenticating,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Full screen, no way out
    #[default]
    Kiosk,
    /// Kiosk lock lifted for offline work; the session keeps running
    OfflineRelaxed,
}

/// What the window should do when the user tries to close it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseAction {
    Hide,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Credential {
    rut: String,
    token: String,
}

/// Inputs of the session state machine
#[derive(Debug, Clone)]
pub enum Transition {
    AuthenticationStarted,
    Authenticated { rut: String, token: String },
    /// Login or session start failed; nothing was persisted
    Failed,
    Started(PersistedSession),
    Rehydrated(PersistedSession),
    Ended,
    OfflineUseAllowed,
    KioskRestored,
}

impl Transition {
    fn label(&self) -> &'static str {
        match self {
            Transition::AuthenticationStarted => "authentication start",
            Transition::Authenticated { .. } => "authentication",
            Transition::Failed => "failure",
            Transition::Started(_) => "session start",
            Transition::Rehydrated(_) => "rehydration",
            Transition::Ended => "session end",
            Transition::OfflineUseAllowed => "offline use",
            Transition::KioskRestored => "kiosk restore",
        }
    }
}

/// In-memory session state of the kiosk process
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    state: SessionState,
    display: DisplayMode,
    credential: Option<Credential>,
    session: Option<PersistedSession>,
}

impl SessionContext {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn display(&self) -> DisplayMode {
        self.display
    }

    pub fn session(&self) -> Option<&PersistedSession> {
        self.session.as_ref()
    }

    /// The only way the context changes
    pub fn apply(&mut self, transition: Transition) -> KioskResult<()> {
        use SessionState::*;

        match (self.state, transition) {
            (Idle, Transition::AuthenticationStarted) => {
                self.state = Authenticating;
            }
            (Authenticating, Transition::Authenticated { rut, token }) => {
                self.credential = Some(Credential { rut, token });
            }
            (Idle | Authenticating, Transition::Failed) => {
                *self = Self::default();
            }
            (Authenticating, Transition::Started(session)) => {
                self.state = Active;
                self.display = DisplayMode::Kiosk;
                self.credential = None;
                self.session = Some(session);
            }
            (Idle, Transition::Rehydrated(session)) => {
                self.state = Active;
                self.display = DisplayMode::Kiosk;
                self.session = Some(session);
            }
            (_, Transition::Ended) => {
                *self = Self::default();
            }
            (Active, Transition::OfflineUseAllowed) => {
                self.display = DisplayMode::OfflineRelaxed;
            }
            (_, Transition::KioskRestored) => {
                self.display = DisplayMode::Kiosk;
            }
            (state, transition) => {
                return Err(KioskError::InvalidTransition(format!(
                    "{} does not apply while {:?}",
                    transition.label(),
                    state
                )));
            }
        }
        Ok(())
    }

    pub fn close_action(&self) -> CloseAction {
        match self.state {
            SessionState::Active => CloseAction::Hide,
            _ => CloseAction::Exit,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            display: self.display,
            close_action: self.close_action(),
            session: self.session.as_ref().map(SessionView::from),
        }
    }
}

/// What the local UI sees of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub display: DisplayMode,
    pub close_action: CloseAction,
    pub session: Option<SessionView>,
}

/// Notifications pushed to the local UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum SessionEvent {
    #[serde(rename = "session.rehydrated")]
    Rehydrated {
        session: SessionView,
        /// False when the backend could not be asked
        verified: bool,
    },
    #[serde(rename = "session.ended")]
    Ended { session_id: Uuid, reason: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Rehydrated { .. } => "session.rehydrated",
            SessionEvent::Ended { .. } => "session.ended",
        }
    }
}

/// Outcome of asking the backend about the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCheck {
    NoSession,
    Active,
    /// The backend ended the session; it was closed locally
    Ended,
    Unreachable,
}

pub struct SessionManager {
    context: Mutex<SessionContext>,
    file: JsonFile<PersistedSession>,
    auth: Arc<dyn AuthClient>,
    sessions: Arc<dyn SessionClient>,
    device: Arc<DeviceRegistry>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        file: JsonFile<PersistedSession>,
        auth: Arc<dyn AuthClient>,
        sessions: Arc<dyn SessionClient>,
        device: Arc<DeviceRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            context: Mutex::new(SessionContext::default()),
            file,
            auth,
            sessions,
            device,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: SessionEvent) {
        debug!("Session event {}", event.name());
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Recover a persisted session at process start
    ///
    /// A session the backend cannot be asked about is kept; only a definitive
    /// "not active" answer clears it.
    pub async fn boot(&self) -> KioskResult<SessionSnapshot> {
        let mut context = self.context.lock().await;
        let Some(persisted) = self.file.read().await else {
            context.apply(Transition::Ended)?;
            return Ok(context.snapshot());
        };

        let verified = match self.sessions.is_active(persisted.session_id).await {
            Ok(true) => true,
            Ok(false) => {
                info!(
                    "Persisted session {} is no longer active, returning to login",
                    persisted.session_id
                );
                if let Err(e) = self.file.clear().await {
                    warn!("Could not clear session file: {}", e);
                }
                context.apply(Transition::Ended)?;
                self.notify(SessionEvent::Ended {
                    session_id: persisted.session_id,
                    reason: REMOTE_END_REASON.to_string(),
                });
                return Ok(context.snapshot());
            }
            Err(e) => {
                warn!(
                    "Could not verify session {} ({}), resuming it",
                    persisted.session_id, e
                );
                false
            }
        };

        let view = SessionView::from(&persisted);
        context.apply(Transition::Rehydrated(persisted))?;
        info!("Rehydrated session {} for {}", view.session_id, view.rut);
        self.notify(SessionEvent::Rehydrated {
            session: view,
            verified,
        });
        Ok(context.snapshot())
    }

    /// Check credentials with the auth service and hold the token in memory
    pub async fn authenticate(&self, rut: &str, password: &str) -> KioskResult<SessionSnapshot> {
        let mut context = self.context.lock().await;
        if context.state() != SessionState::Idle {
            return Err(KioskError::InvalidTransition(
                "a session is already in progress on this device".to_string(),
            ));
        }
        context.apply(Transition::AuthenticationStarted)?;

        match self.auth.authenticate(rut, password).await {
            Ok(token) => {
                context.apply(Transition::Authenticated {
                    rut: rut.to_string(),
                    token,
                })?;
                Ok(context.snapshot())
            }
            Err(e) => {
                context.apply(Transition::Failed)?;
                warn!("Authentication of {} failed: {}", rut, e);
                Err(match e {
                    RemoteError::Rejected {
                        status: 400 | 401 | 403,
                        ..
                    } => KioskError::InvalidCredentials,
                    other => other.into(),
                })
            }
        }
    }

    /// Open a backend session for the authenticated user and persist it
    pub async fn start(&self, rut: &str) -> KioskResult<SessionSnapshot> {
        let mut context = self.context.lock().await;
        let token = match (&context.state(), &context.credential) {
            (SessionState::Authenticating, Some(credential)) if credential.rut == rut => {
                credential.token.clone()
            }
            (SessionState::Authenticating, _) => {
                context.apply(Transition::Failed)?;
                warn!("Session start for {} does not match the pending login", rut);
                return Err(KioskError::NotAuthenticated(rut.to_string()));
            }
            _ => return Err(KioskError::NotAuthenticated(rut.to_string())),
        };

        match self.open_session(rut, &token).await {
            Ok(persisted) => {
                info!(
                    "Session {} started for {} on lab {} device {}",
                    persisted.session_id, rut, persisted.lab_id, persisted.device_number
                );
                context.apply(Transition::Started(persisted))?;
                Ok(context.snapshot())
            }
            Err(e) => {
                context.apply(Transition::Failed)?;
                Err(e)
            }
        }
    }

    async fn open_session(&self, rut: &str, token: &str) -> KioskResult<PersistedSession> {
        let (lab_id, device_number) = self.device.session_binding().await?;
        let record = self
            .sessions
            .start_session(token, lab_id, device_number)
            .await?;

        let persisted = PersistedSession {
            session_id: record.session_id,
            rut: rut.to_string(),
            device_number: record.device_number,
            lab_id: record.lab_id,
            started_at: record.started_at,
            token: token.to_string(),
        };

        if let Err(e) = self.file.write(&persisted).await {
            // never leave a backend session the device cannot recover
            if let Err(end_error) = self
                .sessions
                .end_session(token, record.session_id, "persist_failed")
                .await
            {
                warn!("Could not end orphaned session {}: {}", record.session_id, end_error);
            }
            return Err(e);
        }
        Ok(persisted)
    }

    /// Authenticate and start in one step
    pub async fn login(&self, rut: &str, password: &str) -> KioskResult<SessionSnapshot> {
        self.authenticate(rut, password).await?;
        self.start(rut).await
    }

    /// End the session locally and, best effort, on the backend
    ///
    /// Always leaves the device at the login screen. Finalizing a session
    /// that is not the current one is an error; finalizing with no session
    /// at all just clears what is on disk.
    pub async fn finalize(&self, session_id: Uuid, reason: &str) -> KioskResult<SessionSnapshot> {
        let mut context = self.context.lock().await;
        let current = match context.session() {
            Some(session) if session.session_id != session_id => {
                return Err(KioskError::InvalidTransition(format!(
                    "session {} is not the active session",
                    session_id
                )));
            }
            Some(session) => Some(session.clone()),
            None => self
                .file
                .read()
                .await
                .filter(|session| session.session_id == session_id),
        };

        if let Some(session) = &current {
            if let Err(e) = self
                .sessions
                .end_session(&session.token, session.session_id, reason)
                .await
            {
                warn!("Remote end of session {} failed: {}", session.session_id, e);
            }
        }

        self.close_locally(&mut context, session_id, reason).await?;
        Ok(context.snapshot())
    }

    async fn close_locally(
        &self,
        context: &mut SessionContext,
        session_id: Uuid,
        reason: &str,
    ) -> KioskResult<()> {
        if let Err(e) = self.file.clear().await {
            // the next boot asks the backend and clears it then
            warn!("Could not clear session file: {}", e);
        }
        let was_active = context.state() == SessionState::Active;
        context.apply(Transition::Ended)?;

        if was_active {
            info!("Session {} ended ({})", session_id, reason);
            self.notify(SessionEvent::Ended {
                session_id,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// Heartbeat for the current session
    ///
    /// When the backend says the session is over it is closed here without
    /// another remote call; an unreachable backend changes nothing.
    pub async fn check_remote(&self) -> KioskResult<RemoteCheck> {
        let mut context = self.context.lock().await;
        let Some(session_id) = context.session().map(|s| s.session_id) else {
            return Ok(RemoteCheck::NoSession);
        };

        match self.sessions.is_active(session_id).await {
            Ok(true) => Ok(RemoteCheck::Active),
            Ok(false) => {
                self.close_locally(&mut context, session_id, REMOTE_END_REASON)
                    .await?;
                Ok(RemoteCheck::Ended)
            }
            Err(e) => {
                debug!("Heartbeat for {} failed: {}", session_id, e);
                Ok(RemoteCheck::Unreachable)
            }
        }
    }

    pub async fn read_persisted(&self) -> Option<SessionView> {
        self.file.read().await.as_ref().map(SessionView::from)
    }

    /// Drop the session file and the in-memory session without telling the backend
    pub async fn clear_persisted(&self) -> KioskResult<SessionSnapshot> {
        let mut context = self.context.lock().await;
        self.file.clear().await?;

        if let Some(session_id) = context.session().map(|s| s.session_id) {
            self.close_locally(&mut context, session_id, "cleared").await?;
        }
        Ok(context.snapshot())
    }

    pub async fn allow_offline_use(&self) -> KioskResult<SessionSnapshot> {
        let mut context = self.context.lock().await;
        context.apply(Transition::OfflineUseAllowed)?;
        info!("Kiosk lock relaxed for offline use");
        Ok(context.snapshot())
    }

    pub async fn restore_kiosk(&self) -> KioskResult<SessionSnapshot> {
        let mut context = self.context.lock().await;
        context.apply(Transition::KioskRestored)?;
        Ok(context.snapshot())
    }

    pub async fn close_requested(&self) -> CloseAction {
        let action = self.context.lock().await.close_action();
        if action == CloseAction::Hide {
            debug!("Close intercepted while a session is active");
        }
        action
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.context.lock().await.snapshot()
    }
}
