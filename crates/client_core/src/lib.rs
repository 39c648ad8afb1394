use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use shared::{
    domain::{AttendanceStatus, SessionId, UserId},
    protocol::{MarkRequest, SessionStatus},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

pub mod marking_service;
pub use marking_service::{HttpMarkingService, MarkOutcome, MarkSubmitError, MarkingService};

/// Fixed path template for the per-session export resource.
pub const EXPORT_LINK_TEMPLATE: &str = "/export/attendance/{session_id}";
/// Neutral href while no session is selected.
pub const EXPORT_LINK_PLACEHOLDER: &str = "#";

const SESSION_ID_SLOT: &str = "{session_id}";

/// Target of the export control derived from the current session selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportLink {
    pub href: String,
    pub enabled: bool,
}

/// Tracks the currently selected session and derives the export link from it.
/// Purely synchronous; performs no I/O.
#[derive(Debug, Clone)]
pub struct SessionSelector {
    selected: Option<SessionId>,
    export_template: String,
}

impl SessionSelector {
    pub fn new() -> Self {
        Self::with_export_template(EXPORT_LINK_TEMPLATE)
    }

    pub fn with_export_template(template: impl Into<String>) -> Self {
        Self {
            selected: None,
            export_template: template.into(),
        }
    }

    /// Updates the selection and returns the recomputed export link. An empty
    /// identifier counts as no selection.
    pub fn on_change(&mut self, value: Option<SessionId>) -> ExportLink {
        self.selected = value.filter(|session| !session.as_str().is_empty());
        self.export_link()
    }

    pub fn current(&self) -> Option<&SessionId> {
        self.selected.as_ref()
    }

    pub fn export_link(&self) -> ExportLink {
        match &self.selected {
            Some(session) => ExportLink {
                href: self
                    .export_template
                    .replace(SESSION_ID_SLOT, session.as_str()),
                enabled: true,
            },
            None => ExportLink {
                href: EXPORT_LINK_PLACEHOLDER.to_string(),
                enabled: false,
            },
        }
    }
}

impl Default for SessionSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of one candidate-status control. `Pending` exists only while a
/// request for this control is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Interactive,
    Pending,
    LockedActive,
    LockedNeutral,
}

impl ControlState {
    pub fn is_interactive(&self) -> bool {
        matches!(self, ControlState::Interactive)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, ControlState::LockedActive | ControlState::LockedNeutral)
    }
}

/// One candidate-status control for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub user_id: UserId,
    pub status: AttendanceStatus,
    pub state: ControlState,
}

/// User-facing notices surfaced by the activation flow. Exactly one is
/// emitted per failed activation, never on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    SelectSessionFirst,
    SessionLocked,
    Forbidden,
    MarkFailed,
    NetworkFailure,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::SelectSessionFirst => "Select a session first.",
            Notice::SessionLocked => "This session is locked.",
            Notice::Forbidden => "You do not have permission to mark attendance.",
            Notice::MarkFailed => "Failed to save attendance.",
            Notice::NetworkFailure => "Network error.",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    SessionChanged(Option<SessionId>),
    ExportLinkChanged(ExportLink),
    MarkCommitted {
        user_id: UserId,
        status: AttendanceStatus,
    },
    ControlReverted {
        user_id: UserId,
        status: AttendanceStatus,
    },
    Notice(Notice),
}

/// How one activation terminated. Every path ends with the control either
/// locked or interactive again; nothing stays pending past its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Guard hit: the control was not interactive, or is unknown to the
    /// index. No request was issued.
    Ignored,
    /// A precondition failed before any request was issued.
    Rejected(Notice),
    /// The mark was confirmed and the user's control set converged.
    Locked(AttendanceStatus),
    /// Recoverable failure; the activated control is interactive again.
    Retryable(Notice),
    /// The response arrived after the user's set had already converged on
    /// another mark; the existing lock stands.
    Superseded,
}

struct ControllerState {
    selector: SessionSelector,
    controls: HashMap<UserId, Vec<Control>>,
}

impl ControllerState {
    fn control_state(&self, user_id: &UserId, status: AttendanceStatus) -> Option<ControlState> {
        self.controls
            .get(user_id)?
            .iter()
            .find(|control| control.status == status)
            .map(|control| control.state)
    }

    fn set_control_state(&mut self, user_id: &UserId, status: AttendanceStatus, state: ControlState) {
        if let Some(set) = self.controls.get_mut(user_id) {
            if let Some(control) = set.iter_mut().find(|control| control.status == status) {
                control.state = state;
            }
        }
    }

    /// Terminal convergence: the confirmed status becomes the single active
    /// control, every sibling goes neutral, nothing in the set stays
    /// interactive or pending.
    fn converge_locked(&mut self, user_id: &UserId, status: AttendanceStatus) {
        if let Some(set) = self.controls.get_mut(user_id) {
            for control in set.iter_mut() {
                control.state = if control.status == status {
                    ControlState::LockedActive
                } else {
                    ControlState::LockedNeutral
                };
            }
        }
    }

    fn revert_if_pending(&mut self, user_id: &UserId, status: AttendanceStatus) -> bool {
        if self.control_state(user_id, status) == Some(ControlState::Pending) {
            self.set_control_state(user_id, status, ControlState::Interactive);
            return true;
        }
        false
    }
}

/// Per-user attendance marking controller. Holds the session selector and an
/// explicit index from user id to that user's candidate-status controls,
/// built once at construction. All state lives behind one mutex; the lock is
/// never held across the submit await, so activations for different controls
/// run concurrently.
pub struct AttendanceController {
    service: Arc<dyn MarkingService>,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl AttendanceController {
    pub fn new(service: Arc<dyn MarkingService>, roster: Vec<UserId>) -> Arc<Self> {
        Self::with_statuses(service, roster, AttendanceStatus::ALL.to_vec())
    }

    pub fn with_statuses(
        service: Arc<dyn MarkingService>,
        roster: Vec<UserId>,
        statuses: Vec<AttendanceStatus>,
    ) -> Arc<Self> {
        let controls = roster
            .into_iter()
            .map(|user_id| {
                let set = statuses
                    .iter()
                    .map(|status| Control {
                        user_id: user_id.clone(),
                        status: *status,
                        state: ControlState::Interactive,
                    })
                    .collect();
                (user_id, set)
            })
            .collect();
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            service,
            inner: Mutex::new(ControllerState {
                selector: SessionSelector::new(),
                controls,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn select_session(&self, session: Option<SessionId>) {
        let (current, link) = {
            let mut inner = self.inner.lock().await;
            let link = inner.selector.on_change(session);
            (inner.selector.current().cloned(), link)
        };
        self.emit(ControllerEvent::SessionChanged(current));
        self.emit(ControllerEvent::ExportLinkChanged(link));
    }

    pub async fn current_session(&self) -> Option<SessionId> {
        self.inner.lock().await.selector.current().cloned()
    }

    pub async fn export_link(&self) -> ExportLink {
        self.inner.lock().await.selector.export_link()
    }

    pub async fn controls_for(&self, user_id: &UserId) -> Vec<Control> {
        self.inner
            .lock()
            .await
            .controls
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn control_state(
        &self,
        user_id: &UserId,
        status: AttendanceStatus,
    ) -> Option<ControlState> {
        self.inner.lock().await.control_state(user_id, status)
    }

    /// Activation handler for one (user, status) control. Guard, precondition,
    /// optimistic lock-out, one submit, then convergence or revert.
    pub async fn activate(&self, user_id: &UserId, status: AttendanceStatus) -> Activation {
        let request = {
            let mut inner = self.inner.lock().await;
            let Some(state) = inner.control_state(user_id, status) else {
                warn!("attendance: activation for unknown control user={user_id} status={status}");
                return Activation::Ignored;
            };
            if !state.is_interactive() {
                return Activation::Ignored;
            }
            let Some(session_id) = inner.selector.current().cloned() else {
                drop(inner);
                self.emit(ControllerEvent::Notice(Notice::SelectSessionFirst));
                return Activation::Rejected(Notice::SelectSessionFirst);
            };
            // Optimistic lock-out: the only mutation before the outcome is known.
            inner.set_control_state(user_id, status, ControlState::Pending);
            MarkRequest {
                user_id: user_id.clone(),
                session_id,
                status,
            }
        };

        let outcome = MarkOutcome::classify(self.service.submit_mark(&request).await);
        self.apply_outcome(&request, outcome).await
    }

    /// Queries the lock state of the currently selected session, `Ok(None)`
    /// when nothing is selected.
    pub async fn session_status(&self) -> Result<Option<SessionStatus>> {
        let Some(session_id) = self.current_session().await else {
            return Ok(None);
        };
        let status = self.service.session_status(&session_id).await?;
        Ok(Some(status))
    }

    async fn apply_outcome(&self, request: &MarkRequest, outcome: MarkOutcome) -> Activation {
        if outcome.confirms_mark() {
            {
                let mut inner = self.inner.lock().await;
                inner.converge_locked(&request.user_id, request.status);
            }
            info!(
                "attendance: mark committed user={} status={} session={}",
                request.user_id, request.status, request.session_id
            );
            self.emit(ControllerEvent::MarkCommitted {
                user_id: request.user_id.clone(),
                status: request.status,
            });
            return Activation::Locked(request.status);
        }

        let notice = match outcome {
            MarkOutcome::SessionLocked => Notice::SessionLocked,
            MarkOutcome::Forbidden => Notice::Forbidden,
            MarkOutcome::NetworkFailure => Notice::NetworkFailure,
            _ => Notice::MarkFailed,
        };
        self.recover(request, notice).await
    }

    async fn recover(&self, request: &MarkRequest, notice: Notice) -> Activation {
        let reverted = {
            let mut inner = self.inner.lock().await;
            inner.revert_if_pending(&request.user_id, request.status)
        };
        warn!(
            "attendance: mark not recorded user={} status={} session={} notice={:?}",
            request.user_id, request.status, request.session_id, notice
        );
        self.emit(ControllerEvent::Notice(notice));
        if reverted {
            self.emit(ControllerEvent::ControlReverted {
                user_id: request.user_id.clone(),
                status: request.status,
            });
            Activation::Retryable(notice)
        } else {
            // The set converged while this request was in flight; the lock is
            // terminal and is never partially re-enabled.
            Activation::Superseded
        }
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}
