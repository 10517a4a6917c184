use serde::Serialize;
use thiserror::Error;

const DELETE_ALARM_TITLE: &str = "Confirm Deletion";
const DELETE_ALARM_MESSAGE: &str = "Are you sure you want to delete this alarm?";
const DISCARD_CHANGES_TITLE: &str = "Discard changes?";

/// What will happen if the user confirms.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfirmationAction {
    DeleteAlarm { alarm_id: String, label: String },
    DiscardChanges { subject: String },
}

impl ConfirmationAction {
    pub fn title(&self) -> &str {
        match self {
            Self::DeleteAlarm { .. } => DELETE_ALARM_TITLE,
            Self::DiscardChanges { .. } => DISCARD_CHANGES_TITLE,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::DeleteAlarm { .. } => DELETE_ALARM_MESSAGE.to_string(),
            Self::DiscardChanges { subject } => {
                format!("Unsaved changes to {subject} will be lost.")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationState {
    Idle,
    PendingConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    Cancelled,
    /// Closed without an explicit choice; treated as a cancel.
    Dismissed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("a confirmation is already pending")]
    AlreadyPending,
    #[error("no confirmation is pending")]
    NothingPending,
}

type Continuation<T> = Box<dyn FnOnce() -> T + Send>;

struct PendingConfirmation<T> {
    action: ConfirmationAction,
    on_confirm: Continuation<T>,
    on_cancel: Continuation<T>,
}

/// Gates a destructive action behind an explicit user decision.
///
/// Exactly one of the two continuations runs, exactly once, for every
/// accepted `begin`. A flow dropped while pending runs `on_cancel`.
pub struct ConfirmationFlow<T> {
    pending: Option<PendingConfirmation<T>>,
}

impl<T> Default for ConfirmationFlow<T> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<T> std::fmt::Debug for ConfirmationFlow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationFlow")
            .field("state", &self.state())
            .field("action", &self.pending_action())
            .finish()
    }
}

impl<T> ConfirmationFlow<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConfirmationState {
        if self.pending.is_some() {
            ConfirmationState::PendingConfirmation
        } else {
            ConfirmationState::Idle
        }
    }

    pub fn pending_action(&self) -> Option<&ConfirmationAction> {
        self.pending.as_ref().map(|pending| &pending.action)
    }

    pub fn begin<C, X>(
        &mut self,
        action: ConfirmationAction,
        on_confirm: C,
        on_cancel: X,
    ) -> Result<(), ConfirmationError>
    where
        C: FnOnce() -> T + Send + 'static,
        X: FnOnce() -> T + Send + 'static,
    {
        if self.pending.is_some() {
            return Err(ConfirmationError::AlreadyPending);
        }
        self.pending = Some(PendingConfirmation {
            action,
            on_confirm: Box::new(on_confirm),
            on_cancel: Box::new(on_cancel),
        });
        Ok(())
    }

    pub fn resolve(&mut self, resolution: Resolution) -> Result<T, ConfirmationError> {
        let pending = self.pending.take().ok_or(ConfirmationError::NothingPending)?;
        Ok(match resolution {
            Resolution::Confirmed => (pending.on_confirm)(),
            Resolution::Cancelled | Resolution::Dismissed => (pending.on_cancel)(),
        })
    }

    pub fn confirm(&mut self) -> Result<T, ConfirmationError> {
        self.resolve(Resolution::Confirmed)
    }

    pub fn cancel(&mut self) -> Result<T, ConfirmationError> {
        self.resolve(Resolution::Cancelled)
    }

    pub fn dismiss(&mut self) -> Result<T, ConfirmationError> {
        self.resolve(Resolution::Dismissed)
    }
}

impl<T> Drop for ConfirmationFlow<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = (pending.on_cancel)();
        }
    }
}
