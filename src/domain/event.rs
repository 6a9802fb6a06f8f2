use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::SubmissionKind;

/// Platform-supplied identity fields, refreshed on every contact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Reference to an inbound binary: the transport's file id plus the path
/// the file store returned, when the download succeeded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub file_id: String,
    pub stored_path: Option<String>,
}

/// One inbound transport event, already stripped of envelope details.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub user_id: i64,
    pub profile: ChatProfile,
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

/// Message content after the single parse step at the transport boundary.
/// Commands arrive pre-parsed; the engine never inspects raw command strings.
#[derive(Clone, Debug)]
pub enum EventPayload {
    Command(MenuCommand),
    Admin(AdminCommand),
    /// Recognized admin command name with malformed arguments.
    AdminUsage(&'static str),
    Callback(CallbackCommand),
    Text(String),
    Media {
        kind: SubmissionKind,
        caption: Option<String>,
        attachment: AttachmentRef,
    },
}

/// Top-level commands available from the reply keyboard or as slash commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuCommand {
    Start,
    MainMenu,
    Register,
    GameRules,
    Instructions,
    SubmitReport,
    TaskBank,
    MyResults,
    EditProfile,
    EditFirstName,
    EditLastName,
    Support,
    About,
}

/// Inline-button callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackCommand {
    SubmitTask(i64),
    MainMenu,
}

/// Staff commands; gated by the admin allow-list before dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Pending,
    Approve(i64),
    Reject(i64),
    Inbox,
    Assign { entry_id: i64, task_id: i64 },
    Done(i64),
    Drop(i64),
    Tasks,
    NewTask(String),
    SetTitle { task_id: i64, value: String },
    SetDescription { task_id: i64, value: String },
    SetLink { task_id: i64, value: String },
    SetDeadline { task_id: i64, value: String },
    ToggleTask(i64),
    DelTask(i64),
    CloseSupport(i64),
    Sweep,
}
