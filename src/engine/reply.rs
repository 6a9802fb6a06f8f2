use crate::db::Task;

/// An outgoing message produced by the core. The transport layer decides how
/// to deliver it; `to` may be the author of the inbound event or any other
/// chat (admin notifications).
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub to: i64,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    pub fn text(to: i64, text: impl Into<String>) -> Self {
        Self {
            to,
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(to: i64, text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            to,
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

/// Transport-agnostic keyboard descriptors. Rendering into concrete markup
/// happens in the bot layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Keyboard {
    MainMenu,
    Register,
    Participation,
    EditProfile,
    BackToMain,
    TaskPicker(Vec<TaskButton>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskButton {
    pub task_id: i64,
    pub title: String,
}

impl TaskButton {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
        }
    }
}
