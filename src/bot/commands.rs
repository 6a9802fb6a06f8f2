use crate::domain::event::{AdminCommand, CallbackCommand, EventPayload, MenuCommand};

use super::keyboards::{
    BTN_ABOUT, BTN_EDIT_FIRST_NAME, BTN_EDIT_LAST_NAME, BTN_EDIT_PROFILE, BTN_INSTRUCTIONS,
    BTN_MAIN_MENU, BTN_REGISTER, BTN_RESULTS, BTN_RULES, BTN_SUBMIT, BTN_SUPPORT, BTN_TASK_BANK,
};

const USAGE_APPROVE: &str = "/approve <id отчета>";
const USAGE_REJECT: &str = "/reject <id отчета>";
const USAGE_ASSIGN: &str = "/assign <id записи> <id задания>";
const USAGE_DONE: &str = "/done <id записи>";
const USAGE_DROP: &str = "/drop <id записи>";
const USAGE_NEWTASK: &str = "/newtask Название | Описание | Ссылка | Открытие | Дедлайн";
const USAGE_SET_TITLE: &str = "/set_title <id задания> <новое название>";
const USAGE_SET_DESC: &str = "/set_desc <id задания> <новое описание>";
const USAGE_SET_LINK: &str = "/set_link <id задания> <ссылка или «нет»>";
const USAGE_SET_DEADLINE: &str = "/set_deadline <id задания> <ДД.ММ.ГГГГ ЧЧ:ММ или «нет»>";
const USAGE_TOGGLE_TASK: &str = "/toggle_task <id задания>";
const USAGE_DEL_TASK: &str = "/del_task <id задания>";
const USAGE_CLOSE_SUPPORT: &str = "/close_support <id обращения>";

/// The single parse step: raw message text in, a typed payload out.
/// Everything downstream matches on enums and never looks at the string.
pub fn parse_text(text: &str) -> EventPayload {
    if let Some(menu) = parse_menu_command(text) {
        return EventPayload::Command(menu);
    }
    match parse_admin_command(text) {
        AdminParse::Command(command) => EventPayload::Admin(command),
        AdminParse::Usage(usage) => EventPayload::AdminUsage(usage),
        AdminParse::NotAdminCommand => EventPayload::Text(text.to_string()),
    }
}

pub fn parse_menu_command(text: &str) -> Option<MenuCommand> {
    let trimmed = text.trim();
    let by_label = match trimmed {
        BTN_MAIN_MENU => Some(MenuCommand::MainMenu),
        BTN_REGISTER => Some(MenuCommand::Register),
        BTN_RULES => Some(MenuCommand::GameRules),
        BTN_INSTRUCTIONS => Some(MenuCommand::Instructions),
        BTN_SUBMIT => Some(MenuCommand::SubmitReport),
        BTN_TASK_BANK => Some(MenuCommand::TaskBank),
        BTN_RESULTS => Some(MenuCommand::MyResults),
        BTN_EDIT_PROFILE => Some(MenuCommand::EditProfile),
        BTN_EDIT_FIRST_NAME => Some(MenuCommand::EditFirstName),
        BTN_EDIT_LAST_NAME => Some(MenuCommand::EditLastName),
        BTN_SUPPORT => Some(MenuCommand::Support),
        BTN_ABOUT => Some(MenuCommand::About),
        _ => None,
    };
    if by_label.is_some() {
        return by_label;
    }
    let slash = parse_slash(trimmed)?;
    match slash.name.as_str() {
        "start" => Some(MenuCommand::Start),
        "cancel" | "menu" => Some(MenuCommand::MainMenu),
        "register" => Some(MenuCommand::Register),
        "help" => Some(MenuCommand::Instructions),
        "rules" => Some(MenuCommand::GameRules),
        "support" => Some(MenuCommand::Support),
        "results" => Some(MenuCommand::MyResults),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AdminParse {
    Command(AdminCommand),
    /// Known command, broken arguments; carries the usage line.
    Usage(&'static str),
    NotAdminCommand,
}

pub fn parse_admin_command(text: &str) -> AdminParse {
    let Some(slash) = parse_slash(text) else {
        return AdminParse::NotAdminCommand;
    };
    match slash.name.as_str() {
        "admin" => AdminParse::Command(AdminCommand::Help),
        "pending" => AdminParse::Command(AdminCommand::Pending),
        "approve" => id_command(&slash, AdminCommand::Approve, USAGE_APPROVE),
        "reject" => id_command(&slash, AdminCommand::Reject, USAGE_REJECT),
        "inbox" => AdminParse::Command(AdminCommand::Inbox),
        "assign" => match (slash.id_arg(0), slash.id_arg(1)) {
            (Some(entry_id), Some(task_id)) => {
                AdminParse::Command(AdminCommand::Assign { entry_id, task_id })
            }
            _ => AdminParse::Usage(USAGE_ASSIGN),
        },
        "done" => id_command(&slash, AdminCommand::Done, USAGE_DONE),
        "drop" => id_command(&slash, AdminCommand::Drop, USAGE_DROP),
        "tasks" => AdminParse::Command(AdminCommand::Tasks),
        "newtask" => {
            if slash.tail.is_empty() {
                AdminParse::Usage(USAGE_NEWTASK)
            } else {
                AdminParse::Command(AdminCommand::NewTask(slash.tail))
            }
        }
        "set_title" => value_command(
            &slash,
            |task_id, value| AdminCommand::SetTitle { task_id, value },
            USAGE_SET_TITLE,
        ),
        "set_desc" => value_command(
            &slash,
            |task_id, value| AdminCommand::SetDescription { task_id, value },
            USAGE_SET_DESC,
        ),
        "set_link" => value_command(
            &slash,
            |task_id, value| AdminCommand::SetLink { task_id, value },
            USAGE_SET_LINK,
        ),
        "set_deadline" => value_command(
            &slash,
            |task_id, value| AdminCommand::SetDeadline { task_id, value },
            USAGE_SET_DEADLINE,
        ),
        "toggle_task" => id_command(&slash, AdminCommand::ToggleTask, USAGE_TOGGLE_TASK),
        "del_task" => id_command(&slash, AdminCommand::DelTask, USAGE_DEL_TASK),
        "close_support" => id_command(&slash, AdminCommand::CloseSupport, USAGE_CLOSE_SUPPORT),
        "sweep" => AdminParse::Command(AdminCommand::Sweep),
        _ => AdminParse::NotAdminCommand,
    }
}

pub fn parse_callback(data: &str) -> Option<CallbackCommand> {
    if data == "main_menu" {
        return Some(CallbackCommand::MainMenu);
    }
    let task_id = data.strip_prefix("submit_task:")?.parse().ok()?;
    Some(CallbackCommand::SubmitTask(task_id))
}

/// Inverse of [`parse_callback`]; the keyboard renderer uses it so both
/// directions stay in one place.
pub fn callback_data(command: CallbackCommand) -> String {
    match command {
        CallbackCommand::SubmitTask(task_id) => format!("submit_task:{task_id}"),
        CallbackCommand::MainMenu => "main_menu".to_string(),
    }
}

struct SlashCommand {
    name: String,
    tail: String,
}

impl SlashCommand {
    fn id_arg(&self, index: usize) -> Option<i64> {
        self.tail
            .split_whitespace()
            .nth(index)
            .and_then(|arg| arg.parse().ok())
    }

    /// First token as an id, the untouched rest as the value.
    fn id_and_value(&self) -> Option<(i64, String)> {
        let mut parts = self.tail.splitn(2, char::is_whitespace);
        let id = parts.next()?.parse().ok()?;
        let value = parts.next().unwrap_or("").trim().to_string();
        if value.is_empty() {
            return None;
        }
        Some((id, value))
    }
}

/// Lowercases the command name and strips a `@BotName` suffix, so commands
/// typed from a group-style autocomplete still match.
fn parse_slash(text: &str) -> Option<SlashCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let mut pieces = rest.splitn(2, char::is_whitespace);
    let head = pieces.next()?;
    let tail = pieces.next().unwrap_or("").trim().to_string();
    let name = head.split('@').next().unwrap_or("").to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some(SlashCommand { name, tail })
}

fn id_command(
    slash: &SlashCommand,
    make: fn(i64) -> AdminCommand,
    usage: &'static str,
) -> AdminParse {
    match slash.id_arg(0) {
        Some(id) => AdminParse::Command(make(id)),
        None => AdminParse::Usage(usage),
    }
}

fn value_command(
    slash: &SlashCommand,
    make: fn(i64, String) -> AdminCommand,
    usage: &'static str,
) -> AdminParse {
    match slash.id_and_value() {
        Some((task_id, value)) => AdminParse::Command(make(task_id, value)),
        None => AdminParse::Usage(usage),
    }
}
