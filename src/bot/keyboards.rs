use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, ReplyMarkup,
};

use crate::domain::event::CallbackCommand;
use crate::engine::reply::Keyboard;

use super::commands;

// Button labels double as command text: pressing a reply-keyboard button
// sends the label back, and the parser maps it to a menu command.
pub const BTN_REGISTER: &str = "📝 Зарегистрироваться";
pub const BTN_RULES: &str = "📋 Правила игры";
pub const BTN_INSTRUCTIONS: &str = "📖 Инструкция";
pub const BTN_SUBMIT: &str = "📤 Отправить задание на проверку";
pub const BTN_TASK_BANK: &str = "📚 Банк заданий";
pub const BTN_RESULTS: &str = "📊 Мой результат";
pub const BTN_EDIT_PROFILE: &str = "✏️ Редактировать профиль";
pub const BTN_EDIT_FIRST_NAME: &str = "✏️ Изменить имя";
pub const BTN_EDIT_LAST_NAME: &str = "✏️ Изменить фамилию";
pub const BTN_SUPPORT: &str = "💬 Поддержка";
pub const BTN_ABOUT: &str = "ℹ️ О движении";
pub const BTN_MAIN_MENU: &str = "🔙 Главное меню";
pub const BTN_INDIVIDUAL: &str = "👤 Индивидуальное участие";
pub const BTN_FAMILY: &str = "👨‍👩‍👧‍👦 Семейное участие";

/// Turns the engine's keyboard descriptor into Telegram markup.
pub fn render(keyboard: &Keyboard) -> ReplyMarkup {
    match keyboard {
        Keyboard::MainMenu => reply_rows(vec![
            vec![BTN_SUBMIT],
            vec![BTN_TASK_BANK, BTN_RESULTS],
            vec![BTN_RULES, BTN_INSTRUCTIONS],
            vec![BTN_EDIT_PROFILE, BTN_SUPPORT],
            vec![BTN_ABOUT],
        ]),
        Keyboard::Register => reply_rows(vec![
            vec![BTN_REGISTER],
            vec![BTN_RULES, BTN_ABOUT],
        ]),
        Keyboard::Participation => reply_rows(vec![
            vec![BTN_INDIVIDUAL],
            vec![BTN_FAMILY],
            vec![BTN_MAIN_MENU],
        ]),
        Keyboard::EditProfile => reply_rows(vec![
            vec![BTN_EDIT_FIRST_NAME, BTN_EDIT_LAST_NAME],
            vec![BTN_MAIN_MENU],
        ]),
        Keyboard::BackToMain => reply_rows(vec![vec![BTN_MAIN_MENU]]),
        Keyboard::TaskPicker(buttons) => {
            let mut rows: Vec<Vec<InlineKeyboardButton>> = buttons
                .iter()
                .map(|button| {
                    vec![InlineKeyboardButton::callback(
                        format!("#{} {}", button.task_id, button.title),
                        commands::callback_data(CallbackCommand::SubmitTask(button.task_id)),
                    )]
                })
                .collect();
            rows.push(vec![InlineKeyboardButton::callback(
                BTN_MAIN_MENU.to_string(),
                commands::callback_data(CallbackCommand::MainMenu),
            )]);
            ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows))
        }
    }
}

fn reply_rows(rows: Vec<Vec<&str>>) -> ReplyMarkup {
    let keyboard: Vec<Vec<KeyboardButton>> = rows
        .into_iter()
        .map(|row| row.into_iter().map(KeyboardButton::new).collect())
        .collect();
    ReplyMarkup::Keyboard(KeyboardMarkup::new(keyboard).resize_keyboard(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reply::TaskButton;

    #[test]
    fn menus_render_as_reply_keyboards() {
        assert!(matches!(
            render(&Keyboard::MainMenu),
            ReplyMarkup::Keyboard(_)
        ));
        assert!(matches!(
            render(&Keyboard::Participation),
            ReplyMarkup::Keyboard(_)
        ));
    }

    #[test]
    fn task_picker_renders_one_button_per_task_plus_menu() {
        let rendered = render(&Keyboard::TaskPicker(vec![
            TaskButton {
                task_id: 1,
                title: "Посади дерево".to_string(),
            },
            TaskButton {
                task_id: 2,
                title: "Собери макулатуру".to_string(),
            },
        ]));
        let ReplyMarkup::InlineKeyboard(markup) = rendered else {
            panic!("expected an inline keyboard");
        };
        assert_eq!(markup.inline_keyboard.len(), 3);
    }
}
