//! Chat command and button handling, independent of the transport

pub mod telegram;

use crate::core::conversion::{RateService, normalize_code};
use crate::core::error::RateError;
use crate::core::rate::RateEntry;
use crate::core::session::{ConversationId, SessionState, SessionStore};
use serde::Serialize;
use tracing::{debug, warn};

pub const CONVERT_CALLBACK: &str = "convert_currency";
pub const SHOW_RATES_CALLBACK: &str = "show_rates";
pub const FROM_PREFIX: &str = "from_currency:";
pub const TO_PREFIX: &str = "to_currency:";

const KEYBOARD_COLUMNS: usize = 3;

const NO_RATES: &str = "Курсы валют не найдены.";
const HELP_TEXT: &str = "Команды:\n\
/start - Запуск бота и отображение меню\n\
/help - Помощь по командам\n\
/exchange <from_currency> <to_currency> <amount> - Конвертация валюты\n\
/rates - Показать курсы валют\n\n\
Пример:\n\
/exchange USD RUB 10 - Конвертировать 10 долларов в рубли";

/// Commands registered in the chat command menu, named without the slash.
pub const COMMANDS: [BotCommand; 4] = [
    BotCommand {
        command: "start",
        description: "Запустить бота",
    },
    BotCommand {
        command: "help",
        description: "Помощь",
    },
    BotCommand {
        command: "exchange",
        description: "Конвертировать валюту",
    },
    BotCommand {
        command: "rates",
        description: "Показать курсы валют",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BotCommand {
    pub command: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: &str, callback_data: &str) -> Self {
        Button {
            text: text.to_string(),
            callback_data: callback_data.to_string(),
        }
    }
}

/// Rows of inline buttons
pub type Keyboard = Vec<Vec<Button>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Reply {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Free text or a slash command
    Text(String),
    /// Data attached to a pressed inline button
    Callback(String),
}

/// Lays out currency buttons, `KEYBOARD_COLUMNS` per row, in the given order.
pub fn currency_keyboard(codes: &[String], prefix: &str) -> Keyboard {
    codes
        .chunks(KEYBOARD_COLUMNS)
        .map(|row| {
            row.iter()
                .map(|code| Button::new(code, &format!("{prefix}{code}")))
                .collect()
        })
        .collect()
}

pub fn format_rates(entries: &[RateEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}: {:.2}", entry.code, entry.value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits "/cmd@botname arg1 arg2" into the bare command and its arguments.
fn parse_command(text: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    let command = head.split('@').next().unwrap_or(head);
    Some((command, parts.collect()))
}

pub struct Bot {
    service: RateService,
    sessions: SessionStore,
}

impl Bot {
    pub fn new(service: RateService, sessions: SessionStore) -> Self {
        Self { service, sessions }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handles one user interaction. Failures become plain-text replies.
    pub async fn handle(&self, id: ConversationId, incoming: Incoming) -> Reply {
        debug!(?id, ?incoming, "Handling interaction");
        match incoming {
            Incoming::Text(text) => self.handle_text(id, &text).await,
            Incoming::Callback(data) => self.handle_callback(id, &data).await,
        }
    }

    async fn handle_text(&self, id: ConversationId, text: &str) -> Reply {
        if let Some((command, args)) = parse_command(text) {
            self.sessions.clear(id).await;
            return self.handle_command(command, &args).await;
        }

        match self.sessions.get(id).await {
            SessionState::AwaitingAmount { from, to } => {
                match self.service.convert_text(&from, &to, text).await {
                    Ok(conversion) => {
                        self.sessions.clear(id).await;
                        Reply::text(conversion.to_string())
                    }
                    // Let the user retype the amount
                    Err(e @ RateError::InvalidAmount(_)) => Reply::text(e.user_message()),
                    Err(e) => {
                        self.sessions.clear(id).await;
                        error_reply(&e)
                    }
                }
            }
            _ => Reply::text("Используйте /start для меню или /help для списка команд."),
        }
    }

    async fn handle_command(&self, command: &str, args: &[&str]) -> Reply {
        match command {
            "start" => Reply::with_keyboard(
                "Добро пожаловать! Выберите опцию ниже:",
                vec![
                    vec![Button::new("Конвертировать валюту", CONVERT_CALLBACK)],
                    vec![Button::new("Показать курсы валют", SHOW_RATES_CALLBACK)],
                ],
            ),
            "help" => Reply::text(HELP_TEXT),
            "exchange" => self.exchange(args).await,
            "rates" => self.rates().await,
            _ => Reply::text("Неизвестная команда. Используйте /help для списка команд."),
        }
    }

    async fn exchange(&self, args: &[&str]) -> Reply {
        let [from, to, amount] = args else {
            return Reply::text(
                "Ошибка: Неверный формат команды. Использование: /exchange <from_currency> <to_currency> <amount>",
            );
        };
        match self.service.convert_text(from, to, amount).await {
            Ok(conversion) => Reply::text(conversion.to_string()),
            Err(e) => error_reply(&e),
        }
    }

    async fn rates(&self) -> Reply {
        match self.service.list_rates().await {
            Ok(Some(entries)) => Reply::text(format_rates(&entries)),
            Ok(None) => Reply::text(NO_RATES),
            Err(e) => error_reply(&e),
        }
    }

    async fn handle_callback(&self, id: ConversationId, data: &str) -> Reply {
        if data == CONVERT_CALLBACK {
            self.sessions.clear(id).await;
            return self
                .currency_choice("Выберите валюту, которую хотите конвертировать:", FROM_PREFIX)
                .await;
        }
        if data == SHOW_RATES_CALLBACK {
            return self.rates().await;
        }
        if let Some(code) = data.strip_prefix(FROM_PREFIX) {
            let from = normalize_code(code);
            let state = self.sessions.get(id).await.pick_from(from.clone());
            self.sessions.set(id, state).await;
            return self
                .currency_choice(
                    &format!("Вы выбрали {from}. Теперь выберите валюту для конвертации:"),
                    TO_PREFIX,
                )
                .await;
        }
        if let Some(code) = data.strip_prefix(TO_PREFIX) {
            let to = normalize_code(code);
            return match self.sessions.get(id).await.pick_to(to.clone()) {
                Some(state) => {
                    let reply = match &state {
                        SessionState::AwaitingAmount { from, .. } => Reply::text(format!(
                            "Вы выбрали {to}. Введите количество {from} для конвертации в {to}:"
                        )),
                        _ => Reply::text(format!("Вы выбрали {to}.")),
                    };
                    self.sessions.set(id, state).await;
                    reply
                }
                None => {
                    self.sessions.clear(id).await;
                    Reply::text(
                        "Сначала выберите исходную валюту. Нажмите /start, чтобы начать заново.",
                    )
                }
            };
        }

        warn!(data, "Unknown callback data");
        Reply::text("Неизвестное действие. Используйте /start для меню.")
    }

    async fn currency_choice(&self, prompt: &str, prefix: &str) -> Reply {
        match self.service.currencies().await {
            Ok(codes) if codes.is_empty() => Reply::text(NO_RATES),
            Ok(codes) => Reply::with_keyboard(prompt, currency_keyboard(&codes, prefix)),
            Err(e) => error_reply(&e),
        }
    }
}

fn error_reply(err: &RateError) -> Reply {
    if matches!(err, RateError::StoreUnavailable(_)) {
        warn!(error = %err, "Rate store read failed");
    }
    Reply::text(err.user_message())
}
