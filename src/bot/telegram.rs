use super::{Bot, BotCommand, Incoming, Reply};
use crate::core::session::ConversationId;
use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Seconds a single `getUpdates` call may wait for new updates
pub const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Minimal client for the Telegram Bot HTTP API.
pub struct TelegramClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// An update reduced to what the bot handles.
#[derive(Debug, PartialEq, Eq)]
pub struct Interaction {
    pub conversation: ConversationId,
    pub incoming: Incoming,
    pub callback_id: Option<String>,
}

impl Update {
    pub fn into_interaction(self) -> Option<Interaction> {
        if let Some(query) = self.callback_query {
            let chat_id = query.message.as_ref()?.chat.id;
            return Some(Interaction {
                conversation: ConversationId {
                    chat_id,
                    user_id: query.from.id,
                },
                incoming: Incoming::Callback(query.data?),
                callback_id: Some(query.id),
            });
        }

        let message = self.message?;
        let text = message.text?;
        let user_id = message.from.map_or(message.chat.id, |user| user.id);
        Some(Interaction {
            conversation: ConversationId {
                chat_id: message.chat.id,
                user_id,
            },
            incoming: Incoming::Text(text),
            callback_id: None,
        })
    }
}

impl TelegramClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("rates-bot/1.0")
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(TelegramClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn call<T: DeserializeOwned>(&self, api_method: &str, body: Value) -> Result<T> {
        // The token is part of the URL, keep it out of errors and logs
        let url = format!("{}/bot{}/{}", self.base_url, self.token, api_method);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Request error for {}: {}", api_method, e.without_url()))?;

        let status = response.status();
        let data: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse {} response ({}): {}", api_method, status, e.without_url()))?;

        if !data.ok {
            return Err(anyhow!(
                "{} failed: {}",
                api_method,
                data.description.unwrap_or_else(|| status.to_string())
            ));
        }
        data.result
            .ok_or_else(|| anyhow!("{} returned no result", api_method))
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_reply(&self, chat_id: i64, reply: &Reply) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id, "text": reply.text });
        if let Some(keyboard) = &reply.keyboard {
            body["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }
        self.call::<Value>("sendMessage", body).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        self.call::<bool>(
            "answerCallbackQuery",
            json!({ "callback_query_id": callback_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<()> {
        self.call::<bool>("setMyCommands", json!({ "commands": commands }))
            .await?;
        Ok(())
    }
}

/// Handles one update end to end: bot logic, callback acknowledgement, reply.
pub async fn process_update(client: &TelegramClient, bot: &Bot, update: Update) {
    let update_id = update.update_id;
    match update.into_interaction() {
        Some(interaction) => process_interaction(client, bot, interaction).await,
        None => debug!(update_id, "Ignoring update without text or callback data"),
    }
}

async fn process_interaction(client: &TelegramClient, bot: &Bot, interaction: Interaction) {
    if let Some(callback_id) = &interaction.callback_id {
        if let Err(e) = client.answer_callback_query(callback_id).await {
            warn!(%callback_id, error = %e, "Failed to answer callback query");
        }
    }

    let chat_id = interaction.conversation.chat_id;
    let reply = bot
        .handle(interaction.conversation, interaction.incoming)
        .await;
    if let Err(e) = client.send_reply(chat_id, &reply).await {
        error!(chat_id, error = %e, "Failed to send reply");
    }
}

/// Runs tasks concurrently across conversations while keeping the tasks of
/// one conversation in arrival order.
#[derive(Default)]
pub struct ConversationQueue {
    tails: HashMap<ConversationId, JoinHandle<()>>,
}

impl ConversationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` to run once every earlier task of `id` has finished.
    pub fn dispatch<F>(&mut self, id: ConversationId, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tails.retain(|_, handle| !handle.is_finished());
        let previous = self.tails.remove(&id);
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                // A panicked predecessor still releases the conversation
                if let Err(e) = previous.await {
                    error!(?id, error = %e, "Previous update task failed");
                }
            }
            task.await;
        });
        self.tails.insert(id, handle);
    }

    /// Conversations with a task still queued or running.
    pub fn pending(&self) -> usize {
        self.tails
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Waits for every dispatched task.
    pub async fn drain(&mut self) {
        for (id, handle) in self.tails.drain() {
            if let Err(e) = handle.await {
                error!(?id, error = %e, "Update task failed");
            }
        }
    }
}

/// Long-polls for updates forever. Different conversations are handled in
/// parallel, updates of one conversation strictly one after another.
pub async fn run_polling(client: Arc<TelegramClient>, bot: Arc<Bot>) -> Result<()> {
    info!("Polling for chat updates");
    let mut offset = 0;
    let mut queue = ConversationQueue::new();
    loop {
        let updates = match client.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Polling failed, retrying in {:?}", RETRY_DELAY);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let update_id = update.update_id;
            let Some(interaction) = update.into_interaction() else {
                debug!(update_id, "Ignoring update without text or callback data");
                continue;
            };
            let client = Arc::clone(&client);
            let bot = Arc::clone(&bot);
            queue.dispatch(interaction.conversation, async move {
                process_interaction(&client, &bot, interaction).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::COMMANDS;
    use crate::core::conversion::RateService;
    use crate::core::session::{SessionState, SessionStore};
    use crate::store::memory::MemoryRateStore;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:TEST";

    fn sample_bot() -> Bot {
        let store = MemoryRateStore::with_rates([("RUB", 1.0), ("USD", 90.0), ("EUR", 100.0)]);
        Bot::new(RateService::new(Arc::new(store)), SessionStore::new())
    }

    fn ok_response(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": result }))
    }

    fn parse_update(value: Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_message_update_to_interaction() {
        let update = parse_update(json!({
            "update_id": 7,
            "message": {
                "message_id": 1,
                "chat": { "id": 42, "type": "private" },
                "from": { "id": 5, "is_bot": false, "first_name": "A" },
                "text": "/rates"
            }
        }));
        let interaction = update.into_interaction().unwrap();
        assert_eq!(
            interaction.conversation,
            ConversationId {
                chat_id: 42,
                user_id: 5
            }
        );
        assert_eq!(interaction.incoming, Incoming::Text("/rates".to_string()));
        assert!(interaction.callback_id.is_none());
    }

    #[test]
    fn test_callback_update_to_interaction() {
        let update = parse_update(json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 5, "is_bot": false, "first_name": "A" },
                "message": { "message_id": 2, "chat": { "id": 42, "type": "private" } },
                "data": "from_currency:USD"
            }
        }));
        let interaction = update.into_interaction().unwrap();
        assert_eq!(interaction.conversation.chat_id, 42);
        assert_eq!(
            interaction.incoming,
            Incoming::Callback("from_currency:USD".to_string())
        );
        assert_eq!(interaction.callback_id.as_deref(), Some("cb-1"));
    }

    #[test]
    fn test_update_without_text_is_ignored() {
        let update = parse_update(json!({
            "update_id": 9,
            "message": { "message_id": 3, "chat": { "id": 42, "type": "private" } }
        }));
        assert!(update.into_interaction().is_none());
    }

    #[tokio::test]
    async fn test_process_update_sends_reply() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendMessage")))
            .and(body_partial_json(json!({
                "chat_id": 42,
                "text": "10 USD = 9.00 EUR"
            })))
            .respond_with(ok_response(json!({ "message_id": 10 })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = TelegramClient::new(&mock_server.uri(), TOKEN).unwrap();
        let update = parse_update(json!({
            "update_id": 1,
            "message": {
                "chat": { "id": 42 },
                "from": { "id": 5 },
                "text": "/exchange USD EUR 10"
            }
        }));

        process_update(&client, &sample_bot(), update).await;
    }

    #[tokio::test]
    async fn test_process_callback_answers_and_sends_keyboard() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/answerCallbackQuery")))
            .and(body_partial_json(json!({ "callback_query_id": "cb-1" })))
            .respond_with(ok_response(json!(true)))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendMessage")))
            .and(body_partial_json(json!({
                "chat_id": 42,
                "reply_markup": {
                    "inline_keyboard": [[
                        { "text": "EUR", "callback_data": "from_currency:EUR" },
                        { "text": "RUB", "callback_data": "from_currency:RUB" },
                        { "text": "USD", "callback_data": "from_currency:USD" }
                    ]]
                }
            })))
            .respond_with(ok_response(json!({ "message_id": 11 })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = TelegramClient::new(&mock_server.uri(), TOKEN).unwrap();
        let update = parse_update(json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 5 },
                "message": { "chat": { "id": 42 } },
                "data": "convert_currency"
            }
        }));

        process_update(&client, &sample_bot(), update).await;
    }

    #[tokio::test]
    async fn test_get_updates_and_set_commands() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getUpdates")))
            .and(body_partial_json(json!({ "offset": 5, "timeout": 0 })))
            .respond_with(ok_response(json!([
                { "update_id": 5, "message": { "chat": { "id": 1 }, "text": "hi" } }
            ])))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/setMyCommands")))
            .and(body_partial_json(json!({
                "commands": [{ "command": "start", "description": "Запустить бота" }]
            })))
            .respond_with(ok_response(json!(true)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = TelegramClient::new(&mock_server.uri(), TOKEN).unwrap();
        let updates = client.get_updates(5, 0).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 5);

        client.set_my_commands(&COMMANDS[..1]).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queue_keeps_conversation_order() {
        let bot = Arc::new(sample_bot());
        let replies = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut queue = ConversationQueue::new();

        for user_id in 0..200 {
            let id = ConversationId {
                chat_id: 42,
                user_id,
            };
            let (first_bot, first_replies) = (Arc::clone(&bot), Arc::clone(&replies));
            queue.dispatch(id, async move {
                // The earlier update is the slower one
                tokio::time::sleep(Duration::from_millis(5)).await;
                let reply = first_bot
                    .handle(id, Incoming::Callback("from_currency:USD".to_string()))
                    .await;
                first_replies.lock().unwrap().push(reply.text);
            });
            let (second_bot, second_replies) = (Arc::clone(&bot), Arc::clone(&replies));
            queue.dispatch(id, async move {
                let reply = second_bot
                    .handle(id, Incoming::Callback("to_currency:EUR".to_string()))
                    .await;
                second_replies.lock().unwrap().push(reply.text);
            });
        }
        queue.drain().await;
        assert_eq!(queue.pending(), 0);

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 400);
        assert!(replies.iter().all(|text| !text.starts_with("Сначала")));
        for user_id in 0..200 {
            let id = ConversationId {
                chat_id: 42,
                user_id,
            };
            assert_eq!(
                bot.sessions().get(id).await,
                SessionState::AwaitingAmount {
                    from: "USD".to_string(),
                    to: "EUR".to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_queue_runs_conversations_in_parallel() {
        let mut queue = ConversationQueue::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let alice = ConversationId {
            chat_id: 1,
            user_id: 1,
        };
        let bob = ConversationId {
            chat_id: 1,
            user_id: 2,
        };

        // Alice's task waits on Bob's, which only works if Bob is not queued behind her
        queue.dispatch(alice, async move {
            rx.await.unwrap();
        });
        queue.dispatch(bob, async move {
            tx.send(()).unwrap();
        });
        tokio::time::timeout(Duration::from_secs(5), queue.drain())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "ok": false,
                "error_code": 401,
                "description": "Unauthorized"
            })))
            .mount(&mock_server)
            .await;

        let client = TelegramClient::new(&mock_server.uri(), TOKEN).unwrap();
        let err = client.get_updates(0, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "getUpdates failed: Unauthorized");
        assert!(!err.to_string().contains(TOKEN));
    }
}
