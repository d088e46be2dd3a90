//! Telegram comms channel — receives messages via the Telegram API, sends
//! them to the agents and replies in the same chat. Outbound notifications
//! are relayed to every chat in `notify_chat_ids`.

use std::env;
use std::sync::Arc;

use teloxide::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{CommsEvent, CommsState};
use crate::config::TelegramConfig;
use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

/// Telegram has a 4096 character limit per message; chunk below it.
const MAX_MESSAGE_LENGTH: usize = 4000;

pub struct TelegramChannel {
    channel_id: String,
    config: TelegramConfig,
    state: Arc<CommsState>,
}

impl TelegramChannel {
    pub fn new(channel_id: impl Into<String>, config: TelegramConfig, state: Arc<CommsState>) -> Self {
        Self { channel_id: channel_id.into(), config, state }
    }
}

impl Component for TelegramChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_telegram(self.channel_id, self.config, self.state, shutdown))
    }
}

/// `true` when `chat_id` may talk to the bot. An empty allow-list admits all.
pub fn chat_allowed(allowed: &[i64], chat_id: i64) -> bool {
    allowed.is_empty() || allowed.contains(&chat_id)
}

/// A usable bot token, or `None` when it is unset or blank.
pub fn bot_token(raw: Option<String>) -> Option<String> {
    raw.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Split on char boundaries into pieces of at most `max` chars.
pub fn chunk_message(text: &str, max: usize) -> Vec<String> {
    if text.is_empty() {
        return vec!["(empty response)".to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max.max(1)).map(|c| c.iter().collect()).collect()
}

async fn send_chunked(bot: &Bot, chat: ChatId, text: &str) {
    for chunk in chunk_message(text, MAX_MESSAGE_LENGTH) {
        if let Err(e) = bot.send_message(chat, chunk).await {
            warn!(chat = chat.0, "failed to send telegram message: {e}");
        }
    }
}

async fn relay_notifications(bot: Bot, channel_id: String, targets: Vec<i64>, state: Arc<CommsState>, shutdown: CancellationToken) {
    let mut rx = state.subscribe();
    loop {
        let text = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            note = rx.recv() => match note {
                Ok(text) => text,
                Err(RecvError::Lagged(n)) => {
                    warn!(%channel_id, skipped = n, "telegram relay missed notifications");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        for chat in &targets {
            send_chunked(&bot, ChatId(*chat), &text).await;
        }
    }
    debug!(%channel_id, "telegram relay stopped");
}

async fn run_telegram(
    channel_id: String,
    config: TelegramConfig,
    state: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let Some(token) = bot_token(env::var("TELEGRAM_BOT_TOKEN").ok()) else {
        warn!(%channel_id, "TELEGRAM_BOT_TOKEN not set, telegram channel exiting");
        return Ok(());
    };

    info!(
        %channel_id,
        allowed = config.allowed_chat_ids.len(),
        notify = config.notify_chat_ids.len(),
        "telegram channel starting"
    );

    let bot = Bot::new(token);

    if config.notify_chat_ids.is_empty() {
        debug!(%channel_id, "no notify_chat_ids configured, notifications stay local");
    } else {
        tokio::spawn(relay_notifications(
            bot.clone(),
            channel_id.clone(),
            config.notify_chat_ids.clone(),
            state.clone(),
            shutdown.clone(),
        ));
    }

    let handler_state = state.clone();
    let handler_channel = channel_id.clone();
    let allowed = Arc::new(config.allowed_chat_ids.clone());

    let handler = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
        let state = handler_state.clone();
        let channel_id = handler_channel.clone();
        let allowed = allowed.clone();
        async move {
            let Some(text) = msg.text() else {
                return respond(());
            };
            if !chat_allowed(&allowed, msg.chat.id.0) {
                warn!(%channel_id, chat = msg.chat.id.0, "message from chat outside allowed_chat_ids ignored");
                state.report_event(CommsEvent::Rejected { channel_id, chat: msg.chat.id.0.to_string() });
                return respond(());
            }
            debug!(
                %channel_id,
                chat = msg.chat.id.0,
                from = ?msg.from.as_ref().and_then(|u| u.username.as_ref()),
                "telegram received message"
            );

            match state.send_message(&channel_id, text.to_string()).await {
                Ok(reply) => send_chunked(&bot, msg.chat.id, &reply).await,
                Err(e) => {
                    warn!(%channel_id, "send_message error: {e}");
                    let _ = bot.send_message(msg.chat.id, "Internal error processing message.").await;
                }
            }
            respond(())
        }
    });

    let mut dispatcher = Dispatcher::builder(bot, handler).build();

    tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            info!(%channel_id, "shutdown signal received — closing telegram channel");
        }
        _ = dispatcher.dispatch() => {
            warn!(%channel_id, "telegram dispatcher exited unexpectedly");
        }
    }

    state.report_event(CommsEvent::ChannelShutdown { channel_id });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list() {
        assert!(chat_allowed(&[], 42));
        assert!(chat_allowed(&[1, 42], 42));
        assert!(!chat_allowed(&[1], 42));
    }

    #[test]
    fn blank_or_missing_token_disables_the_channel() {
        assert_eq!(bot_token(None), None);
        assert_eq!(bot_token(Some(String::new())), None);
        assert_eq!(bot_token(Some("  \n".into())), None);
        assert_eq!(bot_token(Some(" 123:abc \n".into())).as_deref(), Some("123:abc"));
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        let text = "é".repeat(9);
        let chunks = chunk_message(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 4);
        assert_eq!(chunks[2].chars().count(), 1);
        assert_eq!(chunk_message("", 10), vec!["(empty response)"]);
    }
}
