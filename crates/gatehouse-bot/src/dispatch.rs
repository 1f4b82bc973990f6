use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, warn};

use gatehouse_core::GateError;
use gatehouse_core::verify::{self, MembershipOracle, RecheckOutcome, VerifyOutcome};
use gatehouse_core::quota;
use gatehouse_db::Database;

use crate::client::{BotClient, CallbackQuery, Message, PlatformUser, Update};

/// Bot-side configuration shared by the dispatch and sweep loops.
#[derive(Clone)]
pub struct BotConfig {
    /// The gated channel, '@'-prefixed.
    pub channel: String,
}

/// Long-poll loop over the platform's update feed. A failing poll backs off
/// and retries; a failing update is logged and skipped, never fatal.
pub async fn run_update_loop(client: BotClient, db: Arc<Database>, config: BotConfig) {
    let mut offset = 0i64;

    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("getUpdates failed: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Err(e) = handle_update(&client, &db, &config, update).await {
                error!("Update handling failed: {}", e);
            }
        }
    }
}

async fn handle_update(
    client: &BotClient,
    db: &Arc<Database>,
    config: &BotConfig,
    update: Update,
) -> Result<()> {
    if let Some(message) = update.message {
        return handle_message(client, db, config, message).await;
    }
    if let Some(callback) = update.callback_query {
        return handle_callback(client, db, config, callback).await;
    }
    Ok(())
}

/// Splits "/cmd arg" into the trimmed argument when `text` invokes `cmd`.
fn command_arg<'a>(text: &'a str, cmd: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(cmd)?;
    if rest.is_empty() {
        Some("")
    } else if rest.starts_with(' ') {
        Some(rest.trim())
    } else {
        None
    }
}

/// "verify_<token>" deep-link payload → the token.
fn parse_start_payload(payload: &str) -> Option<&str> {
    let token = payload.strip_prefix("verify_")?;
    if token.is_empty() { None } else { Some(token) }
}

async fn handle_message(
    client: &BotClient,
    db: &Arc<Database>,
    config: &BotConfig,
    message: Message,
) -> Result<()> {
    let Some(text) = message.text.as_deref() else {
        return Ok(());
    };
    let Some(from) = message.from.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat.id;

    if let Some(payload) = command_arg(text, "/start") {
        match parse_start_payload(payload) {
            Some(token) => {
                return handle_verification(client, db, config, chat_id, from.id, token).await;
            }
            None => {
                return client
                    .send_message(chat_id, "Use /start verify_TOKEN to confirm your subscription.")
                    .await;
            }
        }
    }

    if let Some(arg) = command_arg(text, "/subscribe") {
        return handle_subscribe(client, db, config, chat_id, from, arg).await;
    }

    Ok(())
}

async fn handle_verification(
    client: &BotClient,
    db: &Arc<Database>,
    config: &BotConfig,
    chat_id: i64,
    platform_id: i64,
    token: &str,
) -> Result<()> {
    let reply = match verify::confirm_with_token(
        db,
        client,
        &config.channel,
        token,
        platform_id,
        Utc::now(),
    )
    .await
    {
        Ok(VerifyOutcome::Verified { .. }) => {
            "Subscription confirmed! You now have access to the platform.".to_string()
        }
        Ok(VerifyOutcome::NotAMember) => format!("Join {} and try again!", config.channel),
        Err(GateError::InvalidToken) => "Invalid or expired token.".to_string(),
        Err(GateError::OracleUnknown) => "Verification failed. Try again later.".to_string(),
        Err(e) => return Err(e.into()),
    };

    client.send_message(chat_id, &reply).await
}

async fn handle_subscribe(
    client: &BotClient,
    db: &Arc<Database>,
    config: &BotConfig,
    chat_id: i64,
    from: &PlatformUser,
    arg: &str,
) -> Result<()> {
    if arg.is_empty() {
        return client
            .send_message(chat_id, "Specify a channel: /subscribe @channel")
            .await;
    }

    let Some(username) = from.username.as_deref() else {
        return client
            .send_message(chat_id, "Set a username on your account first.")
            .await;
    };
    let handle = format!("@{}", username);

    let reply = {
        let db = db.clone();
        let handle = handle.clone();
        let channel = arg.to_string();
        match tokio::task::spawn_blocking(move || {
            quota::register_subscription(&db, &handle, &channel, Utc::now())
        })
        .await?
        {
            Ok(_) => format!("Subscribed to {}!", arg),
            Err(GateError::InvalidInput(_)) => "Specify a channel: /subscribe @channel".to_string(),
            Err(GateError::NoAccess) => format!("Join {} to get access!", config.channel),
            Err(GateError::QuotaExceeded) => "Subscription limit reached!".to_string(),
            Err(e) => return Err(e.into()),
        }
    };

    client.send_message(chat_id, &reply).await
}

async fn handle_callback(
    client: &BotClient,
    db: &Arc<Database>,
    config: &BotConfig,
    callback: CallbackQuery,
) -> Result<()> {
    if let Err(e) = client.answer_callback(&callback.id).await {
        warn!("answerCallbackQuery failed: {}", e);
    }

    let Some(user_id) = callback.data.as_deref().and_then(|d| d.strip_prefix("recheck_")) else {
        return Ok(());
    };
    let Some(message) = callback.message else {
        return Ok(());
    };
    let chat_id = message.chat.id;
    let message_id = message.message_id;

    let user = {
        let db = db.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || db.get_user_by_id(&user_id)).await??
    };
    let Some(user) = user else {
        return client.edit_message_text(chat_id, message_id, "Unknown user.").await;
    };

    // The prompt must be answered by the account it was issued to
    let is_owner = match user.platform_id {
        Some(platform_id) => platform_id == callback.from.id,
        None => {
            let claimed = callback.from.username.as_deref().map(|u| format!("@{}", u));
            claimed.as_deref() == Some(user.handle.as_str())
        }
    };
    if !is_owner {
        return client
            .edit_message_text(chat_id, message_id, "This prompt is not for this account.")
            .await;
    }

    let membership = client.member_of(&config.channel, callback.from.id).await;
    let outcome = {
        let db = db.clone();
        let user_id = user.id.clone();
        tokio::task::spawn_blocking(move || {
            verify::apply_recheck(&db, &user_id, membership, Utc::now())
        })
        .await??
    };

    let text = match outcome {
        RecheckOutcome::Confirmed => "Membership confirmed. Access retained.".to_string(),
        RecheckOutcome::Revoked => {
            format!("You left {}. Register again to restore access.", config.channel)
        }
        RecheckOutcome::Indeterminate => "Verification failed. Try again later.".to_string(),
    };
    client.edit_message_text(chat_id, message_id, &text).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_arg_splits_commands() {
        assert_eq!(command_arg("/start", "/start"), Some(""));
        assert_eq!(command_arg("/start verify_abc", "/start"), Some("verify_abc"));
        assert_eq!(command_arg("/subscribe @some_news", "/subscribe"), Some("@some_news"));
        assert_eq!(command_arg("/subscribe   @some_news  ", "/subscribe"), Some("@some_news"));
    }

    #[test]
    fn command_arg_rejects_other_commands() {
        assert_eq!(command_arg("/started", "/start"), None);
        assert_eq!(command_arg("/help", "/start"), None);
        assert_eq!(command_arg("hello", "/subscribe"), None);
    }

    #[test]
    fn start_payload_requires_verify_prefix() {
        assert_eq!(parse_start_payload("verify_abc123"), Some("abc123"));
        assert_eq!(parse_start_payload("verify_"), None);
        assert_eq!(parse_start_payload("abc123"), None);
        assert_eq!(parse_start_payload(""), None);
    }
}
