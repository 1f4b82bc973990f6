use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use gatehouse_core::verify::MembershipOracle;
use gatehouse_types::membership::{MemberStatus, Membership};

/// Bound on the membership query so a slow platform cannot stall a sweep.
const ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-poll duration for getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

// -- Wire types --

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
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
    pub message_id: i64,
    pub from: Option<PlatformUser>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlatformUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: PlatformUser,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMemberInfo {
    status: MemberStatus,
}

/// Thin client over the platform's bot HTTP API.
#[derive(Clone)]
pub struct BotClient {
    http: reqwest::Client,
    base: String,
}

impl BotClient {
    pub fn new(bot_token: &str) -> Result<Self> {
        // Default timeout must sit above the long-poll window
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            http,
            base: format!("https://api.telegram.org/bot{}", bot_token),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let envelope: ApiEnvelope<T> = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !envelope.ok {
            return Err(anyhow!(
                "{} failed: {}",
                method,
                envelope.description.unwrap_or_else(|| "no description".into())
            ));
        }
        envelope
            .result
            .ok_or_else(|| anyhow!("{} returned no result", method))
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({ "offset": offset, "timeout": POLL_TIMEOUT_SECS }),
        )
        .await
    }

    /// Membership status for a (channel, user) pair. `Ok(None)` is the
    /// platform's definitive "never seen here" answer, distinct from a
    /// transport failure.
    pub async fn get_chat_member(&self, channel: &str, user_id: i64) -> Result<Option<MemberStatus>> {
        let envelope: ApiEnvelope<ChatMemberInfo> = self
            .http
            .post(format!("{}/getChatMember", self.base))
            .json(&json!({ "chat_id": channel, "user_id": user_id }))
            .timeout(ORACLE_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        if envelope.ok {
            return Ok(envelope.result.map(|m| m.status));
        }

        let description = envelope.description.unwrap_or_default();
        if description.to_lowercase().contains("not found") {
            return Ok(None);
        }
        Err(anyhow!("getChatMember failed: {}", description))
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let _: Message = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }

    /// Send a prompt with a single inline confirm button.
    pub async fn send_confirm_prompt(
        &self,
        chat_id: i64,
        text: &str,
        button_text: &str,
        callback_data: &str,
    ) -> Result<()> {
        let _: Message = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "reply_markup": {
                        "inline_keyboard": [[{ "text": button_text, "callback_data": callback_data }]]
                    }
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    pub async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "answerCallbackQuery",
                json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }
}

impl MembershipOracle for BotClient {
    /// Status strings map into the closed enum exactly once, here. A
    /// transport failure is `Unknown`, never a denial.
    async fn member_of(&self, channel: &str, platform_id: i64) -> Membership {
        match self.get_chat_member(channel, platform_id).await {
            Ok(Some(status)) => Membership::from(status),
            Ok(None) => Membership::NotMember,
            Err(e) => {
                warn!("Membership query for {} failed: {}", platform_id, e);
                Membership::Unknown
            }
        }
    }
}
