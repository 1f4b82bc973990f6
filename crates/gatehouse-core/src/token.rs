use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

/// Entropy of a verification token. 16 random bytes keeps guessing
/// infeasible and the deep link short.
const TOKEN_BYTES: usize = 16;

/// Tokens are consumable for 24 hours from issue.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// URL-safe random token for a verification deep link.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Oldest `created_at` still consumable at `now`.
pub fn cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(TOKEN_TTL_HOURS)
}

/// Deep link the user follows to start the bot verification flow.
pub fn deep_link(bot_username: &str, token: &str) -> String {
    format!("https://t.me/{}?start=verify_{}", bot_username, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe() {
        for _ in 0..64 {
            let token = generate_token();
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
            assert!(token.len() >= 20);
        }
    }

    #[test]
    fn tokens_do_not_repeat() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn deep_link_embeds_token() {
        let link = deep_link("GatehouseBot", "abc123");
        assert_eq!(link, "https://t.me/GatehouseBot?start=verify_abc123");
    }
}
