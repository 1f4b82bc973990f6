use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use gatehouse_db::Database;

use crate::client::BotClient;
use crate::dispatch::BotConfig;

/// Background task that prompts every verified user to re-confirm channel
/// membership.
///
/// Runs on an interval; the oracle check itself happens when the user taps
/// the confirm button. Failures are isolated per user: one bad send never
/// aborts the rest of the sweep.
pub async fn run_recheck_loop(
    db: Arc<Database>,
    client: BotClient,
    config: BotConfig,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    // The first tick fires immediately; swallow it so a restart does not
    // re-prompt everyone ahead of schedule.
    interval.tick().await;

    loop {
        interval.tick().await;

        match send_prompts(&db, &client, &config).await {
            Ok(count) => {
                if count > 0 {
                    info!("Recheck sweep: prompted {} verified users", count);
                }
            }
            Err(e) => {
                warn!("Recheck sweep error: {}", e);
            }
        }
    }
}

async fn send_prompts(
    db: &Arc<Database>,
    client: &BotClient,
    config: &BotConfig,
) -> anyhow::Result<usize> {
    let users = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || db.list_verified_users()).await??
    };

    let mut prompted = 0;
    for user in users {
        let Some(chat_id) = user.platform_id else {
            warn!("No platform id for {}; skipping recheck prompt", user.handle);
            continue;
        };

        let text = format!("Confirm your membership in {} to keep access!", config.channel);
        let callback_data = format!("recheck_{}", user.id);
        if let Err(e) = client
            .send_confirm_prompt(chat_id, &text, "Confirm", &callback_data)
            .await
        {
            warn!("Recheck prompt to {} failed: {}", user.handle, e);
            continue;
        }
        prompted += 1;
    }

    Ok(prompted)
}
