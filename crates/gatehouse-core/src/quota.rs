use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use gatehouse_db::models::UserRow;
use gatehouse_db::queries::SubscriptionInsert;
use gatehouse_db::{Database, parse_ts};

use crate::GateError;
use crate::registration::validate_handle;

/// Rolling window over which subscription registrations are counted.
pub const WINDOW_HOURS: i64 = 24;

pub const BASE_LIMIT: u32 = 1000;
pub const PREMIUM_LIMIT: u32 = 2000;

/// Premium raises the cap while it lasts; an expired premium flag falls
/// back to the base tier.
pub fn subscription_limit(user: &UserRow, now: DateTime<Utc>) -> u32 {
    if !user.premium {
        return BASE_LIMIT;
    }
    match user.premium_expires_at.as_deref() {
        None => PREMIUM_LIMIT,
        Some(raw) => match parse_ts(raw) {
            Ok(expiry) if expiry > now => PREMIUM_LIMIT,
            Ok(_) => BASE_LIMIT,
            Err(e) => {
                warn!("Corrupt premium expiry for {}: {}", user.handle, e);
                BASE_LIMIT
            }
        },
    }
}

/// Register one channel subscription against the caller's rolling quota.
/// Returns the usage inside the window after recording.
pub fn register_subscription(
    db: &Database,
    handle: &str,
    channel: &str,
    now: DateTime<Utc>,
) -> Result<u32, GateError> {
    validate_handle(channel)
        .map_err(|_| GateError::InvalidInput(format!("Invalid channel: {channel}")))?;

    let Some(user) = db.get_user_by_handle(handle)? else {
        return Err(GateError::NoAccess);
    };
    if !user.verified || user.revoked {
        return Err(GateError::NoAccess);
    }

    let limit = subscription_limit(&user, now);
    let window_start = now - Duration::hours(WINDOW_HOURS);
    let sub_id = Uuid::new_v4().to_string();

    match db.register_subscription(&sub_id, &user.id, channel, limit, window_start, now)? {
        SubscriptionInsert::Recorded { used_in_window } => Ok(used_in_window),
        SubscriptionInsert::QuotaExceeded { .. } => Err(GateError::QuotaExceeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gatehouse_db::format_ts;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn user(premium: bool, premium_expires_at: Option<String>) -> UserRow {
        UserRow {
            id: "u1".into(),
            handle: "@alice_dev".into(),
            platform_id: Some(501),
            verified: true,
            revoked: false,
            premium,
            premium_expires_at,
            last_checked_at: None,
            created_at: format_ts(t0()),
        }
    }

    #[test]
    fn base_tier_limit() {
        assert_eq!(subscription_limit(&user(false, None), t0()), BASE_LIMIT);
    }

    #[test]
    fn premium_tier_limit() {
        assert_eq!(subscription_limit(&user(true, None), t0()), PREMIUM_LIMIT);

        let future = format_ts(t0() + Duration::days(30));
        assert_eq!(subscription_limit(&user(true, Some(future)), t0()), PREMIUM_LIMIT);
    }

    #[test]
    fn expired_premium_falls_back_to_base_tier() {
        let past = format_ts(t0() - Duration::days(1));
        assert_eq!(subscription_limit(&user(true, Some(past)), t0()), BASE_LIMIT);
    }

    #[test]
    fn corrupt_premium_expiry_falls_back_to_base_tier() {
        assert_eq!(
            subscription_limit(&user(true, Some("not a date".into())), t0()),
            BASE_LIMIT
        );
    }
}
