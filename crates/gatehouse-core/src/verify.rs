use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use gatehouse_db::Database;
use gatehouse_types::membership::Membership;

use crate::GateError;
use crate::token::cutoff;

/// Asks the platform whether a user currently belongs to a channel.
/// Implementations must answer `Unknown` on transport failure; `Unknown` is
/// never a denial.
pub trait MembershipOracle {
    fn member_of(
        &self,
        channel: &str,
        platform_id: i64,
    ) -> impl Future<Output = Membership> + Send;
}

#[derive(Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Token consumed, membership confirmed, access granted.
    Verified { user_id: String },
    /// Confirmed non-member. The token stays unused so the user can join
    /// the channel and retry the same link.
    NotAMember,
}

/// The `/start verify_<token>` flow: the token must be live, the caller
/// must be a confirmed channel member, and token consumption plus user
/// verification commit together.
pub async fn confirm_with_token<O: MembershipOracle>(
    db: &Database,
    oracle: &O,
    channel: &str,
    token: &str,
    platform_id: i64,
    now: DateTime<Utc>,
) -> Result<VerifyOutcome, GateError> {
    let Some(pending) = db.find_valid_token(token, cutoff(now))? else {
        return Err(GateError::InvalidToken);
    };

    match oracle.member_of(channel, platform_id).await {
        Membership::Unknown => Err(GateError::OracleUnknown),
        Membership::NotMember => Ok(VerifyOutcome::NotAMember),
        Membership::Member => {
            match db.consume_token_and_verify(token, platform_id, cutoff(now), now)? {
                Some(user_id) => {
                    info!("Verified user {} via token", pending.user_id);
                    Ok(VerifyOutcome::Verified { user_id })
                }
                // Raced by a concurrent consumption of the same token.
                None => Err(GateError::InvalidToken),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecheckOutcome {
    Confirmed,
    Revoked,
    /// Oracle could not be asked; nothing changed, retry later.
    Indeterminate,
}

/// Periodic re-check result applied to a user. Confirmed members stay
/// verified; confirmed non-members are revoked until a fresh token cycle;
/// `Unknown` never downgrades.
pub fn apply_recheck(
    db: &Database,
    user_id: &str,
    membership: Membership,
    now: DateTime<Utc>,
) -> Result<RecheckOutcome, GateError> {
    match membership {
        Membership::Member => {
            db.confirm_membership(user_id, now)?;
            Ok(RecheckOutcome::Confirmed)
        }
        Membership::NotMember => {
            db.revoke_membership(user_id)?;
            info!("Revoked access for user {}", user_id);
            Ok(RecheckOutcome::Revoked)
        }
        Membership::Unknown => {
            warn!(
                "Membership check indeterminate for user {}; state left untouched",
                user_id
            );
            Ok(RecheckOutcome::Indeterminate)
        }
    }
}
