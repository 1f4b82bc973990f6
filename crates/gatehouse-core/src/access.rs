use gatehouse_db::Database;

use crate::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied,
}

/// The read path gating every protected request: granted iff the user
/// exists, is verified, and is not revoked. Always reads committed state;
/// no caching, since staleness here is an access-control error.
pub fn check_access(db: &Database, handle: &str) -> Result<AccessDecision, GateError> {
    let Some(user) = db.get_user_by_handle(handle)? else {
        return Ok(AccessDecision::Denied);
    };

    if user.verified && !user.revoked {
        Ok(AccessDecision::Granted)
    } else {
        Ok(AccessDecision::Denied)
    }
}
