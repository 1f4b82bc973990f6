use chrono::{DateTime, Utc};
use uuid::Uuid;

use gatehouse_db::Database;
use gatehouse_db::queries::RegisterOutcome;

use crate::GateError;
use crate::token::generate_token;

/// Handles are platform mentions: '@' followed by 5-32 word characters.
pub fn validate_handle(handle: &str) -> Result<(), GateError> {
    let Some(name) = handle.strip_prefix('@') else {
        return Err(GateError::InvalidInput(format!(
            "Handle must start with '@': {handle}"
        )));
    };
    if name.len() < 5 || name.len() > 32 {
        return Err(GateError::InvalidInput(format!(
            "Handle must be 5-32 characters after '@': {handle}"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(GateError::InvalidInput(format!(
            "Handle has invalid characters: {handle}"
        )));
    }
    Ok(())
}

/// Register a handle and issue its verification token. A revoked user
/// re-enters the flow with a fresh token; anyone else already registered is
/// a conflict.
pub fn register(db: &Database, handle: &str, now: DateTime<Utc>) -> Result<String, GateError> {
    validate_handle(handle)?;

    let token = generate_token();
    let user_id = Uuid::new_v4().to_string();

    match db.register_user(&user_id, handle, &token, now)? {
        RegisterOutcome::Created | RegisterOutcome::Reissued => Ok(token),
        RegisterOutcome::Conflict => Err(GateError::Conflict),
    }
}
