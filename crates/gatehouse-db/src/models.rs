/// Database row types — these map directly to SQLite rows.
/// Distinct from the gatehouse-types API models to keep the DB layer
/// independent.

pub struct UserRow {
    pub id: String,
    pub handle: String,
    /// Numeric platform identity, learned at first successful verification.
    pub platform_id: Option<i64>,
    pub verified: bool,
    pub revoked: bool,
    pub premium: bool,
    pub premium_expires_at: Option<String>,
    pub last_checked_at: Option<String>,
    pub created_at: String,
}

pub struct TokenRow {
    pub token: String,
    pub user_id: String,
    pub used: bool,
    pub created_at: String,
}
