use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::models::{TokenRow, UserRow};
use crate::{Database, format_ts};

/// Result of a registration attempt.
pub enum RegisterOutcome {
    /// New user row plus a pending verification token.
    Created,
    /// Existing revoked user re-entering the flow; fresh token issued
    /// against the existing row.
    Reissued,
    /// Handle already registered and not revoked.
    Conflict,
}

/// Result of a quota-checked subscription insert.
pub enum SubscriptionInsert {
    Recorded { used_in_window: u32 },
    QuotaExceeded { used_in_window: u32 },
}

impl Database {
    // -- Users --

    pub fn get_user_by_handle(&self, handle: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_handle(conn, handle))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Register a handle and stage its verification token in one
    /// transaction. A revoked user may re-enter the flow with a fresh token;
    /// any other existing handle is a conflict.
    pub fn register_user(
        &self,
        user_id: &str,
        handle: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let existing: Option<(String, bool)> = {
                let mut stmt = tx.prepare("SELECT id, revoked FROM users WHERE handle = ?1")?;
                stmt.query_row([handle], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()?
            };

            let outcome = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO users (id, handle, created_at) VALUES (?1, ?2, ?3)",
                        rusqlite::params![user_id, handle, format_ts(now)],
                    )?;
                    tx.execute(
                        "INSERT INTO verification_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                        rusqlite::params![token, user_id, format_ts(now)],
                    )?;
                    RegisterOutcome::Created
                }
                Some((existing_id, true)) => {
                    tx.execute(
                        "INSERT INTO verification_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                        rusqlite::params![token, existing_id, format_ts(now)],
                    )?;
                    RegisterOutcome::Reissued
                }
                Some((_, false)) => RegisterOutcome::Conflict,
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    // -- Verification tokens --

    /// Look up a token that is still unused and younger than the cutoff.
    pub fn find_valid_token(&self, token: &str, cutoff: DateTime<Utc>) -> Result<Option<TokenRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT token, user_id, used, created_at FROM verification_tokens
                 WHERE token = ?1 AND used = 0 AND created_at > ?2",
            )?;
            let row = stmt
                .query_row(rusqlite::params![token, format_ts(cutoff)], |row| {
                    Ok(TokenRow {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        used: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Single-use consumption: flips the token to used and applies the
    /// verified state to its owner in the same transaction. The guarded
    /// UPDATE makes concurrent consumption of one token yield exactly one
    /// winner; everyone else sees zero affected rows and gets `None`.
    pub fn consume_token_and_verify(
        &self,
        token: &str,
        platform_id: i64,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let user_id: Option<String> = {
                let mut stmt = tx.prepare(
                    "SELECT user_id FROM verification_tokens
                     WHERE token = ?1 AND used = 0 AND created_at > ?2",
                )?;
                stmt.query_row(rusqlite::params![token, format_ts(cutoff)], |row| row.get(0))
                    .optional()?
            };

            let Some(user_id) = user_id else {
                return Ok(None);
            };

            let consumed = tx.execute(
                "UPDATE verification_tokens SET used = 1 WHERE token = ?1 AND used = 0",
                [token],
            )?;
            if consumed != 1 {
                return Ok(None);
            }

            tx.execute(
                "UPDATE users
                 SET verified = 1, revoked = 0, platform_id = ?1, last_checked_at = ?2
                 WHERE id = ?3",
                rusqlite::params![platform_id, format_ts(now), user_id],
            )?;

            tx.commit()?;
            Ok(Some(user_id))
        })
    }

    // -- Subscriptions --

    /// Quota-checked subscription insert. Counts the trailing window, then
    /// inserts the channel slot and its ledger entry together, or nothing.
    pub fn register_subscription(
        &self,
        sub_id: &str,
        user_id: &str,
        channel: &str,
        limit: u32,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionInsert> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let used_in_window: u32 = tx.query_row(
                "SELECT COUNT(*) FROM subscription_log WHERE user_id = ?1 AND logged_at > ?2",
                rusqlite::params![user_id, format_ts(window_start)],
                |row| row.get(0),
            )?;

            if used_in_window >= limit {
                return Ok(SubscriptionInsert::QuotaExceeded { used_in_window });
            }

            tx.execute(
                "INSERT INTO channels (id, user_id, channel, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sub_id, user_id, channel, format_ts(now)],
            )?;
            tx.execute(
                "INSERT INTO subscription_log (user_id, logged_at, running_count) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, format_ts(now), used_in_window + 1],
            )?;

            tx.commit()?;
            Ok(SubscriptionInsert::Recorded {
                used_in_window: used_in_window + 1,
            })
        })
    }

    // -- Re-checks --

    pub fn confirm_membership(&self, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET verified = 1, last_checked_at = ?1 WHERE id = ?2",
                rusqlite::params![format_ts(now), user_id],
            )?;
            Ok(())
        })
    }

    /// A confirmed non-member loses access until a fresh token cycle.
    pub fn revoke_membership(&self, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET verified = 0, revoked = 1 WHERE id = ?1",
                [user_id],
            )?;
            Ok(())
        })
    }

    pub fn list_verified_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, handle, platform_id, verified, revoked, premium,
                        premium_expires_at, last_checked_at, created_at
                 FROM users WHERE verified = 1",
            )?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        handle: row.get(1)?,
        platform_id: row.get(2)?,
        verified: row.get(3)?,
        revoked: row.get(4)?,
        premium: row.get(5)?,
        premium_expires_at: row.get(6)?,
        last_checked_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_user_by_handle(conn: &Connection, handle: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, handle, platform_id, verified, revoked, premium,
                premium_expires_at, last_checked_at, created_at
         FROM users WHERE handle = ?1",
    )?;
    let row = stmt.query_row([handle], user_from_row).optional()?;
    Ok(row)
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, handle, platform_id, verified, revoked, premium,
                premium_expires_at, last_checked_at, created_at
         FROM users WHERE id = ?1",
    )?;
    let row = stmt.query_row([id], user_from_row).optional()?;
    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn open_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn cutoff_at(now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(24)
    }

    fn seed_log(db: &Database, user_id: &str, n: u32, at: DateTime<Utc>) {
        db.with_conn_mut(|conn| {
            for i in 0..n {
                conn.execute(
                    "INSERT INTO subscription_log (user_id, logged_at, running_count) VALUES (?1, ?2, ?3)",
                    rusqlite::params![user_id, format_ts(at), i + 1],
                )?;
            }
            Ok(())
        })
        .unwrap();
    }

    fn count_rows(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            let n = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            Ok(n)
        })
        .unwrap()
    }

    #[test]
    fn register_creates_unverified_user_with_pending_token() {
        let (db, _dir) = open_db();

        let outcome = db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        assert!(matches!(outcome, RegisterOutcome::Created));

        let user = db.get_user_by_handle("@alice_dev").unwrap().unwrap();
        assert!(!user.verified);
        assert!(!user.revoked);
        assert!(user.platform_id.is_none());

        let token = db.find_valid_token("tok1", cutoff_at(t0())).unwrap().unwrap();
        assert_eq!(token.user_id, "u1");
        assert!(!token.used);
    }

    #[test]
    fn duplicate_handle_conflicts() {
        let (db, _dir) = open_db();

        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        let outcome = db.register_user("u2", "@alice_dev", "tok2", t0()).unwrap();
        assert!(matches!(outcome, RegisterOutcome::Conflict));

        // No second user row, no second token
        assert_eq!(count_rows(&db, "users"), 1);
        assert_eq!(count_rows(&db, "verification_tokens"), 1);
    }

    #[test]
    fn revoked_user_gets_fresh_token_on_reregistration() {
        let (db, _dir) = open_db();

        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        db.consume_token_and_verify("tok1", 501, cutoff_at(t0()), t0()).unwrap().unwrap();
        db.revoke_membership("u1").unwrap();

        let outcome = db.register_user("u2", "@alice_dev", "tok2", t0()).unwrap();
        assert!(matches!(outcome, RegisterOutcome::Reissued));

        // The fresh token belongs to the existing row
        assert_eq!(count_rows(&db, "users"), 1);
        let token = db.find_valid_token("tok2", cutoff_at(t0())).unwrap().unwrap();
        assert_eq!(token.user_id, "u1");
    }

    #[test]
    fn consuming_a_token_verifies_its_owner() {
        let (db, _dir) = open_db();

        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        let user_id = db
            .consume_token_and_verify("tok1", 501, cutoff_at(t0()), t0())
            .unwrap();
        assert_eq!(user_id.as_deref(), Some("u1"));

        let user = db.get_user_by_handle("@alice_dev").unwrap().unwrap();
        assert!(user.verified);
        assert!(!user.revoked);
        assert_eq!(user.platform_id, Some(501));
        assert!(user.last_checked_at.is_some());
    }

    #[test]
    fn token_is_single_use() {
        let (db, _dir) = open_db();

        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        assert!(db.consume_token_and_verify("tok1", 501, cutoff_at(t0()), t0()).unwrap().is_some());
        assert!(db.consume_token_and_verify("tok1", 501, cutoff_at(t0()), t0()).unwrap().is_none());
    }

    #[test]
    fn concurrent_consumption_has_exactly_one_winner() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();

        let winners = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let db = &db;
                    s.spawn(move || {
                        db.consume_token_and_verify("tok1", 500 + i, cutoff_at(t0()), t0())
                            .unwrap()
                            .is_some()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(winners, 1);
    }

    #[test]
    fn token_expires_at_exactly_24_hours() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();

        // One second before the boundary the token is still live
        let just_before = t0() + Duration::hours(24) - Duration::seconds(1);
        assert!(db.find_valid_token("tok1", cutoff_at(just_before)).unwrap().is_some());

        // At T+24h the cutoff equals created_at; strict comparison expires it
        let at_boundary = t0() + Duration::hours(24);
        assert!(db.find_valid_token("tok1", cutoff_at(at_boundary)).unwrap().is_none());
        assert!(
            db.consume_token_and_verify("tok1", 501, cutoff_at(at_boundary), at_boundary)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn quota_boundary_at_base_limit() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        seed_log(&db, "u1", 999, t0() - Duration::hours(1));

        let window_start = t0() - Duration::hours(24);
        let outcome = db
            .register_subscription("s1", "u1", "@news", 1000, window_start, t0())
            .unwrap();
        assert!(matches!(outcome, SubscriptionInsert::Recorded { used_in_window: 1000 }));

        let outcome = db
            .register_subscription("s2", "u1", "@sports", 1000, window_start, t0())
            .unwrap();
        assert!(matches!(outcome, SubscriptionInsert::QuotaExceeded { used_in_window: 1000 }));
    }

    #[test]
    fn quota_boundary_at_premium_limit() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        seed_log(&db, "u1", 1999, t0() - Duration::hours(1));

        let window_start = t0() - Duration::hours(24);
        let outcome = db
            .register_subscription("s1", "u1", "@news", 2000, window_start, t0())
            .unwrap();
        assert!(matches!(outcome, SubscriptionInsert::Recorded { used_in_window: 2000 }));

        let outcome = db
            .register_subscription("s2", "u1", "@sports", 2000, window_start, t0())
            .unwrap();
        assert!(matches!(outcome, SubscriptionInsert::QuotaExceeded { used_in_window: 2000 }));
    }

    #[test]
    fn entries_outside_the_window_do_not_count() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        seed_log(&db, "u1", 1000, t0() - Duration::hours(25));

        let window_start = t0() - Duration::hours(24);
        let outcome = db
            .register_subscription("s1", "u1", "@news", 1000, window_start, t0())
            .unwrap();
        assert!(matches!(outcome, SubscriptionInsert::Recorded { used_in_window: 1 }));
    }

    #[test]
    fn quota_rejection_writes_nothing() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();

        let window_start = t0() - Duration::hours(24);
        db.register_subscription("s1", "u1", "@news", 1, window_start, t0()).unwrap();

        let channels_before = count_rows(&db, "channels");
        let log_before = count_rows(&db, "subscription_log");

        let outcome = db
            .register_subscription("s2", "u1", "@sports", 1, window_start, t0())
            .unwrap();
        assert!(matches!(outcome, SubscriptionInsert::QuotaExceeded { .. }));
        assert_eq!(count_rows(&db, "channels"), channels_before);
        assert_eq!(count_rows(&db, "subscription_log"), log_before);
    }

    #[test]
    fn subscription_and_ledger_rows_stay_paired() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();

        let window_start = t0() - Duration::hours(24);
        for i in 0..5 {
            db.register_subscription(&format!("s{i}"), "u1", "@news", 1000, window_start, t0())
                .unwrap();
        }

        assert_eq!(count_rows(&db, "channels"), count_rows(&db, "subscription_log"));
    }

    #[test]
    fn recheck_transitions_flip_flags() {
        let (db, _dir) = open_db();
        db.register_user("u1", "@alice_dev", "tok1", t0()).unwrap();
        db.consume_token_and_verify("tok1", 501, cutoff_at(t0()), t0()).unwrap();

        db.revoke_membership("u1").unwrap();
        let user = db.get_user_by_id("u1").unwrap().unwrap();
        assert!(!user.verified);
        assert!(user.revoked);
        assert!(db.list_verified_users().unwrap().is_empty());

        let later = t0() + Duration::hours(1);
        db.confirm_membership("u1", later).unwrap();
        let user = db.get_user_by_id("u1").unwrap().unwrap();
        assert!(user.verified);
        assert_eq!(user.last_checked_at.as_deref(), Some(format_ts(later).as_str()));
    }
}
