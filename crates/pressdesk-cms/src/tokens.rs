//! One-shot signup tokens.

use chrono::{DateTime, Duration, Utc};
use pressdesk_core::error::Result;
use pressdesk_core::types::{AuditAction, AuditTarget};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rusqlite::{OptionalExtension, params};

use crate::db::{CmsDb, SYSTEM_ACTOR, db_err, parse_timestamp, timestamp};

pub const TOKEN_LENGTH: usize = 30;

#[derive(Debug, Clone, serde::Serialize)]
pub struct UserToken {
    pub token: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

impl UserToken {
    /// A token is valid until `age` has elapsed since creation.
    pub fn is_valid(&self, age: Duration, now: DateTime<Utc>) -> bool {
        now < self.created_at + age
    }

    /// Signup URL handed to the invited user.
    pub fn link(&self, site_host: &str) -> String {
        format!("{}/signup/{}/", site_host.trim_end_matches('/'), self.token)
    }
}

/// Random alphanumeric token.
pub fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

impl CmsDb {
    /// Issue a token for `owner`. Expired tokens are purged first.
    pub fn create_token(&self, owner: &str, age: Duration) -> Result<UserToken> {
        self.purge_expired_tokens(age)?;
        self.insert_token(owner, &generate_token(TOKEN_LENGTH), Utc::now())
    }

    pub(crate) fn insert_token(
        &self,
        owner: &str,
        token: &str,
        created_at: DateTime<Utc>,
    ) -> Result<UserToken> {
        self.conn
            .execute(
                "INSERT INTO user_tokens (token, owner, created_at) VALUES (?1,?2,?3)",
                params![token, owner, timestamp(created_at)],
            )
            .map_err(db_err("Insert token"))?;
        Ok(UserToken {
            token: token.to_string(),
            owner: owner.to_string(),
            created_at,
        })
    }

    /// Delete tokens older than `age` and record the sweep in the audit log.
    pub fn purge_expired_tokens(&self, age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let removed = self
            .conn
            .execute(
                "DELETE FROM user_tokens WHERE created_at < ?1",
                params![timestamp(cutoff)],
            )
            .map_err(db_err("Purge tokens"))?;

        let message = format!("clean_usertoken: {removed} {}", timestamp(cutoff));
        self.log_event(
            SYSTEM_ACTOR,
            AuditAction::Change,
            &AuditTarget::kind_only("user_token", "expired"),
            &message,
        )?;
        if removed > 0 {
            tracing::info!("🧹 Purged {removed} expired token(s)");
        }
        Ok(removed)
    }

    /// True only for an unexpired token issued to `owner`. With
    /// `auto_remove` a valid token is consumed.
    pub fn validate_token(
        &self,
        owner: &str,
        token: &str,
        age: Duration,
        auto_remove: bool,
    ) -> Result<bool> {
        let created: Option<String> = self
            .conn
            .query_row(
                "SELECT created_at FROM user_tokens WHERE token=?1 AND owner=?2",
                params![token, owner],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Lookup token"))?;

        let Some(created) = created else {
            return Ok(false);
        };
        let record = UserToken {
            token: token.to_string(),
            owner: owner.to_string(),
            created_at: parse_timestamp(&created),
        };
        if !record.is_valid(age, Utc::now()) {
            return Ok(false);
        }
        if auto_remove {
            self.conn
                .execute("DELETE FROM user_tokens WHERE token=?1", params![token])
                .map_err(db_err("Consume token"))?;
        }
        Ok(true)
    }
}
