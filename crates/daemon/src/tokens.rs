//! Credential store
//!
//! Persists the scoped API tokens this controller has issued. When an OTP
//! secret is configured every operation needs a recent step-up; the
//! elevation window lives in `kv_store` so separate CLI invocations share it.

use async_trait::async_trait;
use leafmesh_common::{
    crypto::{generate_bearer_token, token_fingerprint},
    now_epoch_secs, AuthSide, Database, Error, OtpVerifier, Result, ScopedToken,
    CREDENTIAL_STORE,
};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

const STEP_UP_KEY: &str = "security.step_up_until";

/// Storage of named scoped tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Most recent token with this name, expired or not
    async fn find_by_name(&self, name: &str) -> Result<Option<ScopedToken>>;

    /// Mint a new token. `ttl_secs` is relative; 0 never expires.
    async fn create(&self, name: &str, allowed_paths: &[String], ttl_secs: i64) -> Result<ScopedToken>;

    async fn list(&self) -> Result<Vec<ScopedToken>>;

    /// Remove a token by value; false when it did not exist
    async fn revoke(&self, token: &str) -> Result<bool>;

    /// Present an OTP code to unlock privileged operations
    async fn step_up(&self, code: &str) -> Result<()>;
}

/// SQLite-backed `TokenStore`
#[derive(Clone)]
pub struct SqliteTokenStore {
    db: Database,
    otp: Option<OtpVerifier>,
    step_up_ttl_secs: i64,
}

impl SqliteTokenStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            otp: None,
            step_up_ttl_secs: 0,
        }
    }

    /// Require OTP step-up before any credential operation
    pub fn with_step_up(mut self, otp: OtpVerifier, ttl_secs: i64) -> Self {
        self.otp = Some(otp);
        self.step_up_ttl_secs = ttl_secs;
        self
    }

    /// Whether the current session may touch credentials
    pub fn is_privileged(&self) -> Result<bool> {
        if self.otp.is_none() {
            return Ok(true);
        }
        let until = self
            .db
            .kv_get(STEP_UP_KEY)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(until > now_epoch_secs())
    }

    fn ensure_privileged(&self) -> Result<()> {
        if self.is_privileged()? {
            Ok(())
        } else {
            Err(Error::RemoteAuthRequired {
                side: AuthSide::Controller,
                address: CREDENTIAL_STORE.to_string(),
                reason: "credential store requires OTP step-up".to_string(),
            })
        }
    }

    fn row_to_token(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode(raw: (String, String, String, i64)) -> Result<ScopedToken> {
        let (name, token, paths, expire) = raw;
        Ok(ScopedToken {
            name,
            token,
            allowed_paths: serde_json::from_str(&paths)?,
            expire,
        })
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<ScopedToken>> {
        self.ensure_privileged()?;

        let conn = self.db.connection();
        let conn = conn.lock();
        let raw = conn
            .query_row(
                "SELECT name, token, allowed_paths, expire FROM api_tokens
                 WHERE name = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![name],
                Self::row_to_token,
            )
            .optional()?;

        raw.map(Self::decode).transpose()
    }

    async fn create(&self, name: &str, allowed_paths: &[String], ttl_secs: i64) -> Result<ScopedToken> {
        self.ensure_privileged()?;
        if ttl_secs < 0 {
            return Err(Error::Validation(format!("negative token TTL {}", ttl_secs)));
        }

        let now = now_epoch_secs();
        let token = ScopedToken {
            name: name.to_string(),
            token: generate_bearer_token(),
            allowed_paths: allowed_paths.to_vec(),
            expire: if ttl_secs == 0 { 0 } else { now + ttl_secs },
        };

        {
            let conn = self.db.connection();
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO api_tokens (token, name, allowed_paths, expire, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    token.token,
                    token.name,
                    serde_json::to_string(&token.allowed_paths)?,
                    token.expire,
                    now
                ],
            )?;
        }

        info!(
            "Issued token {} ({}) scoped to {} path(s)",
            token.name,
            token_fingerprint(&token.token),
            token.allowed_paths.len()
        );
        Ok(token)
    }

    async fn list(&self) -> Result<Vec<ScopedToken>> {
        self.ensure_privileged()?;

        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, token, allowed_paths, expire FROM api_tokens ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], Self::row_to_token)?;

        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(Self::decode(row?)?);
        }
        Ok(tokens)
    }

    async fn revoke(&self, token: &str) -> Result<bool> {
        self.ensure_privileged()?;

        let conn = self.db.connection();
        let conn = conn.lock();
        let removed = conn.execute("DELETE FROM api_tokens WHERE token = ?1", params![token])?;
        if removed > 0 {
            info!("Revoked token {}", token_fingerprint(token));
        }
        Ok(removed > 0)
    }

    async fn step_up(&self, code: &str) -> Result<()> {
        let Some(otp) = &self.otp else {
            debug!("Step-up requested but no OTP secret configured");
            return Ok(());
        };

        let now = now_epoch_secs();
        if !otp.verify(code, now) {
            warn!("Rejected OTP step-up attempt");
            return Err(Error::RemoteAuthRequired {
                side: AuthSide::Controller,
                address: CREDENTIAL_STORE.to_string(),
                reason: "invalid OTP code".to_string(),
            });
        }

        let until = now + self.step_up_ttl_secs;
        self.db.kv_set(STEP_UP_KEY, &until.to_string())?;
        info!("OTP step-up granted for {}s", self.step_up_ttl_secs);
        Ok(())
    }
}
