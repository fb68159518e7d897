//! Credential broker
//!
//! Idempotent issuance of scoped tokens on top of a `TokenStore`. Minting is
//! serialized inside the process so two concurrent callers asking for the
//! same name end up with one token.

use crate::tokens::TokenStore;
use leafmesh_common::{
    crypto::token_fingerprint, now_epoch_secs, Error, Result, ScopedToken,
    DOWNHAUL_CALLBACK_PATHS, ENROLLMENT_TOKEN_NAME,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct CredentialBroker {
    store: Arc<dyn TokenStore>,
    downhaul_name: String,
    mint: Mutex<()>,
}

impl CredentialBroker {
    pub fn new(store: Arc<dyn TokenStore>, downhaul_name: impl Into<String>) -> Self {
        Self {
            store,
            downhaul_name: downhaul_name.into(),
            mint: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Return the live token named `name`, creating it with `allowed_paths`
    /// if none exists. An existing token's scope is never changed.
    pub async fn get_or_create_scoped_token(
        &self,
        name: &str,
        allowed_paths: &[String],
    ) -> Result<ScopedToken> {
        if name.trim().is_empty() {
            return Err(Error::Validation("token name is empty".to_string()));
        }

        let _guard = self.mint.lock().await;

        if let Some(existing) = self.store.find_by_name(name).await? {
            if existing.is_expired(now_epoch_secs()) {
                debug!("Token {} expired, minting a replacement", name);
                self.store.revoke(&existing.token).await?;
            } else {
                if !same_scope(&existing.allowed_paths, allowed_paths) {
                    warn!(
                        "Token {} ({}) exists with a different scope; reusing it unchanged",
                        name,
                        token_fingerprint(&existing.token)
                    );
                }
                return Ok(existing);
            }
        }

        self.store.create(name, allowed_paths, 0).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<ScopedToken>> {
        self.store.list().await
    }

    /// Token leaves present when calling back into this controller
    pub async fn downhaul_token(&self) -> Result<ScopedToken> {
        let paths: Vec<String> = DOWNHAUL_CALLBACK_PATHS.iter().map(|p| p.to_string()).collect();
        let name = self.downhaul_name.clone();
        self.get_or_create_scoped_token(&name, &paths).await
    }

    /// Unrestricted token an adopting parent uses to commission this device
    pub async fn enrollment_token(&self) -> Result<ScopedToken> {
        self.get_or_create_scoped_token(ENROLLMENT_TOKEN_NAME, &[]).await
    }

    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        if self.store.revoke(token).await? {
            Ok(())
        } else {
            Err(Error::not_found("token", token_fingerprint(token)))
        }
    }
}

fn same_scope(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::SqliteTokenStore;
    use leafmesh_common::{Database, DOWNHAUL_TOKEN_NAME};

    fn broker() -> CredentialBroker {
        let store = SqliteTokenStore::new(Database::open_memory().unwrap());
        CredentialBroker::new(Arc::new(store), DOWNHAUL_TOKEN_NAME)
    }

    #[tokio::test]
    async fn test_issuance_is_idempotent() {
        let broker = broker();
        let paths = vec!["/reportDisconnect".to_string()];

        let first = broker.get_or_create_scoped_token("X", &paths).await.unwrap();
        let second = broker.get_or_create_scoped_token("X", &paths).await.unwrap();
        assert_eq!(first.token, second.token);
        assert_eq!(broker.list_tokens().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scope_mismatch_keeps_existing() {
        let broker = broker();
        let first = broker
            .get_or_create_scoped_token("X", &["/a".to_string()])
            .await
            .unwrap();
        let second = broker
            .get_or_create_scoped_token("X", &["/b".to_string()])
            .await
            .unwrap();
        assert_eq!(second.token, first.token);
        assert_eq!(second.allowed_paths, vec!["/a".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_callers_mint_once() {
        let broker = Arc::new(broker());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move { broker.downhaul_token().await }));
        }
        let mut values = BTreeSet::new();
        for handle in handles {
            values.insert(handle.await.unwrap().unwrap().token);
        }
        assert_eq!(values.len(), 1);
        assert_eq!(broker.list_tokens().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_replaced() {
        let db = Database::open_memory().unwrap();
        let store = Arc::new(SqliteTokenStore::new(db.clone()));
        let broker = CredentialBroker::new(store.clone(), DOWNHAUL_TOKEN_NAME);

        let old = store.create("X", &[], 60).await.unwrap();
        {
            let conn = db.connection();
            let conn = conn.lock();
            conn.execute("UPDATE api_tokens SET expire = 1", []).unwrap();
        }

        let fresh = broker.get_or_create_scoped_token("X", &[]).await.unwrap();
        assert_ne!(fresh.token, old.token);
        assert_eq!(fresh.expire, 0);

        let named: Vec<ScopedToken> = broker
            .list_tokens()
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.name == "X")
            .collect();
        assert_eq!(named, vec![fresh]);
    }

    #[tokio::test]
    async fn test_well_known_tokens() {
        let broker = broker();
        let downhaul = broker.downhaul_token().await.unwrap();
        assert_eq!(downhaul.name, DOWNHAUL_TOKEN_NAME);
        assert!(downhaul.permits("/reportPSKAuthFailure"));
        assert!(!downhaul.permits("/tokens"));

        let enrollment = broker.enrollment_token().await.unwrap();
        assert!(enrollment.is_unrestricted());
        assert_eq!(broker.enrollment_token().await.unwrap().token, enrollment.token);

        broker.revoke_token(&enrollment.token).await.unwrap();
        assert!(matches!(
            broker.revoke_token(&enrollment.token).await,
            Err(Error::NotFound { .. })
        ));
    }
}
