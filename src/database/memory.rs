use std::collections::HashMap;

use parking_lot::RwLock;

use super::{AccountStore, StoreError};
use crate::models::{AccountIdentity, CachedToken};

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, AccountIdentity>>,
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryStore {
    fn list_accounts(&self) -> Result<Vec<AccountIdentity>, StoreError> {
        let mut accounts: Vec<AccountIdentity> = self.accounts.read().values().cloned().collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(accounts)
    }

    fn get_account(&self, id: &str) -> Result<Option<AccountIdentity>, StoreError> {
        Ok(self.accounts.read().get(id).cloned())
    }

    fn update_account(&self, account: &AccountIdentity) -> Result<(), StoreError> {
        self.accounts
            .write()
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn get_token(&self, account_id: &str) -> Result<Option<CachedToken>, StoreError> {
        Ok(self.tokens.read().get(account_id).cloned())
    }

    fn put_token(&self, token: &CachedToken) -> Result<(), StoreError> {
        self.tokens
            .write()
            .insert(token.account_id.clone(), token.clone());
        Ok(())
    }

    fn remove_token(&self, account_id: &str) -> Result<(), StoreError> {
        self.tokens.write().remove(account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use chrono::{Duration, Utc};

    fn account(id: &str) -> AccountIdentity {
        let config = AccountConfig {
            id: id.to_string(),
            name: None,
            refresh_token: "rt".to_string(),
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
            profile_arn: None,
            requests_per_minute: None,
            is_active: true,
        };
        AccountIdentity::from_config(&config, 10, Utc::now())
    }

    #[test]
    fn test_accounts_round_trip() {
        let store = MemoryStore::new();
        let mut a = account("a");
        store.update_account(&a).unwrap();
        a.usage.total_requests = 3;
        store.update_account(&a).unwrap();

        assert_eq!(store.list_accounts().unwrap().len(), 1);
        assert_eq!(store.get_account("a").unwrap().unwrap().usage.total_requests, 3);
        assert!(store.get_account("missing").unwrap().is_none());
    }

    #[test]
    fn test_tokens() {
        let store = MemoryStore::new();
        let token = CachedToken {
            account_id: "a".to_string(),
            access_token: "at".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        store.put_token(&token).unwrap();
        assert_eq!(store.get_token("a").unwrap(), Some(token));
        store.remove_token("a").unwrap();
        assert!(store.get_token("a").unwrap().is_none());
    }
}
