//! The in-memory account registry
//!
//! Holds the loaded accounts in insertion order, keyed primarily by short
//! name with a secondary lookup by the `used_state` of an in-flight
//! authorization-code flow. All access is serialized by the dispatcher,
//! so the registry itself is plain data.
//!
//! Invariants: at most one account per short name, at most one account
//! per non-null `used_state`, and a monotonic access-token expiry per
//! account.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;

use oidc_agent_core::account::AccountRecord;

/// Possible errors when mutating the registry.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// An account with that short name is already loaded.
    #[error("account already loaded")]
    Duplicate,
    /// No account with that short name is loaded.
    #[error("account not loaded")]
    NotLoaded,
    /// No account has an authorization-code flow outstanding under that
    /// state.
    #[error("no pending authorization code flow for this state")]
    NoSuchState,
    /// The state is already bound to another account.
    #[error("an authorization code flow is already pending for this state")]
    StateInUse,
}

/// The set of loaded accounts.
#[derive(Default)]
pub struct Registry {
    accounts: Vec<AccountRecord>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an account. Fails when its short name is already present.
    pub fn add(&mut self, account: AccountRecord) -> Result<(), RegistryError> {
        if self.get(&account.short_name).is_some() {
            return Err(RegistryError::Duplicate);
        }
        self.accounts.push(account);
        Ok(())
    }

    /// Unload an account. The returned record is the only remaining
    /// owner of its secrets; dropping it zeroizes them.
    pub fn remove(&mut self, short_name: &str) -> Result<AccountRecord, RegistryError> {
        let idx = self
            .accounts
            .iter()
            .position(|a| a.short_name == short_name)
            .ok_or(RegistryError::NotLoaded)?;
        Ok(self.accounts.remove(idx))
    }

    /// Look up an account by short name.
    pub fn get(&self, short_name: &str) -> Option<&AccountRecord> {
        self.accounts.iter().find(|a| a.short_name == short_name)
    }

    /// Look up an account by short name, mutably.
    pub fn get_mut(&mut self, short_name: &str) -> Option<&mut AccountRecord> {
        self.accounts
            .iter_mut()
            .find(|a| a.short_name == short_name)
    }

    /// Mark an authorization-code flow as outstanding for an account.
    pub fn bind_state(&mut self, short_name: &str, state: &str) -> Result<(), RegistryError> {
        if self.find_by_state(state).is_some() {
            return Err(RegistryError::StateInUse);
        }
        let account = self
            .get_mut(short_name)
            .ok_or(RegistryError::NotLoaded)?;
        account.used_state = Some(state.to_owned());
        Ok(())
    }

    /// Look up the account whose code flow is outstanding under `state`.
    pub fn find_by_state(&self, state: &str) -> Option<&AccountRecord> {
        self.accounts
            .iter()
            .find(|a| a.used_state.as_deref() == Some(state))
    }

    /// Like [`Registry::find_by_state`], mutably.
    pub fn find_by_state_mut(&mut self, state: &str) -> Option<&mut AccountRecord> {
        self.accounts
            .iter_mut()
            .find(|a| a.used_state.as_deref() == Some(state))
    }

    /// Clear an outstanding state and hand back its account.
    pub fn unbind_state(&mut self, state: &str) -> Result<&mut AccountRecord, RegistryError> {
        let account = self
            .find_by_state_mut(state)
            .ok_or(RegistryError::NoSuchState)?;
        account.used_state = None;
        Ok(account)
    }

    /// Short names of all loaded accounts, in insertion order.
    pub fn short_names(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.short_name.clone()).collect()
    }

    /// Replace an account's cached access token, enforcing monotonic
    /// expiry. Returns whether the cache was updated.
    pub fn touch_access_token(
        &mut self,
        short_name: &str,
        token: SecretString,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RegistryError> {
        let account = self
            .get_mut(short_name)
            .ok_or(RegistryError::NotLoaded)?;
        Ok(account.touch_access_token(token, expires_at))
    }

    /// Whether no accounts are loaded.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn account(name: &str) -> AccountRecord {
        AccountRecord {
            short_name: name.into(),
            ..AccountRecord::default()
        }
    }

    #[test]
    fn add_remove_list_keeps_insertion_order() {
        let mut registry = Registry::new();
        registry.add(account("b")).unwrap();
        registry.add(account("a")).unwrap();
        registry.add(account("c")).unwrap();
        assert_eq!(registry.add(account("a")), Err(RegistryError::Duplicate));
        assert_eq!(registry.short_names(), vec!["b", "a", "c"]);

        registry.remove("a").unwrap();
        assert_eq!(registry.short_names(), vec!["b", "c"]);
        assert!(matches!(registry.remove("a"), Err(RegistryError::NotLoaded)));
        registry.remove("b").unwrap();
        registry.remove("c").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn state_binding_is_unique_and_consumed() {
        let mut registry = Registry::new();
        registry.add(account("a")).unwrap();
        registry.add(account("b")).unwrap();

        registry.bind_state("a", "XYZ").unwrap();
        assert_eq!(
            registry.bind_state("b", "XYZ"),
            Err(RegistryError::StateInUse)
        );
        assert_eq!(
            registry.find_by_state("XYZ").unwrap().short_name,
            "a"
        );

        let unbound = registry.unbind_state("XYZ").unwrap();
        assert_eq!(unbound.short_name, "a");
        assert!(unbound.used_state.is_none());
        assert!(matches!(
            registry.unbind_state("XYZ"),
            Err(RegistryError::NoSuchState)
        ));
    }

    #[test]
    fn touch_access_token_enforces_monotonic_expiry() {
        let mut registry = Registry::new();
        registry.add(account("a")).unwrap();
        let later = Utc::now() + chrono::Duration::seconds(600);
        let earlier = Utc::now() + chrono::Duration::seconds(60);
        assert!(registry
            .touch_access_token("a", SecretString::new("t1".into()), Some(later))
            .unwrap());
        assert!(!registry
            .touch_access_token("a", SecretString::new("t2".into()), Some(earlier))
            .unwrap());
        assert_eq!(
            registry.touch_access_token("nope", SecretString::new("t".into()), None),
            Err(RegistryError::NotLoaded)
        );
    }
}
