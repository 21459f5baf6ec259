//! The on-disk config store
//!
//! Account configurations live encrypted in a per-user OIDC directory,
//! discovered as the first existing candidate of
//! `$HOME/.config/oidc-agent/` and `$HOME/.oidc-agent/`. Files named
//! `*.clientconfig` (optionally followed by digits) are client configs
//! from dynamic registration, files named `*.config` are agent-internal;
//! every other file is an encrypted account configuration whose filename
//! is the account's short name.

use std::{
    fs,
    path::{Path, PathBuf},
};

use oidc_agent_core::{account::AccountRecord, crypt};

use crate::{
    error::{Result, StoreError},
    Error,
};

const OIDC_DIR_CANDIDATES: [&str; 2] = [".config/oidc-agent", ".oidc-agent"];

const CLIENT_CONFIG_SUFFIX: &str = ".clientconfig";

/// Handle to the per-user OIDC directory.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Discover the OIDC dir under `$HOME`, first existing candidate wins.
    pub fn discover() -> Result<Self, StoreError> {
        let home = home::home_dir().ok_or(StoreError::NoHome)?;
        OIDC_DIR_CANDIDATES
            .iter()
            .map(|candidate| home.join(candidate))
            .find(|path| path.is_dir())
            .map(|dir| Self { dir })
            .ok_or(StoreError::NoOidcDir)
    }

    /// Use an explicit directory instead of discovering one.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this store reads and writes.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn account_path(&self, short_name: &str) -> PathBuf {
        self.dir.join(short_name)
    }

    /// Whether an account configuration exists for `short_name`.
    pub fn account_exists(&self, short_name: &str) -> bool {
        self.account_path(short_name).is_file()
    }

    /// Read and decrypt the account configuration for `short_name`.
    pub fn read_account(&self, short_name: &str, password: &str) -> Result<AccountRecord> {
        let path = self.account_path(short_name);
        if !path.is_file() {
            return Err(StoreError::NotFound(short_name.to_owned()).into());
        }
        let content = fs::read_to_string(&path)
            .map_err(|source| StoreError::ReadFile { path, source })?;
        let plain = crypt::open_file(&content, password)?;
        let account: AccountRecord = serde_json::from_slice(&plain)
            .map_err(|e| StoreError::Malformed(short_name.to_owned(), e))?;
        Ok(account.normalized())
    }

    /// Encrypt and write an account configuration, atomically replacing
    /// any previous file via a temp file and rename.
    pub fn write_account(
        &self,
        account: &AccountRecord,
        password: &str,
    ) -> Result<()> {
        let plain = serde_json::to_vec(account).map_err(Error::SerdeError)?;
        let sealed = crypt::seal_file(&plain, password)?;
        let path = self.account_path(&account.short_name);
        let tmp = self.dir.join(format!(".{}.tmp", account.short_name));
        fs::write(&tmp, sealed).map_err(|source| StoreError::WriteFile {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::WriteFile { path, source })?;
        Ok(())
    }

    /// Delete the account configuration for `short_name`.
    pub fn delete_account(&self, short_name: &str) -> Result<()> {
        let path = self.account_path(short_name);
        if !path.is_file() {
            return Err(StoreError::NotFound(short_name.to_owned()).into());
        }
        fs::remove_file(&path).map_err(|source| StoreError::WriteFile { path, source })?;
        Ok(())
    }

    fn file_names(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::ListDir {
            path: self.dir.clone(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::ListDir {
                path: self.dir.clone(),
                source,
            })?;
            if !entry.path().is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                if !name.starts_with('.') {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Short names of all stored account configurations.
    pub fn account_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .file_names()?
            .into_iter()
            .filter(|name| !is_client_config(name) && !name.ends_with(".config"))
            .collect())
    }

    /// Full paths of all stored client configuration files.
    pub fn client_config_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self
            .file_names()?
            .into_iter()
            .filter(|name| is_client_config(name))
            .map(|name| self.dir.join(name))
            .collect())
    }
}

/// Whether `filename` names a client config: it ends with `.clientconfig`
/// followed by nothing but digits.
fn is_client_config(filename: &str) -> bool {
    match filename.rfind(CLIENT_CONFIG_SUFFIX) {
        Some(pos) => filename[pos + CLIENT_CONFIG_SUFFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use oidc_agent_core::crypt::CryptError;

    #[test]
    fn client_config_predicate() {
        assert!(is_client_config("iam.clientconfig"));
        assert!(is_client_config("iam.clientconfig2"));
        assert!(is_client_config("iam.clientconfig13"));
        assert!(!is_client_config("iam.clientconfig.bak"));
        assert!(!is_client_config("iam"));
        assert!(!is_client_config("issuer.config"));
    }

    #[test]
    fn write_read_roundtrip_and_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path());
        let account = AccountRecord {
            short_name: "iam".into(),
            issuer_url: "https://iss.example/".into(),
            client_id: "cid".into(),
            scope: "openid".into(),
            ..AccountRecord::default()
        };
        store.write_account(&account, "pw").unwrap();
        std::fs::write(dir.path().join("iam.clientconfig1"), "{}").unwrap();
        std::fs::write(dir.path().join("issuer.config"), "").unwrap();

        assert!(store.account_exists("iam"));
        assert_eq!(store.account_names().unwrap(), vec!["iam".to_owned()]);
        assert_eq!(store.client_config_paths().unwrap().len(), 1);

        let read = store.read_account("iam", "pw").unwrap();
        assert_eq!(read.short_name, "iam");
        assert_eq!(read.issuer_url, "https://iss.example/");

        match store.read_account("iam", "wrong") {
            Err(Error::Crypt(CryptError::AuthFail)) => {}
            other => panic!("expected AuthFail, got {other:?}"),
        }

        store.delete_account("iam").unwrap();
        assert!(!store.account_exists("iam"));
        assert!(matches!(
            store.read_account("iam", "pw"),
            Err(Error::Store(StoreError::NotFound(_)))
        ));
    }
}
