use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use types::PublicKeyBytes;

pub const REMOTE_KEYS_FILENAME: &str = "remote_keys.json";

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct RemoteKeyEntry {
    pub pubkey: PublicKeyBytes,
    pub url: String,
}

/// The persisted registry of remote keys managed through the Keymanager API.
/// Keys imported here survive restarts; the file is the only state Vero
/// writes besides the API token.
pub struct RemoteKeys {
    file_path: PathBuf,
    entries: Mutex<BTreeMap<PublicKeyBytes, String>>,
}

impl RemoteKeys {
    pub fn load_or_create(data_dir: PathBuf) -> Result<Self> {
        let file_path = data_dir.join(REMOTE_KEYS_FILENAME);

        let entries = if file_path.exists() {
            let bytes = fs_err::read(&file_path)?;
            let entries: Vec<RemoteKeyEntry> = serde_json::from_slice(&bytes)?;

            info!("loaded {} remote key(s) from {}", entries.len(), file_path.display());

            entries
                .into_iter()
                .map(|entry| (entry.pubkey, entry.url))
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            file_path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn list(&self) -> Vec<RemoteKeyEntry> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(pubkey, url)| RemoteKeyEntry {
                        pubkey: *pubkey,
                        url: url.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inserts an entry and persists the registry. Returns `false` when the
    /// key was already present.
    pub fn import(&self, entry: RemoteKeyEntry) -> Result<bool> {
        let inserted = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| anyhow::anyhow!("remote key registry lock is poisoned"))?;

            if entries.contains_key(&entry.pubkey) {
                false
            } else {
                entries.insert(entry.pubkey, entry.url);
                true
            }
        };

        if inserted {
            self.persist()?;
        }

        Ok(inserted)
    }

    /// Removes an entry and persists the registry. Returns `false` when the
    /// key was not present.
    pub fn delete(&self, pubkey: PublicKeyBytes) -> Result<bool> {
        let removed = {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| anyhow::anyhow!("remote key registry lock is poisoned"))?;

            entries.remove(&pubkey).is_some()
        };

        if removed {
            self.persist()?;
        }

        Ok(removed)
    }

    fn persist(&self) -> Result<()> {
        let entries = self.list();
        let json = serde_json::to_vec_pretty(&entries)?;

        if let Some(parent) = self.file_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        fs_err::write(&self.file_path, json)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(byte: u8) -> RemoteKeyEntry {
        RemoteKeyEntry {
            pubkey: PublicKeyBytes::repeat_byte(byte),
            url: "http://signer.example:9000".to_owned(),
        }
    }

    #[test]
    fn imported_keys_survive_a_reload() -> Result<()> {
        let directory = tempfile::tempdir()?;
        let data_dir = directory.path().to_path_buf();

        let remote_keys = RemoteKeys::load_or_create(data_dir.clone())?;

        assert!(remote_keys.import(entry(1))?);
        assert!(remote_keys.import(entry(2))?);
        assert!(!remote_keys.import(entry(1))?, "duplicate import is a no-op");

        let reloaded = RemoteKeys::load_or_create(data_dir)?;

        assert_eq!(reloaded.list(), vec![entry(1), entry(2)]);

        Ok(())
    }

    #[test]
    fn deleted_keys_stay_deleted() -> Result<()> {
        let directory = tempfile::tempdir()?;
        let data_dir = directory.path().to_path_buf();

        let remote_keys = RemoteKeys::load_or_create(data_dir.clone())?;
        remote_keys.import(entry(1))?;

        assert!(remote_keys.delete(entry(1).pubkey)?);
        assert!(!remote_keys.delete(entry(1).pubkey)?);

        let reloaded = RemoteKeys::load_or_create(data_dir)?;

        assert!(reloaded.list().is_empty());

        Ok(())
    }
}
