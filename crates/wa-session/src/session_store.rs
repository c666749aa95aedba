use std::path::{Path, PathBuf};

use thiserror::Error;

const TENANTS_DIR: &str = "tenants";
const SESSION_DIR: &str = "session";
const MAX_TENANT_ID_LEN: usize = 64;

#[derive(Debug, Error)]
/// Enumerates supported `SessionStoreError` values.
pub enum SessionStoreError {
    #[error("invalid tenant id '{0}': use 1-64 characters from [A-Za-z0-9_.-]")]
    InvalidTenantId(String),
    #[error("failed to prepare session directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wipe session artifact {path}: {source}")]
    Wipe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Checks that `tenant_id` is safe to use as a single path component.
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), SessionStoreError> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= MAX_TENANT_ID_LEN
        && tenant_id != "."
        && tenant_id != ".."
        && tenant_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidTenantId(tenant_id.to_string()))
    }
}

/// Returns `<state_dir>/tenants/<tenant_id>`.
pub fn tenant_state_dir(state_dir: &Path, tenant_id: &str) -> PathBuf {
    state_dir.join(TENANTS_DIR).join(tenant_id)
}

#[derive(Debug, Clone)]
/// Linked-device credential directory for one tenant.
///
/// Only the `session/` subdirectory is ever wiped; sibling tenant state such
/// as pause lists survives a re-pairing.
pub struct SessionStore {
    tenant_id: String,
    session_dir: PathBuf,
}

impl SessionStore {
    pub fn for_tenant(state_dir: &Path, tenant_id: &str) -> Result<Self, SessionStoreError> {
        validate_tenant_id(tenant_id)?;
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            session_dir: tenant_state_dir(state_dir, tenant_id).join(SESSION_DIR),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn prepare(&self) -> Result<(), SessionStoreError> {
        std::fs::create_dir_all(&self.session_dir).map_err(|source| SessionStoreError::Prepare {
            path: self.session_dir.clone(),
            source,
        })
    }

    /// True when a previous pairing left artifacts behind.
    pub fn has_artifacts(&self) -> bool {
        std::fs::read_dir(&self.session_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Removes every artifact under the session directory.
    ///
    /// Idempotent: a missing directory counts as already wiped. Returns the
    /// number of top-level entries removed. Entries that fail to delete do not
    /// stop the rest from being removed; the first failure is returned.
    pub fn wipe(&self) -> Result<usize, SessionStoreError> {
        let entries = match std::fs::read_dir(&self.session_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(SessionStoreError::Wipe {
                    path: self.session_dir.clone(),
                    source,
                })
            }
        };

        let mut first_error = None;
        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(source) => {
                    first_error.get_or_insert(SessionStoreError::Wipe {
                        path: self.session_dir.clone(),
                        source,
                    });
                }
            }
        }
        let removed = remove_artifacts_best_effort(&paths, remove_artifact, &mut first_error);
        match first_error {
            Some(error) => Err(error),
            None => Ok(removed),
        }
    }
}

fn remove_artifact(path: &Path) -> std::io::Result<()> {
    let is_dir = std::fs::symlink_metadata(path)
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false);
    if is_dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Removes every path, continuing past failures; the first failure is recorded.
fn remove_artifacts_best_effort(
    paths: &[PathBuf],
    mut remove: impl FnMut(&Path) -> std::io::Result<()>,
    first_error: &mut Option<SessionStoreError>,
) -> usize {
    let mut removed = 0;
    for path in paths {
        match remove(path) {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                first_error.get_or_insert(SessionStoreError::Wipe {
                    path: path.clone(),
                    source,
                });
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::{
        remove_artifact, remove_artifacts_best_effort, tenant_state_dir, validate_tenant_id,
        SessionStore, SessionStoreError,
    };

    #[test]
    fn unit_validate_tenant_id_rejects_path_tricks() {
        for valid in ["acme", "tenant-01", "shop_2.mx"] {
            assert!(validate_tenant_id(valid).is_ok(), "{valid}");
        }
        let too_long = "x".repeat(65);
        for invalid in ["", ".", "..", "a/b", "a\\b", "tenant 1", too_long.as_str()] {
            assert!(
                matches!(
                    validate_tenant_id(invalid),
                    Err(SessionStoreError::InvalidTenantId(_))
                ),
                "{invalid}"
            );
        }
    }

    #[test]
    fn functional_wipe_clears_artifacts_and_keeps_tenant_siblings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::for_tenant(temp.path(), "acme").expect("store");
        assert_eq!(
            store.session_dir(),
            tenant_state_dir(temp.path(), "acme").join("session")
        );
        store.prepare().expect("prepare");
        std::fs::create_dir_all(store.session_dir().join("Default/IndexedDB")).expect("nested");
        std::fs::write(store.session_dir().join("creds.json"), "{}").expect("creds");
        let sibling = tenant_state_dir(temp.path(), "acme").join("conversation-pauses.json");
        std::fs::write(&sibling, "{}").expect("sibling");
        assert!(store.has_artifacts());

        assert_eq!(store.wipe().expect("wipe"), 2);
        assert!(!store.has_artifacts());
        assert!(store.session_dir().exists());
        assert!(sibling.exists());
    }

    #[test]
    fn regression_wipe_keeps_removing_after_a_failed_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ["locked.db", "creds.json", "keys.json"]
            .iter()
            .map(|name| {
                let path = temp.path().join(name);
                std::fs::write(&path, "{}").expect("artifact");
                path
            })
            .collect::<Vec<_>>();
        let mut first_error = None;
        let removed = remove_artifacts_best_effort(
            &paths,
            |path| {
                if path.ends_with("locked.db") {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "locked",
                    ))
                } else {
                    remove_artifact(path)
                }
            },
            &mut first_error,
        );
        assert_eq!(removed, 2);
        assert!(paths[0].exists());
        assert!(!paths[1].exists());
        assert!(!paths[2].exists());
        match first_error {
            Some(SessionStoreError::Wipe { path, .. }) => assert_eq!(path, paths[0]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn regression_wipe_is_idempotent_when_nothing_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::for_tenant(temp.path(), "fresh").expect("store");
        assert_eq!(store.wipe().expect("first wipe"), 0);
        store.prepare().expect("prepare");
        assert_eq!(store.wipe().expect("second wipe"), 0);
        assert_eq!(store.wipe().expect("third wipe"), 0);
    }
}
