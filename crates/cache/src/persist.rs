use crate::error::{CacheError, Result};
use crate::federation::PersistedEntry;
use crate::session::Session;
use std::path::{Path, PathBuf};

const CACHE_FILE: &str = "cache.json";

/// JSON persistence for sessions and cache entries.
///
/// The base directory is created `0700`; every path is re-validated on
/// read to lie strictly inside it, so traversal-style names and symlinks
/// pointing elsewhere abort before any file is opened. Files that do not
/// match the `session-<id>.json` / `cache.json` shapes are ignored on load.
pub struct PersistentStore {
    base_dir: PathBuf,
}

impl PersistentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        create_private_dir(&base_dir)?;
        Ok(Self { base_dir })
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let name = session_file_name(&session.id)?;
        let path = self.contained(&name)?;
        write_atomic(&path, &serde_json::to_vec_pretty(session)?)
    }

    pub fn load_session(&self, id: &str) -> Result<Session> {
        let name = session_file_name(id)?;
        let path = self.contained(&name)?;
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let name = session_file_name(id)?;
        let path = self.contained(&name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Load every persisted session, skipping foreign or unparseable files.
    pub fn load_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_session_file_name(name) {
                continue;
            }
            let path = match self.contained(name) {
                Ok(path) => path,
                Err(err) => {
                    log::warn!("skipping {name}: {err}");
                    continue;
                }
            };
            match std::fs::read(&path)
                .map_err(CacheError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<Session>(&bytes)?))
            {
                Ok(session) => sessions.push(session),
                Err(err) => log::warn!("skipping unreadable session file {name}: {err}"),
            }
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    pub fn save_cache(&self, entries: &[PersistedEntry]) -> Result<()> {
        let path = self.contained(CACHE_FILE)?;
        write_atomic(&path, &serde_json::to_vec_pretty(entries)?)
    }

    pub fn load_cache(&self) -> Result<Vec<PersistedEntry>> {
        let path = self.contained(CACHE_FILE)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Join `name` onto the base directory and prove the result still lives
    /// inside it. Separators and parent components in `name` are rejected
    /// outright; symlinked escapes fail the canonical prefix check.
    fn contained(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(CacheError::PathEscape(PathBuf::from(name)));
        }
        let path = self.base_dir.join(name);

        let canonical_base = self
            .base_dir
            .canonicalize()
            .unwrap_or_else(|_| self.base_dir.clone());
        // The file itself may not exist yet (first write); validate the
        // closest existing ancestor instead.
        let probe = if path.exists() {
            path.canonicalize()?
        } else {
            canonical_base.join(name)
        };
        if !probe.starts_with(&canonical_base) {
            return Err(CacheError::PathEscape(path));
        }
        Ok(path)
    }
}

fn session_file_name(id: &str) -> Result<String> {
    let suffix = id
        .strip_prefix("session-")
        .ok_or_else(|| CacheError::InvalidSessionId(id.to_string()))?;
    if suffix.is_empty()
        || !suffix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(CacheError::InvalidSessionId(id.to_string()));
    }
    Ok(format!("{id}.json"))
}

fn is_session_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".json") else {
        return false;
    };
    let Some(suffix) = stem.strip_prefix("session-") else {
        return false;
    };
    !suffix.is_empty()
        && suffix
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn create_private_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}
