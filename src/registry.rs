//! registry — process-wide table of shared locks keyed by canonical path.
//!
//! Every handle created for the same `LockKey` in one process points at the same
//! `SharedLock` (same gate, same OS slot), so threads coordinate through one object.
//! Entries are never evicted: the table is append-only for the life of the registry.
//!
//! Public API:
//! - `lock_file(path, timeout)` — handle from the global registry.
//! - `LockRegistry::global()` / `LockRegistry::new(cfg)`.
//! - `LockRegistry::get_or_create(path)` — handle with the configured default timeout.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::debug;

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::handle::{LockHandle, SharedLock};
use crate::metrics;
use crate::timeout::Timeout;

/// Canonical absolute path naming a lock.
///
/// Resolution: the longest existing ancestor of the absolute path is canonicalized
/// (symlinks resolved, `..` applied by the OS) and the components that do not exist yet
/// are appended, folding `.` and `..` lexically only within that missing tail. The lock file
/// itself need not exist. If no ancestor can be canonicalized, the lexically normalized
/// absolute path is used, so a parent created later through a symlink can map to a
/// different key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockKey(PathBuf);

impl LockKey {
    pub fn resolve(path: &Path) -> Result<Self> {
        let invalid = || LockError::InvalidPath {
            path: path.to_path_buf(),
        };
        // `/`, `x/..` and friends name no file.
        path.file_name().ok_or_else(invalid)?;
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| LockError::io("resolve current dir for", path, e))?
                .join(path)
        };

        let resolved = abs
            .ancestors()
            .find_map(|dir| {
                let base = fs::canonicalize(dir).ok()?;
                let rest = abs.strip_prefix(dir).ok()?;
                Some(fold_onto(base, rest))
            })
            .unwrap_or_else(|| normalize_lexically(&abs));

        if resolved.file_name().is_none() {
            return Err(invalid());
        }
        Ok(LockKey(resolved))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Drop `.` and fold `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    fold_onto(PathBuf::new(), path)
}

/// Append `rest` to `base`, dropping `.` and folding `..` lexically.
fn fold_onto(mut out: PathBuf, rest: &Path) -> PathBuf {
    for comp in rest.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                if !matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct LockRegistry {
    cfg: LockConfig,
    map: Mutex<HashMap<LockKey, Arc<SharedLock>>>,
}

static GLOBAL: OnceLock<LockRegistry> = OnceLock::new();

impl LockRegistry {
    pub fn new(cfg: LockConfig) -> Self {
        Self {
            cfg,
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry, configured from the environment on first use.
    pub fn global() -> &'static LockRegistry {
        GLOBAL.get_or_init(|| {
            let cfg = LockConfig::from_env();
            debug!("locket: global registry initialized with {}", cfg);
            LockRegistry::new(cfg)
        })
    }

    pub fn config(&self) -> &LockConfig {
        &self.cfg
    }

    /// Handle for `path` using the registry's default timeout.
    pub fn get_or_create(&self, path: impl AsRef<Path>) -> Result<LockHandle> {
        let shared = self.shared_for(path.as_ref())?;
        Ok(LockHandle::new(
            shared,
            self.cfg.default_timeout,
            self.cfg.retry_period,
        ))
    }

    /// Handle for `path` with an explicit timeout.
    pub fn lock_file(
        &self,
        path: impl AsRef<Path>,
        timeout: impl Into<Timeout>,
    ) -> Result<LockHandle> {
        Ok(self.get_or_create(path)?.with_timeout(timeout))
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shared_for(&self, path: &Path) -> Result<Arc<SharedLock>> {
        if self.cfg.create_parent_dirs {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|e| LockError::io("create lock dir", dir, e))?;
            }
        }
        let key = LockKey::resolve(path)?;

        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(shared) = map.get(&key) {
            return Ok(shared.clone());
        }
        debug!("locket: registering {}", key);
        let shared = Arc::new(SharedLock::new(key.clone()));
        map.insert(key, shared.clone());
        metrics::record_registry_entry();
        Ok(shared)
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

/// Handle for `path` from the global registry.
///
/// `timeout` accepts a `Timeout`, a `Duration` (zero = non-blocking) or
/// `Option<Duration>` (`None` = block forever).
pub fn lock_file(path: impl AsRef<Path>, timeout: impl Into<Timeout>) -> Result<LockHandle> {
    LockRegistry::global().lock_file(path, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn unique_root(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("locket-reg-{prefix}-{pid}-{t}-{id}"))
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c.lock")),
            PathBuf::from("/a/c.lock")
        );
        assert_eq!(
            normalize_lexically(Path::new("/../x.lock")),
            PathBuf::from("/x.lock")
        );
    }

    #[test]
    fn path_variants_resolve_to_one_key() -> anyhow::Result<()> {
        let root = unique_root("variants");
        fs::create_dir_all(root.join("sub"))?;

        let a = LockKey::resolve(&root.join("x.lock"))?;
        let b = LockKey::resolve(&root.join("sub").join("..").join("x.lock"))?;
        let c = LockKey::resolve(&root.join(".").join("x.lock"))?;
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(a.as_path().is_absolute());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_dir_resolves_to_target_key() -> anyhow::Result<()> {
        let root = unique_root("symlink");
        fs::create_dir_all(root.join("real"))?;
        std::os::unix::fs::symlink(root.join("real"), root.join("alias"))?;

        let a = LockKey::resolve(&root.join("real").join("x.lock"))?;
        let b = LockKey::resolve(&root.join("alias").join("x.lock"))?;
        assert_eq!(a, b);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn dotdot_after_symlink_follows_link_target() -> anyhow::Result<()> {
        let root = unique_root("symlink-dotdot");
        fs::create_dir_all(root.join("real").join("sub"))?;
        std::os::unix::fs::symlink(root.join("real").join("sub"), root.join("link"))?;

        // The OS resolves link/.. to real, not to root.
        let via_link = LockKey::resolve(&root.join("link").join("..").join("x.lock"))?;
        let direct = LockKey::resolve(&root.join("real").join("x.lock"))?;
        assert_eq!(via_link, direct);

        let reg = LockRegistry::default();
        let h = reg.get_or_create(root.join("link").join("..").join("x.lock"))?;
        h.acquire()?;
        assert!(root.join("real").join("x.lock").exists());
        assert!(!root.join("x.lock").exists());

        // Another registry stands in for another process naming the real path.
        let other = LockRegistry::default().get_or_create(root.join("real").join("x.lock"))?;
        assert!(matches!(
            other.acquire_with(Timeout::NonBlocking),
            Err(LockError::WouldBlock { .. })
        ));
        h.release()?;
        Ok(())
    }

    #[test]
    fn missing_tail_is_folded_onto_existing_ancestor() -> anyhow::Result<()> {
        let root = unique_root("missing-tail");
        fs::create_dir_all(&root)?;

        let a = LockKey::resolve(&root.join("nope").join("..").join("x.lock"))?;
        let b = LockKey::resolve(&root.join("x.lock"))?;
        assert_eq!(a, b);

        let deep = LockKey::resolve(&root.join("a").join("b").join("x.lock"))?;
        assert!(deep.as_path().ends_with("a/b/x.lock"));
        Ok(())
    }

    #[test]
    fn pathless_names_are_rejected() {
        assert!(matches!(
            LockKey::resolve(Path::new("/")),
            Err(LockError::InvalidPath { .. })
        ));
        assert!(matches!(
            LockKey::resolve(Path::new("some/dir/..")),
            Err(LockError::InvalidPath { .. })
        ));
    }

    #[test]
    fn same_path_shares_entry_and_different_paths_do_not() -> anyhow::Result<()> {
        let root = unique_root("entries");
        fs::create_dir_all(&root)?;
        let reg = LockRegistry::default();

        let a = reg.get_or_create(root.join("a.lock"))?;
        let a2 = reg.lock_file(root.join("a.lock"), Timeout::NonBlocking)?;
        let b = reg.get_or_create(root.join("b.lock"))?;

        assert!(a.shares_gate_with(&a2));
        assert!(!a.shares_gate_with(&b));
        assert_eq!(reg.len(), 2);
        // Registration alone does not create the file.
        assert!(!root.join("a.lock").exists());
        Ok(())
    }

    #[test]
    fn separate_registries_do_not_share() -> anyhow::Result<()> {
        let root = unique_root("separate");
        fs::create_dir_all(&root)?;
        let r1 = LockRegistry::default();
        let r2 = LockRegistry::default();
        let a = r1.get_or_create(root.join("a.lock"))?;
        let b = r2.get_or_create(root.join("a.lock"))?;
        assert!(!a.shares_gate_with(&b));
        Ok(())
    }

    #[test]
    fn create_parent_dirs_builds_missing_chain() -> anyhow::Result<()> {
        let root = unique_root("mkdirs");
        let path = root.join("a").join("b").join("x.lock");

        let reg = LockRegistry::new(LockConfig::default().with_create_parent_dirs(true));
        let h = reg.get_or_create(&path)?;
        assert!(root.join("a").join("b").is_dir());
        assert!(!path.exists());
        assert_eq!(h.timeout(), Timeout::Forever);
        Ok(())
    }

    #[test]
    fn concurrent_registration_yields_one_entry() -> anyhow::Result<()> {
        let root = unique_root("concurrent");
        fs::create_dir_all(&root)?;
        let reg = Arc::new(LockRegistry::default());
        let path = root.join("x.lock");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let path = path.clone();
                std::thread::spawn(move || reg.get_or_create(&path))
            })
            .collect();
        let got = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(reg.len(), 1);
        assert!(got.windows(2).all(|w| w[0].shares_gate_with(&w[1])));
        Ok(())
    }
}
