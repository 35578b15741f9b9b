//! Local keybox cache: a flat directory of `<name>.xml` files plus a
//! `backup/` directory that receives the previous contents of any entry
//! replaced by a forced import.
//!
//! The existence check and the write in [`KeyboxCache::import`] are not
//! atomic; concurrent writers to one cache need external locking.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::error::{KeyboxError, Result};

pub const KEYBOX_EXTENSION: &str = "xml";
pub const DEFAULT_BACKUP_DIRECTORY: &str = "backup";

#[derive(Debug, Clone)]
pub struct KeyboxCache {
    root: PathBuf,
    backup_dir: PathBuf,
}

impl KeyboxCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_backup(root, DEFAULT_BACKUP_DIRECTORY)
    }

    pub fn open_with_backup(root: impl Into<PathBuf>, backup_name: &str) -> Result<Self> {
        let root = root.into();
        let backup_dir = root.join(backup_name);
        fs::create_dir_all(&backup_dir)?;
        debug!("Keybox cache at {}", root.display());
        Ok(Self { root, backup_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Names of cached keyboxes, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || !has_keybox_extension(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of entry `name` inside the cache.
    ///
    /// # Errors
    /// [`KeyboxError::InvalidCacheName`] unless `name` is a single plain file
    /// name, so no entry can resolve outside the cache directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path_for(name)?)?)
    }

    /// Store `bytes` as `name`.
    ///
    /// Fails with [`KeyboxError::ImportConflict`] when `name` exists and
    /// `overwrite` is false; the existing file is left untouched. With
    /// `overwrite`, the previous file is first copied into the backup
    /// directory.
    pub fn import(&self, bytes: &[u8], name: &str, overwrite: bool) -> Result<PathBuf> {
        let target = self.path_for(name)?;
        if target.exists() {
            if !overwrite {
                return Err(KeyboxError::ImportConflict(target));
            }
            let backup = self.backup_path(name);
            fs::copy(&target, &backup)?;
            info!("Backed up existing '{}' to {}", name, backup.display());
        }
        fs::write(&target, bytes)?;
        info!("Imported keybox as {}", target.display());
        Ok(target)
    }

    /// `<name>.<unix seconds>.bak`, with a `.<n>` suffix added when an
    /// earlier backup in the same second already took that name.
    fn backup_path(&self, name: &str) -> PathBuf {
        let stem = format!("{}.{}", name, unix_seconds());
        let mut backup = self.backup_dir.join(format!("{}.bak", stem));
        let mut n = 1;
        while backup.exists() {
            backup = self.backup_dir.join(format!("{}.{}.bak", stem, n));
            n += 1;
        }
        backup
    }
}

fn validate_name(name: &str) -> Result<()> {
    let plain = !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(OsStr::new(name));
    if plain {
        Ok(())
    } else {
        Err(KeyboxError::InvalidCacheName(name.to_string()))
    }
}

/// Cache file name for an import: the explicit name (with `.xml` appended
/// when missing) or `<first leaf serial>.xml`.
pub fn target_file_name(explicit: Option<&str>, first_leaf_serial: &str) -> String {
    match explicit {
        Some(name) if name.ends_with(".xml") => name.to_string(),
        Some(name) => format!("{}.{}", name, KEYBOX_EXTENSION),
        None => format!("{}.{}", first_leaf_serial, KEYBOX_EXTENSION),
    }
}

pub fn has_keybox_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(KEYBOX_EXTENSION))
        .unwrap_or(false)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_backup_directory() {
        let dir = TempDir::new().unwrap();
        let cache = KeyboxCache::open(dir.path().join("keyboxes")).unwrap();
        assert!(cache.root().is_dir());
        assert!(cache.backup_dir().is_dir());
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_target_file_name() {
        assert_eq!(target_file_name(Some("pixel"), "abc"), "pixel.xml");
        assert_eq!(target_file_name(Some("pixel.xml"), "abc"), "pixel.xml");
        assert_eq!(target_file_name(None, "a1b2c3"), "a1b2c3.xml");
    }

    #[test]
    fn test_list_only_reports_xml_files() {
        let dir = TempDir::new().unwrap();
        let cache = KeyboxCache::open(dir.path()).unwrap();
        cache.import(b"<b/>", "b.xml", false).unwrap();
        cache.import(b"<a/>", "a.xml", false).unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(cache.list().unwrap(), vec!["a.xml", "b.xml"]);
    }

    #[test]
    fn test_conflict_leaves_existing_file_untouched() {
        let dir = TempDir::new().unwrap();
        let cache = KeyboxCache::open(dir.path()).unwrap();
        cache.import(b"original", "k.xml", false).unwrap();

        let err = cache.import(b"replacement", "k.xml", false).unwrap_err();
        assert!(matches!(err, KeyboxError::ImportConflict(_)));
        assert_eq!(cache.read("k.xml").unwrap(), b"original");
    }

    #[test]
    fn test_overwrite_backs_up_previous_file() {
        let dir = TempDir::new().unwrap();
        let cache = KeyboxCache::open(dir.path()).unwrap();
        cache.import(b"original", "k.xml", false).unwrap();
        cache.import(b"replacement", "k.xml", true).unwrap();

        assert_eq!(cache.read("k.xml").unwrap(), b"replacement");
        let backups: Vec<PathBuf> = fs::read_dir(cache.backup_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(backups.len(), 1);
        let backup_name = backups[0].file_name().unwrap().to_str().unwrap();
        assert!(backup_name.starts_with("k.xml."));
        assert!(backup_name.ends_with(".bak"));
        assert_eq!(fs::read(&backups[0]).unwrap(), b"original");
    }

    #[test]
    fn test_names_outside_the_cache_are_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = KeyboxCache::open(dir.path().join("cache")).unwrap();
        let outside = dir.path().join("outside.xml");

        for name in [
            outside.to_str().unwrap(),
            "../outside.xml",
            "..",
            ".",
            "",
            "sub/k.xml",
            "sub\\k.xml",
        ] {
            let err = cache.import(b"escaped", name, true).unwrap_err();
            assert!(matches!(err, KeyboxError::InvalidCacheName(_)), "{}", name);
            assert!(matches!(
                cache.read(name).unwrap_err(),
                KeyboxError::InvalidCacheName(_)
            ));
        }
        assert!(!outside.exists());
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_overwrites_keep_every_backup() {
        let dir = TempDir::new().unwrap();
        let cache = KeyboxCache::open(dir.path()).unwrap();
        cache.import(b"first", "k.xml", false).unwrap();
        cache.import(b"second", "k.xml", true).unwrap();
        cache.import(b"third", "k.xml", true).unwrap();

        let mut backups: Vec<Vec<u8>> = fs::read_dir(cache.backup_dir())
            .unwrap()
            .map(|e| fs::read(e.unwrap().path()).unwrap())
            .collect();
        backups.sort();
        assert_eq!(backups, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(cache.read("k.xml").unwrap(), b"third");
    }
}
