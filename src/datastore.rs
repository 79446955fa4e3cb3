//! Layered virtual filesystem.
//!
//! One or more directories mount at `/`. Lookups walk the mounts first to
//! last; the last mount is also the write directory. Paths are virtual,
//! always `/`-rooted, and never escape a mount. Encrypted files use the
//! crate's Blowfish file envelope.

use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto;
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct Listing {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
    pub symlinks: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DataStore {
    mounts: Vec<PathBuf>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a directory at `/`. With `append` the mount is searched after
    /// the existing ones; without it the mount takes priority over them.
    pub fn add_search_path(&mut self, path: &str, append: bool) -> Result<()> {
        let mount = PathBuf::from(path);
        if !mount.is_dir() {
            tracing::error!("[datastore] not a directory: {path}");
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("mount failure: {path}"),
            )));
        }

        if append {
            self.mounts.push(mount);
        } else {
            self.mounts.insert(0, mount);
        }
        Ok(())
    }

    /// Mount a list of directories in order. The last one becomes the write
    /// directory. At least one path is required.
    pub fn add_search_paths(&mut self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no search paths given",
            )));
        }

        for path in paths {
            self.add_search_path(path, true)?;
        }
        Ok(())
    }

    fn relative(path: &str) -> Result<&str> {
        let stripped = path
            .strip_prefix('/')
            .ok_or_else(|| Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path is not absolute: {path}"),
            )))?;

        if stripped.split('/').any(|seg| seg == "..") {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path escapes the mount: {path}"),
            )));
        }

        Ok(stripped)
    }

    /// First mount containing the path, in lookup order.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rel = Self::relative(path).ok()?;
        self.mounts
            .iter()
            .map(|m| m.join(rel))
            .find(|p| fs::symlink_metadata(p).is_ok())
    }

    /// Location of the path inside the write mount.
    fn write_target(&self, path: &str) -> Result<PathBuf> {
        let rel = Self::relative(path)?;
        let mount = self.mounts.last().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no write mount configured",
            ))
        })?;
        Ok(mount.join(rel))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    pub fn file_size(&self, path: &str) -> Option<u64> {
        let target = self.resolve(path)?;
        fs::metadata(target).ok().map(|m| m.len())
    }

    /// Merged listing of a virtual directory across every mount. Earlier
    /// mounts shadow later ones entry-by-entry. With `recursive`,
    /// subdirectory contents are included; with `full_path`, entries are
    /// rendered as full virtual paths instead of names.
    pub fn get_listing(&self, path: &str, recursive: bool, full_path: bool) -> Result<Listing> {
        let rel = Self::relative(path)?;

        let mut seen = std::collections::HashSet::new();
        let mut entries: Vec<(String, bool, bool)> = Vec::new();
        let mut found_any = false;

        for mount in &self.mounts {
            let dir = mount.join(rel);
            let Ok(read_dir) = fs::read_dir(&dir) else {
                continue;
            };
            found_any = true;

            for entry in read_dir.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !seen.insert(name.clone()) {
                    continue;
                }

                let meta = match fs::symlink_metadata(entry.path()) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                entries.push((name, meta.is_dir(), meta.file_type().is_symlink()));
            }
        }

        if !found_any {
            tracing::warn!("[datastore] failed to enumerate directory: {path}");
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such directory: {path}"),
            )));
        }

        entries.sort();

        let base = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };

        let mut listing = Listing::default();
        for (name, is_dir, is_symlink) in entries {
            let rendered = if full_path {
                format!("{base}{name}")
            } else {
                name.clone()
            };

            if is_symlink {
                listing.symlinks.push(rendered);
            } else if is_dir {
                if recursive {
                    let child = self.get_listing(&format!("{base}{name}"), true, full_path)?;

                    let prefix = |v: Vec<String>| -> Vec<String> {
                        if full_path {
                            v
                        } else {
                            v.into_iter().map(|e| format!("{name}/{e}")).collect()
                        }
                    };

                    listing.files.extend(prefix(child.files));
                    listing.dirs.extend(prefix(child.dirs));
                    listing.symlinks.extend(prefix(child.symlinks));
                }
                listing.dirs.push(rendered);
            } else {
                listing.files.push(rendered);
            }
        }

        Ok(listing)
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        let target = self.write_target(path)?;
        fs::create_dir_all(target)?;
        Ok(())
    }

    /// Delete from the write mount. Directories need `recursive`.
    pub fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let target = self.write_target(path)?;
        let meta = fs::symlink_metadata(&target)?;

        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(target)?;
            } else {
                fs::remove_dir(target)?;
            }
        } else {
            fs::remove_file(target)?;
        }
        Ok(())
    }

    /// Read a whole file. Files past the u32 limit are not loadable.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {path}"),
            ))
        })?;

        let size = fs::metadata(&target)?.len();
        if size > u32::MAX as u64 {
            return Err(Error::Overflow(format!("file too large to load: {path}")));
        }

        Ok(fs::read(target)?)
    }

    /// Write a whole file into the write mount, creating parent directories
    /// as needed.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.write_target(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, data)?;
        Ok(())
    }

    /// Read and decrypt a file stored in the encrypted envelope.
    pub fn decrypt_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut data = self.read_file(path)?;
        if !crypto::decrypt_file(&mut data) {
            return Err(Error::Crypto(format!("failed to decrypt: {path}")));
        }
        Ok(data)
    }

    /// Encrypt data into the envelope and write it.
    pub fn encrypt_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut body = data.to_vec();
        crypto::encrypt_file(&mut body);
        self.write_file(path, &body)
    }

    /// SHA-1 of the file body, as lowercase hex.
    pub fn hash(&self, path: &str) -> Option<String> {
        let data = self.read_file(path).ok()?;
        if data.is_empty() {
            return None;
        }
        Some(crypto::sha1_hex(&data))
    }
}
