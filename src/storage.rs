use std::path::{Path, PathBuf};

use crate::eid::Eid;

pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;

    /// Write several files as one unit.
    ///
    /// Every file is staged under a temporary name first. If any staging
    /// write fails, all staged files are removed and no target is touched.
    fn commit(&self, files: &[(&str, Vec<u8>)]) -> std::io::Result<()>;
}

#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn path(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }

    fn temp_path(&self, ident: &str) -> PathBuf {
        self.base_dir.join(format!("{}-{ident}.tmp", Eid::new()))
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(ident))
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self.temp_path(ident);

        if let Err(err) = std::fs::write(&temp_path, data) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, self.path(ident))
    }

    fn commit(&self, files: &[(&str, Vec<u8>)]) -> std::io::Result<()> {
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());

        for (ident, data) in files {
            let temp_path = self.temp_path(ident);
            if let Err(err) = std::fs::write(&temp_path, data) {
                let _ = std::fs::remove_file(&temp_path);
                for (temp, _) in &staged {
                    let _ = std::fs::remove_file(temp);
                }
                return Err(err);
            }
            staged.push((temp_path, self.path(ident)));
        }

        let mut staged = staged.into_iter();
        while let Some((temp, target)) = staged.next() {
            if let Err(err) = std::fs::rename(&temp, &target) {
                let _ = std::fs::remove_file(&temp);
                for (temp, _) in staged {
                    let _ = std::fs::remove_file(temp);
                }
                return Err(err);
            }
        }

        Ok(())
    }
}
