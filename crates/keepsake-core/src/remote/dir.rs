//! Directory-backed blob store.
//!
//! Each blob is a file under the root directory; the blob name is its
//! relative path and doubles as its id. Writes go to a temporary sibling and
//! are renamed into place so readers never observe a half-written blob.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::{BlobError, BlobId, BlobMeta, BlobStore};

const TMP_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe || name.ends_with(TMP_SUFFIX) {
            return Err(BlobError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<BlobMeta>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                self.collect(&path, out)?;
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }

            let modified_time = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
            out.push(BlobMeta {
                id: name.clone(),
                name,
                size: meta.len(),
                modified_time,
            });
        }
        Ok(())
    }
}

impl BlobStore for DirBlobStore {
    fn find_by_name(&self, name: &str) -> Result<Option<BlobId>, BlobError> {
        let path = self.path_for(name)?;
        Ok(path.is_file().then(|| name.to_string()))
    }

    fn list(&self) -> Result<Vec<BlobMeta>, BlobError> {
        let mut out = Vec::new();
        self.collect(&self.root, &mut out)?;
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn create_or_replace(&self, name: &str, bytes: &[u8]) -> Result<BlobId, BlobError> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp_name);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(name.to_string())
    }

    fn read(&self, id: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BlobError::NotFound(id.to_string()),
            _ => BlobError::Io(e),
        })
    }

    fn delete(&self, id: &str) -> Result<(), BlobError> {
        let path = self.path_for(id)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BlobError::NotFound(id.to_string()),
            _ => BlobError::Io(e),
        })
    }
}
