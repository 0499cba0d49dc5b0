use std::path::{Path, PathBuf};

/// Scratch directory under the system temp dir, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "grader-{}-{:08x}",
            prefix,
            rand::random::<u32>()
        ));
        fsutil::mkdir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, rel: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.path.join(rel);
        fsutil::write_with_mkdir(&path, contents).unwrap();
        path
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> String {
        fsutil::read_to_string(self.path.join(rel)).unwrap()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
