use std::path::{Path, PathBuf};

use super::repo::Repo;
use crate::error::BoxedError;

/// Repository in a directory on the local machine.
#[derive(Clone, Debug)]
pub struct LocalRepo {
    path: PathBuf,
}

impl LocalRepo {
    /// Create a local repository.
    ///
    /// * `path` - Directory containing the repository files.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Repo for LocalRepo {
    fn file(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>, BoxedError> {
        let full_path = self.path.join(path);
        Ok(full_path.is_file().then_some(full_path))
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use snafu::{report, FromString, ResultExt, Whatever};

    use super::LocalRepo;
    use crate::repository::Repo;

    #[test]
    #[report]
    fn local_repo_resolves_existing_files_only() -> Result<(), Whatever> {
        let dir = env::temp_dir().join(format!("local-repo-{}", std::process::id()));
        fs::create_dir_all(&dir).whatever_context("Cannot create repo directory")?;
        fs::write(dir.join("wiki.train.tokens"), " a b c \n")
            .whatever_context("Cannot write repo file")?;

        let repo = LocalRepo::new(&dir);
        let found = repo
            .file("wiki.train.tokens")
            .map_err(|e| Whatever::with_source(e, "Cannot look up file".to_string()))?;
        let missing = repo
            .file("wiki.test.tokens")
            .map_err(|e| Whatever::with_source(e, "Cannot look up file".to_string()))?;
        fs::remove_dir_all(&dir).whatever_context("Cannot remove repo directory")?;

        assert_eq!(found, Some(dir.join("wiki.train.tokens")));
        assert_eq!(missing, None);
        Ok(())
    }
}
