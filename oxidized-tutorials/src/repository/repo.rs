use std::path::{Path, PathBuf};

use crate::error::BoxedError;

/// Source of corpus files, such as a local directory or a dataset on the
/// Hugging Face Hub.
pub trait Repo
where
    Self: Sized,
{
    /// Resolve `path` within the repository to a local file.
    ///
    /// Remote files are downloaded first. Returns `None` when the
    /// repository has no such file.
    fn file(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>, BoxedError>;
}
