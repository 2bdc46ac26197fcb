//! Sources of data files.

mod hf_hub;
pub use hf_hub::{HfHubRepo, HfHubRepoError, RepoType};

mod local;
pub use local::LocalRepo;

mod repo;
pub use repo::Repo;
