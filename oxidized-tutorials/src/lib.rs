pub mod architectures;
pub mod data;
pub mod error;
pub mod layers;
pub mod models;
pub mod repository;
pub mod tokenizers;
pub mod training;
pub mod util;
