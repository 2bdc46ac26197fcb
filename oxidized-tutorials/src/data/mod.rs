//! Training data for the tutorials.

pub mod corpus;

pub mod names;
