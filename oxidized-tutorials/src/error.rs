use std::error::Error;

/// Type-erased error returned by the `Build*` traits and other trait seams
/// whose implementations fail in different ways.
pub type BoxedError = Box<dyn Error + Send + Sync>;
