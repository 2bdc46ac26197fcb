//! Character-level recurrent network for generating names.

mod model;
pub use model::{CharRnn, CharRnnConfig, CharRnnError};

mod sample;
pub use sample::{SampleConfig, SampleError, SamplingStrategy};
