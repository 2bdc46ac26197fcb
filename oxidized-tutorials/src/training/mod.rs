//! Training loops, schedules, and checkpoints.

mod checkpoint;
pub use checkpoint::{Checkpoint, CheckpointError, CONFIG_FILE, MODEL_FILE, VOCAB_FILE};

mod clip;
pub use clip::clip_grad_norm;

mod history;
pub use history::{format_elapsed, LossHistory, LossHistoryError};

mod lm;
pub use lm::{EpochReport, FitReport, LmTrainer, LmTrainerConfig, LmTrainerError};

mod lr;
pub use lr::StepLr;

mod names;
pub use names::{NamesCheckpointConfig, NamesTrainer, NamesTrainerConfig, NamesTrainerError};
