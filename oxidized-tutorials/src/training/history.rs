use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use snafu::{ResultExt, Snafu};

/// Loss history errors.
#[derive(Debug, Snafu)]
pub enum LossHistoryError {
    #[snafu(display("Cannot write loss history to '{}'", path.display()))]
    WriteHistory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Loss curve.
///
/// Observed losses are averaged over windows of `interval` observations,
/// every complete window adds one point to the curve.
#[derive(Clone, Debug)]
pub struct LossHistory {
    interval: usize,
    points: Vec<f32>,
    window_len: usize,
    window_sum: f32,
}

impl LossHistory {
    /// Create a loss history that averages over `interval` observations.
    pub fn new(interval: usize) -> Self {
        LossHistory {
            interval: interval.max(1),
            points: Vec::new(),
            window_len: 0,
            window_sum: 0.0,
        }
    }

    /// Record a loss.
    ///
    /// Returns the new point when the loss completes a window.
    pub fn observe(&mut self, loss: f32) -> Option<f32> {
        self.window_sum += loss;
        self.window_len += 1;
        if self.window_len < self.interval {
            return None;
        }

        let mean = self.window_sum / self.window_len as f32;
        self.points.push(mean);
        self.window_len = 0;
        self.window_sum = 0.0;
        Some(mean)
    }

    /// Averaged losses.
    pub fn points(&self) -> &[f32] {
        &self.points
    }

    /// Write the curve as CSV with the columns `step` and `loss`.
    ///
    /// The step of a point is the number of observations up to and
    /// including its window.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), LossHistoryError> {
        let path = path.as_ref();
        let write = || -> std::io::Result<()> {
            let mut writer = BufWriter::new(File::create(path)?);
            writeln!(writer, "step,loss")?;
            for (idx, loss) in self.points.iter().enumerate() {
                writeln!(writer, "{},{loss}", (idx + 1) * self.interval)?;
            }
            writer.flush()
        };
        write().context(WriteHistorySnafu { path })
    }
}

/// Format a duration as minutes and seconds, e.g. `2m 5s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
