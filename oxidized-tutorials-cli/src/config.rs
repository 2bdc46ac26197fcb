use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use snafu::{ResultExt, Whatever};

/// Read a JSON configuration file, or use the default configuration.
pub fn read_config<C>(path: Option<&Path>) -> Result<C, Whatever>
where
    C: Default + DeserializeOwned,
{
    let Some(path) = path else {
        return Ok(C::default());
    };

    let reader = BufReader::new(File::open(path).with_whatever_context(|_| {
        format!("Cannot open configuration '{}'", path.display())
    })?);
    serde_json::from_reader(reader)
        .with_whatever_context(|_| format!("Cannot parse configuration '{}'", path.display()))
}
