use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ProgressData {
    last_id: i32,
}

/// Durable checkpoint: the id of the last message successfully forwarded.
///
/// This is the only durable state the forwarder keeps. A missing or corrupt
/// file degrades to "no checkpoint" (0) rather than failing the run.
#[derive(Clone, Debug)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Last persisted checkpoint, or 0 if none exists or it is unreadable.
    pub fn load(&self) -> i32 {
        let Ok(txt) = fs::read_to_string(&self.path) else {
            return 0;
        };
        match serde_json::from_str::<ProgressData>(&txt) {
            Ok(data) if data.last_id >= 0 => data.last_id,
            _ => 0,
        }
    }

    /// Overwrite the checkpoint. Writes to a sibling temp file and renames it
    /// into place so a concurrent reader never observes a torn write.
    pub fn save(&self, last_id: i32) -> Result<()> {
        let txt = serde_json::to_string(&ProgressData { last_id })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, txt)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
