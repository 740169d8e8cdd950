use std::{env, fs, path::PathBuf};

use crate::Result;

/// Runtime-tunable settings, persisted as `KEY=value` lines in the env file.
///
/// `set` mirrors the value into the process environment immediately and then
/// rewrites the file: an existing `KEY=` line is replaced in place, a new key
/// is appended. If the file does not exist only the env mirror is updated;
/// settings are read back through `Config::load` at the next boot.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        env::set_var(key, value);

        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Ok(());
        };

        let mut lines = Vec::new();
        let mut found = false;
        for line in contents.lines() {
            if line.starts_with(&format!("{key}=")) {
                lines.push(format!("{key}={value}"));
                found = true;
            } else {
                lines.push(line.to_string());
            }
        }
        if !found {
            lines.push(format!("{key}={value}"));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        fs::write(&self.path, out)?;
        Ok(())
    }
}
