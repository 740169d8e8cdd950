use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    Result,
};

/// Typed configuration, loaded once at boot.
///
/// Runtime-tunable values (`start_from_id`, `forward_interval_minutes`) seed
/// the run-control state; operator commands mutate that state and write the
/// new values back through the settings store.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials + channel pair (immutable for the process lifetime)
    pub telegram_bot_token: String,
    pub source_channel: ChatId,
    pub target_channel: String,
    pub owner_id: UserId,

    // Initial run-control values
    pub start_from_id: i32,
    pub forward_interval_minutes: u64,

    // Persistence
    pub progress_file: PathBuf,
    pub env_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_file = env_path("ENV_FILE").unwrap_or_else(|| PathBuf::from(".env"));
        load_dotenv_if_present(&env_file);

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let source_channel = env_i64("SOURCE_CHANNEL").map(ChatId).ok_or_else(|| {
            Error::Config("SOURCE_CHANNEL environment variable is required".to_string())
        })?;

        let target_channel = env_str("TARGET_CHANNEL")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("TARGET_CHANNEL environment variable is required".to_string())
            })?;

        // A zero owner would silently match nobody; fail fast instead.
        let owner_id = env_i64("OWNER_ID")
            .filter(|id| *id != 0)
            .map(UserId)
            .ok_or_else(|| {
                Error::Config("OWNER_ID environment variable is required".to_string())
            })?;

        let start_from_id = env_i32("START_FROM_ID").unwrap_or(0);
        if start_from_id < 0 {
            return Err(Error::Config(format!(
                "START_FROM_ID must be non-negative, got {start_from_id}"
            )));
        }

        let forward_interval_minutes = env_u64("FORWARD_INTERVAL_MINUTES").unwrap_or(10);

        let progress_file =
            env_path("PROGRESS_FILE").unwrap_or_else(|| PathBuf::from("progress.json"));

        Ok(Self {
            telegram_bot_token,
            source_channel,
            target_channel,
            owner_id,
            start_from_id,
            forward_interval_minutes,
            progress_file,
            env_file,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_i32(key: &str) -> Option<i32> {
    env_str(key).and_then(|s| s.trim().parse::<i32>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
