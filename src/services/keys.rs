use crate::core::config::BackendConfig;
use crate::core::errors::{ComicError, ComicResult};
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Merges the primary key (first) with any additional keys, dropping blank
/// entries and repeats.
pub fn load_credentials(primary: &str, additional: &[String]) -> ComicResult<Vec<String>> {
    let mut keys: Vec<String> = Vec::new();
    for key in std::iter::once(primary).chain(additional.iter().map(String::as_str)) {
        let key = key.trim();
        if key.is_empty() || keys.iter().any(|k| k == key) {
            continue;
        }
        keys.push(key.to_string());
    }

    if keys.is_empty() {
        return Err(ComicError::Configuration(
            "no API key configured; set backend.api_key or STORY2COMIC_API_KEY".to_string(),
        ));
    }
    Ok(keys)
}

#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &BackendConfig) -> ComicResult<Self> {
        let keys = load_credentials(&config.primary_key(), &config.extra_api_keys)?;
        debug!("Loaded {} API key(s)", keys.len());
        Ok(Self::new(keys))
    }

    pub fn next(&self) -> Option<(String, usize)> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }
        // fetch_update keeps the stored value in [0, len) instead of letting
        // it grow unbounded and wrap.
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        Some((self.keys[index].clone(), index))
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn all(&self) -> Vec<String> {
        self.keys.clone()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}
