use crate::core::errors::{BackendError, ComicError, ComicResult};
use crate::services::keys::KeyPool;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;

const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "quota", "resource_exhausted"];

// A typed BackendError in the chain decides; untyped errors fall back to
// substring matching.
pub fn is_rate_limit(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(backend) = cause.downcast_ref::<BackendError>() {
            return matches!(backend, BackendError::RateLimited(_));
        }
    }
    let text = format!("{:#}", err).to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| text.contains(marker))
}

#[derive(Debug, Clone)]
pub struct Executor {
    pool: Arc<KeyPool>,
}

impl Executor {
    pub fn new(pool: Arc<KeyPool>) -> Self {
        Self { pool }
    }

    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> ComicResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let attempts = self.pool.size();
        if attempts == 0 {
            return Err(ComicError::NoCredentials);
        }

        let mut last_error = None;
        for attempt in 1..=attempts {
            let (key, index) = self.pool.next().ok_or(ComicError::NoCredentials)?;
            debug!("Backend call attempt {}/{} with key {}", attempt, attempts, index);

            match operation(key).await {
                Ok(value) => return Ok(value),
                Err(e) if is_rate_limit(&e) => {
                    warn!(
                        "API key {} rate limited ({}/{}): {:#}",
                        index, attempt, attempts, e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(ComicError::Backend(e)),
            }
        }

        Err(ComicError::AllCredentialsExhausted {
            attempts,
            last: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempt recorded")),
        })
    }
}
