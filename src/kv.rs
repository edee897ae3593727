//! Key-value store with expiry, and the per-user exclusive-action lock built on it.

use crate::auth::Session;
use crate::error::AppError;
use crate::state::AppContext;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// How long a held lock survives a crashed handler.
pub const LOCK_TTL: Duration = Duration::from_secs(90);
/// Remaining lifetime of a lock once its action has finished.
pub const LOCK_RELEASE: Duration = Duration::from_millis(300);

#[async_trait]
pub trait KvStore: Send + Sync {
    /// `SET key value NX EX ttl`: true when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError>;
    /// `PEXPIRE key ttl XX`: true when the key existed.
    async fn pexpire_xx(&self, key: &str, ttl: Duration) -> Result<bool, AppError>;
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn del(&self, key: &str) -> Result<bool, AppError>;
}

struct Slot {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryKv {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<T>(&self, f: impl FnOnce(&mut HashMap<String, Slot>, Instant) -> T) -> Result<T, AppError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| AppError::Store(format!("kv lock poisoned: {}", e)))?;
        let now = Instant::now();
        slots.retain(|_, s| s.expires_at > now);
        Ok(f(&mut slots, now))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        self.with_live(|slots, now| {
            if slots.contains_key(key) {
                return false;
            }
            slots.insert(
                key.to_string(),
                Slot {
                    value: value.to_string(),
                    expires_at: now + ttl,
                },
            );
            true
        })
    }

    async fn pexpire_xx(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        self.with_live(|slots, now| match slots.get_mut(key) {
            Some(slot) => {
                slot.expires_at = now + ttl;
                true
            }
            None => false,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        self.with_live(|slots, _| slots.get(key).map(|s| s.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<bool, AppError> {
        self.with_live(|slots, _| slots.remove(key).is_some())
    }
}

pub fn lock_key(user_id: i64) -> String {
    format!("plock:{}", user_id)
}

/// One exclusive action per user at a time; a held lock is `429`. The lock is released by
/// shortening its expiry once the handler has produced a response, whatever the outcome.
pub async fn exclusive_lock(State(ctx): State<AppContext>, request: Request, next: Next) -> Result<Response, AppError> {
    let session = request
        .extensions()
        .get::<Session>()
        .copied()
        .ok_or(AppError::Unauthorized)?;
    let key = lock_key(session.user_id);
    if !ctx.kv.set_nx_ex(&key, "1", LOCK_TTL).await? {
        tracing::warn!(user_id = session.user_id, path = %request.uri().path(), "exclusive action already running");
        return Err(AppError::TooManyRequests);
    }
    let response = next.run(request).await;
    if let Err(e) = ctx.kv.pexpire_xx(&key, LOCK_RELEASE).await {
        tracing::warn!(error = %e, user_id = session.user_id, "exclusive lock not released");
    }
    Ok(response)
}
