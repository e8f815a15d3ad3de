use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{EngineError, EngineResult};
use crate::metrics::record_lock_rejection;
use crate::models::{LockKind, UserId};
use crate::store::KeyValueStore;

/// Per-user advisory locks with a TTL. No queueing, no fencing token: a busy
/// key rejects the caller right away and an expired key simply frees the slot.
pub struct LockService {
    kv: Arc<dyn KeyValueStore>,
    lock_ttl: Duration,
    active_question_ttl: Duration,
}

impl LockService {
    pub fn new(kv: Arc<dyn KeyValueStore>, lock_ttl: Duration, active_question_ttl: Duration) -> Self {
        Self {
            kv,
            lock_ttl,
            active_question_ttl,
        }
    }

    pub fn key(user_id: UserId, kind: LockKind) -> String {
        match kind {
            LockKind::AnswerPending => format!("user:{}:has_active_question", user_id),
            other => format!("users:{}:is_generating_{}", user_id, other.as_str()),
        }
    }

    /// Runs `work` while holding `(user_id, kind)`; the key is removed on every exit path.
    pub async fn with_lock<F, T>(&self, user_id: UserId, kind: LockKind, work: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let key = Self::key(user_id, kind);
        if !self.kv.set_if_absent(&key, "1", self.lock_ttl).await? {
            record_lock_rejection(kind.as_str());
            tracing::debug!(user_id, kind = %kind, "Lock busy, rejecting");
            return Err(EngineError::AlreadyInProgress(kind));
        }

        let guard = LockGuard {
            kv: self.kv.clone(),
            key,
            user_id,
            kind,
            armed: true,
        };
        let result = work.await;
        guard.release().await;
        result
    }

    pub async fn is_busy(&self, user_id: UserId, kind: LockKind) -> EngineResult<bool> {
        Ok(self.kv.exists(&Self::key(user_id, kind)).await?)
    }

    pub async fn set_active_question(&self, user_id: UserId) -> EngineResult<()> {
        self.kv
            .set(
                &Self::key(user_id, LockKind::AnswerPending),
                "1",
                Some(self.active_question_ttl),
            )
            .await?;
        Ok(())
    }

    /// Refreshes the flag's TTL if it is still set.
    pub async fn touch_active_question(&self, user_id: UserId) -> EngineResult<()> {
        if self.is_busy(user_id, LockKind::AnswerPending).await? {
            self.set_active_question(user_id).await?;
        }
        Ok(())
    }

    pub async fn clear_active_question(&self, user_id: UserId) -> EngineResult<()> {
        self.kv
            .delete(&Self::key(user_id, LockKind::AnswerPending))
            .await?;
        Ok(())
    }
}

/// Owns a taken lock key. Released inline on the normal path; if the holder is
/// dropped first (caller timeout, aborted task, panic in `work`) the delete is
/// spawned onto the current runtime instead.
struct LockGuard {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    user_id: UserId,
    kind: LockKind,
    armed: bool,
}

impl LockGuard {
    async fn release(mut self) {
        let released = self.kv.delete(&self.key).await;
        self.armed = false;
        if let Err(e) = released {
            // the TTL reclaims it
            tracing::warn!(
                user_id = self.user_id,
                kind = %self.kind,
                error = %e,
                "Failed to release lock"
            );
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (user_id, kind) = (self.user_id, self.kind);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(user_id, kind = %kind, "No runtime to release abandoned lock");
            return;
        };
        let kv = self.kv.clone();
        let key = std::mem::take(&mut self.key);
        tracing::debug!(user_id, kind = %kind, "Releasing abandoned lock");
        runtime.spawn(async move {
            if let Err(e) = kv.delete(&key).await {
                tracing::warn!(user_id, kind = %kind, error = %e, "Failed to release lock");
            }
        });
    }
}
