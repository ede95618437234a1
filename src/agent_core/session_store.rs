//! In-memory session store with idle expiry.
//!
//! Sessions live for the process lifetime at most. Each session gets a
//! deferred sweep at creation; when it fires, the session is removed only if
//! it is still idle, otherwise the sweep re-arms for the remaining idle
//! window. At most one turn runs per session, enforced by [`TurnGuard`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::AgentError;
use super::types::{Session, SessionHistory, SessionPatch, SessionSummary};

/// Default idle window before a session is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

// ─── Clock ──────────────────────────────────────────────────────────────────

/// Time source for activity stamps and idle checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock anchored at construction and advanced by the tokio clock.
///
/// Under a paused test runtime, advancing tokio time advances this clock.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_wall: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.anchor);
        self.anchor_wall + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

// ─── Store ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Entry {
    session: Session,
    /// A turn is in flight.
    busy: bool,
}

struct StoreInner {
    sessions: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl StoreInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove the session if it is idle and not busy. The check and the
    /// removal happen under one lock, so a turn cannot start in between.
    fn expire_if_idle(&self, id: &str) -> SweepOutcome {
        let mut sessions = self.lock();
        let Some(entry) = sessions.get(id) else {
            return SweepOutcome::Gone;
        };
        let idle = (self.clock.now() - entry.session.last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if entry.busy {
            // Finishing the turn refreshes activity, so a full window is enough.
            return SweepOutcome::Recheck(self.idle_timeout);
        }
        if idle >= self.idle_timeout {
            sessions.remove(id);
            return SweepOutcome::Expired(idle);
        }
        SweepOutcome::Recheck(self.idle_timeout.saturating_sub(idle).max(Duration::from_millis(1)))
    }
}

#[derive(Debug, PartialEq)]
enum SweepOutcome {
    Gone,
    Expired(Duration),
    /// Still active; check again after this long.
    Recheck(Duration),
}

/// Owner of every live session. Cheap to clone.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish()
    }
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self::with_clock(idle_timeout, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(idle_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                sessions: Mutex::new(HashMap::new()),
                idle_timeout,
                clock,
            }),
        }
    }

    /// Create a fresh session and schedule its idle sweep.
    pub fn create(&self) -> Session {
        let session = Session::new(Uuid::new_v4().to_string(), self.inner.clock.now());
        self.inner.lock().insert(
            session.id.clone(),
            Entry {
                session: session.clone(),
                busy: false,
            },
        );
        tracing::info!(session_id = %session.id, "session created");
        self.schedule_sweep(&session.id, self.inner.idle_timeout);
        session
    }

    pub fn get(&self, id: &str) -> Result<Session, AgentError> {
        self.inner
            .lock()
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Apply one committed turn atomically: append history and locators,
    /// merge context, add steps, refresh activity.
    pub fn update(&self, id: &str, patch: SessionPatch) -> Result<Session, AgentError> {
        let now = self.inner.clock.now();
        let mut sessions = self.inner.lock();
        let entry = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        let session = &mut entry.session;

        session.history.extend(patch.messages);
        session.context.apply(&patch.context);
        session.locators.extend(patch.locators);
        session.step_count += patch.steps;
        session.last_activity = now;

        Ok(session.clone())
    }

    /// Refresh a session's activity stamp without changing it.
    pub fn touch(&self, id: &str) -> Result<(), AgentError> {
        self.update(id, SessionPatch::default()).map(|_| ())
    }

    pub fn delete(&self, id: &str) -> bool {
        let removed = self.inner.lock().remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "session deleted");
        }
        removed
    }

    /// Summaries of all live sessions, most recently active first.
    pub fn list_summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .inner
            .lock()
            .values()
            .map(|entry| entry.session.summary())
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then(a.id.cmp(&b.id)));
        summaries
    }

    pub fn history(&self, id: &str) -> Result<SessionHistory, AgentError> {
        let session = self.get(id)?;
        Ok(SessionHistory {
            messages: session.history,
            locator_history: session.locators,
            context: session.context,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Claim the session for one turn and return its snapshot, taken under
    /// the same lock. A second concurrent claim is rejected.
    pub fn begin_turn(&self, id: &str) -> Result<(TurnGuard, Session), AgentError> {
        let mut sessions = self.inner.lock();
        let entry = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.busy {
            tracing::warn!(session_id = %id, "rejecting concurrent turn");
            return Err(AgentError::SessionBusy {
                session_id: id.to_string(),
            });
        }
        entry.busy = true;
        let guard = TurnGuard {
            store: Arc::downgrade(&self.inner),
            id: id.to_string(),
        };
        Ok((guard, entry.session.clone()))
    }

    // ─── Expiry ─────────────────────────────────────────────────────────

    fn schedule_sweep(&self, id: &str, delay: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session_id = %id, "no runtime; idle sweep not scheduled");
            return;
        };
        handle.spawn(sweep(Arc::downgrade(&self.inner), id.to_string(), delay));
    }
}

/// Deferred idle check for one session. Re-arms while the session is active.
async fn sweep(store: Weak<StoreInner>, id: String, mut delay: Duration) {
    loop {
        tokio::time::sleep(delay).await;

        let Some(inner) = store.upgrade() else {
            return;
        };
        match inner.expire_if_idle(&id) {
            SweepOutcome::Gone => return,
            SweepOutcome::Expired(idle) => {
                tracing::info!(session_id = %id, idle_secs = idle.as_secs(), "session expired");
                return;
            }
            SweepOutcome::Recheck(next) => {
                delay = next;
                tracing::debug!(session_id = %id, next_check_secs = delay.as_secs(), "session still active");
            }
        }
    }
}

fn not_found(id: &str) -> AgentError {
    AgentError::SessionNotFound {
        session_id: id.to_string(),
    }
}

// ─── Turn Guard ─────────────────────────────────────────────────────────────

/// Marks a session busy for the lifetime of one turn.
#[derive(Debug)]
pub struct TurnGuard {
    store: Weak<StoreInner>,
    id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            if let Some(entry) = inner.lock().get_mut(&self.id) {
                entry.busy = false;
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::{ContextPatch, LocatorRecord, Message};

    const TIMEOUT: Duration = Duration::from_secs(30 * 60);

    fn locator(action: &str) -> LocatorRecord {
        LocatorRecord {
            tool: format!("p.browser_{action}"),
            timestamp: Utc::now(),
            locator: Some("#x".into()),
            action: action.into(),
            element: None,
            success: true,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = SessionStore::new(TIMEOUT);
        let session = store.create();
        assert_eq!(session.step_count, 0);
        assert!(session.history.is_empty());
        assert_eq!(store.get(&session.id).unwrap(), session);

        assert!(store.delete(&session.id));
        assert!(!store.delete(&session.id));
        assert!(store.get(&session.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_merges_and_counts() {
        let store = SessionStore::new(TIMEOUT);
        let id = store.create().id;

        let updated = store
            .update(
                &id,
                SessionPatch {
                    messages: vec![Message::user_text("hi")],
                    context: ContextPatch {
                        current_url: Some("https://example.com".into()),
                        ..Default::default()
                    },
                    locators: vec![locator("navigate")],
                    steps: 1,
                },
            )
            .unwrap();
        assert_eq!(updated.step_count, 1);
        assert_eq!(updated.history.len(), 1);
        assert_eq!(updated.context.current_url.as_deref(), Some("https://example.com"));

        let updated = store
            .update(
                &id,
                SessionPatch {
                    locators: vec![locator("click")],
                    steps: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.step_count, 3);
        assert_eq!(updated.locators.len(), 2);
        // Untouched fields survive
        assert_eq!(updated.context.current_url.as_deref(), Some("https://example.com"));

        let err = store.update("missing", SessionPatch::default()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_summaries_most_recent_first() {
        let store = SessionStore::new(TIMEOUT);
        let a = store.create().id;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = store.create().id;

        let ids: Vec<String> = store.list_summaries().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b.clone(), a.clone()]);

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.touch(&a).unwrap();
        assert_eq!(store.list_summaries()[0].id, a);
    }

    #[tokio::test]
    async fn test_second_turn_is_rejected_while_busy() {
        let store = SessionStore::new(TIMEOUT);
        let id = store.create().id;

        let (guard, snapshot) = store.begin_turn(&id).unwrap();
        assert_eq!(snapshot.id, id);
        assert!(matches!(
            store.begin_turn(&id),
            Err(AgentError::SessionBusy { .. })
        ));
        drop(guard);
        assert!(store.begin_turn(&id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_swept() {
        let store = SessionStore::new(TIMEOUT);
        let id = store.create().id;

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;

        assert!(store.list_summaries().iter().all(|s| s.id != id));
        assert!(store.get(&id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_touched_before_sweep_survives() {
        let store = SessionStore::new(TIMEOUT);
        let id = store.create().id;

        tokio::time::sleep(TIMEOUT - Duration::from_secs(5)).await;
        store.touch(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.get(&id).is_ok(), "recently active session must survive the sweep");

        // The re-armed sweep evicts it once it really goes idle.
        tokio::time::sleep(TIMEOUT).await;
        assert!(store.get(&id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_session_is_not_swept() {
        let store = SessionStore::new(TIMEOUT);
        let id = store.create().id;
        let (guard, _) = store.begin_turn(&id).unwrap();

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;
        assert!(store.get(&id).is_ok());

        drop(guard);
        tokio::time::sleep(TIMEOUT).await;
        assert!(store.get(&id).is_err());
    }

    /// Clock that only moves when told to.
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn test_expiry_decision_respects_busy_flag() {
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        // No runtime here, so no background sweep races the direct calls.
        let store = SessionStore::with_clock(TIMEOUT, clock.clone());
        let id = store.create().id;

        *clock.0.lock().unwrap() += chrono::Duration::minutes(10);
        assert_eq!(
            store.inner.expire_if_idle(&id),
            SweepOutcome::Recheck(Duration::from_secs(20 * 60))
        );

        *clock.0.lock().unwrap() += chrono::Duration::minutes(25);
        let (guard, _) = store.begin_turn(&id).unwrap();
        assert_eq!(store.inner.expire_if_idle(&id), SweepOutcome::Recheck(TIMEOUT));
        assert!(store.get(&id).is_ok());

        drop(guard);
        assert!(matches!(store.inner.expire_if_idle(&id), SweepOutcome::Expired(_)));
        assert!(store.get(&id).is_err());
        assert_eq!(store.inner.expire_if_idle(&id), SweepOutcome::Gone);
    }

    #[tokio::test]
    async fn test_history_view() {
        let store = SessionStore::new(TIMEOUT);
        let id = store.create().id;
        store
            .update(
                &id,
                SessionPatch {
                    messages: vec![Message::user_text("a"), Message::user_text("b")],
                    locators: vec![locator("click")],
                    ..Default::default()
                },
            )
            .unwrap();
        let history = store.history(&id).unwrap();
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.locator_history.len(), 1);
    }
}
