//! Refreshing session manager.
//!
//! Single authority over one provider's cached session. Every decision about
//! the cache (serve, refresh, acquire) is made while holding the state lock,
//! and the lock is never held across an `.await`; the only suspension points
//! are the connector calls themselves.
//!
//! In-flight connector calls are recorded as [`Shared`] futures so concurrent
//! callers coalesce onto one operation:
//!
//! - one refresh slot, tagged with the scope set it refreshes
//! - a list of acquisitions, each tagged with the scope set it requests
//!
//! The shared future writes its own result into the cache when the connector
//! resolves, then drops its table entry. A removal bumps the generation, so a
//! result that started before the removal reaches its waiters but is never
//! cached.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{SessionManager, SessionRequest, SessionScopesFn, SessionState, ShouldRefreshFn};
use crate::connector::AuthConnector;
use crate::error::{AuthError, Result};
use crate::scope::ScopeSet;

type SessionFuture<S> = Shared<BoxFuture<'static, Result<S>>>;

/// Construction-time configuration for [`RefreshingSessionManager`].
pub struct SessionManagerOptions<S> {
    pub connector: Arc<dyn AuthConnector<S>>,
    /// Scopes unioned into every request.
    pub default_scopes: ScopeSet,
    pub session_scopes: SessionScopesFn<S>,
    pub session_should_refresh: ShouldRefreshFn<S>,
}

/// A connector call other callers may join.
struct InFlight<S> {
    id: u64,
    scopes: ScopeSet,
    future: SessionFuture<S>,
}

struct State<S> {
    current: Option<S>,
    refresh: Option<InFlight<S>>,
    acquisitions: Vec<InFlight<S>>,
    /// Bumped by every removal.
    generation: u64,
    next_id: u64,
}

impl<S> State<S> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// What a caller does once the state lock is released.
enum Plan<S> {
    Cached(S),
    Refresh {
        future: SessionFuture<S>,
        /// Scopes to acquire if the refresh turns out to need interaction.
        fallback_scopes: ScopeSet,
    },
    Acquire(SessionFuture<S>),
    Unavailable,
}

struct Inner<S> {
    connector: Arc<dyn AuthConnector<S>>,
    default_scopes: ScopeSet,
    session_scopes: SessionScopesFn<S>,
    should_refresh: ShouldRefreshFn<S>,
    state: Mutex<State<S>>,
    state_tx: watch::Sender<SessionState>,
}

/// Caches one session and serves it to concurrent callers.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct RefreshingSessionManager<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for RefreshingSessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> RefreshingSessionManager<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(options: SessionManagerOptions<S>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::SignedOut);
        Self {
            inner: Arc::new(Inner {
                connector: options.connector,
                default_scopes: options.default_scopes,
                session_scopes: options.session_scopes,
                should_refresh: options.session_should_refresh,
                state: Mutex::new(State {
                    current: None,
                    refresh: None,
                    acquisitions: Vec::new(),
                    generation: 0,
                    next_id: 0,
                }),
                state_tx,
            }),
        }
    }

    /// Return a session covering the requested scopes plus the defaults.
    ///
    /// - A cached session that covers the scopes and is not due for refresh
    ///   is returned without I/O.
    /// - A covering session that is due for refresh is refreshed silently;
    ///   if the provider demands interaction, required requests fall back to
    ///   an interactive acquisition and optional requests resolve to `None`.
    /// - Otherwise required requests acquire a new session with the union of
    ///   the cached and requested scopes; optional requests resolve to `None`.
    pub async fn get_session(&self, request: SessionRequest) -> Result<Option<S>> {
        match self.resolve(&request).await {
            Ok(session) => Ok(Some(session)),
            Err(AuthError::SessionUnavailable) if request.optional => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn resolve(&self, request: &SessionRequest) -> Result<S> {
        let needed = request.scopes.union(&self.inner.default_scopes);

        match self.inner.plan(&needed, request.optional) {
            Plan::Cached(session) => Ok(session),
            Plan::Unavailable => Err(AuthError::SessionUnavailable),
            Plan::Acquire(future) => future.await,
            Plan::Refresh {
                future,
                fallback_scopes,
            } => match future.await {
                Ok(session) => Ok(session),
                Err(AuthError::RefreshFailed(reason)) if request.optional => {
                    debug!(%reason, "Refresh needs interaction, optional request left unsatisfied");
                    Err(AuthError::SessionUnavailable)
                }
                Err(AuthError::RefreshFailed(reason)) => {
                    info!(%reason, "Refresh needs interaction, falling back to acquisition");
                    let future = self.inner.fallback(&fallback_scopes);
                    future.await
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Clear the cached session.
    ///
    /// In-flight acquisitions keep running for the callers already awaiting
    /// them, but neither they nor an in-flight refresh can repopulate the
    /// cache afterwards.
    pub fn remove_session(&self) {
        {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.current = None;
            state.refresh = None;
            state.acquisitions.clear();
        }
        info!("Session removed");
        self.inner.publish(SessionState::SignedOut);
    }

    /// Snapshot of the cached session, if any.
    pub fn current_session(&self) -> Option<S> {
        self.inner.state.lock().current.clone()
    }

    /// Subscribe to signed-in / signed-out transitions.
    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn default_scopes(&self) -> &ScopeSet {
        &self.inner.default_scopes
    }
}

impl<S> Inner<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn plan(self: &Arc<Self>, needed: &ScopeSet, optional: bool) -> Plan<S> {
        let mut state = self.state.lock();

        if let Some(current) = state.current.as_ref() {
            let cached_scopes = (self.session_scopes)(current);
            if needed.is_subset(&cached_scopes) {
                if !(self.should_refresh)(current) {
                    return Plan::Cached(current.clone());
                }
                let future = self.join_or_start_refresh(&mut state, cached_scopes.clone(), needed);
                return Plan::Refresh {
                    future,
                    fallback_scopes: cached_scopes,
                };
            }
        }

        if optional {
            return Plan::Unavailable;
        }
        Plan::Acquire(self.join_or_start_acquisition(&mut state, needed))
    }

    /// Acquire after a failed refresh, unless another caller already
    /// replaced the cached session with a usable one.
    fn fallback(self: &Arc<Self>, scopes: &ScopeSet) -> SessionFuture<S> {
        let mut state = self.state.lock();
        if let Some(current) = state.current.as_ref() {
            if scopes.is_subset(&(self.session_scopes)(current)) && !(self.should_refresh)(current)
            {
                return future::ready(Ok(current.clone())).boxed().shared();
            }
        }
        self.join_or_start_acquisition(&mut state, scopes)
    }

    fn join_or_start_refresh(
        self: &Arc<Self>,
        state: &mut State<S>,
        scopes: ScopeSet,
        needed: &ScopeSet,
    ) -> SessionFuture<S> {
        if let Some(pending) = &state.refresh {
            if needed.is_subset(&pending.scopes) {
                debug!(scopes = %pending.scopes, "Joining in-flight refresh");
                return pending.future.clone();
            }
        }

        let id = state.next_id();
        let generation = state.generation;
        debug!(%scopes, "Starting session refresh");

        let connector = Arc::clone(&self.connector);
        let weak = Arc::downgrade(self);
        let requested = scopes.clone();
        let future = async move {
            let result = AssertUnwindSafe(connector.refresh_session(&requested))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(connector_panicked("refresh")));
            match Weak::upgrade(&weak) {
                Some(inner) => inner.settle_refresh(id, generation, &requested, result),
                None => result,
            }
        }
        .boxed()
        .shared();

        state.refresh = Some(InFlight {
            id,
            scopes,
            future: future.clone(),
        });
        future
    }

    fn join_or_start_acquisition(
        self: &Arc<Self>,
        state: &mut State<S>,
        needed: &ScopeSet,
    ) -> SessionFuture<S> {
        // Never drop a scope the cached session already holds.
        let wanted = match state.current.as_ref() {
            Some(current) => (self.session_scopes)(current).union(needed),
            None => needed.clone(),
        };

        if let Some(pending) = state
            .acquisitions
            .iter()
            .find(|pending| wanted.is_subset(&pending.scopes))
        {
            debug!(scopes = %pending.scopes, "Joining in-flight acquisition");
            return pending.future.clone();
        }

        // Cover every narrower acquisition still in flight, so whichever
        // finishes last cannot shrink the cached scope set.
        let scopes = state
            .acquisitions
            .iter()
            .fold(wanted, |acc, pending| acc.union(&pending.scopes));

        let id = state.next_id();
        let generation = state.generation;
        info!(%scopes, superseding = state.acquisitions.len(), "Starting session acquisition");

        let connector = Arc::clone(&self.connector);
        let weak = Arc::downgrade(self);
        let requested = scopes.clone();
        let future = async move {
            let result = AssertUnwindSafe(connector.create_session(&requested))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(connector_panicked("acquisition")));
            match Weak::upgrade(&weak) {
                Some(inner) => inner.settle_acquisition(id, generation, result),
                None => result,
            }
        }
        .boxed()
        .shared();

        state.acquisitions.push(InFlight {
            id,
            scopes,
            future: future.clone(),
        });
        future
    }

    fn settle_refresh(
        &self,
        id: u64,
        generation: u64,
        requested: &ScopeSet,
        result: Result<S>,
    ) -> Result<S> {
        let result = result.and_then(|session| {
            let granted = (self.session_scopes)(&session);
            if requested.is_subset(&granted) {
                Ok(session)
            } else {
                Err(AuthError::RefreshFailed(format!(
                    "Refreshed session is missing scopes (requested: {requested}, granted: {granted})"
                )))
            }
        });

        let stored = {
            let mut state = self.state.lock();
            if state.refresh.as_ref().is_some_and(|pending| pending.id == id) {
                state.refresh = None;
            }
            if state.generation != generation {
                debug!("Session removed during refresh, discarding result");
                return result;
            }
            match &result {
                Ok(session) => self.store(&mut state, session),
                Err(err) => {
                    warn!(error = %err, "Session refresh failed");
                    false
                }
            }
        };

        if stored {
            debug!("Session refreshed");
            self.publish(SessionState::SignedIn);
        }
        result
    }

    fn settle_acquisition(&self, id: u64, generation: u64, result: Result<S>) -> Result<S> {
        let stored = {
            let mut state = self.state.lock();
            state.acquisitions.retain(|pending| pending.id != id);
            if state.generation != generation {
                debug!("Session removed during acquisition, result not cached");
                return result;
            }
            match &result {
                Ok(session) => self.store(&mut state, session),
                Err(err) => {
                    warn!(error = %err, "Session acquisition failed");
                    false
                }
            }
        };

        if stored {
            info!("Session acquired");
            self.publish(SessionState::SignedIn);
        }
        result
    }

    /// Cache `session` unless it would shrink the scope set of a cached
    /// session that is still fresh. A session due for refresh always yields.
    fn store(&self, state: &mut State<S>, session: &S) -> bool {
        let replace = match state.current.as_ref() {
            Some(current) => {
                (self.should_refresh)(current)
                    || (self.session_scopes)(session)
                        .is_superset(&(self.session_scopes)(current))
            }
            None => true,
        };
        if replace {
            state.current = Some(session.clone());
        } else {
            debug!("Keeping fresh cached session with broader scopes");
        }
        replace
    }

    fn publish(&self, next: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[async_trait::async_trait]
impl<S> SessionManager<S> for RefreshingSessionManager<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn get_session(&self, request: SessionRequest) -> Result<Option<S>> {
        RefreshingSessionManager::get_session(self, request).await
    }

    fn remove_session(&self) {
        RefreshingSessionManager::remove_session(self)
    }
}

impl<S> std::fmt::Debug for RefreshingSessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RefreshingSessionManager")
            .field("default_scopes", &self.inner.default_scopes)
            .field("has_session", &state.current.is_some())
            .field("refresh_pending", &state.refresh.is_some())
            .field("acquisitions_pending", &state.acquisitions.len())
            .finish()
    }
}

/// A panicking connector settles like a failed call, so its table entry is
/// cleared and the next caller starts over.
fn connector_panicked(operation: &str) -> AuthError {
    warn!(operation, "Connector panicked");
    AuthError::Other(format!("Connector panicked during {operation}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct TestSession {
        token: String,
        scopes: ScopeSet,
        stale: bool,
    }

    #[derive(Default)]
    struct EchoConnector {
        created: AtomicUsize,
        refreshed: AtomicUsize,
    }

    #[async_trait]
    impl AuthConnector<TestSession> for EchoConnector {
        async fn create_session(&self, scopes: &ScopeSet) -> Result<TestSession> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestSession {
                token: format!("created-{n}"),
                scopes: scopes.clone(),
                stale: false,
            })
        }

        async fn refresh_session(&self, scopes: &ScopeSet) -> Result<TestSession> {
            let n = self.refreshed.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestSession {
                token: format!("refreshed-{n}"),
                scopes: scopes.clone(),
                stale: false,
            })
        }
    }

    fn manager(connector: Arc<EchoConnector>) -> RefreshingSessionManager<TestSession> {
        RefreshingSessionManager::new(SessionManagerOptions {
            connector,
            default_scopes: ["user"].iter().collect(),
            session_scopes: Arc::new(|s: &TestSession| s.scopes.clone()),
            session_should_refresh: Arc::new(|s: &TestSession| s.stale),
        })
    }

    fn scopes(text: &str) -> ScopeSet {
        crate::scope::normalize_scopes(text)
    }

    #[tokio::test]
    async fn test_acquire_then_cache_hit() {
        let connector = Arc::new(EchoConnector::default());
        let manager = manager(Arc::clone(&connector));

        let first = manager
            .get_session(SessionRequest::required(scopes("repo")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.scopes, scopes("repo user"));

        let second = manager
            .get_session(SessionRequest::required(scopes("user")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.token, first.token);
        assert_eq!(connector.created.load(Ordering::SeqCst), 1);
        assert_eq!(connector.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_optional_without_session_is_none() {
        let connector = Arc::new(EchoConnector::default());
        let manager = manager(Arc::clone(&connector));

        let session = manager
            .get_session(SessionRequest::optional(ScopeSet::new()))
            .await
            .unwrap();
        assert!(session.is_none());
        assert_eq!(connector.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_session_is_refreshed_and_replaced() {
        let connector = Arc::new(EchoConnector::default());
        let manager = manager(Arc::clone(&connector));
        manager.inner.state.lock().current = Some(TestSession {
            token: "old".into(),
            scopes: scopes("repo user"),
            stale: true,
        });

        let session = manager
            .get_session(SessionRequest::optional(scopes("repo")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.token, "refreshed-1");
        assert_eq!(session.scopes, scopes("repo user"));
        assert_eq!(manager.current_session().unwrap().token, "refreshed-1");
        assert_eq!(connector.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_session_publishes_state() {
        let connector = Arc::new(EchoConnector::default());
        let manager = manager(connector);
        let mut state = manager.session_state();
        assert_eq!(*state.borrow(), SessionState::SignedOut);

        manager
            .get_session(SessionRequest::required(ScopeSet::new()))
            .await
            .unwrap();
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), SessionState::SignedIn);

        manager.remove_session();
        assert!(manager.current_session().is_none());
        assert_eq!(*state.borrow_and_update(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let connector = Arc::new(EchoConnector::default());
        let manager: Arc<dyn SessionManager<TestSession>> =
            Arc::new(manager(Arc::clone(&connector)));

        let session = manager
            .get_session(SessionRequest::required(scopes("gist")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.scopes, scopes("gist user"));

        manager.remove_session();
        let after = manager
            .get_session(SessionRequest::optional(ScopeSet::new()))
            .await
            .unwrap();
        assert!(after.is_none());
        assert_eq!(connector.created.load(Ordering::SeqCst), 1);
    }

    /// Panics on its first acquisition, then behaves like [`EchoConnector`].
    #[derive(Default)]
    struct PanicOnceConnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthConnector<TestSession> for PanicOnceConnector {
        async fn create_session(&self, scopes: &ScopeSet) -> Result<TestSession> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                panic!("connector blew up");
            }
            Ok(TestSession {
                token: format!("created-{n}"),
                scopes: scopes.clone(),
                stale: false,
            })
        }

        async fn refresh_session(&self, _scopes: &ScopeSet) -> Result<TestSession> {
            Err(AuthError::RefreshFailed("unused".into()))
        }
    }

    #[tokio::test]
    async fn test_connector_panic_fails_call_and_clears_in_flight() {
        let connector = Arc::new(PanicOnceConnector::default());
        let manager = RefreshingSessionManager::new(SessionManagerOptions {
            connector: Arc::clone(&connector) as Arc<dyn AuthConnector<TestSession>>,
            default_scopes: ScopeSet::new(),
            session_scopes: Arc::new(|s: &TestSession| s.scopes.clone()),
            session_should_refresh: Arc::new(|s: &TestSession| s.stale),
        });

        let err = manager
            .get_session(SessionRequest::required(scopes("repo")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Other(ref message) if message.contains("panicked")));
        assert!(manager.inner.state.lock().acquisitions.is_empty());
        assert!(manager.current_session().is_none());

        let session = manager
            .get_session(SessionRequest::required(scopes("repo")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.token, "created-2");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_cache_yields_to_narrower_session() {
        let manager = manager(Arc::new(EchoConnector::default()));
        let narrow = TestSession {
            token: "narrow".into(),
            scopes: scopes("user"),
            stale: false,
        };

        let mut state = manager.inner.state.lock();
        state.current = Some(TestSession {
            token: "broad".into(),
            scopes: scopes("repo user"),
            stale: false,
        });
        assert!(!manager.inner.store(&mut state, &narrow));
        assert_eq!(state.current.as_ref().unwrap().token, "broad");

        state.current.as_mut().unwrap().stale = true;
        assert!(manager.inner.store(&mut state, &narrow));
        assert_eq!(state.current.as_ref().unwrap().token, "narrow");
    }
}
