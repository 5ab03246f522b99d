//! Middleware that attaches access tokens to outgoing requests and recovers
//! from expired ones
//!
//! Include [`RefreshingAuthMiddleware`] in a
//! [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware) stack.
//! Each request carries the access token held by a [`TokenStore`]. When the
//! server answers `401 Unauthorized`, the middleware renews the token pair
//! through a [`RefreshSource`] and replays the request once with the new
//! token.
//!
//! Concurrent requests that fail at the same time share a single refresh:
//! the first one starts it and the others wait for its outcome. If the
//! refresh fails, every waiting request fails with
//! [`AuthRecoveryError::RefreshFailed`], the stored tokens are cleared, and
//! the auth-failure handler runs once. A request sent with the discarded
//! token whose `401` arrives after the refresh has settled fails with the
//! same error, without running the handler again.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reqwest::{Client, Url};
//! use reqwest_middleware::ClientBuilder;
//! use tollgate_reqwest::RefreshingAuthMiddleware;
//! use tollgate_tokens::{sources::HttpRefreshSource, stores::InMemoryTokenStore};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let base = Url::parse("https://auth.example.com/")?;
//! let store = Arc::new(InMemoryTokenStore::new());
//! let source = HttpRefreshSource::for_base_url(Client::new(), &base)?;
//!
//! let client = ClientBuilder::new(Client::new())
//!     .with(
//!         RefreshingAuthMiddleware::new(store, Arc::new(source))
//!             .with_auth_failure_handler(|| eprintln!("signed out")),
//!     )
//!     .build();
//!
//! client.get(base.join("auth/me")?).send().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Tokens can be limited to particular destinations with a predicate, such
//! as [`SameOrigin`].

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{
    error::Error as StdError,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use futures::future::{BoxFuture, FutureExt, Shared};
use predicates::{constant::BooleanPredicate, Predicate};
use rand::Rng;
use reqwest::{
    header::{self, HeaderName, HeaderValue, InvalidHeaderValue},
    Request, Response, StatusCode,
};
use reqwest_middleware::{Middleware, Next, Result};
use thiserror::Error;
use tollgate::AccessToken;
use tollgate_tokens::{RefreshError, RefreshSource, TokenStore};

mod origin;

pub use origin::SameOrigin;

/// Header carrying a per-request correlation id
pub const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Time allowed for a refresh to settle before it is treated as failed
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Marks a request that has already been replayed after a refresh
///
/// A `401` for a request carrying this marker in its extensions is returned
/// as is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Retried;

/// An error recovering from a rejected access token
#[derive(Debug, Error)]
pub enum AuthRecoveryError {
    /// The token pair could not be renewed
    #[error("unable to refresh the access token")]
    RefreshFailed(#[source] Arc<RefreshError>),
    /// The stored access token cannot be sent in a header
    #[error("access token is not a valid header value")]
    InvalidAccessToken(#[source] InvalidHeaderValue),
}

type RefreshOutcome = std::result::Result<Arc<AccessToken>, Arc<RefreshError>>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;
type AuthFailureHandler = Arc<dyn Fn() + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A failed refresh and the access token it was started to replace
struct FailedRefresh {
    replacing: Option<Arc<AccessToken>>,
    error: Arc<RefreshError>,
}

struct RefreshState {
    store: Arc<dyn TokenStore>,
    source: Arc<dyn RefreshSource>,
    in_flight: Mutex<Option<SharedRefresh>>,
    last_failure: Mutex<Option<FailedRefresh>>,
}

#[derive(Clone)]
struct RefreshPolicy {
    on_auth_failure: Option<AuthFailureHandler>,
    timeout: Duration,
}

impl RefreshPolicy {
    fn auth_failed(&self, store: &dyn TokenStore) {
        store.clear();
        if let Some(handler) = &self.on_auth_failure {
            handler();
        }
    }
}

/// Settles a refresh task however it ends
///
/// The in-flight slot is cleared on drop. A task dropped before reaching an
/// outcome, whether by panic or cancellation, is recorded as a failure.
struct SettleGuard {
    state: Arc<RefreshState>,
    policy: RefreshPolicy,
    replacing: Option<Arc<AccessToken>>,
    settled: bool,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("token refresh did not complete, clearing stored tokens");
            let error = Arc::new(RefreshError::transport("refresh task did not complete"));
            self.state.fail(&self.policy, self.replacing.take(), error);
        }
        *lock(&self.state.in_flight) = None;
    }
}

impl RefreshState {
    fn new(store: Arc<dyn TokenStore>, source: Arc<dyn RefreshSource>) -> Self {
        Self {
            store,
            source,
            in_flight: Mutex::new(None),
            last_failure: Mutex::new(None),
        }
    }

    fn is_refreshing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// Joins the refresh in flight or starts a new one
    ///
    /// The slot is inspected and published under one lock, so concurrent
    /// callers cannot start two refreshes.
    fn refresh(self: &Arc<Self>, policy: &RefreshPolicy) -> SharedRefresh {
        let mut slot = lock(&self.in_flight);

        if let Some(pending) = &*slot {
            tracing::debug!("joining refresh already in flight");
            return pending.clone();
        }

        tracing::debug!("starting token refresh");
        let task = tokio::spawn(Arc::clone(self).run_refresh(policy.clone()));
        let pending = async move {
            task.await
                .unwrap_or_else(|err| Err(Arc::new(RefreshError::transport(err))))
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        pending
    }

    #[allow(trivial_casts)]
    async fn run_refresh(self: Arc<Self>, policy: RefreshPolicy) -> RefreshOutcome {
        let mut guard = SettleGuard {
            state: Arc::clone(&self),
            policy,
            replacing: self.store.access_token(),
            settled: false,
        };

        let renewed = match self.store.refresh_token() {
            Some(refresh_token) => {
                tokio::time::timeout(guard.policy.timeout, self.source.refresh(&refresh_token))
                    .await
                    .unwrap_or(Err(RefreshError::Timeout))
            }
            None => Err(RefreshError::Missing),
        };

        let outcome = match renewed {
            Ok(tokens) => {
                let access_token = Arc::new(tokens.access_token.clone());
                self.store.set_tokens(tokens);
                *lock(&self.last_failure) = None;
                tracing::info!("access token refreshed");
                Ok(access_token)
            }
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn StdError,
                    "token refresh failed, clearing stored tokens"
                );
                let err = Arc::new(err);
                self.fail(&guard.policy, guard.replacing.take(), Arc::clone(&err));
                Err(err)
            }
        };

        guard.settled = true;
        outcome
    }

    /// Records a failed refresh, then discards the stored tokens
    fn fail(
        &self,
        policy: &RefreshPolicy,
        replacing: Option<Arc<AccessToken>>,
        error: Arc<RefreshError>,
    ) {
        *lock(&self.last_failure) = Some(FailedRefresh { replacing, error });
        policy.auth_failed(&*self.store);
    }

    /// The error of the last refresh, if it failed while replacing
    /// `access_token`
    fn failure_replacing(&self, access_token: &AccessToken) -> Option<Arc<RefreshError>> {
        lock(&self.last_failure)
            .as_ref()
            .filter(|failed| failed.replacing.as_deref() == Some(access_token))
            .map(|failed| Arc::clone(&failed.error))
    }
}

/// A middleware that attaches access tokens and refreshes them on `401`
///
/// Clones share the same store and the same in-flight refresh.
#[derive(Clone)]
pub struct RefreshingAuthMiddleware<P = BooleanPredicate> {
    state: Arc<RefreshState>,
    policy: RefreshPolicy,
    predicate: P,
    correlation_header: HeaderName,
}

impl<P: fmt::Debug> fmt::Debug for RefreshingAuthMiddleware<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshingAuthMiddleware")
            .field("store", &self.state.store)
            .field("source", &self.state.source)
            .field("refreshing", &self.state.is_refreshing())
            .field("on_auth_failure", &self.policy.on_auth_failure.is_some())
            .field("refresh_timeout", &self.policy.timeout)
            .field("predicate", &self.predicate)
            .field("correlation_header", &self.correlation_header)
            .finish()
    }
}

impl RefreshingAuthMiddleware {
    /// Constructs a middleware that reads tokens from `store` and renews
    /// them through `source`
    ///
    /// By default a token is attached to every request. Use
    /// [`with_predicate()`][Self::with_predicate()] to restrict this.
    pub fn new(store: Arc<dyn TokenStore>, source: Arc<dyn RefreshSource>) -> Self {
        Self {
            state: Arc::new(RefreshState::new(store, source)),
            policy: RefreshPolicy {
                on_auth_failure: None,
                timeout: DEFAULT_REFRESH_TIMEOUT,
            },
            predicate: predicates::constant::always(),
            correlation_header: CORRELATION_ID,
        }
    }
}

impl<P> RefreshingAuthMiddleware<P> {
    /// Runs `handler` whenever the stored tokens are discarded
    pub fn with_auth_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.policy.on_auth_failure = Some(Arc::new(handler));
        self
    }

    /// Sets the time allowed for a refresh to settle
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    /// Sets the header used to send correlation ids
    pub fn with_correlation_header(mut self, header: HeaderName) -> Self {
        self.correlation_header = header;
        self
    }

    /// Only attaches tokens to requests matching `predicate`
    pub fn with_predicate<Q>(self, predicate: Q) -> RefreshingAuthMiddleware<Q> {
        RefreshingAuthMiddleware {
            state: self.state,
            policy: self.policy,
            predicate,
            correlation_header: self.correlation_header,
        }
    }

    /// The store tokens are read from
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.state.store
    }
}

fn bearer(token: &AccessToken) -> std::result::Result<HeaderValue, InvalidHeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = HeaderValue::from_maybe_shared(header_value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

fn invalid_access_token(err: InvalidHeaderValue) -> reqwest_middleware::Error {
    reqwest_middleware::Error::middleware(AuthRecoveryError::InvalidAccessToken(err))
}

fn correlation_id() -> HeaderValue {
    let id: u128 = rand::thread_rng().gen();
    HeaderValue::try_from(format!("{id:032x}")).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[async_trait::async_trait]
impl<P> Middleware for RefreshingAuthMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        req.headers_mut()
            .insert(self.correlation_header.clone(), correlation_id());

        let mut attached = None;
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            if let Some(token) = self.state.store.access_token() {
                let value = bearer(&token).map_err(invalid_access_token)?;
                req.headers_mut().insert(header::AUTHORIZATION, value);
                attached = Some(token);
            }
        }

        let replay = attached.as_ref().and_then(|_| req.try_clone());
        let resp = next.clone().run(req, extensions).await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(sent_with) = attached else {
            return Ok(resp);
        };

        if extensions.get::<Retried>().is_some() {
            tracing::debug!("replayed request was rejected again");
            return Ok(resp);
        }

        let Some(mut replay) = replay else {
            tracing::debug!("request body cannot be replayed, returning rejection");
            return Ok(resp);
        };

        let token = match self.state.store.access_token() {
            Some(current) if current != sent_with => {
                tracing::debug!("access token changed while request was in flight");
                current
            }
            _ if self.state.store.refresh_token().is_none() => {
                if let Some(err) = self.state.failure_replacing(&sent_with) {
                    tracing::debug!("access token was discarded by a failed refresh");
                    return Err(reqwest_middleware::Error::middleware(
                        AuthRecoveryError::RefreshFailed(err),
                    ));
                }
                tracing::debug!("no refresh token stored, discarding access token");
                self.policy.auth_failed(&*self.state.store);
                return Ok(resp);
            }
            _ => self.state.refresh(&self.policy).await.map_err(|err| {
                reqwest_middleware::Error::middleware(AuthRecoveryError::RefreshFailed(err))
            })?,
        };

        let value = bearer(&token).map_err(invalid_access_token)?;
        replay.headers_mut().insert(header::AUTHORIZATION, value);
        extensions.insert(Retried);

        tracing::debug!("replaying request with renewed access token");
        next.run(replay, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use color_eyre::Result;
    use futures::future::join_all;
    use reqwest::Client;
    use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
    use tollgate::RefreshTokenRef;
    use tollgate_tokens::{stores::InMemoryTokenStore, TokenPair};

    use super::*;

    const URL: &str = "http://api.tollgate.test/resource";

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: AccessToken::new(access.to_owned()),
            refresh_token: tollgate::RefreshToken::new(refresh.to_owned()),
        }
    }

    /// Terminal middleware standing in for the API server
    #[derive(Debug)]
    struct FakeApi {
        valid: Mutex<String>,
        calls: AtomicUsize,
        correlation_ids: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn accepting(token: &str) -> Arc<Self> {
            Arc::new(Self {
                valid: Mutex::new(token.to_owned()),
                calls: AtomicUsize::new(0),
                correlation_ids: Mutex::new(Vec::new()),
            })
        }

        fn accept(&self, token: &str) {
            *self.valid.lock().unwrap() = token.to_owned();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Middleware for FakeApi {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> reqwest_middleware::Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(id) = req.headers().get(CORRELATION_ID) {
                self.correlation_ids
                    .lock()
                    .unwrap()
                    .push(id.to_str().unwrap().to_owned());
            }

            let expected = format!("Bearer {}", self.valid.lock().unwrap());
            let authorized = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                == Some(expected.as_str());

            let mut resp = http::Response::new(Vec::<u8>::new());
            if !authorized {
                *resp.status_mut() = StatusCode::UNAUTHORIZED;
            }
            Ok(resp.into())
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum Outcome {
        /// Issues a new pair the API accepts
        Rotate,
        /// Issues a new pair the API still rejects
        RotateUnaccepted,
        /// Refuses the refresh token
        Reject,
    }

    #[derive(Debug)]
    struct FakeRefresh {
        api: Arc<FakeApi>,
        outcome: Outcome,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeRefresh {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RefreshSource for FakeRefresh {
        async fn refresh(
            &self,
            _: &RefreshTokenRef,
        ) -> std::result::Result<TokenPair, RefreshError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;

            let access = format!("access-{n}");
            match self.outcome {
                Outcome::Rotate => {
                    self.api.accept(&access);
                    Ok(pair(&access, &format!("refresh-{n}")))
                }
                Outcome::RotateUnaccepted => Ok(pair(&access, &format!("refresh-{n}"))),
                Outcome::Reject => Err(RefreshError::Rejected {
                    status: 401,
                    body: "Invalid or expired refresh token".to_owned(),
                }),
            }
        }
    }

    struct Harness {
        store: Arc<InMemoryTokenStore>,
        api: Arc<FakeApi>,
        source: Arc<FakeRefresh>,
        failures: Arc<AtomicUsize>,
        middleware: RefreshingAuthMiddleware,
    }

    impl Harness {
        /// The stored access token `stale` is rejected until a refresh succeeds
        fn new(outcome: Outcome) -> Self {
            let api = FakeApi::accepting("not-yet-issued");
            let store = Arc::new(InMemoryTokenStore::with_tokens(pair("stale", "refresh-0")));
            let source = Arc::new(FakeRefresh {
                api: Arc::clone(&api),
                outcome,
                delay: Duration::from_millis(50),
                calls: AtomicUsize::new(0),
            });
            let failures = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&failures);
            let middleware = RefreshingAuthMiddleware::new(store.clone(), source.clone())
                .with_auth_failure_handler(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });

            Self {
                store,
                api,
                source,
                failures,
                middleware,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            let source = Arc::new(FakeRefresh {
                api: Arc::clone(&self.api),
                outcome: self.source.outcome,
                delay,
                calls: AtomicUsize::new(0),
            });
            self.middleware = RefreshingAuthMiddleware::new(self.store.clone(), source.clone())
                .with_auth_failure_handler({
                    let counter = Arc::clone(&self.failures);
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                });
            self.source = source;
            self
        }

        fn client(&self) -> ClientWithMiddleware {
            ClientBuilder::new(Client::new())
                .with(self.middleware.clone())
                .with_arc(self.api.clone())
                .build()
        }

        fn failures(&self) -> usize {
            self.failures.load(Ordering::SeqCst)
        }
    }

    fn recovery_error(err: &reqwest_middleware::Error) -> Option<&AuthRecoveryError> {
        match err {
            reqwest_middleware::Error::Middleware(inner) => inner.downcast_ref(),
            reqwest_middleware::Error::Reqwest(_) => None,
        }
    }

    /// Inserts the retry marker before the refreshing middleware runs
    #[derive(Debug)]
    struct MarkRetried;

    #[async_trait]
    impl Middleware for MarkRetried {
        async fn handle(
            &self,
            req: Request,
            extensions: &mut http::Extensions,
            next: Next<'_>,
        ) -> reqwest_middleware::Result<Response> {
            extensions.insert(Retried);
            next.run(req, extensions).await
        }
    }

    /// Rotates the stored tokens while the first request is in flight
    #[derive(Debug)]
    struct RotateInFlight {
        store: Arc<InMemoryTokenStore>,
        done: AtomicBool,
    }

    #[async_trait]
    impl Middleware for RotateInFlight {
        async fn handle(
            &self,
            req: Request,
            extensions: &mut http::Extensions,
            next: Next<'_>,
        ) -> reqwest_middleware::Result<Response> {
            if !self.done.swap(true, Ordering::SeqCst) {
                self.store.set_tokens(pair("rotated", "refresh-9"));
            }
            next.run(req, extensions).await
        }
    }

    /// Panics on its first refresh and rotates on later ones
    #[derive(Debug)]
    struct PanicOnce {
        api: Arc<FakeApi>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefreshSource for PanicOnce {
        async fn refresh(
            &self,
            _: &RefreshTokenRef,
        ) -> std::result::Result<TokenPair, RefreshError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("refresh source blew up");
            }
            self.api.accept("access-2");
            Ok(pair("access-2", "refresh-2"))
        }
    }

    /// Holds back the first request it sees before forwarding it
    #[derive(Debug)]
    struct DelayFirst {
        delay: Duration,
        done: AtomicBool,
    }

    #[async_trait]
    impl Middleware for DelayFirst {
        async fn handle(
            &self,
            req: Request,
            extensions: &mut http::Extensions,
            next: Next<'_>,
        ) -> reqwest_middleware::Result<Response> {
            if !self.done.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(self.delay).await;
            }
            next.run(req, extensions).await
        }
    }

    mod when_the_access_token_is_accepted {
        use super::*;

        #[tokio::test]
        async fn attaches_the_token_and_a_fresh_correlation_id() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            h.api.accept("stale");
            let client = h.client();

            assert_eq!(client.get(URL).send().await?.status(), StatusCode::OK);
            assert_eq!(client.get(URL).send().await?.status(), StatusCode::OK);

            let ids = h.api.correlation_ids.lock().unwrap().clone();
            assert_eq!(ids.len(), 2);
            assert_eq!(ids[0].len(), 32);
            assert_ne!(ids[0], ids[1]);
            assert_eq!(h.source.calls(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn uses_a_custom_correlation_header() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            h.api.accept("stale");
            let client = ClientBuilder::new(Client::new())
                .with(
                    h.middleware
                        .clone()
                        .with_correlation_header(HeaderName::from_static("x-trace-id")),
                )
                .with_arc(h.api.clone())
                .build();

            client.get(URL).send().await?;

            assert!(h.api.correlation_ids.lock().unwrap().is_empty());
            Ok(())
        }
    }

    mod when_the_access_token_is_rejected {
        use super::*;

        #[tokio::test]
        async fn concurrent_rejections_share_one_refresh() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            let client = h.client();

            let responses = join_all((0..8).map(|_| client.get(URL).send())).await;

            for resp in responses {
                assert_eq!(resp?.status(), StatusCode::OK);
            }
            assert_eq!(h.source.calls(), 1);
            assert_eq!(h.api.calls(), 16);
            assert_eq!(h.store.access_token().unwrap().as_str(), "access-1");
            assert_eq!(h.store.refresh_token().unwrap().as_str(), "refresh-1");
            assert_eq!(h.failures(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn a_replay_rejected_again_is_returned_without_another_refresh() -> Result<()> {
            let h = Harness::new(Outcome::RotateUnaccepted);
            let client = h.client();

            let resp = client.get(URL).send().await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(h.source.calls(), 1);
            assert_eq!(h.api.calls(), 2);
            Ok(())
        }

        #[tokio::test]
        async fn a_token_rotated_in_flight_is_replayed_without_refresh() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            h.api.accept("rotated");
            let client = ClientBuilder::new(Client::new())
                .with(h.middleware.clone())
                .with(RotateInFlight {
                    store: h.store.clone(),
                    done: AtomicBool::new(false),
                })
                .with_arc(h.api.clone())
                .build();

            let resp = client.get(URL).send().await?;

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(h.source.calls(), 0);
            assert_eq!(h.api.calls(), 2);
            Ok(())
        }

        #[tokio::test]
        async fn an_already_retried_request_is_not_refreshed() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            let client = ClientBuilder::new(Client::new())
                .with(MarkRetried)
                .with(h.middleware.clone())
                .with_arc(h.api.clone())
                .build();

            let resp = client.get(URL).send().await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(h.source.calls(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn an_explicit_authorization_header_is_left_alone() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            let client = h.client();

            let resp = client.get(URL).bearer_auth("caller-supplied").send().await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(h.source.calls(), 0);
            assert_eq!(h.store.access_token().unwrap().as_str(), "stale");
            Ok(())
        }

        #[tokio::test]
        async fn a_streaming_body_is_not_replayed() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            let client = h.client();
            let body = reqwest::Body::wrap_stream(futures::stream::once(async {
                Ok::<_, std::io::Error>("payload")
            }));

            let resp = client.post(URL).body(body).send().await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(h.source.calls(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn requests_outside_the_predicate_get_no_token() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            let origin = SameOrigin::new(&"https://auth.tollgate.test/".parse()?);
            let client = ClientBuilder::new(Client::new())
                .with(h.middleware.clone().with_predicate(origin))
                .with_arc(h.api.clone())
                .build();

            let resp = client.get(URL).send().await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(h.source.calls(), 0);
            assert_eq!(h.failures(), 0);
            Ok(())
        }
    }

    mod when_no_tokens_are_stored {
        use super::*;

        #[tokio::test]
        async fn the_rejection_is_returned_untouched() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            h.store.clear();
            let client = h.client();

            let resp = client.get(URL).send().await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(h.source.calls(), 0);
            assert_eq!(h.failures(), 0);
            Ok(())
        }

        #[tokio::test]
        async fn a_lone_access_token_is_discarded_on_rejection() -> Result<()> {
            let h = Harness::new(Outcome::Rotate);
            h.store.clear();
            h.store.set_access_token(AccessToken::from_static("stale"));
            let client = h.client();

            let resp = client.get(URL).send().await?;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(h.source.calls(), 0);
            assert_eq!(h.failures(), 1);
            assert!(h.store.access_token().is_none());
            Ok(())
        }
    }

    mod when_the_refresh_fails {
        use super::*;

        #[tokio::test]
        async fn every_waiter_fails_and_the_handler_runs_once() -> Result<()> {
            let h = Harness::new(Outcome::Reject);
            let client = h.client();

            let results = join_all((0..5).map(|_| client.get(URL).send())).await;

            for result in results {
                let err = result.unwrap_err();
                assert!(matches!(
                    recovery_error(&err),
                    Some(AuthRecoveryError::RefreshFailed(_))
                ));
            }
            assert_eq!(h.source.calls(), 1);
            assert_eq!(h.failures(), 1);
            assert!(h.store.access_token().is_none());
            assert!(h.store.refresh_token().is_none());
            Ok(())
        }

        #[tokio::test]
        async fn a_slow_refresh_times_out() -> Result<()> {
            let h = Harness::new(Outcome::Rotate).with_delay(Duration::from_secs(5));
            let middleware = h
                .middleware
                .clone()
                .with_refresh_timeout(Duration::from_millis(50));
            let client = ClientBuilder::new(Client::new())
                .with(middleware)
                .with_arc(h.api.clone())
                .build();

            let err = client.get(URL).send().await.unwrap_err();

            match recovery_error(&err) {
                Some(AuthRecoveryError::RefreshFailed(cause)) => {
                    assert!(matches!(**cause, RefreshError::Timeout));
                }
                other => panic!("expected a refresh failure, got {other:?}"),
            }
            assert_eq!(h.failures(), 1);
            Ok(())
        }

        #[tokio::test]
        async fn a_later_rejection_starts_a_new_refresh() -> Result<()> {
            let h = Harness::new(Outcome::Reject);
            let client = h.client();

            assert!(client.get(URL).send().await.is_err());

            h.store.set_tokens(pair("stale", "refresh-0"));
            assert!(client.get(URL).send().await.is_err());

            assert_eq!(h.source.calls(), 2);
            assert_eq!(h.failures(), 2);
            Ok(())
        }

        #[tokio::test]
        async fn a_panicking_refresh_does_not_block_the_next_one() -> Result<()> {
            let api = FakeApi::accepting("not-yet-issued");
            let store = Arc::new(InMemoryTokenStore::with_tokens(pair("stale", "refresh-0")));
            let source = Arc::new(PanicOnce {
                api: Arc::clone(&api),
                calls: AtomicUsize::new(0),
            });
            let failures = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&failures);
            let middleware = RefreshingAuthMiddleware::new(store.clone(), source.clone())
                .with_auth_failure_handler(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            let client = ClientBuilder::new(Client::new())
                .with(middleware.clone())
                .with_arc(api.clone())
                .build();

            let err = client.get(URL).send().await.unwrap_err();
            assert!(matches!(
                recovery_error(&err),
                Some(AuthRecoveryError::RefreshFailed(_))
            ));
            assert_eq!(failures.load(Ordering::SeqCst), 1);
            assert!(store.access_token().is_none());
            assert!(store.refresh_token().is_none());
            assert!(!middleware.state.is_refreshing());

            store.set_tokens(pair("stale", "refresh-0"));
            let resp = client.get(URL).send().await?;

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(source.calls.load(Ordering::SeqCst), 2);
            assert_eq!(store.access_token().unwrap().as_str(), "access-2");
            assert_eq!(failures.load(Ordering::SeqCst), 1);
            Ok(())
        }

        #[tokio::test]
        async fn a_rejection_arriving_after_the_failure_reports_it_too() -> Result<()> {
            let h = Harness::new(Outcome::Reject);
            let client = ClientBuilder::new(Client::new())
                .with(h.middleware.clone())
                .with(DelayFirst {
                    delay: Duration::from_millis(300),
                    done: AtomicBool::new(false),
                })
                .with_arc(h.api.clone())
                .build();

            let (late, early) = tokio::join!(client.get(URL).send(), client.get(URL).send());

            for result in [late, early] {
                let err = result.unwrap_err();
                assert!(matches!(
                    recovery_error(&err),
                    Some(AuthRecoveryError::RefreshFailed(_))
                ));
            }
            assert_eq!(h.source.calls(), 1);
            assert_eq!(h.failures(), 1);
            Ok(())
        }
    }
}
