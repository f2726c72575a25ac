//! Tower integration.
//!
//! [`AdmissionLayer`] wraps any service whose request type implements
//! [`RequestContext`]. Rejected requests never reach the inner service; admitted requests
//! on tracked endpoints are timed and their latency is fed back to the engine whether
//! the inner call succeeds or fails.

use crate::admission::{AdmissionEngine, Rejection, Verdict};
use crate::error::AdmissionError;
use crate::request::RequestContext;
use crate::rule::EndpointId;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower_layer::Layer;
use tower_service::Service;

/// Layer applying admission control.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    engine: Arc<AdmissionEngine>,
}

impl AdmissionLayer {
    pub fn new(engine: Arc<AdmissionEngine>) -> Self {
        Self { engine }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, engine: self.engine.clone() }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    engine: Arc<AdmissionEngine>,
}

impl<S> AdmissionService<S> {
    pub fn new(inner: S, engine: Arc<AdmissionEngine>) -> Self {
        Self { inner, engine }
    }

    pub fn engine(&self) -> &Arc<AdmissionEngine> {
        &self.engine
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, Req> Service<Req> for AdmissionService<S>
where
    S: Service<Req>,
    Req: RequestContext,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let admission = self.engine.check(&req);
        match admission.verdict {
            Verdict::Reject(rejection) => ResponseFuture::rejected(rejection),
            Verdict::Admit => {
                let timing = admission.endpoint.map(|endpoint| Timing {
                    engine: self.engine.clone(),
                    endpoint,
                    started: Instant::now(),
                });
                ResponseFuture::admitted(self.inner.call(req), timing)
            }
        }
    }
}

struct Timing {
    engine: Arc<AdmissionEngine>,
    endpoint: EndpointId,
    started: Instant,
}

/// Response future of [`AdmissionService`].
#[pin_project]
pub struct ResponseFuture<F> {
    #[pin]
    state: State<F>,
}

#[pin_project(project = StateProj)]
enum State<F> {
    Rejected { rejection: Option<Rejection> },
    Admitted {
        #[pin]
        inner: F,
        timing: Option<Timing>,
    },
}

impl<F> ResponseFuture<F> {
    fn rejected(rejection: Rejection) -> Self {
        Self { state: State::Rejected { rejection: Some(rejection) } }
    }

    fn admitted(inner: F, timing: Option<Timing>) -> Self {
        Self { state: State::Admitted { inner, timing } }
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
{
    type Output = Result<T, AdmissionError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().state.project() {
            StateProj::Rejected { rejection } => match rejection.take() {
                Some(rejection) => Poll::Ready(Err(AdmissionError::Rejected(rejection))),
                None => panic!("ResponseFuture polled after completion"),
            },
            StateProj::Admitted { inner, timing } => {
                let output = futures::ready!(inner.poll(cx));
                if let Some(Timing { engine, endpoint, started }) = timing.take() {
                    engine.record_completion(&endpoint, started.elapsed());
                }
                Poll::Ready(output.map_err(AdmissionError::Inner))
            }
        }
    }
}

impl<F> std::fmt::Debug for ResponseFuture<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Rejected { .. } => "rejected",
            State::Admitted { .. } => "admitted",
        };
        f.debug_struct("ResponseFuture").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionCache, RetryAfter};
    use crate::clock::ManualClock;
    use crate::request::RequestParts;
    use crate::rule::Rule;
    use crate::rule_cache::{InMemoryRuleSource, RuleCache};
    use std::convert::Infallible;
    use std::time::Duration;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn engine() -> Arc<AdmissionEngine> {
        let clock = Arc::new(ManualClock::new());
        let source: InMemoryRuleSource =
            [Rule::builder("e").ip_based(true).limit(1, 10).ban_for(7).build().unwrap()]
                .into_iter()
                .collect();
        let rules = RuleCache::new(Arc::new(source), 10, Duration::from_secs(60));
        let admissions = AdmissionCache::new(10, Duration::from_secs(60), clock.clone());
        Arc::new(AdmissionEngine::new(rules, admissions, clock))
    }

    #[tokio::test]
    async fn second_call_is_rejected_without_reaching_inner() {
        let engine = engine();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let svc = ServiceBuilder::new().layer(AdmissionLayer::new(engine.clone())).service(service_fn(
            move |_req: RequestParts| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move { Ok::<_, Infallible>("ok") }
            },
        ));

        let req = || RequestParts::new("e", "/e").with_remote_addr("1.2.3.4");
        assert_eq!(svc.clone().oneshot(req()).await.unwrap(), "ok");
        let err = svc.clone().oneshot(req()).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(RetryAfter::Seconds(7)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let metric = engine.metrics().snapshot(&EndpointId::new("e")).unwrap();
        assert_eq!((metric.samples, metric.rejections), (1, 1));
    }

    #[tokio::test]
    async fn inner_errors_are_wrapped_and_timed() {
        let engine = engine();
        let svc = AdmissionLayer::new(engine.clone()).layer(service_fn(|_req: RequestParts| async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "down"))
        }));
        let err = svc.oneshot(RequestParts::new("other", "/other")).await.unwrap_err();
        assert!(err.is_inner());
        assert_eq!(engine.metrics().snapshot(&EndpointId::new("other")).unwrap().samples, 1);
    }

    #[tokio::test]
    async fn untracked_requests_are_not_timed() {
        let engine = engine();
        let svc = AdmissionLayer::new(engine.clone())
            .layer(service_fn(|_req: RequestParts| async { Ok::<_, Infallible>(()) }));
        svc.clone().oneshot(RequestParts::unrouted("/static/app.js")).await.unwrap();
        svc.oneshot(RequestParts::new("e", "/turnstile/rules")).await.unwrap();
        assert_eq!(engine.metrics().pending_endpoints(), 0);
    }
}
