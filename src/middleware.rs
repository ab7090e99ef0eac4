//! Tower middleware that gates a service on a traffic shaping controller.

use crate::error::GateError;
use crate::shaping::TrafficShapingController;
use crate::stats::NodeRef;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that asks a [`TrafficShapingController`] before every request.
#[derive(Clone, Debug)]
pub struct ShapingLayer {
    resource: Arc<str>,
    controller: Arc<dyn TrafficShapingController>,
    stats: NodeRef,
}

impl ShapingLayer {
    /// Gate requests to `resource` on `controller`, reading throughput from `stats`.
    pub fn new(
        resource: impl Into<String>,
        controller: Arc<dyn TrafficShapingController>,
        stats: NodeRef,
    ) -> Self {
        Self { resource: Arc::from(resource.into()), controller, stats }
    }
}

impl<S> Layer<S> for ShapingLayer {
    type Service = ShapingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ShapingService {
            inner: service,
            resource: self.resource.clone(),
            controller: self.controller.clone(),
            stats: self.stats.clone(),
        }
    }
}

/// Middleware service produced by [`ShapingLayer`].
#[derive(Clone, Debug)]
pub struct ShapingService<S> {
    inner: S,
    resource: Arc<str>,
    controller: Arc<dyn TrafficShapingController>,
    stats: NodeRef,
}

impl<S, Req> Service<Req> for ShapingService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = GateError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GateError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let controller = self.controller.clone();
        let stats = self.stats.clone();
        let resource = self.resource.clone();
        // Take the readied service, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            // One unit per request; the pacing variant may wait here.
            if !controller.can_pass(&*stats, 1, false).await {
                tracing::debug!(resource = %resource, "Request blocked by flow control");
                return Err(GateError::Blocked { resource: resource.to_string() });
            }
            inner.call(req).await.map_err(GateError::Inner)
        })
    }
}
