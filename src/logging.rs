//! Logging: subscriber setup and delivery spans
//!
//! - [`init`] installs a `tracing-subscriber` fmt subscriber filtered by
//!   `RUST_LOG` or the configured directive
//! - [`TracingLayer`] wraps a router handler so every delivery runs inside a
//!   `deliver` span carrying the topic and partition key; everything the
//!   agent logs during its turn inherits those fields

use std::future::Future;
use std::pin::Pin;

use tower::{BoxError, Layer, Service};
use tracing::{debug, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use crate::router::Delivery;

/// Install the global subscriber. Later calls are no-ops.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Layer that adds a span around each delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone)]
pub struct Tracing<S> {
    inner: S,
}

impl<S> Layer<S> for TracingLayer {
    type Service = Tracing<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Tracing { inner }
    }
}

impl<S, M> Service<Delivery<M>> for Tracing<S>
where
    S: Service<Delivery<M>, Response = (), Error = BoxError> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, delivery: Delivery<M>) -> Self::Future {
        let span = info_span!(
            "deliver",
            topic = %delivery.topic.topic,
            key = delivery.topic.key.as_deref().unwrap_or("-"),
        );
        let fut = self.inner.call(delivery);
        Box::pin(
            async move {
                let out = fut.await;
                debug!(ok = out.is_ok(), "delivery handled");
                out
            }
            .instrument(span),
        )
    }
}
