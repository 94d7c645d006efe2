//! In-process topic router.
//!
//! A topic name maps to a factory. The first message published to a
//! `(topic, key)` pair creates one handler instance for it; later messages for
//! the same pair reuse that instance. Each instance owns a tokio task that
//! drains an unbounded FIFO queue, so:
//!
//! - messages for one partition are handled in publish order, one at a time
//! - distinct partitions run concurrently
//!
//! Delivery is at-most-once. A handler error is logged and the message is
//! dropped. Every delivery carries a [`CancellationToken`]; messages whose
//! token is already cancelled when they reach the head of the queue are
//! skipped without calling the handler.
//!
//! Quiescence is tracked with a counter that is incremented before a message
//! is enqueued and decremented once its handler has returned, panicked, or the
//! message was dropped unhandled. A handler that publishes before returning
//! therefore keeps the counter above zero, and [`TopicRouter::wait_idle`]
//! resolves only once no message is queued or executing anywhere.
//!
//! A panicking handler is reported like a handler error; the instance replaces
//! its service from the factory and keeps draining its queue. Instances with
//! no traffic for the idle timeout unregister themselves and are recreated by
//! the next publish.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::FutureExt;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tower::util::BoxService;
use tower::{BoxError, Service, ServiceExt};
use tracing::{debug, error, trace};

use crate::error::{Result, SwitchboardError};

/// Idle time after which a handler instance shuts down.
pub const DEFAULT_INSTANCE_IDLE: Duration = Duration::from_secs(60);

/// Address of a handler instance: a topic plus an optional partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicId {
    pub topic: String,
    pub key: Option<String>,
}

impl TopicId {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
        }
    }

    pub fn keyed(topic: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: Some(key.into()),
        }
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}/{}", self.topic, key),
            None => f.write_str(&self.topic),
        }
    }
}

/// One message as seen by a handler.
pub struct Delivery<M> {
    pub topic: TopicId,
    pub payload: M,
    pub cancel: CancellationToken,
    /// Handle for publishing follow-up messages from inside the handler
    pub publisher: Publisher<M>,
}

/// Boxed per-instance handler.
pub type HandlerService<M> = BoxService<Delivery<M>, (), BoxError>;

type Factory<M> = Arc<dyn Fn(&TopicId) -> HandlerService<M> + Send + Sync>;

struct Envelope<M> {
    delivery: Delivery<M>,
    reply: Option<oneshot::Sender<std::result::Result<(), BoxError>>>,
    pending: PendingGuard,
}

struct Inner<M> {
    factories: RwLock<HashMap<String, Factory<M>>>,
    instances: Mutex<HashMap<TopicId, mpsc::UnboundedSender<Envelope<M>>>>,
    pending: Arc<watch::Sender<usize>>,
    root: CancellationToken,
    /// How long an instance may sit with an empty queue before it retires
    idle: Duration,
}

/// Topic router. Cheap to clone; clones share state.
pub struct TopicRouter<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for TopicRouter<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Send + 'static> Default for TopicRouter<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send + 'static> TopicRouter<M> {
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_INSTANCE_IDLE)
    }

    /// Router whose instances retire after `idle` without traffic.
    pub fn with_idle_timeout(idle: Duration) -> Self {
        let (pending, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(Inner {
                factories: RwLock::new(HashMap::new()),
                instances: Mutex::new(HashMap::new()),
                pending: Arc::new(pending),
                root: CancellationToken::new(),
                idle,
            }),
        }
    }

    /// Register the factory for `topic`. Fails if the topic is taken.
    pub fn register<F>(&self, topic: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&TopicId) -> HandlerService<M> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut factories = self
            .inner
            .factories
            .write()
            .map_err(|_| SwitchboardError::RouterClosed)?;
        if factories.contains_key(&topic) {
            return Err(SwitchboardError::DuplicateTopic(topic));
        }
        debug!(topic = %topic, "registered topic");
        factories.insert(topic, Arc::new(factory));
        Ok(())
    }

    /// Register a cloneable service; each instance gets its own clone.
    pub fn register_service<S>(&self, topic: impl Into<String>, service: S) -> Result<()>
    where
        S: Service<Delivery<M>, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.register(topic, move |_id: &TopicId| BoxService::new(service.clone()))
    }

    pub fn is_registered(&self, topic: &str) -> bool {
        self.inner
            .factories
            .read()
            .map(|f| f.contains_key(topic))
            .unwrap_or(false)
    }

    /// Handle that does not keep the router alive.
    pub fn publisher(&self) -> Publisher<M> {
        Publisher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Enqueue `payload` for the instance addressed by `topic`.
    pub fn publish(&self, topic: TopicId, payload: M) -> Result<()> {
        let cancel = self.inner.root.child_token();
        Inner::enqueue(&self.inner, topic, payload, cancel, None)
    }

    pub fn publish_with_cancel(
        &self,
        topic: TopicId,
        payload: M,
        cancel: CancellationToken,
    ) -> Result<()> {
        Inner::enqueue(&self.inner, topic, payload, cancel, None)
    }

    /// Publish and wait for the handler's result.
    pub async fn send(&self, topic: TopicId, payload: M) -> Result<()> {
        let cancel = self.inner.root.child_token();
        Inner::send(&self.inner, topic, payload, cancel).await
    }

    /// Resolves once no message is queued or executing.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Cancel every delivery derived from the router's root token.
    pub fn cancel_all(&self) {
        self.inner.root.cancel();
    }

    pub fn instance_count(&self) -> usize {
        self.inner.instances.lock().map(|m| m.len()).unwrap_or(0)
    }
}

/// Weak publishing handle given to handlers.
pub struct Publisher<M> {
    inner: Weak<Inner<M>>,
}

impl<M> Clone for Publisher<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Send + 'static> Publisher<M> {
    fn upgrade(&self) -> Result<Arc<Inner<M>>> {
        self.inner.upgrade().ok_or(SwitchboardError::RouterClosed)
    }

    pub fn is_registered(&self, topic: &str) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let registered = match inner.factories.read() {
            Ok(factories) => factories.contains_key(topic),
            Err(_) => false,
        };
        registered
    }

    pub fn publish(&self, topic: TopicId, payload: M) -> Result<()> {
        let inner = self.upgrade()?;
        let cancel = inner.root.child_token();
        Inner::enqueue(&inner, topic, payload, cancel, None)
    }

    pub fn publish_with_cancel(
        &self,
        topic: TopicId,
        payload: M,
        cancel: CancellationToken,
    ) -> Result<()> {
        let inner = self.upgrade()?;
        Inner::enqueue(&inner, topic, payload, cancel, None)
    }

    pub async fn send(&self, topic: TopicId, payload: M) -> Result<()> {
        let inner = self.upgrade()?;
        let cancel = inner.root.child_token();
        Inner::send(&inner, topic, payload, cancel).await
    }
}

impl<M: Send + 'static> Inner<M> {
    async fn send(
        this: &Arc<Self>,
        topic: TopicId,
        payload: M,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        Self::enqueue(this, topic, payload, cancel, Some(tx))?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SwitchboardError::from_boxed(e, SwitchboardError::Handler)),
            Err(_) => Err(SwitchboardError::RouterClosed),
        }
    }

    fn enqueue(
        this: &Arc<Self>,
        topic: TopicId,
        payload: M,
        cancel: CancellationToken,
        reply: Option<oneshot::Sender<std::result::Result<(), BoxError>>>,
    ) -> Result<()> {
        let factory = {
            let factories = this
                .factories
                .read()
                .map_err(|_| SwitchboardError::RouterClosed)?;
            factories
                .get(&topic.topic)
                .cloned()
                .ok_or_else(|| SwitchboardError::UnknownTopic(topic.topic.clone()))?
        };

        let mut envelope = Envelope {
            delivery: Delivery {
                topic: topic.clone(),
                payload,
                cancel,
                publisher: Publisher {
                    inner: Arc::downgrade(this),
                },
            },
            reply,
            pending: PendingGuard::new(this.pending.clone()),
        };

        let mut instances = this
            .instances
            .lock()
            .map_err(|_| SwitchboardError::RouterClosed)?;
        // A second attempt covers an instance whose task has already exited.
        for _ in 0..2 {
            let sender = instances
                .entry(topic.clone())
                .or_insert_with(|| Self::spawn_instance(this, &topic, &factory));
            match sender.send(envelope) {
                Ok(()) => {
                    trace!(topic = %topic, "message enqueued");
                    return Ok(());
                }
                Err(mpsc::error::SendError(returned)) => {
                    debug!(topic = %topic, "handler instance gone; respawning");
                    instances.remove(&topic);
                    envelope = returned;
                }
            }
        }
        Err(SwitchboardError::RouterClosed)
    }

    fn spawn_instance(
        this: &Arc<Self>,
        topic: &TopicId,
        factory: &Factory<M>,
    ) -> mpsc::UnboundedSender<Envelope<M>> {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(topic = %topic, "spawning handler instance");
        tokio::spawn(run_instance(
            topic.clone(),
            factory.clone(),
            rx,
            Arc::downgrade(this),
            this.idle,
        ));
        tx
    }
}

/// Counts one queued or executing message; released on drop.
struct PendingGuard(Arc<watch::Sender<usize>>);

impl PendingGuard {
    fn new(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn run_instance<M: Send + 'static>(
    id: TopicId,
    factory: Factory<M>,
    mut rx: mpsc::UnboundedReceiver<Envelope<M>>,
    router: Weak<Inner<M>>,
    idle: Duration,
) {
    let mut service = factory(&id);
    loop {
        let next = tokio::time::timeout(idle, rx.recv()).await;
        let envelope = match next {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(_) => match retire(&id, &mut rx, &router) {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let Envelope {
            delivery,
            reply,
            pending,
        } = envelope;

        let result = if delivery.cancel.is_cancelled() {
            debug!(topic = %id, "skipping cancelled delivery");
            Err(Box::new(SwitchboardError::Cancelled) as BoxError)
        } else {
            let outcome = AssertUnwindSafe(dispatch(&mut service, delivery))
                .catch_unwind()
                .await;
            match outcome {
                Ok(result) => result,
                Err(panic) => {
                    service = factory(&id);
                    Err(panic_error(panic))
                }
            }
        };

        if let Err(e) = &result {
            error!(topic = %id, error = %e, "handler failed; message dropped");
        }
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
        drop(pending);
    }
    trace!(topic = %id, "handler instance stopped");
}

async fn dispatch<M>(
    service: &mut HandlerService<M>,
    delivery: Delivery<M>,
) -> std::result::Result<(), BoxError> {
    service.ready().await?.call(delivery).await
}

/// Unregister an idle instance unless a message raced in, which is returned instead.
fn retire<M>(
    id: &TopicId,
    rx: &mut mpsc::UnboundedReceiver<Envelope<M>>,
    router: &Weak<Inner<M>>,
) -> Option<Envelope<M>> {
    let inner = router.upgrade()?;
    let mut instances = inner.instances.lock().ok()?;
    match rx.try_recv() {
        Ok(envelope) => Some(envelope),
        Err(_) => {
            instances.remove(id);
            trace!(topic = %id, "idle handler instance retired");
            None
        }
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> BoxError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("handler panicked: {message}").into()
}
