//! Entry topic. Forwards each session to whichever agent owns it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{BoxError, Service};
use tracing::{debug, warn};

use super::USER_TOPIC;
use crate::router::{Delivery, TopicId};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct UserAgent {
    /// Owner used when `current_agent` cannot receive the session
    fallback: String,
}

impl UserAgent {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
        }
    }
}

impl Service<Delivery<Session>> for UserAgent {
    type Response = ();
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, delivery: Delivery<Session>) -> Self::Future {
        let fallback = self.fallback.clone();
        Box::pin(async move {
            let Delivery {
                payload: mut session,
                cancel,
                publisher,
                ..
            } = delivery;

            let owner = session.current_agent.clone();
            if owner == USER_TOPIC || !publisher.is_registered(&owner) {
                warn!(
                    session_id = %session.id,
                    owner = %owner,
                    fallback = %fallback,
                    "session owner cannot receive it; using fallback"
                );
                session.current_agent = fallback;
            }

            let target = TopicId::keyed(session.current_agent.clone(), session.id.as_str());
            debug!(session_id = %session.id, to = %target, "forwarding session");
            publisher.publish_with_cancel(target, session, cancel.child_token())?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::TopicRouter;
    use std::sync::{Arc, Mutex};
    use tower::service_fn;
    use tower::util::BoxService;

    fn capture(router: &TopicRouter<Session>, topic: &str) -> Arc<Mutex<Vec<TopicId>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router
            .register(topic, move |_id: &TopicId| {
                let sink = sink.clone();
                BoxService::new(service_fn(move |d: Delivery<Session>| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push(d.topic);
                        Ok::<_, BoxError>(())
                    }
                }))
            })
            .unwrap();
        seen
    }

    #[tokio::test]
    async fn forwards_to_the_owner_keyed_by_session() {
        let router = TopicRouter::<Session>::new();
        router.register_service(USER_TOPIC, UserAgent::new("Front")).unwrap();
        let seen = capture(&router, "Desk");

        let session = Session::new("Desk", 20);
        router
            .publish(TopicId::keyed(USER_TOPIC, session.id.as_str()), session.clone())
            .unwrap();
        router.wait_idle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![TopicId::keyed("Desk", session.id.as_str())]
        );
    }

    #[tokio::test]
    async fn unroutable_owner_falls_back() {
        let router = TopicRouter::<Session>::new();
        router.register_service(USER_TOPIC, UserAgent::new("Front")).unwrap();
        let seen = capture(&router, "Front");

        router
            .publish(TopicId::new(USER_TOPIC), Session::new(USER_TOPIC, 20))
            .unwrap();
        router
            .publish(TopicId::new(USER_TOPIC), Session::new("Gone", 20))
            .unwrap();
        router.wait_idle().await;

        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
