use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use shared_proto::realtime::{
    events, topic_for, BroadcastPayload, ChannelConfig, Frame, JoinPayload, PostgresChange,
    PostgresChangePayload, ReplyPayload,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use super::RealtimeError;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What a joined channel delivers to its subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    PostgresChange(PostgresChange),
    Broadcast { event: String, payload: Value },
    /// The server closed the channel or the socket dropped. Nothing follows.
    Closed,
}

struct Route {
    id: u64,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

/// State shared between the client handles and the socket tasks.
struct Shared {
    routes: DashMap<String, Route>,
    pending_replies: DashMap<String, oneshot::Sender<ReplyPayload>>,
    next_ref: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn next_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn dispatch(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(component = "realtime", error = %error, "dropping unreadable frame");
                return;
            }
        };

        if frame.event == events::REPLY {
            self.resolve_reply(frame);
            return;
        }

        let event = match frame.event.as_str() {
            events::POSTGRES_CHANGES => {
                match serde_json::from_value::<PostgresChangePayload>(frame.payload) {
                    Ok(change) => ChannelEvent::PostgresChange(change.data),
                    Err(error) => {
                        tracing::warn!(
                            component = "realtime",
                            topic = %frame.topic,
                            error = %error,
                            "dropping malformed postgres change"
                        );
                        return;
                    }
                }
            }
            events::BROADCAST => match serde_json::from_value::<BroadcastPayload>(frame.payload) {
                Ok(body) => ChannelEvent::Broadcast {
                    event: body.event,
                    payload: body.payload,
                },
                Err(error) => {
                    tracing::warn!(
                        component = "realtime",
                        topic = %frame.topic,
                        error = %error,
                        "dropping malformed broadcast"
                    );
                    return;
                }
            },
            events::ERROR | events::CLOSE => ChannelEvent::Closed,
            other => {
                tracing::debug!(component = "realtime", topic = %frame.topic, event = other, "ignoring frame");
                return;
            }
        };

        let delivered = match self.routes.get(&frame.topic) {
            Some(route) => route.events.send(event).is_ok(),
            None => {
                tracing::debug!(component = "realtime", topic = %frame.topic, "no subscriber for topic");
                return;
            }
        };
        if !delivered {
            self.routes.remove(&frame.topic);
        }
    }

    fn resolve_reply(&self, frame: Frame) {
        let Some(reference) = frame.reference else {
            return;
        };
        let Some((_, waiter)) = self.pending_replies.remove(&reference) else {
            // Heartbeat and leave acknowledgements land here.
            return;
        };
        match serde_json::from_value::<ReplyPayload>(frame.payload) {
            Ok(reply) => {
                let _ = waiter.send(reply);
            }
            Err(error) => {
                tracing::warn!(component = "realtime", reference = %reference, error = %error, "malformed reply");
            }
        }
    }

    fn topics(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.key().clone()).collect()
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for topic in self.topics() {
            if let Some((_, route)) = self.routes.remove(&topic) {
                let _ = route.events.send(ChannelEvent::Closed);
            }
        }
        self.pending_replies.clear();
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// One multiplexed websocket to the realtime service. Cheap to clone; the
/// socket closes when the last clone and the last subscription are gone.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Connection>,
}

impl RealtimeClient {
    pub async fn connect(url: Url, heartbeat: Duration) -> Result<Self, RealtimeError> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        tracing::info!(
            component = "realtime",
            host = url.host_str().unwrap_or_default(),
            "realtime socket connected"
        );

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let shared = Arc::new(Shared {
            routes: DashMap::new(),
            pending_replies: DashMap::new(),
            next_ref: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::warn!(component = "realtime", error = %error, "cannot encode frame");
                        continue;
                    }
                };
                if let Err(error) = write.send(Message::Text(text)).await {
                    tracing::warn!(component = "realtime", error = %error, "realtime write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader_shared = shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader_shared.dispatch(&text),
                    Ok(Message::Close(_)) => {
                        tracing::info!(component = "realtime", "server closed realtime socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(component = "realtime", error = %error, "realtime socket error");
                        break;
                    }
                }
            }
            reader_shared.shutdown();
        });

        let heartbeat_tx = outbound.clone();
        let heartbeat_shared = shared.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reference = heartbeat_shared.next_ref().to_string();
                if heartbeat_tx.send(Frame::heartbeat(reference)).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            inner: Arc::new(Connection {
                outbound,
                shared,
                tasks: vec![writer, reader, heartbeat_task],
            }),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::SeqCst)
    }

    /// Joins channel `name` and waits for the server to accept it.
    pub async fn subscribe(
        &self,
        name: &str,
        config: ChannelConfig,
        access_token: Option<String>,
    ) -> Result<Subscription, RealtimeError> {
        if self.is_closed() {
            return Err(RealtimeError::Closed);
        }

        let shared = &self.inner.shared;
        let topic = topic_for(name);
        let id = shared.next_ref();
        let reference = id.to_string();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        shared.routes.insert(
            topic.clone(),
            Route {
                id,
                events: events_tx,
            },
        );

        let (reply_tx, reply_rx) = oneshot::channel();
        shared.pending_replies.insert(reference.clone(), reply_tx);

        let payload = JoinPayload {
            config,
            access_token,
        };
        let subscription = Subscription {
            topic: topic.clone(),
            id,
            events: events_rx,
            client: self.clone(),
        };
        self.send(Frame::join(&topic, &payload, reference.clone()))?;

        let reply = match tokio::time::timeout(JOIN_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(RealtimeError::Closed),
            Err(_) => {
                shared.pending_replies.remove(&reference);
                return Err(RealtimeError::Timeout(format!("join of {topic}")));
            }
        };

        if !reply.is_ok() {
            return Err(RealtimeError::JoinRejected {
                topic,
                reason: reply.response.to_string(),
            });
        }

        tracing::debug!(component = "realtime", topic = %subscription.topic, "channel joined");
        Ok(subscription)
    }

    /// Hands a refreshed JWT to every joined channel. Later joins pick the
    /// token up from their own join payload.
    pub fn set_access_token(&self, token: &str) -> Result<usize, RealtimeError> {
        let topics = self.inner.shared.topics();
        for topic in &topics {
            let reference = self.inner.shared.next_ref().to_string();
            self.send(Frame::access_token(topic, token, reference))?;
        }
        tracing::debug!(component = "realtime", channels = topics.len(), "access token pushed");
        Ok(topics.len())
    }

    fn send(&self, frame: Frame) -> Result<(), RealtimeError> {
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| RealtimeError::Closed)
    }

    fn leave(&self, topic: &str, id: u64) {
        let shared = &self.inner.shared;
        let removed = shared.routes.remove_if(topic, |_, route| route.id == id);
        if removed.is_none() {
            return;
        }
        let reference = shared.next_ref().to_string();
        let _ = self.send(Frame::leave(topic, reference));
        tracing::debug!(component = "realtime", topic = %topic, "channel left");
    }
}

/// A joined channel. Dropping it leaves the channel.
pub struct Subscription {
    topic: String,
    id: u64,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    client: RealtimeClient,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event on the channel; `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            topic: self.topic.clone(),
            client: self.client.clone(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.client.leave(&self.topic, self.id);
    }
}

/// Broadcast handle for a joined channel, usable after the subscription
/// itself moved into a pump task.
#[derive(Clone)]
pub struct ChannelSender {
    topic: String,
    client: RealtimeClient,
}

impl ChannelSender {
    pub fn broadcast(&self, event: &str, payload: Value) -> Result<(), RealtimeError> {
        let reference = self.client.inner.shared.next_ref().to_string();
        self.client
            .send(Frame::broadcast(&self.topic, event, payload, reference))
    }
}
