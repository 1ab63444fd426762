//! Push-notification bridge
//!
//! Keeps a WebSocket to the backend's notification endpoint open and relays
//! every frame onto the bus as [`Event::Notification`], verbatim. Consumers
//! filter by event name themselves; no interpretation happens here. The
//! connection is retried with a fixed delay, forever.

use crate::bus::{Event, EventBus};
use drishti_common::NotificationFrame;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Connection state of the notification socket, for the live-capture
/// status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveStatus {
    Connecting,
    Online,
    Reconnecting,
}

impl LiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveStatus::Connecting => "connecting",
            LiveStatus::Online => "online",
            LiveStatus::Reconnecting => "reconnecting",
        }
    }
}

pub struct LiveUpdateCoordinator {
    bus: Arc<EventBus>,
    url: String,
    reconnect_delay: Duration,
    status_tx: watch::Sender<LiveStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveUpdateCoordinator {
    pub fn new(bus: Arc<EventBus>, url: impl Into<String>) -> Self {
        let (status_tx, _) = watch::channel(LiveStatus::Connecting);
        Self {
            bus,
            url: url.into(),
            reconnect_delay: RECONNECT_DELAY,
            status_tx,
            task: Mutex::new(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn status(&self) -> watch::Receiver<LiveStatus> {
        self.status_tx.subscribe()
    }

    /// Spawn the connection loop. Calling again restarts it.
    pub fn start(&self) {
        let bus = self.bus.clone();
        let url = self.url.clone();
        let delay = self.reconnect_delay;
        let status_tx = self.status_tx.clone();

        let mut task = self.task.lock().unwrap();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        *task = Some(tokio::spawn(async move {
            run_loop(bus, url, delay, status_tx).await;
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for LiveUpdateCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    bus: Arc<EventBus>,
    url: String,
    delay: Duration,
    status_tx: watch::Sender<LiveStatus>,
) {
    loop {
        match connect_async(&url).await {
            Ok((stream, _)) => {
                tracing::info!(url = %url, "notification socket connected");
                status_tx.send_replace(LiveStatus::Online);
                // Synthesized frame so subscribers can react to the socket
                // opening like any other notification
                bus.dispatch(Event::Notification(NotificationFrame::new(
                    "connected",
                    serde_json::Value::Null,
                )));

                let (_, mut read) = stream.split();
                while let Some(message) = read.next().await {
                    match message {
                        Ok(Message::Text(text)) => match NotificationFrame::from_json(&text) {
                            Ok(frame) => {
                                tracing::debug!(event = %frame.event, "notification received");
                                bus.dispatch(Event::Notification(frame));
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "malformed notification frame");
                            }
                        },
                        Ok(Message::Close(_)) => {
                            tracing::info!("notification socket closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "notification socket error");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "notification socket connect failed");
            }
        }

        status_tx.send_replace(LiveStatus::Reconnecting);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topic;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn local_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Accept one connection, push the given frames, close
    async fn serve_one(listener: &TcpListener, frames: &[&str]) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();
        for frame in frames {
            socket.send(Message::Text((*frame).into())).await.unwrap();
        }
        socket.close(None).await.unwrap();
    }

    fn collect_events(bus: &EventBus) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.register(Topic::Notifications, move |event| {
            if let Event::Notification(frame) = event {
                seen2.lock().unwrap().push(frame.event.clone());
            }
        });
        seen
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_frames_are_republished_verbatim() {
        let (listener, url) = local_listener().await;
        let bus = Arc::new(EventBus::new());
        let seen = collect_events(&bus);

        let coordinator = LiveUpdateCoordinator::new(bus, url)
            .with_reconnect_delay(Duration::from_secs(60));
        coordinator.start();

        serve_one(
            &listener,
            &[
                r#"{"event": "rules.new", "message": {"id": "rule-a"}}"#,
                r#"{"event": "pcap.completed", "message": null}"#,
            ],
        )
        .await;

        wait_for(|| seen.lock().unwrap().len() >= 3).await;
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &["connected", "rules.new", "pcap.completed"]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (listener, url) = local_listener().await;
        let bus = Arc::new(EventBus::new());
        let seen = collect_events(&bus);

        let coordinator = LiveUpdateCoordinator::new(bus, url)
            .with_reconnect_delay(Duration::from_secs(60));
        coordinator.start();

        serve_one(
            &listener,
            &["this is not json", r#"{"event": "services.edit"}"#],
        )
        .await;

        wait_for(|| seen.lock().unwrap().len() >= 2).await;
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &["connected", "services.edit"]
        );
    }

    #[tokio::test]
    async fn test_reconnects_after_close() {
        let (listener, url) = local_listener().await;
        let bus = Arc::new(EventBus::new());
        let seen = collect_events(&bus);

        let coordinator = LiveUpdateCoordinator::new(bus, url)
            .with_reconnect_delay(Duration::from_millis(20));
        let mut status = coordinator.status();
        assert_eq!(*status.borrow(), LiveStatus::Connecting);
        coordinator.start();

        serve_one(&listener, &[r#"{"event": "rules.new"}"#]).await;
        wait_for(|| seen.lock().unwrap().len() >= 2).await;

        status.wait_for(|s| *s == LiveStatus::Reconnecting).await.unwrap();

        // Second connection after the retry delay
        serve_one(&listener, &[r#"{"event": "rules.edit"}"#]).await;
        wait_for(|| seen.lock().unwrap().len() >= 4).await;
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &["connected", "rules.new", "connected", "rules.edit"]
        );
    }

    #[tokio::test]
    async fn test_stop_aborts_the_loop() {
        let (listener, url) = local_listener().await;
        let bus = Arc::new(EventBus::new());
        let seen = collect_events(&bus);

        let coordinator = LiveUpdateCoordinator::new(bus, url)
            .with_reconnect_delay(Duration::from_millis(20));
        coordinator.start();
        serve_one(&listener, &[]).await;
        wait_for(|| !seen.lock().unwrap().is_empty()).await;

        coordinator.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // No further connection attempts reach the listener
        let idle = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(idle.is_err());
    }
}
