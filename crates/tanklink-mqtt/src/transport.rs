//! rumqttc-backed implementation of the session transport.

use std::time::Duration;

use futures_util::future::BoxFuture;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tanklink_core::{Transport, TransportError, TransportEvent};

use crate::config::MqttConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Pause between event-loop poll retries after a connection error, so a
/// dead broker is not hammered.
const POLL_RETRY_PAUSE: Duration = Duration::from_secs(1);

struct Link {
    client: AsyncClient,
    stop: CancellationToken,
}

/// MQTT transport. One instance serves one session; `connect` may be called
/// again after `disconnect`.
pub struct MqttTransport {
    config: MqttConfig,
    link: Mutex<Option<Link>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(self.config.clean_session);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username, password);
        }
        if self.config.use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        options
    }
}

impl Transport for MqttTransport {
    fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut link = self.link.lock().await;
            if link.is_some() {
                return Err(TransportError::Connect("already connected".to_owned()));
            }
            let (client, event_loop) = AsyncClient::new(self.options(), 64);
            let stop = CancellationToken::new();
            let (ready_tx, ready_rx) = oneshot::channel();
            tokio::spawn(poll_loop(event_loop, events, ready_tx, stop.clone()));

            match tokio::time::timeout(CONNECT_TIMEOUT, ready_rx).await {
                Ok(Ok(Ok(()))) => {
                    *link = Some(Link { client, stop });
                    Ok(())
                }
                Ok(Ok(Err(error))) => {
                    stop.cancel();
                    Err(error)
                }
                Ok(Err(_)) => {
                    stop.cancel();
                    Err(TransportError::Closed)
                }
                Err(_) => {
                    stop.cancel();
                    Err(TransportError::Connect(
                        "timed out waiting for CONNACK".to_owned(),
                    ))
                }
            }
        })
    }

    /// The rumqttc event loop re-dials on its own every poll, so a recovery
    /// attempt only has to check the link is still supposed to exist.
    /// Success is reported by the poll loop as [`TransportEvent::Resumed`].
    fn reconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.link.lock().await.is_none() {
                return Err(TransportError::Closed);
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let Some(link) = self.link.lock().await.take() else {
                return Ok(());
            };
            if let Err(error) = link.client.disconnect().await {
                debug!(%error, "MQTT disconnect");
            }
            link.stop.cancel();
            Ok(())
        })
    }

    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let link = self.link.lock().await;
            let link = link.as_ref().ok_or(TransportError::Closed)?;
            link.client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
                .map_err(|error| TransportError::Publish(error.to_string()))
        })
    }

    fn subscribe(&self, filter: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let link = self.link.lock().await;
            let link = link.as_ref().ok_or(TransportError::Closed)?;
            link.client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|error| TransportError::Subscribe(error.to_string()))
        })
    }

    fn unsubscribe(&self, filter: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let link = self.link.lock().await;
            let link = link.as_ref().ok_or(TransportError::Closed)?;
            link.client
                .unsubscribe(filter)
                .await
                .map_err(|error| TransportError::Subscribe(error.to_string()))
        })
    }
}

/// Drives the rumqttc event loop, translating its packets into transport
/// events. `ready` answers the initial connect with the first CONNACK or
/// the first error.
async fn poll_loop(
    mut event_loop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    ready: oneshot::Sender<Result<(), TransportError>>,
    stop: CancellationToken,
) {
    let mut ready = Some(ready);
    let mut up = false;
    loop {
        let polled = tokio::select! {
            () = stop.cancelled() => break,
            polled = event_loop.poll() => polled,
        };
        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                } else if !up {
                    debug!(session_present = ack.session_present, "broker link restored");
                    let _ = events
                        .send(TransportEvent::Resumed {
                            session_preserved: ack.session_present,
                        })
                        .await;
                }
                up = true;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let frame = TransportEvent::Frame {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if events.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(error) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(TransportError::Connect(error.to_string())));
                    break;
                }
                if up {
                    up = false;
                    warn!(%error, "broker link lost");
                    if events
                        .send(TransportEvent::Interrupted {
                            reason: error.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                tokio::time::sleep(POLL_RETRY_PAUSE).await;
            }
        }
    }
    debug!("MQTT poll loop stopped");
}
