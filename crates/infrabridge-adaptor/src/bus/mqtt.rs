use super::{BusError, MessageBus, Result};
use async_trait::async_trait;
use infrabridge_core::Message;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_PORT: u16 = 1883;
const REQUEST_CAPACITY: usize = 64;
const ECHO_LIMIT: usize = 4096;
const SUBSCRIPTIONS: [&str; 2] = ["infrastructure/#", "platform/management/plugin/#"];

/// Dot-separated platform topic to MQTT topic levels.
pub fn to_mqtt_topic(topic: &str) -> String {
    topic.replace('.', "/")
}

pub fn from_mqtt_topic(topic: &str) -> String {
    topic.replace('/', ".")
}

/// Splits `mqtt://host[:port]` into host and port.
pub fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');
    if rest.is_empty() {
        return Err(BusError::Connection(format!("invalid broker url '{url}'")));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| BusError::Connection(format!("invalid broker port in '{url}'")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_PORT)),
    }
}

/// Decodes one publish packet. The MQTT topic wins over the envelope topic.
pub fn decode_publish(topic: &str, payload: &[u8]) -> Result<Message> {
    let mut message: Message = serde_json::from_slice(payload)
        .map_err(|e| BusError::Subscribe(format!("undecodable envelope on {topic}: {e}")))?;
    message.topic = from_mqtt_topic(topic);
    Ok(message)
}

type EchoSet = Arc<Mutex<HashSet<(String, String)>>>;

/// Bus backed by an MQTT broker.
///
/// The broker hands the adaptor back its own publications on subscribed
/// topics. Those echoes are recognised by (topic, sid) and dropped once.
pub struct MqttBus {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    echoes: EchoSet,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    pub fn new(url: &str, client_id: &str) -> Result<Self> {
        let (host, port) = parse_broker_url(url)?;
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        info!(url = %url, client_id = %client_id, "MQTT bus configured");
        Ok(Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            echoes: Arc::new(Mutex::new(HashSet::new())),
            poller: Mutex::new(None),
        })
    }

    fn remember_echo(&self, message: &Message) {
        if let Ok(mut echoes) = self.echoes.lock() {
            if echoes.len() >= ECHO_LIMIT {
                echoes.clear();
            }
            echoes.insert((message.topic.clone(), message.sid.clone()));
        }
    }
}

fn is_echo(echoes: &EchoSet, message: &Message) -> bool {
    echoes
        .lock()
        .map(|mut echoes| echoes.remove(&(message.topic.clone(), message.sid.clone())))
        .unwrap_or(false)
}

async fn poll_loop(
    mut eventloop: EventLoop,
    ingress: mpsc::UnboundedSender<Message>,
    echoes: EchoSet,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = match decode_publish(&publish.topic, &publish.payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Dropping inbound MQTT message");
                        continue;
                    }
                };
                if is_echo(&echoes, &message) {
                    debug!(topic = %message.topic, sid = %message.sid, "Dropping own publication");
                    continue;
                }
                if ingress.send(message).is_err() {
                    info!("Ingress closed, stopping MQTT poller");
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn subscribe(&self, ingress: mpsc::UnboundedSender<Message>) -> Result<()> {
        let eventloop = self
            .eventloop
            .lock()
            .map_err(|_| BusError::Subscribe("Lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| BusError::Subscribe("already subscribed".to_string()))?;

        for topic in SUBSCRIPTIONS {
            self.client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| BusError::Subscribe(e.to_string()))?;
        }

        let handle = tokio::spawn(poll_loop(eventloop, ingress, self.echoes.clone()));
        if let Ok(mut poller) = self.poller.lock() {
            *poller = Some(handle);
        }
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<()> {
        let payload =
            serde_json::to_vec(&message).map_err(|e| BusError::Publish(e.to_string()))?;
        self.remember_echo(&message);
        self.client
            .publish(to_mqtt_topic(&message.topic), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BusError::Connection(e.to_string()));
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
        result
    }
}
