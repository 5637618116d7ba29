use crate::bus::MessageBus;
use crate::shared::error::{AdaptorError, AdaptorResult};
use crate::shared::types::{heartbeat_topic, AdaptorState, DEREGISTER_TOPIC, REGISTER_TOPIC};
use infrabridge_core::payload::{
    DeregistrationRequest, DeregistrationResponse, Heartbeat, RegistrationRequest,
    RegistrationResponse,
};
use infrabridge_core::{new_sid, Message, JSON_CONTENT_TYPE};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{info, warn};

/// Identity the adaptor announces to the plugin manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub description: String,
}

struct PendingHandshake {
    topic: &'static str,
    reply: oneshot::Sender<Message>,
}

/// Registration handshake, deregistration handshake and heartbeat content.
pub struct PluginLifecycleService {
    bus: Arc<dyn MessageBus>,
    descriptor: PluginDescriptor,
    handshake_timeout: Duration,
    pending: Mutex<HashMap<String, PendingHandshake>>,
    uuid: RwLock<Option<String>>,
    state: RwLock<AdaptorState>,
}

impl PluginLifecycleService {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        descriptor: PluginDescriptor,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            descriptor,
            handshake_timeout,
            pending: Mutex::new(HashMap::new()),
            uuid: RwLock::new(None),
            state: RwLock::new(AdaptorState::Ready),
        }
    }

    pub fn state(&self) -> AdaptorState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(AdaptorState::Failed)
    }

    fn set_state(&self, next: AdaptorState) {
        if let Ok(mut state) = self.state.write() {
            info!(from = %*state, to = %next, "Adaptor state change");
            *state = next;
        }
    }

    pub fn uuid(&self) -> Option<String> {
        self.uuid.read().ok().and_then(|uuid| uuid.clone())
    }

    /// True when `message` answers one of our outstanding handshakes.
    /// Our own requests carry a `replyTo`, the answers do not.
    pub fn is_handshake_response(&self, message: &Message) -> bool {
        if message.reply_to.is_some() {
            return false;
        }
        self.pending
            .lock()
            .map(|pending| {
                pending
                    .get(&message.sid)
                    .map(|handshake| handshake.topic == message.topic)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Hands a handshake response to the waiting start/stop path.
    pub fn complete(&self, message: Message) -> bool {
        let handshake = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&message.sid));
        match handshake {
            Some(handshake) => handshake.reply.send(message).is_ok(),
            None => false,
        }
    }

    async fn handshake<T: Serialize>(&self, topic: &'static str, body: &T) -> AdaptorResult<Message> {
        let body =
            serde_json::to_string(body).map_err(|e| AdaptorError::Handshake(e.to_string()))?;
        let sid = new_sid();
        let request = Message::new(
            body,
            JSON_CONTENT_TYPE,
            topic,
            sid.clone(),
            Some(topic.to_string()),
        );

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| AdaptorError::Handshake("Lock poisoned".to_string()))?
            .insert(sid.clone(), PendingHandshake { topic, reply: tx });

        if let Err(e) = self.bus.publish(request).await {
            self.forget(&sid);
            return Err(AdaptorError::Bus(e.to_string()));
        }

        match time::timeout(self.handshake_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.forget(&sid);
                Err(AdaptorError::Handshake(format!("{topic} abandoned")))
            }
            Err(_) => {
                self.forget(&sid);
                Err(AdaptorError::Timeout(format!(
                    "no answer on {topic} within {:?}",
                    self.handshake_timeout
                )))
            }
        }
    }

    fn forget(&self, sid: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(sid);
        }
    }

    /// Registers with the plugin manager and moves to RUNNING.
    pub async fn register(&self) -> AdaptorResult<String> {
        let request = RegistrationRequest {
            name: self.descriptor.name.clone(),
            version: self.descriptor.version.clone(),
            description: self.descriptor.description.clone(),
        };
        let response: RegistrationResponse =
            self.handshake(REGISTER_TOPIC, &request).await?.parse_body()?;

        match (response.is_ok(), response.uuid) {
            (true, Some(uuid)) => {
                if let Ok(mut slot) = self.uuid.write() {
                    *slot = Some(uuid.clone());
                }
                self.set_state(AdaptorState::Running);
                info!(uuid = %uuid, "Registered with the plugin manager");
                Ok(uuid)
            }
            _ => {
                let reason = response
                    .error
                    .unwrap_or_else(|| format!("registration answered {}", response.status));
                warn!(reason = %reason, "Registration refused");
                Err(AdaptorError::Handshake(reason))
            }
        }
    }

    /// Deregisters and moves to STOPPED, or FAILED on a refused deregistration.
    pub async fn deregister(&self) -> AdaptorResult<()> {
        let Some(uuid) = self.uuid() else {
            self.set_state(AdaptorState::Stopped);
            return Ok(());
        };
        let response: DeregistrationResponse = self
            .handshake(DEREGISTER_TOPIC, &DeregistrationRequest { uuid })
            .await?
            .parse_body()?;

        if response.status == "OK" {
            self.set_state(AdaptorState::Stopped);
            info!("Deregistered from the plugin manager");
            Ok(())
        } else {
            self.set_state(AdaptorState::Failed);
            Err(AdaptorError::Handshake(format!(
                "deregistration answered {}",
                response.status
            )))
        }
    }

    /// Marks the adaptor stopped without a handshake.
    pub fn mark_stopped(&self) {
        if self.state() != AdaptorState::Failed {
            self.set_state(AdaptorState::Stopped);
        }
    }

    /// Liveness message, only while RUNNING with a known uuid.
    pub fn heartbeat(&self) -> Option<Message> {
        let state = self.state();
        if state != AdaptorState::Running {
            return None;
        }
        let uuid = self.uuid()?;
        let body = serde_json::to_string(&Heartbeat {
            uuid: uuid.clone(),
            state: state.to_string(),
        })
        .ok()?;
        Some(Message::new(
            body,
            JSON_CONTENT_TYPE,
            heartbeat_topic(&uuid),
            new_sid(),
            None,
        ))
    }

    pub async fn send_heartbeat(&self) -> AdaptorResult<bool> {
        match self.heartbeat() {
            Some(message) => {
                self.bus
                    .publish(message)
                    .await
                    .map_err(|e| AdaptorError::Bus(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use tokio::sync::mpsc;

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor {
            name: "sonata.kernel.InfrAdaptor".into(),
            version: "0.1.0".into(),
            description: "test".into(),
        }
    }

    fn service(bus: &InMemoryBus, timeout: Duration) -> Arc<PluginLifecycleService> {
        Arc::new(PluginLifecycleService::new(
            Arc::new(bus.clone()),
            descriptor(),
            timeout,
        ))
    }

    /// Answers the next request seen on `topic` with `body`.
    fn answer_next(
        bus: &InMemoryBus,
        service: Arc<PluginLifecycleService>,
        topic: &'static str,
        body: &'static str,
    ) {
        let mut outbound = bus.outbound();
        tokio::spawn(async move {
            while let Ok(request) = outbound.recv().await {
                if request.topic == topic {
                    let response =
                        Message::new(body, JSON_CONTENT_TYPE, topic, request.sid.clone(), None);
                    assert!(service.is_handshake_response(&response));
                    service.complete(response);
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_register_ok_moves_to_running() {
        let bus = InMemoryBus::new();
        let service = service(&bus, Duration::from_secs(5));
        answer_next(
            &bus,
            service.clone(),
            REGISTER_TOPIC,
            r#"{"status":"OK","uuid":"plugin-1"}"#,
        );

        assert_eq!(service.register().await.unwrap(), "plugin-1");
        assert_eq!(service.state(), AdaptorState::Running);
        assert_eq!(service.uuid().as_deref(), Some("plugin-1"));
    }

    #[tokio::test]
    async fn test_register_waits_for_answer() {
        let bus = InMemoryBus::new();
        let service = service(&bus, Duration::from_secs(5));
        let mut outbound = bus.outbound();

        let mut registering = tokio_test::task::spawn(service.register());
        tokio_test::assert_pending!(registering.poll());
        let request = outbound.try_recv().unwrap();
        assert_eq!(service.state(), AdaptorState::Ready);

        assert!(service.complete(Message::new(
            r#"{"status":"OK","uuid":"p-2"}"#,
            JSON_CONTENT_TYPE,
            REGISTER_TOPIC,
            request.sid,
            None,
        )));
        assert!(registering.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(registering.poll()).unwrap(),
            "p-2"
        );
    }

    #[tokio::test]
    async fn test_register_refused() {
        let bus = InMemoryBus::new();
        let service = service(&bus, Duration::from_secs(5));
        answer_next(
            &bus,
            service.clone(),
            REGISTER_TOPIC,
            r#"{"status":"ERROR","error":"duplicate plugin"}"#,
        );

        let err = service.register().await.unwrap_err();
        assert!(err.to_string().contains("duplicate plugin"));
        assert_eq!(service.state(), AdaptorState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_times_out_without_answer() {
        let bus = InMemoryBus::new();
        let service = service(&bus, Duration::from_secs(30));
        assert!(matches!(
            service.register().await,
            Err(AdaptorError::Timeout(_))
        ));
        assert!(service.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_own_request_is_not_a_response() {
        let bus = InMemoryBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.subscribe(tx).await.unwrap();
        let service = service(&bus, Duration::from_secs(5));
        let mut outbound = bus.outbound();

        let pending = {
            let service = service.clone();
            tokio::spawn(async move { service.register().await })
        };
        let request = outbound.recv().await.unwrap();
        assert!(!service.is_handshake_response(&request));

        service.complete(Message::new(
            r#"{"status":"OK","uuid":"p"}"#,
            JSON_CONTENT_TYPE,
            REGISTER_TOPIC,
            request.sid,
            None,
        ));
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_deregister_refused_is_failed() {
        let bus = InMemoryBus::new();
        let service = service(&bus, Duration::from_secs(5));
        answer_next(
            &bus,
            service.clone(),
            REGISTER_TOPIC,
            r#"{"status":"OK","uuid":"plugin-1"}"#,
        );
        service.register().await.unwrap();

        answer_next(&bus, service.clone(), DEREGISTER_TOPIC, r#"{"status":"ERROR"}"#);
        assert!(service.deregister().await.is_err());
        assert_eq!(service.state(), AdaptorState::Failed);
    }

    #[tokio::test]
    async fn test_heartbeat_only_while_running() {
        let bus = InMemoryBus::new();
        let service = service(&bus, Duration::from_secs(5));
        assert!(service.heartbeat().is_none());

        answer_next(
            &bus,
            service.clone(),
            REGISTER_TOPIC,
            r#"{"status":"OK","uuid":"plugin-1"}"#,
        );
        service.register().await.unwrap();

        let heartbeat = service.heartbeat().unwrap();
        assert_eq!(heartbeat.topic, "platform.management.plugin.plugin-1.heartbeat");
        let body: Heartbeat = heartbeat.parse_body().unwrap();
        assert_eq!(body.state, "RUNNING");

        service.mark_stopped();
        assert!(service.heartbeat().is_none());
    }
}
