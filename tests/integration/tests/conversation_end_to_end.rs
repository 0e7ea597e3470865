use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use relay_ai::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, RelayAiError};
use relay_orchestrator::{
    ChatTransport, ContactKey, EnqueueOutcome, InboundDisposition, InboundEvent, JsonlConversationStore,
    LlmReplyGenerator, LlmReplySettings, MediaFetcher, MediaSource, OrchestratorConfig,
    Orchestrator, OrchestratorDeps, OrderLogOutcome, OrderStore, Presence, TranscriptStore,
    TransportError, TurnOutcome,
};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

const CUSTOMER: &str = "5491100000001@s.whatsapp.net";
const DRAIN: Duration = Duration::from_secs(10);

struct ScriptedClient {
    responses: AsyncMutex<VecDeque<String>>,
    requests: AsyncMutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn new(responses: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            responses: AsyncMutex::new(responses.into_iter().map(|v| v.to_string()).collect()),
            requests: AsyncMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, RelayAiError> {
        self.requests.lock().await.push(request);
        let content = self
            .responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| RelayAiError::InvalidResponse("scripted response queue exhausted".into()))?;
        Ok(ChatResponse {
            message: Message::assistant_text(content),
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Delivered {
    Text(String),
    MediaUrl(String),
    MediaInline(usize),
    Presence(Presence),
}

/// Gateway that refuses URL media, forcing the inline retry.
#[derive(Default)]
struct GatewayRecorder {
    delivered: AsyncMutex<Vec<Delivered>>,
}

impl GatewayRecorder {
    async fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl ChatTransport for GatewayRecorder {
    async fn send_text(&self, _contact: &ContactKey, text: &str) -> Result<(), TransportError> {
        self.delivered
            .lock()
            .await
            .push(Delivered::Text(text.to_string()));
        Ok(())
    }

    async fn send_media(
        &self,
        _contact: &ContactKey,
        source: &MediaSource,
        _caption: Option<&str>,
    ) -> Result<(), TransportError> {
        match source {
            MediaSource::Url(url) => {
                self.delivered
                    .lock()
                    .await
                    .push(Delivered::MediaUrl(url.clone()));
                Err(TransportError::Status {
                    status: 415,
                    detail: "remote media rejected".to_string(),
                })
            }
            MediaSource::Inline(bytes) => {
                self.delivered
                    .lock()
                    .await
                    .push(Delivered::MediaInline(bytes.len()));
                Ok(())
            }
        }
    }

    async fn send_presence(
        &self,
        _contact: &ContactKey,
        presence: Presence,
    ) -> Result<(), TransportError> {
        self.delivered.lock().await.push(Delivered::Presence(presence));
        Ok(())
    }
}

struct FixedImage;

#[async_trait]
impl MediaFetcher for FixedImage {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, TransportError> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }
}

struct Harness {
    orchestrator: Orchestrator,
    gateway: Arc<GatewayRecorder>,
    client: Arc<ScriptedClient>,
    store: Arc<JsonlConversationStore>,
}

fn harness(root: &std::path::Path, responses: Vec<serde_json::Value>) -> Harness {
    let gateway = Arc::new(GatewayRecorder::default());
    let client = ScriptedClient::new(responses);
    let store = Arc::new(JsonlConversationStore::open(root).expect("open store"));
    let generator = LlmReplyGenerator::new(
        Arc::clone(&client) as Arc<dyn LlmClient>,
        LlmReplySettings::default(),
    );
    let deps = OrchestratorDeps {
        transport: Arc::clone(&gateway) as Arc<dyn ChatTransport>,
        generator: Arc::new(generator),
        transcripts: Arc::clone(&store) as Arc<dyn TranscriptStore>,
        orders: Arc::clone(&store) as Arc<dyn OrderStore>,
        media_fetcher: Some(Arc::new(FixedImage)),
    };
    let config = OrchestratorConfig {
        quiet_window_ms: 50,
        pacing_delay_ms: 0,
        ..OrchestratorConfig::default()
    };
    Harness {
        orchestrator: Orchestrator::new(config, deps).expect("orchestrator"),
        gateway,
        client,
        store,
    }
}

fn purchase_reply(text: &str) -> serde_json::Value {
    json!({
        "text": text,
        "media": [{"url": "https://cdn.example.com/capsulas.jpg", "caption": "Cápsulas"}],
        "order": {
            "nombre": "Ana",
            "producto": "Cápsulas",
            "cantidad": 2,
            "totalArs": "$ 45.900",
            "direccion": "Av. Siempreviva 742",
            "cp": "1000",
            "ciudad": "CABA"
        }
    })
}

#[tokio::test]
async fn integration_purchase_turn_delivers_inline_media_and_logs_one_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let h = harness(
        temp.path(),
        vec![
            purchase_reply("Listo Ana, registré tu pedido"),
            purchase_reply("Ya lo tenía anotado"),
        ],
    );
    let mut reports = h.orchestrator.subscribe_turns();

    for (id, text) in [("m1", "quiero 2 capsulas"), ("m2", "a nombre de Ana")] {
        let disposition = h
            .orchestrator
            .handle_inbound(InboundEvent::customer(CUSTOMER, id, text))
            .await;
        assert!(matches!(disposition, InboundDisposition::Enqueued(_)));
    }
    assert!(h.orchestrator.drain(DRAIN).await);

    let first = reports.recv().await.expect("first report");
    let TurnOutcome::Delivered {
        media_sent,
        used_fallback,
        order,
    } = first.outcome
    else {
        panic!("expected a delivered turn, got {:?}", first.outcome);
    };
    assert_eq!(media_sent, 1);
    assert!(!used_fallback);
    let Some(OrderLogOutcome::Recorded(record)) = order else {
        panic!("expected a recorded order");
    };
    assert_eq!(record.fields.product, "Cápsulas");
    assert_eq!(record.fields.quantity, "2");
    assert_eq!(record.fields.total, 45_900.0);
    assert_eq!(record.user_message, "quiero 2 capsulas a nombre de Ana");

    let requests = h.client.requests.lock().await.clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].json_mode);

    let delivered = h.gateway.delivered().await;
    let url_index = delivered
        .iter()
        .position(|item| matches!(item, Delivered::MediaUrl(_)))
        .expect("url attempt");
    assert_eq!(delivered[url_index + 1], Delivered::MediaInline(4));
    assert_eq!(
        delivered.iter().rev().nth(1),
        Some(&Delivered::Text("Listo Ana, registré tu pedido".to_string()))
    );
    assert_eq!(delivered.last(), Some(&Delivered::Presence(Presence::Paused)));

    h.orchestrator
        .handle_inbound(InboundEvent::customer(CUSTOMER, "m3", "confirmame el pedido"))
        .await;
    assert!(h.orchestrator.drain(DRAIN).await);
    let second = reports.recv().await.expect("second report");
    assert!(matches!(
        second.outcome,
        TurnOutcome::Delivered {
            order: Some(OrderLogOutcome::Duplicate { .. }),
            ..
        }
    ));

    let rows = std::fs::read_to_string(temp.path().join("orders.jsonl")).expect("orders log");
    assert_eq!(rows.lines().filter(|line| !line.trim().is_empty()).count(), 1);

    let contact = ContactKey::from_address(CUSTOMER).expect("contact");
    let turns = h.store.recent_turns(&contact, 10).await.expect("transcript");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].user_text, "confirmame el pedido");
}

#[tokio::test]
async fn integration_history_reaches_the_collaborator_on_the_next_turn() {
    let temp = tempfile::tempdir().expect("tempdir");
    let h = harness(
        temp.path(),
        vec![
            json!({"text": "Las cápsulas salen $22.950"}),
            json!({"text": "Sí, hacemos envíos"}),
        ],
    );

    h.orchestrator
        .handle_inbound(InboundEvent::customer(CUSTOMER, "m1", "precio capsulas"))
        .await;
    assert!(h.orchestrator.drain(DRAIN).await);
    h.orchestrator
        .handle_inbound(InboundEvent::customer(CUSTOMER, "m2", "hacen envios?"))
        .await;
    assert!(h.orchestrator.drain(DRAIN).await);

    let requests = h.client.requests.lock().await.clone();
    assert_eq!(requests.len(), 2);
    let history = requests[1]
        .messages
        .iter()
        .map(Message::text_content)
        .collect::<Vec<_>>()
        .join("\n");
    assert!(history.contains("Cliente: precio capsulas"));
    assert!(history.contains("Asistente: Las cápsulas salen $22.950"));

    let welcomes = h
        .gateway
        .delivered()
        .await
        .into_iter()
        .filter(|item| matches!(item, Delivered::Text(text) if text == &OrchestratorConfig::default().welcome_text))
        .count();
    assert_eq!(welcomes, 1);
}

#[tokio::test]
async fn integration_operator_pause_silences_contact_until_resume() {
    let temp = tempfile::tempdir().expect("tempdir");
    let h = harness(temp.path(), vec![json!({"text": "Hola de nuevo"})]);

    h.orchestrator
        .handle_inbound(InboundEvent::operator(CUSTOMER, "bot-pause"))
        .await;
    let muted = h
        .orchestrator
        .handle_inbound(InboundEvent::customer(CUSTOMER, "m1", "hola?"))
        .await;
    assert_eq!(
        muted,
        InboundDisposition::Enqueued(EnqueueOutcome::DroppedPaused)
    );
    assert!(h.orchestrator.drain(DRAIN).await);
    assert!(h.client.requests.lock().await.is_empty());

    h.orchestrator
        .handle_inbound(InboundEvent::operator(CUSTOMER, "bot-play"))
        .await;
    h.orchestrator
        .handle_inbound(InboundEvent::customer(CUSTOMER, "m2", "hola?"))
        .await;
    assert!(h.orchestrator.drain(DRAIN).await);
    assert_eq!(h.client.requests.lock().await.len(), 1);
    assert!(h
        .gateway
        .delivered()
        .await
        .contains(&Delivered::Text("Hola de nuevo".to_string())));
}
