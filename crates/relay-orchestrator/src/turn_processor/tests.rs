use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{join_fragments, TurnDependencies, TurnOutcome, TurnProcessor, TurnStage};
use crate::batch_scheduler::ReadyBatch;
use crate::config::OrchestratorConfig;
use crate::contact::ContactKey;
use crate::generator::{GenerationError, ReplyGenerator, ReplyMedia, ReplyPayload};
use crate::order_logger::{OrderLogOutcome, OrderLogger};
use crate::pause_registry::PauseRegistry;
use crate::safe_sender::SafeSender;
use crate::store::{InMemoryStore, OrderStore, TranscriptStore};
use crate::test_support::{
    key, RecordingTransport, ScriptedGenerator, SentItem, StaticMediaFetcher,
};
use crate::transport::Presence;

const PACING_MS: u64 = 1_000;

struct Harness {
    processor: Arc<TurnProcessor>,
    registry: Arc<PauseRegistry>,
    transport: Arc<RecordingTransport>,
    store: Arc<InMemoryStore>,
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        pacing_delay_ms: PACING_MS,
        ..OrchestratorConfig::default()
    }
}

fn harness_with(
    config: OrchestratorConfig,
    generator: Arc<dyn ReplyGenerator>,
    registry: Arc<PauseRegistry>,
) -> Harness {
    let transport = RecordingTransport::new();
    let store = Arc::new(InMemoryStore::new());
    let sender = SafeSender::new(
        Arc::clone(&registry),
        Arc::clone(&transport) as _,
        StaticMediaFetcher::unreachable(),
    );
    let processor = TurnProcessor::new(
        config.clone(),
        TurnDependencies {
            registry: Arc::clone(&registry),
            sender,
            transport: Arc::clone(&transport) as _,
            generator,
            transcripts: Arc::clone(&store) as Arc<dyn TranscriptStore>,
            order_logger: OrderLogger::new(
                Arc::clone(&store) as Arc<dyn OrderStore>,
                config.order_bucket_ms,
            ),
        },
    );
    Harness {
        processor: Arc::new(processor),
        registry,
        transport,
        store,
    }
}

fn harness(generator: Arc<dyn ReplyGenerator>) -> Harness {
    harness_with(
        test_config(),
        generator,
        Arc::new(PauseRegistry::new(7_200_000)),
    )
}

fn batch(contact: &ContactKey, fragments: &[&str], epoch: u64) -> ReadyBatch {
    ReadyBatch {
        contact: contact.clone(),
        fragments: fragments.iter().map(|fragment| fragment.to_string()).collect(),
        captured_epoch: epoch,
    }
}

fn order_reply(text: &str) -> ReplyPayload {
    ReplyPayload {
        text: text.to_string(),
        media: Vec::new(),
        order: Some(json!({
            "nombre": "Ana",
            "producto": "capsulas",
            "cantidad": 2,
            "total": 51.9
        })),
    }
}

/// Pauses the contact while the reply is being generated.
struct PausingGenerator {
    registry: Arc<PauseRegistry>,
}

#[async_trait]
impl ReplyGenerator for PausingGenerator {
    async fn generate(
        &self,
        _combined_text: &str,
        contact: &ContactKey,
        _history_text: &str,
    ) -> Result<ReplyPayload, GenerationError> {
        self.registry.pause(contact);
        Ok(ReplyPayload::text_only("respuesta tardía"))
    }
}

/// Tracks how many generations overlap.
#[derive(Default)]
struct OverlapGenerator {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl ReplyGenerator for OverlapGenerator {
    async fn generate(
        &self,
        _combined_text: &str,
        _contact: &ContactKey,
        _history_text: &str,
    ) -> Result<ReplyPayload, GenerationError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ReplyPayload::text_only("ok"))
    }
}

#[test]
fn unit_join_fragments_preserves_order_and_skips_blanks() {
    let fragments = vec![
        " hola ".to_string(),
        String::new(),
        "quiero 2 botes".to_string(),
        "de capsulas".to_string(),
    ];
    assert_eq!(join_fragments(&fragments), "hola quiero 2 botes de capsulas");
    assert_eq!(join_fragments(&["  ".to_string()]), "");
}

#[tokio::test(start_paused = true)]
async fn functional_first_turn_sends_welcome_then_reply_and_persists() {
    let generator = ScriptedGenerator::replying(&["¡Hola! ¿Cuántos kilos querés bajar?", "Perfecto"]);
    let harness = harness(Arc::clone(&generator) as _);
    let contact = key("5491100000001");

    let first = harness.processor.process(batch(&contact, &["hola"], 0)).await;
    assert_eq!(
        first,
        TurnOutcome::Delivered {
            media_sent: 0,
            used_fallback: false,
            order: None,
        }
    );
    let second = harness.processor.process(batch(&contact, &["unos 10"], 0)).await;
    assert!(matches!(second, TurnOutcome::Delivered { .. }));

    assert_eq!(
        harness.transport.texts().await,
        vec![
            "Bienvenido a Herbalis. Estoy para asesorarte 🙂".to_string(),
            "¡Hola! ¿Cuántos kilos querés bajar?".to_string(),
            "Perfecto".to_string(),
        ]
    );
    let calls = generator.calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].history_text, "");
    assert_eq!(
        calls[1].history_text,
        "Cliente: hola\nAsistente: ¡Hola! ¿Cuántos kilos querés bajar?"
    );
    let stored = harness
        .store
        .recent_turns(&contact, 10)
        .await
        .expect("transcript");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].user_text, "unos 10");
}

#[tokio::test(start_paused = true)]
async fn functional_presence_brackets_the_turn() {
    let harness = harness(ScriptedGenerator::replying(&["ok"]));
    let contact = key("5491100000001");
    harness.processor.process(batch(&contact, &["hola"], 0)).await;

    let records = harness.transport.records().await;
    assert_eq!(records.first().map(|r| r.item.clone()), Some(SentItem::Presence(Presence::Composing)));
    assert_eq!(records.last().map(|r| r.item.clone()), Some(SentItem::Presence(Presence::Paused)));
    assert!(records.iter().all(|record| record.contact == contact));
}

#[tokio::test(start_paused = true)]
async fn functional_presence_can_be_disabled() {
    let harness = harness_with(
        OrchestratorConfig {
            presence_enabled: false,
            ..test_config()
        },
        ScriptedGenerator::replying(&["ok"]),
        Arc::new(PauseRegistry::new(7_200_000)),
    );
    harness
        .processor
        .process(batch(&key("5491100000001"), &["hola"], 0))
        .await;
    let records = harness.transport.records().await;
    assert!(records
        .iter()
        .all(|record| !matches!(record.item, SentItem::Presence(_))));
}

#[tokio::test(start_paused = true)]
async fn functional_media_precedes_text_with_pacing_between_units() {
    let generator = ScriptedGenerator::new(vec![Ok(ReplyPayload {
        text: "Te muestro las opciones".to_string(),
        media: vec![
            ReplyMedia {
                url: "https://cdn/caps.jpg".to_string(),
                caption: Some("Cápsulas".to_string()),
            },
            ReplyMedia {
                url: "https://cdn/seeds.jpg".to_string(),
                caption: None,
            },
        ],
        order: None,
    })]);
    let harness = harness(generator);
    let contact = key("5491100000001");
    let outcome = harness.processor.process(batch(&contact, &["fotos?"], 0)).await;
    assert!(matches!(outcome, TurnOutcome::Delivered { media_sent: 2, .. }));

    let deliveries = harness
        .transport
        .records()
        .await
        .into_iter()
        .filter(|record| !matches!(record.item, SentItem::Presence(_)))
        .collect::<Vec<_>>();
    assert_eq!(
        deliveries.iter().map(|r| r.item.clone()).collect::<Vec<_>>(),
        vec![
            SentItem::Text("Bienvenido a Herbalis. Estoy para asesorarte 🙂".to_string()),
            SentItem::MediaUrl("https://cdn/caps.jpg".to_string(), Some("Cápsulas".to_string())),
            SentItem::MediaUrl("https://cdn/seeds.jpg".to_string(), None),
            SentItem::Text("Te muestro las opciones".to_string()),
        ]
    );
    for pair in deliveries.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(PACING_MS));
    }
}

#[tokio::test(start_paused = true)]
async fn functional_welcome_media_is_sent_with_caption() {
    let harness = harness_with(
        OrchestratorConfig {
            welcome_media_url: Some("https://cdn/welcome.jpg".to_string()),
            ..test_config()
        },
        ScriptedGenerator::replying(&["ok"]),
        Arc::new(PauseRegistry::new(7_200_000)),
    );
    harness
        .processor
        .process(batch(&key("5491100000001"), &["hola"], 0))
        .await;
    assert_eq!(
        harness.transport.messages().await[0],
        SentItem::MediaUrl(
            "https://cdn/welcome.jpg".to_string(),
            Some("Bienvenido a Herbalis. Estoy para asesorarte 🙂".to_string())
        )
    );
}

#[tokio::test(start_paused = true)]
async fn functional_generation_failure_sends_fallback_and_skips_order() {
    let generator = ScriptedGenerator::new(vec![Err(GenerationError::EmptyReply)]);
    let harness = harness(generator);
    let outcome = harness
        .processor
        .process(batch(&key("5491100000001"), &["hola"], 0))
        .await;
    assert_eq!(
        outcome,
        TurnOutcome::Delivered {
            media_sent: 0,
            used_fallback: true,
            order: None,
        }
    );
    let texts = harness.transport.texts().await;
    assert_eq!(texts.last(), Some(&test_config().fallback_text));
    assert!(harness.store.orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn functional_valid_order_is_logged_once_per_bucket() {
    let generator = ScriptedGenerator::new(vec![
        Ok(order_reply("¡Pedido confirmado!")),
        Ok(order_reply("Ya lo tenemos registrado")),
    ]);
    let harness = harness(generator);
    let contact = key("5491100000001");
    let first = harness.processor.process(batch(&contact, &["confirmo"], 0)).await;
    let second = harness.processor.process(batch(&contact, &["confirmo otra vez"], 0)).await;

    assert!(matches!(
        first,
        TurnOutcome::Delivered {
            order: Some(OrderLogOutcome::Recorded(_)),
            ..
        }
    ));
    assert!(matches!(
        second,
        TurnOutcome::Delivered {
            order: Some(OrderLogOutcome::Duplicate { .. }),
            ..
        }
    ));
    let orders = harness.store.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].user_message, "confirmo");
    assert_eq!(orders[0].reply_message, "¡Pedido confirmado!");
}

#[tokio::test(start_paused = true)]
async fn regression_malformed_order_leaves_reply_untouched() {
    let generator = ScriptedGenerator::new(vec![Ok(ReplyPayload {
        text: "Anotado".to_string(),
        media: Vec::new(),
        order: Some(json!({"producto": "capsulas"})),
    })]);
    let harness = harness(generator);
    let outcome = harness
        .processor
        .process(batch(&key("5491100000001"), &["quiero"], 0))
        .await;
    assert!(matches!(outcome, TurnOutcome::Delivered { order: None, .. }));
    assert_eq!(harness.transport.texts().await.last().map(String::as_str), Some("Anotado"));
    assert!(harness.store.orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn regression_stale_epoch_aborts_before_any_output() {
    let generator = ScriptedGenerator::replying(&["no debería salir"]);
    let harness = harness(Arc::clone(&generator) as _);
    let contact = key("5491100000001");
    harness.registry.pause(&contact);
    harness.registry.resume(&contact);

    let outcome = harness.processor.process(batch(&contact, &["hola"], 0)).await;
    assert_eq!(
        outcome,
        TurnOutcome::Aborted {
            stage: TurnStage::Fire
        }
    );
    assert!(harness.transport.records().await.is_empty());
    assert!(generator.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn regression_pause_during_generation_discards_reply() {
    let registry = Arc::new(PauseRegistry::new(7_200_000));
    let harness = harness_with(
        test_config(),
        Arc::new(PausingGenerator {
            registry: Arc::clone(&registry),
        }),
        registry,
    );
    let contact = key("5491100000001");
    let outcome = harness.processor.process(batch(&contact, &["hola"], 0)).await;
    assert_eq!(
        outcome,
        TurnOutcome::Aborted {
            stage: TurnStage::Generation
        }
    );
    let texts = harness.transport.texts().await;
    assert!(!texts.iter().any(|text| text == "respuesta tardía"));
    assert!(harness
        .store
        .recent_turns(&contact, 10)
        .await
        .expect("transcript")
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn integration_turns_for_one_contact_never_overlap() {
    let generator = Arc::new(OverlapGenerator::default());
    let harness = harness(Arc::clone(&generator) as _);
    let contact = key("5491100000001");

    let first = {
        let processor = Arc::clone(&harness.processor);
        let batch = batch(&contact, &["uno"], 0);
        tokio::spawn(async move { processor.process(batch).await })
    };
    let second = {
        let processor = Arc::clone(&harness.processor);
        let batch = batch(&contact, &["dos"], 0);
        tokio::spawn(async move { processor.process(batch).await })
    };
    first.await.expect("first turn");
    second.await.expect("second turn");
    assert_eq!(generator.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn integration_turn_reports_are_broadcast() {
    let harness = harness(ScriptedGenerator::replying(&["ok"]));
    let mut reports = harness.processor.subscribe();
    let contact = key("5491100000001");
    harness.processor.process(batch(&contact, &["   "], 0)).await;
    let report = reports.recv().await.expect("report");
    assert_eq!(report.contact, contact);
    assert_eq!(report.outcome, TurnOutcome::Empty);
}

#[tokio::test(start_paused = true)]
async fn regression_aborted_turn_clears_typing_indicator() {
    let registry = Arc::new(PauseRegistry::new(7_200_000));
    let harness = harness_with(
        test_config(),
        Arc::new(PausingGenerator {
            registry: Arc::clone(&registry),
        }),
        registry,
    );
    let contact = key("5491100000001");
    let outcome = harness.processor.process(batch(&contact, &["hola"], 0)).await;
    assert!(matches!(outcome, TurnOutcome::Aborted { .. }));

    let presence = harness
        .transport
        .records()
        .await
        .into_iter()
        .filter_map(|record| match record.item {
            SentItem::Presence(presence) => Some(presence),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(presence, vec![Presence::Composing, Presence::Paused]);
}

#[tokio::test(start_paused = true)]
async fn regression_turn_locks_are_released_after_processing() {
    let generator = Arc::new(OverlapGenerator::default());
    let harness = harness(Arc::clone(&generator) as _);
    let first = key("5491100000001");
    let second = key("5491100000002");

    harness.processor.process(batch(&first, &["hola"], 0)).await;
    harness.processor.process(batch(&second, &["hola"], 0)).await;
    assert_eq!(harness.processor.tracked_turn_locks(), 0);

    let handles = ["uno", "dos", "tres"].map(|text| {
        let processor = Arc::clone(&harness.processor);
        let batch = batch(&first, &[text], 0);
        tokio::spawn(async move { processor.process(batch).await })
    });
    for handle in handles {
        handle.await.expect("turn");
    }
    assert_eq!(generator.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(harness.processor.tracked_turn_locks(), 0);
}
