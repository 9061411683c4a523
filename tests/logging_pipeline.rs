mod common;

use std::time::Duration;

use relaylog::logging::FieldValue;
use relaylog::security::MaskStyle;
use relaylog::{Adapters, Level, Metadata, RelayConfig};
use serde_json::json;

use common::start_relay;

fn config() -> RelayConfig {
    let mut config = RelayConfig {
        service_name: "accounts".into(),
        level: Level::Debug,
        ..Default::default()
    };
    config.masking.fields = vec!["password".into()];
    config
}

#[tokio::test]
async fn test_nested_password_is_masked_end_to_end() {
    let (relay, memory) = start_relay(config(), Adapters::new()).await;

    relay
        .logger()
        .info_with(
            Metadata::new().with("user", json!({ "password": "abc123" })),
            "user signed in",
        )
        .await;

    let line = memory.lines().pop().unwrap();
    assert!(line.contains(r#""user":{"password":"******"}"#), "{line}");
    assert!(!line.contains("abc123"));
    assert!(line.contains(r#""service":"accounts""#));
    assert!(line.contains(r#""msg":"user signed in""#));
}

#[tokio::test]
async fn test_preserve_length_style_and_runtime_fields() {
    let mut config = config();
    config.masking.style = MaskStyle::PreserveLength;
    let (relay, memory) = start_relay(config, Adapters::new()).await;

    relay.masking().add_fields(["card".into()]).unwrap();
    relay
        .logger()
        .info_with(
            Metadata::new().with("password", "abc").with("card", "4111"),
            "payment",
        )
        .await;

    let entry = memory.entries().pop().unwrap();
    assert_eq!(entry.field("password"), Some(&json!("***")));
    assert_eq!(entry.field("card"), Some(&json!("****")));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_serializer_only_replaces_its_field() {
    let (relay, memory) = start_relay(config(), Adapters::new()).await;
    relay.serializers().register("slow", |_value: FieldValue| async {
        std::future::pending::<()>().await;
        Ok::<_, relaylog::BoxError>(json!(null))
    });

    let started = tokio::time::Instant::now();
    relay
        .logger()
        .info_with(Metadata::new().with("slow", 1).with("fast", 2), "mixed")
        .await;
    assert_eq!(started.elapsed(), Duration::from_millis(50));

    let entry = memory.find(|e| e.msg == "mixed").pop().unwrap();
    assert_eq!(entry.field("fast"), Some(&json!(2)));
    let slow = entry.field("slow").unwrap().as_str().unwrap();
    assert!(slow.starts_with("[SerializerError:"));

    let warning = memory.find(|e| e.level == Level::Warn);
    assert_eq!(warning.len(), 1);
    assert_eq!(warning[0].field("serializer_key"), Some(&json!("slow")));
}

#[tokio::test]
async fn test_control_sequences_are_stripped() {
    let (relay, memory) = start_relay(config(), Adapters::new()).await;

    relay
        .logger()
        .warn_with(
            Metadata::new().with("input", "\u{1b}[31mred\u{1b}[0m\u{7}"),
            "bad \u{1b}]0;title\u{7}input",
        )
        .await;

    let entry = memory.entries().pop().unwrap();
    assert_eq!(entry.field("input"), Some(&json!("red")));
    assert_eq!(entry.msg, "bad input");
}

#[tokio::test]
async fn test_below_threshold_is_dropped_and_children_keep_bindings() {
    let (relay, memory) = start_relay(config(), Adapters::new()).await;
    memory.clear();
    let audit = relay.get_logger("audit").with_retention("90d");

    relay.logger().trace("never recorded").await;
    audit.debug("kept").await;
    audit.set_level(Level::Error);
    audit.warn("dropped by child threshold").await;
    relay.get_logger("audit").warn("parent unaffected").await;

    assert_eq!(memory.messages(), vec!["kept", "parent unaffected"]);
    let kept = &memory.entries()[0];
    assert_eq!(kept.field("source"), Some(&json!("audit")));
    assert_eq!(kept.field("retention"), Some(&json!("90d")));
}

#[tokio::test]
async fn test_transaction_and_correlation_ids_appear_in_context() {
    let (relay, memory) = start_relay(config(), Adapters::new()).await;
    let context = relay.context_manager().clone();
    memory.clear();

    context
        .run(|| async {
            let id = context.new_transaction_id();
            context.set_transaction_id(id.clone());
            context.set_correlation_id("corr-1");
            relay.logger().info("inside").await;
            assert_eq!(context.get_transaction_id(), Some(id));
        })
        .await;
    relay.logger().info("outside").await;

    let entries = memory.entries();
    assert_eq!(entries[0].context.get("x-correlation-id"), Some(&json!("corr-1")));
    assert!(entries[0].context.contains_key("transaction_id"));
    assert!(entries[1].context.is_empty());
}
