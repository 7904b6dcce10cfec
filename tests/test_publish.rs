//! Publish path tests: payload format, truncation, failure handling and pacing

use std::time::Duration;
use telemetrix::session::SendOutcome;
use telemetrix::testing::MockTransport;
use tokio::time::Instant;

use test_helpers::*;

#[tokio::test(start_paused = true)]
async fn test_payload_is_stamped_and_sent_on_outbound_topic() {
    let (controller, _events) = started_controller(test_config()).await;

    let outcome = controller
        .publisher()
        .send("hello device", controller.now())
        .await;

    assert_eq!(outcome, SendOutcome::Sent { peer_stale: false });
    let published = controller.transport().get_published_messages().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, OUTBOUND_TOPIC);
    assert_eq!(published[0].payload, "17 Oct 26 14:03:55   hello device");
    assert!(!published[0].retain);
    assert_eq!(controller.metrics().snapshot().messages.sent, 1);

    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_long_text_is_truncated_to_limit() {
    let (controller, _events) = started_controller(test_config()).await;
    let prefix = "17 Oct 26 14:03:55   ";

    let exact = "a".repeat(147);
    controller.publisher().send(&exact, controller.now()).await;

    let long = "b".repeat(300);
    controller.publisher().send(&long, controller.now()).await;

    let published = controller.transport().get_published_messages().await;
    assert_eq!(published[0].payload, format!("{prefix}{exact}"));
    assert_eq!(published[1].payload, format!("{prefix}{}", "b".repeat(147)));
    assert_eq!(controller.metrics().snapshot().messages.truncated, 1);

    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_truncation_respects_multibyte_characters() {
    let (controller, _events) = started_controller(test_config()).await;

    let text = "温度".repeat(100);
    let outcome = controller.publisher().send(&text, controller.now()).await;
    assert!(outcome.is_sent());

    let published = controller.transport().get_published_messages().await;
    let body = published[0]
        .payload
        .strip_prefix("17 Oct 26 14:03:55   ")
        .unwrap();
    assert_eq!(body.chars().count(), 147);
    assert!(text.starts_with(body));

    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_is_reported_and_not_retried() {
    let (controller, _events) = started_controller(test_config()).await;
    controller.transport().set_fail_publish(true);

    let outcome = controller
        .publisher()
        .send("lost message", controller.now())
        .await;

    assert_eq!(
        outcome,
        SendOutcome::Failed {
            reason: "Mock publish failure".to_string()
        }
    );
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(controller.transport().publish_calls(), 1);
    assert!(controller
        .transport()
        .get_published_messages()
        .await
        .is_empty());
    assert_eq!(controller.metrics().snapshot().messages.failed, 1);

    // The session keeps going
    controller.transport().set_fail_publish(false);
    let outcome = controller.publisher().send("next", controller.now()).await;
    assert!(outcome.is_sent());

    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_send_to_stale_peer_is_flagged_but_published() {
    let (controller, _events) = started_controller(test_config()).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let outcome = controller
        .publisher()
        .send("are you there", controller.now())
        .await;

    assert_eq!(outcome, SendOutcome::Sent { peer_stale: true });
    assert_eq!(controller.transport().get_published_messages().await.len(), 1);

    // A fresh heartbeat clears the flag for the next send
    controller.transport().deliver(STATUS_TOPIC, "alive").await;
    settle().await;
    let outcome = controller.publisher().send("welcome back", controller.now()).await;
    assert_eq!(outcome, SendOutcome::Sent { peer_stale: false });

    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_send_holds_for_pacing_delay() {
    let (controller, _events) = started_controller(test_config()).await;

    let before = Instant::now();
    controller.publisher().send("one", controller.now()).await;
    assert!(Instant::now() - before >= Duration::from_millis(500));

    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sends_are_serialized() {
    let (controller, _events) = started_controller(test_config()).await;
    let first = controller.publisher().clone();
    let second = controller.publisher().clone();
    let now = controller.now();

    let before = Instant::now();
    let (a, b) = tokio::join!(first.send("first", now), second.send("second", now));

    assert!(a.is_sent());
    assert!(b.is_sent());
    assert!(Instant::now() - before >= Duration::from_millis(1000));
    assert_eq!(controller.transport().get_published_messages().await.len(), 2);

    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retain_flag_follows_configuration() {
    let mut config = test_config();
    config.retain = true;
    config.pacing = Duration::ZERO;
    let controller = mock_controller(config, MockTransport::new());
    controller.start().await.unwrap();

    controller.publisher().send("kept", controller.now()).await;

    let published = controller.transport().get_published_messages().await;
    assert!(published[0].retain);

    controller.stop().await.unwrap();
}
