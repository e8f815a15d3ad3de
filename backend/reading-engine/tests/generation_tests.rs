use reading_engine::{errors::EngineError, models::LockKind, providers::ProviderError};
use std::time::Duration;

mod common;

use common::{passage_payload, Harness, ScriptedProvider, AGE, CATEGORY, TOPIC, USER};

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new();
    h.text.push_err(ProviderError::Timeout);
    h.text.push_err(ProviderError::RateLimited);

    let summary = h
        .engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap();

    assert_eq!(summary.word_count, 100);
    assert_eq!(h.text.calls(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_generation() {
    let h = Harness::new();
    for _ in 0..5 {
        h.text.push_err(ProviderError::Server {
            status: 503,
            body: "overloaded".into(),
        });
    }

    let err = h
        .engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::GenerationFailed { attempts: 5, .. }));
    assert_eq!(h.text.calls(), 5);
    assert_eq!(h.engine.generations_today(USER, TOPIC).await.unwrap(), 0);
    assert!(h.engine.load_session(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let h = Harness::new();
    h.text.push_err(ProviderError::Auth { status: 401 });

    let err = h
        .engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ProviderFatal { .. }));
    assert_eq!(h.text.calls(), 1);
}

#[tokio::test]
async fn test_lock_is_released_after_failure() {
    let h = Harness::new();
    h.text.push_err(ProviderError::Auth { status: 403 });

    assert!(h
        .engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .is_err());
    assert!(!h.engine.is_busy(USER, LockKind::Text).await.unwrap());

    h.engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_malformed_payloads_are_retried() {
    let h = Harness::new();
    h.text.push_text("Sorry, I cannot help with that.");
    h.text.push_text(r#"{"text": "Too short.", "card": "x", "qa": []}"#);

    let summary = h
        .engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap();

    assert_eq!(summary.card_title, "Lava");
    assert_eq!(h.text.calls(), 3);
}

#[tokio::test]
async fn test_fenced_payload_is_accepted() {
    let h = Harness::new();
    h.text
        .push_text(&format!("```json\n{}\n```", passage_payload(40)));

    let summary = h
        .engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap();

    assert_eq!(summary.word_count, 40);
    assert_eq!(h.text.calls(), 1);
}

#[tokio::test]
async fn test_generated_text_is_remembered() {
    let h = Harness::new();
    let summary = h
        .engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap();

    let mut texts = Vec::new();
    for _ in 0..50 {
        texts = h.history.texts_for(USER).await;
        if !texts.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(texts, vec![summary.full_text]);
}

#[tokio::test(start_paused = true)]
async fn test_lock_is_released_when_caller_times_out() {
    let h = Harness::with_text_provider(
        ScriptedProvider::text().with_delay(Duration::from_secs(30)),
    );

    let gave_up = tokio::time::timeout(
        Duration::from_secs(1),
        h.engine.start_session(USER, CATEGORY, TOPIC, AGE),
    )
    .await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!h.engine.is_busy(USER, LockKind::Text).await.unwrap());

    h.engine
        .start_session(USER, CATEGORY, TOPIC, AGE)
        .await
        .unwrap();
    assert_eq!(h.text.calls(), 2);
}
