use reading_engine::{errors::EngineError, providers::ProviderError, providers::RawResult};

mod common;

use common::{Harness, TOPIC, USER};

#[tokio::test]
async fn test_won_round_earns_one_card() {
    let h = Harness::new();
    h.play_round(0).await;

    let card = h.engine.generate_card(USER).await.unwrap().unwrap();

    assert_eq!(card.topic, TOPIC);
    assert_eq!(card.title, "Lava");
    assert_eq!(card.image_url, "https://cards.example/volcano.png");
    assert_eq!(h.repo.cards_for(USER).await.len(), 1);
    assert_eq!(h.engine.user_progress(USER).await.unwrap().card_count, 1);

    let err = h.engine.generate_card(USER).await.unwrap_err();
    assert!(matches!(err, EngineError::NoCardPending));
    assert_eq!(h.image.calls(), 1);
}

#[tokio::test]
async fn test_lost_round_earns_no_card() {
    let h = Harness::new();
    h.play_round(3).await;

    let err = h.engine.generate_card(USER).await.unwrap_err();

    assert!(matches!(err, EngineError::NoCardPending));
    assert_eq!(h.image.calls(), 0);
}

#[tokio::test]
async fn test_duplicate_card_is_not_generated_again() {
    let h = Harness::new();
    h.play_round(0).await;
    h.engine.generate_card(USER).await.unwrap();

    h.play_round(0).await;
    let second = h.engine.generate_card(USER).await.unwrap();

    assert!(second.is_none());
    assert_eq!(h.image.calls(), 1);
    assert_eq!(h.repo.cards_for(USER).await.len(), 1);
}

#[tokio::test]
async fn test_binary_image_becomes_data_url() {
    let h = Harness::new();
    h.image.push_ok(RawResult::Binary {
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
        model: "sdxl-lightning".into(),
    });
    h.play_round(0).await;

    let card = h.engine.generate_card(USER).await.unwrap().unwrap();

    assert_eq!(card.image_url, "data:image/png;base64,iVBORw==");
    assert_eq!(card.model, "sdxl-lightning");
}

#[tokio::test]
async fn test_failed_card_stays_pending() {
    let h = Harness::new();
    h.image.push_err(ProviderError::Auth { status: 401 });
    h.play_round(0).await;

    let err = h.engine.generate_card(USER).await.unwrap_err();
    assert!(matches!(err, EngineError::ProviderFatal { .. }));

    let card = h.engine.generate_card(USER).await.unwrap();
    assert!(card.is_some());
    assert_eq!(h.image.calls(), 2);
}
