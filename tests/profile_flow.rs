use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tokio_test::{assert_err, assert_ok};
use treasury_guard::agents::profiler::{AllocationBand, ProfileAlertType, ProfileUpdate};
use treasury_guard::error::GuardError;
use treasury_guard::{AppConfig, TreasuryEngine};

fn cautious_answers() -> HashMap<u32, u32> {
    (1..=8).map(|id| (id, 0)).collect()
}

#[tokio::test]
async fn sharp_risk_jump_puts_user_under_watch() {
    let engine = TreasuryEngine::new(AppConfig::default()).unwrap();
    let created = engine
        .profiler()
        .create_profile("alice", 70, &cautious_answers())
        .await
        .unwrap();
    assert_eq!(created.profile.composite_score, 18);
    assert_eq!(created.allocation.band, AllocationBand::Conservative);
    assert_eq!(created.allocation.total(), 100);

    let updated = engine
        .profiler()
        .update_profile(
            "alice",
            ProfileUpdate {
                risk_tolerance: Some(9),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.profile.composite_score, 50);
    assert_eq!(
        updated.alert.as_ref().unwrap().alert_type,
        ProfileAlertType::SuspiciousChange
    );

    let report = engine.tick().await.unwrap();
    assert_eq!(report.tick.completed, 1);
    assert!(engine.behavior_profile("alice").unwrap().watched);
    assert!(engine.user_profile("alice").unwrap().flagged);

    // a deviation that would pass unnoticed for other actors now alerts
    let day = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
    engine
        .scorer()
        .record_event("alice", dec!(100), day)
        .await
        .unwrap();
    let score = engine
        .scorer()
        .record_event("alice", dec!(500), day + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(score, 60);
    assert_eq!(engine.scorer().active_alerts().await.len(), 1);
}

#[tokio::test]
async fn locked_profile_survives_update_attempts() {
    let engine = TreasuryEngine::new(AppConfig::default()).unwrap();
    assert_ok!(
        engine
            .profiler()
            .create_profile("bob", 35, &cautious_answers())
            .await
    );
    let locked = assert_ok!(engine.profiler().lock_profile("bob", true).await);
    assert!(locked.locked);

    let err = assert_err!(
        engine
            .profiler()
            .update_profile(
                "bob",
                ProfileUpdate {
                    risk_tolerance: Some(10),
                    ..Default::default()
                },
            )
            .await
    );
    assert!(matches!(err, GuardError::ProfileLocked(_)));
    assert_eq!(engine.user_profile("bob").unwrap().risk_tolerance, 1);
    assert_eq!(engine.tick().await.unwrap().admitted, 0);
}
