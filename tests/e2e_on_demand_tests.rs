//! End-to-end tests for one-off checks through the service

mod common;

use adwatch_server::check_client::{CheckError, Device, TransientKind};
use adwatch_server::job_store::JobState;
use adwatch_server::ServiceError;
use common::TestEngine;
use std::time::Duration;

#[tokio::test]
async fn test_on_demand_check_returns_ads_and_is_logged() {
    let engine = TestEngine::spawn();
    engine.client.script("shoes", vec![Ok(2)]);

    let result = engine
        .service
        .check_now("shoes", Some("Istanbul"), Device::Mobile)
        .await
        .unwrap();
    assert_eq!(result.query, "shoes");
    assert!(result.has_ads);
    assert_eq!(result.ads_count, 2);
    assert_eq!(result.ads.len(), 2);

    let history = engine.service.recent_checks(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].query, "shoes");
    assert_eq!(history[0].location.as_deref(), Some("Istanbul"));
    assert_eq!(history[0].device, Device::Mobile);
    assert_eq!(history[0].ads_count, 2);

    // On-demand checks never create jobs or alerts
    assert!(engine.service.list_jobs().unwrap().is_empty());
    assert!(engine.notifier.sent().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_on_demand_timeouts_end_in_terminal_error() {
    let engine = TestEngine::spawn();
    let timeout = CheckError::timeout(Duration::from_secs(30));
    engine.client.script(
        "flights",
        vec![Err(timeout.clone()), Err(timeout.clone()), Err(timeout)],
    );

    let err = engine
        .service
        .check_now("flights", None, Device::Desktop)
        .await
        .unwrap_err();

    match err {
        ServiceError::Check(failure) => {
            assert_eq!(failure.attempts, 3);
            assert!(matches!(
                failure.error,
                CheckError::Transient {
                    kind: TransientKind::Timeout,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(engine.client.calls("flights"), 3);
    assert!(engine.service.list_jobs().unwrap().is_empty());
    assert!(engine.service.recent_checks(10).unwrap().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_on_demand_check_leaves_matching_job_untouched() {
    let engine = TestEngine::spawn();
    let job = engine
        .service
        .create_job("shoes", None, Device::Desktop, 5)
        .unwrap();

    engine
        .service
        .check_now("shoes", None, Device::Desktop)
        .await
        .unwrap();

    let after = engine.service.get_job(job.id).unwrap();
    assert_eq!(after, job);
    assert_eq!(after.state, JobState::Idle);
    assert!(after.last_result.is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_on_demand_checks() {
    let engine = TestEngine::spawn();
    engine.client.script("a", vec![Ok(1)]);
    engine.client.script("b", vec![Ok(2)]);
    engine.client.script("c", vec![Err(CheckError::permanent("bad query"))]);

    let (a, b, c) = tokio::join!(
        engine.service.check_now("a", None, Device::Desktop),
        engine.service.check_now("b", None, Device::Desktop),
        engine.service.check_now("c", None, Device::Desktop),
    );

    assert_eq!(a.unwrap().ads_count, 1);
    assert_eq!(b.unwrap().ads_count, 2);
    assert!(matches!(c, Err(ServiceError::Check(ref f)) if f.attempts == 1));
    assert_eq!(engine.service.recent_checks(10).unwrap().len(), 2);
    engine.shutdown().await;
}
