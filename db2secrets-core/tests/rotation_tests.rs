//! Integration tests for the rotation protocol.
//!
//! Covers the change-then-verify contract: a rotation succeeds only when the
//! old password is rejected afterwards, every phase is bounded by a timeout,
//! and connections are closed on every exit path.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Behavior, SCENARIO_CONNECTION, ScriptedExecutor};
use db2secrets_core::executor::{DriverError, SimulatedDatabase};
use db2secrets_core::{
    CancellationToken, RotationEngine, RotationOptions, RotationRequest, SecretsError,
};
use std::sync::Arc;
use std::time::Duration;

fn scenario_request() -> RotationRequest {
    RotationRequest::new(SCENARIO_CONNECTION, "svc", "old1", "new2").unwrap()
}

fn engine(executor: &ScriptedExecutor) -> RotationEngine {
    RotationEngine::new(Arc::new(executor.clone()), RotationOptions::default())
}

#[tokio::test]
async fn test_rotation_success_path() {
    let executor = ScriptedExecutor::new(Behavior::Accept, Behavior::Reject);

    engine(&executor)
        .rotate(&scenario_request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        executor.attempts(),
        vec![
            "HOST=db;PORT=50000;DATABASE=x;UID=svc;PWD=old1;NEWPWD=new2".to_string(),
            "HOST=db;PORT=50000;DATABASE=x;UID=svc;PWD=old1".to_string(),
        ]
    );
    assert_eq!(executor.still_open(), 0);
}

#[tokio::test]
async fn test_old_password_still_valid_is_verification_error() {
    let executor = ScriptedExecutor::new(Behavior::Accept, Behavior::Accept);

    let result = engine(&executor)
        .rotate(&scenario_request(), &CancellationToken::new())
        .await;

    match result {
        Err(SecretsError::RotationVerification { source, .. }) => assert!(source.is_none()),
        other => panic!("expected verification failure, got {:?}", other),
    }
    assert_eq!(executor.opened(), 2);
    assert_eq!(executor.still_open(), 0);
}

#[tokio::test]
async fn test_rejected_rotate_connection_is_execution_error() {
    let executor = ScriptedExecutor::new(Behavior::Reject, Behavior::Reject);

    let result = engine(&executor)
        .rotate(&scenario_request(), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SecretsError::RotationExecution {
            source: DriverError::Authentication(_),
            ..
        })
    ));
    // Verification is never attempted after a failed change.
    assert_eq!(executor.attempts().len(), 1);
}

#[tokio::test]
async fn test_failed_probe_is_execution_error_and_closes() {
    let executor =
        ScriptedExecutor::new(Behavior::Accept, Behavior::Reject).with_probe(Behavior::Reject);

    let result = engine(&executor)
        .rotate(&scenario_request(), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SecretsError::RotationExecution {
            source: DriverError::Statement(_),
            ..
        })
    ));
    assert_eq!(executor.still_open(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_rotate_connection_times_out() {
    let executor = ScriptedExecutor::new(Behavior::Hang, Behavior::Reject);
    let options = RotationOptions {
        connect_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let engine = RotationEngine::new(Arc::new(executor.clone()), options);

    let result = engine
        .rotate(&scenario_request(), &CancellationToken::new())
        .await;

    match result {
        Err(SecretsError::RotationExecution {
            source: DriverError::Timeout(limit),
            ..
        }) => assert_eq!(limit, Duration::from_secs(5)),
        other => panic!("expected execution timeout, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hanging_verification_is_not_success() {
    let executor = ScriptedExecutor::new(Behavior::Accept, Behavior::Hang);
    let options = RotationOptions {
        verify_timeout: Duration::from_secs(3),
        ..Default::default()
    };
    let engine = RotationEngine::new(Arc::new(executor.clone()), options);

    let result = engine
        .rotate(&scenario_request(), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SecretsError::RotationVerification {
            source: Some(DriverError::Timeout(_)),
            ..
        })
    ));
    assert_eq!(executor.still_open(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_probe_closes_rotate_connection() {
    let executor =
        ScriptedExecutor::new(Behavior::Accept, Behavior::Reject).with_probe(Behavior::Hang);
    let engine = engine(&executor);
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        })
    };

    let result = engine.rotate(&scenario_request(), &cancel).await;
    canceller.await.unwrap();

    match result {
        Err(SecretsError::Cancelled { phase }) => assert_eq!(phase, "password change"),
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(executor.opened(), 1);
    assert_eq!(executor.still_open(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_verification() {
    let executor = ScriptedExecutor::new(Behavior::Accept, Behavior::Hang);
    let engine = engine(&executor);
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        })
    };

    let result = engine.rotate(&scenario_request(), &cancel).await;
    canceller.await.unwrap();

    assert!(matches!(
        result,
        Err(SecretsError::Cancelled { ref phase }) if phase == "verification"
    ));
    assert_eq!(executor.still_open(), 0);
}

#[tokio::test]
async fn test_simulated_server_full_rotation() {
    let db = SimulatedDatabase::new();
    db.create_account("svc", "old1").await;
    let engine = RotationEngine::new(Arc::new(db.clone()), RotationOptions::default());

    engine
        .rotate(&scenario_request(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(db.password_matches("svc", "new2").await);

    // Retrying with the same old password must fail rather than be masked.
    let retry = engine
        .rotate(&scenario_request(), &CancellationToken::new())
        .await;
    assert!(matches!(
        retry,
        Err(SecretsError::RotationExecution { .. })
    ));
    assert_eq!(
        db.attempts().await.first().map(String::as_str),
        Some("HOST=db;PORT=50000;DATABASE=x;UID=svc;PWD=****;NEWPWD=****")
    );
}
