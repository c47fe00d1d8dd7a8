mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{
    ACCESS_TOKEN, CHALLENGE, CHALLENGE_TIMESTAMP_MS, StatusReply, TAX_ID, TOKEN,
    certificate_der_base64, fast_auth_config, generate_key, spawn_mock,
};
use ksef_client::auth::{
    AuthConfig, AuthError, AuthState, RefreshConfig, RefreshOutcome, SessionRefresher,
};
use serde_json::json;

fn expire_in(mock: &common::MockKsef, lifetime: TimeDelta) {
    *mock.state.valid_until.lock().unwrap() = Some((Utc::now() + lifetime).to_rfc3339());
}

#[tokio::test]
async fn test_full_handshake_binds_token_to_challenge() {
    let mock = spawn_mock().await;
    let valid_until = "2030-01-01T12:00:00+00:00";
    *mock.state.valid_until.lock().unwrap() = Some(valid_until.to_string());
    let session = mock.session();
    assert_eq!(session.state(), AuthState::Unauthenticated);

    let access = session.authenticate().await.expect("authentication failed");

    assert_eq!(
        mock.state.events(),
        ["certificates", "challenge", "submit", "status", "redeem"]
    );
    let submissions = mock.state.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].challenge, CHALLENGE);
    assert_eq!(submissions[0].context_type, "Nip");
    assert_eq!(submissions[0].context_value, TAX_ID);
    assert_eq!(
        submissions[0].plaintext,
        format!("{TOKEN}|{CHALLENGE_TIMESTAMP_MS}")
    );

    assert_eq!(access.access_credential(), Some(ACCESS_TOKEN));
    assert_eq!(
        access.expires_at(),
        Some(DateTime::parse_from_rfc3339(valid_until).unwrap().with_timezone(&Utc))
    );
    assert!(session.is_valid());
    assert_eq!(session.state(), AuthState::Authenticated);
    assert_eq!(session.access_credential().as_deref(), Some(ACCESS_TOKEN));
}

#[tokio::test]
async fn test_polls_until_ready_then_redeems_once() {
    let mock = spawn_mock().await;
    mock.state.set_status_replies([
        StatusReply::Code(100),
        StatusReply::Code(100),
        StatusReply::Code(100),
        StatusReply::Code(200),
    ]);
    let session = mock.session();

    session.authenticate().await.expect("authentication failed");

    assert_eq!(mock.state.count("status"), 4);
    assert_eq!(mock.state.count("redeem"), 1);
}

#[tokio::test]
async fn test_terminal_status_code_fails_without_redeem() {
    let mock = spawn_mock().await;
    mock.state
        .set_status_replies([StatusReply::Code(100), StatusReply::Code(450)]);
    let session = mock.session();

    let err = session.authenticate().await.unwrap_err();

    assert!(matches!(err, AuthError::AuthStatusFailed { code: 450, .. }));
    assert_eq!(mock.state.count("redeem"), 0);
    assert!(!session.is_valid());
    assert_eq!(session.state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn test_not_found_status_is_retried() {
    let mock = spawn_mock().await;
    mock.state.set_status_replies([
        StatusReply::Http(404),
        StatusReply::Http(404),
        StatusReply::Code(200),
    ]);
    let session = mock.session();

    session.authenticate().await.expect("authentication failed");

    assert_eq!(mock.state.count("status"), 3);
    assert_eq!(mock.state.count("redeem"), 1);
}

#[tokio::test]
async fn test_server_error_while_polling_is_terminal() {
    let mock = spawn_mock().await;
    mock.state.set_status_replies([StatusReply::Http(500)]);
    let session = mock.session();

    let err = session.authenticate().await.unwrap_err();

    assert!(matches!(err, AuthError::AuthStatusFailed { code: 500, .. }));
    assert_eq!(mock.state.count("status"), 1);
    assert_eq!(mock.state.count("redeem"), 0);
}

#[tokio::test]
async fn test_status_timeout_redeems_optimistically() {
    let mock = spawn_mock().await;
    *mock.state.status_fallback.lock().unwrap() = StatusReply::Code(100);
    let session = mock.session_with(
        TOKEN,
        AuthConfig {
            poll_timeout: Duration::from_millis(100),
            ..fast_auth_config()
        },
    );

    session.authenticate().await.expect("authentication failed");

    assert!(mock.state.count("status") > 1);
    assert_eq!(mock.state.count("redeem"), 1);
    assert!(session.is_valid());
}

#[tokio::test]
async fn test_status_timeout_fails_when_configured() {
    let mock = spawn_mock().await;
    *mock.state.status_fallback.lock().unwrap() = StatusReply::Code(100);
    let session = mock.session_with(
        TOKEN,
        AuthConfig {
            poll_timeout: Duration::from_millis(100),
            fail_on_status_timeout: true,
            ..fast_auth_config()
        },
    );

    let err = session.authenticate().await.unwrap_err();

    assert!(matches!(err, AuthError::AuthStatusTimeout { .. }));
    assert_eq!(mock.state.count("redeem"), 0);
    assert!(!session.is_valid());
}

#[tokio::test]
async fn test_missing_certificates_fail_before_challenge() {
    let mock = spawn_mock().await;
    mock.state.certificates.lock().unwrap().clear();
    let session = mock.session();

    let err = session.authenticate().await.unwrap_err();

    assert!(matches!(err, AuthError::CertificateUnavailable(_)));
    assert_eq!(mock.state.events(), ["certificates"]);
}

#[tokio::test]
async fn test_malformed_credential_never_submits() {
    let mock = spawn_mock().await;
    let session = mock.session_with("just-a-secret-without-segments", fast_auth_config());

    let err = session.authenticate().await.unwrap_err();

    assert!(matches!(err, AuthError::MissingCredential));
    assert_eq!(mock.state.count("submit"), 0);
    assert_eq!(mock.state.count("redeem"), 0);
}

#[tokio::test]
async fn test_selects_token_encryption_certificate() {
    let mock = spawn_mock().await;
    {
        let other_key = generate_key();
        let mut certificates = mock.state.certificates.lock().unwrap();
        certificates.insert(
            0,
            json!({
                "certificate": certificate_der_base64(&other_key),
                "usage": ["SymmetricKeyEncryption"],
            }),
        );
    }
    let session = mock.session();

    session.authenticate().await.expect("authentication failed");

    let submissions = mock.state.submissions.lock().unwrap().clone();
    assert_eq!(
        submissions[0].plaintext,
        format!("{TOKEN}|{CHALLENGE_TIMESTAMP_MS}")
    );
}

#[tokio::test]
async fn test_iso_challenge_timestamp_is_bound_as_millis() {
    let mock = spawn_mock().await;
    let timestamp = "2025-01-15T10:40:00.123+00:00";
    *mock.state.challenge.lock().unwrap() = json!({
        "challenge": CHALLENGE,
        "timestamp": timestamp,
    });
    let session = mock.session();

    session.authenticate().await.expect("authentication failed");

    let millis = DateTime::parse_from_rfc3339(timestamp)
        .unwrap()
        .timestamp_millis();
    let submissions = mock.state.submissions.lock().unwrap().clone();
    assert_eq!(submissions[0].plaintext, format!("{TOKEN}|{millis}"));
}

#[tokio::test]
async fn test_concurrent_authenticate_is_single_flight() {
    let mock = spawn_mock().await;
    *mock.state.submit_delay.lock().unwrap() = Duration::from_millis(100);
    let session = mock.session();

    let (a, b, c) = tokio::join!(
        session.authenticate(),
        session.authenticate(),
        session.authenticate()
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(mock.state.count("submit"), 1);
    assert_eq!(mock.state.count("redeem"), 1);
}

#[tokio::test]
async fn test_unparseable_expiry_is_treated_as_unknown() {
    let mock = spawn_mock().await;
    *mock.state.valid_until.lock().unwrap() = Some("tomorrow-ish".to_string());
    let session = mock.session();

    let access = session.authenticate().await.expect("authentication failed");

    assert_eq!(access.expires_at(), None);
    assert!(session.is_valid());
}

#[tokio::test]
async fn test_invalidate_forces_reauthentication() {
    let mock = spawn_mock().await;
    let session = mock.session();

    assert_eq!(session.ensure_valid().await.unwrap(), ACCESS_TOKEN);
    assert_eq!(session.ensure_valid().await.unwrap(), ACCESS_TOKEN);
    assert_eq!(mock.state.count("submit"), 1);

    session.invalidate();
    assert!(!session.is_valid());
    assert_eq!(session.ensure_valid().await.unwrap(), ACCESS_TOKEN);
    assert_eq!(mock.state.count("submit"), 2);
}

#[tokio::test]
async fn test_refresh_reauthenticates_near_expiry() {
    let mock = spawn_mock().await;
    expire_in(&mock, TimeDelta::seconds(60));
    let session = mock.session();
    session.authenticate().await.expect("authentication failed");

    expire_in(&mock, TimeDelta::hours(1));
    let refresher = SessionRefresher::new(Arc::clone(&session), RefreshConfig::default());

    assert_eq!(refresher.check_once().await, RefreshOutcome::Refreshed);
    assert_eq!(mock.state.count("submit"), 2);
    assert_eq!(refresher.check_once().await, RefreshOutcome::NotNeeded);
    assert_eq!(mock.state.count("submit"), 2);
}

#[tokio::test]
async fn test_refresh_failure_keeps_current_session() {
    let mock = spawn_mock().await;
    expire_in(&mock, TimeDelta::seconds(60));
    let session = mock.session();
    session.authenticate().await.expect("authentication failed");

    mock.state.certificates.lock().unwrap().clear();
    let refresher = SessionRefresher::new(Arc::clone(&session), RefreshConfig::default());

    assert!(matches!(
        refresher.check_once().await,
        RefreshOutcome::Failed(_)
    ));
    assert!(session.is_valid());
    assert_eq!(session.access_credential().as_deref(), Some(ACCESS_TOKEN));
}

#[tokio::test]
async fn test_background_refresher_runs_checks() {
    let mock = spawn_mock().await;
    expire_in(&mock, TimeDelta::seconds(60));
    let session = mock.session();
    session.authenticate().await.expect("authentication failed");
    expire_in(&mock, TimeDelta::hours(1));

    let refresher = SessionRefresher::new(
        Arc::clone(&session),
        RefreshConfig {
            check_interval: Duration::from_millis(50),
            threshold: Duration::from_secs(300),
        },
    );
    refresher.start();
    tokio::time::sleep(Duration::from_millis(500)).await;
    refresher.stop();

    assert!(!refresher.is_running());
    // Only the first tick refreshes; afterwards the session is far from expiry.
    assert_eq!(mock.state.count("submit"), 2);
}
