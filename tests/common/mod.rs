#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use ksef_client::{
    auth::{AuthConfig, AuthSession},
    credential::{Credential, CredentialStore},
    ksef::KsefClient,
};
use openssl::{
    asn1::Asn1Time,
    encrypt::Decrypter,
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::{Padding, Rsa},
    x509::{X509Builder, X509NameBuilder},
};
use serde_json::{Value, json};

pub const TOKEN: &str = "20250115-EC-1A2B3C4D5E-F6|nip-5265877635|0123456789abcdef";
pub const TAX_ID: &str = "5265877635";
pub const CHALLENGE: &str = "20250115-CR-2FDC2D8A0B-3E9F7C6A11-1B";
pub const CHALLENGE_TIMESTAMP_MS: i64 = 1_736_937_600_000;
pub const REFERENCE_NUMBER: &str = "20250115-AU-2FDC2D8A0B-3E9F7C6A11-C4";
pub const TEMPORARY_TOKEN: &str = "temporary-authentication-token";
pub const ACCESS_TOKEN: &str = "access-token";

/// What the status endpoint answers for one poll.
#[derive(Debug, Clone, Copy)]
pub enum StatusReply {
    Code(i64),
    Http(u16),
}

/// Token submission as decoded by the mock server.
#[derive(Debug, Clone)]
pub struct Submission {
    pub challenge: String,
    pub context_type: String,
    pub context_value: String,
    pub plaintext: String,
}

pub struct MockState {
    key: PKey<Private>,
    pub certificates: Mutex<Vec<Value>>,
    pub challenge: Mutex<Value>,
    pub status_replies: Mutex<VecDeque<StatusReply>>,
    /// Answer once `status_replies` is exhausted.
    pub status_fallback: Mutex<StatusReply>,
    pub submit_delay: Mutex<Duration>,
    pub valid_until: Mutex<Option<String>>,
    pub metadata_status: Mutex<u16>,
    pub invoices: Mutex<Vec<Value>>,
    pub invoice_body: Mutex<(Vec<u8>, String)>,
    pub submissions: Mutex<Vec<Submission>>,
    pub metadata_requests: Mutex<Vec<(HashMap<String, String>, Value)>>,
    events: Mutex<Vec<String>>,
}

impl MockState {
    fn new() -> Self {
        let key = generate_key();
        let certificate = certificate_der_base64(&key);
        Self {
            key,
            certificates: Mutex::new(vec![json!({
                "certificate": certificate,
                "usage": ["KsefTokenEncryption"],
                "validFrom": "2025-01-01T00:00:00Z",
                "validTo": "2027-01-01T00:00:00Z",
            })]),
            challenge: Mutex::new(json!({
                "challenge": CHALLENGE,
                "timestampMs": CHALLENGE_TIMESTAMP_MS,
            })),
            status_replies: Mutex::new(VecDeque::new()),
            status_fallback: Mutex::new(StatusReply::Code(200)),
            submit_delay: Mutex::new(Duration::ZERO),
            valid_until: Mutex::new(Some(
                (chrono::Utc::now() + chrono::TimeDelta::hours(1)).to_rfc3339(),
            )),
            metadata_status: Mutex::new(200),
            invoices: Mutex::new(Vec::new()),
            invoice_body: Mutex::new((Vec::new(), "application/xml".to_string())),
            submissions: Mutex::new(Vec::new()),
            metadata_requests: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn set_status_replies(&self, replies: impl IntoIterator<Item = StatusReply>) {
        *self.status_replies.lock().unwrap() = replies.into_iter().collect();
    }
}

pub struct MockKsef {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockKsef {
    pub fn client(&self) -> KsefClient {
        KsefClient::new(&self.base_url, Duration::from_secs(5)).unwrap()
    }

    pub fn session(&self) -> Arc<AuthSession> {
        self.session_with(TOKEN, fast_auth_config())
    }

    pub fn session_with(&self, token: &str, config: AuthConfig) -> Arc<AuthSession> {
        let credentials = CredentialStore::new(Some(Credential::new(token)));
        Arc::new(AuthSession::new(self.client(), credentials, config))
    }
}

/// Short polling so timing tests stay fast.
pub fn fast_auth_config() -> AuthConfig {
    AuthConfig {
        poll_interval: Duration::from_millis(10),
        poll_timeout: Duration::from_millis(1000),
        fail_on_status_timeout: false,
    }
}

// Helper function to spawn a mock KSeF API on a random port
pub async fn spawn_mock() -> MockKsef {
    let state = Arc::new(MockState::new());
    let app = Router::new()
        .route("/security/public-key-certificates", get(certificates))
        .route("/auth/challenge", post(challenge))
        .route("/auth/ksef-token", post(submit))
        .route("/auth/token/redeem", post(redeem))
        .route("/auth/{reference}", get(status))
        .route("/invoices/query/metadata", post(metadata))
        .route("/invoices/ksef/{id}", get(invoice))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("failed to run mock server");
    });

    MockKsef {
        base_url: format!("http://{addr}"),
        state,
    }
}

pub fn generate_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn certificate_der_base64(key: &PKey<Private>) -> String {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "KSeF test").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();

    STANDARD.encode(builder.build().to_der().unwrap())
}

fn decrypt(key: &PKey<Private>, ciphertext: &[u8]) -> Option<Vec<u8>> {
    let mut decrypter = Decrypter::new(key).ok()?;
    decrypter.set_rsa_padding(Padding::PKCS1_OAEP).ok()?;
    decrypter.set_rsa_oaep_md(MessageDigest::sha256()).ok()?;
    decrypter.set_rsa_mgf1_md(MessageDigest::sha256()).ok()?;
    let mut out = vec![0u8; decrypter.decrypt_len(ciphertext).ok()?];
    let n = decrypter.decrypt(ciphertext, &mut out).ok()?;
    out.truncate(n);
    Some(out)
}

fn bearer_is(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {token}"))
}

type Shared = State<Arc<MockState>>;

async fn certificates(State(state): Shared) -> Json<Value> {
    state.record("certificates");
    Json(Value::Array(state.certificates.lock().unwrap().clone()))
}

async fn challenge(State(state): Shared) -> Json<Value> {
    state.record("challenge");
    Json(state.challenge.lock().unwrap().clone())
}

async fn submit(State(state): Shared, Json(body): Json<Value>) -> Response {
    state.record("submit");
    let delay = *state.submit_delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    let plaintext = body["encryptedToken"]
        .as_str()
        .and_then(|b64| STANDARD.decode(b64).ok())
        .and_then(|ciphertext| decrypt(&state.key, &ciphertext))
        .and_then(|bytes| String::from_utf8(bytes).ok());
    let Some(plaintext) = plaintext else {
        return (StatusCode::BAD_REQUEST, "cannot decrypt token").into_response();
    };

    state.submissions.lock().unwrap().push(Submission {
        challenge: body["challenge"].as_str().unwrap_or_default().to_string(),
        context_type: body["contextIdentifier"]["type"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        context_value: body["contextIdentifier"]["value"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        plaintext,
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "referenceNumber": REFERENCE_NUMBER,
            "authenticationToken": {
                "token": TEMPORARY_TOKEN,
                "validUntil": (chrono::Utc::now() + chrono::TimeDelta::minutes(15)).to_rfc3339(),
            },
        })),
    )
        .into_response()
}

async fn status(
    State(state): Shared,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.record("status");
    if reference != REFERENCE_NUMBER {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !bearer_is(&headers, TEMPORARY_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let reply = state
        .status_replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(*state.status_fallback.lock().unwrap());
    match reply {
        StatusReply::Code(code) => Json(json!({
            "startDate": "2025-01-15T10:40:00Z",
            "authenticationMethod": "Token",
            "status": { "code": code, "description": format!("status {code}") },
        }))
        .into_response(),
        StatusReply::Http(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

async fn redeem(State(state): Shared, headers: HeaderMap) -> Response {
    state.record("redeem");
    if !bearer_is(&headers, TEMPORARY_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let valid_until = state.valid_until.lock().unwrap().clone();
    Json(json!({
        "accessToken": { "token": ACCESS_TOKEN, "validUntil": valid_until },
        "refreshToken": { "token": "refresh-token", "validUntil": valid_until },
    }))
    .into_response()
}

async fn metadata(
    State(state): Shared,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    state.record("metadata");
    state
        .metadata_requests
        .lock()
        .unwrap()
        .push((params, body));
    if !bearer_is(&headers, ACCESS_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let status = *state.metadata_status.lock().unwrap();
    if status != 200 {
        return StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }
    let invoices = state.invoices.lock().unwrap().clone();
    Json(json!({ "invoices": invoices, "hasMore": false })).into_response()
}

async fn invoice(State(state): Shared, Path(id): Path<String>, headers: HeaderMap) -> Response {
    state.record(format!("invoice:{id}"));
    if !bearer_is(&headers, ACCESS_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let (body, content_type) = state.invoice_body.lock().unwrap().clone();
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}
