//! Signed, time-boxed QR attendance challenges.
//!
//! A challenge is an HMAC-signed JSON payload rendered as a QR code. Active
//! challenges live in an in-memory registry keyed by the public session code;
//! the registry sits behind [`ChallengeStore`] so a single-process map can be
//! swapped for a networked expiring cache without touching issue/verify logic.
//!
//! Challenges are shared secrets, not single-use: every trainee in the room
//! scans the same code, and deduplication happens at the attendance ledger.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use qrcode::QrCode;
use qrcode::render::svg;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::error::AttendanceError;

type HmacSha256 = Hmac<Sha256>;

const PAYLOAD_TYPE: &str = "attendance";

/// Wire shape of a scannable challenge payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    pub session_code: String,
    /// Issuance instant, unix milliseconds. Signed together with the code.
    pub timestamp: i64,
    pub signature: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Registry entry for an active challenge.
#[derive(Debug, Clone)]
pub struct StoredChallenge {
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Expiring key-value registry for active challenges.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn put(&self, key: String, entry: StoredChallenge);
    async fn get(&self, key: &str) -> Option<StoredChallenge>;
    async fn remove(&self, key: &str);
    /// Drops every entry past its expiry; returns how many were evicted.
    async fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

/// Process-local challenge registry. All challenges are lost on restart,
/// which is acceptable for their minutes-long lifetime.
#[derive(Default)]
pub struct InMemoryChallengeStore {
    inner: RwLock<HashMap<String, StoredChallenge>>,
}

impl InMemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn put(&self, key: String, entry: StoredChallenge) {
        self.inner.write().await.insert(key, entry);
    }

    async fn get(&self, key: &str) -> Option<StoredChallenge> {
        self.inner.read().await.get(key).cloned()
    }

    async fn remove(&self, key: &str) {
        self.inner.write().await.remove(key);
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.expires_at >= now);
        before - map.len()
    }
}

/// An issued challenge: the raw payload plus its QR rendering.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedChallenge {
    pub payload: String,
    pub qr_svg: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A successfully verified scan.
#[derive(Debug, Clone)]
pub struct VerifiedChallenge {
    pub session_code: String,
    /// Issuance instant recovered from the payload; used for late checks.
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies signed QR challenges against a [`ChallengeStore`].
#[derive(Clone)]
pub struct QrService {
    secret: String,
    store: Arc<dyn ChallengeStore>,
}

impl QrService {
    pub fn new(secret: impl Into<String>, store: Arc<dyn ChallengeStore>) -> Self {
        Self {
            secret: secret.into(),
            store,
        }
    }

    pub fn with_in_memory_store(secret: impl Into<String>) -> Self {
        Self::new(secret, Arc::new(InMemoryChallengeStore::new()))
    }

    fn sign(&self, session_code: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC key");
        mac.update(format!("{session_code}-{timestamp}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time signature check via the HMAC verifier.
    fn signature_matches(&self, session_code: &str, timestamp: i64, signature: &str) -> bool {
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC key");
        mac.update(format!("{session_code}-{timestamp}").as_bytes());
        mac.verify_slice(&sig_bytes).is_ok()
    }

    /// Issues a fresh challenge for `session_code`, overwriting any previous
    /// one (facilitators may refresh the code at will).
    pub async fn issue(
        &self,
        session_code: &str,
        expiry_minutes: i64,
    ) -> Result<IssuedChallenge, AttendanceError> {
        let now = Utc::now();
        let timestamp = now.timestamp_millis();
        let payload = QrPayload {
            session_code: session_code.to_owned(),
            timestamp,
            signature: self.sign(session_code, timestamp),
            kind: PAYLOAD_TYPE.to_owned(),
        };
        let payload = serde_json::to_string(&payload)
            .map_err(|e| AttendanceError::Validation(format!("Challenge encoding failed: {e}")))?;

        let qr_svg = QrCode::new(payload.as_bytes())
            .map_err(|e| AttendanceError::Validation(format!("QR rendering failed: {e}")))?
            .render::<svg::Color>()
            .min_dimensions(240, 240)
            .build();

        let expires_at = now + Duration::minutes(expiry_minutes);
        self.store
            .put(
                session_code.to_owned(),
                StoredChallenge {
                    payload: payload.clone(),
                    created_at: now,
                    expires_at,
                },
            )
            .await;

        Ok(IssuedChallenge {
            payload,
            qr_svg,
            issued_at: now,
            expires_at,
        })
    }

    /// Verifies a scanned payload. Fails closed on parse errors, wrong type,
    /// signature mismatch, unknown session, or expiry. The caller learns
    /// only "invalid", never which check failed.
    pub async fn verify(&self, scanned: &str) -> Result<VerifiedChallenge, AttendanceError> {
        let payload: QrPayload =
            serde_json::from_str(scanned).map_err(|_| AttendanceError::InvalidChallenge)?;

        if payload.kind != PAYLOAD_TYPE {
            return Err(AttendanceError::InvalidChallenge);
        }
        if !self.signature_matches(&payload.session_code, payload.timestamp, &payload.signature) {
            return Err(AttendanceError::InvalidChallenge);
        }

        let Some(entry) = self.store.get(&payload.session_code).await else {
            return Err(AttendanceError::InvalidChallenge);
        };

        let now = Utc::now();
        if now > entry.expires_at {
            // Lazy eviction: an expired entry is dead weight either way.
            self.store.remove(&payload.session_code).await;
            return Err(AttendanceError::InvalidChallenge);
        }

        let timestamp = DateTime::from_timestamp_millis(payload.timestamp)
            .ok_or(AttendanceError::InvalidChallenge)?;

        Ok(VerifiedChallenge {
            session_code: payload.session_code,
            timestamp,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        })
    }

    /// Drops the active challenge for a session, if any. Used when a
    /// facilitator ends attendance-taking.
    pub async fn revoke(&self, session_code: &str) {
        self.store.remove(session_code).await;
    }

    /// Periodic registry cleanup; bounds memory growth between restarts.
    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired(Utc::now()).await
    }
}
