//! Secret lifecycle: `Created → {Consumed | Expired-Unread} → Deleted`.
//!
//! All secret state lives in the [`Store`]; this engine only sequences
//! validate → encrypt → insert on the way in, and try-consume → decrypt on
//! the way out. Store calls run on the blocking pool under a timeout. A call
//! that has been handed to the pool runs to completion even if the request
//! that issued it goes away, so a consumed secret whose plaintext never
//! reached its client stays consumed.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::metrics::Metrics;
use crate::store::{Cipher, ConsumeResult, SecretRecord, Store, StoreError};

/// Upper bound on plaintext size.
pub const MAX_CONTENT_BYTES: usize = 1_048_576;
/// Default budget for a single store operation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default reaper period.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(3600);

const ID_BYTES: usize = 16;

/// The only lifetimes a secret may be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Day,
    TwoDays,
    ThreeDays,
}

impl Lifetime {
    pub fn from_hours(hours: i64) -> Option<Self> {
        match hours {
            24 => Some(Self::Day),
            48 => Some(Self::TwoDays),
            72 => Some(Self::ThreeDays),
            _ => None,
        }
    }

    pub fn hours(self) -> i64 {
        match self {
            Self::Day => 24,
            Self::TwoDays => 48,
            Self::ThreeDays => 72,
        }
    }

    pub fn seconds(self) -> i64 {
        self.hours() * 3600
    }
}

/// Handle returned to the creator. Never carries ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSecret {
    pub id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Plaintext plus timestamps, returned exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealedSecret {
    pub content: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub deleted: u64,
    pub active: u64,
}

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Generate a 128-bit random identifier as 32 lowercase hex chars.
pub fn generate_secret_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// True for strings shaped like [`generate_secret_id`] output.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_BYTES * 2 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub struct Lifecycle {
    store: Store,
    cipher: Arc<Cipher>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    next_id: IdGenerator,
    store_timeout: Duration,
}

impl Lifecycle {
    pub fn new(store: Store, cipher: Cipher, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            cipher: Arc::new(cipher),
            metrics,
            clock: Arc::new(SystemClock),
            next_id: Arc::new(generate_secret_id),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.next_id = Arc::new(generator);
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Validate, encrypt and persist a new secret.
    pub async fn create(&self, content: &str, lifetime_hours: i64) -> Result<CreatedSecret, Error> {
        if content.is_empty() {
            return Err(Error::invalid("content is required"));
        }
        if content.len() > MAX_CONTENT_BYTES {
            return Err(Error::invalid("content exceeds 1 MiB limit"));
        }
        let lifetime = Lifetime::from_hours(lifetime_hours)
            .ok_or_else(|| Error::invalid("expiration hours must be 24, 48, or 72"))?;

        let (ciphertext, nonce) = self.cipher.encrypt(content.as_bytes()).map_err(|e| {
            self.metrics.encryption_errors_total.inc();
            Error::from(e)
        })?;

        let created_at = self.clock.now();
        let expires_at = created_at + lifetime.seconds();
        let mut record = SecretRecord::new(
            (self.next_id)(),
            ciphertext,
            nonce.to_vec(),
            created_at,
            expires_at,
        );

        // One retry on id collision; anything else surfaces as-is.
        match self.insert(record.clone()).await {
            Err(Error::Store(StoreError::DuplicateId)) => {
                warn!(id = %record.id, "secret id collision, retrying with a fresh id");
                record.id = (self.next_id)();
                self.insert(record.clone()).await?;
            }
            other => other?,
        }

        self.metrics.secrets_created_total.inc();
        info!(
            id = %record.id,
            lifetime_hours = lifetime.hours(),
            expires_at,
            "secret created"
        );
        Ok(CreatedSecret {
            id: record.id.clone(),
            created_at,
            expires_at,
        })
    }

    /// Read a secret and permanently invalidate it.
    pub async fn consume(&self, id: &str) -> Result<RevealedSecret, Error> {
        if !is_valid_id(id) {
            return Err(Error::NotFound);
        }

        let now = self.clock.now();
        let owned_id = id.to_owned();
        let outcome = self
            .run_store("try_consume", move |store| store.try_consume(&owned_id, now))
            .await?;

        let record = match outcome {
            ConsumeResult::Consumed(record) => record,
            ConsumeResult::NotFound => {
                debug!(id = %id, "read of unknown secret");
                return Err(Error::NotFound);
            }
            ConsumeResult::AlreadyConsumed => {
                self.metrics.secrets_already_read_total.inc();
                info!(id = %id, "read refused: already accessed");
                return Err(Error::AlreadyConsumed);
            }
            ConsumeResult::Expired => {
                self.metrics.secrets_expired_read_total.inc();
                info!(id = %id, "read refused: expired");
                return Err(Error::Expired);
            }
        };

        // The accessed flag is committed at this point; a decrypt failure
        // leaves the secret consumed.
        let content = self
            .cipher
            .decrypt(&record.ciphertext, &record.nonce)
            .map_err(Error::from)
            .and_then(|plaintext| {
                String::from_utf8(plaintext)
                    .map_err(|_| Error::Internal("secret content is not valid UTF-8".into()))
            })
            .inspect_err(|e| {
                self.metrics.decryption_errors_total.inc();
                warn!(id = %id, error = %e, "secret consumed but could not be decrypted");
            })?;

        self.metrics.secrets_read_total.inc();
        info!(id = %id, "secret read and invalidated");
        Ok(RevealedSecret {
            content,
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }

    /// One reaper pass: drop expired secrets, then refresh the active gauge.
    pub async fn reap(&self) -> Result<ReapReport, Error> {
        let now = self.clock.now();
        let deleted = self
            .run_store("delete_expired", move |store| store.delete_expired(now))
            .await?;
        if deleted > 0 {
            self.metrics.secrets_cleaned_up_total.inc_by(deleted);
            info!(deleted, "cleaned up expired secrets");
        }

        let active = self
            .run_store("count_active", move |store| store.count_active(now))
            .await?;
        self.metrics
            .active_secrets
            .set(i64::try_from(active).unwrap_or(i64::MAX));

        Ok(ReapReport { deleted, active })
    }

    /// Spawn a background task that calls [`reap`](Self::reap) every `interval`.
    /// The first pass runs immediately. Errors are logged and left for the next tick.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.reap().await {
                    warn!(error = %e, "reaper pass failed");
                }
            }
        })
    }

    async fn insert(&self, record: SecretRecord) -> Result<(), Error> {
        self.run_store("insert", move |store| store.insert(&record))
            .await
    }

    async fn run_store<T, F>(&self, op: &'static str, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || f(&store));
        match time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result.map_err(Error::from),
            Ok(Err(join)) => Err(Error::Internal(format!("{op} task failed: {join}"))),
            Err(_) => {
                warn!(op, timeout = ?self.store_timeout, "store operation timed out");
                Err(Error::StoreTimeout(op))
            }
        }
    }
}
