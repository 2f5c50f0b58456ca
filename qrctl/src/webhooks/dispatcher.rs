//! Outbox dispatch: claim, sign, send, record results.
//!
//! ```text
//! dispatcher.tick()
//!   ├─ release_stale()                      // processing rows older than stale_after → pending, or failed on the last attempt
//!   ├─ claim_and_send()
//!   │    ├─ DB: claim_due()                 // FOR UPDATE SKIP LOCKED, attempts + 1
//!   │    └─ for each claimed row:
//!   │         ├─ CPU: sign_hex(body)
//!   │         └─ send_tx.try_send(request) ─────────────┐
//!   │                                                    ▼
//!   │         run_sender (spawned task): semaphore-bounded HTTP POSTs
//!   │                                                    │
//!   └─ drain_results() ◄── result_rx.try_recv() ─────────┘
//!        ├─ 2xx     → mark_delivered()
//!        └─ failure → schedule_retry() or mark_failed()
//! ```
//!
//! The sender task has no DB access: HTTP in, result out. Rows whose result is
//! lost (shutdown mid-send, full channel) stay `processing` until released, and
//! a lost final attempt fails the row instead of re-queueing it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::PgPool;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::WebhookConfig;
use crate::db::handlers::{WebhookOutbox, webhook_outbox::StaleRelease};
use crate::types::{OutboxId, abbrev_uuid};
use crate::webhooks::signing::{self, EVENT_HEADER, SIGNATURE_HEADER};

pub const USER_AGENT: &str = "QR-Generator-Webhook/1.0";

#[derive(Debug)]
struct WebhookSendRequest {
    url: String,
    headers: Vec<(String, String)>,
    body: String,
    delivery_id: OutboxId,
    attempts: i32,
    max_attempts: i32,
}

#[derive(Debug)]
enum SendOutcome {
    Success { status_code: u16, body: String },
    Failure { status_code: Option<u16>, error: String },
}

#[derive(Debug)]
struct WebhookSendResult {
    delivery_id: OutboxId,
    attempts: i32,
    max_attempts: i32,
    outcome: SendOutcome,
}

/// What happens to a delivery after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    GiveUp,
}

/// After failed attempt `attempts` (1-based): retry after
/// `schedule[min(attempts - 1, len - 1)]` seconds while attempts remain.
pub fn retry_decision(attempts: i32, max_attempts: i32, schedule: &[i64], now: DateTime<Utc>) -> RetryDecision {
    if attempts >= max_attempts {
        return RetryDecision::GiveUp;
    }
    let Some(last) = schedule.len().checked_sub(1) else {
        return RetryDecision::RetryAt(now);
    };
    let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(0).min(last);
    RetryDecision::RetryAt(now + chrono::Duration::seconds(schedule[index]))
}

pub struct WebhookDispatcher {
    pool: PgPool,
    send_tx: mpsc::Sender<WebhookSendRequest>,
    result_rx: mpsc::Receiver<WebhookSendResult>,
    retry_schedule: Vec<i64>,
    claim_batch_size: i64,
    stale_after: Duration,
}

impl WebhookDispatcher {
    /// Create a dispatcher and spawn its sender task
    pub fn spawn(pool: PgPool, config: &WebhookConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let (send_tx, send_rx) = mpsc::channel::<WebhookSendRequest>(config.channel_capacity);
        let (result_tx, result_rx) = mpsc::channel(config.channel_capacity);

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        tokio::spawn(run_sender(send_rx, result_tx, http_client, config.max_concurrent_sends, shutdown));

        Ok(Self {
            pool,
            send_tx,
            result_rx,
            retry_schedule: config.retry_schedule_secs.clone(),
            claim_batch_size: config.claim_batch_size,
            stale_after: config.stale_after,
        })
    }

    /// Poll the outbox until cancelled
    pub async fn run(mut self, poll_interval: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?poll_interval, "Webhook dispatcher started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.cancelled() => {
                    tracing::info!("Webhook dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// One dispatch cycle
    pub async fn tick(&mut self) {
        tracing::trace!("Webhook dispatcher tick");
        self.release_stale().await;
        self.claim_and_send().await;
        self.drain_results().await;
    }

    async fn release_stale(&self) {
        let Ok(stale_after) = chrono::Duration::from_std(self.stale_after) else {
            return;
        };
        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire connection for stale release");
                return;
            }
        };
        match WebhookOutbox::new(&mut conn).release_stale(Utc::now() - stale_after).await {
            Ok(StaleRelease { released: 0, failed: 0 }) => {}
            Ok(StaleRelease { released, failed }) => {
                counter!("qrctl_webhook_deliveries_released_total").increment(released);
                counter!("qrctl_webhook_deliveries_total", "outcome" => "failed").increment(failed);
                tracing::info!(released, failed, "Settled stale webhook deliveries");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to release stale deliveries"),
        }
    }

    async fn claim_and_send(&self) {
        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire connection for outbox claims");
                return;
            }
        };

        let deliveries = match WebhookOutbox::new(&mut conn).claim_due(self.claim_batch_size, Utc::now()).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim due deliveries");
                return;
            }
        };

        if deliveries.is_empty() {
            return;
        }

        counter!("qrctl_webhook_deliveries_claimed_total").increment(deliveries.len() as u64);
        tracing::debug!(count = deliveries.len(), "Claimed deliveries for sending");

        for delivery in deliveries {
            // Signature covers exactly these bytes
            let body = match serde_json::to_string(&delivery.payload) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, delivery_id = %abbrev_uuid(&delivery.id), "Unserializable payload, marking failed");
                    if let Err(e) = WebhookOutbox::new(&mut conn)
                        .mark_failed(delivery.id, None, "payload serialization failed")
                        .await
                    {
                        tracing::warn!(error = %e, delivery_id = %abbrev_uuid(&delivery.id), "Failed to mark delivery failed");
                    }
                    continue;
                }
            };

            let mut headers = vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (EVENT_HEADER.to_string(), delivery.event_type.clone()),
            ];
            if let Some(secret) = delivery.webhook_secret.as_deref() {
                headers.push((SIGNATURE_HEADER.to_string(), signing::sign_hex(secret, body.as_bytes())));
            }

            let request = WebhookSendRequest {
                url: delivery.webhook_url,
                headers,
                body,
                delivery_id: delivery.id,
                attempts: delivery.attempts,
                max_attempts: delivery.max_attempts,
            };

            if let Err(e) = self.send_tx.try_send(request) {
                tracing::warn!(
                    delivery_id = %abbrev_uuid(&delivery.id),
                    error = %e,
                    "Sender channel full, delivery will be released as stale"
                );
            }
        }
    }

    async fn drain_results(&mut self) {
        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire connection for result drain");
                return;
            }
        };

        while let Ok(result) = self.result_rx.try_recv() {
            let mut repo = WebhookOutbox::new(&mut conn);
            let delivery = abbrev_uuid(&result.delivery_id);

            match result.outcome {
                SendOutcome::Success { status_code, body } => {
                    counter!("qrctl_webhook_deliveries_total", "outcome" => "success").increment(1);
                    if let Err(e) = repo.mark_delivered(result.delivery_id, i32::from(status_code), &body).await {
                        tracing::warn!(error = %e, delivery_id = %delivery, "Failed to mark delivery delivered");
                    }
                    tracing::debug!(delivery_id = %delivery, status = status_code, "Webhook delivered");
                }
                SendOutcome::Failure { status_code, error } => {
                    let status = status_code.map(i32::from);
                    let update = match retry_decision(result.attempts, result.max_attempts, &self.retry_schedule, Utc::now()) {
                        RetryDecision::RetryAt(at) => {
                            counter!("qrctl_webhook_deliveries_total", "outcome" => "retry").increment(1);
                            repo.schedule_retry(result.delivery_id, at, status, &error).await
                        }
                        RetryDecision::GiveUp => {
                            counter!("qrctl_webhook_deliveries_total", "outcome" => "failed").increment(1);
                            repo.mark_failed(result.delivery_id, status, &error).await
                        }
                    };
                    if let Err(e) = update {
                        tracing::warn!(error = %e, delivery_id = %delivery, "Failed to record delivery failure");
                    }
                    tracing::warn!(
                        delivery_id = %delivery,
                        attempt = result.attempts,
                        status_code = ?status_code,
                        error = %error,
                        "Webhook delivery failed"
                    );
                }
            }
        }
    }
}

/// Long-lived task performing HTTP deliveries
async fn run_sender(
    mut rx: mpsc::Receiver<WebhookSendRequest>,
    result_tx: mpsc::Sender<WebhookSendResult>,
    http_client: reqwest::Client,
    max_concurrent_sends: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_sends));

    loop {
        let request = tokio::select! {
            req = rx.recv() => match req {
                Some(r) => r,
                None => {
                    tracing::debug!("Webhook sender channel closed, shutting down");
                    break;
                }
            },
            _ = shutdown.cancelled() => {
                tracing::debug!("Webhook sender received shutdown signal");
                break;
            }
        };

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            tracing::warn!("Webhook sender semaphore closed");
            break;
        };

        let client = http_client.clone();
        let tx = result_tx.clone();

        tokio::spawn(async move {
            let _permit = permit;

            let mut builder = client.post(&request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let outcome = match builder.body(request.body).send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        SendOutcome::Success {
                            status_code: status.as_u16(),
                            body,
                        }
                    } else {
                        SendOutcome::Failure {
                            status_code: Some(status.as_u16()),
                            error: format!("HTTP {}", status.as_u16()),
                        }
                    }
                }
                Err(e) => SendOutcome::Failure {
                    status_code: None,
                    error: e.to_string(),
                },
            };

            let result = WebhookSendResult {
                delivery_id: request.delivery_id,
                attempts: request.attempts,
                max_attempts: request.max_attempts,
                outcome,
            };

            if let Err(e) = tx.send(result).await {
                tracing::warn!(delivery_id = %abbrev_uuid(&request.delivery_id), "Failed to return send result: {}", e);
            }
        });
    }

    tracing::debug!("Webhook sender task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use uuid::Uuid;
    use wiremock::matchers::{header, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn start_sender() -> (mpsc::Sender<WebhookSendRequest>, mpsc::Receiver<WebhookSendResult>, CancellationToken) {
        install_crypto_provider();
        let (send_tx, send_rx) = mpsc::channel(10);
        let (result_tx, result_rx) = mpsc::channel(10);
        let http_client = reqwest::Client::builder().user_agent(USER_AGENT).build().unwrap();
        let shutdown = CancellationToken::new();

        let sender_shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_sender(send_rx, result_tx, http_client, 20, sender_shutdown).await;
        });

        (send_tx, result_rx, shutdown)
    }

    fn make_request(url: &str, delivery_id: Uuid, attempts: i32) -> WebhookSendRequest {
        let body = r#"{"event":"scan.created"}"#.to_string();
        WebhookSendRequest {
            url: url.to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (EVENT_HEADER.to_string(), "scan.created".to_string()),
                (SIGNATURE_HEADER.to_string(), signing::sign_hex("secret", body.as_bytes())),
            ],
            body,
            delivery_id,
            attempts,
            max_attempts: 5,
        }
    }

    #[test]
    fn retry_follows_schedule_then_gives_up() {
        let now = Utc::now();
        let schedule = [60, 300, 1800, 7200];
        assert_eq!(
            retry_decision(1, 5, &schedule, now),
            RetryDecision::RetryAt(now + chrono::Duration::seconds(60))
        );
        assert_eq!(
            retry_decision(2, 5, &schedule, now),
            RetryDecision::RetryAt(now + chrono::Duration::seconds(300))
        );
        assert_eq!(
            retry_decision(4, 5, &schedule, now),
            RetryDecision::RetryAt(now + chrono::Duration::seconds(7200))
        );
        assert_eq!(retry_decision(5, 5, &schedule, now), RetryDecision::GiveUp);
    }

    #[test]
    fn retry_clamps_to_last_entry() {
        let now = Utc::now();
        assert_eq!(
            retry_decision(7, 10, &[10, 20], now),
            RetryDecision::RetryAt(now + chrono::Duration::seconds(20))
        );
        assert_eq!(retry_decision(1, 3, &[], now), RetryDecision::RetryAt(now));
    }

    #[test_log::test(tokio::test)]
    async fn successful_delivery_is_signed_and_keeps_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("user-agent", USER_AGENT))
            .and(header("x-webhook-event", "scan.created"))
            .and(header_exists("x-webhook-signature"))
            .respond_with(ResponseTemplate::new(200).set_body_string("thanks"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (send_tx, mut result_rx, shutdown) = start_sender().await;
        let delivery_id = Uuid::new_v4();
        send_tx.send(make_request(&mock_server.uri(), delivery_id, 1)).await.unwrap();

        let result = result_rx.recv().await.unwrap();
        assert_eq!(result.delivery_id, delivery_id);
        assert_eq!(result.attempts, 1);
        match result.outcome {
            SendOutcome::Success { status_code, body } => {
                assert_eq!(status_code, 200);
                assert_eq!(body, "thanks");
            }
            other => panic!("unexpected {other:?}"),
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn http_error_is_a_failure_with_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (send_tx, mut result_rx, shutdown) = start_sender().await;
        send_tx.send(make_request(&mock_server.uri(), Uuid::new_v4(), 3)).await.unwrap();

        let result = result_rx.recv().await.unwrap();
        assert_eq!(result.attempts, 3);
        assert!(matches!(result.outcome, SendOutcome::Failure { status_code: Some(500), .. }));

        shutdown.cancel();
    }

    #[test_log::test(tokio::test)]
    async fn network_error_is_a_failure_without_status() {
        let (send_tx, mut result_rx, shutdown) = start_sender().await;
        send_tx.send(make_request("http://127.0.0.1:1", Uuid::new_v4(), 1)).await.unwrap();

        let result = result_rx.recv().await.unwrap();
        assert!(matches!(result.outcome, SendOutcome::Failure { status_code: None, .. }));

        shutdown.cancel();
    }

    #[test_log::test(tokio::test)]
    async fn sender_exits_on_channel_close() {
        install_crypto_provider();
        let (send_tx, send_rx) = mpsc::channel(10);
        let (result_tx, _result_rx) = mpsc::channel(10);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(async move {
            run_sender(send_rx, result_tx, reqwest::Client::new(), 20, shutdown).await;
        });

        drop(send_tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sender should exit when channel closes")
            .expect("sender should not panic");
    }

    fn outbox_request(qr_code_id: Uuid, url: &str, max_attempts: i32) -> crate::db::models::webhook_outbox::OutboxCreateDBRequest {
        crate::db::models::webhook_outbox::OutboxCreateDBRequest {
            qr_code_id,
            event_type: "scan.created".to_string(),
            payload: serde_json::json!({ "event": "scan.created" }),
            webhook_url: url.to_string(),
            webhook_secret: Some("secret".to_string()),
            max_attempts,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_tick_delivers_and_records_response(pool: PgPool) {
        install_crypto_provider();
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("x-webhook-signature"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let qr_code_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        WebhookOutbox::new(&mut conn)
            .enqueue(&outbox_request(qr_code_id, &mock_server.uri(), 3))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let config = WebhookConfig {
            stale_after: Duration::from_secs(60),
            ..Default::default()
        };
        let mut dispatcher = WebhookDispatcher::spawn(pool.clone(), &config, shutdown.clone()).unwrap();

        let mut delivered = 0;
        for _ in 0..50 {
            dispatcher.tick().await;
            delivered = WebhookOutbox::new(&mut conn).counts_for_qr(qr_code_id).await.unwrap().delivered;
            if delivered == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(delivered, 1);
        shutdown.cancel();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_lost_final_send_is_not_retried(pool: PgPool) {
        install_crypto_provider();
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let qr_code_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let mut outbox = WebhookOutbox::new(&mut conn);
        outbox.enqueue(&outbox_request(qr_code_id, &mock_server.uri(), 1)).await.unwrap();
        // Claimed an hour ago by a replica that died before reporting back
        assert_eq!(outbox.claim_due(10, Utc::now() + chrono::Duration::seconds(5)).await.unwrap().len(), 1);
        sqlx::query("UPDATE webhook_outbox SET last_attempt_at = NOW() - INTERVAL '1 hour' WHERE qr_code_id = $1")
            .bind(qr_code_id)
            .execute(&mut *conn)
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let mut dispatcher = WebhookDispatcher::spawn(pool.clone(), &WebhookConfig::default(), shutdown.clone()).unwrap();
        dispatcher.tick().await;
        dispatcher.tick().await;

        let counts = WebhookOutbox::new(&mut conn).counts_for_qr(qr_code_id).await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending + counts.processing, 0);
        shutdown.cancel();
    }
}
