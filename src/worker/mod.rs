//! Fan-out worker: consume queued delivery ids, transform, dispatch to each
//! action, record attempts, schedule retries, and roll delivery status up.
//!
//! ```text
//! worker.start()
//!   ├─ ensure consumer group on the deliveries stream
//!   ├─ N × consume_stream()          // read_group(count=1, block=5s) → process_delivery → ack
//!   ├─ poll_pending()                // every POLL_INTERVAL: re-inject status=pending deliveries
//!   └─ poll_retries()                // every POLL_INTERVAL: re-dispatch due failed attempts
//!
//! process_delivery(id)
//!   ├─ pending check + conditional claim (pending → processing)
//!   ├─ record-mode race guard
//!   ├─ transform script (optional): drop / rewrite / filter actions
//!   └─ dispatch once per surviving action, attempt_number = 1
//! ```
//!
//! Messages are acked whether processing succeeded or not: re-injection is
//! the pending poller's job, not the stream's. A failure in one action's
//! dispatch never prevents the other actions from being attempted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::db::handlers::{Actions, Deliveries, Sources};
use crate::db::models::actions::{Action, ActionType};
use crate::db::models::deliveries::{AttemptStatus, AttemptUpdateDBRequest, Delivery, DeliveryStatus};
use crate::db::models::sources::SourceMode;
use crate::errors::Error;
use crate::queue::{DELIVERIES_TOPIC, FANOUT_GROUP, Queue};
use crate::script::{self, ActionRef, ScriptError, TransformInput, TransformOutcome};
use crate::signing;

/// How long a stream read blocks before returning empty.
const READ_BLOCK: Duration = Duration::from_secs(5);

/// Rows examined per poller tick.
const POLL_BATCH: i64 = 100;

/// Response bodies are captured up to this many bytes.
const MAX_RESPONSE_BODY: usize = 4096;

/// Backoff ceiling before jitter.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Outbound dispatch header carrying the delivery id.
const DELIVERY_ID_HEADER: &str = "X-Delivery-ID";

pub struct FanoutWorker {
    pool: PgPool,
    queue: Queue,
    http_client: reqwest::Client,
    concurrency: usize,
    max_retries: i32,
    retry_base_delay: Duration,
    poll_interval: Duration,
}

impl FanoutWorker {
    pub fn new(pool: PgPool, queue: Queue, config: &Config) -> anyhow::Result<Arc<Self>> {
        let http_client = reqwest::Client::builder()
            .timeout(config.delivery_timeout)
            .build()?;

        Ok(Arc::new(Self {
            pool,
            queue,
            http_client,
            concurrency: config.worker_concurrency,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            poll_interval: config.poll_interval,
        }))
    }

    /// Ensure the consumer group exists and spawn the stream consumers plus
    /// the two pollers into `tasks`.
    pub async fn start(
        self: &Arc<Self>,
        tasks: &mut JoinSet<anyhow::Result<()>>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        self.queue.ensure_group(DELIVERIES_TOPIC, FANOUT_GROUP).await?;

        for i in 0..self.concurrency {
            let worker = self.clone();
            let token = shutdown.clone();
            tasks.spawn(async move { worker.consume_stream(format!("worker-{i}"), token).await });
        }

        let worker = self.clone();
        let token = shutdown.clone();
        tasks.spawn(async move { worker.poll_pending(token).await });

        let worker = self.clone();
        tasks.spawn(async move { worker.poll_retries(shutdown).await });

        Ok(())
    }

    /// One stream consumer: claim, process, ack, repeat until cancelled.
    async fn consume_stream(self: Arc<Self>, consumer: String, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::debug!(consumer = %consumer, "Stream consumer starting");

        loop {
            let messages = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(consumer = %consumer, "Stream consumer exiting");
                    return Ok(());
                }
                result = self.queue.read_group(DELIVERIES_TOPIC, FANOUT_GROUP, &consumer, 1, READ_BLOCK) => {
                    match result {
                        Ok(messages) => messages,
                        Err(e) => {
                            tracing::error!(error = %e, consumer = %consumer, "Queue read failed");
                            tokio::select! {
                                _ = shutdown.cancelled() => return Ok(()),
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            }
                            continue;
                        }
                    }
                }
            };

            for message in messages {
                match message.delivery_id.as_deref().map(Uuid::parse_str) {
                    Some(Ok(delivery_id)) => self.process_delivery(delivery_id).await,
                    _ => {
                        tracing::error!(msg_id = %message.id, consumer = %consumer, "Invalid delivery_id in stream message");
                    }
                }

                // Ack and delete regardless of outcome; the pending poller
                // owns re-injection.
                if let Err(e) = self.queue.ack(DELIVERIES_TOPIC, FANOUT_GROUP, &message.id).await {
                    tracing::warn!(error = %e, msg_id = %message.id, "Failed to ack stream message");
                }
            }
        }
    }

    /// Catch-up loop for deliveries the stream missed (enqueue failure,
    /// queue loss, crashed consumers).
    async fn poll_pending(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let deliveries = {
                let mut conn = match self.pool.acquire().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Pending poller failed to acquire connection");
                        continue;
                    }
                };
                match Deliveries::new(&mut conn).list_pending(POLL_BATCH).await {
                    Ok(deliveries) => deliveries,
                    Err(e) => {
                        tracing::error!(error = %e, "Pending poller query failed");
                        continue;
                    }
                }
            };

            for delivery in deliveries {
                tracing::info!(delivery_id = %delivery.id, "Catch-up: processing pending delivery");
                self.process_delivery(delivery.id).await;
            }
        }
    }

    /// Re-dispatch failed attempts whose retry time has elapsed.
    async fn poll_retries(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let attempts = {
                let mut conn = match self.pool.acquire().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Retry poller failed to acquire connection");
                        continue;
                    }
                };
                match Deliveries::new(&mut conn).list_retryable(POLL_BATCH).await {
                    Ok(attempts) => attempts,
                    Err(e) => {
                        tracing::error!(error = %e, "Retry poller query failed");
                        continue;
                    }
                }
            };

            for attempt in attempts {
                self.retry_attempt(&attempt).await;
            }
        }
    }

    /// Full lifecycle for one claimed delivery. Errors are logged and leave
    /// the delivery wherever it was; the pollers reconcile on the next run.
    pub async fn process_delivery(&self, delivery_id: Uuid) {
        if let Err(e) = self.try_process_delivery(delivery_id).await {
            tracing::error!(error = %e, delivery_id = %delivery_id, "Failed to process delivery");
        }
    }

    async fn try_process_delivery(&self, delivery_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;

        let Some(delivery) = Deliveries::new(&mut conn).get_by_id(delivery_id).await? else {
            tracing::warn!(delivery_id = %delivery_id, "Delivery not found");
            return Ok(());
        };

        if delivery.delivery_status() != DeliveryStatus::Pending {
            return Ok(());
        }

        let Some(source) = Sources::new(&mut conn).get_by_id(delivery.source_id).await? else {
            tracing::warn!(delivery_id = %delivery_id, "Source not found for delivery");
            return Ok(());
        };

        // Race guard: the source may have switched to record mode after
        // ingest enqueued this delivery.
        if source.source_mode() == SourceMode::Record {
            Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Recorded).await?;
            return Ok(());
        }

        // Conditional claim; exactly one of any concurrent claimers wins.
        if !Deliveries::new(&mut conn).try_mark_processing(delivery_id).await? {
            return Ok(());
        }

        let actions = Actions::new(&mut conn).list_active(delivery.source_id).await?;
        if actions.is_empty() {
            Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Completed).await?;
            return Ok(());
        }

        let mut payload = delivery.payload.clone();
        let mut headers = delivery.headers.clone();
        let mut active_actions = actions.clone();

        if let Some(script_body) = source.transform_script() {
            let outcome = match self.run_transform(script_body, &delivery, &actions).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, delivery_id = %delivery_id, "Transform script failed");
                    Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Failed).await?;
                    return Ok(());
                }
            };

            if outcome.dropped {
                tracing::info!(delivery_id = %delivery_id, "Transform script dropped delivery");
                Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Completed).await?;
                return Ok(());
            }

            let transformed_payload = serde_json::to_vec(&outcome.payload)?;
            let transformed_headers = serde_json::to_value(&outcome.headers)?;

            // Persisted so retries keep dispatching the transformed bytes.
            if let Err(e) = Deliveries::new(&mut conn)
                .set_transformed(delivery_id, &transformed_payload, &transformed_headers)
                .await
            {
                tracing::error!(error = %e, delivery_id = %delivery_id, "Failed to persist transformed data");
            }

            payload = transformed_payload;
            headers = transformed_headers;

            // An empty kept list means the script filtered everything out.
            if outcome.actions.is_empty() {
                Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Completed).await?;
                return Ok(());
            }
            let kept: HashSet<Uuid> = outcome.actions.iter().map(|a| a.id).collect();
            active_actions.retain(|a| kept.contains(&a.id));
            if active_actions.is_empty() {
                Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Completed).await?;
                return Ok(());
            }
        }

        drop(conn);

        let mut all_success = true;
        for action in &active_actions {
            if !self.dispatch_action(&delivery, action, 1, &payload, &headers).await {
                all_success = false;
            }
        }

        if all_success {
            let mut conn = self.pool.acquire().await?;
            Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Completed).await?;
        }
        // Otherwise the delivery stays in processing; retries roll it up.

        Ok(())
    }

    /// Execute the source transform against the delivery's original payload
    /// and headers.
    async fn run_transform(
        &self,
        script_body: &str,
        delivery: &Delivery,
        actions: &[Action],
    ) -> Result<TransformOutcome, ScriptError> {
        let payload: serde_json::Value = serde_json::from_slice(&delivery.payload)
            .map_err(|e| ScriptError::Exec(format!("failed to parse delivery payload: {e}")))?;

        let input = TransformInput {
            payload,
            headers: headers_to_map(&delivery.headers),
            actions: actions
                .iter()
                .map(|a| ActionRef {
                    id: a.id,
                    target_url: a.target_url.clone().unwrap_or_default(),
                })
                .collect(),
        };

        let script_body = script_body.to_string();
        tokio::task::spawn_blocking(move || script::run_transform(&script_body, &input))
            .await
            .map_err(|e| ScriptError::Exec(format!("transform task failed: {e}")))?
    }

    /// Dispatch one attempt for one action. Returns true on success.
    async fn dispatch_action(
        &self,
        delivery: &Delivery,
        action: &Action,
        attempt_number: i32,
        payload: &[u8],
        headers: &serde_json::Value,
    ) -> bool {
        match action.action_type() {
            ActionType::Javascript => {
                self.dispatch_javascript(delivery, action, attempt_number, payload, headers).await
            }
            ActionType::Webhook => {
                self.dispatch_webhook(delivery, action, attempt_number, payload, headers).await
            }
        }
    }

    async fn dispatch_webhook(
        &self,
        delivery: &Delivery,
        action: &Action,
        attempt_number: i32,
        payload: &[u8],
        headers: &serde_json::Value,
    ) -> bool {
        let Some(attempt_id) = self.create_attempt(delivery.id, action.id, attempt_number).await else {
            return false;
        };

        let Some(target_url) = action.target_url.as_deref() else {
            // Invariant violation; terminal, nothing to retry against.
            self.write_attempt(
                attempt_id,
                AttemptUpdateDBRequest {
                    status: AttemptStatus::Failed,
                    error_message: Some("webhook action has no target_url".to_string()),
                    ..Default::default()
                },
            )
            .await;
            return false;
        };

        let outcome = send_webhook_request(
            &self.http_client,
            target_url,
            delivery.id,
            payload,
            headers,
            action.signing_secret.as_deref(),
        )
        .await;

        match outcome {
            SendOutcome::Success { status, body } => {
                self.write_attempt(
                    attempt_id,
                    AttemptUpdateDBRequest {
                        status: AttemptStatus::Success,
                        response_status: Some(status),
                        response_body: Some(body),
                        ..Default::default()
                    },
                )
                .await;
                true
            }
            SendOutcome::RequestInvalid { error } => {
                // The request could not even be built; retrying cannot help.
                self.write_attempt(
                    attempt_id,
                    AttemptUpdateDBRequest {
                        status: AttemptStatus::Failed,
                        error_message: Some(error),
                        ..Default::default()
                    },
                )
                .await;
                false
            }
            SendOutcome::Failure { status, body, error } => {
                self.write_attempt(
                    attempt_id,
                    AttemptUpdateDBRequest {
                        status: AttemptStatus::Failed,
                        response_status: status,
                        response_body: body,
                        error_message: Some(error),
                        next_retry_at: self.next_retry_at(attempt_number),
                    },
                )
                .await;
                false
            }
        }
    }

    async fn dispatch_javascript(
        &self,
        delivery: &Delivery,
        action: &Action,
        attempt_number: i32,
        payload: &[u8],
        headers: &serde_json::Value,
    ) -> bool {
        let Some(attempt_id) = self.create_attempt(delivery.id, action.id, attempt_number).await else {
            return false;
        };

        let Some(script_body) = action.script_body.as_deref().filter(|s| !s.is_empty()) else {
            self.write_attempt(
                attempt_id,
                AttemptUpdateDBRequest {
                    status: AttemptStatus::Failed,
                    error_message: Some("javascript action has no script_body".to_string()),
                    ..Default::default()
                },
            )
            .await;
            return false;
        };

        let payload_value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                self.write_attempt(
                    attempt_id,
                    AttemptUpdateDBRequest {
                        status: AttemptStatus::Failed,
                        error_message: Some(format!("failed to parse payload: {e}")),
                        ..Default::default()
                    },
                )
                .await;
                return false;
            }
        };
        let headers_map = headers_to_map(headers);

        let script_body = script_body.to_string();
        let result = tokio::task::spawn_blocking(move || {
            script::run_action(&script_body, &payload_value, &headers_map)
        })
        .await
        .unwrap_or_else(|e| Err(ScriptError::Exec(format!("action task failed: {e}"))));

        match result {
            Ok(response_body) => {
                self.write_attempt(
                    attempt_id,
                    AttemptUpdateDBRequest {
                        status: AttemptStatus::Success,
                        response_body: Some(response_body),
                        ..Default::default()
                    },
                )
                .await;
                true
            }
            Err(e) => {
                self.write_attempt(
                    attempt_id,
                    AttemptUpdateDBRequest {
                        status: AttemptStatus::Failed,
                        error_message: Some(e.to_string()),
                        next_retry_at: self.next_retry_at(attempt_number),
                        ..Default::default()
                    },
                )
                .await;
                false
            }
        }
    }

    async fn create_attempt(&self, delivery_id: Uuid, action_id: Uuid, attempt_number: i32) -> Option<Uuid> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Failed to acquire connection for attempt");
                return None;
            }
        };

        match Deliveries::new(&mut conn).create_attempt(delivery_id, action_id, attempt_number).await {
            Ok(attempt) => Some(attempt.id),
            Err(e) => {
                tracing::error!(error = %e, delivery_id = %delivery_id, action_id = %action_id, "Failed to create attempt");
                None
            }
        }
    }

    async fn write_attempt(&self, attempt_id: Uuid, request: AttemptUpdateDBRequest) {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "Failed to acquire connection for attempt writeback");
                return;
            }
        };

        if let Err(e) = Deliveries::new(&mut conn).update_attempt(attempt_id, &request).await {
            tracing::error!(error = %e, attempt_id = %attempt_id, "Failed to update attempt");
        }
    }

    /// Jittered exponential backoff: `base · 2^(n−1)` capped at five
    /// minutes, scaled by a uniform factor in [0.75, 1.25]. None once the
    /// attempt that just ran reached the retry budget.
    fn next_retry_at(&self, attempt_number: i32) -> Option<DateTime<Utc>> {
        let delay = self.retry_delay(attempt_number)?;
        Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
    }

    fn retry_delay(&self, attempt_number: i32) -> Option<Duration> {
        compute_retry_delay(self.retry_base_delay, self.max_retries, attempt_number)
    }

    /// Retry one due attempt: dispatch a fresh attempt row, clear the old
    /// row's retry marker, and settle delivery status.
    pub async fn retry_attempt(&self, prev: &crate::db::models::deliveries::DeliveryAttempt) {
        let (delivery, action) = {
            let mut conn = match self.pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Retry: failed to acquire connection");
                    return;
                }
            };

            let delivery = match Deliveries::new(&mut conn).get_by_id(prev.delivery_id).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => return,
                Err(e) => {
                    tracing::error!(error = %e, delivery_id = %prev.delivery_id, "Retry: failed to load delivery");
                    return;
                }
            };

            let action = match Actions::new(&mut conn).get_by_id(prev.action_id).await {
                Ok(Some(action)) => action,
                Ok(None) => return,
                Err(e) => {
                    tracing::error!(error = %e, action_id = %prev.action_id, "Retry: failed to load action");
                    return;
                }
            };

            (delivery, action)
        };

        let next_number = prev.attempt_number + 1;
        let payload = delivery.effective_payload().to_vec();
        let headers = delivery.effective_headers().clone();

        let success = self.dispatch_action(&delivery, &action, next_number, &payload, &headers).await;

        // Clear the retry marker so this row is never selected again; the
        // rest of its fields stay as history.
        self.write_attempt(
            prev.id,
            AttemptUpdateDBRequest {
                status: AttemptStatus::Failed,
                response_status: prev.response_status,
                response_body: prev.response_body.clone(),
                error_message: prev.error_message.clone(),
                next_retry_at: None,
            },
        )
        .await;

        if success {
            self.roll_up(delivery.id).await;
        } else if next_number >= self.max_retries {
            let mut conn = match self.pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Retry: failed to acquire connection for status update");
                    return;
                }
            };
            if let Err(e) = Deliveries::new(&mut conn).update_status(delivery.id, DeliveryStatus::Failed).await {
                tracing::error!(error = %e, delivery_id = %delivery.id, "Retry: failed to mark delivery failed");
            }
        }
    }

    /// Promote a delivery out of `processing` once the latest attempt of
    /// every active action is a success.
    pub async fn roll_up(&self, delivery_id: Uuid) {
        if let Err(e) = self.try_roll_up(delivery_id).await {
            tracing::error!(error = %e, delivery_id = %delivery_id, "Rollup failed");
        }
    }

    async fn try_roll_up(&self, delivery_id: Uuid) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await.map_err(Error::from)?;
        let mut deliveries = Deliveries::new(&mut conn);

        let Some(delivery) = deliveries.get_by_id(delivery_id).await? else {
            return Ok(());
        };
        if delivery.delivery_status() != DeliveryStatus::Processing {
            return Ok(());
        }

        let latest = deliveries.latest_attempts_per_action(delivery_id).await?;
        let by_action: HashMap<Uuid, AttemptStatus> =
            latest.into_iter().map(|a| (a.action_id, a.attempt_status())).collect();

        let actions = Actions::new(&mut conn).list_active(delivery.source_id).await?;
        let all_succeeded = actions
            .iter()
            .all(|a| by_action.get(&a.id) == Some(&AttemptStatus::Success));

        if all_succeeded {
            Deliveries::new(&mut conn).update_status(delivery_id, DeliveryStatus::Completed).await?;
        }

        Ok(())
    }
}

/// Jittered exponential backoff shared by every retry producer: the delay
/// after attempt `n` is `base · 2^(n−1)`, capped at five minutes, scaled by
/// a uniform factor in [0.75, 1.25]. None once `n` reaches `max_retries`.
fn compute_retry_delay(base: Duration, max_retries: i32, attempt_number: i32) -> Option<Duration> {
    if attempt_number >= max_retries {
        return None;
    }

    let exponent = attempt_number.saturating_sub(1).min(30) as u32;
    let delay = base
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(MAX_RETRY_DELAY);

    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Some(delay.mul_f64(jitter))
}

/// Headers are stored as a JSON map; values that are not strings get
/// stringified on the way out.
fn headers_to_map(headers: &serde_json::Value) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(object) = headers.as_object() {
        for (key, value) in object {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            map.insert(key.clone(), value);
        }
    }
    map
}

/// Result of one outbound HTTP send.
#[derive(Debug)]
pub(crate) enum SendOutcome {
    Success { status: i32, body: String },
    /// The request could not be built; no retry will help.
    RequestInvalid { error: String },
    Failure {
        status: Option<i32>,
        body: Option<String>,
        error: String,
    },
}

/// POST the payload to the target. Headers: `Content-Type` is always
/// `application/json`, `X-Delivery-ID` carries the delivery, the forwarded
/// header map is applied minus any `Content-Type` override, and a signature
/// header is added when the action has a secret. Success iff the status is
/// in [200, 300).
pub(crate) async fn send_webhook_request(
    client: &reqwest::Client,
    target_url: &str,
    delivery_id: Uuid,
    payload: &[u8],
    headers: &serde_json::Value,
    signing_secret: Option<&str>,
) -> SendOutcome {
    let mut builder = client
        .post(target_url)
        .header(CONTENT_TYPE, "application/json")
        .header(DELIVERY_ID_HEADER, delivery_id.to_string());

    for (key, value) in headers_to_map(headers) {
        if key == "Content-Type" {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::try_from(key.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) else {
            tracing::debug!(header = %key, "Skipping unforwardable header");
            continue;
        };
        builder = builder.header(name, value);
    }

    // Signing covers the exact bytes the subscriber receives.
    if let Some(secret) = signing_secret {
        builder = builder.header(signing::SIGNATURE_HEADER, signing::sign(payload, secret));
    }

    let request = match builder.body(payload.to_vec()).build() {
        Ok(request) => request,
        Err(e) => return SendOutcome::RequestInvalid { error: e.to_string() },
    };

    match client.execute(request).await {
        Err(e) => SendOutcome::Failure {
            status: None,
            body: None,
            error: e.to_string(),
        },
        Ok(response) => {
            let status = response.status().as_u16() as i32;
            let body = read_body_capped(response).await;
            if (200..300).contains(&status) {
                SendOutcome::Success { status, body }
            } else {
                SendOutcome::Failure {
                    status: Some(status),
                    body: Some(body),
                    error: format!("HTTP {status}"),
                }
            }
        }
    }
}

async fn read_body_capped(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let cap = bytes.len().min(MAX_RESPONSE_BODY);
            String::from_utf8_lossy(&bytes[..cap]).into_owned()
        }
        Err(_) => String::new(),
    }
}
