//! Applies Razorpay subscription webhooks to local billing state.
//!
//! Reconciliation is split in two: [`parse_billing_event`] turns a verified JSON
//! payload into a [`BillingEvent`] without touching the database, and
//! [`reconcile`] applies it. The idempotency marker and the state change commit
//! together; receipts, dunning emails and notifications go out after commit and
//! never fail the webhook.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};

use crate::billing::{GRACE_PERIOD, SubscriptionStatus};
use crate::db::handlers::{Billing, Repository, Users};
use crate::db::models::billing::{InvoiceCreateDBRequest, SubscriptionCreateDBRequest};
use crate::db::models::notifications::NotificationCreateDBRequest;
use crate::email::{DunningDetails, EmailService, ReceiptDetails};
use crate::entitlements::PlanName;
use crate::errors::{Error, Result};
use crate::notifications::{NotificationType, notify};
use crate::types::{UserId, abbrev_uuid};

pub const RAZORPAY_GATEWAY: &str = "razorpay";

const DEFAULT_CURRENCY: &str = "INR";

/// The gateway's own subscription identity plus what its notes say about us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRef {
    pub gateway_subscription_id: String,
    pub user_id: Option<UserId>,
    pub plan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidInvoice {
    pub gateway_invoice_id: String,
    pub gateway_subscription_id: Option<String>,
    pub user_id: Option<UserId>,
    /// Minor units (paise)
    pub amount_cents: i64,
    pub currency: String,
    pub pdf_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPayment {
    pub payment_id: String,
    pub gateway_subscription_id: Option<String>,
    pub user_id: Option<UserId>,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    Activated {
        subscription: SubscriptionRef,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    },
    Halted {
        subscription: SubscriptionRef,
        grace_until: DateTime<Utc>,
    },
    Canceled {
        subscription: SubscriptionRef,
        canceled_at: DateTime<Utc>,
        grace_until: DateTime<Utc>,
    },
    InvoicePaid(PaidInvoice),
    PaymentFailed(FailedPayment),
    Ignored {
        event: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    Duplicate,
}

/// Side effects to run once the transaction has committed
#[derive(Debug)]
enum FollowUp {
    Receipt { user_id: UserId, receipt: ReceiptDetails },
    Dunning { user_id: UserId, dunning: DunningDetails },
}

/// Idempotency key for a webhook delivery. Payment and subscription entity ids
/// take precedence over the envelope id.
pub fn event_id(payload: &Value) -> String {
    let candidates = [
        payload.pointer("/payload/payment/entity/id"),
        payload.pointer("/payload/subscription/entity/id"),
        payload.get("id"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn unix_seconds(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn str_field(entity: &Value, key: &str) -> Option<String> {
    entity.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

fn notes_user_id(entity: &Value) -> Option<UserId> {
    entity
        .pointer("/notes/user_id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

fn currency(entity: &Value) -> String {
    entity
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_CURRENCY)
        .to_uppercase()
}

fn subscription_entity(payload: &Value, event: &str) -> Result<SubscriptionRef> {
    let entity = payload
        .pointer("/payload/subscription/entity")
        .ok_or_else(|| Error::BadRequest {
            message: format!("{event} payload has no subscription entity"),
        })?;
    let gateway_subscription_id = str_field(entity, "id").ok_or_else(|| Error::BadRequest {
        message: format!("{event} subscription entity has no id"),
    })?;
    Ok(SubscriptionRef {
        gateway_subscription_id,
        user_id: notes_user_id(entity),
        plan: entity.pointer("/notes/plan").and_then(Value::as_str).map(str::to_string),
    })
}

fn payment_entity<'a>(payload: &'a Value, event: &str) -> Result<&'a Value> {
    payload.pointer("/payload/payment/entity").ok_or_else(|| Error::BadRequest {
        message: format!("{event} payload has no payment entity"),
    })
}

/// Interpret a verified webhook body. Pure: the result depends only on the
/// payload and `now`.
pub fn parse_billing_event(payload: &Value, now: DateTime<Utc>) -> Result<BillingEvent> {
    let event = payload.get("event").and_then(Value::as_str).unwrap_or_default();

    let parsed = match event {
        "subscription.activated" | "subscription.renewed" => {
            let subscription = subscription_entity(payload, event)?;
            let entity = payload.pointer("/payload/subscription/entity");
            BillingEvent::Activated {
                subscription,
                period_start: unix_seconds(entity.and_then(|e| e.get("current_start"))),
                period_end: unix_seconds(entity.and_then(|e| e.get("current_end"))),
            }
        }
        "subscription.halted" | "subscription.paused" => {
            let subscription = subscription_entity(payload, event)?;
            let end_at = unix_seconds(payload.pointer("/payload/subscription/entity/end_at"));
            BillingEvent::Halted {
                subscription,
                grace_until: end_at.unwrap_or(now) + GRACE_PERIOD,
            }
        }
        "subscription.completed" | "subscription.cancelled" => BillingEvent::Canceled {
            subscription: subscription_entity(payload, event)?,
            canceled_at: now,
            grace_until: now + GRACE_PERIOD,
        },
        "invoice.paid" => {
            let entity = payment_entity(payload, event)?;
            let gateway_invoice_id = str_field(entity, "id").ok_or_else(|| Error::BadRequest {
                message: "invoice.paid entity has no id".to_string(),
            })?;
            BillingEvent::InvoicePaid(PaidInvoice {
                gateway_invoice_id,
                gateway_subscription_id: payload
                    .pointer("/payload/subscription/entity/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| str_field(entity, "subscription_id")),
                user_id: notes_user_id(entity),
                amount_cents: entity.get("amount").and_then(Value::as_i64).unwrap_or(0),
                currency: currency(entity),
                pdf_url: str_field(entity, "short_url").or_else(|| str_field(entity, "invoice_url")),
            })
        }
        "payment.failed" => {
            let entity = payment_entity(payload, event)?;
            BillingEvent::PaymentFailed(FailedPayment {
                payment_id: str_field(entity, "id").unwrap_or_else(|| "unknown".to_string()),
                gateway_subscription_id: str_field(entity, "subscription_id"),
                user_id: notes_user_id(entity),
                amount_minor: entity.get("amount").and_then(Value::as_i64).unwrap_or(0),
                currency: currency(entity),
            })
        }
        other => BillingEvent::Ignored { event: other.to_string() },
    };
    Ok(parsed)
}

/// Record the event id and apply the event in one transaction, then run
/// best-effort follow-ups.
#[instrument(skip_all, fields(event_id = %event_id), err)]
pub async fn reconcile(
    pool: &PgPool,
    email: Option<&EmailService>,
    event_id: &str,
    event: BillingEvent,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome> {
    let mut tx = pool.begin().await?;

    if !Billing::new(&mut tx).record_webhook_event(RAZORPAY_GATEWAY, event_id).await? {
        info!("Duplicate billing webhook ignored");
        return Ok(ReconcileOutcome::Duplicate);
    }

    let follow_up = apply(&mut tx, event, now).await?;
    tx.commit().await?;

    if let Some(follow_up) = follow_up {
        run_follow_up(pool, email, follow_up).await;
    }

    Ok(ReconcileOutcome::Applied)
}

async fn apply(conn: &mut PgConnection, event: BillingEvent, now: DateTime<Utc>) -> Result<Option<FollowUp>> {
    match event {
        BillingEvent::Activated {
            subscription,
            period_start,
            period_end,
        } => {
            let user_id = upsert_subscription(conn, &subscription, SubscriptionStatus::Active, period_start, period_end, None, None).await?;
            if let (Some(user_id), Some(plan)) = (user_id, subscription.plan.as_deref()) {
                Users::new(conn).set_plan(user_id, PlanName::resolve(Some(plan))).await?;
            }
            Ok(None)
        }
        BillingEvent::Halted { subscription, grace_until } => {
            upsert_subscription(conn, &subscription, SubscriptionStatus::PastDue, None, None, Some(grace_until), None).await?;
            Ok(None)
        }
        BillingEvent::Canceled {
            subscription,
            canceled_at,
            grace_until,
        } => {
            upsert_subscription(
                conn,
                &subscription,
                SubscriptionStatus::Canceled,
                None,
                None,
                Some(grace_until),
                Some(canceled_at),
            )
            .await?;
            Ok(None)
        }
        BillingEvent::InvoicePaid(invoice) => {
            let (user_id, plan) = resolve_user(conn, invoice.gateway_subscription_id.as_deref(), invoice.user_id).await?;
            let Some(user_id) = user_id else {
                warn!(invoice = %invoice.gateway_invoice_id, "Paid invoice has no resolvable user, skipping");
                return Ok(None);
            };

            let created = Billing::new(conn)
                .create_invoice(&InvoiceCreateDBRequest {
                    user_id,
                    gateway: RAZORPAY_GATEWAY.to_string(),
                    gateway_invoice_id: invoice.gateway_invoice_id.clone(),
                    amount_cents: invoice.amount_cents,
                    currency: invoice.currency.clone(),
                    status: "paid".to_string(),
                    pdf_url: invoice.pdf_url.clone(),
                    paid_at: Some(now),
                })
                .await?;

            Ok(created.map(|row| FollowUp::Receipt {
                user_id,
                receipt: ReceiptDetails {
                    invoice_id: row.gateway_invoice_id,
                    amount: row.amount_cents as f64 / 100.0,
                    currency: row.currency,
                    plan,
                },
            }))
        }
        BillingEvent::PaymentFailed(payment) => {
            let sub = match payment.gateway_subscription_id.as_deref() {
                Some(id) => Billing::new(conn).get_subscription_by_gateway_id(id).await?,
                None => None,
            };
            let Some(user_id) = sub.as_ref().map(|s| s.user_id).or(payment.user_id) else {
                warn!(payment = %payment.payment_id, "Failed payment has no resolvable user, skipping");
                return Ok(None);
            };
            let due = sub.and_then(|s| s.current_period_end).unwrap_or(now);
            Ok(Some(FollowUp::Dunning {
                user_id,
                dunning: DunningDetails {
                    payment_id: payment.payment_id,
                    amount: payment.amount_minor as f64 / 100.0,
                    currency: payment.currency,
                    due_date: due.format("%Y-%m-%d").to_string(),
                },
            }))
        }
        BillingEvent::Ignored { event } => {
            tracing::debug!(event = %event, "Ignoring billing webhook event");
            Ok(None)
        }
    }
}

/// Moves a known subscription, or creates it when the notes name a user.
/// Returns the owning user, if any.
async fn upsert_subscription(
    conn: &mut PgConnection,
    subscription: &SubscriptionRef,
    status: SubscriptionStatus,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    grace_until: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
) -> Result<Option<UserId>> {
    let mut billing = Billing::new(conn);

    if let Some(existing) = billing
        .get_subscription_by_gateway_id(&subscription.gateway_subscription_id)
        .await?
    {
        let updated = billing
            .transition_subscription(existing.id, status, period_start, period_end, grace_until, canceled_at)
            .await?;
        info!(user_id = %abbrev_uuid(&updated.user_id), status = %status, "Subscription transitioned");
        return Ok(Some(updated.user_id));
    }

    let Some(user_id) = subscription.user_id else {
        warn!(
            subscription = %subscription.gateway_subscription_id,
            "Webhook for unknown subscription without notes.user_id, skipping"
        );
        return Ok(None);
    };

    billing
        .create_subscription(&SubscriptionCreateDBRequest {
            user_id,
            gateway: RAZORPAY_GATEWAY.to_string(),
            gateway_subscription_id: subscription.gateway_subscription_id.clone(),
            plan: PlanName::resolve(subscription.plan.as_deref()).to_string(),
            status,
            current_period_start: period_start,
            current_period_end: period_end,
            grace_until,
            canceled_at,
        })
        .await?;
    info!(user_id = %abbrev_uuid(&user_id), status = %status, "Subscription created from webhook");
    Ok(Some(user_id))
}

/// The user and plan behind a gateway subscription, falling back to the notes user
async fn resolve_user(
    conn: &mut PgConnection,
    gateway_subscription_id: Option<&str>,
    notes_user: Option<UserId>,
) -> Result<(Option<UserId>, Option<String>)> {
    if let Some(id) = gateway_subscription_id {
        if let Some(sub) = Billing::new(conn).get_subscription_by_gateway_id(id).await? {
            return Ok((Some(sub.user_id), Some(sub.plan)));
        }
    }
    Ok((notes_user, None))
}

async fn run_follow_up(pool: &PgPool, email: Option<&EmailService>, follow_up: FollowUp) {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "Could not acquire connection for billing follow-up");
            return;
        }
    };

    let user_id = match &follow_up {
        FollowUp::Receipt { user_id, .. } | FollowUp::Dunning { user_id, .. } => *user_id,
    };
    let user = match Users::new(&mut conn).get_by_id(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return,
        Err(e) => {
            warn!(user_id = %abbrev_uuid(&user_id), error = %e, "Could not load user for billing follow-up");
            return;
        }
    };

    match follow_up {
        FollowUp::Receipt { receipt, .. } => {
            if let Some(email) = email {
                if let Err(e) = email.send_receipt_email(&user.email, user.display_name.as_deref(), &receipt).await {
                    warn!(user_id = %abbrev_uuid(&user_id), error = %e, "Failed to send receipt email");
                }
            }
        }
        FollowUp::Dunning { dunning, .. } => {
            if let Some(email) = email {
                if let Err(e) = email.send_dunning_email(&user.email, user.display_name.as_deref(), &dunning).await {
                    warn!(user_id = %abbrev_uuid(&user_id), error = %e, "Failed to send dunning email");
                }
            }
            let message = format!(
                "We couldn't process your payment of {:.2} {}. Please update your payment method.",
                dunning.amount, dunning.currency
            );
            notify(
                &mut conn,
                NotificationCreateDBRequest::new(user_id, NotificationType::Error, "Payment failed", message)
                    .with_link(crate::billing::BILLING_SETTINGS_PATH),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn event_id_prefers_payment_then_subscription_then_envelope() {
        let both = json!({
            "id": "evt_1",
            "payload": {
                "payment": {"entity": {"id": "pay_1"}},
                "subscription": {"entity": {"id": "sub_1"}}
            }
        });
        assert_eq!(event_id(&both), "pay_1");

        let sub_only = json!({"id": "evt_1", "payload": {"subscription": {"entity": {"id": "sub_1"}}}});
        assert_eq!(event_id(&sub_only), "sub_1");

        assert_eq!(event_id(&json!({"id": "evt_1"})), "evt_1");
        assert_eq!(event_id(&json!({"event": "x"})), "unknown");
        assert_eq!(event_id(&json!({"id": ""})), "unknown");
    }

    #[test]
    fn activation_reads_period_and_notes() {
        let user = Uuid::new_v4();
        let payload = json!({
            "event": "subscription.activated",
            "payload": {"subscription": {"entity": {
                "id": "sub_9",
                "current_start": 1_700_000_000,
                "current_end": 1_702_592_000,
                "notes": {"user_id": user.to_string(), "plan": "pro"}
            }}}
        });
        let event = parse_billing_event(&payload, Utc::now()).unwrap();
        assert_eq!(
            event,
            BillingEvent::Activated {
                subscription: SubscriptionRef {
                    gateway_subscription_id: "sub_9".to_string(),
                    user_id: Some(user),
                    plan: Some("pro".to_string()),
                },
                period_start: Some(at(1_700_000_000)),
                period_end: Some(at(1_702_592_000)),
            }
        );
    }

    #[test]
    fn halted_grace_runs_from_end_at_or_now() {
        let now = at(1_800_000_000);
        let with_end = json!({
            "event": "subscription.halted",
            "payload": {"subscription": {"entity": {"id": "sub_1", "end_at": 1_750_000_000}}}
        });
        match parse_billing_event(&with_end, now).unwrap() {
            BillingEvent::Halted { grace_until, .. } => assert_eq!(grace_until, at(1_750_000_000) + Duration::days(7)),
            other => panic!("unexpected {other:?}"),
        }

        let without_end = json!({
            "event": "subscription.paused",
            "payload": {"subscription": {"entity": {"id": "sub_1"}}}
        });
        match parse_billing_event(&without_end, now).unwrap() {
            BillingEvent::Halted { grace_until, .. } => assert_eq!(grace_until, now + GRACE_PERIOD),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancellation_starts_grace_now() {
        let now = Utc::now();
        let payload = json!({
            "event": "subscription.cancelled",
            "payload": {"subscription": {"entity": {"id": "sub_1"}}}
        });
        assert_eq!(
            parse_billing_event(&payload, now).unwrap(),
            BillingEvent::Canceled {
                subscription: SubscriptionRef {
                    gateway_subscription_id: "sub_1".to_string(),
                    user_id: None,
                    plan: None,
                },
                canceled_at: now,
                grace_until: now + Duration::days(7),
            }
        );
    }

    #[test]
    fn invoice_paid_defaults_and_urls() {
        let payload = json!({
            "event": "invoice.paid",
            "payload": {"payment": {"entity": {
                "id": "inv_1",
                "amount": 199900,
                "currency": "usd",
                "subscription_id": "sub_2",
                "invoice_url": "https://rzp.io/long"
            }}}
        });
        let BillingEvent::InvoicePaid(invoice) = parse_billing_event(&payload, Utc::now()).unwrap() else {
            panic!("expected invoice");
        };
        assert_eq!(invoice.amount_cents, 199900);
        assert_eq!(invoice.currency, "USD");
        assert_eq!(invoice.gateway_subscription_id.as_deref(), Some("sub_2"));
        assert_eq!(invoice.pdf_url.as_deref(), Some("https://rzp.io/long"));

        let short = json!({
            "event": "invoice.paid",
            "payload": {"payment": {"entity": {"id": "inv_2", "short_url": "https://rzp.io/s", "invoice_url": "https://rzp.io/long"}}}
        });
        let BillingEvent::InvoicePaid(invoice) = parse_billing_event(&short, Utc::now()).unwrap() else {
            panic!("expected invoice");
        };
        assert_eq!(invoice.currency, "INR");
        assert_eq!(invoice.amount_cents, 0);
        assert_eq!(invoice.pdf_url.as_deref(), Some("https://rzp.io/s"));
    }

    #[test]
    fn subscription_event_without_entity_is_bad_request() {
        let payload = json!({"event": "subscription.renewed", "payload": {}});
        assert!(matches!(parse_billing_event(&payload, Utc::now()), Err(Error::BadRequest { .. })));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let payload = json!({"event": "order.paid"});
        assert_eq!(
            parse_billing_event(&payload, Utc::now()).unwrap(),
            BillingEvent::Ignored {
                event: "order.paid".to_string()
            }
        );
    }

    fn pro_subscription(user_id: UserId) -> SubscriptionRef {
        SubscriptionRef {
            gateway_subscription_id: "sub_live_1".to_string(),
            user_id: Some(user_id),
            plan: Some("PRO".to_string()),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reconcile_applies_each_event_once(pool: PgPool) {
        let user = crate::test_utils::create_test_user(&pool, PlanName::Free).await;
        let now = Utc::now();
        let activated = BillingEvent::Activated {
            subscription: pro_subscription(user.id),
            period_start: Some(now),
            period_end: Some(now + Duration::days(30)),
        };

        let first = reconcile(&pool, None, "sub_live_1:activated", activated.clone(), now).await.unwrap();
        let second = reconcile(&pool, None, "sub_live_1:activated", activated, now).await.unwrap();
        assert_eq!(first, ReconcileOutcome::Applied);
        assert_eq!(second, ReconcileOutcome::Duplicate);

        let mut conn = pool.acquire().await.unwrap();
        let subscriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
            .bind(user.id)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(subscriptions, 1);
        let user = Users::new(&mut conn).get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.plan_name(), PlanName::Pro);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancel_then_invoice_for_known_subscription(pool: PgPool) {
        let user = crate::test_utils::create_test_user(&pool, PlanName::Free).await;
        let now = Utc::now();
        let activated = BillingEvent::Activated {
            subscription: pro_subscription(user.id),
            period_start: Some(now),
            period_end: Some(now + Duration::days(30)),
        };
        reconcile(&pool, None, "evt_a", activated, now).await.unwrap();

        // Later events only name the gateway subscription
        let invoice = BillingEvent::InvoicePaid(PaidInvoice {
            gateway_invoice_id: "inv_1".to_string(),
            gateway_subscription_id: Some("sub_live_1".to_string()),
            user_id: None,
            amount_cents: 99_900,
            currency: "INR".to_string(),
            pdf_url: None,
        });
        reconcile(&pool, None, "evt_b", invoice.clone(), now).await.unwrap();
        // Same invoice under a new envelope id still yields one row
        reconcile(&pool, None, "evt_b_retry", invoice, now).await.unwrap();

        let canceled = BillingEvent::Canceled {
            subscription: SubscriptionRef {
                gateway_subscription_id: "sub_live_1".to_string(),
                user_id: None,
                plan: None,
            },
            canceled_at: now,
            grace_until: now + GRACE_PERIOD,
        };
        reconcile(&pool, None, "evt_c", canceled, now).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let mut billing = Billing::new(&mut conn);
        assert_eq!(billing.count_invoices(user.id).await.unwrap(), 1);
        assert!(billing.active_subscription(user.id).await.unwrap().is_none());
        let sub = billing.get_subscription_by_gateway_id("sub_live_1").await.unwrap().unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::Canceled);
        assert!(sub.grace_until.is_some_and(|g| g > now));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_subscription_without_user_is_skipped(pool: PgPool) {
        let now = Utc::now();
        let halted = BillingEvent::Halted {
            subscription: SubscriptionRef {
                gateway_subscription_id: "sub_unknown".to_string(),
                user_id: None,
                plan: None,
            },
            grace_until: now + GRACE_PERIOD,
        };
        assert_eq!(reconcile(&pool, None, "evt_h", halted, now).await.unwrap(), ReconcileOutcome::Applied);

        let subscriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions").fetch_one(&pool).await.unwrap();
        assert_eq!(subscriptions, 0);
    }
}
