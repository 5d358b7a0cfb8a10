//! Asynchronous webhook reconciliation.
//!
//! Two event families arrive from outside the synchronous dispatch path: machine-vendor dispense confirmations
//! (keyed by payment id plus vendor part numbers) and payment-provider charge events (keyed by charge id).
//! Webhook handling is best-effort idempotent: every body is recorded for audit first, unknown or malformed
//! payloads are accepted without error (the sender is never rejected), and a status that has not changed is a
//! no-op.

use std::fmt::Display;

use log::*;
use serde_json::Value;

use crate::{
    db_types::{NewCardToken, PaymentStatus},
    traits::{DispenseLedger, PaymentStore, StorageError},
};

/// What the reconciler did with an inbound webhook body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// The body was recorded but carried nothing actionable (malformed, missing keys, or an unchanged status).
    Stored,
    /// The body was well-formed but referenced an unknown payment or charge.
    Ignored,
    /// State was updated as a result of this event.
    Processed,
}

impl Display for WebhookDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookDisposition::Stored => write!(f, "stored"),
            WebhookDisposition::Ignored => write!(f, "ignored"),
            WebhookDisposition::Processed => write!(f, "processed"),
        }
    }
}

/// `WebhookApi` consumes vendor and payment-provider webhook deliveries and reconciles dispense/payment state.
pub struct WebhookApi<B> {
    db: B,
}

impl<B> std::fmt::Debug for WebhookApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi")
    }
}

impl<B> WebhookApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> WebhookApi<B>
where B: PaymentStore + DispenseLedger
{
    /// Handles a machine-vendor dispense confirmation. When the payload names a known payment and at least one
    /// vendor part number, the dispensed parts are recorded against the payment and its `sent` dispense logs are
    /// promoted to `confirmed`.
    pub async fn handle_vendor_webhook(&self, body: &str) -> Result<WebhookDisposition, StorageError> {
        self.db.record_webhook_event("vendor", body).await?;
        let payload: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                debug!("🪝️ Unparseable vendor webhook body stored without action. {e}");
                return Ok(WebhookDisposition::Stored);
            },
        };
        let payment_id = string_field(&payload, &["payment_id", "paymentId"]);
        let parts = coerce_string_array(field(&payload, &["vendor_part_numbers", "vendorPartNumbers"]));
        let (payment_id, parts) = match (payment_id, parts.is_empty()) {
            (Some(id), false) => (id, parts),
            _ => {
                debug!("🪝️ Vendor webhook without payment id or part numbers stored without action");
                return Ok(WebhookDisposition::Stored);
            },
        };
        let payment = match self.db.fetch_payment(&payment_id).await? {
            Some(p) => p,
            None => {
                info!("🪝️ Vendor dispense confirmation ignored (unknown payment {payment_id})");
                return Ok(WebhookDisposition::Ignored);
            },
        };
        let machine_uid = string_field(&payload, &["machine_id", "machineId"]).unwrap_or_else(|| payment.machine_uid.clone());
        self.db.record_dispensed_parts(&payment.id, &machine_uid, &parts).await?;
        let confirmed = self.db.confirm_sent_logs(&payment.id).await?;
        info!(
            "🪝️ Vendor confirmed {} part(s) for payment {}; {confirmed} dispense log(s) promoted to confirmed",
            parts.len(),
            payment.id
        );
        Ok(WebhookDisposition::Processed)
    }

    /// Handles a payment-provider charge event: updates the payment status when it genuinely changed, and
    /// opportunistically persists a reusable card token when the charge was made with a save-card flag.
    pub async fn handle_charge_webhook(&self, body: &str) -> Result<WebhookDisposition, StorageError> {
        self.db.record_webhook_event("charge", body).await?;
        let payload: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                debug!("🪝️ Unparseable charge webhook body stored without action. {e}");
                return Ok(WebhookDisposition::Stored);
            },
        };
        let charge_id = match string_field(&payload, &["id"])
            .or_else(|| payload.pointer("/data/object/id").and_then(Value::as_str).map(String::from))
        {
            Some(id) => id,
            None => {
                debug!("🪝️ Charge webhook without a charge id stored without action");
                return Ok(WebhookDisposition::Stored);
            },
        };
        let payment = match self.db.fetch_payment_by_charge_id(&charge_id).await? {
            Some(p) => p,
            None => {
                info!("🪝️ Charge event ignored (unknown charge {charge_id})");
                return Ok(WebhookDisposition::Ignored);
            },
        };
        let status = match derive_status(&payload) {
            Some(s) => s,
            None => {
                debug!("🪝️ Charge webhook for {charge_id} carried no recognisable status; stored without action");
                return Ok(WebhookDisposition::Stored);
            },
        };
        if status == payment.status {
            debug!("🪝️ Charge {charge_id} status unchanged ({status}); nothing to do");
            return Ok(WebhookDisposition::Stored);
        }
        self.db.update_payment_status(&payment.id, status).await?;
        info!("🪝️ Payment {} status updated: {} → {status}", payment.id, payment.status);

        if matches!(status, PaymentStatus::Captured | PaymentStatus::Authorized) {
            if let Some(token) = extract_card_token(&payment.user_id, &payload) {
                // Token capture is opportunistic; a failure here must not fail the webhook.
                match self.db.save_card_token(token).await {
                    Ok(()) => info!("🪝️ Reusable card token saved for user {}", payment.user_id),
                    Err(e) => error!("🪝️ Failed to save card token for user {}. {e}", payment.user_id),
                }
            }
        }
        Ok(WebhookDisposition::Processed)
    }
}

fn field<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| payload.get(n))
}

fn string_field(payload: &Value, names: &[&str]) -> Option<String> {
    field(payload, names).and_then(Value::as_str).map(String::from)
}

/// Part numbers arrive either as a JSON array or as a comma-separated string.
fn coerce_string_array(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
        _ => Vec::new(),
    }
}

/// The status is carried directly on the payload (or the nested charge object), or can be derived from the event
/// type for the common event families.
fn derive_status(payload: &Value) -> Option<PaymentStatus> {
    let direct = payload
        .get("status")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/data/object/status").and_then(Value::as_str));
    if let Some(s) = direct {
        return s.parse().ok();
    }
    let event_type = payload.get("type").and_then(Value::as_str)?;
    if event_type.contains("refunded") {
        Some(PaymentStatus::Refunded)
    } else if event_type.contains("captured") {
        Some(PaymentStatus::Captured)
    } else if event_type.contains("authorized") {
        Some(PaymentStatus::Authorized)
    } else if event_type.contains("failed") {
        Some(PaymentStatus::Failed)
    } else {
        None
    }
}

/// A reusable token rides along on a captured/authorized charge when the payer opted in to saving their card:
/// the source id is a `tok_`-prefixed token and the provider customer id is present.
fn extract_card_token(user_id: &str, payload: &Value) -> Option<NewCardToken> {
    let charge = payload.pointer("/data/object").unwrap_or(payload);
    if !charge.get("save_card").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let source = charge.get("source")?;
    let token_id = source.get("id").and_then(Value::as_str)?;
    if !token_id.starts_with("tok_") {
        return None;
    }
    let customer_id = charge.pointer("/customer/id").and_then(Value::as_str)?;
    let last_four = source
        .get("last_four")
        .and_then(Value::as_str)
        .or_else(|| source.pointer("/object/last_four").and_then(Value::as_str))
        .map(String::from);
    let brand = source
        .get("brand")
        .and_then(Value::as_str)
        .or_else(|| source.pointer("/object/brand").and_then(Value::as_str))
        .map(String::from);
    Some(NewCardToken {
        user_id: user_id.to_string(),
        provider_customer_id: customer_id.to_string(),
        token_id: token_id.to_string(),
        last_four,
        brand,
    })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::{coerce_string_array, derive_status, extract_card_token};
    use crate::db_types::PaymentStatus;

    #[test]
    fn part_numbers_from_array_or_csv() {
        let arr = json!(["P-1", "P-2"]);
        assert_eq!(coerce_string_array(Some(&arr)), vec!["P-1", "P-2"]);
        let csv = json!("P-1, P-2 ,,P-3");
        assert_eq!(coerce_string_array(Some(&csv)), vec!["P-1", "P-2", "P-3"]);
        assert!(coerce_string_array(None).is_empty());
        assert!(coerce_string_array(Some(&json!(42))).is_empty());
    }

    #[test]
    fn status_from_field_or_event_type() {
        assert_eq!(derive_status(&json!({"status": "captured"})), Some(PaymentStatus::Captured));
        assert_eq!(
            derive_status(&json!({"data": {"object": {"status": "REFUNDED"}}})),
            Some(PaymentStatus::Refunded)
        );
        assert_eq!(derive_status(&json!({"type": "charge.failed"})), Some(PaymentStatus::Failed));
        assert_eq!(derive_status(&json!({"type": "charge.updated"})), None);
        assert_eq!(derive_status(&json!({"status": "SOMETHING_NEW"})), None);
    }

    #[test]
    fn card_token_requires_opt_in_and_token_source() {
        let full = json!({
            "data": {"object": {
                "save_card": true,
                "source": {"id": "tok_abc123", "last_four": "4242", "brand": "VISA"},
                "customer": {"id": "cus_9"}
            }}
        });
        let token = extract_card_token("user-1", &full).unwrap();
        assert_eq!(token.token_id, "tok_abc123");
        assert_eq!(token.provider_customer_id, "cus_9");
        assert_eq!(token.last_four.as_deref(), Some("4242"));

        let no_opt_in = json!({"save_card": false, "source": {"id": "tok_x"}, "customer": {"id": "c"}});
        assert!(extract_card_token("user-1", &no_opt_in).is_none());
        let card_source = json!({"save_card": true, "source": {"id": "card_x"}, "customer": {"id": "c"}});
        assert!(extract_card_token("user-1", &card_source).is_none());
    }
}
