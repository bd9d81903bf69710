// Demonstration activities for the order workflow
// Decision: Activities only fabricate identifiers; no real inventory, payment or mail backend
// Decision: Random transient failures are injected here so retries are visible in history

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestra_durable::{Activity, ActivityContext, ActivityError, ActivityRegistry, RegistryError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Injects transient failures with a fixed probability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedFailures {
    rate: f64,
}

impl SimulatedFailures {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }

    pub fn none() -> Self {
        Self::new(0.0)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn maybe_fail(&self, ctx: &ActivityContext) -> Result<(), ActivityError> {
        if self.rate > 0.0 && rand::thread_rng().gen_bool(self.rate) {
            tracing::warn!(
                step_id = %ctx.step_id,
                attempt = ctx.attempt,
                "injecting simulated failure"
            );
            return Err(ActivityError::transient("simulated downstream failure")
                .with_type("simulated"));
        }
        Ok(())
    }
}

/// One line of an order
///
/// Only the quantity is required; `qty` is accepted as its short form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(alias = "qty")]
    pub quantity: u32,
    #[serde(default)]
    pub unit_price_cents: u64,
}

impl OrderItem {
    /// Name used in messages: the SKU, or the line position
    pub fn label(&self, index: usize) -> String {
        match &self.sku {
            Some(sku) => sku.clone(),
            None => format!("#{}", index + 1),
        }
    }
}

fn reject_empty_quantities(items: &[OrderItem]) -> Result<(), ActivityError> {
    if let Some((index, item)) = items.iter().enumerate().find(|(_, item)| item.quantity == 0) {
        return Err(ActivityError::permanent(format!(
            "item {} has zero quantity",
            item.label(index)
        ))
        .with_type("invalid_order"));
    }
    Ok(())
}

// ============================================================================
// check_inventory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInventoryInput {
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservation {
    pub reservation_id: Uuid,
    pub available: bool,
    pub units: u32,
}

pub struct CheckInventoryActivity {
    failures: SimulatedFailures,
}

#[async_trait]
impl Activity for CheckInventoryActivity {
    const TYPE: &'static str = "check_inventory";
    type Input = CheckInventoryInput;
    type Output = InventoryReservation;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        reject_empty_quantities(&input.items)?;
        self.failures.maybe_fail(ctx)?;

        Ok(InventoryReservation {
            reservation_id: Uuid::now_v7(),
            available: true,
            units: input.items.iter().map(|item| item.quantity).sum(),
        })
    }
}

// ============================================================================
// process_payment
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentInput {
    pub order_id: String,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub amount_cents: u64,
    pub captured_at: DateTime<Utc>,
}

pub struct ProcessPaymentActivity {
    failures: SimulatedFailures,
}

#[async_trait]
impl Activity for ProcessPaymentActivity {
    const TYPE: &'static str = "process_payment";
    type Input = ProcessPaymentInput;
    type Output = PaymentReceipt;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.failures.maybe_fail(ctx)?;

        let amount_cents = input
            .items
            .iter()
            .map(|item| item.unit_price_cents * u64::from(item.quantity))
            .sum();
        tracing::info!(
            order_id = %input.order_id,
            amount_cents,
            idempotency_key = %ctx.idempotency_key(),
            "payment captured"
        );

        Ok(PaymentReceipt {
            payment_id: format!("pay_{}", Uuid::now_v7().simple()),
            amount_cents,
            captured_at: Utc::now(),
        })
    }
}

// ============================================================================
// update_inventory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInventoryInput {
    pub items: Vec<OrderItem>,
    pub reservation: InventoryReservation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdate {
    pub reservation_id: Uuid,
    pub units_committed: u32,
}

pub struct UpdateInventoryActivity {
    failures: SimulatedFailures,
}

#[async_trait]
impl Activity for UpdateInventoryActivity {
    const TYPE: &'static str = "update_inventory";
    type Input = UpdateInventoryInput;
    type Output = InventoryUpdate;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.failures.maybe_fail(ctx)?;

        Ok(InventoryUpdate {
            reservation_id: input.reservation.reservation_id,
            units_committed: input.items.iter().map(|item| item.quantity).sum(),
        })
    }
}

// ============================================================================
// send_confirmation_email
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationEmailInput {
    pub order_id: String,
    pub payment_id: String,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailReceipt {
    pub kind: String,
    pub message_id: String,
    pub recipient: String,
}

pub struct SendConfirmationEmailActivity {
    failures: SimulatedFailures,
}

#[async_trait]
impl Activity for SendConfirmationEmailActivity {
    const TYPE: &'static str = "send_confirmation_email";
    type Input = ConfirmationEmailInput;
    type Output = EmailReceipt;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.failures.maybe_fail(ctx)?;

        let recipient = input
            .customer_email
            .unwrap_or_else(|| format!("customer+{}@example.com", input.order_id));
        tracing::debug!(%recipient, payment_id = %input.payment_id, "confirmation email sent");

        Ok(EmailReceipt {
            kind: "email".to_string(),
            message_id: format!("msg_{}", Uuid::now_v7().simple()),
            recipient,
        })
    }
}

// ============================================================================
// generate_shipping_label
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingLabelInput {
    pub order_id: String,
    #[serde(default)]
    pub shipping_address: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingLabel {
    pub kind: String,
    pub label_id: String,
    pub tracking_number: String,
}

pub struct GenerateShippingLabelActivity {
    failures: SimulatedFailures,
}

#[async_trait]
impl Activity for GenerateShippingLabelActivity {
    const TYPE: &'static str = "generate_shipping_label";
    type Input = ShippingLabelInput;
    type Output = ShippingLabel;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.failures.maybe_fail(ctx)?;

        let tracking = rand::thread_rng().gen_range(0..10_000_000_000u64);
        tracing::debug!(order_id = %input.order_id, "shipping label generated");

        Ok(ShippingLabel {
            kind: "shipping_label".to_string(),
            label_id: format!("lbl_{}", Uuid::now_v7().simple()),
            tracking_number: format!("1Z{tracking:010}"),
        })
    }
}

/// Registry with every order activity
pub fn order_activities(failures: SimulatedFailures) -> Result<Arc<ActivityRegistry>, RegistryError> {
    let mut registry = ActivityRegistry::new();
    registry.register(CheckInventoryActivity { failures })?;
    registry.register(ProcessPaymentActivity { failures })?;
    registry.register(UpdateInventoryActivity { failures })?;
    registry.register(SendConfirmationEmailActivity { failures })?;
    registry.register(GenerateShippingLabelActivity { failures })?;
    Ok(Arc::new(registry))
}
