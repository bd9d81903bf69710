// Order processing workflow
// Decision: Payments run exactly one attempt; a failed charge fails the order instead of retrying
// Decision: Both notifications run in parallel once inventory is committed

pub mod activities;

use std::time::Duration;

use orchestra_durable::workflow::DefinitionError;
use orchestra_durable::{
    ActivityStep, DefinitionRegistry, RetryPolicy, ValidationError, WorkflowDefinition,
};
use serde_json::{json, Value};

pub use activities::{order_activities, OrderItem, SimulatedFailures};

/// Definition name callers use in `POST /workflows/{definitionName}`
pub const PROCESS_ORDER: &str = "process_order";

fn standard_retry() -> RetryPolicy {
    RetryPolicy::exponential(3, Duration::from_millis(1000), 2.0)
}

/// `items` must be a non-empty array of order lines with positive quantities
fn validate_items(input: &Value) -> Result<(), ValidationError> {
    let items = match input.get("items") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) => return Err(ValidationError::new("items must not be empty")),
        _ => return Err(ValidationError::new("items must be an array")),
    };

    for (index, raw) in items.iter().enumerate() {
        let item: OrderItem = serde_json::from_value(raw.clone())
            .map_err(|e| ValidationError::new(format!("items[{index}] is invalid: {e}")))?;
        if item.quantity == 0 {
            return Err(ValidationError::new(format!(
                "items[{index}] must have a positive quantity"
            )));
        }
    }
    Ok(())
}

/// check_inventory → process_payment → update_inventory → [email ∥ shipping label]
pub fn process_order_definition() -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowDefinition::builder(PROCESS_ORDER)
        .require_fields(["orderId", "items"])
        .validator(validate_items)
        .step(
            ActivityStep::new("check_inventory", "check_inventory")
                .with_input(|ctx| Ok(json!({ "items": ctx.input()["items"] })))
                .with_retry(standard_retry()),
        )
        .step(
            ActivityStep::new("process_payment", "process_payment")
                .with_input(|ctx| {
                    Ok(json!({
                        "orderId": ctx.input()["orderId"],
                        "items": ctx.input()["items"],
                    }))
                })
                .with_retry(RetryPolicy::no_retry()),
        )
        .step(
            ActivityStep::new("update_inventory", "update_inventory")
                .with_input(|ctx| {
                    Ok(json!({
                        "items": ctx.input()["items"],
                        "reservation": ctx.require_output("check_inventory")?,
                    }))
                })
                .with_retry(standard_retry()),
        )
        .parallel([
            ActivityStep::new("send_confirmation_email", "send_confirmation_email")
                .with_input(|ctx| {
                    let payment = ctx.require_output("process_payment")?;
                    Ok(json!({
                        "orderId": ctx.input()["orderId"],
                        "paymentId": payment["paymentId"],
                        "customerEmail": ctx.input().get("customerEmail"),
                    }))
                })
                .with_retry(standard_retry()),
            ActivityStep::new("generate_shipping_label", "generate_shipping_label")
                .with_input(|ctx| {
                    Ok(json!({
                        "orderId": ctx.input()["orderId"],
                        "shippingAddress": ctx.input().get("shippingAddress"),
                    }))
                })
                .with_retry(standard_retry()),
        ])
        .result(|ctx| {
            let payment = ctx.require_output("process_payment")?;
            Ok(json!({
                "orderId": ctx.input()["orderId"],
                "paymentId": payment["paymentId"],
                "notifications": [
                    ctx.require_output("send_confirmation_email")?,
                    ctx.require_output("generate_shipping_label")?,
                ],
            }))
        })
        .build()
}

/// Every workflow definition this service runs
pub fn definitions() -> anyhow::Result<DefinitionRegistry> {
    let mut registry = DefinitionRegistry::new();
    registry.register(process_order_definition()?)?;
    Ok(registry)
}
