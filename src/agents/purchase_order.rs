//! Purchase order desk.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::BoxError;

use super::{escalate_to_human, transfer_back_to_orchestrator, PO_TOPIC};
use crate::agent::{AgentBuilder, AiAgent};
use crate::tool::{tool_typed, ToolDef};

const SYSTEM_PROMPT: &str = "You are a Purchase Order agent.
You help users check the status and details of purchase orders.

- Use lookup_purchase_order when the user gives a PO number.
- If the lookup reports an error, say so and ask the user to confirm the number.
- Creating or changing a purchase order needs a person: escalate to a human.
- For invoice questions or anything outside purchase orders, transfer the user
  back to the orchestrator.

Keep answers short and specific.";

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOrder {
    pub po_number: &'static str,
    pub vendor: &'static str,
    pub total: f64,
    pub currency: &'static str,
    pub status: &'static str,
    pub requested_by: &'static str,
}

const PURCHASE_ORDERS: &[PurchaseOrder] = &[
    PurchaseOrder {
        po_number: "PO-5001",
        vendor: "Acme Office Supplies",
        total: 1680.50,
        currency: "USD",
        status: "approved",
        requested_by: "facilities",
    },
    PurchaseOrder {
        po_number: "PO-5002",
        vendor: "Globex Logistics",
        total: 9800.00,
        currency: "USD",
        status: "received",
        requested_by: "operations",
    },
    PurchaseOrder {
        po_number: "PO-5003",
        vendor: "Initech Software",
        total: 24000.00,
        currency: "USD",
        status: "pending_approval",
        requested_by: "engineering",
    },
];

pub fn find_purchase_order(po_number: &str) -> Option<&'static PurchaseOrder> {
    let po = po_number.trim().to_ascii_uppercase();
    PURCHASE_ORDERS.iter().find(|p| p.po_number == po)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LookupPurchaseOrderArgs {
    /// Purchase order number, e.g. PO-5001
    pub po_number: String,
}

pub fn lookup_purchase_order() -> ToolDef {
    tool_typed(
        "lookup_purchase_order",
        "Look up a purchase order by its PO number",
        |args: LookupPurchaseOrderArgs| async move {
            let out = match find_purchase_order(&args.po_number) {
                Some(po) => serde_json::to_value(po)?,
                None => json!({"error": format!("Purchase order {} not found", args.po_number)}),
            };
            Ok::<Value, BoxError>(out)
        },
    )
}

pub fn purchase_order_agent() -> AgentBuilder {
    AiAgent::builder(PO_TOPIC)
        .system_prompt(SYSTEM_PROMPT)
        .tool(lookup_purchase_order())
        .delegate(transfer_back_to_orchestrator())
        .delegate(escalate_to_human())
}
