//! Invoice desk: answers invoice questions from a fixture ledger.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::BoxError;

use super::{escalate_to_human, transfer_back_to_orchestrator, INVOICE_TOPIC};
use crate::agent::{AgentBuilder, AiAgent};
use crate::tool::{tool_typed, ToolDef};

const SYSTEM_PROMPT: &str = "You are an Invoice agent.
You help users view and understand their invoices: status, amounts, due dates and
which purchase order an invoice belongs to.

- Use lookup_invoice when the user gives an invoice number.
- Use list_invoices_for_po when the user only knows the purchase order number.
- If a lookup reports an error, tell the user plainly and ask them to double-check the number.
- If the request is about purchase orders or anything else outside invoices,
  transfer the user back to the orchestrator.
- If the user is upset, disputes a charge, or asks for a person, escalate to a human.

Keep answers short and specific.";

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub invoice_id: &'static str,
    pub po_number: &'static str,
    pub vendor: &'static str,
    pub amount: f64,
    pub currency: &'static str,
    pub status: &'static str,
    pub due_date: &'static str,
}

const INVOICES: &[Invoice] = &[
    Invoice {
        invoice_id: "INV-1001",
        po_number: "PO-5001",
        vendor: "Acme Office Supplies",
        amount: 1250.00,
        currency: "USD",
        status: "paid",
        due_date: "2024-03-15",
    },
    Invoice {
        invoice_id: "INV-1002",
        po_number: "PO-5001",
        vendor: "Acme Office Supplies",
        amount: 430.50,
        currency: "USD",
        status: "pending",
        due_date: "2024-04-30",
    },
    Invoice {
        invoice_id: "INV-1003",
        po_number: "PO-5002",
        vendor: "Globex Logistics",
        amount: 9800.00,
        currency: "USD",
        status: "overdue",
        due_date: "2024-02-01",
    },
];

fn normalize(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

pub fn find_invoice(invoice_id: &str) -> Option<&'static Invoice> {
    let id = normalize(invoice_id);
    INVOICES.iter().find(|inv| inv.invoice_id == id)
}

pub fn invoices_for_po(po_number: &str) -> Vec<&'static Invoice> {
    let po = normalize(po_number);
    INVOICES.iter().filter(|inv| inv.po_number == po).collect()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LookupInvoiceArgs {
    /// Invoice number, e.g. INV-1001
    pub invoice_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListInvoicesArgs {
    /// Purchase order number, e.g. PO-5001
    pub po_number: String,
}

pub fn lookup_invoice() -> ToolDef {
    tool_typed(
        "lookup_invoice",
        "Look up a single invoice by its invoice number",
        |args: LookupInvoiceArgs| async move {
            let out = match find_invoice(&args.invoice_id) {
                Some(inv) => serde_json::to_value(inv)?,
                None => json!({"error": format!("Invoice {} not found", args.invoice_id)}),
            };
            Ok::<Value, BoxError>(out)
        },
    )
}

pub fn list_invoices_for_po() -> ToolDef {
    tool_typed(
        "list_invoices_for_po",
        "List every invoice billed against a purchase order",
        |args: ListInvoicesArgs| async move {
            let found = invoices_for_po(&args.po_number);
            let out = if found.is_empty() {
                json!({"error": format!("No invoices found for purchase order {}", args.po_number)})
            } else {
                json!({"po_number": normalize(&args.po_number), "invoices": found})
            };
            Ok::<Value, BoxError>(out)
        },
    )
}

/// Invoice agent: two lookup tools, back-to-orchestrator and escalation delegates.
pub fn invoice_agent() -> AgentBuilder {
    AiAgent::builder(INVOICE_TOPIC)
        .system_prompt(SYSTEM_PROMPT)
        .tool(lookup_invoice())
        .tool(list_invoices_for_po())
        .delegate(transfer_back_to_orchestrator())
        .delegate(escalate_to_human())
}
