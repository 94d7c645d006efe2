//! Concrete agents wired into the default runtime.
//!
//! LLM-driven agents are returned as pre-configured [`AgentBuilder`]s; the
//! caller supplies the model, the store and any turn bound. The human and
//! user agents are plain Tower services.
//!
//! [`AgentBuilder`]: crate::agent::AgentBuilder

pub mod human;
pub mod invoice;
pub mod orchestrator;
pub mod purchase_order;
pub mod user;

pub use human::{Escalation, HumanAgent};
pub use invoice::invoice_agent;
pub use orchestrator::orchestrator_agent;
pub use purchase_order::purchase_order_agent;
pub use user::UserAgent;

pub const ORCHESTRATOR_TOPIC: &str = "OrchestratorAgent";
pub const INVOICE_TOPIC: &str = "InvoiceAgent";
pub const PO_TOPIC: &str = "PurchaseOrderAgent";
pub const HUMAN_TOPIC: &str = "HumanAgent";
pub const USER_TOPIC: &str = "User";

use crate::tool::{handoff_tool, ToolDef};

pub(crate) fn escalate_to_human() -> ToolDef {
    handoff_tool(
        "escalate_to_human",
        "Escalate the user to a human agent for complex issues",
        HUMAN_TOPIC,
    )
}

pub(crate) fn transfer_back_to_orchestrator() -> ToolDef {
    handoff_tool(
        "transfer_back_to_orchestrator",
        "Transfer the user back to the orchestrator when the request is outside your area",
        ORCHESTRATOR_TOPIC,
    )
}
