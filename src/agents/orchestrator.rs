//! Front-desk agent: works out what the user needs and routes them.

use super::{escalate_to_human, INVOICE_TOPIC, ORCHESTRATOR_TOPIC, PO_TOPIC};
use crate::agent::{AgentBuilder, AiAgent};
use crate::tool::handoff_tool;

const SYSTEM_PROMPT: &str = "You are an Orchestrator agent.
Your job is to understand what the user needs and direct them to the appropriate agent:

- For invoice-related queries (viewing, creating, managing invoices, billing questions),
  transfer the user to the invoice agent. If no purchase order is given, the invoice agent can
  look invoices up by purchase order once the user provides one.
- For purchase order queries (creating POs, checking PO status, modifying POs),
  transfer the user to the purchase order agent.
- For complex issues that require human expertise or when the user explicitly
  asks to speak to a human, transfer the user to the human agent.

Ask natural, conversational questions to determine where to route the user.
Be brief but helpful in your responses. Don't make the user feel like they're
talking to a robot.

Example questions to determine user needs:
- \"Are you inquiring about an invoice or a purchase order today?\"
- \"Would you like help with creating a new purchase order or checking an existing one?\"

Once you understand their needs, transfer them to the appropriate agent.";

/// Orchestrator: no local tools, three delegates.
pub fn orchestrator_agent() -> AgentBuilder {
    AiAgent::builder(ORCHESTRATOR_TOPIC)
        .system_prompt(SYSTEM_PROMPT)
        .delegate(handoff_tool(
            "transfer_to_invoice_agent",
            "Transfer the user to the invoice agent for invoice-related inquiries",
            INVOICE_TOPIC,
        ))
        .delegate(handoff_tool(
            "transfer_to_po_agent",
            "Transfer the user to the purchase order agent for PO-related inquiries",
            PO_TOPIC,
        ))
        .delegate(escalate_to_human())
}
