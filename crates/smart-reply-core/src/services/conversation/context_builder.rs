use crate::config::PromptsConfig;
use crate::models::chat::ChatMessage;
use crate::services::owner_intercept::OwnerContext;

/// Pieces of the system prompt, assembled in a fixed order.
#[derive(Debug, Clone)]
pub struct SystemPromptComponents {
    pub base_instruction: String,
    pub collaborative_block: Option<String>,
}

impl SystemPromptComponents {
    pub fn build(&self) -> String {
        let mut prompt = self.base_instruction.trim().to_string();
        if let Some(block) = &self.collaborative_block {
            prompt.push_str("\n\n");
            prompt.push_str(block);
        }
        prompt
    }
}

pub struct PromptBuilder {
    base_instruction: String,
    collaborative_instruction: String,
}

impl PromptBuilder {
    pub fn new(prompts: &PromptsConfig) -> Self {
        Self {
            base_instruction: prompts.system_prompt.clone(),
            collaborative_instruction: prompts.collaborative_instruction.clone(),
        }
    }

    pub fn default_base_instruction() -> String {
        r#"You are the customer-service assistant of a small online shop, replying on the owner's behalf in a chat app.

Guidelines:
- Reply in the customer's language and keep messages short and friendly
- Answer every question in the customer's messages; they may arrive as several lines
- Never invent prices, stock or delivery promises you were not told about
- If you are unsure, say the owner will confirm shortly"#
            .to_string()
    }

    pub fn default_collaborative_instruction() -> String {
        r#"COLLABORATIVE MODE: the shop owner has just replied to this customer personally.
- Treat the owner's message as already sent and correct
- Continue from it; do not repeat, contradict or apologise for it
- Only add what is still missing for the customer"#
            .to_string()
    }

    pub fn build_system_prompt(&self, owner: Option<&OwnerContext>) -> String {
        let components = SystemPromptComponents {
            base_instruction: self.base_instruction.clone(),
            collaborative_block: owner.map(|ctx| self.collaborative_block(ctx)),
        };
        components.build()
    }

    fn collaborative_block(&self, owner: &OwnerContext) -> String {
        let mut block = self.collaborative_instruction.trim().to_string();
        if !owner.customer_messages.is_empty() {
            block.push_str("\n\nCustomer messages the owner was answering:");
            for message in &owner.customer_messages {
                block.push_str("\n- ");
                block.push_str(message.body.trim());
            }
        }
        block
    }

    /// The owner's latest words as a synthetic business-side turn.
    pub fn owner_turn(owner: &OwnerContext) -> ChatMessage {
        let mut content = format!("[Owner replied personally]: {}", owner.owner_message);
        if let Some(media) = &owner.owner_media_context {
            content.push_str(&format!(" [Media: {}]", media));
        }
        ChatMessage::assistant(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InboundMessage, MessageKind};
    use chrono::Utc;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(&PromptsConfig {
            system_prompt: "BASE".into(),
            style_context: None,
            collaborative_instruction: "COLLAB".into(),
        })
    }

    fn owner_context() -> OwnerContext {
        OwnerContext {
            owner_message: "stok M tinggal 2".into(),
            owner_media_context: Some("size chart".into()),
            customer_messages: vec![InboundMessage {
                id: "m1".into(),
                conversation_id: "c1".into(),
                sender_id: None,
                sender_name: None,
                body: "ukuran M ada?".into(),
                timestamp: Utc::now(),
                has_media: false,
                from_self: false,
                kind: MessageKind::Chat,
            }],
        }
    }

    #[test]
    fn test_plain_prompt_has_no_collaborative_block() {
        assert_eq!(builder().build_system_prompt(None), "BASE");
    }

    #[test]
    fn test_collaborative_prompt() {
        let prompt = builder().build_system_prompt(Some(&owner_context()));
        assert!(prompt.starts_with("BASE\n\nCOLLAB"));
        assert!(prompt.contains("- ukuran M ada?"));
    }

    #[test]
    fn test_owner_turn() {
        let turn = PromptBuilder::owner_turn(&owner_context());
        assert_eq!(turn.role, "assistant");
        assert_eq!(
            turn.content,
            "[Owner replied personally]: stok M tinggal 2 [Media: size chart]"
        );
    }
}
