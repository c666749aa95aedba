use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `BridgeCommand` values.
pub enum BridgeCommand {
    PauseConversation,
    ResumeConversation,
    PauseAll,
    ResumeAll,
    Status,
}

impl BridgeCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PauseConversation => "pause_conversation",
            Self::ResumeConversation => "resume_conversation",
            Self::PauseAll => "pause_all",
            Self::ResumeAll => "resume_all",
            Self::Status => "status",
        }
    }

    /// Commands that change every conversation of the tenant.
    pub fn is_owner_only(self) -> bool {
        matches!(self, Self::PauseAll | Self::ResumeAll)
    }
}

/// Parses a message body as a control command.
///
/// Matching is case-insensitive on the trimmed body with inner whitespace
/// collapsed, so `"  Pausar   TODO "` is `PauseAll`. Anything else is a
/// regular message.
pub fn parse_bridge_command(body: &str) -> Option<BridgeCommand> {
    let normalized = body
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let command = match normalized.as_str() {
        "pause" | "pausar" => BridgeCommand::PauseConversation,
        "resume" | "reactivar" => BridgeCommand::ResumeConversation,
        "pause all" | "pausar todo" => BridgeCommand::PauseAll,
        "resume all" | "activar todo" => BridgeCommand::ResumeAll,
        "status" | "estado" => BridgeCommand::Status,
        _ => return None,
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::{parse_bridge_command, BridgeCommand};

    #[test]
    fn unit_parse_accepts_english_and_spanish_aliases() {
        let cases = [
            ("pause", BridgeCommand::PauseConversation),
            ("PAUSAR", BridgeCommand::PauseConversation),
            (" resume ", BridgeCommand::ResumeConversation),
            ("Reactivar", BridgeCommand::ResumeConversation),
            ("pause all", BridgeCommand::PauseAll),
            ("Pausar   Todo", BridgeCommand::PauseAll),
            ("resume all", BridgeCommand::ResumeAll),
            ("activar todo", BridgeCommand::ResumeAll),
            ("status", BridgeCommand::Status),
            ("ESTADO\n", BridgeCommand::Status),
        ];
        for (body, expected) in cases {
            assert_eq!(parse_bridge_command(body), Some(expected), "{body:?}");
        }
    }

    #[test]
    fn regression_sentences_containing_commands_are_not_commands() {
        for body in ["quiero pausar", "pause please", "estado de mi pedido", "", "   "] {
            assert_eq!(parse_bridge_command(body), None, "{body:?}");
        }
    }

    #[test]
    fn unit_only_global_commands_are_owner_only() {
        assert!(BridgeCommand::PauseAll.is_owner_only());
        assert!(BridgeCommand::ResumeAll.is_owner_only());
        assert!(!BridgeCommand::PauseConversation.is_owner_only());
        assert!(!BridgeCommand::Status.is_owner_only());
    }
}
