//! Sender id helpers for WhatsApp chat ids (`<user>@<server>`).

const DIRECT_CHAT_SERVERS: &[&str] = &["c.us", "s.whatsapp.net"];

/// True only for 1:1 chats. Group (`@g.us`), broadcast, newsletter and
/// legacy group ids (`<creator>-<timestamp>@...`) are rejected, as is any
/// server this bridge does not know.
pub fn is_direct_chat(sender_id: &str) -> bool {
    let Some((user, server)) = sender_id.trim().split_once('@') else {
        return false;
    };
    if user.is_empty() || user.contains('-') {
        return false;
    }
    let server = server.to_ascii_lowercase();
    DIRECT_CHAT_SERVERS.contains(&server.as_str())
}

/// Conversation key used by the pause store: the user part of the chat id.
pub fn conversation_key(sender_id: &str) -> String {
    let trimmed = sender_id.trim();
    let user = trimmed
        .split_once('@')
        .map(|(user, _)| user)
        .unwrap_or(trimmed);
    // Multi-device ids carry a `:<device>` suffix.
    user.split(':').next().unwrap_or(user).to_string()
}

fn phone_digits(raw: &str) -> String {
    raw.chars().filter(|ch| ch.is_ascii_digit()).collect()
}

/// True when the sender's chat belongs to the linked phone number.
pub fn sender_is_owner(sender_id: &str, owner_phone: Option<&str>) -> bool {
    let Some(owner_phone) = owner_phone else {
        return false;
    };
    let owner = phone_digits(owner_phone);
    !owner.is_empty() && phone_digits(&conversation_key(sender_id)) == owner
}
