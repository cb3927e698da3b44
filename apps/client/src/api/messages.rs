use reqwest::Method;
use shared_proto::{Message, NewMessage, Reactions, ReactionsPatch, ReadPatch, SnapshotMessage};
use uuid::Uuid;

use super::{first_row, send_empty, send_json, Backend};
use crate::error::AppResult;
use crate::protocol::{in_list, HEADER_PREFER, MESSAGES_TABLE, PREFER_REPRESENTATION};

/// Embeds both participants' profiles into every message row.
const SNAPSHOT_SELECT: &str =
    "*,sender:profiles!messages_sender_id_fkey(*),receiver:profiles!messages_receiver_id_fkey(*)";

pub fn involving_filter(me: Uuid) -> String {
    format!("(sender_id.eq.{me},receiver_id.eq.{me})")
}

pub fn between_filter(me: Uuid, other: Uuid) -> String {
    format!(
        "(and(sender_id.eq.{me},receiver_id.eq.{other}),and(sender_id.eq.{other},receiver_id.eq.{me}))"
    )
}

impl Backend {
    /// Every message sent or received by `me`, newest first, with profiles.
    pub async fn list_messages(&self, me: Uuid) -> AppResult<Vec<SnapshotMessage>> {
        let request = self
            .request(Method::GET, &self.config.rest_url(MESSAGES_TABLE))
            .await
            .query(&[
                ("select", SNAPSHOT_SELECT.to_string()),
                ("or", involving_filter(me)),
                ("order", "created_at.desc".to_string()),
            ]);
        send_json(request, "Failed to load chats").await
    }

    /// History between `me` and `counterparty`, newest first.
    pub async fn list_conversation(&self, me: Uuid, counterparty: Uuid) -> AppResult<Vec<Message>> {
        let request = self
            .request(Method::GET, &self.config.rest_url(MESSAGES_TABLE))
            .await
            .query(&[
                ("select", "*".to_string()),
                ("or", between_filter(me, counterparty)),
                ("order", "created_at.desc".to_string()),
            ]);
        send_json(request, "Failed to load messages").await
    }

    /// Inserts the message and returns the stored row.
    pub async fn create_message(&self, message: &NewMessage) -> AppResult<Message> {
        let request = self
            .request(Method::POST, &self.config.rest_url(MESSAGES_TABLE))
            .await
            .header(HEADER_PREFER, PREFER_REPRESENTATION)
            .json(message);
        let rows: Vec<Message> = send_json(request, "Failed to send message").await?;
        let row = first_row(rows, "Failed to send message")?;
        tracing::debug!(component = "api", message_id = %row.id, "message stored");
        Ok(row)
    }

    pub async fn mark_read(&self, ids: &[Uuid]) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let request = self
            .request(Method::PATCH, &self.config.rest_url(MESSAGES_TABLE))
            .await
            .query(&[("id", in_list(ids))])
            .json(&ReadPatch { is_read: true });
        send_empty(request, "Failed to mark messages as read").await
    }

    pub async fn update_reactions(&self, id: Uuid, reactions: &Reactions) -> AppResult<Message> {
        let request = self
            .request(Method::PATCH, &self.config.rest_url(MESSAGES_TABLE))
            .await
            .query(&[("id", format!("eq.{id}"))])
            .header(HEADER_PREFER, PREFER_REPRESENTATION)
            .json(&ReactionsPatch {
                reactions: reactions.clone(),
            });
        let rows: Vec<Message> = send_json(request, "Failed to update reaction").await?;
        first_row(rows, "Failed to update reaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_filters_cover_both_directions() {
        let me = Uuid::from_u128(1);
        let other = Uuid::from_u128(2);

        let involving = involving_filter(me);
        assert!(involving.contains(&format!("sender_id.eq.{me}")));
        assert!(involving.contains(&format!("receiver_id.eq.{me}")));

        let between = between_filter(me, other);
        assert!(between.contains(&format!("and(sender_id.eq.{me},receiver_id.eq.{other})")));
        assert!(between.contains(&format!("and(sender_id.eq.{other},receiver_id.eq.{me})")));
    }
}
