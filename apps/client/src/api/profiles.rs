use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::Method;
use shared_proto::{GuestProfileRequest, PresencePatch, Profile};
use uuid::Uuid;

use super::{send_empty, send_json, Backend};
use crate::error::AppResult;
use crate::protocol::{in_list, ACCEPT_SINGLE_OBJECT, GUEST_PROFILE_RPC, PROFILES_TABLE};

impl Backend {
    pub async fn fetch_profile(&self, id: Uuid) -> AppResult<Profile> {
        let request = self
            .request(Method::GET, &self.config.rest_url(PROFILES_TABLE))
            .await
            .header(ACCEPT, ACCEPT_SINGLE_OBJECT)
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        send_json(request, "Failed to load profile").await
    }

    /// Registered profiles whose phone number is one of `numbers`.
    pub async fn profiles_by_phone(&self, numbers: &[String]) -> AppResult<Vec<Profile>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let request = self
            .request(Method::GET, &self.config.rest_url(PROFILES_TABLE))
            .await
            .query(&[
                ("select", "*".to_string()),
                ("phone_number", in_list(numbers)),
            ]);
        send_json(request, "Failed to match contacts").await
    }

    pub async fn find_profile_by_phone(&self, number: &str) -> AppResult<Option<Profile>> {
        let request = self
            .request(Method::GET, &self.config.rest_url(PROFILES_TABLE))
            .await
            .query(&[
                ("select", "*".to_string()),
                ("phone_number", format!("eq.{number}")),
                ("limit", "1".to_string()),
            ]);
        let rows: Vec<Profile> = send_json(request, "Failed to look up contact").await?;
        Ok(rows.into_iter().next())
    }

    /// Placeholder profile for a contact who has no account yet. The
    /// backend returns the existing guest when the number is known.
    pub async fn get_or_create_guest_profile(&self, phone_number: &str, full_name: &str) -> AppResult<Uuid> {
        let request = self
            .request(Method::POST, &self.config.rest_url(&format!("rpc/{GUEST_PROFILE_RPC}")))
            .await
            .json(&GuestProfileRequest {
                phone_number_param: phone_number.to_string(),
                full_name_param: full_name.to_string(),
            });
        let id: Uuid = send_json(request, "Failed to create guest profile").await?;
        tracing::info!(component = "api", profile_id = %id, "guest profile resolved");
        Ok(id)
    }

    pub async fn set_presence(&self, me: Uuid, online: bool) -> AppResult<()> {
        let request = self
            .request(Method::PATCH, &self.config.rest_url(PROFILES_TABLE))
            .await
            .query(&[("id", format!("eq.{me}"))])
            .json(&PresencePatch {
                is_online: online,
                last_seen: Utc::now(),
            });
        send_empty(request, "Failed to update presence").await
    }
}
