use std::sync::Arc;

use anyhow::anyhow;
use tutorcall_core::{CharacterDetails, CharacterId};

use crate::channel::CredentialSource;
use crate::parse::parse_character_details;
use crate::request::HttpRequest;
use crate::runtime::execute;

pub fn build_character_details_request(
    api_base_url: &str,
    id: CharacterId,
    token: Option<&str>,
) -> HttpRequest {
    let base = api_base_url.trim_end_matches('/');
    HttpRequest::get(format!("{base}/characters/{id}/details")).with_bearer(token)
}

pub async fn fetch_character_details(
    api_base_url: &str,
    id: CharacterId,
    token: Option<&str>,
) -> anyhow::Result<CharacterDetails> {
    let req = build_character_details_request(api_base_url, id, token);
    let resp = execute(&req).await?;
    if !resp.is_success() {
        return Err(anyhow!(
            "character lookup for {id} failed with status {}",
            resp.status
        ));
    }
    parse_character_details(&resp.body)
}

/// Character lookup bound to a backend and a credential source.
#[derive(Clone)]
pub struct CharacterService {
    api_base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl CharacterService {
    pub fn new(api_base_url: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            credentials,
        }
    }

    pub async fn details(&self, id: CharacterId) -> anyhow::Result<CharacterDetails> {
        let token = self.credentials.token();
        fetch_character_details(&self.api_base_url, id, token.as_deref()).await
    }
}
