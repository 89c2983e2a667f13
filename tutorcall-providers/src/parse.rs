use anyhow::{Context, anyhow};
use serde::Deserialize;
use tutorcall_core::CharacterDetails;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacterDetailsResponse {
    name: Option<String>,
    category_name: Option<String>,
    avatar_url: Option<String>,
    imagen_url: Option<String>,
}

/// Decodes the `/characters/{id}/details` body. Older backends send the avatar
/// as `imagenUrl`.
pub fn parse_character_details(body: &[u8]) -> anyhow::Result<CharacterDetails> {
    let resp: CharacterDetailsResponse =
        serde_json::from_slice(body).context("decode character details JSON")?;
    let name = resp
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| anyhow!("character details without a name"))?;

    Ok(CharacterDetails {
        name,
        category_name: resp.category_name,
        avatar_url: resp.avatar_url.or(resp.imagen_url),
    })
}
