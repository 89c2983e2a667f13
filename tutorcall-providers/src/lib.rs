pub mod channel;
pub mod characters;
pub mod parse;
pub mod request;
pub mod runtime;

pub use channel::{ChannelConfig, ChannelHandle, CredentialSource, spawn_channel};
pub use characters::{CharacterService, fetch_character_details};
