pub mod config_store;
pub mod defaults;
pub mod secrets;

pub use config_store::ConfigStore;
pub use secrets::{KeyringCredentials, SecretKey, delete_secret, get_secret, set_secret};
