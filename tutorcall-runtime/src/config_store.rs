use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tutorcall_core::AppConfig;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields the defaults; a present but broken file is an error.
    pub fn load(&self) -> anyhow::Result<AppConfig> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}; using defaults", self.path.display());
                return Ok(AppConfig::default());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("read config: {}", self.path.display()));
            }
        };
        let cfg: AppConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("decode config JSON: {}", self.path.display()))?;
        Ok(cfg)
    }

    pub fn save(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write temp: {}", tmp.display()))?;
        replace_file(&tmp, &self.path)
            .with_context(|| format!("replace file: {}", self.path.display()))?;
        log::info!("saved config to {}", self.path.display());
        Ok(())
    }
}

/// Moves `tmp` over `dst`, keeping a `.bak` of the old file until the rename lands.
fn replace_file(tmp: &Path, dst: &Path) -> anyhow::Result<()> {
    let backup = dst.with_extension("bak");

    if dst.exists() {
        let _ = fs::remove_file(&backup);
        fs::rename(dst, &backup)
            .with_context(|| format!("move {} aside", dst.display()))?;
    }

    if let Err(e) = fs::rename(tmp, dst) {
        if backup.exists() {
            let _ = fs::rename(&backup, dst);
        }
        let _ = fs::remove_file(tmp);
        return Err(anyhow::Error::new(e)
            .context(format!("rename {} -> {}", tmp.display(), dst.display())));
    }

    let _ = fs::remove_file(&backup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at_path(dir.path().join("nope.json"));
        assert_eq!(store.load().unwrap(), AppConfig::default());
    }

    #[test]
    fn round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::at_path(&path);

        let mut cfg = AppConfig::default();
        cfg.backend.ws_url = "wss://tutor.example/ws/chat".into();
        cfg.vad.silence_duration_ms = 900;
        store.save(&cfg).unwrap();

        cfg.capture.microphone_device = Some("USB Mic".into());
        store.save(&cfg).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("json.tmp").exists());
        assert!(!path.with_extension("bak").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"{not json").unwrap();
        let err = ConfigStore::at_path(&path).load().unwrap_err();
        assert!(format!("{err:#}").contains("decode config JSON"));
    }
}
