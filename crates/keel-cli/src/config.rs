use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Default)]
pub struct CliConfig {
    #[serde(default)]
    pub current_session: Option<String>,
}

fn keel_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(".keel"))
}

fn config_path() -> anyhow::Result<PathBuf> {
    Ok(keel_dir()?.join("config.json"))
}

pub(crate) fn default_storage_path() -> anyhow::Result<PathBuf> {
    Ok(keel_dir()?.join("sessions.json"))
}

pub(crate) fn load_config() -> anyhow::Result<CliConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    let config = serde_json::from_str(&contents)?;
    Ok(config)
}

pub(crate) fn save_config(config: &CliConfig) -> anyhow::Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub(crate) fn resolve_session(arg: Option<String>, config: &CliConfig) -> anyhow::Result<String> {
    arg.or_else(|| config.current_session.clone())
        .ok_or_else(|| anyhow::anyhow!("session not set; pass --session or run `keel login`"))
}

pub(crate) fn ensure_secure_issuer(issuer: &str, allow_insecure: bool) -> anyhow::Result<()> {
    if issuer.starts_with("http://") && !allow_insecure {
        anyhow::bail!("refusing to use http:// issuer without --insecure");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_session_wins_over_current() {
        let config = CliConfig {
            current_session: Some("current".to_string()),
        };
        assert_eq!(
            resolve_session(Some("abc".to_string()), &config).expect("session"),
            "abc"
        );
        assert_eq!(resolve_session(None, &config).expect("session"), "current");
        assert!(resolve_session(None, &CliConfig::default()).is_err());
    }

    #[test]
    fn http_issuer_requires_insecure() {
        assert!(ensure_secure_issuer("https://idp.example", false).is_ok());
        assert!(ensure_secure_issuer("http://127.0.0.1:8080", false).is_err());
        assert!(ensure_secure_issuer("http://127.0.0.1:8080", true).is_ok());
    }
}
