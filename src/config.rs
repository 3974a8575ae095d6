//! Persistent settings loaded from `~/.config/sureweave.toml`.

use std::{fs, io};

use anyhow::{anyhow, Context, Result};
use camino::Utf8PathBuf;
use serde::Deserialize;

fn default_base() -> String {
    "2sure".to_string()
}

fn default_compressed() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_base")]
    pub default_base: String,
    #[serde(default = "default_compressed")]
    pub compressed: bool,
    /// Regex patterns for scan entries to skip, merged with any `-s` flags.
    #[serde(default)]
    pub skip: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            default_base: default_base(),
            compressed: default_compressed(),
            skip: Vec::new(),
        }
    }
}

impl Configuration {
    /// Merges CLI-provided skip patterns in after the configured ones.
    pub fn merge_skips(&self, extra: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut skips = self.skip.clone();
        skips.extend(extra);
        skips
    }
}

pub fn load() -> Result<Configuration> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "sureweave.toml"]);

    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;

    toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Configuration::default();
        assert_eq!(c.default_base, "2sure");
        assert!(c.compressed);
        assert!(c.skip.is_empty());
    }

    #[test]
    fn merge_skips_appends_after_configured() {
        let c = Configuration { skip: vec!["^target/".into()], ..Configuration::default() };
        let merged = c.merge_skips(vec!["\\.git/".into()]);
        assert_eq!(merged, vec!["^target/".to_string(), "\\.git/".to_string()]);
    }
}
