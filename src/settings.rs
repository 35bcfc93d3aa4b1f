use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_SEARCH_URL: &str =
    "https://researchmap.jp/researchers?affiliation=%E6%A0%AA%E5%BC%8F%E4%BC%9A%E7%A4%BE";

/// Runtime settings: code defaults, then `rmap.toml` (optional), then `RMAP_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub search_url: String,
    pub user_agent: String,
    pub accept_language: String,
    pub timeout_secs: u64,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub concurrency: usize,
    pub max_duration_secs: Option<u64>,
    pub vocabulary_path: Option<PathBuf>,
    pub db_path: PathBuf,
    pub output_prefix: String,
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("base_url", "https://researchmap.jp")?
            .set_default("search_url", DEFAULT_SEARCH_URL)?
            .set_default(
                "user_agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
            )?
            .set_default("accept_language", "ja,en-US;q=0.7,en;q=0.3")?
            .set_default("timeout_secs", 30_i64)?
            .set_default("request_delay_ms", 1000_i64)?
            .set_default("max_retries", 3_i64)?
            .set_default("backoff_ms", 2000_i64)?
            .set_default("concurrency", 4_i64)?
            .set_default("db_path", "data/researchmap.sqlite")?
            .set_default("output_prefix", "researchmap_integrated")?;

        builder = match file {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("rmap").required(false)),
        };

        builder
            .add_source(Environment::with_prefix("RMAP").try_parsing(true))
            .build()
            .context("loading settings")?
            .try_deserialize()
            .context("invalid settings")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply() {
        let s = Settings::load(None).unwrap();
        assert_eq!(s.base_url, "https://researchmap.jp");
        assert_eq!(s.timeout(), Duration::from_secs(30));
        assert_eq!(s.accept_language, "ja,en-US;q=0.7,en;q=0.3");
        assert_eq!(s.output_prefix, "researchmap_integrated");
        assert!(s.vocabulary_path.is_none());
    }

    #[test]
    fn file_then_env_override() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "max_retries = 7\nmax_duration_secs = 600\ndb_path = \"/tmp/x.sqlite\"").unwrap();

        let s = Settings::load(Some(f.path())).unwrap();
        assert_eq!(s.max_duration(), Some(Duration::from_secs(600)));
        assert_eq!(s.db_path, PathBuf::from("/tmp/x.sqlite"));

        std::env::set_var("RMAP_MAX_RETRIES", "5");
        let s = Settings::load(Some(f.path())).unwrap();
        std::env::remove_var("RMAP_MAX_RETRIES");
        assert_eq!(s.max_retries, 5);
    }
}
