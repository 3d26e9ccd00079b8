use healthgate::Options;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub breaker: Options,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String, // e.g., "0.0.0.0"
    pub port: u16,         // e.g., 5588
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}
fn default_upstream_timeout_ms() -> u64 { 10_000 }

impl Config {
    pub fn load_from_path(path: &PathBuf) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let mut cfg: Self = serde_yaml::from_str(content)?;
        apply_env_overrides(&mut cfg);
        cfg.breaker.validate()?;
        Ok(cfg)
    }
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(addr) = env::var("HG_HTTP_ADDR") { cfg.server.bind_addr = addr; }
    if let Ok(port) = env::var("HG_HTTP_PORT") {
        if let Ok(p) = port.parse::<u16>() { cfg.server.port = p; }
    }
    if let Ok(url) = env::var("HG_UPSTREAM_URL") { cfg.upstream.url = url; }
    if let Ok(ms) = env::var("HG_UPSTREAM_TIMEOUT_MS") {
        if let Ok(v) = ms.parse::<u64>() { cfg.upstream.timeout_ms = v.max(100); }
    }
    if let Ok(pct) = env::var("HG_ERROR_THRESHOLD") {
        if let Ok(v) = pct.parse::<f64>() { cfg.breaker.error_percentage_threshold = v; }
    }
    if let Ok(n) = env::var("HG_MIN_REQUESTS") {
        if let Ok(v) = n.parse::<u64>() { cfg.breaker.minimum_request_volume = v; }
    }
    if let Ok(sec) = env::var("HG_WINDOW_SECONDS") {
        if let Ok(v) = sec.parse::<u32>() { cfg.breaker.window_seconds = v; }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
server:
  bind_addr: 127.0.0.1
  port: 5588
upstream:
  url: http://127.0.0.1:8545
";

    #[test]
    fn breaker_section_is_optional() {
        let cfg: Config = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.breaker, Options::default());
        assert_eq!(cfg.upstream.timeout_ms, 10_000);
        assert_eq!(cfg.server.port, 5588);
    }

    #[test]
    fn breaker_section_overrides_defaults() {
        let yaml = format!("{MINIMAL}breaker:\n  error_percentage_threshold: 25.0\n  window_seconds: 30\n");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg.breaker.error_percentage_threshold, 25.0);
        assert_eq!(cfg.breaker.window_seconds, 30);
        assert_eq!(cfg.breaker.minimum_request_volume, 20);
    }

    #[test]
    fn invalid_window_is_rejected_on_load() {
        let yaml = format!("{MINIMAL}breaker:\n  window_seconds: 90\n");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("90"));
    }

    #[test]
    fn nan_threshold_is_rejected_on_load() {
        let yaml = format!("{MINIMAL}breaker:\n  error_percentage_threshold: .nan\n");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("not a finite number"));
    }
}
