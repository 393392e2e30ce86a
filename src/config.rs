use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings needed to reach a HERMES instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the webservice, without the `/v1` suffix.
    pub url: String,
    /// Upper bound for each individual request. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Whether to draw a progress bar while downloading response bodies.
    pub progress: bool,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: None,
            progress: false,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct RcConfig {
    url: Option<String>,
    timeout: Option<Duration>,
    progress: Option<bool>,
}

/// Resolves the configuration from (in order of precedence) explicit
/// arguments, `HERMES_URL` / `HERMES_TIMEOUT`, and the first rc file found.
pub(crate) fn load_config(url: Option<String>, timeout: Option<Duration>) -> Result<ClientConfig> {
    let mut url = url.or_else(|| std::env::var("HERMES_URL").ok());
    let mut timeout = match timeout {
        Some(t) => Some(t),
        None => match std::env::var("HERMES_TIMEOUT") {
            Ok(v) => Some(parse_timeout(&v).context("invalid HERMES_TIMEOUT")?),
            Err(_) => None,
        },
    };

    let rc_candidates = rc_candidates();
    let mut progress = false;

    for rc_path in &rc_candidates {
        if rc_path.exists() {
            let cfg = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;

            if url.is_none() {
                url = cfg.url;
            }
            if timeout.is_none() {
                timeout = cfg.timeout;
            }
            progress = cfg.progress.unwrap_or(false);
            break;
        }
    }

    let url = match url {
        Some(v) => v,
        None => {
            if !rc_candidates.is_empty() {
                bail!(
                    "Missing configuration: url (set HERMES_URL or put `url:` in one of: {})",
                    rc_candidates
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            bail!("Missing configuration: url (set HERMES_URL or create .hermesrc)");
        }
    };

    Ok(ClientConfig {
        url: url.trim_end_matches('/').to_string(),
        timeout,
        progress,
    })
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_rc(&text)
}

fn parse_rc(text: &str) -> Result<RcConfig> {
    let mut cfg = RcConfig::default();

    // `url:` may stand alone with the value on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') || line.contains("://") {
                apply(&mut cfg, pk, strip_quotes(line))?;
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            if v.is_empty() {
                pending_key = Some(k);
            } else {
                apply(&mut cfg, k, v)?;
            }
        }
    }

    Ok(cfg)
}

fn apply(cfg: &mut RcConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "url" => cfg.url = Some(value.to_string()),
        "timeout" => cfg.timeout = Some(parse_timeout(value)?),
        "progress" => cfg.progress = Some(!matches!(value, "0" | "false" | "no")),
        _ => {}
    }
    Ok(())
}

fn parse_timeout(value: &str) -> Result<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("timeout must be a number of seconds, got \"{}\"", value))?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("timeout must be positive, got {}", value);
    }
    Ok(Duration::from_secs_f64(secs))
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) HERMES_RC (explicit)
    // 2) ./.hermesrc
    // 3) ~/.hermesrc
    if let Ok(p) = std::env::var("HERMES_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".hermesrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".hermesrc"));
    }
    v
}
