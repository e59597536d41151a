use crate::cli::Cli;
use anyhow::{Context, Result, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub webserver: Webserver,
    pub polling: Polling,
    pub kubeconfig: Option<PathBuf>,
    pub namespaces: Namespaces,
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Webserver {
    pub listen_address: SocketAddr,
}

impl Default for Webserver {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 2112)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Polling {
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    /// Deadline for each list call, defaults to half the interval
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub fetch_timeout: Option<Duration>,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            fetch_timeout: None,
        }
    }
}

impl Polling {
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout.unwrap_or(self.interval / 2)
    }
}

/// Glob patterns selecting the pod namespaces that are audited.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Namespaces {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Namespaces {
    pub fn filter(&self) -> Result<NamespaceFilter> {
        Ok(NamespaceFilter {
            include: match self.include.is_empty() {
                true => None,
                false => Some(build_glob_set(&self.include)?),
            },
            exclude: build_glob_set(&self.exclude)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NamespaceFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl Default for NamespaceFilter {
    fn default() -> Self {
        Self {
            include: None,
            exclude: GlobSet::empty(),
        }
    }
}

impl NamespaceFilter {
    pub fn allows(&self, namespace: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .map_or(true, |include| include.is_match(namespace));
        included && !self.exclude.is_match(namespace)
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .with_context(|| format!("Invalid namespace pattern: {}", pattern))?,
        );
    }
    builder.build().context("Failed to build namespace patterns")
}

impl Config {
    /// Loads the config file if one is given and applies command line overrides.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };

        if let Some(interval) = cli.interval {
            config.polling.interval = interval;
        }
        if let Some(fetch_timeout) = cli.fetch_timeout {
            config.polling.fetch_timeout = Some(fetch_timeout);
        }
        if let Some(listen_address) = cli.listen_address {
            config.webserver.listen_address = listen_address;
        }
        if let Some(kubeconfig) = &cli.kubeconfig {
            config.kubeconfig = Some(kubeconfig.clone());
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.polling.interval < Duration::from_secs(1)
            || self.polling.interval.subsec_nanos() != 0
        {
            bail!(
                "Polling interval {:?} must be a whole number of seconds",
                self.polling.interval
            );
        }
        if self.polling.fetch_timeout() >= self.polling.interval {
            bail!(
                "Fetch timeout {:?} must be shorter than the polling interval {:?}",
                self.polling.fetch_timeout(),
                self.polling.interval
            );
        }
        if self.polling.fetch_timeout().is_zero() {
            bail!("Fetch timeout must be greater than zero");
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    if let Some(var_name) = missing {
        bail!("Missing environment variable: {}", var_name);
    }
    Ok(result.into_owned())
}

/// Parses durations such as `500ms`, `30s`, `5m`, `1h` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let re = Regex::new(r"(\d+)(ms|s|m|h)").context("Invalid regex pattern for durations")?;
    let trimmed = input.trim();

    let mut total = Duration::ZERO;
    let mut consumed = 0;
    for caps in re.captures_iter(trimmed) {
        let whole = caps.get(0).context("Empty duration match")?;
        if whole.start() != consumed {
            bail!("Invalid duration: {}", input);
        }
        consumed = whole.end();

        let value: u64 = caps[1]
            .parse()
            .with_context(|| format!("Invalid duration: {}", input))?;
        let part = match &caps[2] {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            _ => value.checked_mul(60 * 60).map(Duration::from_secs),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .with_context(|| format!("Invalid duration: {}", input))?;
    }

    if consumed == 0 || consumed != trimmed.len() {
        bail!("Invalid duration: {}", input);
    }
    Ok(total)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_duration(&value).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) => parse_duration(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
