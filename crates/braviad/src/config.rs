//! Configuration parsing and structures.
//!
//! braviad reads its settings from three layers, highest precedence first:
//! - Command-line flags
//! - Environment variables (`MQTT_HOST`, `BRAVIA_HOSTS`, ...), declared on the same clap flags
//! - An optional TOML file passed with `--config`
//!
//! Every layer is turned into a [`PartialConfig`]; the partials are merged
//! first-wins and then validated into a [`Config`].

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

pub const DEFAULT_TOPIC_ROOT: &str = "bravia";
pub const DEFAULT_PSK: &str = "0000";
pub const DEFAULT_MQTT_PORT: u16 = 1883;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_COMMAND_INTERVAL_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// What a failed power poll publishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerFailurePolicy {
    /// Publish `power: false`, treating an unreachable TV as switched off.
    #[default]
    Off,
    /// Leave the last published power state in place.
    Keep,
}

/// Command line interface. Every flag can also be supplied through the
/// environment variable named next to it.
#[derive(Debug, Default, Parser)]
#[command(
    name = "braviad",
    version,
    about = "Publish Sony Bravia TV state to MQTT and forward remote commands"
)]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long, env = "BRAVIAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// MQTT broker: host, host:port or mqtt://host:port
    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Comma separated list of TV hostnames or addresses
    #[arg(long = "hosts", env = "BRAVIA_HOSTS", value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Topic prefix; each TV publishes below `<root>/<host>`
    #[arg(long, env = "TOPIC_ROOT")]
    pub topic_root: Option<String>,

    /// Pre-shared key configured on the TVs
    #[arg(long, env = "BRAVIA_PSK", hide_env_values = true)]
    pub psk: Option<String>,

    #[arg(long, env = "LOG_LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    fn to_partial(&self) -> PartialConfig {
        let hosts = (!self.hosts.is_empty()).then(|| self.hosts.clone());
        PartialConfig {
            mqtt: PartialMqttConfig {
                host: self.mqtt_host.clone(),
                username: self.mqtt_username.clone(),
                password: self.mqtt_password.clone(),
            },
            bravia: PartialBraviaConfig {
                hosts,
                topic_root: self.topic_root.clone(),
                psk: self.psk.clone(),
                ..Default::default()
            },
            logging: PartialLoggingConfig {
                level: self.log_level,
            },
        }
    }
}

/// One configuration layer, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    #[serde(default)]
    pub mqtt: PartialMqttConfig,
    #[serde(default)]
    pub bravia: PartialBraviaConfig,
    #[serde(default)]
    pub logging: PartialLoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialMqttConfig {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialBraviaConfig {
    pub hosts: Option<Vec<String>>,
    pub topic_root: Option<String>,
    pub psk: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub command_interval_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub power_failure: Option<PowerFailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialLoggingConfig {
    pub level: Option<LogLevel>,
}

impl PartialConfig {
    /// Load a configuration layer from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Merge two layers. Values already set in `self` win.
    pub fn merge(self, other: PartialConfig) -> PartialConfig {
        PartialConfig {
            mqtt: PartialMqttConfig {
                host: self.mqtt.host.or(other.mqtt.host),
                username: self.mqtt.username.or(other.mqtt.username),
                password: self.mqtt.password.or(other.mqtt.password),
            },
            bravia: PartialBraviaConfig {
                hosts: self.bravia.hosts.or(other.bravia.hosts),
                topic_root: self.bravia.topic_root.or(other.bravia.topic_root),
                psk: self.bravia.psk.or(other.bravia.psk),
                poll_interval_ms: self.bravia.poll_interval_ms.or(other.bravia.poll_interval_ms),
                command_interval_ms: self
                    .bravia
                    .command_interval_ms
                    .or(other.bravia.command_interval_ms),
                request_timeout_ms: self
                    .bravia
                    .request_timeout_ms
                    .or(other.bravia.request_timeout_ms),
                power_failure: self.bravia.power_failure.or(other.bravia.power_failure),
            },
            logging: PartialLoggingConfig {
                level: self.logging.level.or(other.logging.level),
            },
        }
    }
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub bravia: BraviaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker hostname or IP address
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BraviaConfig {
    /// One device instance is started per host
    pub hosts: Vec<String>,
    pub topic_root: String,
    pub psk: String,
    pub poll_interval: Duration,
    pub command_interval: Duration,
    pub request_timeout: Duration,
    pub power_failure: PowerFailurePolicy,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl Config {
    /// Resolve the configuration from the command line, the environment and
    /// the optional config file named by `--config`.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => PartialConfig::from_file(path)?,
            None => PartialConfig::default(),
        };
        Self::from_partial(cli.to_partial().merge(file))
    }

    /// Validate a merged configuration, filling in defaults
    pub fn from_partial(partial: PartialConfig) -> Result<Self, ConfigError> {
        let host = partial
            .mqtt
            .host
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::Missing("MQTT_HOST"))?;
        let (broker, port) = parse_broker(&host)?;

        // A host listed twice would run two instances with one MQTT client id
        let mut hosts: Vec<String> = Vec::new();
        for host in partial.bravia.hosts.unwrap_or_default() {
            let host = host.trim();
            if !host.is_empty() && !hosts.iter().any(|h| h == host) {
                hosts.push(host.to_string());
            }
        }
        if hosts.is_empty() {
            return Err(ConfigError::Missing("BRAVIA_HOSTS"));
        }

        let bravia = BraviaConfig {
            hosts,
            topic_root: partial
                .bravia
                .topic_root
                .unwrap_or_else(|| DEFAULT_TOPIC_ROOT.to_string()),
            psk: partial
                .bravia
                .psk
                .unwrap_or_else(|| DEFAULT_PSK.to_string()),
            poll_interval: millis(
                "poll_interval_ms",
                partial.bravia.poll_interval_ms,
                DEFAULT_POLL_INTERVAL_MS,
            )?,
            command_interval: millis(
                "command_interval_ms",
                partial.bravia.command_interval_ms,
                DEFAULT_COMMAND_INTERVAL_MS,
            )?,
            request_timeout: millis(
                "request_timeout_ms",
                partial.bravia.request_timeout_ms,
                DEFAULT_REQUEST_TIMEOUT_MS,
            )?,
            power_failure: partial.bravia.power_failure.unwrap_or_default(),
        };

        Ok(Self {
            mqtt: MqttConfig {
                broker,
                port,
                username: partial.mqtt.username,
                password: partial.mqtt.password,
            },
            bravia,
            logging: LoggingConfig {
                level: partial.logging.level.unwrap_or_default(),
            },
        })
    }
}

fn millis(key: &'static str, value: Option<u64>, default: u64) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

/// Split an `MQTT_HOST` value into broker host and port.
fn parse_broker(value: &str) -> Result<(String, u16), ConfigError> {
    let trimmed = value.trim();
    let without_scheme = trimmed
        .strip_prefix("mqtt://")
        .or_else(|| trimmed.strip_prefix("tcp://"))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    match without_scheme.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "MQTT_HOST",
                reason: format!("invalid port in '{}'", value),
            })?;
            if host.is_empty() {
                return Err(ConfigError::Missing("MQTT_HOST"));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((without_scheme.to_string(), DEFAULT_MQTT_PORT)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("ENV variable {0} not found")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn required() -> PartialConfig {
        PartialConfig {
            mqtt: PartialMqttConfig {
                host: Some("broker.local".to_string()),
                ..Default::default()
            },
            bravia: PartialBraviaConfig {
                hosts: Some(vec!["tv-living".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_partial(required()).unwrap();
        assert_eq!(config.mqtt.broker, "broker.local");
        assert_eq!(config.mqtt.port, DEFAULT_MQTT_PORT);
        assert_eq!(config.bravia.topic_root, "bravia");
        assert_eq!(config.bravia.psk, "0000");
        assert_eq!(config.bravia.poll_interval, Duration::from_millis(500));
        assert_eq!(config.bravia.command_interval, Duration::from_millis(500));
        assert_eq!(config.bravia.power_failure, PowerFailurePolicy::Off);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_missing_mqtt_host() {
        let mut partial = required();
        partial.mqtt.host = None;
        let err = Config::from_partial(partial).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("MQTT_HOST")));
        assert_eq!(err.to_string(), "ENV variable MQTT_HOST not found");
    }

    #[test]
    fn test_missing_hosts_ignores_empty_entries() {
        let mut partial = required();
        partial.bravia.hosts = Some(vec!["".to_string(), "  ".to_string()]);
        let err = Config::from_partial(partial).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BRAVIA_HOSTS")));
    }

    #[test]
    fn test_duplicate_hosts_collapse() {
        let mut partial = required();
        partial.bravia.hosts = Some(vec![
            "tv1".to_string(),
            "tv2".to_string(),
            " tv1 ".to_string(),
        ]);
        let config = Config::from_partial(partial).unwrap();
        assert_eq!(config.bravia.hosts, vec!["tv1", "tv2"]);
    }

    #[test]
    fn test_parse_broker_forms() {
        assert_eq!(
            parse_broker("mqtt://robodomo").unwrap(),
            ("robodomo".to_string(), 1883)
        );
        assert_eq!(
            parse_broker("10.0.0.2:1884").unwrap(),
            ("10.0.0.2".to_string(), 1884)
        );
        assert_eq!(
            parse_broker("tcp://broker:8883/").unwrap(),
            ("broker".to_string(), 8883)
        );
        assert!(matches!(
            parse_broker("broker:notaport"),
            Err(ConfigError::Invalid { key: "MQTT_HOST", .. })
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut partial = required();
        partial.bravia.poll_interval_ms = Some(0);
        let err = Config::from_partial(partial).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "poll_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_merge_first_wins() {
        let cli = PartialConfig {
            bravia: PartialBraviaConfig {
                topic_root: Some("tv".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut file = required();
        file.bravia.topic_root = Some("bravia-file".to_string());
        file.bravia.poll_interval_ms = Some(1000);

        let config = Config::from_partial(cli.merge(file)).unwrap();
        assert_eq!(config.bravia.topic_root, "tv");
        assert_eq!(config.bravia.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.mqtt.broker, "broker.local");
    }

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [mqtt]
            host = "mqtt://broker:1883"
            username = "braviad"

            [bravia]
            hosts = ["tv-living", "tv-bedroom"]
            psk = "1234"
            command_interval_ms = 250
            power_failure = "keep"

            [logging]
            level = "debug"
            "#
        )
        .unwrap();

        let partial = PartialConfig::from_file(file.path()).unwrap();
        let config = Config::from_partial(partial).unwrap();
        assert_eq!(config.bravia.hosts, vec!["tv-living", "tv-bedroom"]);
        assert_eq!(config.bravia.psk, "1234");
        assert_eq!(config.bravia.command_interval, Duration::from_millis(250));
        assert_eq!(config.bravia.power_failure, PowerFailurePolicy::Keep);
        assert_eq!(config.mqtt.username.as_deref(), Some("braviad"));
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<PartialConfig, _> = toml::from_str(
            r#"
            [bravia]
            hostz = ["tv"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_hosts_split_on_comma() {
        let cli = Cli::try_parse_from([
            "braviad",
            "--mqtt-host",
            "broker",
            "--hosts",
            "tv1,tv2",
        ])
        .unwrap();
        let config = Config::from_partial(cli.to_partial()).unwrap();
        assert_eq!(config.bravia.hosts, vec!["tv1", "tv2"]);
    }
}
