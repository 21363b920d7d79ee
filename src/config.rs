//! Bot configuration.
//!
//! Loaded once at startup from a TOML file. Any problem here is fatal:
//! the caller is expected to log the error and exit before the poll loop
//! starts.

use crate::error::AppError;
use crate::services::gerrit_client::GerritClientConfig;
use crate::services::poll_loop::PollConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gerrit.toml";

/// Default list query: open changes I review but do not own.
pub const DEFAULT_QUERY: &str = "is:reviewer status:open -owner:self";

/// Default message posted with an automatic approval.
pub const DEFAULT_APPROVAL_MESSAGE: &str = "Gerrit-Bot: auto-approve (all reviewers +1)";

fn default_scheme() -> String {
    "https".to_string()
}

fn default_auth() -> String {
    "basic".to_string()
}

fn default_interval() -> String {
    "5m".to_string()
}

fn default_timeout() -> String {
    "30s".to_string()
}

fn default_query() -> String {
    DEFAULT_QUERY.to_string()
}

fn default_message() -> String {
    DEFAULT_APPROVAL_MESSAGE.to_string()
}

/// `[gerrit]` section: where and as whom to connect.
#[derive(Debug, Clone, Deserialize)]
pub struct GerritSection {
    /// Host name, optionally with port (`review.example.com:8443`).
    pub host: String,

    /// Account username; also the identity the bot votes as.
    pub user: String,

    /// HTTP password for the account.
    pub password: String,

    /// Username of the CI account whose Verified vote gates approval.
    #[serde(default)]
    pub ci: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// HTTP authentication scheme. Only `basic` is supported; Gerrit
    /// releases before 2.14 that accept only digest auth cannot be used.
    #[serde(default = "default_auth")]
    pub auth: String,
}

/// `[robot]` section: polling behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct RobotSection {
    /// Poll interval as a duration string (`5m`, `1h30m`, `90s`).
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Project partitions; one list query is issued per project.
    #[serde(default, alias = "project")]
    pub projects: Vec<String>,

    #[serde(default = "default_query")]
    pub query: String,

    #[serde(default = "default_message")]
    pub message: String,

    /// HTTP request timeout as a duration string.
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Address of the status listener (`127.0.0.1:6060`, `:6060`); empty
    /// disables it.
    #[serde(default, alias = "profile")]
    pub status_addr: String,
}

impl Default for RobotSection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            projects: Vec::new(),
            query: default_query(),
            message: default_message(),
            timeout: default_timeout(),
            status_addr: String::new(),
        }
    }
}

/// Complete bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub gerrit: GerritSection,

    #[serde(default)]
    pub robot: RobotSection,
}

impl BotConfig {
    /// Read and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, AppError> {
        let config: BotConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.gerrit.host.trim().is_empty() {
            return Err(AppError::config_field("host must not be empty", "gerrit.host"));
        }
        if self.gerrit.user.trim().is_empty() {
            return Err(AppError::config_field("user must not be empty", "gerrit.user"));
        }
        if self.gerrit.scheme != "https" && self.gerrit.scheme != "http" {
            return Err(AppError::config_field(
                format!("unsupported scheme '{}'", self.gerrit.scheme),
                "gerrit.scheme",
            ));
        }
        match self.gerrit.auth.as_str() {
            "basic" => {}
            "digest" => {
                return Err(AppError::config_field(
                    "digest authentication is not supported, use an HTTP password with basic auth",
                    "gerrit.auth",
                ))
            }
            other => {
                return Err(AppError::config_field(
                    format!("unsupported auth '{}'", other),
                    "gerrit.auth",
                ))
            }
        }
        if self.robot.projects.iter().any(|p| p.trim().is_empty()) {
            return Err(AppError::config_field(
                "project names must not be empty",
                "robot.projects",
            ));
        }
        // Surface duration typos at load time, not on first use.
        self.interval()?;
        self.timeout()?;
        Ok(())
    }

    /// Parsed poll interval.
    pub fn interval(&self) -> Result<Duration, AppError> {
        parse_interval(&self.robot.interval)
            .map_err(|e| AppError::config_field(e.to_string(), "robot.interval"))
    }

    /// Parsed HTTP timeout.
    pub fn timeout(&self) -> Result<Duration, AppError> {
        parse_interval(&self.robot.timeout)
            .map_err(|e| AppError::config_field(e.to_string(), "robot.timeout"))
    }

    /// Bind address of the status listener, if one is configured.
    ///
    /// A bare `:port` binds every interface.
    pub fn status_addr(&self) -> Option<String> {
        let addr = self.robot.status_addr.trim();
        if addr.is_empty() {
            None
        } else if addr.starts_with(':') {
            Some(format!("0.0.0.0{}", addr))
        } else {
            Some(addr.to_string())
        }
    }

    /// Settings for the Gerrit REST client.
    pub fn client_config(&self) -> Result<GerritClientConfig, AppError> {
        Ok(GerritClientConfig {
            base_url: format!("{}://{}", self.gerrit.scheme, self.gerrit.host),
            user: self.gerrit.user.clone(),
            password: self.gerrit.password.clone(),
            timeout: self.timeout()?,
        })
    }

    /// Settings for the poll loop.
    pub fn poll_config(&self) -> Result<PollConfig, AppError> {
        Ok(PollConfig {
            interval: self.interval()?,
            self_identity: self.gerrit.user.clone(),
            ci_identity: self.gerrit.ci.clone(),
            query: self.robot.query.clone(),
            projects: self.robot.projects.clone(),
            approval_message: self.robot.message.clone(),
            verbose: false,
        })
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "\u{b5}s" | "\u{3bc}s" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60_000_000_000),
        "h" => Some(3_600_000_000_000),
        _ => None,
    }
}

/// Parse a duration string such as `5m`, `1h30m`, `1.5m` or `250ms`.
///
/// The string is an optional `+` followed by `<decimal><unit>` pairs with
/// units `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Negative and zero
/// totals are rejected since the loop would spin.
pub fn parse_interval(input: &str) -> Result<Duration, AppError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AppError::config("empty duration"));
    }
    let invalid = || AppError::config(format!("invalid duration '{}'", input));
    let too_large = || AppError::config(format!("duration '{}' is too large", input));

    let mut total: u128 = 0;
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest.is_empty() {
        return Err(invalid());
    }
    while !rest.is_empty() {
        let int_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (int_part, after) = rest.split_at(int_end);
        let (frac_part, after) = match after.strip_prefix('.') {
            Some(tail) => {
                let end = tail
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(tail.len());
                tail.split_at(end)
            }
            None => ("", after),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_end);
        let scale = match unit {
            "" => {
                return Err(AppError::config(format!(
                    "missing unit in duration '{}'",
                    input
                )))
            }
            unit => unit_nanos(unit).ok_or_else(|| {
                AppError::config(format!("unknown unit '{}' in duration '{}'", unit, input))
            })?,
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| too_large())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(too_large)?;
        if !frac_part.is_empty() {
            // Digits past nanosecond precision are dropped
            let digits = &frac_part[..frac_part.len().min(18)];
            let frac: u128 = digits.parse().map_err(|_| invalid())?;
            nanos += frac * scale / 10u128.pow(digits.len() as u32);
        }
        total = total.checked_add(nanos).ok_or_else(too_large)?;
        rest = after;
    }

    if total == 0 {
        return Err(AppError::config(format!("duration '{}' must be positive", input)));
    }
    let secs = u64::try_from(total / 1_000_000_000).map_err(|_| too_large())?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}
