use std::path::PathBuf;

use serde::Serialize;
use url::Url;

use crate::bucket::Anchor;
use crate::error::{ConsolidateError, Result};
use crate::util::{env_i32, env_optional, env_u32, env_u64, split_command_line};

pub(crate) const DEFAULT_MANIFEST: &str = "manifest.json";
pub(crate) const DEFAULT_IA_ITEM_ID: &str = "test1_202512";
pub(crate) const DEFAULT_VALIDATE_COMMAND: &str = "node src/reCheck.js";
pub(crate) const DEFAULT_LONG_TERM_BASE: &str = "https://archive.org/download/";
pub(crate) const DEFAULT_MONTHLY_THRESHOLD: u64 = 32;
pub(crate) const DEFAULT_YEARLY_THRESHOLD: u64 = 13;
pub(crate) const DEFAULT_GRACE_DAYS: u64 = 2;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Settings {
    pub(crate) manifest: PathBuf,
    /// Directory holding segment files; external tools run from here.
    pub(crate) work_dir: PathBuf,
    pub(crate) ia_item_id: String,
    #[serde(skip)]
    pub(crate) ia_email: Option<String>,
    #[serde(skip)]
    pub(crate) ia_password: Option<String>,
    pub(crate) anchor: Anchor,
    pub(crate) monthly_threshold: usize,
    pub(crate) yearly_threshold: usize,
    pub(crate) grace_days: u32,
    pub(crate) validate_command: Vec<String>,
    pub(crate) git_remote: String,
    pub(crate) command_wrapper: Option<Vec<String>>,
    pub(crate) long_term_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            work_dir: PathBuf::from("."),
            ia_item_id: DEFAULT_IA_ITEM_ID.to_string(),
            ia_email: None,
            ia_password: None,
            anchor: Anchor::default(),
            monthly_threshold: DEFAULT_MONTHLY_THRESHOLD as usize,
            yearly_threshold: DEFAULT_YEARLY_THRESHOLD as usize,
            grace_days: DEFAULT_GRACE_DAYS as u32,
            validate_command: vec!["node".to_string(), "src/reCheck.js".to_string()],
            git_remote: "origin".to_string(),
            command_wrapper: None,
            long_term_base: DEFAULT_LONG_TERM_BASE.to_string(),
        }
    }
}

impl Settings {
    pub(crate) fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let anchor = Anchor {
            year: env_i32("BASE_YEAR", defaults.anchor.year)?,
            month: env_u32("BASE_MONTH", defaults.anchor.month)?,
            day: env_u32("BASE_DAY", defaults.anchor.day)?,
            hour: env_u32("BASE_HOUR", defaults.anchor.hour)?,
            minute: env_u32("BASE_MINUTE", defaults.anchor.minute)?,
            second: env_u32("BASE_SECOND", defaults.anchor.second)?,
        };
        let validate_command = match env_optional("VALIDATE_COMMAND") {
            Some(raw) => split_command_line(&raw).ok_or_else(|| {
                ConsolidateError::Config(format!("Invalid VALIDATE_COMMAND: '{raw}'"))
            })?,
            None => defaults.validate_command,
        };
        let command_wrapper = match env_optional("ROLLUP_COMMAND_WRAPPER") {
            Some(raw) => Some(split_command_line(&raw).ok_or_else(|| {
                ConsolidateError::Config(format!("Invalid ROLLUP_COMMAND_WRAPPER: '{raw}'"))
            })?),
            None => None,
        };

        let settings = Self {
            manifest: env_optional("MANIFEST").map(PathBuf::from).unwrap_or(defaults.manifest),
            work_dir: env_optional("ROLLUP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            ia_item_id: env_optional("IA_ITEM_ID").unwrap_or(defaults.ia_item_id),
            ia_email: env_optional("IA_EMAIL"),
            ia_password: env_optional("IA_PASSWORD"),
            anchor,
            monthly_threshold: env_usize("MONTHLY_THRESHOLD", DEFAULT_MONTHLY_THRESHOLD)?,
            yearly_threshold: env_usize("YEARLY_THRESHOLD", DEFAULT_YEARLY_THRESHOLD)?,
            grace_days: env_u32("GRACE_DAYS", defaults.grace_days)?,
            validate_command,
            git_remote: env_optional("GIT_REMOTE").unwrap_or(defaults.git_remote),
            command_wrapper,
            long_term_base: env_optional("LONG_TERM_BASE_URL").unwrap_or(defaults.long_term_base),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.anchor.validate()?;
        if self.monthly_threshold == 0 || self.yearly_threshold == 0 {
            return Err(ConsolidateError::Config(
                "promotion thresholds must be at least 1".into(),
            ));
        }
        if self.validate_command.is_empty() {
            return Err(ConsolidateError::Config("validation command is empty".into()));
        }
        if self.ia_item_id.trim().is_empty() {
            return Err(ConsolidateError::Config("IA_ITEM_ID is empty".into()));
        }
        self.yearly_url("probe")?;
        Ok(())
    }

    /// Identity/secret pair for the long-term store, when both are configured.
    pub(crate) fn long_term_credentials(&self) -> Option<(&str, &str)> {
        match (&self.ia_email, &self.ia_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Public download URL of `file_name` inside the configured item.
    pub(crate) fn yearly_url(&self, file_name: &str) -> Result<String> {
        let mut url = Url::parse(&self.long_term_base)
            .map_err(|e| ConsolidateError::Config(format!("Invalid long-term base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ConsolidateError::Config("long-term base URL cannot hold a path".into()))?
            .pop_if_empty()
            .push(&self.ia_item_id)
            .push(file_name);
        Ok(url.to_string())
    }
}

fn env_usize(name: &str, default: u64) -> Result<usize> {
    let value = env_u64(name, default)?;
    usize::try_from(value).map_err(|_| ConsolidateError::Config(format!("Invalid {name}: '{value}'")))
}
