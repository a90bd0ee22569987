use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::bucket::{format_raw, parse_raw};
use crate::error::{ConsolidateError, Result};

pub(crate) const SEGMENT_EXT: &str = "ndjson";
pub(crate) const COMPRESSED_EXT: &str = "ndjson.xz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Tier {
    Daily,
    Monthly,
    Yearly,
}

impl Tier {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted segment: `{endTimestamp}_{tier}_{startPost}_{endPost}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Descriptor {
    pub(crate) tier: Tier,
    pub(crate) end_timestamp: NaiveDateTime,
    pub(crate) start_post: u64,
    pub(crate) end_post: u64,
}

impl Descriptor {
    pub(crate) fn parse(name: &str, tier: Tier) -> Result<Self> {
        let invalid = || ConsolidateError::InvalidDescriptor {
            tier,
            name: name.to_string(),
        };
        let parts: Vec<&str> = name.split('_').collect();
        let [raw_ts, raw_tier, raw_start, raw_end] = parts.as_slice() else {
            return Err(invalid());
        };
        if *raw_tier != tier.as_str() {
            return Err(invalid());
        }
        let end_timestamp = parse_raw(raw_ts).map_err(|_| invalid())?;
        let start_post = parse_post(raw_start).ok_or_else(invalid)?;
        let end_post = parse_post(raw_end).ok_or_else(invalid)?;
        if start_post > end_post {
            return Err(invalid());
        }
        Ok(Self {
            tier,
            end_timestamp,
            start_post,
            end_post,
        })
    }

    pub(crate) fn name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            format_raw(self.end_timestamp),
            self.tier,
            self.start_post,
            self.end_post
        )
    }

    pub(crate) fn segment_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{SEGMENT_EXT}", self.name()))
    }

    pub(crate) fn compressed_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{COMPRESSED_EXT}", self.name()))
    }

    pub(crate) fn compressed_file_name(&self) -> String {
        format!("{}.{COMPRESSED_EXT}", self.name())
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn parse_post(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Leading zeros would make the name differ from the one written back.
    if raw.len() > 1 && raw.starts_with('0') {
        return None;
    }
    raw.parse().ok()
}

/// Checks that posts are contiguous and end timestamps strictly increase.
pub(crate) fn check_contiguous(tier: Tier, descriptors: &[Descriptor]) -> Result<()> {
    for pair in descriptors.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.end_post.checked_add(1) != Some(next.start_post) {
            return Err(ConsolidateError::ManifestInconsistent {
                tier,
                reason: format!("'{next}' does not continue posts after '{prev}'"),
            });
        }
        if next.end_timestamp <= prev.end_timestamp {
            return Err(ConsolidateError::ManifestInconsistent {
                tier,
                reason: format!("'{next}' does not end after '{prev}'"),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct YearlyEntry {
    pub(crate) name: String,
    pub(crate) url: String,
}

/// Sources whose promotion is persisted but whose releases and tags are not yet reaped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Retired {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) daily: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) monthly: Vec<String>,
}

impl Retired {
    pub(crate) fn is_empty(&self) -> bool {
        self.daily.is_empty() && self.monthly.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Manifest {
    #[serde(default)]
    pub(crate) daily: Vec<String>,
    #[serde(default)]
    pub(crate) monthly: Vec<String>,
    #[serde(default)]
    pub(crate) yearly: Vec<YearlyEntry>,
    #[serde(default, skip_serializing_if = "Retired::is_empty")]
    pub(crate) retired: Retired,
    /// Keys owned by the ingestion side, written back untouched.
    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    pub(crate) fn daily_descriptors(&self) -> Result<Vec<Descriptor>> {
        parse_all(&self.daily, Tier::Daily)
    }

    pub(crate) fn monthly_descriptors(&self) -> Result<Vec<Descriptor>> {
        parse_all(&self.monthly, Tier::Monthly)
    }

    /// Drains `daily` into a single new monthly descriptor.
    pub(crate) fn promote_daily(&mut self, monthly: &Descriptor) {
        let drained = std::mem::take(&mut self.daily);
        self.retired.daily.extend(drained);
        self.monthly.push(monthly.name());
    }

    /// Drains `monthly` into a single new yearly entry.
    pub(crate) fn promote_monthly(&mut self, entry: YearlyEntry) {
        let drained = std::mem::take(&mut self.monthly);
        self.retired.monthly.extend(drained);
        self.yearly.push(entry);
    }
}

fn parse_all(names: &[String], tier: Tier) -> Result<Vec<Descriptor>> {
    names.iter().map(|name| Descriptor::parse(name, tier)).collect()
}

/// Descriptor of the merged segment covering all of `sources`, closing at `closing`.
pub(crate) fn spanning(tier: Tier, sources: &[Descriptor], closing: NaiveDateTime) -> Option<Descriptor> {
    let first = sources.first()?;
    let last = sources.last()?;
    Some(Descriptor {
        tier,
        end_timestamp: closing,
        start_post: first.start_post,
        end_post: last.end_post,
    })
}
