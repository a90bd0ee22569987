//! The rollup state machine: daily publication, daily → monthly and
//! monthly → yearly promotion, and completion of promotions interrupted after
//! the manifest was advanced.
//!
//! Every promotion persists the advanced manifest *before* uploading the new
//! artifact. A run that dies in between leaves the source tier drained, the new
//! descriptor listed and the drained names under `retired`; the next run finds
//! that state and finishes upload, tagging and cleanup without merging again.
//! These existence checks make re-invocation safe. They do not make concurrent
//! invocations safe.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{info, warn};

use crate::bucket::{closing_instant, format_raw, Anchor, Granularity};
use crate::capabilities::{
    Backends, CompressionService, LongTermStore, ReleaseStore, ValidationService, VersionControl,
};
use crate::config::Settings;
use crate::error::{CommandError, ConsolidateError, Result};
use crate::manifest::ManifestStore;
use crate::merger::SegmentMerger;
use crate::reaper::{ReapReport, RetentionReaper};
use crate::types::{check_contiguous, spanning, Descriptor, Manifest, Tier, YearlyEntry};

// ── Decisions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TriggerReason {
    Threshold,
    Alignment,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Threshold => "count threshold",
            Self::Alignment => "anchor alignment",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Idle,
    /// Triggered, but the grace period after `closing` has not elapsed.
    Waiting { until: NaiveDateTime },
    Promote {
        closing: NaiveDateTime,
        reason: TriggerReason,
    },
}

fn trigger(
    sources: &[Descriptor],
    threshold: usize,
    aligned: impl Fn(NaiveDateTime) -> bool,
) -> Option<(NaiveDateTime, TriggerReason)> {
    let last = sources.last()?;
    let closing = closing_instant(last.end_timestamp);
    if sources.len() >= threshold {
        Some((closing, TriggerReason::Threshold))
    } else if aligned(closing) {
        Some((closing, TriggerReason::Alignment))
    } else {
        None
    }
}

pub(crate) fn monthly_decision(anchor: &Anchor, threshold: usize, daily: &[Descriptor]) -> Decision {
    match trigger(daily, threshold, |c| anchor.aligned_monthly(c)) {
        Some((closing, reason)) => Decision::Promote { closing, reason },
        None => Decision::Idle,
    }
}

pub(crate) fn yearly_decision(
    anchor: &Anchor,
    threshold: usize,
    grace_days: u32,
    monthly: &[Descriptor],
    now: NaiveDateTime,
) -> Decision {
    let Some((closing, reason)) = trigger(monthly, threshold, |c| anchor.aligned_yearly(c)) else {
        return Decision::Idle;
    };
    let until = closing + TimeDelta::days(i64::from(grace_days));
    if now < until {
        return Decision::Waiting { until };
    }
    Decision::Promote { closing, reason }
}

// ── Outcomes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub(crate) enum StageOutcome {
    Idle,
    AlreadyPublished {
        name: String,
    },
    Published {
        name: String,
    },
    Waiting {
        until: String,
    },
    Promoted {
        name: String,
        sources: usize,
        trigger: TriggerReason,
    },
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("nothing to do"),
            Self::AlreadyPublished { name } => write!(f, "'{name}' already published"),
            Self::Published { name } => write!(f, "published '{name}'"),
            Self::Waiting { until } => write!(f, "waiting for grace period to end at {until}"),
            Self::Promoted {
                name,
                sources,
                trigger,
            } => write!(f, "promoted {sources} segments into '{name}' ({trigger})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StageReport {
    /// Interrupted promotion completed before evaluating the trigger.
    pub(crate) resumed: Option<String>,
    pub(crate) reaped: ReapReport,
    pub(crate) outcome: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RunReport {
    pub(crate) daily: StageOutcome,
    pub(crate) monthly: StageReport,
    pub(crate) yearly: StageReport,
}

// ── Engine ──────────────────────────────────────────────────────────────

pub(crate) struct Engine<C, V, R, L, G> {
    settings: Settings,
    store: ManifestStore,
    backends: Backends<C, V, R, L, G>,
}

impl<C, V, R, L, G> Engine<C, V, R, L, G>
where
    C: CompressionService,
    V: ValidationService,
    R: ReleaseStore,
    L: LongTermStore,
    G: VersionControl,
{
    pub(crate) fn new(settings: Settings, backends: Backends<C, V, R, L, G>) -> Self {
        let store = ManifestStore::new(settings.manifest.clone());
        Self {
            settings,
            store,
            backends,
        }
    }

    #[cfg(test)]
    pub(crate) fn backends(&self) -> &Backends<C, V, R, L, G> {
        &self.backends
    }

    /// Daily publication, then monthly, then yearly. The first fatal error ends the run.
    pub(crate) fn run(&self, now: NaiveDateTime) -> Result<RunReport> {
        let daily = self.publish_daily()?;
        let monthly = self.consolidate_monthly()?;
        let yearly = self.consolidate_yearly(now)?;
        Ok(RunReport {
            daily,
            monthly,
            yearly,
        })
    }

    // ── daily ───────────────────────────────────────────────────────────

    pub(crate) fn publish_daily(&self) -> Result<StageOutcome> {
        let manifest = self.store.load()?;
        let Some(last) = manifest.daily.last() else {
            return Ok(StageOutcome::Idle);
        };
        let daily = Descriptor::parse(last, Tier::Daily)?;
        let name = daily.name();
        if self.release_exists(&name)? {
            info!(release = %name, "daily release already exists, skipping upload");
            return Ok(StageOutcome::AlreadyPublished { name });
        }

        info!(release = %name, "preparing daily archive upload");
        let work_dir = &self.settings.work_dir;
        let segment = daily.segment_path(work_dir);
        let compressed = if segment.is_file() {
            info!(file = %segment.display(), "compressing daily file");
            self.backends
                .compression
                .compress(&segment)
                .map_err(|source| ConsolidateError::CompressionFailed {
                    action: "compress",
                    path: segment.clone(),
                    source,
                })?
        } else {
            let compressed = daily.compressed_path(work_dir);
            if !compressed.is_file() {
                return Err(ConsolidateError::PreconditionMissing {
                    what: "daily segment file",
                    path: segment,
                });
            }
            compressed
        };

        self.record_in_vcs(&name)?;

        let label = self.settings.anchor.label_at(daily.end_timestamp, Granularity::Day);
        let title = format!(
            "{label} daily archive ({} - {})",
            daily.start_post, daily.end_post
        );
        let notes = format!(
            "Automated daily scrape of posts for {label}, covering posts {} to {}.",
            daily.start_post, daily.end_post
        );
        self.create_release(&name, &compressed, &title, &notes)?;
        info!(release = %name, "daily archive uploaded");
        Ok(StageOutcome::Published { name })
    }

    // ── monthly ─────────────────────────────────────────────────────────

    pub(crate) fn consolidate_monthly(&self) -> Result<StageReport> {
        let mut manifest = self.store.load()?;
        let resumed = self.resume_monthly(&manifest)?;
        let mut reaped = self.reap_retired(&mut manifest, Tier::Daily)?;

        let daily = manifest.daily_descriptors()?;
        let (closing, reason) = match monthly_decision(
            &self.settings.anchor,
            self.settings.monthly_threshold,
            &daily,
        ) {
            Decision::Promote { closing, reason } => (closing, reason),
            Decision::Idle | Decision::Waiting { .. } => {
                return Ok(StageReport {
                    resumed,
                    reaped,
                    outcome: StageOutcome::Idle,
                });
            }
        };
        check_contiguous(Tier::Daily, &daily)?;
        let Some(monthly) = spanning(Tier::Monthly, &daily, closing) else {
            return Ok(StageReport {
                resumed,
                reaped,
                outcome: StageOutcome::Idle,
            });
        };
        info!(
            count = daily.len(),
            trigger = %reason,
            archive = %monthly,
            "consolidating daily archives into a monthly archive"
        );

        let archive = self.merger().merge(&monthly, &daily)?;
        info!(
            archive = %monthly,
            merged = %archive.merged.display(),
            compressed = %archive.compressed.display(),
            bytes = archive.bytes,
            blake3 = %archive.digest,
            "monthly archive validated and compressed"
        );

        manifest.promote_daily(&monthly);
        self.store.save(&manifest)?;

        self.publish_monthly(&monthly)?;
        let now_reaped = self.reap_retired(&mut manifest, Tier::Daily)?;
        reaped.attempted += now_reaped.attempted;
        reaped.warnings += now_reaped.warnings;

        info!(archive = %monthly, "monthly consolidation complete");
        Ok(StageReport {
            resumed,
            reaped,
            outcome: StageOutcome::Promoted {
                name: monthly.name(),
                sources: daily.len(),
                trigger: reason,
            },
        })
    }

    /// Publishes the newest monthly descriptor if a previous run advanced the
    /// manifest but stopped before its release was created.
    fn resume_monthly(&self, manifest: &Manifest) -> Result<Option<String>> {
        let Some(last) = manifest.monthly.last() else {
            return Ok(None);
        };
        let just_promoted = manifest.daily.is_empty() || !manifest.retired.daily.is_empty();
        if !just_promoted {
            return Ok(None);
        }
        let monthly = Descriptor::parse(last, Tier::Monthly)?;
        if !self.publish_monthly(&monthly)? {
            return Ok(None);
        }
        info!(archive = %monthly, "completed interrupted monthly promotion");
        Ok(Some(monthly.name()))
    }

    /// Commits, tags and releases `monthly` unless its release already exists.
    fn publish_monthly(&self, monthly: &Descriptor) -> Result<bool> {
        let name = monthly.name();
        if self.release_exists(&name)? {
            return Ok(false);
        }
        let compressed = monthly.compressed_path(&self.settings.work_dir);
        if !compressed.is_file() {
            return Err(ConsolidateError::PreconditionMissing {
                what: "compressed monthly archive",
                path: compressed,
            });
        }
        self.record_in_vcs(&name)?;

        info!(release = %name, "uploading monthly archive");
        let label = self
            .settings
            .anchor
            .label_at(monthly.end_timestamp, Granularity::Month);
        let title = format!(
            "{label} monthly archive ({} - {})",
            monthly.start_post, monthly.end_post
        );
        let notes = format!(
            "Automated consolidation of posts for {label}, covering posts {} to {}.",
            monthly.start_post, monthly.end_post
        );
        self.create_release(&name, &compressed, &title, &notes)?;
        Ok(true)
    }

    // ── yearly ──────────────────────────────────────────────────────────

    pub(crate) fn consolidate_yearly(&self, now: NaiveDateTime) -> Result<StageReport> {
        let mut manifest = self.store.load()?;
        let resumed = self.resume_yearly(&manifest)?;
        let mut reaped = self.reap_retired(&mut manifest, Tier::Monthly)?;

        let monthly = manifest.monthly_descriptors()?;
        let (closing, reason) = match yearly_decision(
            &self.settings.anchor,
            self.settings.yearly_threshold,
            self.settings.grace_days,
            &monthly,
            now,
        ) {
            Decision::Promote { closing, reason } => (closing, reason),
            Decision::Waiting { until } => {
                info!(until = %until, "yearly consolidation due, waiting for archives to settle");
                return Ok(StageReport {
                    resumed,
                    reaped,
                    outcome: StageOutcome::Waiting {
                        until: format_raw(until),
                    },
                });
            }
            Decision::Idle => {
                return Ok(StageReport {
                    resumed,
                    reaped,
                    outcome: StageOutcome::Idle,
                });
            }
        };
        check_contiguous(Tier::Monthly, &monthly)?;
        let Some(yearly) = spanning(Tier::Yearly, &monthly, closing) else {
            return Ok(StageReport {
                resumed,
                reaped,
                outcome: StageOutcome::Idle,
            });
        };

        self.ensure_long_term_auth()?;

        info!(
            count = monthly.len(),
            trigger = %reason,
            archive = %yearly,
            "consolidating monthly archives into a yearly archive"
        );
        let archive = self.merger().merge(&yearly, &monthly)?;
        info!(
            archive = %yearly,
            merged = %archive.merged.display(),
            compressed = %archive.compressed.display(),
            bytes = archive.bytes,
            blake3 = %archive.digest,
            "yearly archive validated and compressed"
        );

        let url = self.settings.yearly_url(&yearly.compressed_file_name())?;
        manifest.promote_monthly(YearlyEntry {
            name: yearly.name(),
            url,
        });
        self.store.save(&manifest)?;

        self.publish_yearly(&yearly)?;
        let now_reaped = self.reap_retired(&mut manifest, Tier::Monthly)?;
        reaped.attempted += now_reaped.attempted;
        reaped.warnings += now_reaped.warnings;

        info!(archive = %yearly, "yearly consolidation complete");
        Ok(StageReport {
            resumed,
            reaped,
            outcome: StageOutcome::Promoted {
                name: yearly.name(),
                sources: monthly.len(),
                trigger: reason,
            },
        })
    }

    /// Finishes the newest yearly entry if it was never tagged.
    fn resume_yearly(&self, manifest: &Manifest) -> Result<Option<String>> {
        let Some(last) = manifest.yearly.last() else {
            return Ok(None);
        };
        let just_promoted = manifest.monthly.is_empty() || !manifest.retired.monthly.is_empty();
        if !just_promoted {
            return Ok(None);
        }
        let yearly = Descriptor::parse(&last.name, Tier::Yearly)?;
        let name = yearly.name();
        let tagged = self
            .backends
            .vcs
            .tag_exists(&name)
            .map_err(vcs_error("tag lookup", &name))?;
        if tagged {
            return Ok(None);
        }
        self.ensure_long_term_auth()?;
        self.publish_yearly(&yearly)?;
        info!(archive = %yearly, "completed interrupted yearly promotion");
        Ok(Some(name))
    }

    /// Uploads `yearly` unless the item already holds it, then commits and tags.
    fn publish_yearly(&self, yearly: &Descriptor) -> Result<()> {
        let item = &self.settings.ia_item_id;
        let file_name = yearly.compressed_file_name();
        let store = &self.backends.long_term;
        let listed = store
            .list_objects(item)
            .map_err(|source| ConsolidateError::RemoteUnavailable {
                stage: "long-term listing",
                name: item.clone(),
                source,
            })?;
        if listed.contains(&file_name) {
            info!(file = %file_name, item = %item, "yearly archive already in long-term store");
        } else {
            let compressed = yearly.compressed_path(&self.settings.work_dir);
            if !compressed.is_file() {
                return Err(ConsolidateError::PreconditionMissing {
                    what: "compressed yearly archive",
                    path: compressed,
                });
            }
            info!(file = %file_name, item = %item, "uploading yearly archive to long-term store");
            store
                .upload(item, &compressed)
                .map_err(|source| ConsolidateError::RemoteUnavailable {
                    stage: "long-term upload",
                    name: file_name.clone(),
                    source,
                })?;
        }
        self.record_in_vcs(&yearly.name())
    }

    fn ensure_long_term_auth(&self) -> Result<()> {
        let store = &self.backends.long_term;
        let check = || {
            store
                .is_authenticated()
                .map_err(|source| ConsolidateError::RemoteUnavailable {
                    stage: "long-term identity check",
                    name: self.settings.ia_item_id.clone(),
                    source,
                })
        };
        if check()? {
            return Ok(());
        }
        let Some((identity, secret)) = self.settings.long_term_credentials() else {
            return Err(ConsolidateError::StoreUnauthenticated(
                "no stored identity; set IA_EMAIL and IA_PASSWORD or run 'ia configure'".into(),
            ));
        };
        info!("configuring long-term store credentials");
        store
            .authenticate(identity, secret)
            .map_err(|e| ConsolidateError::StoreUnauthenticated(format!("configuration failed: {e}")))?;
        if !check()? {
            return Err(ConsolidateError::StoreUnauthenticated(
                "configuration could not be verified".into(),
            ));
        }
        info!("long-term store configured");
        Ok(())
    }

    // ── shared steps ────────────────────────────────────────────────────

    fn merger(&self) -> SegmentMerger<'_, C, V, R> {
        SegmentMerger {
            compression: &self.backends.compression,
            validation: &self.backends.validation,
            releases: &self.backends.releases,
            work_dir: &self.settings.work_dir,
        }
    }

    fn release_exists(&self, name: &str) -> Result<bool> {
        self.backends
            .releases
            .exists(name)
            .map_err(|source| ConsolidateError::RemoteUnavailable {
                stage: "release lookup",
                name: name.to_string(),
                source,
            })
    }

    fn create_release(&self, name: &str, file: &std::path::Path, title: &str, notes: &str) -> Result<()> {
        self.backends
            .releases
            .create(name, file, title, notes)
            .map_err(|source| ConsolidateError::RemoteUnavailable {
                stage: "release create",
                name: name.to_string(),
                source,
            })
    }

    /// Commits the manifest with `name` as message and tags it, skipping either
    /// step when it is already recorded.
    fn record_in_vcs(&self, name: &str) -> Result<()> {
        let vcs = &self.backends.vcs;
        let manifest_path = self.manifest_path_for_vcs();
        if !vcs.has_commit_message(name).map_err(vcs_error("log", name))? {
            vcs.commit(&[manifest_path.as_path()], name)
                .map_err(vcs_error("commit", name))?;
            vcs.push().map_err(vcs_error("push", name))?;
        }
        if !vcs.tag_exists(name).map_err(vcs_error("tag lookup", name))? {
            vcs.tag(name).map_err(vcs_error("tag", name))?;
            vcs.push_tag(name).map_err(vcs_error("tag push", name))?;
        }
        Ok(())
    }

    // External tools run from the work dir, so hand them an absolute manifest path.
    fn manifest_path_for_vcs(&self) -> PathBuf {
        let path = self.store.path();
        fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Reaps the retired names of `tier`, then clears and persists them.
    fn reap_retired(&self, manifest: &mut Manifest, tier: Tier) -> Result<ReapReport> {
        let retired = match tier {
            Tier::Daily => &mut manifest.retired.daily,
            Tier::Monthly => &mut manifest.retired.monthly,
            Tier::Yearly => return Ok(ReapReport::default()),
        };
        if retired.is_empty() {
            return Ok(ReapReport::default());
        }
        let names = std::mem::take(retired);
        info!(tier = %tier, count = names.len(), "removing superseded releases");
        let report = RetentionReaper {
            releases: &self.backends.releases,
            vcs: &self.backends.vcs,
        }
        .reap(&names);
        if report.warnings > 0 {
            warn!(tier = %tier, warnings = report.warnings, "some superseded releases were not fully removed");
        }
        self.store.save(manifest)?;
        Ok(report)
    }
}

fn vcs_error<'a>(action: &'static str, name: &'a str) -> impl Fn(CommandError) -> ConsolidateError + 'a {
    move |source| ConsolidateError::VersionControl {
        action,
        name: name.to_string(),
        source,
    }
}
