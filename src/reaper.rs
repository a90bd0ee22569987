use serde::Serialize;
use tracing::{info, warn};

use crate::capabilities::{CmdResult, ReleaseStore, VersionControl};
use crate::error::ConsolidateError;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ReapReport {
    pub(crate) attempted: usize,
    pub(crate) warnings: usize,
}

/// Best-effort removal of superseded releases and their tags. Never fails.
pub(crate) struct RetentionReaper<'a, R, G> {
    pub(crate) releases: &'a R,
    pub(crate) vcs: &'a G,
}

impl<R: ReleaseStore, G: VersionControl> RetentionReaper<'_, R, G> {
    pub(crate) fn reap(&self, names: &[String]) -> ReapReport {
        let mut report = ReapReport::default();
        for name in names {
            info!(release = %name, "deleting superseded release");
            report.attempted += 1;
            let steps: [(&'static str, CmdResult<()>); 3] = [
                ("release", self.releases.delete(name)),
                ("remote tag", self.vcs.delete_remote_tag(name)),
                ("local tag", self.vcs.delete_local_tag(name)),
            ];
            for (what, result) in steps {
                if let Err(source) = result {
                    let err = ConsolidateError::CleanupFailed {
                        what,
                        name: name.clone(),
                        source,
                    };
                    warn!("{err}. Continuing...");
                    report.warnings += 1;
                }
            }
        }
        report
    }
}
