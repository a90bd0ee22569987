//! Calendar bucketing of raw `YYYYMMDDHHMMSS` timestamps around a fixed anchor.
//!
//! Labels round an instant to the nearest anchor occurrence of its period and are
//! only used for presentation (release titles). Promotion decisions use the
//! alignment checks at the bottom of this module.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::Serialize;

use crate::error::{ConsolidateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Granularity {
    Day,
    Month,
    Year,
}

/// Reference instant that period boundaries are aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct Anchor {
    pub(crate) year: i32,
    pub(crate) month: u32,
    pub(crate) day: u32,
    pub(crate) hour: u32,
    pub(crate) minute: u32,
    pub(crate) second: u32,
}

impl Default for Anchor {
    // 2012-02-17 05:39:50 UTC, the first archived post.
    fn default() -> Self {
        Self {
            year: 2012,
            month: 2,
            day: 17,
            hour: 5,
            minute: 39,
            second: 50,
        }
    }
}

impl Anchor {
    pub(crate) fn validate(&self) -> Result<()> {
        if NaiveDate::from_ymd_opt(self.year, self.month, self.day).is_none() {
            return Err(ConsolidateError::Config(format!(
                "anchor date {:04}-{:02}-{:02} is not a calendar date",
                self.year, self.month, self.day
            )));
        }
        if NaiveTime::from_hms_opt(self.hour, self.minute, self.second).is_none() {
            return Err(ConsolidateError::Config(format!(
                "anchor time {:02}:{:02}:{:02} is not a valid time of day",
                self.hour, self.minute, self.second
            )));
        }
        Ok(())
    }

    fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second).unwrap_or(NaiveTime::MIN)
    }

    /// Anchor occurrence inside period number `period` of the given granularity.
    ///
    /// Periods are days since CE for `Day`, months since year 0 for `Month` and
    /// plain years for `Year`. Days past the end of a short month clamp to its last day.
    fn occurrence(&self, granularity: Granularity, period: i64) -> Option<NaiveDateTime> {
        let date = match granularity {
            Granularity::Day => NaiveDate::from_num_days_from_ce_opt(i32::try_from(period).ok()?)?,
            Granularity::Month => {
                let year = i32::try_from(period.div_euclid(12)).ok()?;
                let month = period.rem_euclid(12) as u32 + 1;
                clamped_date(year, month, self.day)?
            }
            Granularity::Year => clamped_date(i32::try_from(period).ok()?, self.month, self.day)?,
        };
        Some(date.and_time(self.time()))
    }

    /// Nearest-anchor label for `instant`: `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    pub(crate) fn label_at(&self, instant: NaiveDateTime, granularity: Granularity) -> String {
        let period = match granularity {
            Granularity::Day => i64::from(instant.date().num_days_from_ce()),
            Granularity::Month => i64::from(instant.year()) * 12 + i64::from(instant.month0()),
            Granularity::Year => i64::from(instant.year()),
        };
        let window = |p: i64| Some((self.occurrence(granularity, p)?, self.occurrence(granularity, p + 1)?));

        let chosen = match window(period) {
            Some((prev, next)) => {
                let (prev, next) = if instant < prev {
                    window(period - 1).unwrap_or((prev, next))
                } else {
                    (prev, next)
                };
                if instant - prev <= next - instant { prev } else { next }
            }
            None => instant,
        };

        match granularity {
            Granularity::Day => chosen.format("%Y-%m-%d").to_string(),
            Granularity::Month => chosen.format("%Y-%m").to_string(),
            Granularity::Year => chosen.format("%Y").to_string(),
        }
    }

    pub(crate) fn label(&self, raw: &str, granularity: Granularity) -> Result<String> {
        Ok(self.label_at(parse_raw(raw)?, granularity))
    }

    /// True when the day after `closing` is the anchor's day of month.
    pub(crate) fn aligned_monthly(&self, closing: NaiveDateTime) -> bool {
        (closing + TimeDelta::days(1)).day() == self.day
    }

    /// True when the day after `closing` falls in the anchor month, on or past the anchor day.
    pub(crate) fn aligned_yearly(&self, closing: NaiveDateTime) -> bool {
        let next = closing + TimeDelta::days(1);
        next.month() == self.month && next.day() >= self.day
    }
}

fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first
        .checked_add_months(chrono::Months::new(1))?
        .pred_opt()?
        .day();
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

/// Instant a segment is considered closed: one second after its last item.
pub(crate) fn closing_instant(end: NaiveDateTime) -> NaiveDateTime {
    end + TimeDelta::seconds(1)
}

pub(crate) fn parse_raw(raw: &str) -> Result<NaiveDateTime> {
    let invalid = || ConsolidateError::InvalidTimestamp(raw.to_string());
    if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let field = |range: std::ops::Range<usize>| raw[range].parse::<u32>().map_err(|_| invalid());
    let year = raw[0..4].parse::<i32>().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)
        .and_then(|d| d.and_hms_opt(field(8..10).ok()?, field(10..12).ok()?, field(12..14).ok()?))
        .ok_or_else(invalid)
}

pub(crate) fn format_raw(instant: NaiveDateTime) -> String {
    instant.format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_raw(raw).unwrap()
    }

    #[test]
    fn parse_and_format_raw() {
        let t = ts("20240316053950");
        assert_eq!(t.year(), 2024);
        assert_eq!(t.month(), 3);
        assert_eq!(t.day(), 16);
        assert_eq!(format_raw(t), "20240316053950");
    }

    #[test]
    fn parse_rejects_malformed() {
        for raw in ["2024031605395", "2024031605395x", "20241316053950", "20240230000000", "20240316250000", ""] {
            assert!(matches!(parse_raw(raw), Err(ConsolidateError::InvalidTimestamp(_))), "{raw}");
        }
    }

    #[test]
    fn day_label_rounds_to_nearest_anchor() {
        let anchor = Anchor::default();
        // Just before the anchor time: nearest anchor is the same day.
        assert_eq!(anchor.label("20240316053949", Granularity::Day).unwrap(), "2024-03-16");
        // Shortly after midnight: previous day's anchor is 18h away, today's is ~5.6h away.
        assert_eq!(anchor.label("20240316000100", Granularity::Day).unwrap(), "2024-03-16");
        // Late evening rounds forward to the next day's anchor.
        assert_eq!(anchor.label("20240316230000", Granularity::Day).unwrap(), "2024-03-17");
        // Shortly after the anchor stays on the same day.
        assert_eq!(anchor.label("20240316060000", Granularity::Day).unwrap(), "2024-03-16");
    }

    #[test]
    fn day_label_tie_resolves_to_prev() {
        let anchor = Anchor::default();
        // 05:39:50 + 12h = 17:39:50, exactly between two anchors.
        assert_eq!(anchor.label("20240316173950", Granularity::Day).unwrap(), "2024-03-16");
        assert_eq!(anchor.label("20240316173951", Granularity::Day).unwrap(), "2024-03-17");
    }

    #[test]
    fn labels_are_stable_and_within_one_period() {
        let anchor = Anchor::default();
        for raw in ["20120217053950", "20151231235959", "20240229120000", "20240101000000"] {
            let instant = ts(raw);
            let first = anchor.label(raw, Granularity::Day).unwrap();
            assert_eq!(first, anchor.label(raw, Granularity::Day).unwrap());
            let labelled = NaiveDate::parse_from_str(&first, "%Y-%m-%d").unwrap();
            let delta = (labelled - instant.date()).num_days().abs();
            assert!(delta <= 1, "{raw} -> {first}");
        }
    }

    #[test]
    fn month_label_uses_anchor_day() {
        let anchor = Anchor::default();
        // Closing of a monthly segment right at the anchor boundary.
        assert_eq!(anchor.label("20240316053950", Granularity::Month).unwrap(), "2024-03");
        assert_eq!(anchor.label("20240217053950", Granularity::Month).unwrap(), "2024-02");
        // Before the anchor on the 1st: window shifts back, nearest is 2024-01-17.
        assert_eq!(anchor.label("20240201000000", Granularity::Month).unwrap(), "2024-01");
        // Late in the month: nearest is next month's anchor.
        assert_eq!(anchor.label("20240310000000", Granularity::Month).unwrap(), "2024-03");
    }

    #[test]
    fn month_label_clamps_short_months() {
        let anchor = Anchor { day: 31, ..Anchor::default() };
        assert_eq!(anchor.label("20240229000000", Granularity::Month).unwrap(), "2024-02");
        // Window is 2024-03-31 .. 2024-04-30; the 20th is nearer the end.
        assert_eq!(anchor.label("20240420000000", Granularity::Month).unwrap(), "2024-04");
        assert_eq!(anchor.label("20240410000000", Granularity::Month).unwrap(), "2024-03");
    }

    #[test]
    fn year_label_uses_anchor_month_and_day() {
        let anchor = Anchor::default();
        assert_eq!(anchor.label("20250216053950", Granularity::Year).unwrap(), "2025");
        assert_eq!(anchor.label("20240101000000", Granularity::Year).unwrap(), "2024");
        assert_eq!(anchor.label("20240901000000", Granularity::Year).unwrap(), "2025");
        assert_eq!(anchor.label("20240301000000", Granularity::Year).unwrap(), "2024");
    }

    #[test]
    fn monthly_alignment_checks_day_after_closing() {
        let anchor = Anchor::default();
        assert!(anchor.aligned_monthly(ts("20240316053950")));
        assert!(!anchor.aligned_monthly(ts("20240315053950")));
        assert!(!anchor.aligned_monthly(ts("20240317053950")));
    }

    #[test]
    fn yearly_alignment_checks_month_and_day() {
        let anchor = Anchor::default();
        assert!(anchor.aligned_yearly(ts("20250216053950")));
        assert!(anchor.aligned_yearly(ts("20250220053950")));
        assert!(!anchor.aligned_yearly(ts("20250210053950")));
        assert!(!anchor.aligned_yearly(ts("20250316053950")));
    }

    #[test]
    fn closing_instant_rolls_over_boundaries() {
        assert_eq!(format_raw(closing_instant(ts("20241231235959"))), "20250101000000");
    }

    #[test]
    fn anchor_validation() {
        assert!(Anchor::default().validate().is_ok());
        assert!(Anchor { month: 13, ..Anchor::default() }.validate().is_err());
        assert!(Anchor { hour: 24, ..Anchor::default() }.validate().is_err());
    }
}
