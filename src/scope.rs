use anyhow::{anyhow, bail};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

/// The `{year, quarter, week}` selection every planner request is scoped by.
/// Passed explicitly with each request; the daemon keeps no "current quarter".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningContext {
    pub year: i32,
    pub quarter: u8,
    #[serde(rename = "weekNumber", skip_serializing_if = "Option::is_none")]
    pub week: Option<u8>,
}

impl PlanningContext {
    pub fn quarter(year: i32, quarter: u8) -> anyhow::Result<Self> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            bail!("year must be between {} and {}", MIN_YEAR, MAX_YEAR);
        }
        if !(1..=4).contains(&quarter) {
            bail!("quarter must be between 1 and 4");
        }
        Ok(Self {
            year,
            quarter,
            week: None,
        })
    }

    pub fn week(year: i32, quarter: u8, week: u8) -> anyhow::Result<Self> {
        let ctx = Self::quarter(year, quarter)?;
        let weeks = ctx.weeks_in_quarter()?;
        if week == 0 || u32::from(week) > weeks {
            bail!("weekNumber must be between 1 and {}", weeks);
        }
        Ok(Self {
            week: Some(week),
            ..ctx
        })
    }

    /// Context (with week) containing `date`.
    pub fn containing(date: NaiveDate) -> anyhow::Result<Self> {
        let quarter = ((date.month0() / 3) + 1) as u8;
        let ctx = Self::quarter(date.year(), quarter)?;
        let offset = (date - ctx.first_week_start()?).num_days();
        let week = u8::try_from(offset / 7 + 1).map_err(|_| anyhow!("week out of range"))?;
        Ok(Self {
            week: Some(week),
            ..ctx
        })
    }

    pub fn quarter_start(&self) -> anyhow::Result<NaiveDate> {
        let month = u32::from(self.quarter - 1) * 3 + 1;
        NaiveDate::from_ymd_opt(self.year, month, 1)
            .ok_or_else(|| anyhow!("invalid quarter {} of {}", self.quarter, self.year))
    }

    pub fn quarter_end(&self) -> anyhow::Result<NaiveDate> {
        let next = if self.quarter == 4 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, u32::from(self.quarter) * 3 + 1, 1)
        };
        next.and_then(|d| d.pred_opt())
            .ok_or_else(|| anyhow!("invalid quarter {} of {}", self.quarter, self.year))
    }

    /// Week 1 starts on the Monday on or before the first day of the quarter.
    pub fn first_week_start(&self) -> anyhow::Result<NaiveDate> {
        let start = self.quarter_start()?;
        let back = i64::from(start.weekday().num_days_from_monday());
        Ok(start - Duration::days(back))
    }

    pub fn weeks_in_quarter(&self) -> anyhow::Result<u32> {
        let days = (self.quarter_end()? - self.first_week_start()?).num_days();
        Ok((days / 7 + 1) as u32)
    }

    /// Monday..Sunday of the selected week.
    pub fn week_range(&self) -> anyhow::Result<Option<(NaiveDate, NaiveDate)>> {
        let Some(week) = self.week else {
            return Ok(None);
        };
        let start = self.first_week_start()? + Duration::weeks(i64::from(week) - 1);
        Ok(Some((start, start + Duration::days(6))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn rejects_out_of_range_quarter_and_year() {
        assert!(PlanningContext::quarter(2025, 0).is_err());
        assert!(PlanningContext::quarter(2025, 5).is_err());
        assert!(PlanningContext::quarter(1999, 1).is_err());
        assert!(PlanningContext::quarter(2025, 4).is_ok());
    }

    #[test]
    fn quarter_bounds() {
        let q4 = PlanningContext::quarter(2025, 4).expect("ctx");
        assert_eq!(q4.quarter_start().expect("start"), d(2025, 10, 1));
        assert_eq!(q4.quarter_end().expect("end"), d(2025, 12, 31));
        let q1 = PlanningContext::quarter(2024, 1).expect("ctx");
        assert_eq!(q1.quarter_end().expect("end"), d(2024, 3, 31));
    }

    #[test]
    fn weeks_are_monday_aligned() {
        // 2025-01-01 is a Wednesday.
        let q1 = PlanningContext::quarter(2025, 1).expect("ctx");
        assert_eq!(q1.first_week_start().expect("start"), d(2024, 12, 30));
        assert_eq!(q1.weeks_in_quarter().expect("weeks"), 14);

        let w2 = PlanningContext::week(2025, 1, 2).expect("ctx");
        assert_eq!(
            w2.week_range().expect("range"),
            Some((d(2025, 1, 6), d(2025, 1, 12)))
        );
        assert!(PlanningContext::week(2025, 1, 15).is_err());
        assert!(PlanningContext::week(2025, 1, 0).is_err());
    }

    #[test]
    fn containing_resolves_week_number() {
        let ctx = PlanningContext::containing(d(2025, 1, 8)).expect("ctx");
        assert_eq!((ctx.year, ctx.quarter, ctx.week), (2025, 1, Some(2)));
        let ctx = PlanningContext::containing(d(2025, 7, 1)).expect("ctx");
        assert_eq!((ctx.quarter, ctx.week), (3, Some(1)));
    }
}
