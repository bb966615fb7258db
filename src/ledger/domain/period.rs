//! Reporting periods.
//!
//! Budgets are reported over "salary months": windows of one month that start
//! on a configurable day rather than on the 1st. Day values past the end of a
//! short month are clamped to that month's last day, so a period starting on
//! the 31st begins on the 30th in April and on the 28th (or 29th) in
//! February.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The day salary months start on when nothing else is configured.
pub const DEFAULT_START_DAY: u32 = 25;

/// The day salary months end on when nothing else is configured.
pub const DEFAULT_END_DAY: u32 = 24;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    /// Days of the month must be in `1..=31`.
    #[error("day of month must be between 1 and 31, received {0}")]
    InvalidDay(u32),

    /// The computed date falls outside the range chrono can represent.
    #[error("period boundary is out of the supported date range")]
    OutOfRange,

    /// The boundary lands in a gap of the time zone, eg a DST transition at
    /// midnight.
    #[error("local time {0} does not exist in the requested time zone")]
    NonexistentLocalTime(NaiveDateTime),
}

/// An inclusive window of time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Period {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The last instant of the period, ie 23:59:59.999 on its final day.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// The start and end days used to compute a salary month.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryMonth {
    pub start_day: u32,
    pub end_day: u32,
}

impl Default for SalaryMonth {
    fn default() -> Self {
        Self {
            start_day: DEFAULT_START_DAY,
            end_day: DEFAULT_END_DAY,
        }
    }
}

impl SalaryMonth {
    /// The salary month containing `now`.
    pub fn range<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<Period, PeriodError> {
        salary_month_range(self.start_day, self.end_day, now)
    }
}

/// Compute the one month period containing `reference`.
///
/// If the reference date falls before `start_day` in its month, the period is
/// the one that started on `start_day` of the previous month. Otherwise it
/// starts in the reference month. The period ends on the day before the next
/// period starts, at 23:59:59.999 local time.
///
/// # Arguments
/// * `reference` - Any instant inside the desired period. Day boundaries are
///   evaluated in the instant's own time zone.
/// * `start_day` - The day of the month periods start on.
pub fn period_boundaries<Tz: TimeZone>(
    reference: &DateTime<Tz>,
    start_day: u32,
) -> Result<Period, PeriodError> {
    validate_day(start_day)?;

    let today = reference.naive_local().date();
    let (start_year, start_month) = containing_month(today, start_day)?;

    let start = clamped_date(start_year, start_month, start_day)?;
    let (next_year, next_month) = shift_month(start_year, start_month, 1);
    let next_start = clamped_date(next_year, next_month, start_day)?;
    let last_day = next_start.pred_opt().ok_or(PeriodError::OutOfRange)?;

    let tz = reference.timezone();

    Ok(Period {
        start: start_of_day(&tz, start)?,
        end: end_of_day(&tz, last_day)?,
    })
}

/// Compute the salary month containing `now` using separate start and end
/// days.
///
/// The current period is used when `now` is on or after `start_day` of its
/// month, otherwise the previous one. The period ends on `end_day` of the
/// start month when `end_day >= start_day`, or of the following month when
/// it is smaller.
pub fn salary_month_range<Tz: TimeZone>(
    start_day: u32,
    end_day: u32,
    now: &DateTime<Tz>,
) -> Result<Period, PeriodError> {
    validate_day(start_day)?;
    validate_day(end_day)?;

    let today = now.naive_local().date();
    let (start_year, start_month) = containing_month(today, start_day)?;
    let start = clamped_date(start_year, start_month, start_day)?;

    let (end_year, end_month) = if end_day >= start_day {
        (start_year, start_month)
    } else {
        shift_month(start_year, start_month, 1)
    };
    let end = clamped_date(end_year, end_month, end_day)?;

    let tz = now.timezone();

    Ok(Period {
        start: start_of_day(&tz, start)?,
        end: end_of_day(&tz, end)?,
    })
}

fn validate_day(day: u32) -> Result<(), PeriodError> {
    if (1..=31).contains(&day) {
        Ok(())
    } else {
        Err(PeriodError::InvalidDay(day))
    }
}

/// The year and month in which the period containing `date` started.
fn containing_month(date: NaiveDate, start_day: u32) -> Result<(i32, u32), PeriodError> {
    let this_month_start = clamped_date(date.year(), date.month(), start_day)?;

    if date < this_month_start {
        Ok(shift_month(date.year(), date.month(), -1))
    } else {
        Ok((date.year(), date.month()))
    }
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + (month as i32 - 1) + delta;

    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

fn last_day_of_month(year: i32, month: u32) -> Result<u32, PeriodError> {
    let (next_year, next_month) = shift_month(year, month, 1);

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .ok_or(PeriodError::OutOfRange)
}

fn clamped_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, PeriodError> {
    let day = day.min(last_day_of_month(year, month)?);

    NaiveDate::from_ymd_opt(year, month, day).ok_or(PeriodError::OutOfRange)
}

fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<Utc>, PeriodError> {
    let local = date.and_hms_opt(0, 0, 0).ok_or(PeriodError::OutOfRange)?;

    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) | LocalResult::Ambiguous(instant, _) => {
            Ok(instant.with_timezone(&Utc))
        }
        LocalResult::None => Err(PeriodError::NonexistentLocalTime(local)),
    }
}

fn end_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<DateTime<Utc>, PeriodError> {
    let local = date
        .and_hms_milli_opt(23, 59, 59, 999)
        .ok_or(PeriodError::OutOfRange)?;

    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) | LocalResult::Ambiguous(_, instant) => {
            Ok(instant.with_timezone(&Utc))
        }
        LocalResult::None => Err(PeriodError::NonexistentLocalTime(local)),
    }
}
