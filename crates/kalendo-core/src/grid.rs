use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Datelike,
  Months,
  NaiveDate,
  TimeDelta,
  Weekday
};

pub const MONTH_GRID_LEN: usize = 42;
pub const WEEK_LEN: usize = 7;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum CalendarView {
  Day,
  Week,
  Month
}

impl CalendarView {
  pub fn all() -> [CalendarView; 3] {
    [
      CalendarView::Day,
      CalendarView::Week,
      CalendarView::Month
    ]
  }

  pub fn as_key(self) -> &'static str {
    match self {
      | CalendarView::Day => "day",
      | CalendarView::Week => "week",
      | CalendarView::Month => "month"
    }
  }

  pub fn from_key(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "day" => Some(CalendarView::Day),
      | "week" => {
        Some(CalendarView::Week)
      }
      | "month" => {
        Some(CalendarView::Month)
      }
      | _ => None
    }
  }
}

impl fmt::Display for CalendarView {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

impl FromStr for CalendarView {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| {
      anyhow!(
        "unknown calendar view: {s} \
         (expected day, week or \
         month)"
      )
    })
  }
}

/// The 42 dates of a Monday-start month
/// view for a zero-based month index.
///
/// Indexes outside `0..12` roll over into
/// the neighbouring years, so `(2025, 12)`
/// is January 2026 and `(2025, -1)` is
/// December 2024. The grid starts on the
/// Monday on or before the 1st and keeps
/// the days of the adjacent months so
/// callers can render them dimmed.
///
/// `None` when any cell falls outside the
/// dates chrono can represent.
#[must_use]
pub fn month_grid(
  year: i32,
  month_index: i32
) -> Option<[NaiveDate; MONTH_GRID_LEN]>
{
  let (year, month) =
    normalize_month_index(
      year,
      month_index
    )?;
  let first =
    first_day_of_month(year, month)?;
  let grid_start = checked_add_days(
    first,
    -i64::from(
      first
        .weekday()
        .num_days_from_monday()
    )
  )?;
  checked_add_days(
    grid_start,
    MONTH_GRID_LEN as i64 - 1
  )?;
  Some(std::array::from_fn(|offset| {
    add_days(grid_start, offset as i64)
  }))
}

#[must_use]
pub fn month_grid_for(
  focus: NaiveDate
) -> Option<[NaiveDate; MONTH_GRID_LEN]>
{
  month_grid(
    focus.year(),
    focus.month0() as i32
  )
}

/// Monday through Sunday of the week
/// containing `reference`. Only the
/// first and last representable weeks
/// can repeat a date.
#[must_use]
pub fn week_grid(
  reference: NaiveDate
) -> [NaiveDate; WEEK_LEN] {
  let monday = start_of_week(reference);
  std::array::from_fn(|offset| {
    add_days(monday, offset as i64)
  })
}

/// Number of previous-month days padding
/// the first row of a month grid.
#[must_use]
pub fn leading_days(
  year: i32,
  month_index: i32
) -> Option<u32> {
  let (year, month) =
    normalize_month_index(
      year,
      month_index
    )?;
  first_day_of_month(year, month).map(
    |first| {
      first
        .weekday()
        .num_days_from_monday()
    }
  )
}

#[must_use]
pub fn start_of_week(
  day: NaiveDate
) -> NaiveDate {
  // Sunday is six days after Monday,
  // not the start of a new week.
  let diff = day
    .weekday()
    .num_days_from_monday()
    as i64;
  add_days(day, -diff)
}

#[must_use]
pub fn first_day_of_month(
  year: i32,
  month: u32
) -> Option<NaiveDate> {
  NaiveDate::from_ymd_opt(year, month, 1)
}

#[must_use]
pub fn last_day_of_month(
  year: i32,
  month: u32
) -> Option<NaiveDate> {
  first_day_of_month(year, month)?
    .checked_add_months(Months::new(1))?
    .pred_opt()
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> Option<u32> {
  last_day_of_month(year, month)
    .map(|last| last.day())
}

/// `date + days`, or `None` past the
/// representable range.
#[must_use]
pub fn checked_add_days(
  date: NaiveDate,
  days: i64
) -> Option<NaiveDate> {
  date.checked_add_signed(
    TimeDelta::try_days(days)?
  )
}

/// Grid arithmetic on offsets already
/// known to be in range; saturates at
/// `date` otherwise.
#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  checked_add_days(date, days)
    .unwrap_or(date)
}

/// Moves the focus date `step`
/// navigation steps (negative steps go
/// back) in the unit of `view`. `None`
/// when the result leaves the
/// representable range.
#[must_use]
pub fn shift_focus(
  current: NaiveDate,
  view: CalendarView,
  step: i64
) -> Option<NaiveDate> {
  match view {
    | CalendarView::Month => {
      shift_months(current, step)
    }
    | CalendarView::Week => {
      checked_add_days(
        current,
        step.checked_mul(7)?
      )
    }
    | CalendarView::Day => {
      checked_add_days(current, step)
    }
  }
}

/// Calendar-month shift with the day of
/// month clamped to the target month's
/// length.
#[must_use]
pub fn shift_months(
  date: NaiveDate,
  months: i64
) -> Option<NaiveDate> {
  let count = Months::new(
    u32::try_from(months.unsigned_abs())
      .ok()?
  );
  if months < 0 {
    date.checked_sub_months(count)
  } else {
    date.checked_add_months(count)
  }
}

pub fn weekday_labels()
-> [&'static str; WEEK_LEN] {
  [
    "Mon", "Tue", "Wed", "Thu", "Fri",
    "Sat", "Sun",
  ]
}

pub fn is_weekend(day: NaiveDate) -> bool {
  matches!(
    day.weekday(),
    Weekday::Sat | Weekday::Sun
  )
}

/// Gutter label of a day/week timeline
/// row, e.g. `12 AM`, `9 AM`, `3 PM`.
#[must_use]
pub fn hour_label(hour: u32) -> String {
  match hour {
    | 0 => "12 AM".to_string(),
    | 1..=11 => format!("{hour} AM"),
    | 12 => "12 PM".to_string(),
    | _ => format!("{} PM", hour - 12)
  }
}

pub fn hour_labels() -> Vec<String> {
  (0_u32..24_u32)
    .map(hour_label)
    .collect()
}

fn normalize_month_index(
  year: i32,
  month_index: i32
) -> Option<(i32, u32)> {
  let year = year.checked_add(
    month_index.div_euclid(12)
  )?;
  let month =
    month_index.rem_euclid(12) as u32
      + 1;
  Some((year, month))
}

#[cfg(test)]
mod tests {
  use chrono::{
    Datelike,
    NaiveDate,
    Weekday
  };

  use super::{
    CalendarView,
    days_in_month,
    hour_label,
    last_day_of_month,
    leading_days,
    month_grid,
    shift_focus,
    shift_months,
    week_grid
  };

  fn ymd(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn march_2025_grid_starts_on_feb_24()
  {
    let grid = month_grid(2025, 2)
      .expect("march grid");
    assert_eq!(grid.len(), 42);
    assert_eq!(grid[0], ymd(2025, 2, 24));
    assert_eq!(grid[5], ymd(2025, 3, 1));
    assert_eq!(grid[41], ymd(2025, 4, 6));
  }

  #[test]
  fn month_starting_on_monday_has_no_padding()
   {
    // September 2025 starts on a Monday.
    assert_eq!(
      leading_days(2025, 8),
      Some(0)
    );
    let grid = month_grid(2025, 8)
      .expect("september grid");
    assert_eq!(grid[0], ymd(2025, 9, 1));
    assert_eq!(grid[41], ymd(2025, 10, 12));
  }

  #[test]
  fn month_index_rolls_over_years() {
    assert_eq!(
      month_grid(2025, 12),
      month_grid(2026, 0)
    );
    assert_eq!(
      month_grid(2025, -1),
      month_grid(2024, 11)
    );
  }

  #[test]
  fn sunday_belongs_to_preceding_week() {
    let week = week_grid(ymd(2025, 3, 9));
    assert_eq!(week[0], ymd(2025, 3, 3));
    assert_eq!(week[6], ymd(2025, 3, 9));
    assert_eq!(
      week[0].weekday(),
      Weekday::Mon
    );
  }

  #[test]
  fn shift_focus_clamps_month_end() {
    let jan31 = ymd(2025, 1, 31);
    assert_eq!(
      shift_focus(
        jan31,
        CalendarView::Month,
        1
      ),
      Some(ymd(2025, 2, 28))
    );
    assert_eq!(
      shift_focus(
        jan31,
        CalendarView::Month,
        -2
      ),
      Some(ymd(2024, 11, 30))
    );
    assert_eq!(
      shift_focus(
        jan31,
        CalendarView::Week,
        1
      ),
      Some(ymd(2025, 2, 7))
    );
    assert_eq!(
      shift_focus(
        jan31,
        CalendarView::Day,
        -1
      ),
      Some(ymd(2025, 1, 30))
    );
  }

  #[test]
  fn month_lengths_follow_leap_years() {
    assert_eq!(
      days_in_month(2024, 2),
      Some(29)
    );
    assert_eq!(
      days_in_month(2025, 2),
      Some(28)
    );
    assert_eq!(
      last_day_of_month(2025, 12),
      Some(ymd(2025, 12, 31))
    );
    assert_eq!(days_in_month(2025, 13), None);
  }

  #[test]
  fn huge_shifts_fail_instead_of_wrapping()
  {
    let oct1 = ymd(2025, 10, 1);
    assert_eq!(
      shift_focus(
        oct1,
        CalendarView::Month,
        i64::from(i32::MAX)
      ),
      None
    );
    assert_eq!(
      shift_months(oct1, i64::MIN),
      None
    );
    assert_eq!(
      shift_focus(
        oct1,
        CalendarView::Week,
        i64::MAX
      ),
      None
    );
    assert_eq!(
      shift_focus(
        oct1,
        CalendarView::Day,
        100_000_000
      ),
      None
    );
  }

  #[test]
  fn unrepresentable_years_have_no_grid()
  {
    assert_eq!(
      month_grid(i32::MAX, 0),
      None
    );
    assert_eq!(
      month_grid(300_000, 5),
      None
    );
    assert_eq!(
      leading_days(-300_000, 0),
      None
    );
    assert_eq!(
      month_grid(2025, i32::MAX),
      None
    );
  }

  #[test]
  fn view_keys_round_trip() {
    for view in CalendarView::all() {
      assert_eq!(
        CalendarView::from_key(
          view.as_key()
        ),
        Some(view)
      );
    }
    assert!(
      "agenda"
        .parse::<CalendarView>()
        .is_err()
    );
  }

  #[test]
  fn hour_labels_use_twelve_hour_clock()
  {
    assert_eq!(hour_label(0), "12 AM");
    assert_eq!(hour_label(9), "9 AM");
    assert_eq!(hour_label(12), "12 PM");
    assert_eq!(hour_label(23), "11 PM");
  }
}
