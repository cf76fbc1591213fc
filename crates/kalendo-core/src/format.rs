//! Header and label text for the views.
//!
//! Output is fixed to US English and never
//! consults the host locale, so labels are
//! identical on every machine.

use chrono::{
  Datelike,
  NaiveDate,
  Timelike
};
use chrono_tz::Tz;

use crate::datetime::parse_timestamp;
use crate::event::CalendarEvent;
use crate::grid::{
  CalendarView,
  week_grid
};

pub const INVALID_DATE: &str =
  "Invalid Date";

/// `March 2025`
#[must_use]
pub fn month_label(
  date: NaiveDate
) -> String {
  date.format("%B %Y").to_string()
}

/// Label of the Monday-start week holding
/// `date`:
/// `March 3 - 9, 2025`,
/// `Mar 31 - Apr 6, 2025` or
/// `Dec 29, 2025 - Jan 4, 2026`.
#[must_use]
pub fn week_range_label(
  date: NaiveDate
) -> String {
  let days = week_grid(date);
  let first = days[0];
  let last = days[6];

  if first.year() == last.year()
    && first.month() == last.month()
  {
    format!(
      "{} {} - {}, {}",
      first.format("%B"),
      first.day(),
      last.day(),
      first.year()
    )
  } else if first.year() == last.year() {
    format!(
      "{} {} - {} {}, {}",
      first.format("%b"),
      first.day(),
      last.format("%b"),
      last.day(),
      first.year()
    )
  } else {
    format!(
      "{} - {}",
      first.format("%b %-d, %Y"),
      last.format("%b %-d, %Y")
    )
  }
}

/// `09:05 AM`
#[must_use]
pub fn time_label<T: Timelike>(
  time: &T
) -> String {
  let (is_pm, hour) = time.hour12();
  format!(
    "{hour:02}:{:02} {}",
    time.minute(),
    if is_pm { "PM" } else { "AM" }
  )
}

#[must_use]
pub fn time_range_label(
  event: &CalendarEvent,
  timezone: &Tz
) -> String {
  format!(
    "{} - {}",
    time_label(
      &event.start.with_timezone(timezone)
    ),
    time_label(
      &event.end.with_timezone(timezone)
    )
  )
}

/// Time label for a raw stored timestamp;
/// unparseable input yields
/// `Invalid Date` instead of an error.
#[must_use]
pub fn timestamp_time_label(
  raw: &str,
  timezone: &Tz
) -> String {
  parse_timestamp(raw)
    .map(|dt| {
      time_label(&dt.with_timezone(timezone))
    })
    .unwrap_or_else(|| {
      INVALID_DATE.to_string()
    })
}

/// `Sun, Mar 9`
#[must_use]
pub fn short_date_label(
  date: NaiveDate
) -> String {
  date.format("%a, %b %-d").to_string()
}

/// `Sunday, March 9, 2025`
#[must_use]
pub fn day_title(
  date: NaiveDate
) -> String {
  date
    .format("%A, %B %-d, %Y")
    .to_string()
}

#[must_use]
pub fn header_title(
  view: CalendarView,
  focus: NaiveDate
) -> String {
  match view {
    | CalendarView::Month => {
      month_label(focus)
    }
    | CalendarView::Week => {
      week_range_label(focus)
    }
    | CalendarView::Day => day_title(focus)
  }
}
