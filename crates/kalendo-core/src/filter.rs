use std::fmt;
use std::str::FromStr;

use chrono::{
  NaiveDate,
  Timelike
};
use chrono_tz::Tz;
use tracing::trace;

use crate::datetime::{
  Clock,
  is_same_day
};
use crate::event::{
  CalendarEvent,
  Category
};

/// Month cells list this many events
/// before collapsing the rest into
/// `+N more`.
pub const DEFAULT_CELL_LIMIT: usize = 3;

/// Shortest block drawn on a timeline,
/// in hours.
pub const MIN_TIMELINE_HOURS: f64 = 0.5;

/// Events whose start falls on `day` in
/// `timezone`, ordered by start time.
///
/// The sort is stable, so events sharing a
/// start keep their collection order.
pub fn events_for_date<'a, I>(
  events: I,
  day: NaiveDate,
  timezone: &Tz
) -> Vec<&'a CalendarEvent>
where
  I: IntoIterator<
    Item = &'a CalendarEvent
  >
{
  let mut matched = events
    .into_iter()
    .filter(|event| {
      is_same_day(
        &event
          .start
          .with_timezone(timezone),
        &day
      )
    })
    .collect::<Vec<_>>();
  matched.sort_by_key(|event| event.start);

  trace!(
    day = %day,
    matched = matched.len(),
    "filtered events for day"
  );
  matched
}

pub fn today_events<'a, I, C>(
  events: I,
  clock: &C
) -> Vec<&'a CalendarEvent>
where
  I: IntoIterator<
    Item = &'a CalendarEvent
  >,
  C: Clock + ?Sized
{
  events_for_date(
    events,
    clock.today(),
    &clock.timezone()
  )
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
  Default,
)]
pub enum CategoryFilter {
  #[default]
  All,
  Only(Category)
}

impl CategoryFilter {
  pub fn matches(
    self,
    event: &CalendarEvent
  ) -> bool {
    match self {
      | CategoryFilter::All => true,
      | CategoryFilter::Only(category) => {
        event.category == category
      }
    }
  }

  pub fn apply<'a>(
    self,
    events: Vec<&'a CalendarEvent>
  ) -> Vec<&'a CalendarEvent> {
    events
      .into_iter()
      .filter(|event| self.matches(event))
      .collect()
  }
}

impl fmt::Display for CategoryFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | CategoryFilter::All => {
        f.write_str("All")
      }
      | CategoryFilter::Only(category) => {
        write!(f, "{category}")
      }
    }
  }
}

impl FromStr for CategoryFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all")
    {
      return Ok(CategoryFilter::All);
    }
    s.parse::<Category>()
      .map(CategoryFilter::Only)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellPreview<'a> {
  pub shown:  Vec<&'a CalendarEvent>,
  pub hidden: usize
}

pub fn preview<'a>(
  events: &[&'a CalendarEvent],
  limit: usize
) -> CellPreview<'a> {
  let shown = events
    .iter()
    .take(limit)
    .copied()
    .collect::<Vec<_>>();
  let hidden =
    events.len().saturating_sub(limit);
  CellPreview { shown, hidden }
}

/// Where an event sits on a day timeline,
/// in fractional local hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourSpan {
  pub start: f64,
  pub end:   f64
}

impl HourSpan {
  pub fn of(
    event: &CalendarEvent,
    timezone: &Tz
  ) -> Self {
    let start = fractional_hour(
      &event.start.with_timezone(timezone)
    );
    let end = fractional_hour(
      &event.end.with_timezone(timezone)
    );
    Self { start, end }
  }

  /// Raw length; negative when the end
  /// precedes the start.
  pub fn duration(&self) -> f64 {
    self.end - self.start
  }

  pub fn display_duration(&self) -> f64 {
    self
      .duration()
      .max(MIN_TIMELINE_HOURS)
  }
}

pub fn starts_in_hour(
  event: &CalendarEvent,
  hour: u32,
  timezone: &Tz
) -> bool {
  event
    .start
    .with_timezone(timezone)
    .hour()
    == hour
}

fn fractional_hour<T: Timelike>(
  time: &T
) -> f64 {
  f64::from(time.hour())
    + f64::from(time.minute()) / 60.0
}
