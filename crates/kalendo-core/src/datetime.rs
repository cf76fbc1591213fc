use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "kalendo-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "KALENDO_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "KALENDO_TIME_CONFIG";

/// Source of the current moment and of
/// the zone whose wall clock defines
/// calendar days.
///
/// Everything that needs "now" takes a
/// clock so the calendar helpers stay
/// pure and tests never depend on the
/// real time.
pub trait Clock {
  fn now(&self) -> DateTime<Utc>;

  fn timezone(&self) -> Tz;

  fn local_now(&self) -> DateTime<Tz> {
    self
      .now()
      .with_timezone(&self.timezone())
  }

  fn today(&self) -> NaiveDate {
    self.local_now().date_naive()
  }
}

/// Reads the wall clock on every call.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
  timezone: Tz
}

impl SystemClock {
  pub fn new(timezone: Tz) -> Self {
    Self { timezone }
  }
}

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  fn timezone(&self) -> Tz {
    self.timezone
  }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
  now:      DateTime<Utc>,
  timezone: Tz
}

impl FixedClock {
  pub fn new(
    now: DateTime<Utc>,
    timezone: Tz
  ) -> Self {
    Self { now, timezone }
  }

  pub fn at_local(
    local: NaiveDateTime,
    timezone: Tz
  ) -> anyhow::Result<Self> {
    let now = to_utc_from_local(
      local,
      &timezone,
      "fixed-clock"
    )?;
    Ok(Self { now, timezone })
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    self.now
  }

  fn timezone(&self) -> Tz {
    self.timezone
  }
}

/// Anything that falls on a calendar
/// day of its own wall clock.
pub trait CalendarDay {
  fn calendar_day(&self) -> NaiveDate;
}

impl CalendarDay for NaiveDate {
  fn calendar_day(&self) -> NaiveDate {
    *self
  }
}

impl CalendarDay for NaiveDateTime {
  fn calendar_day(&self) -> NaiveDate {
    self.date()
  }
}

impl<Z: TimeZone> CalendarDay
  for DateTime<Z>
{
  fn calendar_day(&self) -> NaiveDate {
    self.date_naive()
  }
}

impl<T: CalendarDay + ?Sized> CalendarDay
  for &T
{
  fn calendar_day(&self) -> NaiveDate {
    (**self).calendar_day()
  }
}

/// Year, month and day-of-month match;
/// time of day is ignored.
#[must_use]
pub fn is_same_day<A, B>(
  a: &A,
  b: &B
) -> bool
where
  A: CalendarDay + ?Sized,
  B: CalendarDay + ?Sized
{
  a.calendar_day() == b.calendar_day()
}

/// Evaluated against the clock on every
/// call; a long-lived caller holding the
/// answer across midnight sees it go
/// stale.
#[must_use]
pub fn is_today<D, C>(
  day: &D,
  clock: &C
) -> bool
where
  D: CalendarDay + ?Sized,
  C: Clock + ?Sized
{
  day.calendar_day() == clock.today()
}

/// Resolves the calendar zone: the
/// `KALENDO_TIMEZONE` env var, then the
/// configured value, then the time config
/// file, then the host zone, then UTC.
#[tracing::instrument]
pub fn resolve_calendar_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "kalendorc")
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  match iana_time_zone::get_timezone() {
    | Ok(host) => {
      if let Some(tz) =
        parse_timezone(&host, "host")
      {
        return tz;
      }
    }
    | Err(err) => {
      tracing::warn!(
        error = %err,
        "could not determine host \
         timezone"
      );
    }
  }

  tracing::warn!(
    "no usable timezone found; using \
     UTC"
  );
  chrono_tz::UTC
}

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "resolved calendar timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

pub fn to_utc_from_local(
  local_naive: NaiveDateTime,
  timezone: &Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match timezone
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime {local_naive} \
         does not exist in {timezone}: \
         {context}"
      ))
    }
  }
}

/// Lenient timestamp parsing. `None` is
/// the invalid-date value: callers pass it
/// along and formatters render it as
/// `Invalid Date`.
#[must_use]
pub fn parse_timestamp(
  raw: &str
) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(
    raw.trim()
  )
  .ok()
  .map(|dt| dt.with_timezone(&Utc))
}

/// Parses a calendar day: `today`,
/// `tomorrow`, `yesterday`, a weekday
/// name (next occurrence), `+Nd`/`-Nd`,
/// `YYYY-MM-DD` or `YYYY-MM` (the 1st).
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_day_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return shift_day(today, 1);
    }
    | "yesterday" => {
      return shift_day(today, -1);
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return next_weekday_date(
      today, target
    )
    .ok_or_else(|| {
      anyhow!(
        "no {target:?} after {today} \
         in the supported range"
      )
    });
  }

  if let Some(duration) =
    parse_relative_offset(token)?
  {
    return shift_day(
      today,
      duration.num_days()
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      &format!("{token}-01"),
      "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  Err(anyhow!(
    "unrecognized day expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, weekday \
     names (e.g. monday), +Nd/-Nd, \
     YYYY-MM-DD, YYYY-MM"
  })
}

/// Parses an event slot: `now`, RFC3339,
/// `YYYY-MM-DD HH:MM`, `YYYY-MM-DDTHH:MM`,
/// `+Nd/+Nh/+Nm`, a day expression
/// optionally followed by a clock time
/// (`tomorrow 3pm`), or a bare clock time
/// meaning today.
#[tracing::instrument(skip(clock), fields(input = input))]
pub fn parse_slot_expr<C>(
  input: &str,
  clock: &C
) -> anyhow::Result<DateTime<Utc>>
where
  C: Clock + ?Sized
{
  let token = input.trim();
  let timezone = clock.timezone();

  if token.eq_ignore_ascii_case("now") {
    return Ok(clock.now());
  }

  if let Some(dt) =
    parse_timestamp(token)
  {
    return Ok(dt);
  }

  if let Some(duration) =
    parse_relative_offset(token)?
  {
    return clock
      .now()
      .checked_add_signed(duration)
      .ok_or_else(|| {
        anyhow!(
          "{token} leaves the supported \
           date range"
        )
      });
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, &timezone, fmt
      );
    }
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let slot = at_clock(
      clock.today(),
      hour,
      minute
    )?;
    return to_utc_from_local(
      slot,
      &timezone,
      "clock-time"
    );
  }

  if let Some((day_part, clock_part)) =
    token.rsplit_once(char::is_whitespace)
    && let Some((hour, minute)) =
      parse_clock_time(clock_part)
  {
    let day = parse_day_expr(
      day_part,
      clock.today()
    )?;
    let slot =
      at_clock(day, hour, minute)?;
    return to_utc_from_local(
      slot,
      &timezone,
      "day-and-clock"
    );
  }

  let day =
    parse_day_expr(token, clock.today())
      .with_context(|| {
        format!(
          "unrecognized slot \
           expression: {input}"
        )
      })?;
  let midnight = at_clock(day, 0, 0)?;
  to_utc_from_local(
    midnight,
    &timezone,
    "day"
  )
}

fn at_clock(
  day: NaiveDate,
  hour: u32,
  minute: u32
) -> anyhow::Result<NaiveDateTime> {
  day
    .and_hms_opt(hour, minute, 0)
    .ok_or_else(|| {
      anyhow!(
        "invalid clock time \
         {hour}:{minute:02}"
      )
    })
}

fn parse_relative_offset(
  token: &str
) -> anyhow::Result<Option<Duration>> {
  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  let Some(caps) =
    rel_re.captures(token)
  else {
    return Ok(None);
  };

  let num: i64 = caps
    .name("num")
    .map(|m| m.as_str())
    .ok_or_else(|| {
      anyhow!("missing relative amount")
    })?
    .parse()
    .context("invalid relative number")?;
  let num = match caps
    .name("sign")
    .map(|m| m.as_str())
  {
    | Some("-") => -num,
    | _ => num
  };

  let duration = match caps
    .name("unit")
    .map(|m| m.as_str())
  {
    | Some("d") => Duration::try_days(num),
    | Some("h") => {
      Duration::try_hours(num)
    }
    | Some("m") => {
      Duration::try_minutes(num)
    }
    | other => {
      return Err(anyhow!(
        "unknown relative unit: \
         {other:?}"
      ));
    }
  }
  .ok_or_else(|| {
    anyhow!(
      "relative offset out of range: \
       {token}"
    )
  })?;

  Ok(Some(duration))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> Option<NaiveDate> {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  crate::grid::checked_add_days(
    from, delta
  )
}

fn shift_day(
  today: NaiveDate,
  days: i64
) -> anyhow::Result<NaiveDate> {
  crate::grid::checked_add_days(today, days)
    .ok_or_else(|| {
      anyhow!(
        "{days} days from {today} leaves \
         the supported date range"
      )
    })
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = match captures
    .name("minute")
  {
    | Some(m) => {
      m.as_str().parse::<u32>().ok()?
    }
    | None => 0
  };
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm.as_str() {
      | "am" => {
        if raw_hour == 12 {
          0
        } else {
          raw_hour
        }
      }
      | "pm" => {
        if raw_hour == 12 {
          12
        } else {
          raw_hour + 12
        }
      }
      | _ => return None
    }
  } else {
    // A bare number is a day offset or
    // garbage, not a time.
    captures.name("minute")?;
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    Clock,
    FixedClock,
    is_same_day,
    is_today,
    parse_day_expr,
    parse_slot_expr,
    parse_timestamp
  };

  fn ymd(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn clock_at(
    y: i32,
    m: u32,
    d: u32,
    h: u32,
    min: u32
  ) -> FixedClock {
    let local = ymd(y, m, d)
      .and_hms_opt(h, min, 0)
      .expect("valid time");
    FixedClock::at_local(
      local,
      chrono_tz::America::Mexico_City
    )
    .expect("fixed clock")
  }

  #[test]
  fn same_day_ignores_time_of_day() {
    let late = ymd(2025, 3, 1)
      .and_hms_opt(23, 59, 0)
      .expect("valid time");
    let early = ymd(2025, 3, 1)
      .and_hms_opt(0, 1, 0)
      .expect("valid time");
    assert!(is_same_day(&late, &early));
    assert!(is_same_day(&early, &late));
    assert!(is_same_day(&late, &late));
    assert!(!is_same_day(
      &late,
      &ymd(2025, 3, 2)
    ));
  }

  #[test]
  fn same_day_uses_each_wall_clock() {
    let instant = Utc
      .with_ymd_and_hms(
        2025, 3, 2, 3, 30, 0
      )
      .single()
      .expect("valid instant");
    let mexico = instant.with_timezone(
      &chrono_tz::America::Mexico_City
    );
    assert!(is_same_day(
      &mexico,
      &ymd(2025, 3, 1)
    ));
    assert!(is_same_day(
      &instant,
      &ymd(2025, 3, 2)
    ));
  }

  #[test]
  fn today_follows_the_clock() {
    let clock =
      clock_at(2025, 3, 9, 22, 15);
    assert_eq!(
      clock.today(),
      ymd(2025, 3, 9)
    );
    assert!(is_today(
      &ymd(2025, 3, 9),
      &clock
    ));
    assert!(!is_today(
      &ymd(2025, 3, 10),
      &clock
    ));
    // 04:15 UTC on the 10th is still the
    // 9th in Mexico City.
    assert_eq!(
      clock.now().date_naive(),
      ymd(2025, 3, 10)
    );
    assert!(is_today(
      &clock.local_now(),
      &clock
    ));
  }

  #[test]
  fn parses_day_expressions() {
    // 2025-03-09 is a Sunday.
    let today = ymd(2025, 3, 9);
    let cases = [
      ("today", ymd(2025, 3, 9)),
      ("tomorrow", ymd(2025, 3, 10)),
      ("yesterday", ymd(2025, 3, 8)),
      ("monday", ymd(2025, 3, 10)),
      ("sun", ymd(2025, 3, 16)),
      ("+3d", ymd(2025, 3, 12)),
      ("-9d", ymd(2025, 2, 28)),
      ("2024-02-29", ymd(2024, 2, 29)),
      ("2025-07", ymd(2025, 7, 1))
    ];
    for (input, expected) in cases {
      assert_eq!(
        parse_day_expr(input, today)
          .expect("parse day"),
        expected,
        "{input}"
      );
    }
    assert!(
      parse_day_expr("someday", today)
        .is_err()
    );
  }

  #[test]
  fn parses_slot_expressions() {
    let clock =
      clock_at(2025, 3, 9, 8, 20);
    let tz = clock.timezone();
    let local = |input: &str| {
      parse_slot_expr(input, &clock)
        .expect("parse slot")
        .with_timezone(&tz)
        .format("%Y-%m-%d %H:%M")
        .to_string()
    };

    assert_eq!(
      local("now"),
      "2025-03-09 08:20"
    );
    assert_eq!(
      local("3pm"),
      "2025-03-09 15:00"
    );
    assert_eq!(
      local("tomorrow 9:30am"),
      "2025-03-10 09:30"
    );
    assert_eq!(
      local("2025-04-01 13:45"),
      "2025-04-01 13:45"
    );
    assert_eq!(
      local("2025-04-01T07:05"),
      "2025-04-01 07:05"
    );
    assert_eq!(
      local("2025-04-02"),
      "2025-04-02 00:00"
    );
    assert_eq!(
      local("+2h"),
      "2025-03-09 10:20"
    );
    assert!(
      parse_slot_expr("13pm", &clock)
        .is_err()
    );
  }

  #[test]
  fn malformed_timestamps_are_none() {
    assert!(
      parse_timestamp("not a date")
        .is_none()
    );
    assert_eq!(
      parse_timestamp(
        "2025-03-01T10:00:00.000Z"
      ),
      Utc
        .with_ymd_and_hms(
          2025, 3, 1, 10, 0, 0
        )
        .single()
    );
  }

  #[test]
  fn oversized_offsets_are_errors() {
    let today = ymd(2025, 3, 9);
    for input in [
      "+100000000d",
      "-100000000d",
      "+999999999999d",
      "+99999999999999999999d"
    ] {
      assert!(
        parse_day_expr(input, today)
          .is_err(),
        "{input}"
      );
    }

    let clock =
      clock_at(2025, 3, 9, 8, 20);
    for input in [
      "+100000000d",
      "+99999999999999m",
      "-9999999999999h"
    ] {
      assert!(
        parse_slot_expr(input, &clock)
          .is_err(),
        "{input}"
      );
    }
  }
}

pub mod iso_timestamp_serde {
  use chrono::{
    DateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
  }
}
