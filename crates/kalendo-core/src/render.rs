use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::Config;
use crate::datastore::{ThemePreference, UnreadableRecord};
use crate::datetime::{Clock, is_today};
use crate::event::CalendarEvent;
use crate::filter::{
    CategoryFilter, DEFAULT_CELL_LIMIT, HourSpan, events_for_date, preview, starts_in_hour,
};
use crate::format::{
    INVALID_DATE, day_title, header_title, short_date_label, time_label, time_range_label,
    timestamp_time_label,
};
use crate::grid::{CalendarView, hour_labels, is_weekend, month_grid_for, week_grid, weekday_labels};

const MONTH_CELL_WIDTH: usize = 14;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    theme: ThemePreference,
    cell_limit: usize,
}

impl Renderer {
    pub fn new(cfg: &Config, theme: ThemePreference) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color").unwrap_or(true);
        let cell_limit = cfg
            .get_usize("month.cell.limit")?
            .unwrap_or(DEFAULT_CELL_LIMIT);

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            theme,
            cell_limit,
        })
    }

    /// Colourless renderer, for tests and piping.
    pub fn plain(theme: ThemePreference) -> Self {
        Self {
            color: false,
            theme,
            cell_limit: DEFAULT_CELL_LIMIT,
        }
    }

    #[tracing::instrument(skip(self, events, clock))]
    pub fn print_view<C: Clock + ?Sized>(
        &self,
        view: CalendarView,
        focus: NaiveDate,
        events: &[CalendarEvent],
        clock: &C,
    ) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        match view {
            CalendarView::Month => self.render_month(out, focus, events, clock),
            CalendarView::Week => self.render_week(out, focus, events, clock),
            CalendarView::Day => self.render_day(out, focus, events, clock),
        }
    }

    pub fn render_month<W: Write, C: Clock + ?Sized>(
        &self,
        mut out: W,
        focus: NaiveDate,
        events: &[CalendarEvent],
        clock: &C,
    ) -> anyhow::Result<()> {
        let tz = clock.timezone();
        writeln!(out, "{}", self.paint(&header_title(CalendarView::Month, focus), "1"))?;

        let labels = weekday_labels()
            .iter()
            .map(|label| fit(label, MONTH_CELL_WIDTH))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{}", labels.trim_end())?;

        let grid = month_grid_for(focus)
            .ok_or_else(|| anyhow!("no month grid for {focus}: outside the calendar range"))?;
        for week in grid.chunks(7) {
            let cells = week
                .iter()
                .map(|day| {
                    let day_events = events_for_date(events, *day, &tz);
                    (*day, preview(&day_events, self.cell_limit))
                })
                .collect::<Vec<_>>();

            let rows = cells
                .iter()
                .map(|(_, cell)| cell.shown.len() + usize::from(cell.hidden > 0))
                .max()
                .unwrap_or(0);

            let mut line = Vec::with_capacity(7);
            for (day, _) in &cells {
                let label = if is_today(day, clock) {
                    format!("[{}]", day.day())
                } else {
                    day.day().to_string()
                };
                let code = if day.month() != focus.month() {
                    Some("2")
                } else if is_today(day, clock) {
                    Some("1;4")
                } else if is_weekend(*day) {
                    Some("36")
                } else {
                    None
                };
                line.push(self.cell(&label, MONTH_CELL_WIDTH, code));
            }
            writeln!(out, "{}", line.join(" ").trim_end())?;

            for row in 0..rows {
                let mut line = Vec::with_capacity(7);
                for (_, cell) in &cells {
                    let text = if let Some(event) = cell.shown.get(row) {
                        self.cell(
                            &event.title,
                            MONTH_CELL_WIDTH,
                            Some(event.category.color_code(self.theme)),
                        )
                    } else if row == cell.shown.len() && cell.hidden > 0 {
                        self.cell(&format!("+{} more", cell.hidden), MONTH_CELL_WIDTH, Some("2"))
                    } else {
                        " ".repeat(MONTH_CELL_WIDTH)
                    };
                    line.push(text);
                }
                writeln!(out, "{}", line.join(" ").trim_end())?;
            }
        }

        Ok(())
    }

    pub fn render_week<W: Write, C: Clock + ?Sized>(
        &self,
        mut out: W,
        focus: NaiveDate,
        events: &[CalendarEvent],
        clock: &C,
    ) -> anyhow::Result<()> {
        let tz = clock.timezone();
        writeln!(out, "{}", self.paint(&header_title(CalendarView::Week, focus), "1"))?;

        for day in week_grid(focus) {
            writeln!(out)?;
            let mut heading = short_date_label(day);
            if is_today(&day, clock) {
                heading.push_str(" (today)");
            }
            writeln!(out, "{}", self.paint(&heading, "1"))?;

            let day_events = events_for_date(events, day, &tz);
            if day_events.is_empty() {
                writeln!(out, "  {}", self.paint("no events", "2"))?;
            }
            for event in day_events {
                writeln!(out, "  {}", self.event_line(event, &tz))?;
            }
        }

        Ok(())
    }

    pub fn render_day<W: Write, C: Clock + ?Sized>(
        &self,
        mut out: W,
        focus: NaiveDate,
        events: &[CalendarEvent],
        clock: &C,
    ) -> anyhow::Result<()> {
        let tz = clock.timezone();
        let mut title = day_title(focus);
        if is_today(&focus, clock) {
            title.push_str(" (today)");
        }
        writeln!(out, "{}", self.paint(&title, "1"))?;

        let day_events = events_for_date(events, focus, &tz);
        for (hour, label) in (0_u32..).zip(hour_labels()) {
            let label = format!("{label:>5}");
            let in_hour = day_events
                .iter()
                .filter(|event| starts_in_hour(event, hour, &tz))
                .collect::<Vec<_>>();
            if in_hour.is_empty() {
                writeln!(out, "{} |", self.paint(&label, "2"))?;
                continue;
            }
            for (idx, event) in in_hour.into_iter().enumerate() {
                let gutter = if idx == 0 { label.clone() } else { " ".repeat(5) };
                let span = HourSpan::of(event, &tz);
                writeln!(
                    out,
                    "{} | {} ({:.1}h)",
                    gutter,
                    self.event_line(event, &tz),
                    span.display_duration()
                )?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, events, clock))]
    pub fn print_today<C: Clock + ?Sized>(
        &self,
        events: &[&CalendarEvent],
        filter: CategoryFilter,
        clock: &C,
    ) -> anyhow::Result<()> {
        self.render_today(io::stdout().lock(), events, filter, clock)
    }

    pub fn render_today<W: Write, C: Clock + ?Sized>(
        &self,
        mut out: W,
        events: &[&CalendarEvent],
        filter: CategoryFilter,
        clock: &C,
    ) -> anyhow::Result<()> {
        let tz = clock.timezone();
        writeln!(
            out,
            "{} ({})",
            self.paint("Today's Events", "1"),
            short_date_label(clock.today())
        )?;
        if filter != CategoryFilter::All {
            writeln!(out, "category: {filter}")?;
        }

        if events.is_empty() {
            writeln!(out, "No events scheduled for today")?;
            return Ok(());
        }
        for event in events {
            writeln!(out, "  {}", self.event_line(event, &tz))?;
            if !event.description.trim().is_empty() {
                writeln!(out, "      {}", event.description.trim())?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, events, timezone))]
    pub fn print_event_table(&self, events: &[&CalendarEvent], timezone: &Tz) -> anyhow::Result<()> {
        self.render_event_table(io::stdout().lock(), events, timezone)
    }

    pub fn render_event_table<W: Write>(
        &self,
        out: W,
        events: &[&CalendarEvent],
        timezone: &Tz,
    ) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Date".to_string(),
            "Time".to_string(),
            "Title".to_string(),
            "Category".to_string(),
            "Task".to_string(),
            "Repeat".to_string(),
        ];

        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            let id = short_id(event.id.as_str());
            let date = short_date_label(event.start.with_timezone(timezone).date_naive());
            let task = match (event.is_task, event.effective_priority()) {
                (true, Some(priority)) => self.paint(priority.name(), priority.color_code()),
                (true, None) => "yes".to_string(),
                (false, _) => String::new(),
            };

            rows.push(vec![
                self.paint(&id, "33"),
                date,
                time_range_label(event, timezone),
                event.title.clone(),
                self.paint(event.category.name(), event.category.color_code(self.theme)),
                task,
                if event.repeat { "yes".to_string() } else { String::new() },
            ]);
        }

        write_table(out, headers, rows)
    }

    pub fn print_unreadable_table(
        &self,
        records: &[UnreadableRecord],
        timezone: &Tz,
    ) -> anyhow::Result<()> {
        self.render_unreadable_table(io::stdout().lock(), records, timezone)
    }

    /// Records that did not load as events; their times show as
    /// `Invalid Date` when they do not parse.
    pub fn render_unreadable_table<W: Write>(
        &self,
        mut out: W,
        records: &[UnreadableRecord],
        timezone: &Tz,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint("Unreadable records", "1"))?;
        let headers = vec!["ID".to_string(), "Time".to_string(), "Title".to_string()];
        let rows = records
            .iter()
            .map(|record| {
                vec![
                    self.paint(&short_id(record.id().unwrap_or("?")), "33"),
                    self.paint(&unreadable_time_range(record, timezone), "31"),
                    record.title().to_string(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    pub fn print_unreadable_info(
        &self,
        record: &UnreadableRecord,
        timezone: &Tz,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "id          {}", record.id().unwrap_or("?"))?;
        writeln!(out, "title       {}", record.title())?;
        writeln!(out, "time        {}", unreadable_time_range(record, timezone))?;
        writeln!(out, "raw         {}", record.raw())?;
        Ok(())
    }

    pub fn print_event_info(&self, event: &CalendarEvent, timezone: &Tz) -> anyhow::Result<()> {
        self.render_event_info(io::stdout().lock(), event, timezone)
    }

    pub fn render_event_info<W: Write>(
        &self,
        mut out: W,
        event: &CalendarEvent,
        timezone: &Tz,
    ) -> anyhow::Result<()> {
        let start = event.start.with_timezone(timezone);
        let end = event.end.with_timezone(timezone);

        writeln!(out, "id          {}", event.id)?;
        writeln!(out, "title       {}", event.title)?;
        if !event.description.is_empty() {
            writeln!(out, "description {}", event.description)?;
        }
        writeln!(
            out,
            "start       {} {}",
            short_date_label(start.date_naive()),
            time_label(&start)
        )?;
        writeln!(
            out,
            "end         {} {}",
            short_date_label(end.date_naive()),
            time_label(&end)
        )?;
        writeln!(
            out,
            "category    {}",
            self.paint(event.category.name(), event.category.color_code(self.theme))
        )?;
        writeln!(out, "task        {}", if event.is_task { "yes" } else { "no" })?;
        if let Some(priority) = event.effective_priority() {
            writeln!(out, "priority    {}", self.paint(priority.name(), priority.color_code()))?;
        }
        writeln!(out, "repeat      {}", if event.repeat { "yes" } else { "no" })?;
        if let Some(color) = &event.color {
            writeln!(out, "color       {color}")?;
        }
        Ok(())
    }

    fn event_line(&self, event: &CalendarEvent, timezone: &Tz) -> String {
        let mut line = format!(
            "{}  {} [{}]",
            time_range_label(event, timezone),
            event.title,
            self.paint(event.category.name(), event.category.color_code(self.theme))
        );
        if event.is_task {
            line.push_str(" task");
            if let Some(priority) = event.effective_priority() {
                line.push(' ');
                line.push_str(&self.paint(priority.name(), priority.color_code()));
            }
        }
        if event.repeat {
            line.push_str(" (repeat)");
        }
        line.push_str(&format!("  {}", self.paint(&short_id(event.id.as_str()), "33")));
        line
    }

    fn cell(&self, text: &str, width: usize, code: Option<&str>) -> String {
        let fitted = fit(text, width);
        match code {
            Some(code) => {
                let trimmed = fitted.trim_end();
                let padding = width.saturating_sub(UnicodeWidthStr::width(trimmed));
                format!("{}{}", self.paint(trimmed, code), " ".repeat(padding))
            }
            None => fitted,
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn unreadable_time_range(record: &UnreadableRecord, timezone: &Tz) -> String {
    let start = timestamp_time_label(record.start(), timezone);
    let end = timestamp_time_label(record.end(), timezone);
    if start == INVALID_DATE && end == INVALID_DATE {
        return INVALID_DATE.to_string();
    }
    format!("{start} - {end}")
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Truncates to `width` display columns (marking the cut with `~`) and pads
/// with spaces to exactly `width`.
fn fit(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    let full = UnicodeWidthStr::width(text);

    for ch in text.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        let budget = if full > width { width.saturating_sub(1) } else { width };
        if used + w > budget {
            break;
        }
        out.push(ch);
        used += w;
    }
    if full > width {
        out.push('~');
        used += 1;
    }

    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{Renderer, fit, strip_ansi};
    use crate::config::Config;
    use crate::datastore::{EventStore, ThemePreference};
    use crate::datetime::FixedClock;
    use crate::event::{CalendarEvent, EventDraft};
    use crate::filter::CategoryFilter;
    use crate::storage::{EVENTS_KEY, MemoryStorage, Storage};

    fn clock() -> FixedClock {
        FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).single().expect("utc"),
            chrono_tz::UTC,
        )
    }

    fn event_at(title: &str, day: u32, hour: u32) -> CalendarEvent {
        let slot = Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).single().expect("utc");
        EventDraft::at_slot(slot).with_title(title).build().expect("valid event")
    }

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> anyhow::Result<()>,
    {
        let mut buf = Vec::new();
        f(&mut buf).expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn month_view_collapses_busy_days() {
        let renderer = Renderer::plain(ThemePreference::Light);
        let events = (8..13).map(|h| event_at(&format!("slot {h}"), 9, h)).collect::<Vec<_>>();
        let focus = NaiveDate::from_ymd_opt(2025, 3, 9).expect("date");

        let text = render(|buf| renderer.render_month(buf, focus, &events, &clock()));
        assert!(text.starts_with("March 2025\nMon"));
        assert!(text.contains("[9]"));
        assert!(text.contains("slot 10"));
        assert!(!text.contains("slot 11"));
        assert!(text.contains("+2 more"));
        // Feb 24 opens the grid, Apr 6 closes it.
        assert!(text.lines().nth(2).expect("first row").starts_with("24"));
    }

    #[test]
    fn week_and_day_views_list_events() {
        let renderer = Renderer::plain(ThemePreference::Dark);
        let events = vec![event_at("Standup", 4, 9), event_at("Lunch", 9, 12)];
        let focus = NaiveDate::from_ymd_opt(2025, 3, 9).expect("date");

        let week = render(|buf| renderer.render_week(buf, focus, &events, &clock()));
        assert!(week.starts_with("March 3 - 9, 2025"));
        assert!(week.contains("Tue, Mar 4"));
        assert!(week.contains("09:00 AM - 10:00 AM  Standup [Work]"));
        assert!(week.contains("Sun, Mar 9 (today)"));

        let day = render(|buf| renderer.render_day(buf, focus, &events, &clock()));
        assert!(day.starts_with("Sunday, March 9, 2025 (today)"));
        assert!(day.contains("12 PM | 12:00 PM - 01:00 PM  Lunch"));
        assert!(!day.contains("Standup"));
        assert_eq!(day.lines().count(), 25);
    }

    #[test]
    fn today_panel_reports_empty_days() {
        let renderer = Renderer::plain(ThemePreference::Light);
        let text = render(|buf| renderer.render_today(buf, &[], CategoryFilter::All, &clock()));
        assert!(text.contains("No events scheduled for today"));
    }

    #[test]
    fn table_lists_tasks_with_priority() {
        let renderer = Renderer::plain(ThemePreference::Light);
        let mut task = event_at("File taxes", 9, 10);
        task.is_task = true;
        let text = render(|buf| renderer.render_event_table(buf, &[&task], &chrono_tz::UTC));
        let row = text.lines().nth(2).expect("row");
        assert!(row.contains("File taxes"));
        assert!(row.contains("Medium"));
        assert!(row.contains("Sun, Mar 9"));
    }

    #[test]
    fn unreadable_records_show_invalid_dates() {
        let mut storage = MemoryStorage::new();
        storage
            .set_item(
                EVENTS_KEY,
                r#"[{"id":"keep-1","title":"Old","start":"not-a-date","end":"2025-03-01T11:00:00.000Z"}]"#,
            )
            .expect("seed");
        let store = EventStore::open(storage);

        let renderer = Renderer::plain(ThemePreference::Light);
        let text = render(|buf| {
            renderer.render_unreadable_table(buf, store.unreadable(), &chrono_tz::UTC)
        });
        let row = text.lines().nth(3).expect("row");
        assert!(row.starts_with("keep-1"));
        assert!(row.contains("Invalid Date - 11:00 AM"));
        assert!(row.contains("Old"));

        let month = render(|buf| {
            let focus = NaiveDate::from_ymd_opt(2025, 3, 1).expect("date");
            renderer.render_month(buf, focus, store.events(), &clock())
        });
        assert!(!month.contains("Old"));
    }

    #[test]
    fn color_setting_can_be_switched_off() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("rc.color".to_string(), "off".to_string())]);
        let renderer = Renderer::new(&cfg, ThemePreference::Dark).expect("renderer");
        assert!(!renderer.color);
        assert_eq!(renderer.paint("x", "31"), "x");
    }

    #[test]
    fn fit_truncates_and_pads() {
        assert_eq!(fit("abc", 5), "abc  ");
        assert_eq!(fit("abcdefgh", 5), "abcd~");
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }
}
