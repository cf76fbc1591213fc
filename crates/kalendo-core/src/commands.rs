use std::io::{self, BufRead, Write};

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, EventFields, ThemeAction, ViewArgs};
use crate::config::Config;
use crate::datastore::{EventStore, ThemePreference, ThemeStore};
use crate::datetime::{Clock, parse_day_expr, parse_slot_expr};
use crate::event::{CalendarEvent, EventDraft};
use crate::filter::{CategoryFilter, events_for_date, today_events};
use crate::grid::{CalendarView, month_grid_for, shift_focus};
use crate::render::Renderer;
use crate::storage::Storage;

/// Everything a command needs: both stores, the clock and the loaded config.
#[derive(Debug)]
pub struct Session<S: Storage, C: Clock> {
    pub events: EventStore<S>,
    pub theme: ThemeStore<S>,
    pub clock: C,
    pub cfg: Config,
}

impl<S: Storage, C: Clock> Session<S, C> {
    fn renderer(&self) -> anyhow::Result<Renderer> {
        Renderer::new(&self.cfg, self.theme.theme())
    }
}

#[instrument(skip(session, command))]
pub fn dispatch<S: Storage, C: Clock>(
    session: &mut Session<S, C>,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let command = match command {
        Some(command) => command,
        None => {
            let view = session.cfg.default_view()?;
            debug!(view = %view, "no explicit command, rendering default view");
            return cmd_view(session, view, &ViewArgs::default());
        }
    };

    debug!(?command, "dispatching command");
    match command {
        Command::Month(args) => cmd_view(session, CalendarView::Month, &args),
        Command::Week(args) => cmd_view(session, CalendarView::Week, &args),
        Command::Day(args) => cmd_view(session, CalendarView::Day, &args),
        Command::Today { category } => cmd_today(session, category),
        Command::List { date } => cmd_list(session, date.as_deref()),
        Command::Add { title, at, fields } => cmd_add(session, title, at.as_deref(), &fields),
        Command::Edit {
            id,
            title,
            start,
            fields,
            no_task,
            no_repeat,
        } => {
            let edit = EventEdit {
                title,
                start,
                fields,
                no_task,
                no_repeat,
            };
            cmd_edit(session, &id, &edit)
        }
        Command::Show { id } => cmd_show(session, &id),
        Command::Delete { id } => cmd_delete(session, &id),
        Command::Clear { yes } => cmd_clear(session, yes, io::stdin().lock()),
        Command::Theme { action } => cmd_theme(session, action.unwrap_or(ThemeAction::Show)),
    }
}

/// Focus date for a view: `--date` (default today) moved by `--shift` steps.
pub fn resolve_focus<C: Clock + ?Sized>(
    view: CalendarView,
    args: &ViewArgs,
    clock: &C,
) -> anyhow::Result<NaiveDate> {
    let today = clock.today();
    let base = match args.date.as_deref() {
        Some(expr) => parse_day_expr(expr, today)?,
        None => today,
    };
    let focus = shift_focus(base, view, i64::from(args.shift))
        .ok_or_else(|| anyhow!("shifting {base} by {} leaves the calendar range", args.shift))?;
    if month_grid_for(focus).is_none() {
        bail!("{focus} is too close to the edge of the calendar range to display");
    }
    Ok(focus)
}

#[instrument(skip(session, args))]
fn cmd_view<S: Storage, C: Clock>(
    session: &Session<S, C>,
    view: CalendarView,
    args: &ViewArgs,
) -> anyhow::Result<()> {
    let focus = resolve_focus(view, args, &session.clock)?;
    info!(view = %view, focus = %focus, "command view");

    session
        .renderer()?
        .print_view(view, focus, session.events.events(), &session.clock)
}

#[instrument(skip(session))]
fn cmd_today<S: Storage, C: Clock>(
    session: &Session<S, C>,
    category: CategoryFilter,
) -> anyhow::Result<()> {
    info!("command today");

    let events = category.apply(today_events(session.events.events(), &session.clock));
    session
        .renderer()?
        .print_today(&events, category, &session.clock)
}

#[instrument(skip(session))]
fn cmd_list<S: Storage, C: Clock>(
    session: &Session<S, C>,
    date: Option<&str>,
) -> anyhow::Result<()> {
    info!("command list");

    let timezone = session.clock.timezone();
    let events = match date {
        Some(expr) => {
            let day = parse_day_expr(expr, session.clock.today())?;
            events_for_date(session.events.events(), day, &timezone)
        }
        None => {
            let mut all = session.events.events().iter().collect::<Vec<_>>();
            all.sort_by_key(|event| event.start);
            all
        }
    };

    // Unreadable records belong to no day, so only the full listing shows them.
    let unreadable = match date {
        Some(_) => &[][..],
        None => session.events.unreadable(),
    };
    if events.is_empty() && unreadable.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    let renderer = session.renderer()?;
    if !events.is_empty() {
        renderer.print_event_table(&events, &timezone)?;
    }
    if !unreadable.is_empty() {
        if !events.is_empty() {
            println!();
        }
        renderer.print_unreadable_table(unreadable, &timezone)?;
    }
    Ok(())
}

#[instrument(skip(session, title, fields))]
fn cmd_add<S: Storage, C: Clock>(
    session: &mut Session<S, C>,
    title: String,
    at: Option<&str>,
    fields: &EventFields,
) -> anyhow::Result<()> {
    info!("command add");

    let event = build_event(&session.clock, title, at, fields)?;
    let id = event.id.clone();
    session.events.add(event)?;

    debug!(count = session.events.len(), "event added");
    println!("Created event {}.", short(id.as_str()));
    Ok(())
}

/// A new event from the form defaults of the chosen slot plus any explicit
/// fields. Without `at` the slot is the current hour.
pub fn build_event<C: Clock + ?Sized>(
    clock: &C,
    title: String,
    at: Option<&str>,
    fields: &EventFields,
) -> anyhow::Result<CalendarEvent> {
    let slot = match at {
        Some(expr) => parse_slot_expr(expr, clock).context("invalid --at")?,
        None => clock.now(),
    };

    let mut draft = EventDraft::at_slot(slot.with_timezone(&clock.timezone())).with_title(title);
    if let Some(end) = fields.end.as_deref() {
        draft.end = parse_slot_expr(end, clock).context("invalid --end")?;
    }
    if let Some(description) = &fields.description {
        draft.description = description.clone();
    }
    if let Some(category) = fields.category {
        draft.category = category;
    }
    if let Some(priority) = fields.priority {
        draft.priority = priority;
    }
    draft.is_task = fields.task;
    draft.repeat = fields.repeat;

    warn_if_inverted(draft.start, draft.end);
    draft.build()
}

#[derive(Debug, Clone, Default)]
pub struct EventEdit {
    pub title: Option<String>,
    pub start: Option<String>,
    pub fields: EventFields,
    pub no_task: bool,
    pub no_repeat: bool,
}

/// Applies an edit to a copy of `event`. Moving the start without an
/// explicit end keeps the event's duration.
pub fn apply_edit<C: Clock + ?Sized>(
    event: &CalendarEvent,
    edit: &EventEdit,
    clock: &C,
) -> anyhow::Result<CalendarEvent> {
    let mut next = event.clone();

    if let Some(title) = &edit.title {
        next.title = title.trim().to_string();
    }
    if let Some(start) = edit.start.as_deref() {
        let duration = next.duration();
        next.start = parse_slot_expr(start, clock).context("invalid --start")?;
        next.end = next
            .start
            .checked_add_signed(duration)
            .ok_or_else(|| anyhow!("moved event would end outside the date range"))?;
    }
    if let Some(end) = edit.fields.end.as_deref() {
        next.end = parse_slot_expr(end, clock).context("invalid --end")?;
    }
    if let Some(description) = &edit.fields.description {
        next.description = description.clone();
    }
    if let Some(category) = edit.fields.category {
        next.category = category;
    }
    if let Some(priority) = edit.fields.priority {
        next.priority = Some(priority);
    }
    if edit.fields.task {
        next.is_task = true;
    }
    if edit.no_task {
        next.is_task = false;
    }
    if edit.fields.repeat {
        next.repeat = true;
    }
    if edit.no_repeat {
        next.repeat = false;
    }

    warn_if_inverted(next.start, next.end);
    Ok(next)
}

#[instrument(skip(session, edit))]
fn cmd_edit<S: Storage, C: Clock>(
    session: &mut Session<S, C>,
    id: &str,
    edit: &EventEdit,
) -> anyhow::Result<()> {
    info!("command edit");

    let id = session.events.resolve_id(id)?;
    let current = session.events.get(&id).ok_or_else(|| {
        anyhow!("event {id} has unreadable dates; it can only be shown or deleted")
    })?;
    let updated = apply_edit(current, edit, &session.clock)?;

    if updated == *current {
        println!("Event {} unchanged.", short(id.as_str()));
        return Ok(());
    }
    if !session.events.update(updated)? {
        bail!("event {id} disappeared while editing");
    }
    println!("Modified event {}.", short(id.as_str()));
    Ok(())
}

#[instrument(skip(session))]
fn cmd_show<S: Storage, C: Clock>(session: &Session<S, C>, id: &str) -> anyhow::Result<()> {
    let id = session.events.resolve_id(id)?;
    let timezone = session.clock.timezone();
    if let Some(event) = session.events.get(&id) {
        return session.renderer()?.print_event_info(event, &timezone);
    }
    let record = session
        .events
        .get_unreadable(&id)
        .ok_or_else(|| anyhow!("no event with id {id}"))?;
    session.renderer()?.print_unreadable_info(record, &timezone)
}

#[instrument(skip(session))]
fn cmd_delete<S: Storage, C: Clock>(session: &mut Session<S, C>, id: &str) -> anyhow::Result<()> {
    info!("command delete");

    let id = session.events.resolve_id(id)?;
    let title = match session.events.get(&id) {
        Some(event) => event.title.clone(),
        None => session
            .events
            .get_unreadable(&id)
            .map(|record| record.title().to_string())
            .unwrap_or_default(),
    };

    if session.events.delete(&id)? {
        println!("Deleted event {} '{}'.", short(id.as_str()), title);
    } else {
        println!("No event {id}.");
    }
    Ok(())
}

#[instrument(skip(session, input))]
fn cmd_clear<S: Storage, C: Clock, R: BufRead>(
    session: &mut Session<S, C>,
    yes: bool,
    input: R,
) -> anyhow::Result<()> {
    info!("command clear");

    let stored = session.events.len() + session.events.unreadable().len();
    if stored == 0 {
        println!("No events to clear.");
        return Ok(());
    }

    let prompt = format!("Clear all {stored} events? This cannot be undone. (yes/no) ");
    if !yes && !confirm(&prompt, input)? {
        println!("Nothing cleared.");
        return Ok(());
    }

    let removed = session.events.clear()?;
    println!("Cleared {removed} events.");
    Ok(())
}

/// Reads one answer line; anything but `y`/`yes` declines.
pub fn confirm<R: BufRead>(prompt: &str, mut input: R) -> anyhow::Result<bool> {
    print!("{prompt}");
    io::stdout().flush().context("failed to flush prompt")?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

#[instrument(skip(session))]
fn cmd_theme<S: Storage, C: Clock>(
    session: &mut Session<S, C>,
    action: ThemeAction,
) -> anyhow::Result<()> {
    let theme = match action {
        ThemeAction::Show => session.theme.theme(),
        ThemeAction::Toggle => session.theme.toggle()?,
        ThemeAction::Dark => {
            session.theme.set(ThemePreference::Dark)?;
            ThemePreference::Dark
        }
        ThemeAction::Light => {
            session.theme.set(ThemePreference::Light)?;
            ThemePreference::Light
        }
    };

    info!(theme = %theme, "command theme");
    println!("Theme: {theme}");
    Ok(())
}

fn warn_if_inverted(start: DateTime<Utc>, end: DateTime<Utc>) {
    if end < start {
        warn!(%start, %end, "event ends before it starts");
    }
}

fn short(id: &str) -> String {
    id.chars().take(8).collect()
}
