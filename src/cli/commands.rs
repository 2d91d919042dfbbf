use std::fmt::Write as _;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::app::state::describe_position;
use crate::app::{Controller, ControllerOptions, SaveOutcome, SearchOutcome, Services, SystemClock};
use crate::config::{AppConfig, ConfigPaths};
use crate::geo::Position;
use crate::geolocate::FixedGeolocator;
use crate::highlight::{build_highlight_regex, mark_matches};
use crate::location::LocationStore;
use crate::places::NominatimClient;
use crate::search::NoteFilter;
use crate::storage::{NoteRecord, StorageHandle};

use super::Commands;

const SHELL_HELP: &str = "\
commands:
  locate                  use the device position for new notes
  search <place>          look up a place and target it for the next note
  form                    open or close the note form
  cancel                  close the note form
  save <title> | <body>   save a note at the selected position
  nearby                  list notes around the current position
  find <text> [--near]    list notes containing text, optionally near the selected position
  delete <id>             delete a note
  status                  show positions and search state
  quit                    leave the session";

#[derive(Args, Debug, Clone)]
pub struct PlaceArgs {
    /// Place name to look up
    #[arg(required = true)]
    pub query: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// Title for the note (prompted if omitted)
    #[arg()]
    pub title: Option<String>,
    /// Provide the note body inline. If omitted, reads from stdin.
    #[arg(long)]
    pub body: Option<String>,
    /// Take a fresh device fix and anchor the note there
    #[arg(long)]
    pub here: bool,
}

#[derive(Args, Debug, Clone)]
pub struct NearbyArgs {
    /// Search radius in meters (defaults to [location] nearby_radius_m)
    #[arg(long)]
    pub radius: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct FindArgs {
    /// Text to match against note titles and bodies
    #[arg()]
    pub text: Vec<String>,
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    pub lat: Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lon: Option<f64>,
    /// Restrict to notes around the selected position
    #[arg(long, conflicts_with_all = ["lat", "lon"])]
    pub near: bool,
    /// Radius in meters for --lat/--lon or --near (defaults to [location] default_radius_m)
    #[arg(long)]
    pub radius: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct PathArgs {
    /// JSON file path
    pub path: PathBuf,
}

/// One front-end session: the controller plus what the CLI needs around it.
pub struct Session {
    controller: Controller,
    storage: StorageHandle,
    snapshot_path: Option<PathBuf>,
    default_radius_m: f64,
}

impl Session {
    pub fn from_config(
        config: &AppConfig,
        paths: &ConfigPaths,
        at: Option<Position>,
    ) -> Result<Self> {
        let storage = StorageHandle::open(&config.storage);
        let device = at.or_else(|| config.location.device_position());
        let places = NominatimClient::new(&config.search).context("configuring place search")?;
        let services = Services {
            store: Arc::new(storage.clone()),
            geolocator: Arc::new(FixedGeolocator::new(device)),
            places: Arc::new(places),
            clock: Arc::new(SystemClock),
        };
        Ok(Self::new(
            services,
            storage,
            config,
            Some(paths.location_snapshot()),
        ))
    }

    pub fn new(
        services: Services,
        storage: StorageHandle,
        config: &AppConfig,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        let location = snapshot_path
            .as_deref()
            .map(LocationStore::restore)
            .unwrap_or_default();
        let controller =
            Controller::new(services, ControllerOptions::from(config)).with_location(location);
        Self {
            controller,
            storage,
            snapshot_path,
            default_radius_m: config.location.default_radius_m,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn persist_location(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        if let Err(err) = self.controller.location().persist(path) {
            tracing::warn!(?err, "failed to persist location snapshot");
        }
    }
}

pub async fn dispatch(session: &mut Session, command: Commands) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match command {
        Commands::Shell => {
            let stdin = io::stdin();
            run_shell(session, stdin.lock(), &mut out).await
        }
        Commands::Locate => locate(session, &mut out).await,
        Commands::Place(args) => place(session, &args.query.join(" "), &mut out).await,
        Commands::New(args) => new_note(session, args, &mut out).await,
        Commands::Nearby(args) => nearby(session, args.radius, &mut out).await,
        Commands::Find(args) => find(session, args, &mut out).await,
        Commands::Delete { id } => delete(session, id, &mut out).await,
        Commands::Export(args) => {
            let count = session
                .storage
                .export_json(&args.path)
                .context("exporting notes")?;
            writeln!(out, "Exported {count} note{}", plural(count))?;
            Ok(())
        }
        Commands::Import(args) => {
            let count = session
                .storage
                .import_json(&args.path)
                .context("importing notes")?;
            writeln!(out, "Imported {count} note{}", plural(count))?;
            Ok(())
        }
    }
}

pub async fn run_shell<R: BufRead, W: Write>(
    session: &mut Session,
    input: R,
    out: &mut W,
) -> Result<()> {
    writeln!(out, "geonotes shell, type 'help' for commands")?;
    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            writeln!(out)?;
            break;
        };
        let line = line.context("reading shell input")?;
        match shell_command(session, line.trim(), out).await {
            Ok(true) => {}
            Ok(false) => break,
            // command failures are reported and the session goes on
            Err(err) => writeln!(out, "error: {err:#}")?,
        }
        session.persist_location();
    }
    Ok(())
}

async fn shell_command<W: Write>(session: &mut Session, line: &str, out: &mut W) -> Result<bool> {
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));
    match command {
        "" => {}
        "quit" | "exit" => return Ok(false),
        "help" => writeln!(out, "{SHELL_HELP}")?,
        "locate" => locate(session, out).await?,
        "search" => {
            session.controller.submit_search(rest).await;
            write_search_feedback(session, out)?;
        }
        "form" => {
            session.controller.toggle_note_form().await;
            let state = if session.controller.view().form_open {
                "open"
            } else {
                "closed"
            };
            writeln!(out, "note form {state}")?;
            flush_alerts(session, out)?;
        }
        "cancel" => {
            session.controller.cancel_note_form();
            writeln!(out, "note form closed")?;
        }
        "save" => {
            let (title, body) = rest
                .split_once('|')
                .map(|(t, b)| (t.trim(), b.trim()))
                .unwrap_or((rest, ""));
            save(session, title, body, out).await?;
        }
        "nearby" => nearby(session, None, out).await?,
        "find" => {
            let mut near = false;
            let words: Vec<&str> = rest
                .split_whitespace()
                .filter(|word| {
                    let flag = *word == "--near";
                    near |= flag;
                    !flag
                })
                .collect();
            let mut filter = NoteFilter::default().text(words.join(" "));
            if near {
                let anchor = near_anchor(session)?;
                filter = filter
                    .within(session.default_radius_m)
                    .near(anchor.latitude, anchor.longitude);
            }
            let notes = session.controller.find_notes(&filter).await;
            flush_alerts(session, out)?;
            write!(out, "{}", format_notes(&notes, &filter))?;
        }
        "delete" => {
            let id: i64 = rest
                .parse()
                .with_context(|| format!("invalid note id {rest:?}"))?;
            delete(session, id, out).await?;
        }
        "status" => write_status(session, out)?,
        other => writeln!(out, "unknown command '{other}', try 'help'")?,
    }
    Ok(true)
}

async fn locate<W: Write>(session: &mut Session, out: &mut W) -> Result<()> {
    let located = session.controller.locate().await;
    flush_alerts(session, out)?;
    if located.is_none() {
        bail!("device position unavailable (configure [location] or pass --at LAT,LON)");
    }
    writeln!(out, "{}", session.controller.view().location_text)?;
    write_nearby(session, out)
}

async fn place<W: Write>(session: &mut Session, query: &str, out: &mut W) -> Result<()> {
    let outcome = session.controller.submit_search(query).await;
    write_search_feedback(session, out)?;
    match outcome {
        SearchOutcome::Found(_) | SearchOutcome::Empty => Ok(()),
        SearchOutcome::Ignored => bail!("search query cannot be empty"),
        SearchOutcome::Throttled => bail!("search throttled"),
        SearchOutcome::Failed => bail!("place search failed"),
    }
}

fn write_search_feedback<W: Write>(session: &mut Session, out: &mut W) -> Result<()> {
    flush_alerts(session, out)?;
    let view = session.controller.view();
    if !view.search_text.is_empty() {
        writeln!(out, "{}", view.search_text)?;
    }
    Ok(())
}

async fn new_note<W: Write>(session: &mut Session, args: NewArgs, out: &mut W) -> Result<()> {
    let title = match args.title {
        Some(t) => t,
        None => prompt("Title")?,
    };
    let body = if let Some(body) = args.body {
        body
    } else {
        read_stdin()?.unwrap_or_default()
    };
    if args.here && session.controller.locate().await.is_none() {
        flush_alerts(session, out)?;
        bail!("device position unavailable");
    }
    save(session, &title, &body, out).await
}

async fn save<W: Write>(session: &mut Session, title: &str, body: &str, out: &mut W) -> Result<()> {
    let outcome = session.controller.save_note(title, body).await;
    let alerts = flush_alerts(session, out)?;
    match outcome {
        SaveOutcome::Saved { id } => {
            writeln!(out, "Created note #{id}")?;
            Ok(())
        }
        SaveOutcome::Rejected | SaveOutcome::Failed => {
            bail!("note not saved: {}", alerts.join("; "))
        }
    }
}

async fn nearby<W: Write>(session: &mut Session, radius: Option<f64>, out: &mut W) -> Result<()> {
    if let Some(radius) = radius {
        if !(radius.is_finite() && radius > 0.0) {
            bail!("radius must be a positive number of meters");
        }
        session.controller.set_nearby_radius(radius);
    }
    if session.controller.location().current().is_none() {
        session.controller.locate().await;
    } else {
        session.controller.refresh_nearby().await;
    }
    flush_alerts(session, out)?;
    let Some(current) = session.controller.location().current().copied() else {
        bail!("current position unknown; run 'locate' first");
    };
    writeln!(out, "Around {}", describe_position(&current))?;
    write_nearby(session, out)
}

fn write_nearby<W: Write>(session: &Session, out: &mut W) -> Result<()> {
    let lines = session.controller.view().nearby_lines();
    if lines.is_empty() {
        writeln!(out, "No notes nearby.")?;
    }
    for line in lines {
        writeln!(out, "  {line}")?;
    }
    Ok(())
}

async fn find<W: Write>(session: &mut Session, args: FindArgs, out: &mut W) -> Result<()> {
    let mut filter = NoteFilter::default().within(args.radius.unwrap_or(session.default_radius_m));
    let text = args.text.join(" ");
    if !text.trim().is_empty() {
        filter = filter.text(text);
    }
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        filter = filter.near(lat, lon);
    } else if args.near {
        let anchor = near_anchor(session)?;
        filter = filter.near(anchor.latitude, anchor.longitude);
    }
    if let Some(center) = filter.center() {
        if !center.is_valid() {
            bail!("coordinates out of range: {}, {}", center.latitude, center.longitude);
        }
    }

    let notes = session.controller.find_notes(&filter).await;
    flush_alerts(session, out)?;
    write!(out, "{}", format_notes(&notes, &filter))?;
    Ok(())
}

/// Selected position, falling back to the current one.
fn near_anchor(session: &Session) -> Result<Position> {
    let location = session.controller.location();
    let Some(anchor) = location.selected().or(location.current()).copied() else {
        bail!("no selected position; run 'locate' or 'place' first");
    };
    Ok(anchor)
}

async fn delete<W: Write>(session: &mut Session, id: i64, out: &mut W) -> Result<()> {
    let deleted = session.controller.delete_note(id).await;
    flush_alerts(session, out)?;
    if !deleted {
        bail!("note #{id} could not be deleted");
    }
    writeln!(out, "Deleted note #{id}")?;
    Ok(())
}

fn write_status<W: Write>(session: &Session, out: &mut W) -> Result<()> {
    let controller = session.controller();
    let describe = |pos: Option<&Position>| {
        pos.map(describe_position)
            .unwrap_or_else(|| "unknown".to_string())
    };
    writeln!(out, "current:  {}", describe(controller.location().current()))?;
    writeln!(out, "selected: {}", describe(controller.location().selected()))?;
    writeln!(out, "search:   {:?}", controller.phase())?;
    if !controller.view().search_text.is_empty() {
        writeln!(out, "result:   {}", controller.view().search_text)?;
    }
    writeln!(
        out,
        "form:     {}",
        if controller.view().form_open {
            "open"
        } else {
            "closed"
        }
    )?;
    Ok(())
}

fn flush_alerts<W: Write>(session: &mut Session, out: &mut W) -> Result<Vec<String>> {
    let alerts = session.controller.take_alerts();
    for alert in &alerts {
        writeln!(out, "! {alert}")?;
    }
    Ok(alerts)
}

fn format_notes(notes: &[NoteRecord], filter: &NoteFilter) -> String {
    if notes.is_empty() {
        return "No matches found.\n".to_string();
    }
    let tokens: Vec<String> = filter.text.iter().cloned().collect();
    let highlight = build_highlight_regex(&tokens);
    let mut sorted: Vec<&NoteRecord> = notes.iter().collect();
    sorted.sort_by(|a, b| b.id.cmp(&a.id));

    let mut out = String::new();
    for note in sorted {
        let _ = writeln!(
            &mut out,
            "#{}  {}",
            note.id,
            mark_matches(&note.title, highlight.as_ref())
        );
        let _ = writeln!(
            &mut out,
            "    at {:.6}, {:.6}  created {}",
            note.latitude, note.longitude, note.created_at
        );
        if let Some(snippet) = build_snippet(&note.body, 2) {
            let _ = writeln!(&mut out, "    {}", mark_matches(&snippet, highlight.as_ref()));
        }
        out.push('\n');
    }
    out
}

fn build_snippet(body: &str, lines: usize) -> Option<String> {
    let segments: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(lines)
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join(" ").chars().take(160).collect())
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
