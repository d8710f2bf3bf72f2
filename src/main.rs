use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use serde::Serialize;
use simplelog::{Config, LevelFilter, WriteLogger};

use page_preview::panic_handler::initialize_panic_handler;
use page_preview::preview::{Command, LoaderStats, Preview, ViewerSession};
use page_preview::settings::Settings;
use page_preview::synthetic::{LETTER, SyntheticDocument, SyntheticRenderer};

/// Page through a synthetic document the way a viewer would, and report what
/// the preview cache did.
#[derive(Parser, Debug)]
#[command(name = "page-preview", version, about)]
struct Args {
    /// Number of pages in the document
    #[arg(long, default_value_t = 40)]
    pages: usize,

    /// Viewport size, e.g. 800x600
    #[arg(long, default_value = "800x600", value_parser = parse_size)]
    viewport: (f32, f32),

    /// Pages preloaded on each side (overrides the config file)
    #[arg(long)]
    radius: Option<usize>,

    /// Render worker threads (overrides the config file)
    #[arg(long)]
    workers: Option<usize>,

    /// First page shown
    #[arg(long, default_value_t = 1)]
    start: usize,

    /// Page turns to simulate
    #[arg(long, default_value_t = 10)]
    steps: usize,

    /// Resize the viewport before a step, e.g. 5=1024x768
    #[arg(long = "resize-at", value_parser = parse_resize)]
    resize_at: Vec<(usize, (f32, f32))>,

    /// Artificial render latency in milliseconds
    #[arg(long, default_value_t = 0)]
    render_delay_ms: u64,

    /// Write each displayed preview as PNG into this directory
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "page-preview.log")]
    log_file: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_size(s: &str) -> Result<(f32, f32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w: f32 = w.trim().parse().map_err(|e| format!("bad width '{w}': {e}"))?;
    let h: f32 = h.trim().parse().map_err(|e| format!("bad height '{h}': {e}"))?;
    if w <= 0.0 || h <= 0.0 {
        return Err(format!("size must be positive, got '{s}'"));
    }
    Ok((w, h))
}

fn parse_resize(s: &str) -> Result<(usize, (f32, f32)), String> {
    let (step, size) = s
        .split_once('=')
        .ok_or_else(|| format!("expected STEP=WIDTHxHEIGHT, got '{s}'"))?;
    let step = step
        .trim()
        .parse()
        .map_err(|e| format!("bad step '{step}': {e}"))?;
    Ok((step, parse_size(size)?))
}

#[derive(Serialize)]
struct Summary {
    document: String,
    pages: usize,
    steps: usize,
    final_page: usize,
    cache_len: usize,
    cache_bytes: usize,
    capacity: usize,
    gates: usize,
    discarded: usize,
    elapsed_ms: u128,
    stats: LoaderStats,
}

fn main() -> Result<()> {
    let args = Args::parse();

    WriteLogger::init(args.log_level, Config::default(), File::create(&args.log_file)?)?;
    initialize_panic_handler();

    info!("Starting page-preview simulation");
    if let Err(err) = run(&args) {
        error!("Simulation failed: {err:?}");
        return Err(err);
    }
    info!("Shutting down page-preview");
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    if args.pages == 0 {
        bail!("document must have at least one page");
    }

    let mut settings = Settings::load(args.config.as_deref())?;
    settings.apply_env()?;
    if let Some(radius) = args.radius {
        settings.preload_radius = radius;
    }
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }

    if let Some(dir) = &args.dump_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let document = SyntheticDocument::new(format!("synthetic-{}", args.pages), args.pages, LETTER);
    let renderer = SyntheticRenderer::for_document(&document)
        .with_delay(Duration::from_millis(args.render_delay_ms));
    let mut session = ViewerSession::new(document, renderer, settings.loader_config());

    let started = Instant::now();
    let wait = Duration::from_secs(30) + Duration::from_millis(args.render_delay_ms * 10);

    let (width, height) = args.viewport;
    session.apply_command(Command::SetViewport { width, height });
    session.apply_command(Command::GoToPage(args.start));
    settle(&mut session, wait)?;
    dump(args.dump_dir.as_deref(), 0, session.displayed())?;

    for step in 1..=args.steps {
        for (_, (width, height)) in args.resize_at.iter().filter(|(at, _)| *at == step) {
            info!("step {step}: viewport -> {width}x{height}");
            session.apply_command(Command::SetViewport {
                width: *width,
                height: *height,
            });
        }
        let next = session.state().current_page + 1;
        session.apply_command(Command::GoToPage(next));
        settle(&mut session, wait)?;
        dump(args.dump_dir.as_deref(), step, session.displayed())?;
    }

    let loader = session.loader();
    let summary = Summary {
        document: loader.source().name().to_owned(),
        pages: args.pages,
        steps: args.steps,
        final_page: session.state().current_page,
        cache_len: loader.cache_len(),
        cache_bytes: loader.cache_bytes(),
        capacity: loader.capacity(),
        gates: loader.gate_count(),
        discarded: session.discarded(),
        elapsed_ms: started.elapsed().as_millis(),
        stats: loader.stats(),
    };
    print_summary(&summary, args.json)
}

fn settle(
    session: &mut ViewerSession<SyntheticDocument, SyntheticRenderer>,
    wait: Duration,
) -> Result<()> {
    if !session.wait_idle(wait) {
        bail!(
            "renders still pending after {:?} ({} outstanding)",
            wait,
            session.loader().pending_count()
        );
    }
    Ok(())
}

fn dump(dir: Option<&Path>, step: usize, preview: Option<Preview>) -> Result<()> {
    let (Some(dir), Some(preview)) = (dir, preview) else {
        return Ok(());
    };
    let image = preview
        .bitmap
        .to_rgb_image()
        .context("bitmap dimensions do not match its pixel buffer")?;
    let path = dir.join(format!(
        "step{step:03}-page{:04}-{}.png",
        preview.page.index, preview.size
    ));
    image
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn print_summary(summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let s = &summary.stats;
    println!(
        "{}: {} pages, {} steps, ended on page {} in {} ms",
        summary.document,
        summary.pages,
        summary.steps,
        summary.final_page,
        summary.elapsed_ms
    );
    println!(
        "cache: {}/{} entries ({} KiB), {} gates",
        summary.cache_len,
        summary.capacity,
        summary.cache_bytes / 1024,
        summary.gates
    );
    println!(
        "requests: {} (hits {}, stale {}, misses {}, preloads {})",
        s.requests, s.hits, s.stale_serves, s.misses, s.preloads
    );
    println!(
        "renders: {} (coalesced {}, failed {}), evictions {}, discarded {}",
        s.renders, s.coalesced, s.failures, s.evictions, summary.discarded
    );
    Ok(())
}
