use compflow::cli::Args;
use compflow::config::{EngineSettings, SETTINGS_FILE};
use compflow::core::engine::{RenderEngine, RenderRequest};
use compflow::core::engine_events::StopReason;
use compflow::core::frame_cache::{FrameCache, LruFrameCache};
use compflow::core::run_args::UNBOUNDED_FRAME_COUNT;
use compflow::entities::output::RenderOutput;
use compflow::entities::session::{AppMode, Session};
use compflow::entities::timeline::Timeline;
use compflow::nodes::merge::{INPUT_A, INPUT_B};
use compflow::nodes::{Generator, ImageInput, Merge, MergeOp, Pattern, SequenceReader, Viewer, Writer};
use compflow::paths::{self, PathConfig};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unbounded runs stop after this long unless `--run-for` says otherwise
const DEFAULT_RUN_SECS: f64 = 5.0;

/// Frames flowing into the viewer/writer, plus the sink itself
struct Graph {
    output: RenderOutput,
    viewer: Option<Arc<Viewer>>,
    writer: Option<Arc<Writer>>,
}

fn build_graph(args: &Args, timeline: &Arc<Timeline>, cache: Arc<dyn FrameCache>, view: usize) -> Graph {
    let ramp = Generator::new("Ramp", Pattern::Ramp);
    let merge = Merge::new("Merge", MergeOp::Average);
    merge.connect(INPUT_A, Some(ImageInput::new(ramp)));
    if args.sequence {
        let reader = SequenceReader::new("Reader", args.first, args.last);
        merge.connect(INPUT_B, Some(ImageInput::new(reader)));
    } else {
        let checker = Generator::new("Checker", Pattern::Checker { size: 8 });
        merge.connect(INPUT_B, Some(ImageInput::new(checker)));
    }

    match &args.writer {
        Some(dir) => {
            let writer = Writer::new("Write", dir.clone());
            writer.connect(Some(ImageInput::new(merge)));
            Graph {
                output: RenderOutput::writer(writer.clone()),
                viewer: None,
                writer: Some(writer),
            }
        }
        None => {
            let viewer = Viewer::new("Viewer", Arc::clone(timeline), cache, view);
            viewer.connect(Some(ImageInput::new(merge)));
            Graph {
                output: RenderOutput::viewer(viewer.clone()),
                viewer: Some(viewer),
                writer: None,
            }
        }
    }
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::log_file("compflow.log", path_config));
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn load_settings(args: &Args, path_config: &PathConfig) -> EngineSettings {
    let path = paths::config_file(SETTINGS_FILE, path_config);
    info!("Config path: {}", path.display());
    let mut settings = EngineSettings::load(&path).unwrap_or_else(|e| {
        warn!("{:#}, using defaults", e);
        EngineSettings::default()
    });
    if let Some(threads) = args.threads {
        settings.number_of_threads = threads;
    }
    if let Some(fps) = args.fps {
        settings.desired_fps = fps;
    }
    if let Some(mode) = args.mode {
        settings.playback_mode = mode;
    }
    settings.sanitized()
}

fn print_progress(progress: &Option<Receiver<String>>) {
    if let Some(rx) = progress {
        for line in rx.try_iter() {
            println!("{}", line);
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    init_logging(&args, &path_config)?;

    info!("compflow v{} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let settings = load_settings(&args, &path_config);
    let cache = Arc::new(LruFrameCache::new(settings.frame_cache_capacity));
    let view = settings.main_view;
    let timeline = Arc::new(Timeline::new(args.first, args.last));

    let mode = if args.background { AppMode::Background } else { AppMode::Interactive };
    let mut session = Session::new(settings, mode, Arc::clone(&timeline));
    let progress = if args.background {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        session = session.with_output_channel(tx);
        Some(rx)
    } else {
        None
    };
    let session = Arc::new(session);

    let graph = build_graph(&args, &timeline, cache.clone(), view);
    let engine = RenderEngine::new(graph.output.clone(), Arc::clone(&session));

    let (done_tx, done_rx) = crossbeam_channel::bounded::<StopReason>(1);
    let (watchdog_tx, watchdog_rx) = crossbeam_channel::bounded::<()>(1);
    engine.on_engine_stopped(move |e| {
        let _ = done_tx.try_send(e.reason);
        let _ = watchdog_tx.try_send(());
    });
    engine.on_fps_changed(|e| info!("Playback: {:.1} fps (desired {:.1})", e.actual, e.desired));

    let limit = args
        .run_for
        .or((args.frames == UNBOUNDED_FRAME_COUNT).then_some(DEFAULT_RUN_SECS))
        .map(|secs| Duration::from_secs_f64(secs.max(0.0)));

    let started = Instant::now();
    let reason = std::thread::scope(|s| -> Result<StopReason> {
        let engine = &engine;
        if let Some(limit) = limit {
            s.spawn(move || {
                if watchdog_rx.recv_timeout(limit) == Err(RecvTimeoutError::Timeout) {
                    info!("Run time limit of {:?} reached, aborting", limit);
                    engine.abort_rendering(true);
                }
            });
        }

        engine
            .render(RenderRequest::playback(args.frames, true))
            .context("Failed to start rendering")?;

        loop {
            match done_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(reason) => break Ok(reason),
                Err(RecvTimeoutError::Timeout) => {
                    print_progress(&progress);
                    // Nothing polls the deferred queue in a CLI run
                    engine.events().poll();
                }
                Err(RecvTimeoutError::Disconnected) => anyhow::bail!("Render engine went away"),
            }
        }
    })?;
    print_progress(&progress);

    let elapsed = started.elapsed();
    engine.quit_engine_thread();
    drop(engine);

    let outcome = match reason {
        StopReason::Finished => "finished",
        StopReason::Aborted => "aborted",
    };
    if let Some(viewer) = &graph.viewer {
        let stats = cache.stats();
        println!(
            "Viewer {}: {} frame(s) shown in {:.2?}, last frame {:?}, cache hit rate {:.0}%",
            outcome,
            viewer.frames_shown(),
            elapsed,
            viewer.displayed_frame(),
            stats.hit_rate() * 100.0
        );
    }
    if let Some(writer) = &graph.writer {
        let written = writer.written();
        println!("Writer {}: {} frame(s) written in {:.2?}", outcome, written.len(), elapsed);
        for frame in written.iter().filter_map(|f| f.path.as_ref()) {
            debug!("  {}", frame.display());
        }
    }
    Ok(())
}
