//! Session - explicit process context handed to every render engine.
//!
//! Replaces a process-wide application object: thread-count policy,
//! unattended mode, progress output channel, cross-engine abort
//! registration and the global "processing aborted" flag all live here and
//! are passed in at engine construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use uuid::Uuid;

use super::timeline::Timeline;
use crate::config::EngineSettings;

/// Progress strings mirrored to the controlling process when unattended.
pub const RENDERING_STARTED_LONG: &str = "Rendering started";
pub const RENDERING_STARTED_SHORT: &str = "Rendering started";
pub const FRAME_RENDERED_LONG: &str = "Frame rendered: ";
pub const FRAME_RENDERED_SHORT: &str = "Frame rendered: ";

/// Identity of one render engine instance.
pub type EngineId = Uuid;

/// How the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppMode {
    #[default]
    Interactive,
    /// No UI; progress goes to the output channel.
    Background,
    /// Unattended and started automatically; honours `abort_any_processing()`.
    BackgroundAutoRun,
}

/// External channel receiving progress messages (pipe, socket, parent process).
pub trait OutputChannel: Send + Sync {
    fn write(&self, message: &str) -> bool;
}

impl OutputChannel for crossbeam_channel::Sender<String> {
    fn write(&self, message: &str) -> bool {
        self.send(message.to_string()).is_ok()
    }
}

type EventPump = Box<dyn Fn() + Send + Sync>;

pub struct Session {
    settings: EngineSettings,
    mode: AppMode,
    timeline: Arc<Timeline>,
    output_channel: Option<Box<dyn OutputChannel>>,
    event_pump: Option<EventPump>,
    engines_being_aborted: Mutex<Vec<EngineId>>,
    processing_aborted: AtomicBool,
    should_refresh_preview: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("settings", &self.settings)
            .field("has_output_channel", &self.output_channel.is_some())
            .field("processing_aborted", &self.processing_aborted.load(Ordering::Relaxed))
            .finish()
    }
}

impl Session {
    pub fn new(settings: EngineSettings, mode: AppMode, timeline: Arc<Timeline>) -> Self {
        let settings = settings.sanitized();
        let refresh = settings.refresh_previews;
        match settings.effective_threads() {
            0 => info!("Session ({:?}): rendering inline on the calling thread", mode),
            n => info!("Session ({:?}): render thread budget {}", mode, n),
        }
        Self {
            settings,
            mode,
            timeline,
            output_channel: None,
            event_pump: None,
            engines_being_aborted: Mutex::new(Vec::new()),
            processing_aborted: AtomicBool::new(false),
            should_refresh_preview: AtomicBool::new(refresh),
        }
    }

    /// Attach the channel progress messages are written to.
    pub fn with_output_channel(mut self, channel: impl OutputChannel + 'static) -> Self {
        self.output_channel = Some(Box::new(channel));
        self
    }

    /// Attach the callback draining pending work of the host event loop.
    pub fn with_event_pump(mut self, pump: impl Fn() + Send + Sync + 'static) -> Self {
        self.event_pump = Some(Box::new(pump));
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Unattended (no interactive UI).
    pub fn is_background(&self) -> bool {
        self.mode != AppMode::Interactive
    }

    /// Render threads this session may use; 0 means inline.
    pub fn render_threads(&self) -> usize {
        self.settings.effective_threads()
    }

    /// Thread-count policy selects inline rendering on the caller's thread.
    pub fn is_single_threaded(&self) -> bool {
        self.render_threads() == 0
    }

    pub fn views_count(&self) -> usize {
        self.settings.views_count
    }

    pub fn main_view(&self) -> usize {
        self.settings.main_view
    }

    /// Write a progress message. Without a channel the long form is logged
    /// and `false` is returned.
    pub fn write_to_output_pipe(&self, long_message: &str, short_message: &str) -> bool {
        match &self.output_channel {
            Some(channel) => channel.write(short_message),
            None => {
                info!("{}", long_message);
                false
            }
        }
    }

    /// Run pending host callbacks on the calling thread.
    pub fn process_events(&self) {
        if let Some(pump) = &self.event_pump {
            pump();
        }
    }

    pub fn register_engine_being_aborted(&self, engine: EngineId) {
        let mut engines = self.engines_being_aborted.lock().unwrap_or_else(|e| e.into_inner());
        engines.push(engine);
        debug!("Engine {} being aborted ({} total)", engine, engines.len());
    }

    pub fn unregister_engine_being_aborted(&self, engine: EngineId) {
        let mut engines = self.engines_being_aborted.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = engines.iter().position(|e| *e == engine) {
            engines.remove(pos);
        }
    }

    /// Engines with an abort call currently in flight.
    pub fn engines_being_aborted(&self) -> Vec<EngineId> {
        self.engines_being_aborted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Raise the global "processing aborted" flag (observed by auto-run engines).
    pub fn abort_any_processing(&self) {
        info!("Abort of all processing requested");
        self.processing_aborted.store(true, Ordering::SeqCst);
    }

    pub fn has_abort_any_processing_been_called(&self) -> bool {
        self.processing_aborted.load(Ordering::SeqCst)
    }

    pub fn should_refresh_preview(&self) -> bool {
        self.should_refresh_preview.load(Ordering::Relaxed)
    }

    /// Suspend preview refresh (e.g. while the user scrubs).
    pub fn set_should_refresh_preview(&self, refresh: bool) {
        self.should_refresh_preview.store(refresh, Ordering::Relaxed);
    }
}
