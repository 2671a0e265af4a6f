//! Engine settings persisted as JSON.
//!
//! Missing fields fall back to defaults (`#[serde(default)]`), so settings
//! files written by older versions keep loading.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::run_args::PlaybackMode;

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "compflow.json";

/// `number_of_threads` value selecting inline single-threaded rendering.
pub const INLINE_RENDERING: i32 = -1;

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    // Threads
    pub number_of_threads: i32, // -1 = inline, 0 = auto, N = explicit

    // Playback
    pub desired_fps: f64,
    pub fps_refresh_rate: u32, // Frames between fps-changed notifications
    pub playback_mode: PlaybackMode,
    pub refresh_previews: bool,

    // Project
    pub views_count: usize,
    pub main_view: usize,

    // Cache
    pub frame_cache_capacity: usize, // Entries kept by the LRU frame cache
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            number_of_threads: 0,
            desired_fps: 24.0,
            fps_refresh_rate: 10,
            playback_mode: PlaybackMode::Loop,
            refresh_previews: true,
            views_count: 1,
            main_view: 0,
            frame_cache_capacity: 256,
        }
    }
}

impl EngineSettings {
    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings.sanitized())
    }

    /// Write settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;
        Ok(())
    }

    /// Clamp values that would stall or divide by zero.
    pub fn sanitized(mut self) -> Self {
        if !(self.desired_fps.is_finite() && self.desired_fps > 0.0) {
            self.desired_fps = 24.0;
        }
        self.fps_refresh_rate = self.fps_refresh_rate.max(1);
        self.views_count = self.views_count.max(1);
        if self.main_view >= self.views_count {
            self.main_view = 0;
        }
        self.frame_cache_capacity = self.frame_cache_capacity.max(1);
        if self.number_of_threads < INLINE_RENDERING {
            self.number_of_threads = INLINE_RENDERING;
        }
        self
    }

    /// Inline mode: `render()` runs start/iterate/stop on the calling thread.
    pub fn is_inline(&self) -> bool {
        self.number_of_threads == INLINE_RENDERING
    }

    /// Effective render thread budget (0 = one per CPU).
    pub fn effective_threads(&self) -> usize {
        match self.number_of_threads {
            n if n > 0 => n as usize,
            0 => num_cpus::get(),
            _ => 0,
        }
    }
}
