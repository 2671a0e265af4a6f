use clap::Parser;
use std::path::PathBuf;

use crate::core::run_args::PlaybackMode;

/// Render a small node graph (two sources -> merge -> output) with the scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Frames to render (-1 = play until --run-for elapses)
    #[arg(short = 'n', long = "frames", value_name = "N", default_value_t = 24, allow_negative_numbers = true)]
    pub frames: i32,

    /// First frame of the timeline
    #[arg(long = "first", value_name = "N", default_value_t = 1, allow_negative_numbers = true)]
    pub first: i32,

    /// Last frame of the timeline
    #[arg(long = "last", value_name = "N", default_value_t = 24, allow_negative_numbers = true)]
    pub last: i32,

    /// Behaviour at the range boundary: loop, bounce or once (default: from settings)
    #[arg(short = 'm', long = "mode", value_name = "MODE")]
    pub mode: Option<PlaybackMode>,

    /// Render to a writer sink instead of a viewer, optionally saving PGM frames to DIR
    #[arg(short = 'w', long = "writer", value_name = "DIR")]
    pub writer: Option<Option<PathBuf>>,

    /// Run unattended: progress lines go to stdout
    #[arg(short = 'b', long = "background")]
    pub background: bool,

    /// Render threads (-1 = inline on the calling thread, 0 = auto)
    #[arg(short = 't', long = "threads", value_name = "N", allow_negative_numbers = true)]
    pub threads: Option<i32>,

    /// Desired playback rate for viewer runs
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Use a sequential-only reader as the second source
    #[arg(long = "sequence")]
    pub sequence: bool,

    /// Abort the run after this many seconds (unbounded runs default to 5)
    #[arg(long = "run-for", value_name = "SECS")]
    pub run_for: Option<f64>,

    /// Enable debug logging to file (default: compflow.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_writer_run() {
        let args = Args::try_parse_from([
            "compflow", "--frames", "-1", "--mode", "bounce", "--writer", "out", "--threads", "-1", "-vv",
        ])
        .unwrap();
        assert_eq!(args.frames, -1);
        assert_eq!(args.mode, Some(PlaybackMode::Bounce));
        assert_eq!(args.writer, Some(Some(PathBuf::from("out"))));
        assert_eq!(args.threads, Some(-1));
        assert_eq!(args.verbosity, 2);
        assert!(!args.background);
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["compflow"]).unwrap();
        assert_eq!((args.frames, args.first, args.last), (24, 1, 24));
        assert!(args.writer.is_none());
        assert!(args.mode.is_none());
    }
}
