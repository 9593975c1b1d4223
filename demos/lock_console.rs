//! Interactive lock console.
//!
//! Drives a tklock session against the simulated window system. JSON logs go
//! to `tklock-console.jsonl` in the working directory; settings may be passed
//! as a JSON file path in the first argument.

use std::env;

use tklock::logging::FileSink;
use tklock::{
    Collaborators, ConsoleDriver, LockConfig, LockSettings, LogLevel, Logger, NullPresenter,
    PluginSession, RecordingBus, SimulatedWindowSystem,
};

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let settings = match env::args().nth(1) {
        Some(path) => LockSettings::from_path(path)?,
        None => LockSettings::default(),
    };

    let sink = FileSink::new("tklock-console.jsonl", 256 * 1024)?;
    let logger = Logger::new(sink).with_min_level(LogLevel::Debug);
    let config = LockConfig::with_settings(settings).with_logger(logger);

    let windows = SimulatedWindowSystem::new();
    let collaborators = Collaborators::new(windows.clone(), RecordingBus::new(), NullPresenter);
    let session = PluginSession::init(collaborators, config);

    ConsoleDriver::new(session, windows).run()?;
    Ok(())
}
