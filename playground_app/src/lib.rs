//! JS Playground application layer
//!
//! Ties the editor engine to the code runner: typing, paste, clear and run
//! flows with the sync pause/resume discipline, the console panel entries,
//! JSON configuration, and in-memory hosts for headless use.

pub mod app;
pub mod config;
pub mod hosts;
pub mod views;

pub use app::PlaygroundApp;
pub use config::{ConfigError, PlaygroundConfig};
pub use hosts::{
    FrameRequests, ManualTimers, MemoryConsole, MemoryDom, MemoryNetwork, MonospaceLayout,
    TimerKind,
};
pub use views::EditorViews;
