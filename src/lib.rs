pub mod bootstrap;
pub mod cli;
pub mod clock;
pub mod config;
pub mod journaling;
pub mod lifecycle;
pub mod settings;
pub mod storage;
pub mod store;
pub mod sweeper;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use lifecycle::{Lifecycle, LifecycleUnit};
pub use store::{Note, NotePatch, NoteStore};
