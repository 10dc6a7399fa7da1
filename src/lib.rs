// Library surface for headless/integration tests and reuse.
// Keep this lean to avoid coupling to bin-only types in main.rs.
pub mod admin;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod form;
pub mod gateway;
pub mod grading;
pub mod key_policy;
pub mod logging;
pub mod monitor;
pub mod proctor;
pub mod runtime;
pub mod schedule;
pub mod session;
pub mod ui;
pub mod util;
