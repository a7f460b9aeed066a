//! Application wiring and commands.

mod commands;
mod init;
mod state;

pub use commands::{
    add_sample, clear, end_session, print_dead_letters, print_status, start_session,
    submit_report, sync_once,
};
pub use init::run_daemon;
pub use state::Engine;
