//! CLI command implementations.

mod cancel;
mod config;
mod doctor;
mod list;
mod process;
mod serve;
mod status;

pub use cancel::run_cancel;
pub use config::run_config;
pub use doctor::run_doctor;
pub use list::run_list;
pub use process::{run_process, run_resume};
pub use serve::run_serve;
pub use status::run_status;
