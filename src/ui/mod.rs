//! Terminal output for the CLI
//!
//! Uses `cliclack` for steps and spinners and `indicatif` for transfer
//! bars, falling back to plain lines in CI and when output is piped.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    outro, section, step_error_detail, step_info, step_ok, step_ok_detail, step_warn_hint,
};
pub use progress::{TaskSpinner, TransferProgress};
pub use prompts::confirm;
