#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unused_self,
    clippy::unnecessary_wraps
)]

use clap::Subcommand;
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod config;
pub mod events;
pub mod gateway;
pub mod persistence;
pub mod relay;
pub mod sessions;
pub mod tools;
pub(crate) mod util;

pub use config::Config;
pub use relay::SessionRelay;

/// Session management subcommands
#[derive(Subcommand, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionCommands {
    /// List stored sessions, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one session's metadata and message log
    Show {
        /// Session ID
        id: String,
        /// Only print the last N messages
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Delete a session and its messages
    #[command(long_about = "\
Delete a session and its messages from the configured store.

This removes the durable record only. A live agent session with the \
same id, if any, is not affected until the relay restarts.

Examples:
  sessionrelay sessions delete 3f2c9a
  sessionrelay sessions delete 3f2c9a --yes")]
    Delete {
        /// Session ID
        id: String,
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}
