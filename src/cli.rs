use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mnemosyned")]
#[command(about = "Personal activity-capture and recall daemon")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the capture daemon in the foreground (default when no subcommand is given).
    Run,

    /// Ask a natural-language question over captured activity and stream the answer to stdout.
    Query {
        /// The question to ask, e.g. "what was I doing yesterday afternoon?"
        question: String,
    },

    /// Focus session management.
    Focus {
        #[command(subcommand)]
        action: FocusAction,
    },

    /// Delete captures in a time range, leaving summaries and insights intact.
    Clear {
        /// RFC3339 start of the range to clear.
        #[arg(long)]
        since: String,

        /// RFC3339 end of the range to clear (defaults to now).
        #[arg(long)]
        until: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum FocusAction {
    /// Start a session against a named focus mode.
    Start {
        /// Id of the focus mode to activate.
        mode_id: String,
    },
    /// End the active focus session, if any.
    Stop,
}
