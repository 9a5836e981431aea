use super::Parser;
use clap::Subcommand;

#[derive(Parser, Debug)]
#[command(name = "workdesk", about = "Authenticated client for the workdesk API")]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Ask the backend to mail a sign-in link
    MagicLink {
        #[arg(long)]
        email: String,
    },
    /// Exchange a magic-link token for a session
    Verify {
        #[arg(long)]
        token: String,
    },
    /// Issue an authenticated GET and print the body
    Get { path: String },
    /// List the tasks of a project
    Tasks {
        #[arg(long)]
        project: String,
    },
    /// Move a task to another status column
    MoveTask {
        #[arg(long)]
        project: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        status: String,
    },
    /// Forget the stored session
    Logout,
}
