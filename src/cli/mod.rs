// src/cli/mod.rs - CLI definition (clap derive)

pub mod ask;
pub mod chat;
pub mod export;
pub mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "climatechat",
    about = "Streaming chat client for the climate-career assistant",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    /// Backend base URL (overrides `endpoint.base_url`)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Suppress status notices (only emit answers)
    #[arg(long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive chat session
    Chat {
        /// Continue a stored session
        #[arg(long)]
        session: Option<String>,
    },
    /// Ask one question and stream the answer to stdout
    Ask {
        /// Continue a stored session
        #[arg(long)]
        session: Option<String>,
        /// File to upload and reference (repeatable)
        #[arg(short, long = "attach")]
        attach: Vec<PathBuf>,
        /// The question
        #[arg(trailing_var_arg = true, required = true)]
        question: Vec<String>,
    },
    /// Print the stored messages of a session
    History {
        session_id: String,
        /// Print raw JSON instead of a transcript
        #[arg(long)]
        json: bool,
    },
}
