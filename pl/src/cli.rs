//! CLI argument parsing for plates

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pl")]
#[command(author, version, about = "Compile and render plate templates", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Views directory, overriding the config file
    #[arg(long, global = true)]
    pub views: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a template to stdout
    Render {
        /// Logical template name, e.g. `users.profile`
        #[arg(required = true)]
        name: String,

        /// Render data as a JSON object
        #[arg(short, long, conflicts_with = "data_file")]
        data: Option<String>,

        /// Read render data from a JSON or YAML file
        #[arg(short = 'f', long)]
        data_file: Option<PathBuf>,

        /// Locale for translation helpers
        #[arg(short = 'L', long)]
        locale: Option<String>,

        /// Module searched first
        #[arg(short, long)]
        module: Option<String>,

        /// Minify the output regardless of config
        #[arg(long)]
        minify: bool,
    },

    /// Print the compiled script for a template
    Compile {
        #[arg(required = true)]
        name: String,

        #[arg(short, long)]
        module: Option<String>,
    },

    /// Compile every template under the views directory and report syntax errors
    Check,

    /// Remove compiled artifacts
    Purge {
        /// Template to purge; everything when omitted
        name: Option<String>,

        #[arg(short, long)]
        module: Option<String>,
    },

    /// Minify an HTML file, or stdin when no file is given
    Minify {
        file: Option<PathBuf>,

        /// Keep HTML comments
        #[arg(short, long)]
        keep_comments: bool,
    },
}
