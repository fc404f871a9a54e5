use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "extension-finder")]
#[command(about = "Discover Quarkus extensions and resolve persistence-unit entity classes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "PATH", global = true)]
    pub m2: Option<PathBuf>,

    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    /// Build indexes in memory only.
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Index dependencies one at a time.
    #[arg(long, global = true)]
    pub sequential: bool,

    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Discover extensions and resolve persistence units.
    Resolve {
        #[arg(value_name = "BUILD")]
        build: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Discover extensions only.
    Extensions {
        #[arg(value_name = "BUILD")]
        build: PathBuf,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Index one artifact (jar or classes directory).
    Index {
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,

        #[arg(long, value_name = "GAV")]
        coordinate: Option<String>,
    },
    Stats,
    Clear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
