//! # Coinfinder ML CLI (`cfml`)
//!
//! ## Usage
//!
//! ```bash
//! cfml --config ./config/cfml.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cfml embed` | Embed the corpus, write the embedding table and labels |
//! | `cfml train` | Train the classifier on the embedding table |
//! | `cfml pipeline` | `embed` followed by `train` |
//! | `cfml predict --id <id>` | Classify a catalog entry |
//! | `cfml predict --text "<text>"` | Classify free text |
//! | `cfml serve` | Start the HTTP prediction service |
//!
//! Flags given on the command line override the configuration file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use coinfinder_ml::config::{self, Config};
use coinfinder_ml::predict::PredictQuery;
use coinfinder_ml::{embed_cmd, predict, server, train};

/// Coinfinder ML CLI: numismatic catalog text classification.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cfml.example.toml` for a full example. A missing file
/// means built-in defaults.
#[derive(Parser)]
#[command(
    name = "cfml",
    about = "Coinfinder ML: train and serve a text classifier over a numismatic catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cfml.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides shared by the commands that embed the corpus.
#[derive(clap::Args, Default)]
struct EmbedArgs {
    /// Corpus JSON file.
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Embedding table output path.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Labels CSV output path.
    #[arg(long)]
    labels_out: Option<PathBuf>,

    /// Dense encoder model name.
    #[arg(long)]
    model: Option<String>,

    /// Dense encoder batch size.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Embedding backend: `auto`, `dense` or `lexical`.
    #[arg(long)]
    backend: Option<String>,
}

/// Overrides for training.
#[derive(clap::Args, Default)]
struct TrainArgs {
    /// Embedding table to train on.
    #[arg(long)]
    embeddings: Option<PathBuf>,

    /// Labels CSV.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Where to write the trained model.
    #[arg(long)]
    model_out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed the corpus.
    ///
    /// Loads the corpus, renders each entry's canonical text, embeds it, and
    /// writes the embedding table, the labels file, and the backend artifact
    /// next to the table.
    Embed(EmbedArgs),

    /// Train the classifier.
    ///
    /// Joins the embedding table with the labels, holds out 20% for
    /// evaluation, prints a per-class report, and saves the model.
    Train(TrainArgs),

    /// Run `embed` then `train`.
    Pipeline {
        #[command(flatten)]
        embed: EmbedArgs,
        /// Where to write the trained model.
        #[arg(long)]
        model_out: Option<PathBuf>,
    },

    /// Classify one catalog entry or a free text.
    Predict {
        /// Catalog id to look up; wins over `--text`.
        #[arg(long)]
        id: Option<String>,

        /// Free text to classify.
        #[arg(long)]
        text: Option<String>,

        /// Trained model to use.
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Start the HTTP prediction service.
    Serve {
        /// Address to bind, e.g. `0.0.0.0:8000`.
        #[arg(long)]
        bind: Option<String>,
    },
}

fn apply_embed_args(cfg: &mut Config, args: EmbedArgs) {
    if let Some(v) = args.dataset {
        cfg.paths.dataset = v;
    }
    if let Some(v) = args.out {
        cfg.paths.embeddings = v;
    }
    if let Some(v) = args.labels_out {
        cfg.paths.labels = v;
    }
    if let Some(v) = args.model {
        cfg.embedding.model = v;
    }
    if let Some(v) = args.batch_size {
        cfg.embedding.batch_size = v;
    }
    if let Some(v) = args.backend {
        cfg.embedding.backend = v;
    }
}

fn apply_train_args(cfg: &mut Config, args: TrainArgs) {
    if let Some(v) = args.embeddings {
        cfg.paths.embeddings = v;
    }
    if let Some(v) = args.labels {
        cfg.paths.labels = v;
    }
    if let Some(v) = args.model_out {
        cfg.paths.model = v;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Embed(args) => {
            apply_embed_args(&mut cfg, args);
            config::validate(&cfg)?;
            embed_cmd::run_embed(&cfg).await?;
        }
        Commands::Train(args) => {
            apply_train_args(&mut cfg, args);
            config::validate(&cfg)?;
            train::run_train(&cfg).await?;
        }
        Commands::Pipeline { embed, model_out } => {
            apply_embed_args(&mut cfg, embed);
            if let Some(v) = model_out {
                cfg.paths.model = v;
            }
            config::validate(&cfg)?;
            embed_cmd::run_embed(&cfg).await?;
            train::run_train(&cfg).await?;
        }
        Commands::Predict { id, text, model } => {
            if let Some(v) = model {
                cfg.paths.model = v;
            }
            predict::run_predict(&cfg, PredictQuery { id, text }).await?;
        }
        Commands::Serve { bind } => {
            if let Some(v) = bind {
                cfg.server.bind = v;
            }
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
