use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mls")]
#[command(about = "Strategy distribution CLI (signing, linking, sync)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an Ed25519 key pair and print it as env assignments
    Keygen,

    /// Sign a strategy payload into a bundle (needs the signing key env var)
    Compile {
        /// Path to the payload JSON
        #[arg(long = "payload-file")]
        payload_file: String,

        /// Write the bundle here instead of stdout
        #[arg(long)]
        out: Option<String>,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config: Vec<String>,
    },

    /// Verify a bundle file against a public key
    Verify {
        /// Path to the bundle JSON
        #[arg(long)]
        bundle: String,

        /// Base64 public key; defaults to the configured env var
        #[arg(long = "public-key")]
        public_key: Option<String>,

        #[arg(long = "config")]
        config: Vec<String>,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Register this device and wait for the code to be redeemed
    Link {
        #[arg(long = "config")]
        config: Vec<String>,
    },

    /// Fetch and verify every artifact granted to this device
    Sync {
        #[arg(long = "config")]
        config: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience. Silent when the file is absent.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Keygen => commands::artifact::keygen(),

        Commands::Compile {
            payload_file,
            out,
            config,
        } => commands::artifact::compile(&payload_file, out.as_deref(), &config)?,

        Commands::Verify {
            bundle,
            public_key,
            config,
        } => commands::artifact::verify(&bundle, public_key.as_deref(), &config)?,

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mls_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Link { config } => commands::device::link(&config).await?,

        Commands::Sync { config } => commands::device::sync(&config).await?,
    }

    Ok(())
}
