//! Cloud Files CLI
//!
//! Usage:
//!   cloudfiles-cli [auth] ls [path]              List a folder or describe an object
//!   cloudfiles-cli [auth] get <path> [local]     Download an object (--url: print a temp URL)
//!   cloudfiles-cli [auth] put <local> <path>     Upload a file
//!   cloudfiles-cli [auth] mkdir <path>           Create a folder marker
//!   cloudfiles-cli [auth] rm <path>              Delete an object or a whole folder
//!   cloudfiles-cli [auth] url <path>             Sign a temp URL
//!
//! Auth comes from `--config <file.json>` and/or the individual flags; flags win.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cloudfiles::providers::{
    AuthContext, CloudFilesConfig, CloudFilesProvider, Download, ProviderConfig, StorageProvider,
};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(
    name = "cloudfiles-cli",
    about = "Cloud Files CLI - browse and transfer objects in a Swift container",
    version
)]
struct Cli {
    /// JSON provider config ({"username", "password", "extra": {"region", "container", ...}})
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Account username
    #[arg(long, global = true)]
    username: Option<String>,
    /// Account API key
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Service catalog region (e.g. iad)
    #[arg(long, global = true)]
    region: Option<String>,
    /// Container holding the objects
    #[arg(long, global = true)]
    container: Option<String>,
    /// Identity endpoint override
    #[arg(long, global = true)]
    auth_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a folder (trailing '/') or describe an object
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Download an object
    Get {
        /// Remote object path
        path: String,
        /// Local destination (default: object name)
        local: Option<PathBuf>,
        /// Print a temp URL instead of transferring
        #[arg(long)]
        url: bool,
    },
    /// Upload a local file
    Put {
        local: PathBuf,
        /// Remote object path
        path: String,
    },
    /// Create an empty folder
    Mkdir { path: String },
    /// Delete an object, or a folder with everything below it
    Rm { path: String },
    /// Sign a temp URL for an object
    Url {
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Lifetime in seconds
        #[arg(long, default_value_t = cloudfiles::providers::DEFAULT_TEMP_URL_SECS)]
        expires: u64,
    },
}

fn load_config(cli: &Cli) -> Result<ProviderConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<ProviderConfig>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => ProviderConfig::default(),
    };

    if let Some(username) = &cli.username {
        config.username = Some(username.clone());
    }
    if let Some(api_key) = &cli.api_key {
        config.password = Some(api_key.clone());
    }
    for (key, value) in [
        ("region", &cli.region),
        ("container", &cli.container),
        ("auth_url", &cli.auth_url),
    ] {
        if let Some(value) = value {
            config.extra.insert(key.to_string(), value.clone());
        }
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn default_local_name(remote: &str) -> Result<PathBuf> {
    match remote.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(PathBuf::from(name)),
        _ => bail!("cannot derive a local file name from '{}'", remote),
    }
}

async fn download_to(provider: &CloudFilesProvider, remote: &str, local: &Path) -> Result<u64> {
    let stream = match provider.download(remote, false).await? {
        Download::Stream(stream) => stream,
        Download::Url(url) => bail!("provider returned a URL instead of content: {}", url),
    };

    let mut file = tokio::fs::File::create(local)
        .await
        .with_context(|| format!("creating {}", local.display()))?;
    let mut body = Box::pin(stream.into_stream());
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn run(cli: Cli) -> Result<()> {
    let provider_config = load_config(&cli)?;
    let config = CloudFilesConfig::from_provider_config(&provider_config)?;
    let auth = AuthContext {
        name: provider_config.username.clone().unwrap_or_default(),
        email: None,
    };
    let provider = CloudFilesProvider::new(auth, config);

    match cli.command {
        Commands::Ls { path } => {
            print_json(&provider.metadata(&path).await?)?;
        }
        Commands::Get { path, local, url } => {
            if url {
                match provider.download(&path, true).await? {
                    Download::Url(url) => println!("{}", url),
                    Download::Stream(_) => bail!("expected a temp URL"),
                }
            } else {
                let local = match local {
                    Some(local) => local,
                    None => default_local_name(&path)?,
                };
                let written = download_to(&provider, &path, &local).await?;
                eprintln!("Downloaded {} -> {} ({} bytes)", path, local.display(), written);
            }
        }
        Commands::Put { local, path } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("reading {}", local.display()))?;
            let (entry, created) = provider.upload(&path, data.into()).await?;
            print_json(&serde_json::json!({ "entry": entry, "created": created }))?;
        }
        Commands::Mkdir { path } => {
            print_json(&provider.create_folder(&path).await?)?;
        }
        Commands::Rm { path } => {
            provider.delete(&path).await?;
            eprintln!("Deleted {}", path);
        }
        Commands::Url { path, method, expires } => {
            println!("{}", provider.create_temp_url(&path, &method, expires).await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    cloudfiles::logging::init_logger();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
