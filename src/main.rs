//! Development asset server

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use asset_server::config_file::ConfigFile;
use asset_server::{
    AssetServer, HttpsOption, IndexOption, LiveReloadOption, LiveReloadSettings, Root,
    ServerOptions, TlsSettings,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "asset-server";

/// Serve static assets with single-page-app fallback and live reload
#[derive(Parser, Debug)]
#[command(name = "asset-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directories to serve, searched in order
    roots: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Index document served for unknown paths, relative to the first root
    #[arg(long, conflicts_with = "no_index")]
    index: Option<PathBuf>,

    /// Disable the index fallback
    #[arg(long)]
    no_index: bool,

    /// Serve over HTTPS
    #[arg(long)]
    https: bool,

    /// PEM private key (implies --https)
    #[arg(long)]
    key: Option<PathBuf>,

    /// PEM certificate (implies --https)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM CA certificate (implies --https)
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Passphrase of the private key
    #[arg(long)]
    passphrase: Option<String>,

    /// Enable live reload
    #[arg(long)]
    livereload: bool,

    /// Live reload port (implies --livereload)
    #[arg(long)]
    livereload_port: Option<u16>,

    /// Log every request
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn wants_https(&self) -> bool {
        self.https
            || self.key.is_some()
            || self.cert.is_some()
            || self.ca.is_some()
            || self.passphrase.is_some()
    }

    /// Layer command line values over `options`
    fn apply(self, options: &mut ServerOptions) -> asset_server::Result<()> {
        let wants_https = self.wants_https();

        match self.roots.len() {
            0 => {}
            1 => options.root = self.roots.into_iter().next().map(Root::Single),
            _ => options.root = Some(Root::List(self.roots)),
        }
        if self.host.is_some() {
            options.host = self.host;
        }
        if self.port.is_some() {
            options.port = self.port;
        }
        if self.no_index {
            options.index = Some(IndexOption::Enabled(false));
        } else if let Some(index) = self.index {
            options.index = Some(IndexOption::Path(index));
        }

        if wants_https {
            let mut tls = match options.https.take() {
                Some(HttpsOption::Settings(tls)) => tls,
                _ => TlsSettings::default(),
            };
            if let Some(key) = self.key {
                tls.key = Some(std::fs::read(key)?);
            }
            if let Some(cert) = self.cert {
                tls.cert = Some(std::fs::read(cert)?);
            }
            if let Some(ca) = self.ca {
                tls.ca = Some(std::fs::read(ca)?);
            }
            if self.passphrase.is_some() {
                tls.passphrase = self.passphrase;
            }
            options.https = Some(HttpsOption::Settings(tls));
        }

        if self.livereload || self.livereload_port.is_some() {
            let port = self.livereload_port.or(match &options.livereload {
                Some(LiveReloadOption::Settings(settings)) => settings.port,
                _ => None,
            });
            options.livereload = Some(LiveReloadOption::Settings(LiveReloadSettings { port }));
        }

        if self.debug {
            options.debug = Some(true);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let mut args = Args::parse();

    let file = match args.config.take() {
        Some(path) => match ConfigFile::from_file(&path) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("Failed to load config file {}: {}", path.display(), err);
                std::process::exit(1);
            }
        },
        None => None,
    };
    let log_level = file.as_ref().and_then(|f| f.log_level()).map(str::to_string);
    let debug = args.debug || file.as_ref().and_then(|f| f.server.debug).unwrap_or(false);
    init_logging(log_level.as_deref(), debug);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let mut options = match file.map(ConfigFile::into_options).transpose() {
        Ok(options) => options.unwrap_or_default(),
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = args.apply(&mut options) {
        tracing::error!("Invalid command line: {}", err);
        std::process::exit(1);
    }
    if options.root.is_none() {
        options.root = Some(Root::Single(PathBuf::from(".")));
    }

    let mut server = match AssetServer::from_options(options) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("{}", err);
            std::process::exit(1);
        }
    };
    tracing::debug!("Middleware chain: {:?}", server.chain());

    if server.start().await.is_none() {
        std::process::exit(1);
    }
    if let Some(addr) = server.live_reload_addr() {
        tracing::info!("Live reload listening on {}", addr);
    }
    server.wait().await;
}

/// Initialize logging with tracing
fn init_logging(level: Option<&str>, debug: bool) {
    let default_filter = match (level, debug) {
        (_, true) => "asset_server=debug,tower_http=debug".to_string(),
        (Some(level), false) => format!("asset_server={}", level),
        (None, false) => "asset_server=info".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
