use clap::{Args, Parser, Subcommand};
use nemo::client::RelayClient;
use nemo::config::{
    ClientConfig, DEFAULT_BASE_URL, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MODEL, DEFAULT_PORT,
    ServerConfig, UpstreamConfig,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nemo", version, about = "Streaming chat relay and terminal client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server
    Serve(ServeArgs),
    /// Chat through a running server
    Chat(ChatArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "NVIDIA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "NVIDIA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "NVIDIA_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = "uploads")]
    uploads_dir: PathBuf,

    #[arg(long, default_value = "public")]
    public_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,
}

#[derive(Args)]
struct ChatArgs {
    #[arg(long, env = "NEMO_SERVER", default_value = "http://localhost:3000")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            init_logging();
            let upstream = UpstreamConfig::from_api_key(args.api_key)?
                .with_base_url(args.base_url)
                .with_model(args.model);
            let mut config = ServerConfig::new(&args.host, args.port, upstream);
            config.uploads_dir = args.uploads_dir;
            config.public_dir = Some(args.public_dir);
            config.max_upload_bytes = args.max_upload_bytes;
            nemo::server::run(config).await
        }
        Command::Chat(args) => {
            // Log lines would tear through the inline viewport.
            if std::env::var_os("RUST_LOG").is_some() {
                init_logging();
            }
            let client = RelayClient::new(ClientConfig::new(&args.server));
            nemo::ui::run_tui(client)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nemo=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
