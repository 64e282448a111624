use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod setup;

#[derive(Parser)]
#[command(name = "invigil", about = "Invigil exam proctoring CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and verify the ONNX models
    Setup {
        /// Target directory (defaults to the system or user model dir)
        #[arg(long)]
        model_dir: Option<String>,
    },
    /// Register a user's baseline face from capture images
    Register {
        /// Numeric user id
        #[arg(short, long)]
        user_id: i64,
        /// Capture image files (at least three)
        images: Vec<PathBuf>,
    },
    /// Submit a single proctoring frame
    Frame {
        #[arg(short, long)]
        user_id: i64,
        #[arg(short, long)]
        exam_id: i64,
        #[arg(short, long)]
        session_id: String,
        /// Frame image file
        image: PathBuf,
    },
    /// Show recent alerts for an exam
    Logs {
        #[arg(short, long)]
        exam_id: i64,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.invigil.Proctor1",
    default_service = "org.invigil.Proctor1",
    default_path = "/org/invigil/Proctor1"
)]
trait Proctor {
    async fn register_face(&self, user_id: i64, images: Vec<Vec<u8>>) -> zbus::Result<String>;
    async fn submit_frame(
        &self,
        user_id: i64,
        exam_id: i64,
        session_id: &str,
        image: Vec<u8>,
    ) -> zbus::Result<String>;
    async fn recent_alerts(&self, exam_id: i64, limit: u32) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Connect to the daemon on the system bus, or the session bus when
/// INVIGIL_SESSION_BUS is set (matching the daemon's development mode).
async fn connect() -> Result<ProctorProxy<'static>> {
    let conn = if std::env::var("INVIGIL_SESSION_BUS").is_ok() {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to the bus (is invigild running?)")?;

    ProctorProxy::new(&conn)
        .await
        .context("failed to create daemon proxy")
}

/// Re-indent a JSON reply for the terminal; passes non-JSON through.
fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Setup { model_dir } => {
            setup::run(model_dir)?;
        }
        Commands::Register { user_id, images } => {
            if images.is_empty() {
                anyhow::bail!("at least one capture image is required");
            }
            let mut payloads = Vec::with_capacity(images.len());
            for path in &images {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                payloads.push(bytes);
            }

            let proxy = connect().await?;
            let reply = proxy.register_face(user_id, payloads).await?;
            println!("{reply}");
        }
        Commands::Frame {
            user_id,
            exam_id,
            session_id,
            image,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;

            let proxy = connect().await?;
            let reply = proxy
                .submit_frame(user_id, exam_id, &session_id, bytes)
                .await?;
            println!("{}", pretty(&reply));
        }
        Commands::Logs { exam_id, limit } => {
            let proxy = connect().await?;
            let reply = proxy.recent_alerts(exam_id, limit).await?;
            println!("{}", pretty(&reply));
        }
        Commands::Status => {
            let proxy = connect().await?;
            let reply = proxy.status().await?;
            println!("{}", pretty(&reply));
        }
    }

    Ok(())
}
