use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.facematch.FaceMatch1",
    default_service = "org.facematch.FaceMatch1",
    default_path = "/org/facematch/FaceMatch1"
)]
trait FaceMatch {
    fn detect(&self, photo_id: &str, faces_json: &str, only_matched: bool) -> zbus::Result<String>;
    fn match_photo(&self, photo_id: &str, threshold: f64) -> zbus::Result<String>;
    fn assign(&self, photo_id: &str, face_index: i32, person_id: &str) -> zbus::Result<String>;
    fn faces(&self, photo_id: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facematch", about = "Photo face matching CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store detected faces for a photo
    Detect {
        photo_id: String,
        /// JSON array of faces, or "-" for stdin
        #[arg(short, long)]
        faces: PathBuf,
        /// Keep only faces that end up matched to a person
        #[arg(long)]
        only_matched: bool,
    },
    /// Match a photo's faces against known people
    Match {
        photo_id: String,
        /// Euclidean distance threshold (daemon default if omitted)
        #[arg(short, long, allow_negative_numbers = true, value_parser = parse_threshold)]
        threshold: Option<f64>,
    },
    /// Assign a face to a person, or clear it when no person is given
    Assign {
        photo_id: String,
        #[arg(allow_negative_numbers = true)]
        face_index: i32,
        person_id: Option<String>,
    },
    /// Show stored faces for a photo
    Faces { photo_id: String },
    /// Show daemon status
    Status,
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let threshold: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if threshold.is_finite() && threshold > 0.0 {
        Ok(threshold)
    } else {
        Err(format!("threshold must be a positive number, got {s}"))
    }
}

fn read_faces(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read faces from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read faces from {}", path.display()))
    }
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = FaceMatchProxy::new(&conn)
        .await
        .context("facematchd is not reachable")?;

    let reply = match cli.command {
        Commands::Detect {
            photo_id,
            faces,
            only_matched,
        } => {
            let faces_json = read_faces(&faces)?;
            tracing::debug!(photo_id = %photo_id, bytes = faces_json.len(), "sending detect");
            proxy.detect(&photo_id, &faces_json, only_matched).await?
        }
        Commands::Match {
            photo_id,
            threshold,
        } => {
            proxy
                .match_photo(&photo_id, threshold.unwrap_or(0.0))
                .await?
        }
        Commands::Assign {
            photo_id,
            face_index,
            person_id,
        } => {
            proxy
                .assign(&photo_id, face_index, person_id.as_deref().unwrap_or(""))
                .await?
        }
        Commands::Faces { photo_id } => proxy.faces(&photo_id).await?,
        Commands::Status => proxy.status().await?,
    };

    print_json(&reply)
}
