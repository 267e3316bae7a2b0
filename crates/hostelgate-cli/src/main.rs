use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.hostelgate.Gate1",
    default_service = "org.hostelgate.Gate1",
    default_path = "/org/hostelgate/Gate1"
)]
trait Gate {
    async fn register_student(
        &self,
        name: &str,
        roll: &str,
        room: &str,
        embedding: Vec<f64>,
        photo: Vec<u8>,
    ) -> zbus::Result<i64>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn student_photo(&self, id: i64) -> zbus::Result<Vec<u8>>;
    async fn update_student(
        &self,
        id: i64,
        name: &str,
        roll: &str,
        room: &str,
        photo: Vec<u8>,
    ) -> zbus::Result<()>;
    async fn start_session(&self, mode: &str) -> zbus::Result<String>;
    async fn stop_session(&self, mode: &str) -> zbus::Result<bool>;
    async fn history(&self, limit: u32) -> zbus::Result<String>;
    async fn last_action(&self, id: i64) -> zbus::Result<String>;
    async fn presence(&self) -> zbus::Result<String>;
    async fn visitors(&self) -> zbus::Result<String>;
    async fn delete_visitor(&self, file_name: &str) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "hostelgate", about = "Hostel entry/exit face recognition CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new student
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        roll: String,
        #[arg(long)]
        room: String,
        /// Photo file stored with the record
        #[arg(long)]
        photo: PathBuf,
        /// JSON array with the face embedding extracted from the photo
        #[arg(long)]
        embedding: PathBuf,
    },
    /// List registered students
    Students,
    /// Update a student's details
    Update {
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        roll: String,
        #[arg(long)]
        room: String,
        /// Replacement photo (keeps the current one if omitted)
        #[arg(long)]
        photo: Option<PathBuf>,
    },
    /// Start the entry or exit camera
    Start {
        /// "entry" or "exit"
        mode: String,
    },
    /// Stop the entry or exit camera
    Stop {
        /// "entry" or "exit"
        mode: String,
    },
    /// Show the presence log, most recent first
    Logs {
        /// Number of entries (0 for all)
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
    /// Show a student's last logged action
    Last { id: i64 },
    /// Show who is inside, room occupancy and today's counts
    Presence,
    /// List unknown-visitor snapshots
    Visitors {
        /// Delete the snapshot with this file name instead of listing
        #[arg(long, value_name = "FILE_NAME")]
        delete: Option<String>,
    },
    /// Show daemon status
    Status,
    /// Write a student's stored photo to a file
    Photo {
        id: i64,
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Read an embedding file. `null` or `[]` means no face was found.
fn read_embedding(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Option<Vec<f64>> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON number array", path.display()))?;
    Ok(value.unwrap_or_default())
}

fn print_json(text: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session || std::env::var_os("HOSTELGATE_SESSION_BUS").is_some() {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("cannot connect to D-Bus")?;
    let gate = GateProxy::new(&conn)
        .await
        .context("hostelgated is not reachable")?;

    match cli.command {
        Commands::Register {
            name,
            roll,
            room,
            photo,
            embedding,
        } => {
            let photo = std::fs::read(&photo)
                .with_context(|| format!("failed to read {}", photo.display()))?;
            let embedding = read_embedding(&embedding)?;
            tracing::debug!(dims = embedding.len(), "registering");
            let id = gate
                .register_student(&name, &roll, &room, embedding, photo)
                .await?;
            println!("Student registered successfully with id {id}");
        }
        Commands::Students => print_json(&gate.list_students().await?)?,
        Commands::Update {
            id,
            name,
            roll,
            room,
            photo,
        } => {
            let photo = match photo {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => Vec::new(),
            };
            gate.update_student(id, &name, &roll, &room, photo).await?;
            println!("Student {id} updated successfully");
        }
        Commands::Start { mode } => {
            let session = gate.start_session(&mode).await?;
            println!("{mode} camera started (session {session})");
        }
        Commands::Stop { mode } => {
            if gate.stop_session(&mode).await? {
                println!("{mode} camera stopping");
            } else {
                println!("{mode} camera is not running");
            }
        }
        Commands::Logs { limit } => print_json(&gate.history(limit).await?)?,
        Commands::Last { id } => println!("{}", gate.last_action(id).await?),
        Commands::Presence => print_json(&gate.presence().await?)?,
        Commands::Visitors { delete: None } => print_json(&gate.visitors().await?)?,
        Commands::Visitors {
            delete: Some(file_name),
        } => {
            gate.delete_visitor(&file_name).await?;
            println!("Deleted visitor snapshot {file_name}");
        }
        Commands::Status => print_json(&gate.status().await?)?,
        Commands::Photo { id, output } => {
            let photo = gate.student_photo(id).await?;
            if photo.is_empty() {
                bail!("student {id} has no stored photo");
            }
            std::fs::write(&output, &photo)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Wrote {} bytes to {}", photo.len(), output.display());
        }
    }

    Ok(())
}
