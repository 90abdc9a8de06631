use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use futures::StreamExt;
use iocraft::prelude::*;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
    client::RepositoryClient,
    config::{AuthorizationType, ConfigFile, DEFAULT_CLOUD_BASE_URL},
    rest_types::{ImportPdfOptions, TaskStatus},
    tasks::{DEFAULT_POLL_ATTEMPTS, PollPolicy, TaskOutcome, fetch_task, wait_for_task},
    ui::{
        ConfigHeader, ErrorMessage, InputPrompt, ProgressBar, SuccessMessage, TaskStatusView,
        WarningMessage,
    },
    upload::{
        DEFAULT_PART_SIZE_BYTES, DEFAULT_URLS_PER_BATCH, ImportEvent, ImportOptions, MAX_UPLOAD_PARTS,
    },
};

mod client;
mod config;
mod rest_types;
mod serde_utils;
mod tasks;
mod ui;
mod upload;

const LOG_ENV: &str = "REPO_IMPORT_LOG";
const PDF_MIME_TYPE: &str = "application/pdf";
const BINARY_MIME_TYPE: &str = "application/octet-stream";

#[derive(Parser)]
#[command(name = "repo-import")]
#[command(version)]
#[command(about = "Import large documents into a content repository")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PollArgs {
    /// How many times to check the import task before giving up
    #[arg(long, default_value_t = DEFAULT_POLL_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    poll_attempts: u32,
    /// Pause between task checks, e.g. "2s" or "500ms"
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    poll_interval: Duration,
}

impl PollArgs {
    fn policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.poll_attempts,
            interval: self.poll_interval,
        }
    }
}

#[derive(Args)]
struct ImportArgs {
    /// File to import
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,
    /// Entry ID of the destination folder
    #[arg(short, long)]
    folder: Option<i64>,
    /// Name of the new document (defaults to the file name)
    #[arg(short, long)]
    name: Option<String>,
    /// MIME type of the file (guessed from the extension when omitted)
    #[arg(short, long)]
    mime_type: Option<String>,
    /// Fail instead of renaming when the name is already taken
    #[arg(long)]
    no_auto_rename: bool,
    /// Skip page image and text generation for PDF files
    #[arg(long)]
    no_pdf_options: bool,
    /// Size of each uploaded part in bytes
    #[arg(
        long,
        default_value_t = DEFAULT_PART_SIZE_BYTES,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    part_size: usize,
    /// Number of upload URLs requested per batch
    #[arg(
        long,
        default_value_t = DEFAULT_URLS_PER_BATCH,
        value_parser = clap::value_parser!(u32).range(1..=MAX_UPLOAD_PARTS as i64)
    )]
    batch_size: u32,
    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure repo-import interactively
    Config,
    /// Import a file as a new document through a multipart upload
    Import(ImportArgs),
    /// Store your access token in the OS keyring
    SetToken { token: String },
    /// Inspect a repository task
    Task {
        id: String,
        /// Keep checking until the task finishes or the attempts run out
        #[arg(short, long)]
        wait: bool,
        #[command(flatten)]
        poll: PollArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::SetToken { token } => {
                config::set_access_token_keyring(token)?;
                println!("Access token stored for use with repo-import");
                Ok(())
            }
            Commands::Import(args) => {
                let (client, default_folder_id) = connect()?;
                let folder_id = args.folder.unwrap_or(default_folder_id);
                import_document(&client, folder_id, args).await
            }
            Commands::Task { id, wait, poll } => {
                let (client, _) = connect()?;
                show_task(&client, &id, wait.then(|| poll.policy())).await
            }
        }
    })
}

/// Loads configuration and returns a client along with the default folder ID.
fn connect() -> Result<(RepositoryClient, i64)> {
    let config = config::read_config()?;
    debug!(
        authorization_type = ?config.authorization_type,
        repository_id = %config.repository_id,
        base_url = %config.repository_api_base_url,
        "configuration loaded"
    );
    let client = RepositoryClient::new(
        config.repository_api_base_url,
        config.repository_id,
        config.access_token,
    );
    Ok((client, config.default_folder_id))
}

fn mime_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => PDF_MIME_TYPE,
        _ => BINARY_MIME_TYPE,
    }
}

async fn import_document(client: &RepositoryClient, folder_id: i64, args: ImportArgs) -> Result<()> {
    let file_name = args
        .file
        .file_name()
        .ok_or_else(|| anyhow!("{} does not name a file", args.file.display()))?
        .to_string_lossy()
        .into_owned();
    let mime_type = args
        .mime_type
        .unwrap_or_else(|| mime_type_for(&args.file).to_string());
    let pdf_options = (mime_type == PDF_MIME_TYPE && !args.no_pdf_options)
        .then(ImportPdfOptions::default);

    let options = ImportOptions {
        name: args.name.unwrap_or_else(|| file_name.clone()),
        mime_type,
        auto_rename: !args.no_auto_rename,
        pdf_options,
        part_size: args.part_size,
        urls_per_batch: args.batch_size,
        poll: args.poll.policy(),
    };

    let mut stream = client.chunked_import(folder_id, &args.file, options);
    let (tx, rx) = watch::channel(0.0);

    let process_stream = async {
        let mut report = None;
        while let Some(event) = stream.next().await {
            match event? {
                ImportEvent::Progress(p) => {
                    let percent = (p.bytes_uploaded as f32 / p.total_bytes as f32) * 100.0;
                    let _ = tx.send(percent);
                }
                ImportEvent::ImportStarted { task_id } => {
                    info!(%task_id, "import task started");
                }
                ImportEvent::Finished(r) => {
                    report = Some(r);
                    break;
                }
            }
        }
        report.ok_or_else(|| anyhow!("Import ended without reporting a result"))
    };

    let mut progress_bar =
        element!(ProgressBar(title: format!("Importing {}", file_name), progress: Some(rx)));

    let report = tokio::select! {
        result = process_stream => result?,
        _ = progress_bar.render_loop() => {
            bail!("Progress display stopped before the import finished")
        }
    };

    debug!(
        upload_id = %report.upload_id,
        url_batches = report.url_batches,
        "upload committed"
    );

    match report.outcome {
        TaskOutcome::Completed { entry_id } => {
            let entry = entry_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            element!(SuccessMessage(
                message: format!("Imported {} as entry {} ({} parts)", file_name, entry, report.part_etags.len())
            ))
            .print();
            Ok(())
        }
        TaskOutcome::Failed { errors } => {
            for error in &errors {
                element!(ErrorMessage(message: error.to_string())).print();
            }
            bail!("Import task {} failed", report.task_id)
        }
        TaskOutcome::Cancelled => bail!("Import task {} was cancelled", report.task_id),
        TaskOutcome::Pending { status, attempts } => {
            element!(WarningMessage(
                message: format!(
                    "{}; follow it with `repo-import task {} --wait`",
                    pending_message(&report.task_id, status, attempts),
                    report.task_id
                )
            ))
            .print();
            Ok(())
        }
    }
}

fn pending_message(task_id: &str, status: Option<TaskStatus>, attempts: u32) -> String {
    let status = status
        .map(|s| s.to_string().to_lowercase())
        .unwrap_or_else(|| "not visible yet".to_string());
    format!("Task {} is still {} after {} checks", task_id, status, attempts)
}

async fn show_task(client: &RepositoryClient, task_id: &str, wait: Option<PollPolicy>) -> Result<()> {
    if let Some(policy) = wait {
        let outcome = wait_for_task(client, task_id, &policy).await?;
        debug!(?outcome, "finished waiting for task");
        if let TaskOutcome::Pending { status, attempts } = outcome {
            element!(WarningMessage(message: pending_message(task_id, status, attempts))).print();
        }
    }

    let task = fetch_task(client, task_id)
        .await?
        .ok_or_else(|| anyhow!("Task '{}' not found", task_id))?;

    element! {
        TaskStatusView(
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            started: task.start_time,
            status: Some(task.status),
            percent_complete: task.percent_complete,
            entry_id: task.result.as_ref().and_then(|r| r.entry_id),
            errors: task.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        )
    }
    .print();

    Ok(())
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    if input.is_empty() {
        if let Some(def) = default {
            Ok(def.to_string())
        } else {
            Ok(input)
        }
    } else {
        Ok(input)
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let authorization_type = loop {
        let value = read_input(
            "Authorization type",
            Some("CLOUD_ACCESS_KEY"),
            Some("CLOUD_ACCESS_KEY for the cloud service, API_SERVER_USERNAME_PASSWORD for a self-hosted server"),
        )?;

        match value.as_str() {
            "CLOUD_ACCESS_KEY" => break AuthorizationType::CloudAccessKey,
            "API_SERVER_USERNAME_PASSWORD" => break AuthorizationType::ApiServerUsernamePassword,
            other => {
                element!(ErrorMessage(message: format!("Unknown authorization type: {}", other))).print();
                println!();
            }
        }
    };

    let repository_id = loop {
        let repository_id = read_input("Repository ID", None, Some("The repository to import into"))?;
        if repository_id.is_empty() {
            element!(ErrorMessage(message: "Repository ID cannot be empty".to_string())).print();
            println!();
        } else {
            break repository_id;
        }
    };

    let default_base_url = match authorization_type {
        AuthorizationType::CloudAccessKey => Some(DEFAULT_CLOUD_BASE_URL),
        AuthorizationType::ApiServerUsernamePassword => None,
    };
    let repository_api_base_url = loop {
        let base_url_str = read_input(
            "Repository API base URL",
            default_base_url,
            Some("The base URL of the repository API"),
        )?;

        match Url::parse(&base_url_str) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    let access_token = loop {
        let token = read_input(
            "Access token",
            None,
            Some("Your repository access token (stored securely in OS keyring)"),
        )?;

        if token.is_empty() {
            element!(ErrorMessage(message: "Access token cannot be empty".to_string())).print();
            println!();
        } else {
            break token;
        }
    };

    let default_folder_id = loop {
        let folder = read_input(
            "Default folder ID",
            None,
            Some("Optional: folder used when --folder is not given (defaults to the root folder)"),
        )?;
        if folder.is_empty() {
            break None;
        }
        match folder.parse::<i64>() {
            Ok(id) => break Some(id),
            Err(_) => {
                element!(ErrorMessage(message: format!("Not an entry ID: {}", folder))).print();
                println!();
            }
        }
    };

    config::set_access_token_keyring(access_token)?;

    let config_file = ConfigFile {
        authorization_type: Some(authorization_type),
        repository_id: Some(repository_id),
        repository_api_base_url: Some(repository_api_base_url),
        default_folder_id,
    };

    let path = config::write_config(config_file)?;

    element!(SuccessMessage(message: format!("Configuration written to {}", path.display()))).print();

    Ok(())
}
