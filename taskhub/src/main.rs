//! `TaskHub`: command-line task tracker with live sync.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/taskhub/config.toml`). Logs go to a file so stdout carries
//! only command output.
//!
//! ```bash
//! # Log in: open the printed URL, then paste the URL you land on
//! taskhub login
//! taskhub complete 'http://localhost:3000/dashboard?token=...'
//!
//! # Work with tasks
//! taskhub create "Write report" --due 2024-06-01 --shared-with "bob@x.io, carol@x.io"
//! taskhub list --filter overdue
//! taskhub watch --filter today
//!
//! # Point at another service
//! TASKHUB_API_URL=https://tasks.example.com taskhub list
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;

use taskhub::config::{CliArgs, ClientConfig};
use taskhub::credential::FileCredentialStore;
use taskhub::repo::RepoError;
use taskhub::repo::http::HttpTaskRepository;
use taskhub::session::{RemoteSessionFactory, SessionController, SessionError};
use taskhub::sync::{SyncState, Synchronizer};
use taskhub::view::{FilterSelector, FilterView};
use taskhub_proto::task::{self, Task, TaskDraft, TaskId, TaskStatus};

type Controller = SessionController<FileCredentialStore, RemoteSessionFactory>;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Collaborative task tracker with live sync")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print the identity-provider URL to open in a browser.
    Login,
    /// Finish login with the URL the browser was sent back to.
    Complete {
        /// Return URL carrying `?token=`.
        return_url: String,
    },
    /// Forget the stored credential.
    Logout,
    /// Print tasks once.
    List {
        /// all, today, overdue or completed.
        #[arg(short, long, default_value = "all")]
        filter: FilterSelector,
    },
    /// Create a task.
    Create {
        title: String,
        /// Due date (`YYYY-MM-DD`).
        #[arg(long, value_parser = parse_due)]
        due: NaiveDate,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "pending")]
        status: TaskStatus,
        /// Comma-separated collaborator emails.
        #[arg(long, default_value = "")]
        shared_with: String,
    },
    /// Edit a task; unspecified fields keep their current values.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, value_parser = parse_due)]
        due: Option<NaiveDate>,
        /// Pass an empty string to clear.
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Comma-separated collaborator emails; replaces the current set.
        #[arg(long)]
        shared_with: Option<String>,
    },
    /// Delete a task.
    Delete { id: String },
    /// Show tasks and keep them up to date until Ctrl-C.
    Watch {
        #[arg(short, long, default_value = "all")]
        filter: FilterSelector,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not logged in (run `taskhub login`)")]
    NotLoggedIn,
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.args.log_level, cli.args.log_file.as_deref());
    tracing::info!(service = %config.service_url, "taskhub starting");

    let live = matches!(cli.command, Command::Watch { .. });
    let factory = RemoteSessionFactory::from_config(&config).with_live_updates(live);
    let store = FileCredentialStore::new(&config.credential_dir);
    let mut controller = SessionController::new(store, factory, config.service_url.clone());

    let result = run(cli.command, &mut controller).await;
    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if let CliError::Repo(err) = &e {
                match controller.enforce(err) {
                    Ok(true) => eprintln!("Session expired; logged out."),
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            ExitCode::FAILURE
        }
    };

    tracing::info!("taskhub exiting");
    code
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskhub.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn parse_due(raw: &str) -> Result<NaiveDate, String> {
    task::parse_due_date(raw).map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

async fn run(command: Command, controller: &mut Controller) -> Result<(), CliError> {
    match command {
        Command::Login => {
            let url = controller.begin_login()?;
            println!("Open this URL in a browser to sign in:\n  {url}");
            println!("Then run `taskhub complete '<url you were sent back to>'`.");
        }
        Command::Complete { return_url } => {
            let next = controller.complete_login(&return_url).await?;
            println!("Logged in. Continue at {next}");
        }
        Command::Logout => {
            controller.logout()?;
            println!("Logged out.");
        }
        Command::List { filter } => {
            let sync = require_session(controller).await?;
            let state = loaded(&sync).await?;
            render(&state, filter);
        }
        Command::Create {
            title,
            due,
            description,
            status,
            shared_with,
        } => {
            let mut draft = TaskDraft::new(title, due)
                .with_status(status)
                .with_shared_with(task::parse_shared_with(&shared_with));
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            let sync = require_session(controller).await?;
            let state = sync.create(draft).await?;
            println!("Task created.");
            render(&state, FilterSelector::All);
        }
        Command::Update {
            id,
            title,
            due,
            description,
            status,
            shared_with,
        } => {
            let sync = require_session(controller).await?;
            let id = TaskId::new(id);
            let current = loaded(&sync).await?;
            let existing = current
                .tasks
                .iter()
                .find(|t| t.id == id)
                .ok_or_else(|| CliError::NotFound(id.clone()))?;

            let mut draft = existing.to_draft();
            if let Some(title) = title {
                draft.title = title;
            }
            if let Some(due) = due {
                draft.due_date = due;
            }
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(status) = status {
                draft = draft.with_status(status);
            }
            if let Some(shared_with) = shared_with {
                draft = draft.with_shared_with(task::parse_shared_with(&shared_with));
            }

            let state = sync.update(id, draft).await?;
            println!("Task updated.");
            render(&state, FilterSelector::All);
        }
        Command::Delete { id } => {
            let sync = require_session(controller).await?;
            let state = sync.delete(TaskId::new(id)).await?;
            println!("Task deleted.");
            render(&state, FilterSelector::All);
        }
        Command::Watch { filter } => {
            let sync = require_session(controller).await?;
            if !controller.push_active() {
                eprintln!("Live updates unavailable; refresh by running the command again.");
            }
            watch(&sync, filter).await?;
        }
    }
    Ok(())
}

async fn require_session(
    controller: &mut Controller,
) -> Result<Arc<Synchronizer<HttpTaskRepository>>, CliError> {
    controller.restore().await?;
    controller
        .synchronizer()
        .cloned()
        .ok_or(CliError::NotLoggedIn)
}

/// Refreshes and fails if the fetch did.
async fn loaded(sync: &Synchronizer<HttpTaskRepository>) -> Result<SyncState, CliError> {
    let state = sync.refresh().await;
    match state.last_error {
        Some(err) => Err(err.into()),
        None => Ok(state),
    }
}

async fn watch(
    sync: &Synchronizer<HttpTaskRepository>,
    filter: FilterSelector,
) -> Result<(), CliError> {
    let mut states = sync.subscribe();
    let mut notices = sync.remote_events();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let initial = states.borrow_and_update().clone();
    if initial.loading || initial.revision == 0 {
        println!("Loading tasks...");
    } else {
        render(&initial, filter);
    }

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if state.loading {
                    continue;
                }
                if let Some(err) = state.last_error.as_ref().filter(|e| e.is_auth()) {
                    return Err(err.clone().into());
                }
                render(&state, filter);
            }
            notice = notices.recv() => match notice {
                Ok(kind) => println!("* {}", kind.notice()),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => break,
        }
    }
    Ok(())
}

fn render(state: &SyncState, filter: FilterSelector) {
    let view = FilterView::derive(state, filter, &Local::now());
    println!();
    println!("== {} tasks ==", view.selector());
    if let Some(err) = view.error() {
        println!("Error: {err}");
    }
    if view.is_empty() {
        println!("No tasks to show.");
        return;
    }
    for task in view.tasks() {
        println!("{}", format_task(task));
    }
}

fn format_task(task: &Task) -> String {
    let mut line = format!(
        "[{:<11}] {}  (due {})  id={}",
        task.status.as_str(),
        task.title,
        task.due_date.format(task::DUE_DATE_FORMAT),
        task.id
    );
    if let Some(description) = &task.description {
        line.push_str("\n    ");
        line.push_str(description);
    }
    if !task.shared_with.is_empty() {
        line.push_str("\n    shared with: ");
        line.push_str(&task.shared_with.join(", "));
    }
    line
}
