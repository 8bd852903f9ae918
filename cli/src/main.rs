use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use log::{info, Level};
use tap::Tap;

use preview::jobs::{execute, DocumentJob, DocumentOperation, JobRunner};
use preview::management::DocumentManagement;
use preview::repository::{ContentStore, FileNode, FsContentStore, Workspaces, DEFAULT_WORKSPACE};
use preview::rules::PreviewRules;
use preview::settings::PreviewSettings;
use preview::views;
use services::{log_err, Config};

#[derive(Parser, Debug)]
#[command(about = "Generate thumbnails and views of the documents in a directory")]
struct Args {
    /// The directory holding the documents.
    #[arg(value_parser = parse_store_dir)]
    store: PathBuf,

    /// A JSON file with the preview settings.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// The workspace name of the store, used in version labels.
    #[arg(short = 'w', long, default_value = DEFAULT_WORKSPACE)]
    workspace: String,

    /// Log debug output.
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a thumbnail of the first page of a document.
    Thumbnail {
        node: String,
        #[arg(short = 'n', long)]
        name: Option<String>,
        #[arg(short = 's', long)]
        size: Option<u32>,
    },

    /// Generate a thumbnail from a frame of a video.
    VideoThumbnail {
        node: String,
        #[arg(short = 'n', long)]
        name: Option<String>,
        #[arg(short = 'o', long)]
        offset: Option<u32>,
        #[arg(short = 's', long)]
        size: Option<String>,
    },

    /// Generate the flash view of a document.
    View { node: String },

    /// Generate the PDF view of a document.
    PdfView { node: String },

    /// Print the URL of the view of a document.
    ViewUrl {
        node: String,
        /// Print the URL of the PDF view instead of the flash view.
        #[arg(long)]
        pdf: bool,
        /// Generate the view if it is missing or outdated.
        #[arg(long)]
        create: bool,
    },

    /// Print which services can handle a document.
    CanHandle { node: String },

    /// Run the preview rules for every document in the store.
    Scan,
}

fn parse_store_dir(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(format!("Path {} not found", path_str));
    }
    if !path.is_dir() {
        return Err(format!("Path {} is not a directory", path_str));
    }
    Ok(path)
}

fn log_level(verbose: bool, config: &Config) -> Level {
    if verbose {
        return Level::Debug;
    }
    config.get_parsed("PREVIEW_LOG_LEVEL").unwrap_or(Level::Info)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config;
    simple_logger::init_with_level(log_level(args.verbose, &config))?;

    let settings = match &args.config {
        Some(path) => PreviewSettings::from_file(path)?,
        None => PreviewSettings::default(),
    }
    .with_env_overrides(&config);

    let management = Arc::new(DocumentManagement::from_settings(&settings).await);
    let store: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(args.store, args.workspace));

    match args.command {
        Command::Thumbnail { node, name, size } => {
            let operation = DocumentOperation::DocumentThumbnail {
                name: name.unwrap_or_else(|| settings.thumbnails.name.clone()),
                size: size.unwrap_or(settings.thumbnails.size),
            };
            run(&management, store.as_ref(), node, operation).await
        }
        Command::VideoThumbnail {
            node,
            name,
            offset,
            size,
        } => {
            let operation = DocumentOperation::VideoThumbnail {
                name: name.unwrap_or_else(|| settings.video.name.clone()),
                offset: offset.unwrap_or(settings.video.offset),
                size: size.unwrap_or_else(|| settings.video.size.clone()),
            };
            run(&management, store.as_ref(), node, operation).await
        }
        Command::View { node } => run(&management, store.as_ref(), node, DocumentOperation::View).await,
        Command::PdfView { node } => run(&management, store.as_ref(), node, DocumentOperation::PdfView).await,
        Command::ViewUrl { node, pdf, create } => {
            let url = if pdf {
                views::pdf_view_url(store.as_ref(), management.viewer(), &node, create).await?
            } else {
                views::view_url(store.as_ref(), management.viewer(), &node, create).await?
            };
            match url {
                Some(url) => println!("{}", url),
                None => println!("{} has no view", node),
            }
            Ok(())
        }
        Command::CanHandle { node } => {
            let node = store
                .node(&node)
                .await?
                .ok_or_else(|| anyhow!("Node {} not found", node))?;
            print_capabilities(&management, &node);
            Ok(())
        }
        Command::Scan => scan(management, store, &settings).await,
    }
}

async fn run(
    management: &DocumentManagement,
    store: &dyn ContentStore,
    node: String,
    operation: DocumentOperation,
) -> anyhow::Result<()> {
    let job = DocumentJob::new(node, operation).in_workspace(store.workspace());
    let generated = execute(management, store, &job).await?;
    if generated {
        println!("Generated {} for {}", job.operation, job.node);
    } else {
        println!("Nothing generated for {}", job.node);
    }
    Ok(())
}

fn print_capabilities(management: &DocumentManagement, node: &FileNode) {
    let yes_no = |handled: bool| if handled { "yes" } else { "no" };
    println!("{} ({})", node.path, node.mimetype());
    println!(
        "  thumbnail:       {}",
        yes_no(management.thumbnails().map_or(false, |s| s.can_handle(node)))
    );
    println!(
        "  video thumbnail: {}",
        yes_no(management.video().map_or(false, |s| s.can_handle(node)))
    );
    println!(
        "  view:            {}",
        yes_no(management.viewer().map_or(false, |s| s.can_handle(node)))
    );
}

/// Run the rules for every file of the store on the background job runner.
///
async fn scan(
    management: Arc<DocumentManagement>,
    store: Arc<dyn ContentStore>,
    settings: &PreviewSettings,
) -> anyhow::Result<()> {
    let runner = JobRunner::start(management.clone(), Workspaces::single(store.clone()), settings.jobs.workers);
    let rules = PreviewRules::new(management)
        .with_scheduler(runner.scheduler())
        .as_background_job(settings.jobs.as_background_job);

    let files = store
        .files()
        .await
        .tap(log_err!("Failed to list the files of workspace {}", store.workspace()))?;
    info!("Scanning {} files", files.len());

    let mut triggered = 0;
    for node in &files {
        if rules
            .create_thumbnail(store.as_ref(), node, &settings.thumbnails.name, settings.thumbnails.size)
            .await
        {
            triggered += 1;
        }
        if rules
            .create_video_thumbnail(
                store.as_ref(),
                node,
                &settings.video.name,
                settings.video.offset,
                &settings.video.size,
            )
            .await
        {
            triggered += 1;
        }
        if rules.create_view(store.as_ref(), node).await {
            triggered += 1;
        }
    }

    drop(rules);
    runner.shutdown().await;
    info!("Finished scan, {} operations triggered", triggered);

    Ok(())
}
