use clap::{Parser, Subcommand};
use md_blocks::advisory::worker::{Analyze, AnalyzerReply};
use md_blocks::export;
use md_blocks::paste::{self, PasteOutcome};
use md_blocks::{
    AdvisoryEvent, BlockCollection, BlockStore, DetectionPipeline, Effect, EngineConfig,
    LineMeasure, MemoryCollection, Paginator, RuleAnalyzer, SnapshotCollection, Template,
    TidyPipeline,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

type Document = BlockStore<Box<dyn BlockCollection>>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file; missing fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Snapshot directory holding the document; in-memory when omitted
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Imports an indented outline file at the end of the document
    Import {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Prints the document as an indented outline
    Export,
    /// Lays the document out into pages
    Paginate {
        /// Outline file imported before layout
        file: Option<PathBuf>,
        #[arg(long)]
        page_height: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Runs the built-in analyzer over every block and section
    Suggest {
        /// Outline file imported before analysis
        file: Option<PathBuf>,
        /// Accept every tidy suggestion and write it back
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Serialize)]
struct PageView {
    used: f64,
    blocks: Vec<PageBlock>,
}

#[derive(Serialize)]
struct PageBlock {
    id: String,
    line: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    let mut document = open_document(cli.store.as_deref(), &config);

    match &cli.command {
        Commands::Import { file, json } => import_command(&mut document, &config, file, *json),
        Commands::Export => print!("{}", export::to_outline(&document)),
        Commands::Paginate {
            file,
            page_height,
            json,
        } => paginate_command(&mut document, &config, file.as_deref(), *page_height, *json),
        Commands::Suggest { file, apply } => {
            suggest_command(&mut document, &config, file.as_deref(), *apply)
        }
    }
}

fn exit_with(err: impl std::fmt::Display) -> ! {
    eprintln!("Error: {err}");
    std::process::exit(1);
}

fn to_json(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| exit_with(err))
}

fn load_config(path: Option<&Path>) -> EngineConfig {
    match path {
        Some(path) => EngineConfig::load(path).unwrap_or_else(|err| exit_with(err)),
        None => EngineConfig::default(),
    }
}

fn open_document(store: Option<&Path>, config: &EngineConfig) -> Document {
    let collection: Box<dyn BlockCollection> = match store {
        Some(root) => match SnapshotCollection::open(root) {
            Ok(collection) => Box::new(collection),
            Err(err) => exit_with(err),
        },
        None => Box::new(MemoryCollection::new()),
    };
    BlockStore::load(collection, config.store.clone()).unwrap_or_else(|err| exit_with(err))
}

/// Appends the outline in `file` to the document's top level.
fn import_file(document: &mut Document, config: &EngineConfig, file: &Path) -> Effect {
    let text = std::fs::read_to_string(file)
        .unwrap_or_else(|err| exit_with(format!("{}: {err}", file.display())));
    let result = match paste::import(&text, None, 0, &config.paste) {
        PasteOutcome::Empty => Ok(Effect::default()),
        PasteOutcome::Inline(line) => {
            document.create_with(None, None, &Template::default(), line.trim_end())
        }
        PasteOutcome::Blocks(batch) => document.insert_batch(None, batch),
    };
    result.unwrap_or_else(|err| exit_with(err))
}

fn import_command(document: &mut Document, config: &EngineConfig, file: &Path, json: bool) {
    let effect = import_file(document, config, file);
    if json {
        let output = serde_json::json!({
            "created": effect.created.len(),
            "tree": document.tree(),
        });
        println!("{}", to_json(&output));
    } else {
        println!("Imported {} blocks", effect.created.len());
    }
}

fn paginate_command(
    document: &mut Document,
    config: &EngineConfig,
    file: Option<&Path>,
    page_height: Option<f64>,
    json: bool,
) {
    if let Some(file) = file {
        import_file(document, config, file);
    }
    let mut layout_config = config.layout.clone();
    if let Some(height) = page_height {
        if !(height.is_finite() && height > 0.0) {
            exit_with("--page-height must be positive");
        }
        layout_config.page_height = height;
    }

    let mut paginator = Paginator::new(layout_config);
    let Some(report) = paginator.recompute(&*document, &LineMeasure::default()) else {
        exit_with("layout pass was superseded");
    };
    if let Some(err) = &report.error {
        eprintln!("Warning: {err}");
    }

    let pages: Vec<PageView> = report
        .layout
        .pages
        .iter()
        .map(|page| PageView {
            used: page.used,
            blocks: page
                .blocks
                .iter()
                .filter_map(|id| document.get(*id))
                .map(|block| PageBlock {
                    id: block.id.to_string(),
                    line: export::line_for(block),
                })
                .collect(),
        })
        .collect();

    if json {
        let output = serde_json::json!({
            "degraded": report.layout.degraded,
            "pages": pages,
        });
        println!("{}", to_json(&output));
    } else {
        for (index, page) in pages.iter().enumerate() {
            println!("Page {} ({:.0}px)", index + 1, page.used);
            for block in &page.blocks {
                println!("  {}", block.line);
            }
        }
    }
}

/// Drives both pipelines to completion against the built-in analyzer: every
/// block counts as edited, and the clock jumps straight past the debounce.
fn suggest_command(document: &mut Document, config: &EngineConfig, file: Option<&Path>, apply: bool) {
    if let Some(file) = file {
        import_file(document, config, file);
    }
    let mut tidy = TidyPipeline::new(config.advisory.clone());
    let mut detect = DetectionPipeline::new(config.advisory.clone());
    let analyzer = RuleAnalyzer;
    let now = Instant::now();

    let ids: Vec<_> = document
        .blocks_in_order()
        .into_iter()
        .map(|(block, _)| block.id)
        .collect();
    let mut events: Vec<AdvisoryEvent> = Vec::new();
    for id in &ids {
        if let Some(content) = document.content(*id) {
            events.extend(tidy.on_edit(*id, content, now));
        }
        events.extend(detect.on_edit(*id, &*document, now));
    }

    let later = now + config.advisory.debounce();
    let poll = tidy.poll(later, &*document);
    events.extend(poll.events);
    for request in poll.requests {
        let reply = AnalyzerReply {
            request_id: request.request_id,
            outcome: analyzer.analyze(&request),
        };
        events.extend(tidy.on_reply(reply, &*document));
    }
    let poll = detect.poll(later, &*document);
    events.extend(poll.events);
    for request in poll.requests {
        let reply = AnalyzerReply {
            request_id: request.request_id,
            outcome: analyzer.analyze(&request),
        };
        events.extend(detect.on_reply(reply, &*document));
    }

    if apply {
        for id in &ids {
            if tidy.suggestion(*id).is_some() {
                match tidy.accept(*id, &mut *document) {
                    Ok(applied) => events.extend(applied),
                    Err(err) => exit_with(err),
                }
            }
        }
    }

    println!("{}", to_json(&events));
}
