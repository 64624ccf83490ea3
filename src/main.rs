use std::{
    io::{BufRead, BufReader},
    path::Path,
    sync::Arc,
};

use clap::Parser;
use kbseek::{
    DataDir,
    Encoder,
    EncoderKind,
    EntryDraft,
    KnowledgeBase,
    SearchService,
    build_encoder,
    error::{self, Error},
    http,
    mcp,
    model_manager::{self, DEFAULT_MODEL_ID, MODEL_ENV_VAR, MODEL_SETTING},
    search::{self, SearchParams},
};
use kdam::{BarExt, tqdm};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ModelAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("KBSEEK_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let kb = KnowledgeBase::open(&data_dir.entries_db(), &data_dir.tantivy_dir()?)?;

    match cli.command {
        Command::Search(args) => {
            let encoder = open_encoder(&cli.model, cli.encoder, &kb)?;
            let params = SearchParams {
                phrase: args.phrase.clone(),
                top_n: args.count,
                mode: args.mode,
                min_score: args.min_score,
            };
            let outcome = search::execute_search(&params, &kb, encoder.as_ref())?;

            if args.json {
                search::format_json(&outcome, &args.phrase)?;
            } else {
                search::format_human(&outcome);
            }
        }
        Command::Add(args) => {
            let entry = kb.add(args.to_draft())?;
            if args.json {
                println!("{}", serde_json::to_string(&entry)?);
            } else {
                println!("Added entry #{} '{}'", entry.id, entry.title);
            }
        }
        Command::Update(args) => {
            let current = kb.get(args.id)?.ok_or_else(|| Error::NotFound {
                kind: "entry",
                name: args.id.to_string(),
            })?;
            let entry = kb.update(args.id, args.apply(current.to_draft()))?;
            if args.json {
                println!("{}", serde_json::to_string(&entry)?);
            } else {
                println!("Updated entry #{}", entry.id);
            }
        }
        Command::Import(args) => {
            cmd_import(&kb, &args.file, args.batch_size)?;
        }
        Command::Get(args) => {
            let entry = kb.get(args.id)?.ok_or_else(|| Error::NotFound {
                kind: "entry",
                name: args.id.to_string(),
            })?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("#{} {}", entry.id, entry.title);
                println!("category: {}", entry.category_id);
                if !entry.enabled {
                    println!("(disabled)");
                }
                println!("\nQ: {}\n\nA: {}", entry.question, entry.answer);
            }
        }
        Command::List(args) => {
            let entries = kb.db().list()?;
            if args.json {
                println!("{}", serde_json::to_string(&entries)?);
            } else if entries.is_empty() {
                println!("No entries stored.");
            } else {
                for entry in &entries {
                    println!("{}\t{}", entry.id, entry.title);
                }
            }
        }
        Command::Remove { id } => {
            if !kb.remove(id)? {
                return Err(Error::NotFound {
                    kind: "entry",
                    name: id.to_string(),
                });
            }
            println!("Removed entry #{id}");
        }
        Command::Rebuild => {
            cmd_rebuild(&kb)?;
        }
        Command::Status(args) => {
            cmd_status(
                &kb,
                &data_dir,
                cli.model.as_deref(),
                cli.encoder,
                args.json,
            )?;
        }
        Command::Model { action } => {
            cmd_model(&kb, cli.model.as_deref(), action)?;
        }
        Command::Mcp(args) => {
            let encoder = open_encoder(&cli.model, cli.encoder, &kb)?;
            if args.preload {
                encoder.warm_up()?;
            }
            mcp::run_mcp(SearchService::new(Arc::new(kb), encoder))?;
        }
        Command::Serve(args) => {
            let encoder = open_encoder(&cli.model, cli.encoder, &kb)?;
            if args.preload {
                encoder.warm_up()?;
            }
            let service = SearchService::new(Arc::new(kb), encoder);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| {
                    Error::Config(format!("failed to start tokio runtime: {e}"))
                })?;
            runtime.block_on(http::serve(service, args.addr))?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn open_encoder(
    model: &Option<String>,
    kind: Option<EncoderKind>,
    kb: &KnowledgeBase,
) -> error::Result<Arc<dyn Encoder>> {
    let kind = EncoderKind::resolve(kind)?;
    let model_id = model_manager::resolve_model_id(model.as_deref(), kb.db())?;
    tracing::debug!(?kind, model = %model_id, "encoder selected");
    Ok(build_encoder(kind, &model_id))
}

fn cmd_import(
    kb: &KnowledgeBase,
    file: &Path,
    batch_size: usize,
) -> error::Result<()> {
    let reader = BufReader::new(std::fs::File::open(file)?);

    let mut drafts = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let draft: EntryDraft = serde_json::from_str(&line).map_err(|e| {
            Error::Config(format!(
                "{}:{}: invalid entry: {e}",
                file.display(),
                number + 1
            ))
        })?;
        drafts.push(draft);
    }

    if drafts.is_empty() {
        eprintln!("No entries to import.");
        return Ok(());
    }

    let mut pb = tqdm!(total = drafts.len(), desc = "Importing", unit = " entries");
    let mut imported = 0;
    let mut pending = drafts.into_iter().peekable();
    while pending.peek().is_some() {
        let batch: Vec<EntryDraft> =
            pending.by_ref().take(batch_size.max(1)).collect();
        let added = kb.add_many(batch)?;
        imported += added.len();
        pb.update(added.len())?;
    }
    eprintln!();

    eprintln!("Imported {imported} entries from {}", file.display());
    Ok(())
}

fn cmd_rebuild(kb: &KnowledgeBase) -> error::Result<()> {
    let total = kb.count()?;
    if total == 0 {
        kb.rebuild_index()?;
        eprintln!("No entries to index; index cleared.");
        return Ok(());
    }

    let mut pb = tqdm!(total = total as usize, desc = "Indexing", unit = " entries");
    let count = kb.rebuild_index_with(|_, _| {
        pb.update(1)?;
        Ok(())
    })?;
    eprintln!();

    eprintln!("Rebuild complete: {count} entries indexed.");
    Ok(())
}

fn cmd_status(
    kb: &KnowledgeBase,
    data_dir: &DataDir,
    model: Option<&str>,
    encoder: Option<EncoderKind>,
    json: bool,
) -> error::Result<()> {
    let entries = kb.count()?;
    let indexed = kb.index().num_docs()?;
    let model_name = model_manager::resolve_model_id(model, kb.db())?;
    let encoder = EncoderKind::resolve(encoder)?.as_str();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "data_dir": data_dir.root(),
                "model": model_name,
                "encoder": encoder,
                "entries": entries,
                "indexed": indexed,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {model_name}");
        println!("Encoder: {encoder}");
        println!("Entries: {entries}");
        println!("Indexed: {indexed}");
        if indexed != entries {
            println!("Index out of date; run `kbseek rebuild`.");
        }
    }
    Ok(())
}

fn cmd_model(
    kb: &KnowledgeBase,
    model: Option<&str>,
    action: ModelAction,
) -> error::Result<()> {
    match action {
        ModelAction::Show { json } => {
            let stored = kb.db().get_setting(MODEL_SETTING)?;
            let env = std::env::var(MODEL_ENV_VAR).ok();
            let resolved = model_manager::resolve_model_id(model, kb.db())?;
            let source = if model.is_some() {
                "cli"
            } else if env.is_some() {
                "env"
            } else if stored.is_some() {
                "config"
            } else {
                "default"
            };

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "resolved": resolved,
                        "source": source,
                        "cli": model,
                        "env": env,
                        "config": stored,
                        "default": DEFAULT_MODEL_ID,
                    })
                );
            } else {
                println!("Resolved: {resolved} ({source})");
                if let Some(model) = model {
                    println!("CLI: {model}");
                }
                if let Some(env) = &env {
                    println!("{MODEL_ENV_VAR}: {env}");
                }
                if let Some(stored) = &stored {
                    println!("Config: {stored}");
                }
                println!("Default: {DEFAULT_MODEL_ID}");
            }
        }
        ModelAction::Set { model } => {
            kb.db().set_setting(MODEL_SETTING, &model)?;
            println!("Stored model: {model}");
        }
        ModelAction::Clear => {
            if kb.db().remove_setting(MODEL_SETTING)? {
                println!("Cleared stored model; using default {DEFAULT_MODEL_ID}");
            } else {
                println!("No stored model setting.");
            }
        }
    }
    Ok(())
}
