// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use autocover_file_format::coverage::results::HitResults;
use autocover_lib::config::Config;
use autocover_lib::engine::{AnalysisRequest, CycleReport, Engine};
use autocover_lib::monitor::SaveMonitor;
use autocover_lib::settings::Settings;
use autocover_lib::toolchain::Toolchain;
use clap::{Parser, Subcommand};
use coverage::{DocumentPath, Outcome, TestId};
use log::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "autocover", version, about = "Runs the tests impacted by source changes")]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze saved documents until interrupted.
    Watch {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run one analysis cycle for the given documents.
    Run {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long = "document", required = true, num_args = 1..)]
        documents: Vec<PathBuf>,

        /// Analyze even if auto cover is disabled for the solution.
        #[arg(long)]
        force: bool,

        #[arg(long)]
        test_settings: Option<PathBuf>,
    },

    /// Show or change the per-solution settings.
    Settings {
        #[arg(long)]
        solution: PathBuf,

        /// Defaults to the name of the solution directory.
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        enable_auto_cover: Option<bool>,

        #[arg(long)]
        disable_row_highlighting: Option<bool>,
    },

    /// Summarize a hit-results file.
    Report {
        #[arg(long)]
        results: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::parse();

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(dispatch(opt.command));
    atexit::execute();
    result
}

async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Watch { config } => watch(config).await,
        Command::Run {
            config,
            documents,
            force,
            test_settings,
        } => run_once(config, documents, force, test_settings).await,
        Command::Settings {
            solution,
            name,
            enable_auto_cover,
            disable_row_highlighting,
        } => settings(solution, name, enable_auto_cover, disable_row_highlighting),
        Command::Report { results } => report(results),
    }
}

fn load_engine(config: PathBuf) -> Result<(Arc<Engine>, PathBuf)> {
    let config = Arc::new(Config::load(config)?);

    let settings_path = Settings::path(&config.solution_dir, &config.solution_name());
    let settings = Settings::load(&settings_path)?;

    let toolchain = Toolchain::from_config(config.clone());
    let engine = Arc::new(Engine::new(config, toolchain, settings));

    Ok((engine, settings_path))
}

async fn watch(config: PathBuf) -> Result<()> {
    let (engine, settings_path) = load_engine(config)?;
    let config = engine.config();

    if !engine.settings().enable_auto_cover {
        warn!(
            "auto cover is disabled in {}, saves will be ignored",
            settings_path.display()
        );
    }

    {
        let engine = engine.clone();
        atexit::register("save autocover settings", move || {
            engine.shutdown();
            if let Err(err) = engine.settings().save(&settings_path) {
                error!("unable to save settings: {:?}", err);
            }
        });
    }

    let mut monitor = SaveMonitor::new(&config.solution_dir, &config.watch).await?;
    monitor.ignore(config.work_dir()).await?;

    let worker = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    let progress = {
        let mut status = engine.status();
        tokio::spawn(async move {
            let mut generation = 0;
            while status.changed().await.is_ok() {
                let status = status.borrow_and_update().clone();
                if status.generation == generation {
                    continue;
                }
                generation = status.generation;

                let failed = status.outcomes.values().filter(|o| o.is_failed()).count();
                info!(
                    "{} tests known, {} failing",
                    status.outcomes.len(),
                    failed
                );
                if let Some(err) = status.last_error {
                    warn!("last cycle reported errors: {}", err);
                }
            }
        })
    };

    info!("watching {}", config.solution_dir.display());
    monitor.forward(&engine).await?;

    engine.shutdown();
    worker.await?;
    progress.abort();

    Ok(())
}

async fn run_once(
    config: PathBuf,
    documents: Vec<PathBuf>,
    force: bool,
    test_settings: Option<PathBuf>,
) -> Result<()> {
    let (engine, _) = load_engine(config)?;

    for document in documents {
        let document = engine.config().resolve(&document);
        let request = AnalysisRequest {
            document: DocumentPath::from(document.as_path()),
            test_settings: test_settings.clone(),
        };

        if force || engine.should_process(&request.document) {
            engine.enqueue(request);
        } else {
            warn!(
                "ignoring {}: auto cover is disabled or the document is not watched",
                document.display()
            );
        }
    }

    match engine.run_pending().await {
        Some(report) => print_cycle(&report, &engine.snapshot()),
        None => info!("nothing to analyze"),
    }

    Ok(())
}

fn print_cycle(report: &CycleReport, outcomes: &BTreeMap<TestId, Outcome>) {
    if report.is_noop() {
        println!("no tests impacted");
    } else {
        println!("ran {} tests", report.selected.len());
    }

    for outcome in outcomes.values() {
        match &outcome.message {
            Some(message) => println!("{:?} {}: {}", outcome.status, outcome.name, message),
            None => println!("{:?} {}", outcome.status, outcome.name),
        }
    }

    for err in &report.errors {
        println!("error: {err}");
    }
}

fn settings(
    solution: PathBuf,
    name: Option<String>,
    enable_auto_cover: Option<bool>,
    disable_row_highlighting: Option<bool>,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => solution
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::format_err!("unable to name solution: {}", solution.display()))?,
    };

    let path = Settings::path(&solution, &name);
    let mut settings = Settings::load(&path)?;
    let original = settings;

    if let Some(enable_auto_cover) = enable_auto_cover {
        settings.enable_auto_cover = enable_auto_cover;
    }
    if let Some(disable_row_highlighting) = disable_row_highlighting {
        settings.disable_row_highlighting = disable_row_highlighting;
    }

    if settings != original {
        settings.save(&path)?;
        info!("saved {}", path.display());
    }

    println!("{}", serde_json::to_string_pretty(&settings)?);

    Ok(())
}

fn report(results: PathBuf) -> Result<()> {
    let results = HitResults::load(results)?;

    let mut documents: BTreeMap<&str, (usize, BTreeSet<&str>)> = BTreeMap::new();
    for point in &results.points {
        let (points, tests) = documents.entry(point.document.as_str()).or_default();
        *points += 1;
        tests.extend(point.tests.iter().map(String::as_str));
    }

    for (document, (points, tests)) in &documents {
        println!("{document}: {points} points hit by {} tests", tests.len());
    }

    let tests: BTreeSet<&str> = documents
        .values()
        .flat_map(|(_, tests)| tests.iter().copied())
        .collect();
    println!(
        "{} documents, {} points, {} tests",
        documents.len(),
        results.points.len(),
        tests.len()
    );

    Ok(())
}
