use anyhow::{Context, Result};
use clap::Parser;
use extension_finder::artifact::FsArtifactSource;
use extension_finder::build::{
    BuildOutcome, BuildSpec, ResolveOptions, discover_build, outcome, resolve_build,
};
use extension_finder::cli::{Cli, Commands, OutputFormat};
use extension_finder::config::{clear_db, resolve_db_path, resolve_m2_repo};
use extension_finder::context::BuildContext;
use extension_finder::indexer::ArtifactIndexer;
use extension_finder::resolver::coordinate_from_maven_path;
use extension_finder::store::{IndexStore, LmdbIndexStore, NoIndexStore};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.clone() {
        Commands::Clear => {
            let db_path = resolve_db_path(&cli)?;
            clear_db(&db_path)?;
        }
        Commands::Stats => {
            let db_path = resolve_db_path(&cli)?;
            let store = LmdbIndexStore::open(db_path)?;
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Index {
            artifact,
            coordinate,
        } => {
            let indexer = ArtifactIndexer::new(Arc::new(FsArtifactSource), open_store(&cli)?);
            let result = index_artifact(&cli, &indexer, &artifact, coordinate)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Extensions { build, format } => {
            let (spec, base_dir) = BuildSpec::load(&build)?;
            let resolver = spec.resolver(&base_dir, &resolve_m2_repo(&cli)?);
            let mut ctx = build_context(&cli)?;
            discover_build(&mut ctx, &spec, &resolver)?;
            let result = outcome(&ctx, Vec::new());
            write_output(&result, format, None)?;
        }
        Commands::Resolve {
            build,
            format,
            output,
        } => {
            let start = Instant::now();
            let (spec, base_dir) = BuildSpec::load(&build)?;
            let resolver = spec.resolver(&base_dir, &resolve_m2_repo(&cli)?);
            let mut ctx = build_context(&cli)?;
            let result = resolve_build(&mut ctx, &spec, &resolver)?;
            tracing::debug!(
                duration_ms = start.elapsed().as_millis() as u64,
                extensions = result.extensions.len(),
                units = result.persistence_units.len(),
                "Build resolved"
            );
            write_output(&result, format, output.as_deref())?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_store(cli: &Cli) -> Result<Arc<dyn IndexStore>> {
    if cli.no_cache {
        return Ok(Arc::new(NoIndexStore));
    }
    let db_path = resolve_db_path(cli)?;
    Ok(Arc::new(LmdbIndexStore::open(db_path)?))
}

fn build_context(cli: &Cli) -> Result<BuildContext> {
    let options = ResolveOptions {
        parallel_indexing: !cli.sequential,
        store: open_store(cli)?,
    };
    Ok(options.context(Arc::new(FsArtifactSource)))
}

#[derive(Debug, Serialize)]
struct IndexResult {
    coordinate: String,
    artifact: String,
    classes: usize,
    annotated_classes: usize,
    duration_ms: u64,
}

fn index_artifact(
    cli: &Cli,
    indexer: &ArtifactIndexer,
    artifact: &Path,
    coordinate: Option<String>,
) -> Result<IndexResult> {
    let start = Instant::now();
    let coordinate = match coordinate {
        Some(c) => c,
        None => coordinate_from_maven_path(&resolve_m2_repo(cli)?, artifact)
            .map(|c| c.gav())
            .unwrap_or_else(|| artifact.to_string_lossy().to_string()),
    };

    let index = indexer
        .try_index(&coordinate, artifact)
        .with_context(|| format!("Failed to index {}", artifact.display()))?;

    Ok(IndexResult {
        coordinate,
        artifact: artifact.to_string_lossy().to_string(),
        classes: index.len(),
        annotated_classes: index
            .classes()
            .filter(|c| !c.annotations.is_empty())
            .count(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

fn render_text(result: &BuildOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "extensions: {} (declared {}, implicit {}, transitive {})\n",
        result.extensions.len(),
        result.discovery.declared,
        result.discovery.implicit,
        result.discovery.transitive
    ));
    for e in &result.extensions {
        let deployment = e
            .deployment()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "- {} [{:?}] {} deployment: {}\n",
            e.name(),
            e.kind(),
            e.artifact(),
            deployment
        ));
    }
    out.push_str(&format!(
        "runtime_dependencies: {}\n",
        result.runtime_dependencies.len()
    ));
    out.push_str(&format!("marker_probes: {}\n", result.discovery.probes));
    for unit in &result.persistence_units {
        out.push_str(&format!("persistence_unit: {} ({} classes)\n", unit.name(), unit.len()));
        for class in unit.classes() {
            out.push_str(&format!("  {class}\n"));
        }
    }
    out
}

fn write_output(result: &BuildOutcome, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => render_text(result),
    };

    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write output: {}", path.display()))?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
