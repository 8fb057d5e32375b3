/*
cargo run --bin gather_metadata

cargo run --bin gather_metadata -- \
    --root holohub/applications \
    --output site/public/aggregate_metadata.json \
    --log-dir logs
*/

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde_json::{Map, Value};
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};
use walkdir::WalkDir;

const METADATA_FILE: &str = "metadata.json";
const README_FILE: &str = "README.md";
const APPLICATIONS_SEGMENT: &str = "applications";

const DEFAULT_ROOT: &str = "holohub/applications";
const DEFAULT_OUTPUT: &str = "aggregate_metadata.json";

/// Gather every application's metadata.json into one catalog file.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Directory tree that holds the applications
    #[arg(long, value_name = "PATH", default_value = DEFAULT_ROOT)]
    root: PathBuf,

    /// Aggregate JSON file (overwritten if it exists)
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Where the run log is written
    #[arg(long, value_name = "PATH", default_value = "logs")]
    log_dir: PathBuf,

    /// Follow symlinked directories while walking the tree
    #[arg(long)]
    follow_links: bool,

    /// Indent the aggregate instead of writing compact JSON
    #[arg(long)]
    pretty: bool,
}

/// Inputs of one aggregation run.
#[derive(Debug, Clone)]
struct GatherConfig {
    root: PathBuf,
    output: PathBuf,
    follow_links: bool,
    pretty: bool,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            output: PathBuf::from(DEFAULT_OUTPUT),
            follow_links: false,
            pretty: false,
        }
    }
}

impl From<&Cli> for GatherConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            root: cli.root.clone(),
            output: cli.output.clone(),
            follow_links: cli.follow_links,
            pretty: cli.pretty,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging setup
    fs::create_dir_all(&cli.log_dir)
        .with_context(|| format!("creating {}", cli.log_dir.display()))?;
    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let log_path = cli.log_dir.join(format!("gather_metadata_{ts}.log"));
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Warn,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::Info,
            Config::default(),
            File::create(&log_path)
                .with_context(|| format!("creating {}", log_path.display()))?,
        ),
    ])?;

    let config = GatherConfig::from(&cli);
    info!(
        "Started - root: {:?}, output: {:?}, follow_links: {}, pretty: {}",
        config.root, config.output, config.follow_links, config.pretty
    );

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} {pos}/{len} {wide_bar:.cyan/blue} {elapsed_precise}",
    )?);

    let count = gather_metadata(&config, &bar)?;
    bar.finish_and_clear();

    println!(
        "Gathered {} descriptor(s) into {}",
        count,
        config.output.display()
    );
    Ok(())
}

/// Walk `config.root`, enrich every descriptor and write the aggregate.
/// Returns the number of records written.
///
/// Fails fast: the first unreadable or malformed descriptor aborts the run
/// before anything is written.
fn gather_metadata(config: &GatherConfig, bar: &ProgressBar) -> Result<usize> {
    let descriptors = find_metadata_files(&config.root, config.follow_links)?;
    info!("Found {} descriptor(s) under {:?}", descriptors.len(), config.root);

    bar.set_length(descriptors.len() as u64);
    let mut records = Vec::with_capacity(descriptors.len());
    for path in &descriptors {
        records.push(enrich_descriptor(path)?);
        bar.inc(1);
    }

    write_aggregate(&config.output, &records, config.pretty)?;
    info!("Wrote {} record(s) to {:?}", records.len(), config.output);
    Ok(records.len())
}

/// Every `metadata.json` under `root` (root included), sorted by path.
/// A missing root yields nothing.
fn find_metadata_files(root: &Path, follow_links: bool) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        warn!("Root {:?} is not a directory - nothing to gather", root);
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_links) {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if entry.file_name() == METADATA_FILE && !entry.file_type().is_dir() {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Load one descriptor and add `readme` and `application_name`.
fn enrich_descriptor(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let json: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;

    let mut record: Map<String, Value> = match json {
        Value::Object(obj) => obj,
        other => bail!(
            "Descriptor {} is not a JSON object (found {:?})",
            path.display(),
            other
        ),
    };

    let application_name = extract_application_name(path);
    info!("{} -> application {:?}", path.display(), application_name);

    record.insert("readme".into(), Value::String(extract_readme(path)?));
    record.insert("application_name".into(), Value::String(application_name));
    Ok(Value::Object(record))
}

/// README.md next to the descriptor, else one level up, else "".
fn extract_readme(descriptor: &Path) -> Result<String> {
    let dir = descriptor.parent().unwrap_or_else(|| Path::new(""));
    let candidates = [
        Some(dir.join(README_FILE)),
        dir.parent().map(|p| p.join(README_FILE)),
    ];

    for readme in candidates.into_iter().flatten() {
        if readme.exists() {
            info!("{} uses {}", descriptor.display(), readme.display());
            return fs::read_to_string(&readme)
                .with_context(|| format!("reading {}", readme.display()));
        }
    }
    Ok(String::new())
}

/// Segment right after the first `applications` segment, or "".
fn extract_application_name(descriptor: &Path) -> String {
    let segments: Vec<_> = descriptor.iter().collect();
    segments
        .iter()
        .position(|s| *s == APPLICATIONS_SEGMENT)
        .and_then(|idx| segments.get(idx + 1))
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Write the aggregate through `<output>.tmp` and a rename over `output`.
fn write_aggregate(output: &Path, records: &[Value], pretty: bool) -> Result<()> {
    let body = if pretty {
        serde_json::to_vec_pretty(records)?
    } else {
        serde_json::to_vec(records)?
    };

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut tmp_name = output.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    if let Err(e) = fs::write(&tmp_path, body) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("writing {}", tmp_path.display()));
    }
    if let Err(e) = fs::rename(&tmp_path, output) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("replacing {}", output.display()));
    }
    Ok(())
}
