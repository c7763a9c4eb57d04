use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use sesscat_lib::{
    catalog::{is_url, selector_labels},
    epochs::{merge_annotations, read_annotations, read_epoch_encoder_annotations, EpochEncoder},
    manager::MetadataManager,
};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sesscat",
    version,
    about = "Browse and resolve electrophysiology session catalogs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CatalogArgs {
    /// Path to the YAML session catalog
    #[arg(long, default_value = "metadata.yml")]
    file: PathBuf,
    /// Base directory for relative data_dir values (default: the catalog's directory)
    #[arg(long)]
    local_root: Option<PathBuf>,
    /// Base URL for relative remote_data_dir values (overrides the catalog's remote_data_root)
    #[arg(long)]
    remote_root: Option<String>,
}

impl CatalogArgs {
    fn manager(&self) -> MetadataManager {
        let mut manager = MetadataManager::new(&self.file);
        if let Some(root) = &self.local_root {
            manager = manager.with_local_data_root(root);
        }
        if let Some(root) = &self.remote_root {
            manager = manager.with_remote_data_root(root.clone());
        }
        manager
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List data sets with file-presence and video-sync markers
    List {
        #[command(flatten)]
        catalog: CatalogArgs,
    },
    /// Load the catalog and report whether it resolves cleanly
    Validate {
        #[command(flatten)]
        catalog: CatalogArgs,
    },
    /// Print one resolved data set record
    Show {
        #[command(flatten)]
        catalog: CatalogArgs,
        key: String,
        /// Emit JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
    /// List a data set's file references with local paths, presence, and URLs
    Files {
        #[command(flatten)]
        catalog: CatalogArgs,
        key: String,
    },
    /// Print `url -> path` transfer pairs for referenced files missing locally
    Downloads {
        #[command(flatten)]
        catalog: CatalogArgs,
        key: String,
    },
    /// Rewrite an epoch encoder CSV sorted, microsecond-rounded, canonical header
    NormalizeEpochs {
        #[arg(long)]
        input: PathBuf,
    },
    /// Merge a data set's annotations and epoch encoder streams into one CSV timeline
    Timeline {
        #[command(flatten)]
        catalog: CatalogArgs,
        key: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::List { catalog } => cmd_list(&catalog)?,
        Commands::Validate { catalog } => cmd_validate(&catalog)?,
        Commands::Show { catalog, key, json } => cmd_show(&catalog, &key, json)?,
        Commands::Files { catalog, key } => cmd_files(&catalog, &key)?,
        Commands::Downloads { catalog, key } => cmd_downloads(&catalog, &key)?,
        Commands::NormalizeEpochs { input } => cmd_normalize_epochs(&input)?,
        Commands::Timeline { catalog, key } => cmd_timeline(&catalog, &key)?,
    }
    Ok(())
}

fn cmd_list(catalog: &CatalogArgs) -> Result<()> {
    let mut manager = catalog.manager();
    manager.load()?;
    let loaded = manager.catalog().expect("catalog was just loaded");
    for label in selector_labels(loaded) {
        println!("{}", label);
    }
    Ok(())
}

fn cmd_validate(catalog: &CatalogArgs) -> Result<()> {
    let mut manager = catalog.manager();
    manager.load()?;
    let loaded = manager.catalog().expect("catalog was just loaded");
    println!(
        "{}: {} data set(s) resolved",
        manager.file().display(),
        loaded.len()
    );
    Ok(())
}

fn select(catalog: &CatalogArgs, key: &str) -> Result<MetadataManager> {
    let mut manager = catalog.manager();
    manager.load()?;
    manager.select(key)?;
    Ok(manager)
}

fn cmd_show(catalog: &CatalogArgs, key: &str, json: bool) -> Result<()> {
    let manager = select(catalog, key)?;
    let record = manager.selected()?;
    if json {
        println!("{}", serde_json::to_string_pretty(record.fields())?);
    } else {
        print!("{}", serde_yaml::to_string(record.fields())?);
    }
    Ok(())
}

fn cmd_files(catalog: &CatalogArgs, key: &str) -> Result<()> {
    let manager = select(catalog, key)?;
    let record = manager.selected()?;
    for (field, value) in record.file_fields() {
        if value.is_null() {
            continue;
        }
        let Some(path) = record.abs_path(field) else {
            continue;
        };
        let status = if path.exists() { "present" } else { "missing" };
        let url = record.abs_url(field).unwrap_or_else(|| "-".into());
        println!("{}\t{}\t{}\t{}", field, path.display(), status, url);
    }
    Ok(())
}

fn cmd_downloads(catalog: &CatalogArgs, key: &str) -> Result<()> {
    let manager = select(catalog, key)?;
    let record = manager.selected()?;
    let remote = record.remote_data_dir().unwrap_or("");
    if !is_url(remote) {
        log::warn!("\"remote_data_dir\" is not a full URL; nothing to download for {key}");
        return Ok(());
    }
    for (field, value) in record.file_fields() {
        if value.is_null() {
            continue;
        }
        let (Some(url), Some(path)) = (record.abs_url(field), record.abs_path(field)) else {
            continue;
        };
        if !path.exists() {
            println!("{} -> {}", url, path.display());
        }
    }
    Ok(())
}

fn cmd_normalize_epochs(input: &PathBuf) -> Result<()> {
    let mut encoder = EpochEncoder::open(input, Vec::new())?;
    encoder.save()?;
    println!("{}: {} epoch(s)", input.display(), encoder.epochs().len());
    Ok(())
}

fn cmd_timeline(catalog: &CatalogArgs, key: &str) -> Result<()> {
    let manager = select(catalog, key)?;
    let record = manager.selected()?;
    let mut streams = Vec::new();
    if let Some(path) = record.abs_path("annotations_file") {
        streams.push(read_annotations(&path)?);
    }
    if let Some(path) = record.abs_path("epoch_encoder_file") {
        streams.push(read_epoch_encoder_annotations(&path)?);
    }
    let merged = merge_annotations(&streams);
    let mut writer = csv::Writer::from_writer(io::stdout());
    for annotation in &merged {
        writer.serialize(annotation)?;
    }
    writer.flush()?;
    Ok(())
}
