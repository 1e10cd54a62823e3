use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use clap::{Parser, Subcommand};
use serde_json::Value;

use benchtop::{paths, persist, progress};

/// Benchtop: inspector for lab automation data.
///
/// Shows where the current project keeps its data, summarizes saved
/// data files, and prints the sweep monitor URL. The project is the
/// git repository enclosing the working directory unless
/// BENCHTOP_PROJECT_DIR says otherwise.
#[derive(Parser, Debug)]
#[command(author = "Benchtop Team", version, about, long_about = None)]
#[command(help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
")]
struct BenchtopArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the directories the current project resolves to
    Paths,
    /// Summarize a saved data file (.json, .mat, .gz, or raw binary)
    Info {
        /// File to inspect
        #[clap(value_parser)]
        file: PathBuf,
    },
    /// Print the URL where the sweep monitor page is served
    MonitorUrl,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = BenchtopArgs::parse();

    match args.command {
        Command::Paths => show_paths(),
        Command::Info { file } => show_info(&file),
        Command::MonitorUrl => {
            println!("{}", progress::monitor_url());
            Ok(())
        }
    }
}

fn show_paths() -> Result<()> {
    println!("Project dir:     {}", paths::project_dir().display());
    println!("Data home:       {}", paths::data_home().display());
    println!("File dir:        {}", paths::file_dir().display());
    println!("Monitor dir:     {}", paths::monitor_dir().display());
    println!("Development dir: {}", paths::development_dir().display());
    Ok(())
}

fn show_info(file: &Path) -> Result<()> {
    // Resolve against the working directory, not the project file dir.
    let path = file
        .canonicalize()
        .with_context(|| format!("No such file: {}", file.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "json" => describe_json(&path),
        "mat" => describe_mat(&path),
        "gz" => describe_gz(&path),
        _ => describe_binary(&path),
    }
}

fn describe_json(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    match &value {
        Value::Object(map) if map.contains_key("type") && map.contains_key("state") => {
            println!("Snapshot file {}", path.display());
            if let Some(type_path) = map.get("type").and_then(Value::as_str) {
                println!("  type:  {}", type_path);
            }
            if let Some(saved) = map.get("saved").and_then(Value::as_str) {
                println!("  saved: {}", saved);
            }
            if let Some(state) = map.get("state").and_then(Value::as_object) {
                let fields: Vec<&str> = state.keys().map(String::as_str).collect();
                println!("  state fields: {}", fields.join(", "));
            }
        }
        Value::Object(map) => {
            println!("JSON file {}", path.display());
            let fields: Vec<&str> = map.keys().map(String::as_str).collect();
            println!("  fields: {}", fields.join(", "));
        }
        other => {
            println!("JSON file {}", path.display());
            println!("  top-level {}", json_kind(other));
        }
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn describe_mat(path: &Path) -> Result<()> {
    let vars = persist::load_mat(path)?;
    println!("MAT file {} ({} variables)", path.display(), vars.len());
    for (name, var) in vars.iter() {
        let (rows, cols) = var.dims();
        println!("  {:<24} {:>5} x {:<5} {}", name, rows, cols, var.kind());
    }
    Ok(())
}

fn describe_gz(path: &Path) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let compressed = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    println!("Gzip data file {}", path.display());
    println!("  compressed:   {} bytes", compressed);
    if compressed >= 4 {
        // The gzip trailer records the uncompressed size modulo 2^32.
        file.seek(SeekFrom::End(-4))?;
        let uncompressed = file.read_u32::<LittleEndian>()?;
        println!("  uncompressed: {} bytes", uncompressed);
    }
    Ok(())
}

fn describe_binary(path: &Path) -> Result<()> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    println!("Binary data file {}", path.display());
    println!("  {} bytes", size);
    Ok(())
}
