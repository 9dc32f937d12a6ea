use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tabula_core::agent_loop::{agent_loop, AgentConfig};
use tabula_core::notebook::{CellKind, Notebook};
use tabula_core::store::load_notebook;
use tabula_core::summary::summarize_csv;
use tabula_core::util::{default_data_dir, default_dest_dir};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Tabula — LLM agent that writes analysis notebooks from CSV data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the data directory (default: ./data, or TABULA_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the notebook destination directory (default: TABULA_DEST_DIR
    /// or the platform data dir)
    #[arg(long)]
    dest_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Environment doctor checks
    Doctor,
    /// Run the reasoning loop once for a user request
    Agent {
        #[arg(long)]
        user_prompt: String,
        /// Hard bound on reasoning cycles
        #[arg(long, default_value_t = 12)]
        max_turns: usize,
    },
    /// Summarize a CSV file and print the statistics as JSON
    Summary {
        #[arg(long)]
        path: PathBuf,
    },
    /// Edit cells of a saved notebook in place
    Cells {
        #[command(subcommand)]
        op: CellsOp,
    },
    /// Convert a notebook to a Python script, or a file to a notebook
    Convert {
        #[arg(long)]
        path: PathBuf,
        /// Target: "script" or "notebook"
        #[arg(long)]
        to: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CellsOp {
    /// Replace a cell's content, optionally retyping it
    Edit {
        #[arg(long)]
        notebook: PathBuf,
        #[arg(long)]
        index: usize,
        #[arg(long)]
        content: String,
        /// New cell type: code, markdown, or raw
        #[arg(long)]
        kind: Option<String>,
    },
    /// Insert a new cell at a position
    Insert {
        #[arg(long)]
        notebook: PathBuf,
        #[arg(long)]
        position: usize,
        #[arg(long)]
        content: String,
        #[arg(long, default_value = "code")]
        kind: String,
    },
    /// Append a new cell at the end
    Append {
        #[arg(long)]
        notebook: PathBuf,
        #[arg(long)]
        content: String,
        #[arg(long, default_value = "code")]
        kind: String,
    },
    /// Merge an inclusive range of cells into one
    Merge {
        #[arg(long)]
        notebook: PathBuf,
        #[arg(long)]
        start: usize,
        #[arg(long)]
        end: usize,
    },
    /// Swap two cells
    Swap {
        #[arg(long)]
        notebook: PathBuf,
        #[arg(long)]
        a: usize,
        #[arg(long)]
        b: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_tracing();
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let dest_dir = cli
        .dest_dir
        .clone()
        .or_else(default_dest_dir)
        .context("destination directory unavailable")?;

    match cli.command {
        Commands::Doctor => cmd_doctor(&data_dir, &dest_dir),
        Commands::Agent { user_prompt, max_turns } => {
            cmd_agent(&data_dir, &dest_dir, &user_prompt, max_turns).await
        }
        Commands::Summary { path } => cmd_summary(&path),
        Commands::Cells { op } => cmd_cells(op),
        Commands::Convert { path, to, output } => cmd_convert(&path, &to, output),
    }
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn cmd_doctor(data_dir: &Path, dest_dir: &Path) -> Result<()> {
    println!("Tabula doctor:");
    match std::env::var("OPENAI_API_KEY") {
        Ok(_) => println!(" - OPENAI_API_KEY: set"),
        Err(_) => println!(" - OPENAI_API_KEY: MISSING (required for `agent`)"),
    }
    println!(
        " - model: {}",
        std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-5 (default)".into())
    );
    let csvs = std::fs::read_dir(data_dir)
        .map(|rd| {
            rd.flatten()
                .filter(|e| e.path().extension().map(|x| x == "csv").unwrap_or(false))
                .count()
        })
        .unwrap_or(0);
    println!(" - data dir: {} ({} CSV file(s))", data_dir.display(), csvs);
    println!(" - dest dir: {}", dest_dir.display());
    Ok(())
}

async fn cmd_agent(
    data_dir: &Path,
    dest_dir: &Path,
    user_prompt: &str,
    max_turns: usize,
) -> Result<()> {
    let openai_api_key =
        std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY missing")?;

    let cfg = AgentConfig {
        openai_api_key,
        openai_model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-5".into()),
        openai_base: std::env::var("OPENAI_BASE").ok(),
        openai_project: std::env::var("OPENAI_PROJECT").ok(),
        data_dir: data_dir.to_path_buf(),
        dest_dir: dest_dir.to_path_buf(),
        max_turns,
        request_timeout_secs: 120,
    };
    let result = agent_loop(user_prompt, &cfg).await?;
    match result.notebook_path {
        Some(path) => println!("Done in {} turn(s): {}", result.turns_used, path.display()),
        None => println!("No notebook produced after {} turn(s).", result.turns_used),
    }
    Ok(())
}

fn cmd_summary(path: &Path) -> Result<()> {
    let summary = summarize_csv(path)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_cells(op: CellsOp) -> Result<()> {
    match op {
        CellsOp::Edit { notebook, index, content, kind } => {
            let kind = kind.as_deref().map(str::parse::<CellKind>).transpose()?;
            rewrite(&notebook, |nb| nb.edit_cell(index, &content, kind).map_err(Into::into))
        }
        CellsOp::Insert { notebook, position, content, kind } => {
            let kind: CellKind = kind.parse()?;
            rewrite(&notebook, |nb| nb.insert_cell(position, &content, kind).map_err(Into::into))
        }
        CellsOp::Append { notebook, content, kind } => {
            let kind: CellKind = kind.parse()?;
            rewrite(&notebook, |nb| {
                nb.append_cell(&content, kind);
                Ok(())
            })
        }
        CellsOp::Merge { notebook, start, end } => {
            rewrite(&notebook, |nb| nb.merge_cells(start, end).map_err(Into::into))
        }
        CellsOp::Swap { notebook, a, b } => {
            rewrite(&notebook, |nb| nb.swap_cells(a, b).map_err(Into::into))
        }
    }
}

fn rewrite(path: &Path, apply: impl FnOnce(&mut Notebook) -> Result<()>) -> Result<()> {
    let mut nb = load_notebook(path)?;
    apply(&mut nb)?;
    fs_err::write(path, nb.to_json()?)?;
    println!("Updated {} ({} cell(s))", path.display(), nb.cells.len());
    Ok(())
}

fn cmd_convert(path: &Path, to: &str, output: Option<PathBuf>) -> Result<()> {
    match to {
        "script" => {
            let nb = load_notebook(path)?;
            let code = nb.extract_code();
            anyhow::ensure!(!code.is_empty(), "notebook has no code cells");
            let out = output.unwrap_or_else(|| path.with_extension("py"));
            fs_err::write(&out, code.join("\n\n") + "\n")?;
            println!("Wrote {}", out.display());
        }
        "notebook" => {
            let is_markdown = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
                .unwrap_or(false);
            let nb = if is_markdown {
                Notebook::from_markdown(&fs_err::read_to_string(path)?)
            } else {
                Notebook::from_file(path, CellKind::Code)?
            };
            let out = output.unwrap_or_else(|| path.with_extension("ipynb"));
            fs_err::write(&out, nb.to_json()?)?;
            println!("Wrote {}", out.display());
        }
        other => anyhow::bail!("unsupported target: {other}; use \"script\" or \"notebook\""),
    }
    Ok(())
}
