use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lopdf::Document;
use tracing::info;

use pagewright::config::{load_config, EditorConfig};
use pagewright::geo::Rect;
use pagewright::{
    find_checkboxes, load_pdf, IdentityRewriter, LargeTextRemover, PageEditor, RegionSplitter,
    SearchTextRemover, TextRemover,
};

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    long_about = "Rewrite PDF page content streams and detect vector-drawn checkboxes.",
    arg_required_else_help = true
)]
pub struct Args {
    /// Path to the PDF file to process
    pub pdf_path: PathBuf,

    #[clap(subcommand)]
    pub command: Command,

    /// Output file path. Rewriting commands require it; `checkboxes` writes to stdout without it.
    #[clap(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// JSON configuration file
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable detailed logging of PDF content stream operations
    #[clap(long, global = true)]
    pub debug_ops: bool,

    /// Directory for debug operation logs
    #[clap(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Re-serialize every page unchanged
    Identity,
    /// Remove all text
    StripText,
    /// Remove text larger than a font size in user space
    StripLargeText {
        #[clap(long)]
        max_size: Option<f32>,
    },
    /// Remove text showing exactly the given string
    StripSearch {
        #[clap(long)]
        text: String,
    },
    /// Move text inside regions into separate clipped content streams of one page
    Split {
        /// Page number (1-based)
        #[clap(long, default_value_t = 1)]
        page: u32,
        /// Region as x,y,width,height; repeatable
        #[clap(long = "region", value_parser = parse_region)]
        regions: Vec<Rect>,
    },
    /// Print detected checkboxes per page as JSON
    Checkboxes {
        #[clap(short, long)]
        pretty: bool,
    },
}

fn parse_region(s: &str) -> Result<Rect, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [x, y, w, h] => Ok(Rect::from_origin_size(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,width,height, got {s:?}")),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = match &args.log_dir {
        Some(log_dir) => pagewright::logging::init_logging_with_dir(args.debug_ops, log_dir.clone())
            .with_context(|| format!("failed to set up logging in {}", log_dir.display()))?,
        None => pagewright::logging::init_logging(args.debug_ops),
    };

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EditorConfig::default(),
    };

    let mut doc = load_pdf(&args.pdf_path)
        .with_context(|| format!("failed to load {}", args.pdf_path.display()))?;

    let diagnostics = match &args.command {
        Command::Checkboxes { pretty } => {
            let boxes = find_checkboxes(&doc, &config.interpreter)?;
            let json = if *pretty {
                serde_json::to_string_pretty(&boxes)?
            } else {
                serde_json::to_string(&boxes)?
            };
            match &args.output {
                Some(path) => fs::write(path, json)?,
                None => println!("{json}"),
            }
            return Ok(());
        }
        Command::Identity => editor(&mut doc, &config).edit_all(|_| IdentityRewriter)?,
        Command::StripText => editor(&mut doc, &config).edit_all(|_| TextRemover::new())?,
        Command::StripLargeText { max_size } => {
            let max_size = max_size.unwrap_or(config.max_font_size);
            editor(&mut doc, &config).edit_all(|_| LargeTextRemover::new(max_size))?
        }
        Command::StripSearch { text } => {
            editor(&mut doc, &config).edit_all(|_| SearchTextRemover::new(text.clone()))?
        }
        Command::Split { page, regions } => {
            let regions = if regions.is_empty() {
                config.regions.clone()
            } else {
                regions.clone()
            };
            if regions.is_empty() {
                bail!("split needs at least one --region");
            }
            let extra = regions.len();
            let mut splitter = RegionSplitter::new(regions);
            let diagnostics = editor(&mut doc, &config).split_page(*page, &mut splitter, extra)?;
            [(*page, diagnostics)].into_iter().collect()
        }
    };

    let skipped: usize = diagnostics.values().map(Vec::len).sum();
    info!(pages = diagnostics.len(), diagnostics = skipped, "rewrite finished");

    let Some(output) = &args.output else {
        bail!("--output is required to save the rewritten document");
    };
    doc.save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

fn editor<'d>(doc: &'d mut Document, config: &EditorConfig) -> PageEditor<'d> {
    PageEditor::new(doc)
        .with_options(config.interpreter.clone())
        .with_compression(config.compress)
}
