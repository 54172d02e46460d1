//! PDF page content interpretation and rewriting.
//!
//! The [`interpreter`] walks a page's decoded operator stream once, keeping
//! graphics state in a [`state::StateTracker`] and calling a
//! [`interpreter::ContentHandler`] around every token. Two clients are built
//! on it: [`rewriter`], which routes tokens to one or more output sinks, and
//! [`checkbox`], which recognizes checkbox widgets from painted paths.

pub mod checkbox;
pub mod config;
pub mod editor;
pub mod error;
pub mod geo;
pub mod interpreter;
pub mod logging;
pub mod operator;
pub mod path;
pub mod resources;
pub mod rewriter;
pub mod sink;
pub mod state;

use std::path::Path;

use lopdf::Document;
use tracing::info;

pub use checkbox::{CheckBox, CheckBoxFinder};
pub use editor::{find_checkboxes, PageEditor};
pub use error::{EditError, InterpretError, MalformedOperator, SinkError};
pub use interpreter::{ContentHandler, Interpreter, InterpreterOptions, MalformedPolicy};
pub use rewriter::{
    rewrite_operations, ContentRewriter, IdentityRewriter, LargeTextRemover, RegionSplitter,
    SearchTextRemover, TextRemover,
};

pub fn load_pdf<P: AsRef<Path>>(path: P) -> lopdf::Result<Document> {
    let doc = Document::load(path.as_ref())?;
    info!(path = %path.as_ref().display(), pages = doc.get_pages().len(), "loaded document");
    Ok(doc)
}

pub fn load_pdf_mem(bytes: &[u8]) -> lopdf::Result<Document> {
    Document::load_mem(bytes)
}
