//! Page-level driver over a lopdf [`Document`].
//!
//! Rewritten content is computed from a read-only view of the document and
//! installed afterwards, so pages can be processed in parallel and a failed
//! page leaves the document untouched.

use std::collections::BTreeMap;

use lopdf::{Document, Object, ObjectId, Stream};
use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use crate::checkbox::{self, CheckBox};
use crate::error::{EditError, Result};
use crate::interpreter::{Diagnostic, InterpreterOptions};
use crate::logging::PDF_REWRITE;
use crate::resources::PageResources;
use crate::rewriter::{rewrite_operations, ContentRewriter, RewriteOutput};
use crate::sink::encode_operations;

pub struct PageEditor<'d> {
    doc: &'d mut Document,
    options: InterpreterOptions,
    compress: bool,
}

impl<'d> PageEditor<'d> {
    pub fn new(doc: &'d mut Document) -> Self {
        PageEditor {
            doc,
            options: InterpreterOptions::default(),
            compress: true,
        }
    }

    pub fn with_options(mut self, options: InterpreterOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether installed content streams are Flate-compressed (the default).
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn document(&self) -> &Document {
        self.doc
    }

    /// Replaces the content of page `page_number` (1-based) with what
    /// `rewriter` writes to the primary sink.
    pub fn edit_page<R: ContentRewriter + ?Sized>(
        &mut self,
        page_number: u32,
        rewriter: &mut R,
    ) -> Result<Vec<Diagnostic>> {
        self.split_page(page_number, rewriter, 0)
    }

    /// Like [`PageEditor::edit_page`] with `extra` additional sinks; the page's
    /// `/Contents` becomes `[primary, extra...]`.
    pub fn split_page<R: ContentRewriter + ?Sized>(
        &mut self,
        page_number: u32,
        rewriter: &mut R,
        extra: usize,
    ) -> Result<Vec<Diagnostic>> {
        let page_id = page_id(self.doc, page_number)?;
        let output = rewrite_page(self.doc, page_number, page_id, rewriter, extra, &self.options)?;
        self.install(page_number, page_id, output)
    }

    /// Rewrites every page with a rewriter from `factory`. Pages are
    /// interpreted in parallel; content is installed only if every page
    /// succeeded.
    pub fn edit_all<F, R>(&mut self, factory: F) -> Result<BTreeMap<u32, Vec<Diagnostic>>>
    where
        F: Fn(u32) -> R + Sync,
        R: ContentRewriter,
    {
        let pages = self.doc.get_pages();
        let _span = info_span!(target: PDF_REWRITE, "edit_all", pages = pages.len()).entered();

        let doc: &Document = self.doc;
        let options = &self.options;
        let outputs = pages
            .par_iter()
            .map(|(&page_number, &page_id)| {
                let mut rewriter = factory(page_number);
                rewrite_page(doc, page_number, page_id, &mut rewriter, 0, options)
                    .map(|output| (page_number, page_id, output))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut diagnostics = BTreeMap::new();
        for (page_number, page_id, output) in outputs {
            diagnostics.insert(page_number, self.install(page_number, page_id, output)?);
        }
        info!(target: PDF_REWRITE, pages = diagnostics.len(), "rewrote document");
        Ok(diagnostics)
    }

    fn install(
        &mut self,
        page_number: u32,
        page_id: ObjectId,
        output: RewriteOutput,
    ) -> Result<Vec<Diagnostic>> {
        let RewriteOutput {
            primary,
            extra,
            diagnostics,
        } = output;

        let mut stream_ids = Vec::with_capacity(1 + extra.len());
        for operations in std::iter::once(primary).chain(extra) {
            let bytes = encode_operations(&operations)
                .map_err(|source| EditError::Output {
                    page: page_number,
                    source,
                })?;
            let mut stream = Stream::new(lopdf::Dictionary::new(), bytes);
            if self.compress {
                if let Err(e) = stream.compress() {
                    warn!(target: PDF_REWRITE, page = page_number, "content left uncompressed: {}", e);
                }
            }
            stream_ids.push(self.doc.add_object(stream));
        }

        let contents = match stream_ids.as_slice() {
            [single] => Object::Reference(*single),
            ids => Object::Array(ids.iter().copied().map(Object::Reference).collect()),
        };
        self.doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)?
            .set("Contents", contents);

        debug!(target: PDF_REWRITE, page = page_number, streams = stream_ids.len(), diagnostics = diagnostics.len(), "installed page content");
        Ok(diagnostics)
    }
}

fn page_id(doc: &Document, page_number: u32) -> Result<ObjectId> {
    doc.get_pages()
        .get(&page_number)
        .copied()
        .ok_or(EditError::PageNotFound(page_number))
}

fn rewrite_page<R: ContentRewriter + ?Sized>(
    doc: &Document,
    page_number: u32,
    page_id: ObjectId,
    rewriter: &mut R,
    extra: usize,
    options: &InterpreterOptions,
) -> Result<RewriteOutput> {
    let _span = info_span!(target: PDF_REWRITE, "page", page = page_number).entered();
    let operations = doc.get_and_decode_page_content(page_id)?.operations;
    let resources = PageResources::for_page(doc, page_id)?;
    rewrite_operations(&operations, rewriter, extra, &resources, options)
        .map_err(|e| EditError::page(page_number, e))
}

/// Detects checkboxes on every page, in parallel.
pub fn find_checkboxes(
    doc: &Document,
    options: &InterpreterOptions,
) -> Result<BTreeMap<u32, Vec<CheckBox>>> {
    doc.get_pages()
        .into_par_iter()
        .map(|(page_number, page_id)| {
            let _span = info_span!(target: PDF_REWRITE, "checkboxes", page = page_number).entered();
            let operations = doc.get_and_decode_page_content(page_id)?.operations;
            let resources = PageResources::for_page(doc, page_id)?;
            let boxes = checkbox::find_in_operations(&operations, &resources, options)
                .map_err(|e| EditError::page(page_number, e))?;
            Ok::<_, EditError>((page_number, boxes))
        })
        .collect()
}
