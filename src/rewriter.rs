//! Content rewriting on top of the interpreter.
//!
//! A [`ContentRewriter`] decides, per top-level token, which sinks receive it:
//! the primary only (identity), none (drop), several (fan-out), or a
//! different token altogether.

use lopdf::content::Operation;
use lopdf::Object;
use tracing::{debug, debug_span};

use crate::error::{InterpretError, SinkError};
use crate::geo::{Point, Rect};
use crate::interpreter::{ContentHandler, Diagnostic, Glyph, Interpreter, InterpreterOptions};
use crate::logging::PDF_REWRITE;
use crate::operator::is_text_showing;
use crate::resources::ResourceLookup;
use crate::sink::{OperationBuffer, SinkSet};
use crate::state::StateTracker;

pub trait ContentRewriter {
    /// Sees each top-level token before its effect is applied.
    fn observe(&mut self, _op: &Operation, _state: &StateTracker) {}

    /// Sees each glyph shown by the token being processed.
    fn show_glyph(&mut self, _glyph: &Glyph, _state: &StateTracker) {}

    /// Routes a token after its effect is applied. Forwards it to the primary
    /// sink unless overridden.
    fn write(
        &mut self,
        sinks: &mut SinkSet<'_>,
        op: &Operation,
        _state: &StateTracker,
    ) -> Result<(), SinkError> {
        sinks.write_primary(op)
    }

    /// Runs before the first token.
    fn prologue(&mut self, _sinks: &mut SinkSet<'_>) -> Result<(), SinkError> {
        Ok(())
    }

    /// Runs after the last token, before the sinks are finished.
    fn epilogue(&mut self, _sinks: &mut SinkSet<'_>) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Adapts a rewriter and its sinks to the interpreter's hooks.
struct RewriteHandler<'a, 's, R: ?Sized> {
    rewriter: &'a mut R,
    sinks: &'a mut SinkSet<'s>,
}

impl<R: ContentRewriter + ?Sized> ContentHandler for RewriteHandler<'_, '_, R> {
    fn observe(&mut self, op: &Operation, state: &StateTracker) {
        self.rewriter.observe(op, state);
    }

    fn emit(&mut self, op: &Operation, state: &StateTracker) -> Result<(), SinkError> {
        self.rewriter.write(self.sinks, op, state)
    }

    fn show_glyph(&mut self, glyph: &Glyph, state: &StateTracker) {
        self.rewriter.show_glyph(glyph, state);
    }
}

/// Result of rewriting one content stream into in-memory sinks.
#[derive(Debug, Clone, Default)]
pub struct RewriteOutput {
    pub primary: Vec<Operation>,
    /// Extra sinks, in index order (sink 1 first).
    pub extra: Vec<Vec<Operation>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs `rewriter` over `operations` into a primary and `extra_sinks`
/// additional in-memory buffers.
pub fn rewrite_operations<R: ContentRewriter + ?Sized>(
    operations: &[Operation],
    rewriter: &mut R,
    extra_sinks: usize,
    resources: &dyn ResourceLookup,
    options: &InterpreterOptions,
) -> Result<RewriteOutput, InterpretError> {
    let mut buffers: Vec<OperationBuffer> = (0..=extra_sinks).map(|_| OperationBuffer::new()).collect();

    let diagnostics = {
        let mut sinks = SinkSet::from_sinks(buffers.iter_mut());
        rewrite_into(operations, rewriter, &mut sinks, resources, options)?
    };

    let mut buffers = buffers.into_iter().map(OperationBuffer::into_operations);
    let primary = buffers.next().unwrap_or_default();
    Ok(RewriteOutput {
        primary,
        extra: buffers.collect(),
        diagnostics,
    })
}

/// Runs `rewriter` over `operations` into caller-supplied sinks and finishes
/// them. On error the sinks are finished when `sinks` is dropped.
pub fn rewrite_into<R: ContentRewriter + ?Sized>(
    operations: &[Operation],
    rewriter: &mut R,
    sinks: &mut SinkSet<'_>,
    resources: &dyn ResourceLookup,
    options: &InterpreterOptions,
) -> Result<Vec<Diagnostic>, InterpretError> {
    let _span = debug_span!(target: PDF_REWRITE, "rewrite", sinks = sinks.len()).entered();

    rewriter.prologue(sinks)?;

    let mut handler = RewriteHandler { rewriter, sinks };
    let mut interpreter = Interpreter::new(&mut handler, resources).with_options(options.clone());
    interpreter.process(operations)?;
    let diagnostics = interpreter.into_diagnostics();

    handler.rewriter.epilogue(handler.sinks)?;
    handler.sinks.finish_all()?;
    Ok(diagnostics)
}

/// Writes every token unchanged to the primary sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRewriter;

impl ContentRewriter for IdentityRewriter {}

/// Drops every text-showing operator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRemover {
    removed: usize,
}

impl TextRemover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> usize {
        self.removed
    }
}

impl ContentRewriter for TextRemover {
    fn write(
        &mut self,
        sinks: &mut SinkSet<'_>,
        op: &Operation,
        _state: &StateTracker,
    ) -> Result<(), SinkError> {
        if is_text_showing(op) {
            self.removed += 1;
            return Ok(());
        }
        sinks.write_primary(op)
    }
}

/// Drops text-showing operators whose font size in user space exceeds
/// `max_font_size`.
#[derive(Debug, Clone, Copy)]
pub struct LargeTextRemover {
    pub max_font_size: f32,
    removed: usize,
}

impl LargeTextRemover {
    pub fn new(max_font_size: f32) -> Self {
        LargeTextRemover {
            max_font_size,
            removed: 0,
        }
    }

    pub fn removed(&self) -> usize {
        self.removed
    }
}

impl ContentRewriter for LargeTextRemover {
    fn write(
        &mut self,
        sinks: &mut SinkSet<'_>,
        op: &Operation,
        state: &StateTracker,
    ) -> Result<(), SinkError> {
        if is_text_showing(op) {
            let size = state.effective_font_size().unwrap_or(0.0);
            if size > self.max_font_size {
                debug!(target: PDF_REWRITE, op = %op.operator, size, "dropping large text");
                self.removed += 1;
                return Ok(());
            }
        }
        sinks.write_primary(op)
    }
}

/// Drops a text-showing operator whose shown text equals `needle`, ignoring
/// surrounding whitespace.
#[derive(Debug, Clone)]
pub struct SearchTextRemover {
    pub needle: String,
    shown: String,
    removed: usize,
}

impl SearchTextRemover {
    pub fn new(needle: impl Into<String>) -> Self {
        SearchTextRemover {
            needle: needle.into(),
            shown: String::new(),
            removed: 0,
        }
    }

    pub fn removed(&self) -> usize {
        self.removed
    }
}

impl ContentRewriter for SearchTextRemover {
    fn observe(&mut self, _op: &Operation, _state: &StateTracker) {
        self.shown.clear();
    }

    fn show_glyph(&mut self, glyph: &Glyph, _state: &StateTracker) {
        if let Some(text) = &glyph.text {
            self.shown.push_str(text);
        }
    }

    fn write(
        &mut self,
        sinks: &mut SinkSet<'_>,
        op: &Operation,
        _state: &StateTracker,
    ) -> Result<(), SinkError> {
        if is_text_showing(op) && self.shown.trim() == self.needle {
            debug!(target: PDF_REWRITE, op = %op.operator, text = %self.needle, "dropping matched text");
            self.removed += 1;
            return Ok(());
        }
        sinks.write_primary(op)
    }
}

/// Splits page content by region.
///
/// Text whose first glyph origin lies inside `regions[i]` goes to sink `i + 1`,
/// for every such region; text outside all regions goes to the primary sink. Every other token goes to all
/// sinks so each stream keeps a complete graphics state. Region sinks are
/// clipped to their rectangle.
#[derive(Debug, Clone)]
pub struct RegionSplitter {
    pub regions: Vec<Rect>,
    origin: Option<Point>,
}

impl RegionSplitter {
    pub fn new(regions: Vec<Rect>) -> Self {
        RegionSplitter {
            regions,
            origin: None,
        }
    }

    fn regions_containing(&self, p: Point) -> impl Iterator<Item = usize> + '_ {
        self.regions
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.contains(p))
            .map(|(i, _)| i)
    }
}

impl ContentRewriter for RegionSplitter {
    fn observe(&mut self, _op: &Operation, _state: &StateTracker) {
        self.origin = None;
    }

    fn show_glyph(&mut self, glyph: &Glyph, _state: &StateTracker) {
        self.origin.get_or_insert(glyph.origin());
    }

    fn write(
        &mut self,
        sinks: &mut SinkSet<'_>,
        op: &Operation,
        state: &StateTracker,
    ) -> Result<(), SinkError> {
        if !is_text_showing(op) {
            return sinks.write_all(op);
        }
        let mut routed = false;
        if let Some(origin) = self.origin.or_else(|| state.text_origin()) {
            for region in self.regions_containing(origin) {
                sinks.write(region + 1, op)?;
                routed = true;
            }
        }
        if !routed {
            sinks.write_primary(op)?;
        }
        Ok(())
    }

    fn prologue(&mut self, sinks: &mut SinkSet<'_>) -> Result<(), SinkError> {
        for (i, region) in self.regions.iter().enumerate() {
            let clip = [
                Operation::new("q", vec![]),
                Operation::new(
                    "re",
                    vec![
                        Object::Real(region.x0),
                        Object::Real(region.y0),
                        Object::Real(region.width()),
                        Object::Real(region.height()),
                    ],
                ),
                Operation::new("W", vec![]),
                Operation::new("n", vec![]),
            ];
            for op in &clip {
                sinks.write(i + 1, op)?;
            }
        }
        Ok(())
    }

    fn epilogue(&mut self, sinks: &mut SinkSet<'_>) -> Result<(), SinkError> {
        sinks.write_extra(&Operation::new("Q", vec![]))
    }
}
