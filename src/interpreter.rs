//! Single-pass content stream interpreter.
//!
//! The interpreter walks a page's (or form's) operator tokens in order. For
//! every top-level token it calls [`ContentHandler::observe`], applies the
//! operator's effect to the [`StateTracker`], then calls
//! [`ContentHandler::emit`]. Composite operators (`'`, `"`, `TD`) are executed
//! by re-invoking the operators they are defined by; those nested invocations,
//! like everything inside a descended form XObject, never reach
//! `observe`/`emit`. The guard is the invocation depth, not a list of
//! operator names.

use lopdf::content::Operation;
use lopdf::Object;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, trace, warn};

use crate::error::{InterpretError, MalformedOperator, SinkError};
use crate::geo::{multiply_matrices, transform_point, Matrix, Point};
use crate::logging::{PDF_OPERATIONS, PDF_STATE};
use crate::operator::{operand_as_float, Operands, Operator, PaintOp};
use crate::path::Path;
use crate::resources::{FontInfo, FormXObject, ResourceLookup};
use crate::state::{Color, ColorSpace, StackUnderflow, StateTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Skip the operator's state effect, still emit the token, continue.
    #[default]
    Skip,
    /// Stop processing the stream with [`InterpretError::Malformed`].
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterOptions {
    pub malformed_policy: MalformedPolicy,
    /// Interpret the content of form XObjects painted with `Do`.
    pub descend_forms: bool,
    pub max_form_depth: usize,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        InterpreterOptions {
            malformed_policy: MalformedPolicy::Skip,
            descend_forms: false,
            max_form_depth: 12,
        }
    }
}

/// One glyph painted by a text-showing operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub code: u32,
    /// Unicode text of the glyph, when the font's encoding is known.
    pub text: Option<String>,
    /// Maps glyph space (scaled by font size and horizontal scaling) to user space.
    pub rendering_matrix: Matrix,
    /// Glyph width in glyph space units.
    pub width: f32,
    /// Horizontal displacement applied to the text matrix after the glyph.
    pub advance: f32,
}

impl Glyph {
    pub fn origin(&self) -> Point {
        transform_point(&self.rendering_matrix, 0.0, 0.0)
    }
}

/// Recoverable conditions met while interpreting.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Malformed(MalformedOperator),
    StackUnderflow { index: usize },
}

/// Caller hooks. Every method has a no-op default.
pub trait ContentHandler {
    /// Called before a top-level token's effect is applied.
    fn observe(&mut self, _op: &Operation, _state: &StateTracker) {}

    /// Called after a top-level token's effect is applied.
    fn emit(&mut self, _op: &Operation, _state: &StateTracker) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called for each glyph shown, at any nesting depth.
    fn show_glyph(&mut self, _glyph: &Glyph, _state: &StateTracker) {}

    /// Called with the complete current path right before a painting operator
    /// consumes it, at any nesting depth.
    fn paint_path(&mut self, _path: &Path, _paint: PaintOp, _state: &StateTracker) {}

    /// Per-error override of [`InterpreterOptions::malformed_policy`].
    fn malformed(&mut self, _err: &MalformedOperator) -> Option<MalformedPolicy> {
        None
    }
}

enum ExecError {
    Malformed(MalformedOperator),
    Fatal(InterpretError),
}

impl From<MalformedOperator> for ExecError {
    fn from(m: MalformedOperator) -> Self {
        ExecError::Malformed(m)
    }
}

impl From<InterpretError> for ExecError {
    fn from(e: InterpretError) -> Self {
        ExecError::Fatal(e)
    }
}

pub struct Interpreter<'h, 'r, H: ContentHandler + ?Sized> {
    handler: &'h mut H,
    resources: &'r dyn ResourceLookup,
    options: InterpreterOptions,
    state: StateTracker,
    /// Operators currently executing; hooks fire only when this is zero.
    depth: usize,
    form_depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'h, 'r, H: ContentHandler + ?Sized> Interpreter<'h, 'r, H> {
    pub fn new(handler: &'h mut H, resources: &'r dyn ResourceLookup) -> Self {
        Interpreter {
            handler,
            resources,
            options: InterpreterOptions::default(),
            state: StateTracker::default(),
            depth: 0,
            form_depth: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: InterpreterOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts from `ctm` instead of the identity.
    pub fn with_initial_ctm(mut self, ctm: Matrix) -> Self {
        self.state = StateTracker::new(ctm);
        self
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Interprets one content stream. State carries over between calls, so
    /// use a fresh interpreter per stream.
    pub fn process(&mut self, operations: &[Operation]) -> Result<(), InterpretError> {
        let _span = debug_span!(target: PDF_OPERATIONS, "process", tokens = operations.len()).entered();
        let resources = self.resources;

        for (index, op) in operations.iter().enumerate() {
            match self.invoke(op, index, resources) {
                Ok(()) => {}
                Err(ExecError::Fatal(e)) => return Err(e),
                Err(ExecError::Malformed(m)) => return Err(InterpretError::Malformed(m)),
            }
        }

        if self.state.depth() > 0 {
            debug!(target: PDF_STATE, unbalanced = self.state.depth(), "stream ended with saved states");
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        op: &Operation,
        index: usize,
        resources: &dyn ResourceLookup,
    ) -> Result<(), ExecError> {
        let top_level = self.depth == 0;
        if top_level {
            trace!(target: PDF_OPERATIONS, index, op = %op.operator, operands = ?op.operands);
            self.handler.observe(op, &self.state);
        }

        self.depth += 1;
        let outcome = self.execute(op, index, resources);
        self.depth -= 1;

        if !top_level {
            return outcome;
        }
        match outcome {
            Ok(()) => {}
            Err(ExecError::Malformed(m)) => self.recover(m)?,
            Err(fatal) => return Err(fatal),
        }

        self.handler
            .emit(op, &self.state)
            .map_err(|source| {
                ExecError::Fatal(InterpretError::Sink {
                    operator: op.operator.clone(),
                    source,
                })
            })
    }

    /// Applies the malformed-operator policy: skip records a diagnostic.
    fn recover(&mut self, m: MalformedOperator) -> Result<(), ExecError> {
        let policy = self
            .handler
            .malformed(&m)
            .unwrap_or(self.options.malformed_policy);
        match policy {
            MalformedPolicy::Skip => {
                warn!(target: PDF_OPERATIONS, "{}; skipped", m);
                self.diagnostics.push(Diagnostic::Malformed(m));
                Ok(())
            }
            MalformedPolicy::Abort => Err(ExecError::Malformed(m)),
        }
    }

    fn execute(
        &mut self,
        op: &Operation,
        index: usize,
        resources: &dyn ResourceLookup,
    ) -> Result<(), ExecError> {
        let args = Operands::new(op, index);
        let operator = Operator::from_name(&op.operator);

        match operator {
            Operator::Save => self.state.save(),
            Operator::Restore => {
                if let Err(StackUnderflow) = self.state.restore() {
                    self.diagnostics.push(Diagnostic::StackUnderflow { index });
                }
            }
            Operator::ConcatMatrix => {
                let m = args.matrix()?;
                self.state.concat(&m);
            }
            Operator::SetLineWidth => {
                let [w] = args.numbers::<1>()?;
                self.state.current_mut().line_width = w;
            }

            // Text objects and text state
            Operator::BeginText => self.state.begin_text(),
            Operator::EndText => self.state.end_text(),
            Operator::SetFont => {
                args.expect_len(2)?;
                let name = args.name(0)?.to_vec();
                let size = args.number(1)?;
                if resources.font(&name).is_none() {
                    debug!(target: PDF_STATE, font = %String::from_utf8_lossy(&name), "font resource not found");
                }
                let text = &mut self.state.current_mut().text;
                text.font = Some(name);
                text.font_size = size;
            }
            Operator::SetCharSpacing => {
                let [tc] = args.numbers::<1>()?;
                self.state.current_mut().text.char_spacing = tc;
            }
            Operator::SetWordSpacing => {
                let [tw] = args.numbers::<1>()?;
                self.state.current_mut().text.word_spacing = tw;
            }
            Operator::SetHorizontalScaling => {
                let [tz] = args.numbers::<1>()?;
                self.state.current_mut().text.horizontal_scaling = tz / 100.0;
            }
            Operator::SetLeading => {
                let [tl] = args.numbers::<1>()?;
                self.state.current_mut().text.leading = tl;
            }
            Operator::SetRenderMode => {
                let [tr] = args.numbers::<1>()?;
                if !(0.0..=7.0).contains(&tr) {
                    return Err(args.malformed(format!("render mode {tr} out of range")).into());
                }
                self.state.current_mut().text.render_mode = tr as u8;
            }
            Operator::SetRise => {
                let [ts] = args.numbers::<1>()?;
                self.state.current_mut().text.rise = ts;
            }

            // Text positioning
            Operator::MoveText => {
                let [tx, ty] = args.numbers::<2>()?;
                self.state.move_text(tx, ty);
            }
            Operator::MoveTextSetLeading => {
                let [tx, ty] = args.numbers::<2>()?;
                self.invoke(&Operation::new("TL", vec![Object::Real(-ty)]), index, resources)?;
                self.invoke(
                    &Operation::new("Td", vec![Object::Real(tx), Object::Real(ty)]),
                    index,
                    resources,
                )?;
            }
            Operator::SetTextMatrix => {
                let m = args.matrix()?;
                self.state.set_text_matrix(m);
            }
            Operator::NextLine => self.state.next_line(),

            // Text showing
            Operator::ShowText => {
                args.expect_len(1)?;
                let bytes = args.string(0)?;
                self.show_string(bytes, resources);
            }
            Operator::ShowTextAdjusted => {
                args.expect_len(1)?;
                let items = args.array(0)?;
                self.show_adjusted(&args, items, resources)?;
            }
            Operator::NextLineShowText => {
                args.expect_len(1)?;
                args.string(0)?;
                self.invoke(&Operation::new("T*", vec![]), index, resources)?;
                self.invoke(&Operation::new("Tj", op.operands.clone()), index, resources)?;
            }
            Operator::NextLineSpacedShowText => {
                args.expect_len(3)?;
                let aw = args.number(0)?;
                let ac = args.number(1)?;
                args.string(2)?;
                self.invoke(&Operation::new("Tw", vec![Object::Real(aw)]), index, resources)?;
                self.invoke(&Operation::new("Tc", vec![Object::Real(ac)]), index, resources)?;
                self.invoke(&Operation::new("'", vec![op.operands[2].clone()]), index, resources)?;
            }

            // Color
            Operator::SetStrokingGray | Operator::SetNonStrokingGray => {
                let [g] = args.numbers::<1>()?;
                self.set_color(operator, ColorSpace::DeviceGray, vec![g], None);
            }
            Operator::SetStrokingRgb | Operator::SetNonStrokingRgb => {
                let rgb = args.numbers::<3>()?;
                self.set_color(operator, ColorSpace::DeviceRgb, rgb.to_vec(), None);
            }
            Operator::SetStrokingCmyk | Operator::SetNonStrokingCmyk => {
                let cmyk = args.numbers::<4>()?;
                self.set_color(operator, ColorSpace::DeviceCmyk, cmyk.to_vec(), None);
            }
            Operator::SetStrokingColorSpace | Operator::SetNonStrokingColorSpace => {
                args.expect_len(1)?;
                let name = args.name(0)?;
                let space = match name {
                    b"DeviceGray" | b"DeviceRGB" | b"DeviceCMYK" | b"Pattern" => {
                        ColorSpace::from_family(name, None)
                    }
                    _ => resources.color_space(name).unwrap_or_else(|| {
                        debug!(target: PDF_STATE, space = %String::from_utf8_lossy(name), "color space resource not found");
                        ColorSpace::from_family(name, None)
                    }),
                };
                let initial = space.initial_color();
                *self.color_slot(operator) = initial;
            }
            Operator::SetStrokingColor | Operator::SetNonStrokingColor => {
                let components = args.all_numbers()?;
                let space = self.color_slot(operator).space.clone();
                self.set_color(operator, space, components, None);
            }
            Operator::SetStrokingColorN | Operator::SetNonStrokingColorN => {
                let (pattern, numeric) = match args.last() {
                    Some(Object::Name(name)) => (
                        Some(String::from_utf8_lossy(name).into_owned()),
                        &op.operands[..op.operands.len() - 1],
                    ),
                    _ => (None, op.operands.as_slice()),
                };
                let components = numeric
                    .iter()
                    .enumerate()
                    .map(|(i, o)| operand_as_float(o).ok_or_else(|| args.malformed(format!("operand {i} is not a number"))))
                    .collect::<Result<Vec<f32>, _>>()?;
                let space = self.color_slot(operator).space.clone();
                self.set_color(operator, space, components, pattern);
            }

            // Path construction
            Operator::MoveTo => {
                let [x, y] = args.numbers::<2>()?;
                self.state.move_to(x, y);
            }
            Operator::LineTo => {
                let [x, y] = args.numbers::<2>()?;
                self.state
                    .line_to(x, y)
                    .map_err(|e| args.malformed(e.to_string()))?;
            }
            Operator::CurveTo => {
                let [x1, y1, x2, y2, x3, y3] = args.numbers::<6>()?;
                self.state
                    .curve_to((x1, y1), (x2, y2), (x3, y3))
                    .map_err(|e| args.malformed(e.to_string()))?;
            }
            Operator::CurveToV => {
                let [x2, y2, x3, y3] = args.numbers::<4>()?;
                self.state
                    .curve_to_v((x2, y2), (x3, y3))
                    .map_err(|e| args.malformed(e.to_string()))?;
            }
            Operator::CurveToY => {
                let [x1, y1, x3, y3] = args.numbers::<4>()?;
                self.state
                    .curve_to_y((x1, y1), (x3, y3))
                    .map_err(|e| args.malformed(e.to_string()))?;
            }
            Operator::ClosePath => {
                self.state
                    .close_path()
                    .map_err(|e| args.malformed(e.to_string()))?;
            }
            Operator::Rectangle => {
                let [x, y, w, h] = args.numbers::<4>()?;
                self.state.rectangle(x, y, w, h);
            }

            // Clipping and painting
            Operator::Clip | Operator::ClipEvenOdd => self.state.mark_clip(),
            Operator::Stroke
            | Operator::CloseStroke
            | Operator::Fill
            | Operator::FillObsolete
            | Operator::FillEvenOdd
            | Operator::FillStroke
            | Operator::FillStrokeEvenOdd
            | Operator::CloseFillStroke
            | Operator::CloseFillStrokeEvenOdd
            | Operator::EndPath => {
                if PaintOp::closes_first(operator) && self.state.current_point().is_some() {
                    let _ = self.state.close_path();
                }
                if let Some(paint) = PaintOp::from_operator(operator) {
                    if !self.state.path().is_empty() {
                        self.handler
                            .paint_path(self.state.path(), paint, &self.state);
                    }
                }
                self.state.consume_path();
            }

            Operator::PaintXObject => {
                args.expect_len(1)?;
                let name = args.name(0)?;
                if self.options.descend_forms {
                    if let Some(form) = resources.form(name) {
                        self.execute_form(form, resources)?;
                    }
                }
            }

            // No tracked state
            Operator::SetLineCap
            | Operator::SetLineJoin
            | Operator::SetMiterLimit
            | Operator::SetDash
            | Operator::SetRenderingIntent
            | Operator::SetFlatness
            | Operator::SetExtGState
            | Operator::SetGlyphWidth
            | Operator::SetGlyphWidthBBox
            | Operator::ShadingFill
            | Operator::BeginInlineImage
            | Operator::InlineImageData
            | Operator::EndInlineImage
            | Operator::MarkedContentPoint
            | Operator::MarkedContentPointProperties
            | Operator::BeginMarkedContent
            | Operator::BeginMarkedContentProperties
            | Operator::EndMarkedContent
            | Operator::BeginCompatibility
            | Operator::EndCompatibility => {}

            Operator::Unknown => {
                trace!(target: PDF_OPERATIONS, op = %op.operator, "unknown operator passed through");
            }
        }
        Ok(())
    }

    fn color_slot(&mut self, operator: Operator) -> &mut Color {
        let current = self.state.current_mut();
        match operator {
            Operator::SetStrokingGray
            | Operator::SetStrokingRgb
            | Operator::SetStrokingCmyk
            | Operator::SetStrokingColorSpace
            | Operator::SetStrokingColor
            | Operator::SetStrokingColorN => &mut current.stroking_color,
            _ => &mut current.non_stroking_color,
        }
    }

    fn set_color(
        &mut self,
        operator: Operator,
        space: ColorSpace,
        components: Vec<f32>,
        pattern: Option<String>,
    ) {
        *self.color_slot(operator) = Color {
            space,
            components,
            pattern,
        };
    }

    fn show_adjusted(
        &mut self,
        args: &Operands<'_>,
        items: &[Object],
        resources: &dyn ResourceLookup,
    ) -> Result<(), MalformedOperator> {
        // A rejected array must leave the text matrix untouched.
        if let Some(i) = items
            .iter()
            .position(|item| !matches!(item, Object::String(..) | Object::Integer(_) | Object::Real(_)))
        {
            return Err(args.malformed(format!("TJ array item {i} is neither a string nor a number")));
        }
        for item in items {
            match item {
                Object::String(bytes, _) => self.show_string(bytes, resources),
                _ => {
                    let adjustment = operand_as_float(item).unwrap_or(0.0);
                    let text = &self.state.current().text;
                    let tx = -adjustment / 1000.0 * text.font_size * text.horizontal_scaling;
                    self.state.advance_text(tx);
                }
            }
        }
        Ok(())
    }

    fn show_string(&mut self, bytes: &[u8], resources: &dyn ResourceLookup) {
        let text = self.state.current().text.clone();
        let font_name = text.font.as_deref().unwrap_or_default();
        let font: Option<&FontInfo> = text.font.as_ref().and_then(|f| resources.font(f));
        let code_len = font.map(FontInfo::code_len).unwrap_or(1);

        for (code, code_bytes) in font
            .map(|f| f.codes(bytes))
            .unwrap_or_else(|| bytes.iter().map(|&b| u32::from(b)).collect())
            .into_iter()
            .zip(bytes.chunks(code_len))
        {
            let width = font.map(|f| f.width(code)).unwrap_or(0.0);
            let word_spacing = if code == 32 && code_len == 1 {
                text.word_spacing
            } else {
                0.0
            };
            let advance = (width / 1000.0 * text.font_size + text.char_spacing + word_spacing)
                * text.horizontal_scaling;

            if let Some(trm) = self.state.text_rendering_matrix() {
                let scale = [
                    text.font_size * text.horizontal_scaling,
                    0.0,
                    0.0,
                    text.font_size,
                    0.0,
                    text.rise,
                ];
                let glyph = Glyph {
                    code,
                    text: resources.decode_text(font_name, code_bytes),
                    rendering_matrix: multiply_matrices(&scale, &trm),
                    width,
                    advance,
                };
                self.handler.show_glyph(&glyph, &self.state);
            }
            self.state.advance_text(advance);
        }
    }

    fn execute_form(
        &mut self,
        form: FormXObject<'_>,
        resources: &dyn ResourceLookup,
    ) -> Result<(), ExecError> {
        if self.form_depth >= self.options.max_form_depth {
            return Err(InterpretError::FormDepth(self.options.max_form_depth).into());
        }
        let form_resources: &dyn ResourceLookup = match &form.resources {
            Some(own) => own.as_ref(),
            None => resources,
        };

        let base_depth = self.state.depth();
        self.state.save();
        self.state.concat(&form.matrix);
        self.form_depth += 1;
        debug!(target: PDF_OPERATIONS, depth = self.form_depth, tokens = form.operations.len(), "entering form");

        let mut result = Ok(());
        for (index, op) in form.operations.iter().enumerate() {
            match self.invoke(op, index, form_resources) {
                Ok(()) => {}
                Err(ExecError::Malformed(m)) => {
                    if let Err(e) = self.recover(m) {
                        result = Err(e);
                        break;
                    }
                }
                Err(fatal) => {
                    result = Err(fatal);
                    break;
                }
            }
        }

        self.form_depth -= 1;
        // Drops whatever the form left saved, plus our own save.
        while self.state.depth() > base_depth {
            let _ = self.state.restore();
        }
        result
    }
}
