//! Graphics state tracking.
//!
//! [`StateTracker`] owns the save/restore stack, the text object matrices
//! (present only between `BT` and `ET`) and the current path. The interpreter
//! mutates it; handlers read it.

use serde::Serialize;
use tracing::warn;

use crate::geo::{multiply_matrices, transform_point, translate_matrix, Matrix, Point, Rect, IDENTITY};
use crate::logging::PDF_STATE;
use crate::path::{Path, PathError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRgb,
    DeviceCmyk,
    Pattern,
    /// Any other family (ICCBased, Indexed, Separation, Lab, ...).
    Other { family: String, components: usize },
}

impl ColorSpace {
    /// Maps a color space family name; `components` is the ICC `/N` if known.
    pub fn from_family(family: &[u8], components: Option<usize>) -> Self {
        match family {
            b"DeviceGray" | b"G" | b"CalGray" => ColorSpace::DeviceGray,
            b"DeviceRGB" | b"RGB" | b"CalRGB" => ColorSpace::DeviceRgb,
            b"DeviceCMYK" | b"CMYK" => ColorSpace::DeviceCmyk,
            b"Pattern" => ColorSpace::Pattern,
            b"ICCBased" => match components {
                Some(1) => ColorSpace::DeviceGray,
                Some(3) => ColorSpace::DeviceRgb,
                Some(4) => ColorSpace::DeviceCmyk,
                n => ColorSpace::Other {
                    family: "ICCBased".to_string(),
                    components: n.unwrap_or(1),
                },
            },
            b"Lab" => ColorSpace::Other {
                family: "Lab".to_string(),
                components: 3,
            },
            other => ColorSpace::Other {
                family: String::from_utf8_lossy(other).into_owned(),
                components: 1,
            },
        }
    }

    pub fn components(&self) -> usize {
        match self {
            ColorSpace::DeviceGray => 1,
            ColorSpace::DeviceRgb => 3,
            ColorSpace::DeviceCmyk => 4,
            ColorSpace::Pattern => 0,
            ColorSpace::Other { components, .. } => *components,
        }
    }

    pub fn initial_color(&self) -> Color {
        let components = match self {
            ColorSpace::DeviceCmyk => vec![0.0, 0.0, 0.0, 1.0],
            other => vec![0.0; other.components()],
        };
        Color {
            space: self.clone(),
            components,
            pattern: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Color {
    pub space: ColorSpace,
    pub components: Vec<f32>,
    /// Pattern resource name for `scn`/`SCN` with a pattern operand.
    pub pattern: Option<String>,
}

impl Default for Color {
    fn default() -> Self {
        ColorSpace::DeviceGray.initial_color()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextState {
    /// Font resource name as given to `Tf`.
    pub font: Option<Vec<u8>>,
    pub font_size: f32,
    pub char_spacing: f32,
    pub word_spacing: f32,
    /// Horizontal scaling as a fraction (1.0 = 100%).
    pub horizontal_scaling: f32,
    pub leading: f32,
    pub render_mode: u8,
    pub rise: f32,
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            render_mode: 0,
            rise: 0.0,
        }
    }
}

impl TextState {
    pub fn font_name(&self) -> Option<String> {
        self.font
            .as_ref()
            .map(|f| String::from_utf8_lossy(f).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub line_width: f32,
    pub text: TextState,
    pub stroking_color: Color,
    pub non_stroking_color: Color,
    /// Bounding box of the intersected clip paths in user space; `None` when
    /// unclipped. Kept for reference only, never used to cull output.
    pub clip: Option<Rect>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: IDENTITY,
            line_width: 1.0,
            text: TextState::default(),
            stroking_color: Color::default(),
            non_stroking_color: Color::default(),
            clip: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TextObject {
    matrix: Matrix,
    line_matrix: Matrix,
}

/// `Q` with nothing saved. Recoverable: the state is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackUnderflow;

#[derive(Debug, Clone)]
pub struct StateTracker {
    current: GraphicsState,
    saved: Vec<GraphicsState>,
    text_object: Option<TextObject>,
    path: Path,
    pending_clip: bool,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new(IDENTITY)
    }
}

impl StateTracker {
    pub fn new(initial_ctm: Matrix) -> Self {
        StateTracker {
            current: GraphicsState {
                ctm: initial_ctm,
                ..Default::default()
            },
            saved: Vec::new(),
            text_object: None,
            path: Path::new(),
            pending_clip: false,
        }
    }

    pub fn current(&self) -> &GraphicsState {
        &self.current
    }

    pub(crate) fn current_mut(&mut self) -> &mut GraphicsState {
        &mut self.current
    }

    /// Number of saved states on the stack.
    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn save(&mut self) {
        self.saved.push(self.current.clone());
    }

    pub fn restore(&mut self) -> Result<(), StackUnderflow> {
        match self.saved.pop() {
            Some(state) => {
                self.current = state;
                Ok(())
            }
            None => {
                warn!(target: PDF_STATE, "restore without matching save");
                Err(StackUnderflow)
            }
        }
    }

    pub fn concat(&mut self, m: &Matrix) {
        self.current.ctm = multiply_matrices(m, &self.current.ctm);
    }

    // Text object

    pub fn in_text_object(&self) -> bool {
        self.text_object.is_some()
    }

    pub fn begin_text(&mut self) {
        if self.text_object.is_some() {
            warn!(target: PDF_STATE, "BT inside a text object");
        }
        self.text_object = Some(TextObject {
            matrix: IDENTITY,
            line_matrix: IDENTITY,
        });
    }

    pub fn end_text(&mut self) {
        if self.text_object.take().is_none() {
            warn!(target: PDF_STATE, "ET outside a text object");
        }
    }

    /// Text matrix `Tm`; `None` outside `BT`/`ET`.
    pub fn text_matrix(&self) -> Option<Matrix> {
        self.text_object.map(|t| t.matrix)
    }

    pub fn text_line_matrix(&self) -> Option<Matrix> {
        self.text_object.map(|t| t.line_matrix)
    }

    fn text_object_mut(&mut self) -> &mut TextObject {
        // Text operators outside BT behave as if a text object had been opened.
        self.text_object.get_or_insert(TextObject {
            matrix: IDENTITY,
            line_matrix: IDENTITY,
        })
    }

    pub fn set_text_matrix(&mut self, m: Matrix) {
        let text = self.text_object_mut();
        text.matrix = m;
        text.line_matrix = m;
    }

    /// `Td`: start a new line offset from the start of the current one.
    pub fn move_text(&mut self, tx: f32, ty: f32) {
        let text = self.text_object_mut();
        text.line_matrix = multiply_matrices(&translate_matrix(tx, ty), &text.line_matrix);
        text.matrix = text.line_matrix;
    }

    /// `T*`
    pub fn next_line(&mut self) {
        let leading = self.current.text.leading;
        self.move_text(0.0, -leading);
    }

    /// Moves the text matrix by `tx` in unscaled text space (after a glyph or
    /// a `TJ` adjustment).
    pub fn advance_text(&mut self, tx: f32) {
        let text = self.text_object_mut();
        text.matrix = multiply_matrices(&translate_matrix(tx, 0.0), &text.matrix);
    }

    /// Text rendering matrix without the font size/scaling part: `Tm × CTM`.
    pub fn text_rendering_matrix(&self) -> Option<Matrix> {
        self.text_matrix()
            .map(|tm| multiply_matrices(&tm, &self.current.ctm))
    }

    /// User space origin of the next glyph.
    pub fn text_origin(&self) -> Option<Point> {
        self.text_rendering_matrix()
            .map(|m| transform_point(&m, 0.0, self.current.text.rise))
    }

    /// Font size as it appears in user space: the length of the text space
    /// vector `(0, font_size)` mapped through `Tm × CTM`.
    pub fn effective_font_size(&self) -> Option<f32> {
        let m = self.text_rendering_matrix()?;
        let fs = self.current.text.font_size;
        let origin = transform_point(&m, 0.0, 0.0);
        Some(transform_point(&m, 0.0, fs).distance(origin))
    }

    // Path construction, in user space coordinates

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_point(&self) -> Option<Point> {
        self.path.current_point()
    }

    fn to_user(&self, x: f32, y: f32) -> Point {
        transform_point(&self.current.ctm, x, y)
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        let p = self.to_user(x, y);
        self.path.move_to(p);
    }

    pub fn line_to(&mut self, x: f32, y: f32) -> Result<(), PathError> {
        let p = self.to_user(x, y);
        self.path.line_to(p)
    }

    pub fn curve_to(&mut self, c1: (f32, f32), c2: (f32, f32), to: (f32, f32)) -> Result<(), PathError> {
        let (c1, c2, to) = (
            self.to_user(c1.0, c1.1),
            self.to_user(c2.0, c2.1),
            self.to_user(to.0, to.1),
        );
        self.path.curve_to(c1, c2, to)
    }

    /// `v`: the first control point coincides with the current point.
    pub fn curve_to_v(&mut self, c2: (f32, f32), to: (f32, f32)) -> Result<(), PathError> {
        let c1 = self.path.current_point().ok_or(PathError::NoCurrentPoint)?;
        let (c2, to) = (self.to_user(c2.0, c2.1), self.to_user(to.0, to.1));
        self.path.curve_to(c1, c2, to)
    }

    /// `y`: the second control point coincides with the end point.
    pub fn curve_to_y(&mut self, c1: (f32, f32), to: (f32, f32)) -> Result<(), PathError> {
        let (c1, to) = (self.to_user(c1.0, c1.1), self.to_user(to.0, to.1));
        self.path.curve_to(c1, to, to)
    }

    pub fn rectangle(&mut self, x: f32, y: f32, width: f32, height: f32) {
        let corners = [
            self.to_user(x, y),
            self.to_user(x + width, y),
            self.to_user(x + width, y + height),
            self.to_user(x, y + height),
        ];
        self.path.rectangle(corners);
    }

    pub fn close_path(&mut self) -> Result<(), PathError> {
        self.path.close()
    }

    /// `W`/`W*`: the clip applies once the current path is consumed.
    pub fn mark_clip(&mut self) {
        self.pending_clip = true;
    }

    /// Ends the current path, applying a pending clip first.
    pub fn consume_path(&mut self) {
        if std::mem::take(&mut self.pending_clip) {
            if let Some(bounds) = self.path.bounds() {
                self.current.clip = Some(match self.current.clip {
                    Some(clip) => clip.intersect(&bounds),
                    None => bounds,
                });
            }
        }
        self.path.clear();
    }
}
