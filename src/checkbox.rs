//! Checkbox detection from vector paths.
//!
//! Checkbox widgets drawn as flattened vector art leave a fixed signature in
//! the content stream: each frame edge is a four-segment path with known
//! displacements, and a check mark is two more such paths. Paths are matched
//! against those templates as they are painted; boxes are assembled once, on
//! first access.

use lopdf::content::Operation;
use once_cell::unsync::OnceCell;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::InterpretError;
use crate::geo::{Point, Rect};
use crate::interpreter::{ContentHandler, Interpreter, InterpreterOptions};
use crate::logging::PDF_SHAPES;
use crate::operator::PaintOp;
use crate::path::Path;
use crate::resources::ResourceLookup;
use crate::state::StateTracker;

/// Absolute tolerance for displacement and anchor comparisons, in user space units.
pub const TOLERANCE: f32 = 0.001;

/// Edge length of a detected checkbox.
pub const BOX_SIZE: f32 = 7.5;

pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < TOLERANCE
}

fn approx_point(a: Point, b: Point) -> bool {
    approx_eq(a.x, b.x) && approx_eq(a.y, b.y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShapeKind {
    BoxTop,
    BoxRight,
    BoxBottom,
    BoxLeft,
    CheckRight,
    CheckLeft,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 6] = [
        ShapeKind::BoxTop,
        ShapeKind::BoxRight,
        ShapeKind::BoxBottom,
        ShapeKind::BoxLeft,
        ShapeKind::CheckRight,
        ShapeKind::CheckLeft,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn template(self) -> &'static ShapeTemplate {
        &TEMPLATES[self.index()]
    }
}

/// Expected segment displacements of one shape and the offset from the first
/// segment's start point to the shape's anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeTemplate {
    pub kind: ShapeKind,
    pub displacements: [(f32, f32); 4],
    pub anchor_offset: (f32, f32),
}

static TEMPLATES: [ShapeTemplate; 6] = [
    ShapeTemplate {
        kind: ShapeKind::BoxTop,
        displacements: [(7.5, 0.0), (0.75, 0.75), (-9.0, 0.0), (0.75, -0.75)],
        anchor_offset: (0.0, -7.5),
    },
    ShapeTemplate {
        kind: ShapeKind::BoxRight,
        displacements: [(0.0, -7.5), (0.75, -0.75), (0.0, 9.0), (-0.75, -0.75)],
        anchor_offset: (-7.5, -7.5),
    },
    ShapeTemplate {
        kind: ShapeKind::BoxBottom,
        displacements: [(-7.5, 0.0), (-0.75, -0.75), (9.0, 0.0), (-0.75, 0.75)],
        anchor_offset: (-7.5, 0.0),
    },
    ShapeTemplate {
        kind: ShapeKind::BoxLeft,
        displacements: [(0.0, 7.5), (-0.75, 0.75), (0.0, -9.0), (0.75, 0.75)],
        anchor_offset: (0.0, 0.0),
    },
    ShapeTemplate {
        kind: ShapeKind::CheckRight,
        displacements: [
            (-2.65165, -2.65165),
            (0.0, -1.06066),
            (3.18198, 3.18198),
            (-0.53033, 0.53033),
        ],
        anchor_offset: (-2.65165, -2.65165),
    },
    ShapeTemplate {
        kind: ShapeKind::CheckLeft,
        displacements: [
            (-1.06066, 1.06066),
            (-0.53033, -0.53033),
            (1.59099, -1.59099),
            (0.0, 1.06066),
        ],
        anchor_offset: (0.0, 0.0),
    },
];

impl ShapeTemplate {
    /// Same element count, straight segments only, each displacement within
    /// [`TOLERANCE`].
    pub fn matches(&self, path: &Path) -> bool {
        path.len() == self.displacements.len()
            && path
                .elements()
                .iter()
                .zip(self.displacements.iter())
                .all(|(element, &(dx, dy))| match element.line_delta() {
                    Some((ex, ey)) => approx_eq(ex, dx) && approx_eq(ey, dy),
                    None => false,
                })
    }

    pub fn anchor(&self, path: &Path) -> Option<Point> {
        let first = path.elements().first()?;
        first.line_delta()?;
        let (ox, oy) = self.anchor_offset;
        Some(first.start().offset(ox, oy))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CheckBox {
    pub lower_left: Point,
    pub upper_right: Point,
    pub checked: bool,
}

impl CheckBox {
    pub fn rect(&self) -> Rect {
        Rect::new(
            self.lower_left.x,
            self.lower_left.y,
            self.upper_right.x,
            self.upper_right.y,
        )
    }
}

/// Collects template anchors from painted paths of one page and assembles
/// checkboxes from them.
#[derive(Debug, Default)]
pub struct CheckBoxFinder {
    anchors: [Vec<Point>; 6],
    boxes: OnceCell<Vec<CheckBox>>,
}

impl CheckBoxFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies one complete path. Ignored once boxes have been assembled.
    pub fn record_path(&mut self, path: &Path) {
        if self.boxes.get().is_some() {
            warn!(target: PDF_SHAPES, "path recorded after checkboxes were assembled; ignored");
            return;
        }
        // Every template has four segments.
        if path.len() != 4 {
            return;
        }
        for kind in ShapeKind::ALL {
            let template = kind.template();
            if !template.matches(path) {
                continue;
            }
            if let Some(anchor) = template.anchor(path) {
                debug!(target: PDF_SHAPES, ?kind, x = anchor.x, y = anchor.y, "shape matched");
                self.anchors[kind.index()].push(anchor);
            }
        }
    }

    pub fn anchors(&self, kind: ShapeKind) -> &[Point] {
        &self.anchors[kind.index()]
    }

    /// The detected checkboxes, in the order their bottom edges were painted.
    pub fn boxes(&self) -> &[CheckBox] {
        self.boxes.get_or_init(|| self.assemble())
    }

    pub fn into_boxes(self) -> Vec<CheckBox> {
        let boxes = self.boxes();
        boxes.to_vec()
    }

    fn contains_anchor(&self, kind: ShapeKind, anchor: Point) -> bool {
        self.anchors(kind).iter().any(|&p| approx_point(p, anchor))
    }

    fn any_inside(&self, kind: ShapeKind, rect: &Rect) -> bool {
        self.anchors(kind).iter().any(|&p| rect.strictly_contains(p))
    }

    fn assemble(&self) -> Vec<CheckBox> {
        let boxes: Vec<CheckBox> = self
            .anchors(ShapeKind::BoxBottom)
            .iter()
            .copied()
            .filter(|&anchor| {
                self.contains_anchor(ShapeKind::BoxLeft, anchor)
                    && self.contains_anchor(ShapeKind::BoxRight, anchor)
                    && self.contains_anchor(ShapeKind::BoxTop, anchor)
            })
            .map(|anchor| {
                let upper_right = anchor.offset(BOX_SIZE, BOX_SIZE);
                let rect = Rect::new(anchor.x, anchor.y, upper_right.x, upper_right.y);
                CheckBox {
                    lower_left: anchor,
                    upper_right,
                    checked: self.any_inside(ShapeKind::CheckLeft, &rect)
                        && self.any_inside(ShapeKind::CheckRight, &rect),
                }
            })
            .collect();
        debug!(target: PDF_SHAPES, count = boxes.len(), "checkboxes assembled");
        boxes
    }
}

impl ContentHandler for CheckBoxFinder {
    fn paint_path(&mut self, path: &Path, _paint: PaintOp, _state: &StateTracker) {
        self.record_path(path);
    }
}

/// Runs a fresh [`CheckBoxFinder`] over one content stream.
pub fn find_in_operations(
    operations: &[Operation],
    resources: &dyn ResourceLookup,
    options: &InterpreterOptions,
) -> Result<Vec<CheckBox>, InterpretError> {
    let mut finder = CheckBoxFinder::new();
    let mut interpreter = Interpreter::new(&mut finder, resources).with_options(options.clone());
    interpreter.process(operations)?;
    drop(interpreter);
    Ok(finder.into_boxes())
}
