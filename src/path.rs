use smallvec::SmallVec;

use crate::geo::{Point, Rect};

/// One primitive of the current path, in user space (CTM applied).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathElement {
    Line {
        from: Point,
        to: Point,
    },
    Curve {
        from: Point,
        c1: Point,
        c2: Point,
        to: Point,
    },
    /// Closed quad from `re`; corners in drawing order starting at the origin.
    Rectangle {
        corners: [Point; 4],
    },
}

impl PathElement {
    pub fn start(&self) -> Point {
        match self {
            PathElement::Line { from, .. } | PathElement::Curve { from, .. } => *from,
            PathElement::Rectangle { corners } => corners[0],
        }
    }

    pub fn end(&self) -> Point {
        match self {
            PathElement::Line { to, .. } | PathElement::Curve { to, .. } => *to,
            PathElement::Rectangle { corners } => corners[0],
        }
    }

    /// Displacement of a straight segment; `None` for curves and rectangles.
    pub fn line_delta(&self) -> Option<(f32, f32)> {
        match self {
            PathElement::Line { from, to } => Some((to.x - from.x, to.y - from.y)),
            _ => None,
        }
    }

    fn points(&self) -> SmallVec<[Point; 4]> {
        match self {
            PathElement::Line { from, to } => SmallVec::from_slice(&[*from, *to]),
            PathElement::Curve { from, c1, c2, to } => SmallVec::from_slice(&[*from, *c1, *c2, *to]),
            PathElement::Rectangle { corners } => SmallVec::from_slice(corners),
        }
    }
}

/// Reasons a construction operator cannot extend the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    NoCurrentPoint,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::NoCurrentPoint => f.write_str("no current point"),
        }
    }
}

/// The current path between a construction operator and the operator that
/// consumes it.
///
/// Most page paths are short, so elements live inline up to eight entries.
#[derive(Debug, Clone, Default)]
pub struct Path {
    elements: SmallVec<[PathElement; 8]>,
    current_point: Option<Point>,
    subpath_start: Option<Point>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Equals the end point of the most recently added element, or the last
    /// `m` target if nothing was added since.
    pub fn current_point(&self) -> Option<Point> {
        self.current_point
    }

    pub fn move_to(&mut self, p: Point) {
        self.current_point = Some(p);
        self.subpath_start = Some(p);
    }

    pub fn line_to(&mut self, p: Point) -> Result<(), PathError> {
        let from = self.current_point.ok_or(PathError::NoCurrentPoint)?;
        self.elements.push(PathElement::Line { from, to: p });
        self.current_point = Some(p);
        Ok(())
    }

    pub fn curve_to(&mut self, c1: Point, c2: Point, to: Point) -> Result<(), PathError> {
        let from = self.current_point.ok_or(PathError::NoCurrentPoint)?;
        self.elements.push(PathElement::Curve { from, c1, c2, to });
        self.current_point = Some(to);
        Ok(())
    }

    /// Appends a rectangle; the rectangle's origin becomes the start of a
    /// new subpath and the current point.
    pub fn rectangle(&mut self, corners: [Point; 4]) {
        self.move_to(corners[0]);
        self.elements.push(PathElement::Rectangle { corners });
    }

    /// Closes the current subpath with a straight segment back to its start,
    /// even when that segment has zero length.
    pub fn close(&mut self) -> Result<(), PathError> {
        let (current, start) = self
            .current_point
            .zip(self.subpath_start)
            .ok_or(PathError::NoCurrentPoint)?;
        self.elements.push(PathElement::Line {
            from: current,
            to: start,
        });
        self.current_point = Some(start);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.current_point = None;
        self.subpath_start = None;
    }

    pub fn bounds(&self) -> Option<Rect> {
        Rect::bounding(self.elements.iter().flat_map(|e| e.points()))
    }
}
