//! Content stream operator vocabulary.
//!
//! Tokens are `lopdf::content::Operation` values; this module classifies the
//! operator name into a closed enum once per token and provides typed operand
//! readers that report arity and type mismatches as [`MalformedOperator`].

use lopdf::content::Operation;
use lopdf::Object;

use crate::error::MalformedOperator;
use crate::geo::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // General graphics state
    SetLineWidth, // w
    SetLineCap, // J
    SetLineJoin, // j
    SetMiterLimit, // M
    SetDash, // d
    SetRenderingIntent, // ri
    SetFlatness, // i
    SetExtGState, // gs
    // Special graphics state
    Save, // q
    Restore, // Q
    ConcatMatrix, // cm
    // Path construction
    MoveTo, // m
    LineTo, // l
    CurveTo, // c
    CurveToV, // v
    CurveToY, // y
    ClosePath, // h
    Rectangle, // re
    // Path painting
    Stroke, // S
    CloseStroke, // s
    Fill, // f
    FillObsolete, // F
    FillEvenOdd, // f*
    FillStroke, // B
    FillStrokeEvenOdd, // B*
    CloseFillStroke, // b
    CloseFillStrokeEvenOdd, // b*
    EndPath, // n
    // Clipping
    Clip, // W
    ClipEvenOdd, // W*
    // Text objects
    BeginText, // BT
    EndText, // ET
    // Text state
    SetCharSpacing, // Tc
    SetWordSpacing, // Tw
    SetHorizontalScaling, // Tz
    SetLeading, // TL
    SetFont, // Tf
    SetRenderMode, // Tr
    SetRise, // Ts
    // Text positioning
    MoveText, // Td
    MoveTextSetLeading, // TD
    SetTextMatrix, // Tm
    NextLine, // T*
    // Text showing
    ShowText, // Tj
    ShowTextAdjusted, // TJ
    NextLineShowText, // '
    NextLineSpacedShowText, // "
    // Type 3 fonts
    SetGlyphWidth, // d0
    SetGlyphWidthBBox, // d1
    // Color
    SetStrokingColorSpace, // CS
    SetNonStrokingColorSpace, // cs
    SetStrokingColor, // SC
    SetStrokingColorN, // SCN
    SetNonStrokingColor, // sc
    SetNonStrokingColorN, // scn
    SetStrokingGray, // G
    SetNonStrokingGray, // g
    SetStrokingRgb, // RG
    SetNonStrokingRgb, // rg
    SetStrokingCmyk, // K
    SetNonStrokingCmyk, // k
    // Shading, images, XObjects
    ShadingFill, // sh
    BeginInlineImage, // BI
    InlineImageData, // ID
    EndInlineImage, // EI
    PaintXObject, // Do
    // Marked content
    MarkedContentPoint, // MP
    MarkedContentPointProperties, // DP
    BeginMarkedContent, // BMC
    BeginMarkedContentProperties, // BDC
    EndMarkedContent, // EMC
    // Compatibility
    BeginCompatibility, // BX
    EndCompatibility, // EX
    Unknown,
}

impl Operator {
    pub fn from_name(name: &str) -> Self {
        use Operator::*;
        match name {
            "w" => SetLineWidth,
            "J" => SetLineCap,
            "j" => SetLineJoin,
            "M" => SetMiterLimit,
            "d" => SetDash,
            "ri" => SetRenderingIntent,
            "i" => SetFlatness,
            "gs" => SetExtGState,
            "q" => Save,
            "Q" => Restore,
            "cm" => ConcatMatrix,
            "m" => MoveTo,
            "l" => LineTo,
            "c" => CurveTo,
            "v" => CurveToV,
            "y" => CurveToY,
            "h" => ClosePath,
            "re" => Rectangle,
            "S" => Stroke,
            "s" => CloseStroke,
            "f" => Fill,
            "F" => FillObsolete,
            "f*" => FillEvenOdd,
            "B" => FillStroke,
            "B*" => FillStrokeEvenOdd,
            "b" => CloseFillStroke,
            "b*" => CloseFillStrokeEvenOdd,
            "n" => EndPath,
            "W" => Clip,
            "W*" => ClipEvenOdd,
            "BT" => BeginText,
            "ET" => EndText,
            "Tc" => SetCharSpacing,
            "Tw" => SetWordSpacing,
            "Tz" => SetHorizontalScaling,
            "TL" => SetLeading,
            "Tf" => SetFont,
            "Tr" => SetRenderMode,
            "Ts" => SetRise,
            "Td" => MoveText,
            "TD" => MoveTextSetLeading,
            "Tm" => SetTextMatrix,
            "T*" => NextLine,
            "Tj" => ShowText,
            "TJ" => ShowTextAdjusted,
            "'" => NextLineShowText,
            "\"" => NextLineSpacedShowText,
            "d0" => SetGlyphWidth,
            "d1" => SetGlyphWidthBBox,
            "CS" => SetStrokingColorSpace,
            "cs" => SetNonStrokingColorSpace,
            "SC" => SetStrokingColor,
            "SCN" => SetStrokingColorN,
            "sc" => SetNonStrokingColor,
            "scn" => SetNonStrokingColorN,
            "G" => SetStrokingGray,
            "g" => SetNonStrokingGray,
            "RG" => SetStrokingRgb,
            "rg" => SetNonStrokingRgb,
            "K" => SetStrokingCmyk,
            "k" => SetNonStrokingCmyk,
            "sh" => ShadingFill,
            "BI" => BeginInlineImage,
            "ID" => InlineImageData,
            "EI" => EndInlineImage,
            "Do" => PaintXObject,
            "MP" => MarkedContentPoint,
            "DP" => MarkedContentPointProperties,
            "BMC" => BeginMarkedContent,
            "BDC" => BeginMarkedContentProperties,
            "EMC" => EndMarkedContent,
            "BX" => BeginCompatibility,
            "EX" => EndCompatibility,
            _ => Unknown,
        }
    }

    pub fn is_text_showing(self) -> bool {
        matches!(
            self,
            Operator::ShowText
                | Operator::ShowTextAdjusted
                | Operator::NextLineShowText
                | Operator::NextLineSpacedShowText
        )
    }

    pub fn is_path_construction(self) -> bool {
        matches!(
            self,
            Operator::MoveTo
                | Operator::LineTo
                | Operator::CurveTo
                | Operator::CurveToV
                | Operator::CurveToY
                | Operator::ClosePath
                | Operator::Rectangle
        )
    }

    /// Operators that consume (and clear) the current path.
    pub fn is_path_painting(self) -> bool {
        PaintOp::from_operator(self).is_some()
    }
}

/// Convenience for matching raw tokens without building an [`Operator`].
pub fn is_text_showing(op: &Operation) -> bool {
    Operator::from_name(&op.operator).is_text_showing()
}

/// How a path-consuming operator paints the current path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOp {
    Stroke,
    Fill { even_odd: bool },
    FillStroke { even_odd: bool },
    /// `n`: ends the path without painting (typically after a clip).
    EndPath,
}

impl PaintOp {
    pub fn from_operator(op: Operator) -> Option<Self> {
        Some(match op {
            Operator::Stroke | Operator::CloseStroke => PaintOp::Stroke,
            Operator::Fill | Operator::FillObsolete => PaintOp::Fill { even_odd: false },
            Operator::FillEvenOdd => PaintOp::Fill { even_odd: true },
            Operator::FillStroke | Operator::CloseFillStroke => {
                PaintOp::FillStroke { even_odd: false }
            }
            Operator::FillStrokeEvenOdd | Operator::CloseFillStrokeEvenOdd => {
                PaintOp::FillStroke { even_odd: true }
            }
            Operator::EndPath => PaintOp::EndPath,
            _ => return None,
        })
    }

    /// Whether the operator closes the current subpath before painting.
    pub fn closes_first(op: Operator) -> bool {
        matches!(
            op,
            Operator::CloseStroke | Operator::CloseFillStroke | Operator::CloseFillStrokeEvenOdd
        )
    }
}

pub fn operand_as_float(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f),
        _ => None,
    }
}

fn object_kind(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "a boolean",
        Object::Integer(_) | Object::Real(_) => "a number",
        Object::Name(_) => "a name",
        Object::String(..) => "a string",
        Object::Array(_) => "an array",
        Object::Dictionary(_) => "a dictionary",
        Object::Stream(_) => "a stream",
        Object::Reference(_) => "a reference",
    }
}

/// Typed access to one token's operands, tagged with its stream position for
/// error reporting.
pub struct Operands<'a> {
    op: &'a Operation,
    index: usize,
}

impl<'a> Operands<'a> {
    pub fn new(op: &'a Operation, index: usize) -> Self {
        Self { op, index }
    }

    pub fn malformed(&self, reason: impl Into<String>) -> MalformedOperator {
        MalformedOperator {
            operator: self.op.operator.clone(),
            index: self.index,
            reason: reason.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.op.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.op.operands.is_empty()
    }

    pub fn expect_len(&self, n: usize) -> Result<(), MalformedOperator> {
        if self.len() == n {
            Ok(())
        } else {
            Err(self.malformed(format!("expected {n} operands, found {}", self.len())))
        }
    }

    pub fn number(&self, i: usize) -> Result<f32, MalformedOperator> {
        let obj = self
            .op
            .operands
            .get(i)
            .ok_or_else(|| self.malformed(format!("missing operand {i}")))?;
        operand_as_float(obj).ok_or_else(|| {
            self.malformed(format!("operand {i} is {}, expected a number", object_kind(obj)))
        })
    }

    /// Exactly `N` numeric operands.
    pub fn numbers<const N: usize>(&self) -> Result<[f32; N], MalformedOperator> {
        self.expect_len(N)?;
        let mut out = [0.0; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.number(i)?;
        }
        Ok(out)
    }

    /// All operands as numbers, of any count.
    pub fn all_numbers(&self) -> Result<Vec<f32>, MalformedOperator> {
        (0..self.len()).map(|i| self.number(i)).collect()
    }

    pub fn matrix(&self) -> Result<Matrix, MalformedOperator> {
        self.numbers::<6>()
    }

    pub fn name(&self, i: usize) -> Result<&'a [u8], MalformedOperator> {
        match self.op.operands.get(i) {
            Some(Object::Name(name)) => Ok(name.as_slice()),
            Some(other) => Err(self.malformed(format!(
                "operand {i} is {}, expected a name",
                object_kind(other)
            ))),
            None => Err(self.malformed(format!("missing operand {i}"))),
        }
    }

    pub fn string(&self, i: usize) -> Result<&'a [u8], MalformedOperator> {
        match self.op.operands.get(i) {
            Some(Object::String(bytes, _)) => Ok(bytes.as_slice()),
            Some(other) => Err(self.malformed(format!(
                "operand {i} is {}, expected a string",
                object_kind(other)
            ))),
            None => Err(self.malformed(format!("missing operand {i}"))),
        }
    }

    pub fn array(&self, i: usize) -> Result<&'a [Object], MalformedOperator> {
        match self.op.operands.get(i) {
            Some(Object::Array(items)) => Ok(items.as_slice()),
            Some(other) => Err(self.malformed(format!(
                "operand {i} is {}, expected an array",
                object_kind(other)
            ))),
            None => Err(self.malformed(format!("missing operand {i}"))),
        }
    }

    pub fn last(&self) -> Option<&'a Object> {
        self.op.operands.last()
    }
}
