//! Resource lookup for state tracking.
//!
//! The interpreter only asks resources for what it needs to keep graphics
//! state correct (glyph widths, glyph text, color space families) and, when
//! explicitly configured, for form XObject content.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId, Stream};
use tracing::warn;

use crate::geo::{Matrix, IDENTITY};
use crate::logging::PDF_RESOURCES;
use crate::operator::operand_as_float;
use crate::state::ColorSpace;

/// Metrics of a font resource, in glyph space units (1/1000 of text space).
#[derive(Debug, Clone, PartialEq)]
pub struct FontInfo {
    pub base_font: Option<String>,
    /// Type0 fonts use two-byte codes.
    pub composite: bool,
    pub first_char: u32,
    pub widths: Vec<f32>,
    pub missing_width: f32,
    /// Per-CID widths of composite fonts.
    pub cid_widths: BTreeMap<u32, f32>,
}

impl Default for FontInfo {
    fn default() -> Self {
        FontInfo {
            base_font: None,
            composite: false,
            first_char: 0,
            widths: Vec::new(),
            missing_width: 0.0,
            cid_widths: BTreeMap::new(),
        }
    }
}

impl FontInfo {
    /// A simple font with `widths` starting at `first_char`.
    pub fn simple(first_char: u32, widths: Vec<f32>) -> Self {
        FontInfo {
            first_char,
            widths,
            ..Default::default()
        }
    }

    pub fn width(&self, code: u32) -> f32 {
        if self.composite {
            return self
                .cid_widths
                .get(&code)
                .copied()
                .unwrap_or(self.missing_width);
        }
        code.checked_sub(self.first_char)
            .and_then(|i| self.widths.get(i as usize))
            .copied()
            .unwrap_or(self.missing_width)
    }

    /// Splits a shown string into character codes.
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.composite {
            bytes
                .chunks(2)
                .map(|c| match c {
                    [hi, lo] => u32::from(*hi) << 8 | u32::from(*lo),
                    [b] => u32::from(*b),
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|&b| u32::from(b)).collect()
        }
    }

    pub fn code_len(&self) -> usize {
        if self.composite {
            2
        } else {
            1
        }
    }

    fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let base_font = dict
            .get(b"BaseFont")
            .and_then(Object::as_name)
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .ok();
        let subtype = dict.get(b"Subtype").and_then(Object::as_name).ok();

        if subtype == Some(b"Type0".as_slice()) {
            let descendant = dict
                .get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve(doc, o).as_array().ok())
                .and_then(|arr| arr.first())
                .and_then(|o| resolve(doc, o).as_dict().ok());
            let default_width = descendant
                .and_then(|d| d.get(b"DW").ok())
                .and_then(operand_as_float)
                .unwrap_or(1000.0);
            let cid_widths = descendant
                .and_then(|d| d.get(b"W").ok())
                .and_then(|o| resolve(doc, o).as_array().ok())
                .map(|w| parse_cid_widths(doc, w))
                .unwrap_or_default();
            return FontInfo {
                base_font,
                composite: true,
                missing_width: default_width,
                cid_widths,
                ..Default::default()
            };
        }

        let first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(operand_as_float)
            .map(|f| f as u32)
            .unwrap_or(0);
        let widths = dict
            .get(b"Widths")
            .ok()
            .and_then(|o| resolve(doc, o).as_array().ok())
            .map(|arr| {
                arr.iter()
                    .map(|w| operand_as_float(resolve(doc, w)).unwrap_or(0.0))
                    .collect()
            })
            .unwrap_or_default();
        let missing_width = dict
            .get(b"FontDescriptor")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .and_then(|d| d.get(b"MissingWidth").ok())
            .and_then(operand_as_float)
            .unwrap_or(0.0);

        FontInfo {
            base_font,
            composite: false,
            first_char,
            widths,
            missing_width,
            cid_widths: BTreeMap::new(),
        }
    }
}

/// Largest CID a two-byte code can select.
const MAX_CID: u32 = 0xFFFF;

fn cid_operand(doc: &Document, obj: &Object) -> Option<u32> {
    operand_as_float(resolve(doc, obj))
        .filter(|v| (0.0..=MAX_CID as f32).contains(v))
        .map(|v| v as u32)
}

/// Parses a CIDFont `/W` array: `c [w1 w2 ...]` and `c_first c_last w` runs.
/// CIDs beyond [`MAX_CID`] and inverted ranges are dropped.
fn parse_cid_widths(doc: &Document, w: &[Object]) -> BTreeMap<u32, f32> {
    let mut out = BTreeMap::new();
    let mut i = 0;
    while i < w.len() {
        let Some(first) = cid_operand(doc, &w[i]) else {
            warn!(target: PDF_RESOURCES, index = i, "invalid CID in /W array; remaining widths ignored");
            break;
        };
        match w.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(run)) => {
                let cids = first..=MAX_CID;
                for (cid, width) in cids.zip(run.iter()) {
                    if let Some(width) = operand_as_float(resolve(doc, width)) {
                        out.insert(cid, width);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(width)) = (
                    cid_operand(doc, last),
                    w.get(i + 2).and_then(|o| operand_as_float(resolve(doc, o))),
                ) else {
                    warn!(target: PDF_RESOURCES, index = i, "invalid CID range in /W array; remaining widths ignored");
                    break;
                };
                if last < first {
                    warn!(target: PDF_RESOURCES, first, last, "inverted CID range in /W array skipped");
                }
                for cid in first..=last {
                    out.insert(cid, width);
                }
                i += 3;
            }
            None => break,
        }
    }
    out
}

/// A form XObject ready for nested interpretation.
pub struct FormXObject<'r> {
    pub operations: Vec<Operation>,
    pub matrix: Matrix,
    /// The form's own resources, when it declares any.
    pub resources: Option<Box<dyn ResourceLookup + 'r>>,
}

pub trait ResourceLookup {
    fn font(&self, name: &[u8]) -> Option<&FontInfo>;

    /// Unicode text of `bytes` shown with font `name`, if its encoding is known.
    fn decode_text(&self, _name: &[u8], _bytes: &[u8]) -> Option<String> {
        None
    }

    fn color_space(&self, _name: &[u8]) -> Option<ColorSpace> {
        None
    }

    /// `None` for unknown names and for image XObjects.
    fn form(&self, _name: &[u8]) -> Option<FormXObject<'_>> {
        None
    }
}

/// Lookup with no resources at all; glyphs have zero advance.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResources;

impl ResourceLookup for NoResources {
    fn font(&self, _name: &[u8]) -> Option<&FontInfo> {
        None
    }
}

/// Fixed in-memory resources, used for synthetic streams and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticResources {
    pub fonts: BTreeMap<Vec<u8>, FontInfo>,
    pub color_spaces: BTreeMap<Vec<u8>, ColorSpace>,
    pub forms: BTreeMap<Vec<u8>, (Vec<Operation>, Matrix)>,
}

impl StaticResources {
    pub fn with_font(mut self, name: &str, font: FontInfo) -> Self {
        self.fonts.insert(name.as_bytes().to_vec(), font);
        self
    }

    pub fn with_color_space(mut self, name: &str, space: ColorSpace) -> Self {
        self.color_spaces.insert(name.as_bytes().to_vec(), space);
        self
    }

    pub fn with_form(mut self, name: &str, operations: Vec<Operation>, matrix: Matrix) -> Self {
        self.forms
            .insert(name.as_bytes().to_vec(), (operations, matrix));
        self
    }
}

impl ResourceLookup for StaticResources {
    fn font(&self, name: &[u8]) -> Option<&FontInfo> {
        self.fonts.get(name)
    }

    /// Latin-1 decoding of simple font codes.
    fn decode_text(&self, name: &[u8], bytes: &[u8]) -> Option<String> {
        let font = self.fonts.get(name)?;
        if font.composite {
            return None;
        }
        Some(bytes.iter().map(|&b| b as char).collect())
    }

    fn color_space(&self, name: &[u8]) -> Option<ColorSpace> {
        self.color_spaces.get(name).cloned()
    }

    fn form(&self, name: &[u8]) -> Option<FormXObject<'_>> {
        self.forms.get(name).map(|(operations, matrix)| FormXObject {
            operations: operations.clone(),
            matrix: *matrix,
            resources: None,
        })
    }
}

/// Resources of one page (or form) of a lopdf [`Document`].
pub struct PageResources<'a> {
    doc: &'a Document,
    dict: Option<&'a Dictionary>,
    fonts: BTreeMap<Vec<u8>, FontInfo>,
    encodings: BTreeMap<Vec<u8>, Encoding<'a>>,
}

impl<'a> PageResources<'a> {
    pub fn for_page(doc: &'a Document, page_id: ObjectId) -> lopdf::Result<Self> {
        let dict = match resolve_inherited(doc, page_id, b"Resources")? {
            Some(obj) => Some(resolve(doc, obj).as_dict()?),
            None => None,
        };
        Ok(Self::from_dict(doc, dict))
    }

    pub fn from_dict(doc: &'a Document, dict: Option<&'a Dictionary>) -> Self {
        let mut fonts = BTreeMap::new();
        let mut encodings = BTreeMap::new();

        let font_dict = dict
            .and_then(|d| d.get(b"Font").ok())
            .and_then(|o| resolve(doc, o).as_dict().ok());
        if let Some(font_dict) = font_dict {
            for (name, value) in font_dict.iter() {
                let Ok(font) = resolve(doc, value).as_dict() else {
                    warn!(target: PDF_RESOURCES, font = %String::from_utf8_lossy(name), "font resource is not a dictionary");
                    continue;
                };
                fonts.insert(name.clone(), FontInfo::from_dict(doc, font));
                match font.get_font_encoding(doc) {
                    Ok(encoding) => {
                        encodings.insert(name.clone(), encoding);
                    }
                    Err(e) => {
                        warn!(target: PDF_RESOURCES, font = %String::from_utf8_lossy(name), "no usable encoding: {}", e);
                    }
                }
            }
        }

        PageResources {
            doc,
            dict,
            fonts,
            encodings,
        }
    }

    fn category(&self, key: &[u8]) -> Option<&'a Dictionary> {
        let doc = self.doc;
        self.dict
            .and_then(|d| d.get(key).ok())
            .and_then(|o| resolve(doc, o).as_dict().ok())
    }
}

impl<'a> ResourceLookup for PageResources<'a> {
    fn font(&self, name: &[u8]) -> Option<&FontInfo> {
        self.fonts.get(name)
    }

    fn decode_text(&self, name: &[u8], bytes: &[u8]) -> Option<String> {
        let encoding = self.encodings.get(name)?;
        Document::decode_text(encoding, bytes).ok()
    }

    fn color_space(&self, name: &[u8]) -> Option<ColorSpace> {
        let obj = self.category(b"ColorSpace")?.get(name).ok()?;
        Some(color_space_from_object(self.doc, resolve(self.doc, obj)))
    }

    fn form(&self, name: &[u8]) -> Option<FormXObject<'_>> {
        let obj = self.category(b"XObject")?.get(name).ok()?;
        let stream = resolve(self.doc, obj).as_stream().ok()?;
        let subtype = stream.dict.get(b"Subtype").and_then(Object::as_name).ok()?;
        if subtype != b"Form" {
            return None;
        }

        let operations = match decode_stream(stream).and_then(|bytes| Content::decode(&bytes)) {
            Ok(content) => content.operations,
            Err(e) => {
                warn!(target: PDF_RESOURCES, xobject = %String::from_utf8_lossy(name), "failed to decode form content: {}", e);
                return None;
            }
        };
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| resolve(self.doc, o).as_array().ok())
            .and_then(|arr| {
                arr.iter()
                    .map(|o| operand_as_float(resolve(self.doc, o)))
                    .collect::<Option<Vec<f32>>>()
            })
            .and_then(|v| <[f32; 6]>::try_from(v).ok())
            .unwrap_or(IDENTITY);
        let resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(self.doc, o).as_dict().ok())
            .map(|d| Box::new(PageResources::from_dict(self.doc, Some(d))) as Box<dyn ResourceLookup + 'a>);

        Some(FormXObject {
            operations,
            matrix,
            resources,
        })
    }
}

fn color_space_from_object(doc: &Document, obj: &Object) -> ColorSpace {
    match obj {
        Object::Name(name) => ColorSpace::from_family(name, None),
        Object::Array(items) => {
            let family = items
                .first()
                .and_then(|o| resolve(doc, o).as_name().ok())
                .unwrap_or(b"");
            // ICCBased carries its component count as /N on the profile stream.
            let components = items
                .get(1)
                .and_then(|o| resolve(doc, o).as_stream().ok())
                .and_then(|s| s.dict.get(b"N").ok())
                .and_then(operand_as_float)
                .map(|n| n as usize);
            ColorSpace::from_family(family, components)
        }
        _ => ColorSpace::Other {
            family: String::new(),
            components: 1,
        },
    }
}

/// Decompresses a stream when it declares a filter.
pub fn decode_stream(stream: &Stream) -> lopdf::Result<Vec<u8>> {
    if stream.dict.get(b"Filter").is_ok() {
        stream.decompressed_content()
    } else {
        Ok(stream.content.clone())
    }
}

pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// Looks up `key` on the page dictionary, walking `/Parent` links. A cyclic
/// `/Parent` chain ends the walk as if the key were absent.
fn resolve_inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> lopdf::Result<Option<&'a Object>> {
    let mut visited = BTreeSet::new();
    let mut current_id = page_id;
    while visited.insert(current_id) {
        let dict = doc.get_dictionary(current_id)?;
        if let Ok(value) = dict.get(key) {
            return Ok(Some(value));
        }
        match dict.get(b"Parent") {
            Ok(parent) => current_id = parent.as_reference()?,
            Err(_) => return Ok(None),
        }
    }
    warn!(
        target: PDF_RESOURCES,
        page = ?page_id,
        key = %String::from_utf8_lossy(key),
        "cyclic /Parent chain; inherited value not found"
    );
    Ok(None)
}
