use lopdf::content::Operation;
use pretty_assertions::assert_eq;

use crate::setup::{n, name, op, operator_names, test_resources, text, text_object};

use pagewright::error::{InterpretError, MalformedOperator};
use pagewright::geo::{Point, Rect};
use pagewright::interpreter::{
    ContentHandler, Diagnostic, Glyph, Interpreter, InterpreterOptions, MalformedPolicy,
};
use pagewright::operator::PaintOp;
use pagewright::path::{Path, PathElement};
use pagewright::resources::{NoResources, StaticResources};
use pagewright::state::{ColorSpace, StateTracker};
use pagewright::SinkError;

#[derive(Default)]
struct Recorder {
    observed: Vec<String>,
    emitted: Vec<String>,
    glyphs: Vec<(Option<String>, Point)>,
    paths: Vec<(Vec<PathElement>, PaintOp)>,
    word_spacing_at_emit: Vec<f32>,
    clip_at_emit: Vec<Option<Rect>>,
    abort_on_malformed: bool,
}

impl ContentHandler for Recorder {
    fn observe(&mut self, op: &Operation, _state: &StateTracker) {
        self.observed.push(op.operator.clone());
    }

    fn emit(&mut self, op: &Operation, state: &StateTracker) -> Result<(), SinkError> {
        self.emitted.push(op.operator.clone());
        self.word_spacing_at_emit
            .push(state.current().text.word_spacing);
        self.clip_at_emit.push(state.current().clip);
        Ok(())
    }

    fn show_glyph(&mut self, glyph: &Glyph, _state: &StateTracker) {
        self.glyphs.push((glyph.text.clone(), glyph.origin()));
    }

    fn paint_path(&mut self, path: &Path, paint: PaintOp, _state: &StateTracker) {
        self.paths.push((path.elements().to_vec(), paint));
    }

    fn malformed(&mut self, _err: &MalformedOperator) -> Option<MalformedPolicy> {
        self.abort_on_malformed.then_some(MalformedPolicy::Abort)
    }
}

fn run(ops: &[Operation], resources: &StaticResources) -> (Recorder, Vec<Diagnostic>) {
    run_with(ops, resources, InterpreterOptions::default())
}

fn run_with(
    ops: &[Operation],
    resources: &StaticResources,
    options: InterpreterOptions,
) -> (Recorder, Vec<Diagnostic>) {
    let mut recorder = Recorder::default();
    let mut interpreter = Interpreter::new(&mut recorder, resources).with_options(options);
    interpreter.process(ops).unwrap();
    let diagnostics = interpreter.into_diagnostics();
    (recorder, diagnostics)
}

fn xs(recorder: &Recorder) -> Vec<f32> {
    recorder.glyphs.iter().map(|(_, p)| p.x).collect()
}

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-3,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_hooks_fire_once_per_top_level_token() {
    let ops = vec![
        op("BT", vec![]),
        op("Tf", vec![name("F1"), n(10.0)]),
        op("TL", vec![n(12.0)]),
        op("Td", vec![n(100.0), n(700.0)]),
        op("'", vec![text("quoted")]),
        op("\"", vec![n(2.0), n(1.0), text("double")]),
        op("TD", vec![n(0.0), n(-14.0)]),
        op("ET", vec![]),
    ];
    let (recorder, diagnostics) = run(&ops, &test_resources());

    let names = operator_names(&ops);
    assert_eq!(recorder.observed, names);
    assert_eq!(recorder.emitted, names);
    assert!(diagnostics.is_empty());
}

#[test]
fn test_quote_moves_to_next_line_before_showing() {
    let ops = vec![
        op("BT", vec![]),
        op("Tf", vec![name("F1"), n(10.0)]),
        op("TL", vec![n(14.0)]),
        op("Td", vec![n(100.0), n(700.0)]),
        op("'", vec![text("A")]),
        op("ET", vec![]),
    ];
    let (recorder, _) = run(&ops, &test_resources());

    assert_eq!(
        recorder.glyphs,
        vec![(Some("A".to_string()), Point::new(100.0, 686.0))]
    );
}

#[test]
fn test_double_quote_sets_spacing() {
    let ops = vec![
        op("BT", vec![]),
        op("Tf", vec![name("F1"), n(10.0)]),
        op("TL", vec![n(10.0)]),
        op("Td", vec![n(0.0), n(100.0)]),
        op("\"", vec![n(3.0), n(1.0), text("A B")]),
        op("ET", vec![]),
    ];
    let (recorder, _) = run(&ops, &test_resources());

    // A at 0; space after 5 + Tc 1; B after another 5 + Tc 1 + Tw 3.
    assert_eq!(xs(&recorder), vec![0.0, 6.0, 15.0]);
    assert_eq!(recorder.glyphs[0].1.y, 90.0);
    assert_eq!(recorder.word_spacing_at_emit[4], 3.0);
}

#[test]
fn test_glyph_advance_uses_widths_and_spacing() {
    let mut ops = text_object("AB", 10.0, 100.0, 700.0);
    ops.insert(2, op("Tc", vec![n(1.0)]));
    let (recorder, _) = run(&ops, &test_resources());

    assert_eq!(xs(&recorder), vec![100.0, 106.0]);
}

#[test]
fn test_horizontal_scaling_applies_to_advance() {
    let mut ops = text_object("AB", 10.0, 0.0, 0.0);
    ops.insert(2, op("Tz", vec![n(50.0)]));
    let (recorder, _) = run(&ops, &test_resources());

    assert_eq!(xs(&recorder), vec![0.0, 2.5]);
}

#[test]
fn test_tj_array_adjustments() {
    let ops = vec![
        op("BT", vec![]),
        op("Tf", vec![name("F1"), n(10.0)]),
        op("Td", vec![n(100.0), n(700.0)]),
        op(
            "TJ",
            vec![lopdf::Object::Array(vec![text("A"), n(-1000.0), text("B")])],
        ),
        op("ET", vec![]),
    ];
    let (recorder, _) = run(&ops, &test_resources());

    assert_eq!(xs(&recorder), vec![100.0, 115.0]);
}

#[test]
fn test_malformed_tj_array_shows_nothing() {
    let ops = vec![
        op("BT", vec![]),
        op("Tf", vec![name("F1"), n(10.0)]),
        op("Td", vec![n(100.0), n(700.0)]),
        op(
            "TJ",
            vec![lopdf::Object::Array(vec![text("abc"), name("X")])],
        ),
    ];
    let resources = test_resources();
    let mut recorder = Recorder::default();
    let mut interpreter = Interpreter::new(&mut recorder, &resources);
    interpreter.process(&ops).unwrap();

    assert_eq!(
        interpreter.state().text_matrix(),
        Some([1.0, 0.0, 0.0, 1.0, 100.0, 700.0])
    );
    assert!(matches!(
        interpreter.diagnostics(),
        [Diagnostic::Malformed(m)] if m.operator == "TJ" && m.index == 3
    ));
    drop(interpreter);
    assert!(recorder.glyphs.is_empty());
    assert_eq!(recorder.emitted, vec!["BT", "Tf", "Td", "TJ"]);
}

#[test]
fn test_unknown_font_has_zero_advance() {
    let ops = text_object("AB", 10.0, 20.0, 30.0);
    let mut recorder = Recorder::default();
    Interpreter::new(&mut recorder, &NoResources)
        .process(&ops)
        .unwrap();

    assert_eq!(
        recorder.glyphs,
        vec![(None, Point::new(20.0, 30.0)), (None, Point::new(20.0, 30.0))]
    );
}

#[test]
fn test_effective_font_size_includes_ctm() {
    struct FontSizes(Vec<f32>);
    impl ContentHandler for FontSizes {
        fn emit(&mut self, op: &Operation, state: &StateTracker) -> Result<(), SinkError> {
            if op.operator == "Tj" {
                self.0.push(state.effective_font_size().unwrap());
            }
            Ok(())
        }
    }

    let mut ops = vec![op("cm", vec![n(2.0), n(0.0), n(0.0), n(2.0), n(0.0), n(0.0)])];
    ops.extend(text_object("big", 12.0, 10.0, 10.0));
    ops.push(op("Tm", vec![n(0.5), n(0.0), n(0.0), n(0.5), n(0.0), n(0.0)]));

    let mut sizes = FontSizes(Vec::new());
    Interpreter::new(&mut sizes, &test_resources())
        .process(&ops)
        .unwrap();
    assert_eq!(sizes.0, vec![24.0]);
}

#[test]
fn test_save_restore_and_underflow() {
    let ops = vec![
        op("q", vec![]),
        op("cm", vec![n(1.0), n(0.0), n(0.0), n(1.0), n(50.0), n(50.0)]),
        op("Q", vec![]),
        op("Q", vec![]),
        op("m", vec![n(1.0), n(1.0)]),
    ];
    let mut recorder = Recorder::default();
    let mut interpreter = Interpreter::new(&mut recorder, &NoResources);
    interpreter.process(&ops).unwrap();

    assert_eq!(interpreter.state().current().ctm, [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    assert_eq!(interpreter.state().depth(), 0);
    assert_eq!(
        interpreter.state().current_point(),
        Some(Point::new(1.0, 1.0))
    );
    assert_eq!(
        interpreter.diagnostics(),
        &[Diagnostic::StackUnderflow { index: 3 }]
    );
    drop(interpreter);
    assert_eq!(recorder.emitted, vec!["q", "cm", "Q", "Q", "m"]);
}

#[test]
fn test_malformed_operator_is_skipped_and_forwarded() {
    let ops = vec![
        op("m", vec![n(1.0)]),
        op("w", vec![name("thick")]),
        op("w", vec![n(3.0)]),
    ];
    let mut recorder = Recorder::default();
    let mut interpreter = Interpreter::new(&mut recorder, &NoResources);
    interpreter.process(&ops).unwrap();

    assert_eq!(interpreter.state().current_point(), None);
    assert_eq!(interpreter.state().current().line_width, 3.0);
    let malformed: Vec<(String, usize)> = interpreter
        .diagnostics()
        .iter()
        .filter_map(|d| match d {
            Diagnostic::Malformed(m) => Some((m.operator.clone(), m.index)),
            _ => None,
        })
        .collect();
    assert_eq!(
        malformed,
        vec![("m".to_string(), 0), ("w".to_string(), 1)]
    );
    drop(interpreter);
    assert_eq!(recorder.emitted, vec!["m", "w", "w"]);
}

#[test]
fn test_malformed_operator_aborts_by_policy() {
    let ops = vec![op("BT", vec![]), op("Tf", vec![n(12.0)]), op("ET", vec![])];
    let options = InterpreterOptions {
        malformed_policy: MalformedPolicy::Abort,
        ..Default::default()
    };
    let mut recorder = Recorder::default();
    let err = Interpreter::new(&mut recorder, &NoResources)
        .with_options(options)
        .process(&ops)
        .unwrap_err();

    match &err {
        InterpretError::Malformed(m) => {
            assert_eq!(m.operator, "Tf");
            assert_eq!(m.index, 1);
            assert_eq!(
                err.to_string(),
                format!("malformed operator `Tf` at token 1: {}", m.reason)
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.operator(), Some("Tf"));
    assert_eq!(recorder.emitted, vec!["BT"]);
}

#[test]
fn test_malformed_operator_display() {
    let err = MalformedOperator {
        operator: "re".to_string(),
        index: 7,
        reason: "expected 4 operands, found 3".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "malformed operator `re` at token 7: expected 4 operands, found 3"
    );
    assert!(std::error::Error::source(&err).is_none());
}

#[test]
fn test_handler_can_abort_on_malformed() {
    let ops = vec![op("l", vec![n(5.0), n(5.0)]), op("S", vec![])];
    let mut recorder = Recorder {
        abort_on_malformed: true,
        ..Default::default()
    };
    let result = Interpreter::new(&mut recorder, &NoResources).process(&ops);

    assert!(matches!(result, Err(InterpretError::Malformed(_))));
    assert!(recorder.emitted.is_empty());
}

#[test]
fn test_unknown_operator_passes_through() {
    let ops = vec![op("zz", vec![n(1.0)]), op("BX", vec![]), op("EX", vec![])];
    let (recorder, diagnostics) = run(&ops, &test_resources());

    assert_eq!(recorder.emitted, vec!["zz", "BX", "EX"]);
    assert!(diagnostics.is_empty());
}

#[test]
fn test_colors() {
    let ops = vec![
        op("g", vec![n(0.5)]),
        op("RG", vec![n(1.0), n(0.0), n(0.0)]),
        op("cs", vec![name("DeviceCMYK")]),
        op("CS", vec![name("CS0")]),
        op("SC", vec![n(0.25)]),
    ];
    let resources = test_resources().with_color_space("CS0", ColorSpace::DeviceGray);
    let mut recorder = Recorder::default();
    let mut interpreter = Interpreter::new(&mut recorder, &resources);
    interpreter.process(&ops).unwrap();

    let state = interpreter.state().current();
    assert_eq!(state.non_stroking_color.space, ColorSpace::DeviceCmyk);
    assert_eq!(state.non_stroking_color.components, vec![0.0, 0.0, 0.0, 1.0]);
    assert_eq!(state.stroking_color.space, ColorSpace::DeviceGray);
    assert_eq!(state.stroking_color.components, vec![0.25]);
}

#[test]
fn test_pattern_color() {
    let ops = vec![op("cs", vec![name("Pattern")]), op("scn", vec![name("P1")])];
    let mut recorder = Recorder::default();
    let mut interpreter = Interpreter::new(&mut recorder, &NoResources);
    interpreter.process(&ops).unwrap();

    let color = &interpreter.state().current().non_stroking_color;
    assert_eq!(color.space, ColorSpace::Pattern);
    assert_eq!(color.pattern.as_deref(), Some("P1"));
    assert!(color.components.is_empty());
}

#[test]
fn test_paths_are_reported_in_user_space_and_cleared() {
    let ops = vec![
        op("cm", vec![n(1.0), n(0.0), n(0.0), n(1.0), n(10.0), n(20.0)]),
        op("re", vec![n(0.0), n(0.0), n(5.0), n(5.0)]),
        op("f", vec![]),
        op("m", vec![n(0.0), n(0.0)]),
        op("l", vec![n(1.0), n(0.0)]),
        op("s", vec![]),
    ];
    let mut recorder = Recorder::default();
    let mut interpreter = Interpreter::new(&mut recorder, &NoResources);
    interpreter.process(&ops).unwrap();
    assert!(interpreter.state().path().is_empty());
    drop(interpreter);

    assert_eq!(recorder.paths.len(), 2);
    let (rect, paint) = &recorder.paths[0];
    assert_eq!(*paint, PaintOp::Fill { even_odd: false });
    assert_eq!(
        rect,
        &vec![PathElement::Rectangle {
            corners: [
                Point::new(10.0, 20.0),
                Point::new(15.0, 20.0),
                Point::new(15.0, 25.0),
                Point::new(10.0, 25.0),
            ],
        }]
    );

    // `s` closes the subpath before stroking.
    let (line, paint) = &recorder.paths[1];
    assert_eq!(*paint, PaintOp::Stroke);
    assert_eq!(line.len(), 2);
    assert_eq!(line[1].line_delta(), Some((-1.0, 0.0)));
}

#[test]
fn test_clip_applies_when_path_is_consumed() {
    let ops = vec![
        op("re", vec![n(10.0), n(10.0), n(100.0), n(50.0)]),
        op("W", vec![]),
        op("n", vec![]),
    ];
    let (recorder, _) = run(&ops, &test_resources());

    assert_eq!(
        recorder.clip_at_emit,
        vec![None, None, Some(Rect::new(10.0, 10.0, 110.0, 60.0))]
    );
    assert_eq!(recorder.paths[0].1, PaintOp::EndPath);
}

#[test]
fn test_forms_are_opaque_by_default() {
    let resources = test_resources().with_form(
        "Fm1",
        text_object("X", 10.0, 0.0, 0.0),
        [1.0, 0.0, 0.0, 1.0, 50.0, 60.0],
    );
    let ops = vec![op("Do", vec![name("Fm1")])];
    let (recorder, _) = run(&ops, &resources);

    assert_eq!(recorder.emitted, vec!["Do"]);
    assert!(recorder.glyphs.is_empty());
}

#[test]
fn test_descending_into_forms() {
    let resources = test_resources().with_form(
        "Fm1",
        text_object("X", 10.0, 1.0, 2.0),
        [1.0, 0.0, 0.0, 1.0, 50.0, 60.0],
    );
    let ops = vec![op("q", vec![]), op("Do", vec![name("Fm1")]), op("Q", vec![])];
    let options = InterpreterOptions {
        descend_forms: true,
        ..Default::default()
    };
    let (recorder, diagnostics) = run_with(&ops, &resources, options);

    assert_eq!(recorder.observed, vec!["q", "Do", "Q"]);
    assert_eq!(recorder.emitted, vec!["q", "Do", "Q"]);
    assert_eq!(
        recorder.glyphs,
        vec![(Some("X".to_string()), Point::new(51.0, 62.0))]
    );
    assert!(diagnostics.is_empty());
}

#[test]
fn test_recursive_form_hits_depth_limit() {
    let resources =
        test_resources().with_form("Fm1", vec![op("Do", vec![name("Fm1")])], [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    let options = InterpreterOptions {
        descend_forms: true,
        max_form_depth: 4,
        ..Default::default()
    };
    let mut recorder = Recorder::default();
    let result = Interpreter::new(&mut recorder, &resources)
        .with_options(options)
        .process(&[op("Do", vec![name("Fm1")])]);

    assert!(matches!(result, Err(InterpretError::FormDepth(4))));
}

#[test]
fn test_text_origin_follows_rise() {
    let mut ops = text_object("A", 10.0, 0.0, 0.0);
    ops.insert(2, op("Ts", vec![n(3.0)]));
    let (recorder, _) = run(&ops, &test_resources());

    assert_close(recorder.glyphs[0].1.y, 3.0);
}
