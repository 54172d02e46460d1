use lopdf::Object;
use pretty_assertions::assert_eq;

use crate::setup::{
    build_document, check_mark, checkbox_frame, name, op, operator_names, page_object,
    page_operations, text_object, tokens,
};

use pagewright::config::{parse_config, EditorConfig};
use pagewright::error::{EditError, InterpretError};
use pagewright::geo::Rect;
use pagewright::interpreter::{InterpreterOptions, MalformedPolicy};
use pagewright::rewriter::{
    IdentityRewriter, LargeTextRemover, RegionSplitter, SearchTextRemover, TextRemover,
};
use pagewright::{find_checkboxes, PageEditor};

fn two_page_document() -> lopdf::Document {
    let mut first = text_object("Hello", 12.0, 100.0, 700.0);
    first.extend(text_object("Heading", 36.0, 100.0, 750.0));
    first.push(op("Do", vec![name("Fm1")]));
    build_document(vec![first, text_object("Second", 12.0, 72.0, 72.0)])
}

#[test]
fn test_edit_page_replaces_content() {
    let mut doc = two_page_document();
    let mut remover = TextRemover::new();
    let diagnostics = PageEditor::new(&mut doc)
        .edit_page(1, &mut remover)
        .unwrap();

    assert!(diagnostics.is_empty());
    assert_eq!(remover.removed(), 2);
    assert_eq!(
        operator_names(&page_operations(&doc, 1)),
        vec!["BT", "Tf", "Td", "ET", "BT", "Tf", "Td", "ET", "Do"]
    );
    assert_eq!(
        operator_names(&page_operations(&doc, 2)),
        vec!["BT", "Tf", "Td", "Tj", "ET"]
    );
}

#[test]
fn test_edited_content_is_compressed_by_default() {
    let repeated: Vec<_> = (0..200)
        .flat_map(|_| checkbox_frame(10.0, 10.0))
        .collect();
    let mut doc = build_document(vec![vec![], repeated]);
    PageEditor::new(&mut doc)
        .edit_page(2, &mut IdentityRewriter)
        .unwrap();

    let page = doc.get_dictionary(page_object(&doc, 2)).unwrap();
    let contents_id = page.get(b"Contents").and_then(Object::as_reference).unwrap();
    let stream = doc.get_object(contents_id).and_then(Object::as_stream).unwrap();
    assert_eq!(stream.dict.get(b"Filter").and_then(Object::as_name).unwrap(), b"FlateDecode");
}

#[test]
fn test_uncompressed_output() {
    let mut doc = two_page_document();
    PageEditor::new(&mut doc)
        .with_compression(false)
        .edit_page(2, &mut IdentityRewriter)
        .unwrap();

    let page = doc.get_dictionary(page_object(&doc, 2)).unwrap();
    let contents_id = page.get(b"Contents").and_then(Object::as_reference).unwrap();
    let stream = doc.get_object(contents_id).and_then(Object::as_stream).unwrap();
    assert!(stream.dict.get(b"Filter").is_err());
}

#[test]
fn test_search_uses_document_font_encoding() {
    let mut doc = two_page_document();
    let mut remover = SearchTextRemover::new("Hello");
    PageEditor::new(&mut doc)
        .edit_page(1, &mut remover)
        .unwrap();

    assert_eq!(remover.removed(), 1);
    let shown: Vec<String> = page_operations(&doc, 1)
        .iter()
        .filter(|o| o.operator == "Tj")
        .map(|o| format!("{:?}", o.operands))
        .collect();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].contains("Heading"));
}

#[test]
fn test_large_text_remover_on_document() {
    let mut doc = two_page_document();
    let mut remover = LargeTextRemover::new(20.0);
    PageEditor::new(&mut doc)
        .edit_page(1, &mut remover)
        .unwrap();

    assert_eq!(remover.removed(), 1);
}

#[test]
fn test_split_page_installs_contents_array() {
    let mut doc = two_page_document();
    let mut splitter = RegionSplitter::new(vec![Rect::new(0.0, 600.0, 300.0, 720.0)]);
    PageEditor::new(&mut doc)
        .split_page(1, &mut splitter, 1)
        .unwrap();

    let page = doc.get_dictionary(page_object(&doc, 1)).unwrap();
    let contents = page.get(b"Contents").and_then(Object::as_array).unwrap();
    assert_eq!(contents.len(), 2);
    assert!(contents.iter().all(|c| c.as_reference().is_ok()));

    let ops = page_operations(&doc, 1);
    let tj_count = ops.iter().filter(|o| o.operator == "Tj").count();
    assert_eq!(tj_count, 2);
    assert_eq!(ops.last().map(|o| o.operator.as_str()), Some("Q"));
}

#[test]
fn test_edit_all_identity() {
    let mut doc = two_page_document();
    let before: Vec<_> = (1..=2).map(|p| tokens(&page_operations(&doc, p))).collect();

    let diagnostics = PageEditor::new(&mut doc)
        .edit_all(|_| IdentityRewriter)
        .unwrap();

    assert_eq!(diagnostics.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    let after: Vec<_> = (1..=2).map(|p| tokens(&page_operations(&doc, p))).collect();
    assert_eq!(after, before);
}

#[test]
fn test_edit_all_reports_diagnostics_per_page() {
    let mut doc = build_document(vec![
        vec![op("Q", vec![])],
        vec![op("Tf", vec![name("F1")])],
    ]);

    let diagnostics = PageEditor::new(&mut doc)
        .edit_all(|_| IdentityRewriter)
        .unwrap();

    assert_eq!(diagnostics[&1].len(), 1);
    assert_eq!(diagnostics[&2].len(), 1);
    assert_eq!(operator_names(&page_operations(&doc, 2)), vec!["Tf"]);
}

#[test]
fn test_failed_page_leaves_document_untouched() {
    let mut doc = build_document(vec![
        text_object("fine", 12.0, 10.0, 10.0),
        vec![op("Tf", vec![name("F1")])],
    ]);
    let before = tokens(&page_operations(&doc, 1));

    let result = PageEditor::new(&mut doc)
        .with_options(InterpreterOptions {
            malformed_policy: MalformedPolicy::Abort,
            ..Default::default()
        })
        .edit_all(|_| TextRemover::new());

    match result {
        Err(EditError::Page {
            page,
            operator,
            source: InterpretError::Malformed(_),
        }) => {
            assert_eq!(page, 2);
            assert_eq!(operator.as_deref(), Some("Tf"));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(tokens(&page_operations(&doc, 1)), before);
}

#[test]
fn test_page_not_found() {
    let mut doc = two_page_document();
    let result = PageEditor::new(&mut doc).edit_page(7, &mut IdentityRewriter);
    assert!(matches!(result, Err(EditError::PageNotFound(7))));
}

#[test]
fn test_find_checkboxes_per_page() {
    let mut first = checkbox_frame(100.0, 100.0);
    first.extend(check_mark(100.0, 100.0));
    first.extend(checkbox_frame(100.0, 200.0));
    let doc = build_document(vec![first, text_object("none", 12.0, 0.0, 0.0)]);

    let found = find_checkboxes(&doc, &InterpreterOptions::default()).unwrap();

    assert_eq!(found.len(), 2);
    let checked: Vec<bool> = found[&1].iter().map(|b| b.checked).collect();
    assert_eq!(checked, vec![true, false]);
    assert!(found[&2].is_empty());
}

#[test]
fn test_config_defaults() {
    let config = parse_config("{}").unwrap();
    assert_eq!(config, EditorConfig::default());
    assert!(config.compress);
    assert_eq!(config.max_font_size, 20.0);
    assert_eq!(config.interpreter.malformed_policy, MalformedPolicy::Skip);
    assert!(!config.interpreter.descend_forms);
}

#[test]
fn test_config_overrides() {
    let config = parse_config(
        r#"{
            "interpreter": { "malformed_policy": "abort", "descend_forms": true },
            "compress": false,
            "regions": [{ "x0": 0, "y0": 0, "x1": 300, "y1": 400 }]
        }"#,
    )
    .unwrap();

    assert_eq!(config.interpreter.malformed_policy, MalformedPolicy::Abort);
    assert!(config.interpreter.descend_forms);
    assert_eq!(config.interpreter.max_form_depth, 12);
    assert!(!config.compress);
    assert_eq!(config.regions, vec![Rect::new(0.0, 0.0, 300.0, 400.0)]);
}

#[test]
fn test_config_rejects_unknown_policy() {
    assert!(parse_config(r#"{ "interpreter": { "malformed_policy": "panic" } }"#).is_err());
}
