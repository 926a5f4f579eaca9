//! Opening damaged files: repair strategies and the full-file recovery scan

mod common;

use common::{add_page_tree, pdf_with_pages, PdfBuilder};
use pdf_objstore::parser::{ParseError, ParseOptions, PdfDocument};
use pdf_objstore::ObjectId;

fn id(number: u32) -> ObjectId {
    ObjectId::new(number, 0)
}

fn replace_once(data: &mut Vec<u8>, from: &[u8], to: &[u8]) {
    let at = data
        .windows(from.len())
        .rposition(|w| w == from)
        .expect("pattern present");
    data.splice(at..at + from.len(), to.iter().copied());
}

#[test]
fn test_catalog_without_trailer_synthesizes_root() {
    let data = b"%PDF-1.4\n\
        5 0 obj << /Type /Catalog /Pages 6 0 R >> endobj\n\
        6 0 obj << /Type /Pages /Kids [] /Count 0 >> endobj\n"
        .to_vec();

    let document = PdfDocument::from_bytes(data).unwrap();
    assert!(document.was_recovered());
    assert_eq!(document.trailer().root().unwrap(), id(5));
    assert!(document.trailer().size().unwrap() >= 7);
    assert_eq!(document.page_count().unwrap(), 0);
}

#[test]
fn test_strict_mode_does_not_scan() {
    let data = b"%PDF-1.4\n5 0 obj << /Type /Catalog /Pages 6 0 R >> endobj\n".to_vec();
    let result = PdfDocument::from_bytes_with_options(data, ParseOptions::strict());
    assert!(matches!(result, Err(ParseError::InvalidXRef(_))));
}

#[test]
fn test_nothing_recoverable_fails_to_open() {
    let data = b"%PDF-1.7\nthis file has no objects at all\n".to_vec();
    assert!(matches!(
        PdfDocument::from_bytes(data),
        Err(ParseError::InvalidTrailer)
    ));
}

#[test]
fn test_truncated_footer_uses_trailer_keyword() {
    let mut data = pdf_with_pages(2);
    let footer = data
        .windows(9)
        .rposition(|w| w == b"startxref")
        .unwrap();
    data.truncate(footer);

    let document = PdfDocument::from_bytes(data).unwrap();
    assert!(document.was_recovered());
    assert_eq!(document.trailer().root().unwrap(), id(1));
    assert_eq!(document.page_count().unwrap(), 2);
}

#[test]
fn test_startxref_past_end_falls_back_to_last_xref_keyword() {
    let mut data = pdf_with_pages(1);
    let footer = data
        .windows(9)
        .rposition(|w| w == b"startxref")
        .unwrap();
    data.truncate(footer);
    data.extend_from_slice(b"startxref\n99999999\n%%EOF\n");

    let document = PdfDocument::from_bytes(data.clone()).unwrap();
    assert!(!document.was_recovered());
    assert_eq!(document.page_count().unwrap(), 1);

    assert!(PdfDocument::from_bytes_with_options(data, ParseOptions::strict()).is_err());
}

#[test]
fn test_corrupt_xref_stream_triggers_scan() {
    let mut builder = PdfBuilder::new("1.5");
    builder.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>");
    builder.object(2, 0, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    builder.object_stream(10, &[(3, "<< /Type /Page /Parent 2 0 R >>")]);
    builder.xref_stream(11, "/Root 1 0 R");
    let mut data = builder.build();
    replace_once(&mut data, b"/W [1 4 2]", b"/W [1 4 9]");

    let document = PdfDocument::from_bytes(data).unwrap();
    assert!(document.was_recovered());
    // The trailer comes from the cross-reference stream dictionary
    assert_eq!(document.trailer().dict().get_type(), Some("XRef"));
    assert_eq!(document.page_count().unwrap(), 1);
    // Object stream members are reachable after recovery
    let page = document.resolve(id(3)).unwrap();
    assert_eq!(page.as_dict().unwrap().get_type(), Some("Page"));
}

#[test]
fn test_recovery_prefers_later_copies() {
    let mut builder = PdfBuilder::new("1.7");
    add_page_tree(&mut builder, 1);
    builder.object(4, 0, "(old)");
    builder.classic_xref("/Root 1 0 R");
    builder.object(4, 0, "(new)");
    let mut data = builder.build();
    // No footer for the update, and the original one is broken too
    replace_once(&mut data, b"startxref", b"startxrex");

    let document = PdfDocument::from_bytes(data).unwrap();
    assert!(document.was_recovered());
    let value = document.resolve(id(4)).unwrap();
    assert_eq!(value.as_string().unwrap().as_bytes(), b"new");
}

#[test]
fn test_damaged_older_section_is_dropped_in_lenient_mode() {
    let mut builder = PdfBuilder::new("1.7");
    add_page_tree(&mut builder, 1);
    builder.classic_xref("/Root 1 0 R");
    builder.object(3, 0, "<< /Type /Page /Parent 2 0 R /Rotate 90 >>");
    builder.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>");
    builder.object(2, 0, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    builder.classic_xref("/Root 1 0 R");
    let mut data = builder.build();
    // Break the first section's keyword
    let first_xref = data.windows(5).position(|w| w == b"xref\n").unwrap();
    data[first_xref] = b'X';

    let document = PdfDocument::from_bytes(data.clone()).unwrap();
    assert!(!document.was_recovered());
    assert_eq!(document.trailers().len(), 1);
    assert_eq!(document.page_count().unwrap(), 1);

    assert!(PdfDocument::from_bytes_with_options(data, ParseOptions::strict()).is_err());
}

#[test]
fn test_missing_header_is_tolerated_in_lenient_mode() {
    let mut data = pdf_with_pages(1);
    data[..5].copy_from_slice(b"%ABC-");

    let document = PdfDocument::from_bytes(data.clone()).unwrap();
    assert_eq!(document.version(), None);
    assert_eq!(document.page_count().unwrap(), 1);

    assert!(matches!(
        PdfDocument::from_bytes_with_options(data, ParseOptions::strict()),
        Err(ParseError::InvalidHeader)
    ));
}

#[test]
fn test_offsets_count_from_file_start_after_preamble() {
    let mut builder = PdfBuilder::with_preamble(b"MIME junk\r\n", "1.6");
    add_page_tree(&mut builder, 2);
    builder.classic_xref("/Root 1 0 R");

    let document =
        PdfDocument::from_bytes_with_options(builder.build(), ParseOptions::strict()).unwrap();
    assert_eq!(document.header().unwrap().offset, 11);
    assert!(!document.was_recovered());
    assert_eq!(document.page_count().unwrap(), 2);
    assert!(document.resolve(id(4)).unwrap().as_dict().is_some());
}
