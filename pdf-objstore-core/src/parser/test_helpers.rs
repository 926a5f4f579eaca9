//! Helper functions for creating valid test PDFs with correct offsets

use super::objects::ObjectId;
use super::store::ObjectStore;
use super::xref_table::XRefTable;
use super::ParseOptions;

const HEADER: &[u8] = b"%PDF-1.7\n";

/// Header plus `N G obj ... endobj` for each object; returns the bytes and
/// the offset of every object in input order
pub fn object_body(objects: &[(u32, u16, &str)]) -> (Vec<u8>, Vec<u64>) {
    let mut data = HEADER.to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (number, generation, body) in objects {
        offsets.push(data.len() as u64);
        data.extend_from_slice(format!("{number} {generation} obj\n{body}\nendobj\n").as_bytes());
    }
    (data, offsets)
}

/// A store whose table already knows every object's offset
pub fn store_with_objects(objects: &[(u32, u16, &str)]) -> ObjectStore {
    let (data, offsets) = object_body(objects);
    let table = XRefTable::default();
    for ((number, generation, _), offset) in objects.iter().zip(offsets) {
        table.register(ObjectId::new(*number, *generation), offset);
    }
    ObjectStore::new(data, table, ParseOptions::lenient())
}

/// A complete single-section file with a classic xref table. Object
/// numbers must be listed in ascending order; gaps become free entries.
pub fn classic_pdf(objects: &[(u32, &str)], trailer_extra: &str) -> Vec<u8> {
    let numbered: Vec<(u32, u16, &str)> = objects.iter().map(|&(n, body)| (n, 0, body)).collect();
    let (mut data, offsets) = object_body(&numbered);
    let size = objects.last().map_or(1, |&(n, _)| n + 1);

    let xref_offset = data.len();
    let mut xref = format!("xref\n0 {size}\n0000000000 65535 f \n");
    for number in 1..size {
        match objects.iter().position(|&(n, _)| n == number) {
            Some(i) => xref.push_str(&format!("{:010} 00000 n \n", offsets[i])),
            None => xref.push_str("0000000000 00001 f \n"),
        }
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {size} {trailer_extra} >>\nstartxref\n{xref_offset}\n%%EOF\n"
    ));
    data.extend_from_slice(xref.as_bytes());
    data
}

/// Catalog, a Pages node with `page_count` leaf pages, classic table
pub fn create_pdf_with_pages(page_count: u32) -> Vec<u8> {
    let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 3 + i)).collect();
    let catalog = "<< /Type /Catalog /Pages 2 0 R >>".to_string();
    let pages = format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        page_count
    );
    let leaves: Vec<String> = (0..page_count)
        .map(|_| "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_string())
        .collect();

    let mut objects: Vec<(u32, &str)> = vec![(1, catalog.as_str()), (2, pages.as_str())];
    for (i, leaf) in leaves.iter().enumerate() {
        objects.push((3 + i as u32, leaf.as_str()));
    }
    classic_pdf(&objects, "/Root 1 0 R")
}

/// Creates a minimal valid PDF with correct xref offsets
pub fn create_minimal_pdf() -> Vec<u8> {
    create_pdf_with_pages(0)
}
