//! Object resolution benchmarks
//!
//! Compares first-time resolution (parse from the file bytes) with cached
//! lookups, plus the cost of opening the file.
//!
//! Run with: `cargo bench --bench resolve_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pdf_objstore::{ObjectId, PdfDocument};

const OBJECTS: u32 = 500;

/// Catalog, empty page tree and `OBJECTS` dictionaries from object 10 on
fn classic_file() -> Vec<u8> {
    let mut data = b"%PDF-1.7\n".to_vec();
    let mut offsets = Vec::new();
    let mut push = |data: &mut Vec<u8>, number: u32, body: String| {
        offsets.push((number, data.len()));
        data.extend_from_slice(format!("{number} 0 obj\n{body}\nendobj\n").as_bytes());
    };
    push(&mut data, 1, "<< /Type /Catalog /Pages 2 0 R >>".to_string());
    push(&mut data, 2, "<< /Type /Pages /Kids [] /Count 0 >>".to_string());
    for n in 0..OBJECTS {
        push(
            &mut data,
            10 + n,
            format!("<< /Index {n} /Name /Object{n} /Array [1 2 3 (text)] >>"),
        );
    }

    let size = 10 + OBJECTS;
    let xref_offset = data.len();
    let mut xref = format!("xref\n0 {size}\n");
    for number in 0..size {
        match offsets.iter().find(|(n, _)| *n == number) {
            Some((_, offset)) => xref.push_str(&format!("{offset:010} 00000 n \n")),
            None if number == 0 => xref.push_str("0000000000 65535 f \n"),
            None => xref.push_str("0000000000 00001 f \n"),
        }
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {size} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n"
    ));
    data.extend_from_slice(xref.as_bytes());
    data
}

fn bench_resolution(c: &mut Criterion) {
    let data = classic_file();
    let mut group = c.benchmark_group("resolve");

    group.bench_function(BenchmarkId::new("uncached", OBJECTS), |b| {
        let document = PdfDocument::from_bytes(data.clone()).expect("valid file");
        b.iter(|| {
            document.store().flush_cache();
            for n in 0..OBJECTS {
                black_box(document.resolve(ObjectId::new(10 + n, 0)).expect("resolves"));
            }
        })
    });

    group.bench_function(BenchmarkId::new("cached", OBJECTS), |b| {
        let document = PdfDocument::from_bytes(data.clone()).expect("valid file");
        for n in 0..OBJECTS {
            document.resolve(ObjectId::new(10 + n, 0)).expect("resolves");
        }
        b.iter(|| {
            for n in 0..OBJECTS {
                black_box(document.resolve(ObjectId::new(10 + n, 0)).expect("resolves"));
            }
        })
    });

    group.bench_function("open", |b| {
        b.iter(|| black_box(PdfDocument::from_bytes(data.clone()).expect("valid file")))
    });

    group.finish();
}

criterion_group!(benches, bench_resolution);
criterion_main!(benches);
