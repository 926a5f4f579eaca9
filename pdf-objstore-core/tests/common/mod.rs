//! PDF builder shared by the integration tests.
//!
//! Objects are appended to a pending section; each `*_xref` call writes the
//! section, its trailer and a `startxref` footer. Calling another `*_xref`
//! afterwards appends an incremental update chained through `/Prev`.

#![allow(dead_code)]

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
enum Entry {
    Offset { generation: u16, offset: u64 },
    Compressed { container: u32, index: u32 },
    Free { generation: u16 },
}

pub struct PdfBuilder {
    data: Vec<u8>,
    pending: BTreeMap<u32, Entry>,
    last_xref: Option<u64>,
    max_number: u32,
}

impl PdfBuilder {
    pub fn new(version: &str) -> Self {
        Self {
            data: format!("%PDF-{version}\n").into_bytes(),
            pending: BTreeMap::new(),
            last_xref: None,
            max_number: 0,
        }
    }

    /// Start the file with `preamble` ahead of the header
    pub fn with_preamble(preamble: &[u8], version: &str) -> Self {
        let mut builder = Self::new(version);
        builder.data.splice(0..0, preamble.iter().copied());
        builder
    }

    /// Offset the next appended byte will have
    pub fn position(&self) -> u64 {
        self.data.len() as u64
    }

    /// Append raw bytes (junk, comments, damaged fragments)
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Append a hand-written `N 0 obj ... endobj` and register it
    pub fn raw_object(&mut self, number: u32, bytes: &[u8]) -> u64 {
        let offset = self.position();
        self.data.extend_from_slice(bytes);
        self.record(
            number,
            Entry::Offset {
                generation: 0,
                offset,
            },
        );
        offset
    }

    /// Append `N G obj body endobj`
    pub fn object(&mut self, number: u32, generation: u16, body: &str) -> u64 {
        let offset = self.position();
        self.data
            .extend_from_slice(format!("{number} {generation} obj\n{body}\nendobj\n").as_bytes());
        self.record(number, Entry::Offset { generation, offset });
        offset
    }

    /// Append an unfiltered stream object; `/Length` is added
    pub fn stream(&mut self, number: u32, dict_entries: &str, content: &[u8]) -> u64 {
        let offset = self.position();
        self.data.extend_from_slice(
            format!(
                "{number} 0 obj\n<< {dict_entries} /Length {} >>\nstream\n",
                content.len()
            )
            .as_bytes(),
        );
        self.data.extend_from_slice(content);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
        self.record(
            number,
            Entry::Offset {
                generation: 0,
                offset,
            },
        );
        offset
    }

    /// Append an object stream holding `members` and register each member
    /// as compressed
    pub fn object_stream(&mut self, number: u32, members: &[(u32, &str)]) -> u64 {
        self.object_stream_with(number, members, "")
    }

    /// Like [`object_stream`](Self::object_stream) with extra dictionary
    /// entries such as `/Extends`
    pub fn object_stream_with(&mut self, number: u32, members: &[(u32, &str)], extra: &str) -> u64 {
        let mut header = String::new();
        let mut body = String::new();
        for (member, content) in members {
            header.push_str(&format!("{} {} ", member, body.len()));
            body.push_str(content);
            body.push('\n');
        }
        let first = header.len();
        let content = format!("{header}{body}");
        let dict = format!(
            "/Type /ObjStm /N {} /First {} {}",
            members.len(),
            first,
            extra
        );
        let offset = self.stream(number, &dict, content.as_bytes());
        for (index, (member, _)) in members.iter().enumerate() {
            self.record(
                *member,
                Entry::Compressed {
                    container: number,
                    index: index as u32,
                },
            );
        }
        offset
    }

    /// Point `number` at member `index` of `container`, whatever the
    /// container's own header lists there
    pub fn compressed(&mut self, number: u32, container: u32, index: u32) -> &mut Self {
        self.record(number, Entry::Compressed { container, index });
        self
    }

    /// Mark `number` free in the next section
    pub fn free(&mut self, number: u32, generation: u16) -> &mut Self {
        self.record(number, Entry::Free { generation });
        self
    }

    /// Write a classic table for the pending entries. Compressed entries
    /// have no classic form and are listed as free.
    pub fn classic_xref(&mut self, trailer_extra: &str) -> u64 {
        let offset = self.position();
        let entries = self.take_entries();
        let mut xref = String::from("xref\n");
        for run in runs(&entries) {
            xref.push_str(&format!("{} {}\n", run[0].0, run.len()));
            for (_, entry) in run {
                let line = match entry {
                    Entry::Offset { generation, offset } => {
                        format!("{offset:010} {generation:05} n \n")
                    }
                    Entry::Free { generation } => format!("0000000000 {generation:05} f \n"),
                    Entry::Compressed { .. } => "0000000000 00000 f \n".to_string(),
                };
                xref.push_str(&line);
            }
        }
        xref.push_str(&format!("trailer\n{}\n", self.trailer(trailer_extra)));
        self.data.extend_from_slice(xref.as_bytes());
        self.footer(offset);
        offset
    }

    /// Write a cross-reference stream object `number` (`/W [1 4 2]`) for
    /// the pending entries plus itself
    pub fn xref_stream(&mut self, number: u32, trailer_extra: &str) -> u64 {
        let offset = self.position();
        self.record(
            number,
            Entry::Offset {
                generation: 0,
                offset,
            },
        );
        let entries = self.take_entries();
        self.write_xref_stream(number, &entries, trailer_extra);
        self.footer(offset);
        offset
    }

    /// Write a hybrid update: a cross-reference stream `stream_number`
    /// holding only the compressed entries, then a classic table holding
    /// the rest with `/XRefStm` pointing at the stream
    pub fn hybrid_xref(&mut self, stream_number: u32, trailer_extra: &str) -> u64 {
        self.hybrid_xref_with(stream_number, trailer_extra, &[])
    }

    /// Like [`hybrid_xref`](Self::hybrid_xref), with `(number, container,
    /// index)` entries listed in the stream only, alongside whatever the
    /// classic table says about the same numbers
    pub fn hybrid_xref_with(
        &mut self,
        stream_number: u32,
        trailer_extra: &str,
        stream_only: &[(u32, u32, u32)],
    ) -> u64 {
        let stream_offset = self.position();
        let mut compressed: BTreeMap<u32, Entry> = self
            .pending
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Compressed { .. }))
            .map(|(&number, &entry)| (number, entry))
            .collect();
        for &(number, container, index) in stream_only {
            compressed.insert(number, Entry::Compressed { container, index });
        }
        let compressed: Vec<(u32, Entry)> = compressed.into_iter().collect();
        let saved_prev = self.last_xref.take();
        self.write_xref_stream(stream_number, &compressed, "");
        self.last_xref = saved_prev;
        self.record(
            stream_number,
            Entry::Offset {
                generation: 0,
                offset: stream_offset,
            },
        );
        self.classic_xref(&format!("/XRefStm {stream_offset} {trailer_extra}"))
    }

    /// Finished file
    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn record(&mut self, number: u32, entry: Entry) {
        self.max_number = self.max_number.max(number);
        self.pending.insert(number, entry);
    }

    fn take_entries(&mut self) -> Vec<(u32, Entry)> {
        let mut entries: Vec<(u32, Entry)> = std::mem::take(&mut self.pending).into_iter().collect();
        if self.last_xref.is_none() && entries.first().map(|(n, _)| *n) != Some(0) {
            entries.insert(0, (0, Entry::Free { generation: 65535 }));
        }
        entries
    }

    fn trailer(&self, extra: &str) -> String {
        let prev = self
            .last_xref
            .map(|offset| format!("/Prev {offset} "))
            .unwrap_or_default();
        format!("<< /Size {} {prev}{extra} >>", self.max_number + 1)
    }

    fn write_xref_stream(&mut self, number: u32, entries: &[(u32, Entry)], extra: &str) {
        let mut records = Vec::new();
        let mut index = String::new();
        for run in runs(entries) {
            index.push_str(&format!("{} {} ", run[0].0, run.len()));
            for (_, entry) in run {
                let (kind, field2, field3) = match *entry {
                    Entry::Offset { generation, offset } => (1u8, offset as u32, generation),
                    Entry::Compressed { container, index } => (2u8, container, index as u16),
                    Entry::Free { generation } => (0u8, 0, generation),
                };
                records.push(kind);
                records.extend_from_slice(&field2.to_be_bytes());
                records.extend_from_slice(&field3.to_be_bytes());
            }
        }
        let trailer = self.trailer(extra);
        let trailer_entries = trailer.trim_start_matches("<<").trim_end_matches(">>");
        self.data.extend_from_slice(
            format!(
                "{number} 0 obj\n<< /Type /XRef /W [1 4 2] /Index [{}] {} /Length {} >>\nstream\n",
                index.trim_end(),
                trailer_entries.trim(),
                records.len()
            )
            .as_bytes(),
        );
        self.data.extend_from_slice(&records);
        self.data.extend_from_slice(b"\nendstream\nendobj\n");
    }

    fn footer(&mut self, xref_offset: u64) {
        self.data
            .extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF\n").as_bytes());
        self.last_xref = Some(xref_offset);
    }
}

/// Split sorted entries into runs of consecutive object numbers
fn runs(entries: &[(u32, Entry)]) -> Vec<&[(u32, Entry)]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=entries.len() {
        if i == entries.len() || entries[i].0 != entries[i - 1].0 + 1 {
            if start < i {
                runs.push(&entries[start..i]);
            }
            start = i;
        }
    }
    runs
}

/// Catalog 1, Pages 2, leaves from 3 on, one classic section
pub fn pdf_with_pages(pages: u32) -> Vec<u8> {
    let mut builder = PdfBuilder::new("1.7");
    add_page_tree(&mut builder, pages);
    builder.classic_xref("/Root 1 0 R");
    builder.build()
}

/// Append catalog 1, Pages 2 and `pages` leaves to `builder`
pub fn add_page_tree(builder: &mut PdfBuilder, pages: u32) {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 3 + i)).collect();
    builder.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>");
    builder.object(
        2,
        0,
        &format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages
        ),
    );
    for i in 0..pages {
        builder.object(3 + i, 0, "<< /Type /Page /Parent 2 0 R >>");
    }
}
