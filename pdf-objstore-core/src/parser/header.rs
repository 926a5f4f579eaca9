//! PDF Header Parser
//!
//! Parses PDF header and version according to ISO 32000-1 Section 7.5.2

use super::lexer::find_bytes;
use super::{ParseError, ParseResult};

/// How far into the file the `%PDF-` marker may appear
const HEADER_SEARCH_LIMIT: usize = 1024;

/// PDF Version information
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PdfVersion {
    pub major: u8,
    pub minor: u8,
}

impl PdfVersion {
    /// Create a new PDF version
    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Check if this version is supported
    pub fn is_supported(&self) -> bool {
        matches!((self.major, self.minor), (1, 0..=7) | (2, 0))
    }

    /// Cross-reference streams and object streams appeared in PDF 1.5
    pub fn has_xref_streams(&self) -> bool {
        *self >= PdfVersion::new(1, 5)
    }
}

impl std::fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// PDF Header information
#[derive(Debug, Clone, PartialEq)]
pub struct PdfHeader {
    pub version: PdfVersion,
    /// Byte offset of `%PDF-`. Cross-reference offsets stay relative to the
    /// start of the file, not to the header.
    pub offset: usize,
    pub has_binary_marker: bool,
}

impl PdfHeader {
    /// Parse the header from the start of the file
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let window = &data[..data.len().min(HEADER_SEARCH_LIMIT)];
        let offset = find_bytes(window, b"%PDF-").ok_or(ParseError::InvalidHeader)?;

        let rest = &data[offset + 5..];
        let line_end = rest
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .unwrap_or(rest.len())
            .min(16);
        let version = Self::parse_version(&rest[..line_end])?;

        let has_binary_marker = Self::check_binary_marker(&rest[line_end..]);

        Ok(Self {
            version,
            offset,
            has_binary_marker,
        })
    }

    fn parse_version(text: &[u8]) -> ParseResult<PdfVersion> {
        let text = std::str::from_utf8(text).map_err(|_| ParseError::InvalidHeader)?;
        let text = text.trim_end();
        let (major, minor) = text.split_once('.').ok_or(ParseError::InvalidHeader)?;
        let major = major.parse::<u8>().map_err(|_| ParseError::InvalidHeader)?;
        let minor: String = minor.chars().take_while(|c| c.is_ascii_digit()).collect();
        let minor = minor.parse::<u8>().map_err(|_| ParseError::InvalidHeader)?;
        Ok(PdfVersion::new(major, minor))
    }

    /// The second line of the file should be a comment with 4+ bytes >= 128
    fn check_binary_marker(after_version: &[u8]) -> bool {
        let start = after_version
            .iter()
            .position(|&b| b != b'\n' && b != b'\r')
            .unwrap_or(after_version.len());
        let line = &after_version[start..];
        if line.first() != Some(&b'%') {
            return false;
        }
        line.iter()
            .skip(1)
            .take_while(|&&b| b != b'\n' && b != b'\r')
            .filter(|&&b| b >= 128)
            .count()
            >= 4
    }
}
