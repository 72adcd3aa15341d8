//! Input format sniffing.
//!
//! Optimiser plugins only operate on the format they were built for; every
//! other input passes through them untouched. Formats are recognised from
//! their leading bytes, never from the file extension.

/// Image formats the built-in plugins know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Gif,
    Jpeg,
    Png,
    Svg,
}

impl ImageFormat {
    /// Detects the format of `bytes`, returning `None` for anything else.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if looks_like_svg(bytes) {
            Some(ImageFormat::Svg)
        } else {
            None
        }
    }

    /// Whether `bytes` are in this format.
    pub fn matches(self, bytes: &[u8]) -> bool {
        Self::detect(bytes) == Some(self)
    }

    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Gif => "gif",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Svg => "svg",
        }
    }
}

/// Whether the document's root element is `<svg`.
///
/// Leading whitespace, the XML declaration, processing instructions, comments
/// and the doctype (including an internal subset) are skipped first.
fn looks_like_svg(bytes: &[u8]) -> bool {
    let mut rest = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    loop {
        rest = rest.trim_ascii_start();
        let skipped = if rest.starts_with(b"<?") {
            skip_past(rest, b"?>")
        } else if rest.starts_with(b"<!--") {
            skip_past(&rest[4..], b"-->")
        } else if rest.starts_with(b"<!") {
            skip_declaration(rest)
        } else {
            break;
        };
        match skipped {
            Some(after) => rest = after,
            None => return false,
        }
    }

    let Some(after) = rest.strip_prefix(b"<svg") else {
        return false;
    };
    matches!(after.first(), Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/')
}

fn skip_past<'a>(bytes: &'a [u8], terminator: &[u8]) -> Option<&'a [u8]> {
    bytes
        .windows(terminator.len())
        .position(|w| w == terminator)
        .map(|at| &bytes[at + terminator.len()..])
}

/// Skips a `<!...>` declaration, ignoring any `>` inside a `[...]` subset.
fn skip_declaration(bytes: &[u8]) -> Option<&[u8]> {
    let mut in_subset = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => in_subset = true,
            b']' => in_subset = false,
            b'>' if !in_subset => return Some(&bytes[i + 1..]),
            _ => {}
        }
    }
    None
}
