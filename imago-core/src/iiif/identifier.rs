use percent_encoding::percent_decode_str;

/// Image identifier parsed from the `{raw}[@{page}]` URL segment.
///
/// The page suffix selects a page inside multipage containers (PDF,
/// multipage TIFF). A malformed suffix never fails the parse; it falls back
/// to page 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    name: String,
    page: u32,
}

impl Identifier {
    pub fn parse(raw: &str) -> Self {
        let (name, page) = match raw.rsplit_once('@') {
            Some((name, page)) => (name, page.parse::<u32>().unwrap_or(0)),
            None => (raw, 0),
        };

        let name = percent_decode_str(name)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| name.to_string());

        Self { name, page }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page(&self) -> u32 {
        self.page
    }
}
