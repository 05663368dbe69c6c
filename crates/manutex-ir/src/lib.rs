//! Plain data model for manuscript conversion.

/// A top-level section of a manuscript body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text without its attribute block. Empty for the preamble.
    pub identifier: String,
    /// Position as authored, counted across all bodies.
    pub ordinal: usize,
    /// Full label declared on the heading (`sec:intro`), if any.
    pub label: Option<String>,
    pub supplementary: bool,
    /// Body text as split from the (protected) source.
    pub raw: String,
    /// Body text after the processing stages.
    pub body: String,
}

impl Section {
    pub fn new(identifier: impl Into<String>, ordinal: usize, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            identifier: identifier.into(),
            ordinal,
            label: None,
            supplementary: false,
            body: raw.clone(),
            raw,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn supplementary(mut self, supplementary: bool) -> Self {
        self.supplementary = supplementary;
        self
    }

    /// Text that precedes the first heading of a body.
    pub fn is_preamble(&self) -> bool {
        self.identifier.is_empty()
    }

    /// Case-insensitive identifier comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.identifier.trim().eq_ignore_ascii_case(name.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    MathInline,
    MathDisplay,
    CodeBlock,
    RawInjection,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::MathInline => "math-inline",
            SpanKind::MathDisplay => "math-display",
            SpanKind::CodeBlock => "code-block",
            SpanKind::RawInjection => "raw-injection",
        }
    }
}

/// Where the text of a protected span came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanOrigin {
    /// Cut out of the author's Markdown.
    Source,
    /// LaTeX produced by a processing stage.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedSpan {
    pub id: usize,
    pub original: String,
    pub kind: SpanKind,
    pub origin: SpanOrigin,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibliographyEntry {
    pub entry_type: String,
    pub key: String,
    pub authors: Vec<String>,
    pub year: Option<String>,
    pub title: Option<String>,
    /// DOI, when present.
    pub identifier: Option<String>,
    pub journal: Option<String>,
    pub booktitle: Option<String>,
    pub volume: Option<String>,
    pub number: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub url: Option<String>,
}

impl BibliographyEntry {
    pub fn new(entry_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into(),
            key: key.into(),
            ..Default::default()
        }
    }

    /// Surnames of all authors, in order.
    pub fn surnames(&self) -> Vec<String> {
        self.authors.iter().map(|a| surname(a)).collect()
    }

    pub fn first_author_surname(&self) -> Option<String> {
        self.authors.first().map(|a| surname(a))
    }

    /// Fill fields that are missing here from `other`. Present fields win.
    pub fn merge_missing(&mut self, other: &BibliographyEntry) {
        fn fill(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        if self.authors.is_empty() {
            self.authors = other.authors.clone();
        }
        fill(&mut self.year, &other.year);
        fill(&mut self.title, &other.title);
        fill(&mut self.identifier, &other.identifier);
        fill(&mut self.journal, &other.journal);
        fill(&mut self.booktitle, &other.booktitle);
        fill(&mut self.volume, &other.volume);
        fill(&mut self.number, &other.number);
        fill(&mut self.pages, &other.pages);
        fill(&mut self.publisher, &other.publisher);
        fill(&mut self.url, &other.url);
    }
}

/// Surname of a BibTeX name in either `Last, First` or `First Last` form.
pub fn surname(name: &str) -> String {
    let name = name.trim();
    if let Some((last, _)) = name.split_once(',') {
        return last.trim().to_string();
    }
    // A braced name ("{World Health Organization}") is a single unit.
    if name.starts_with('{') && name.ends_with('}') {
        return name[1..name.len() - 1].trim().to_string();
    }
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].to_string(),
        _ => {
            // Keep lowercase particles ("van", "de") with the surname.
            let mut start = parts.len() - 1;
            while start > 1
                && parts[start - 1]
                    .chars()
                    .next()
                    .map(|c| c.is_lowercase())
                    .unwrap_or(false)
            {
                start -= 1;
            }
            parts[start..].join(" ")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelKind {
    Figure,
    SupplementaryFigure,
    Table,
    SupplementaryTable,
    Equation,
    Section,
    SupplementaryNote,
}

impl LabelKind {
    pub const ALL: [LabelKind; 7] = [
        LabelKind::Figure,
        LabelKind::SupplementaryFigure,
        LabelKind::Table,
        LabelKind::SupplementaryTable,
        LabelKind::Equation,
        LabelKind::Section,
        LabelKind::SupplementaryNote,
    ];

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "fig" => Some(LabelKind::Figure),
            "sfig" => Some(LabelKind::SupplementaryFigure),
            "table" => Some(LabelKind::Table),
            "stable" => Some(LabelKind::SupplementaryTable),
            "eq" => Some(LabelKind::Equation),
            "sec" => Some(LabelKind::Section),
            "snote" => Some(LabelKind::SupplementaryNote),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LabelKind::Figure => "fig",
            LabelKind::SupplementaryFigure => "sfig",
            LabelKind::Table => "table",
            LabelKind::SupplementaryTable => "stable",
            LabelKind::Equation => "eq",
            LabelKind::Section => "sec",
            LabelKind::SupplementaryNote => "snote",
        }
    }

    /// Word placed before the number in a rendered reference.
    pub fn display_name(&self) -> &'static str {
        match self {
            LabelKind::Figure | LabelKind::SupplementaryFigure => "Figure",
            LabelKind::Table | LabelKind::SupplementaryTable => "Table",
            LabelKind::Equation => "Eq.",
            LabelKind::Section => "Section",
            LabelKind::SupplementaryNote => "Supplementary Note",
        }
    }

    /// Prefix of the number itself ("S" in "Figure S2").
    pub fn number_prefix(&self) -> &'static str {
        match self {
            LabelKind::SupplementaryFigure | LabelKind::SupplementaryTable => "S",
            _ => "",
        }
    }

    /// LaTeX counter driven by this kind, if the kind is a numbered float or equation.
    pub fn counter(&self) -> Option<&'static str> {
        match self {
            LabelKind::Figure | LabelKind::SupplementaryFigure => Some("figure"),
            LabelKind::Table | LabelKind::SupplementaryTable => Some("table"),
            LabelKind::Equation => Some("equation"),
            LabelKind::Section | LabelKind::SupplementaryNote => None,
        }
    }

    pub fn is_supplementary(&self) -> bool {
        matches!(
            self,
            LabelKind::SupplementaryFigure
                | LabelKind::SupplementaryTable
                | LabelKind::SupplementaryNote
        )
    }
}

/// A declared, numbered label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossReference {
    /// Full label including the kind prefix (`fig:overview`).
    pub label: String,
    pub kind: LabelKind,
    /// Sequence number within `kind`, by first declaration.
    pub sequence: usize,
    /// Identifier of the section holding the declaration.
    pub section: String,
}

impl CrossReference {
    /// "Figure 3", "Table S1", "Eq. 2".
    pub fn rendering(&self) -> String {
        format!(
            "{} {}{}",
            self.kind.display_name(),
            self.kind.number_prefix(),
            self.sequence
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    pub fn to_latex(&self) -> char {
        match self {
            Alignment::Left => 'l',
            Alignment::Center => 'c',
            Alignment::Right => 'r',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surname_forms() {
        assert_eq!(surname("Smith, John"), "Smith");
        assert_eq!(surname("John Smith"), "Smith");
        assert_eq!(surname("Ludwig van Beethoven"), "van Beethoven");
        assert_eq!(surname("{World Health Organization}"), "World Health Organization");
        assert_eq!(surname("Plato"), "Plato");
    }

    #[test]
    fn label_kind_prefix_roundtrip() {
        for kind in LabelKind::ALL {
            assert_eq!(LabelKind::from_prefix(kind.prefix()), Some(kind));
        }
        assert_eq!(LabelKind::from_prefix("smith2023"), None);
    }

    #[test]
    fn reference_rendering() {
        let reference = CrossReference {
            label: "sfig:extra".to_string(),
            kind: LabelKind::SupplementaryFigure,
            sequence: 2,
            section: "Supplementary Figures".to_string(),
        };
        assert_eq!(reference.rendering(), "Figure S2");
    }

    #[test]
    fn merge_missing_keeps_present_fields() {
        let mut local = BibliographyEntry::new("article", "a");
        local.title = Some("Local".to_string());
        let mut remote = BibliographyEntry::new("article", "a");
        remote.title = Some("Remote".to_string());
        remote.year = Some("2020".to_string());
        local.merge_missing(&remote);
        assert_eq!(local.title.as_deref(), Some("Local"));
        assert_eq!(local.year.as_deref(), Some("2020"));
    }
}
