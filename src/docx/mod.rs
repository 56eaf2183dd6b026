// src/docx/mod.rs

mod package;
mod replace;

pub use package::Package;

use crate::vars::{Pattern, TableVar, Variables};
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{info, instrument, warn};

pub const DOCUMENT_PART: &str = "word/document.xml";

/// A docx template: open it, fill its placeholders, save the result.
#[derive(Debug)]
pub struct Docx {
    package: Package,
    pattern: Pattern,
}

impl Docx {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_package(Package::open(path)?)
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        Self::from_package(Package::from_reader(reader)?)
    }

    fn from_package(package: Package) -> Result<Self> {
        if package.part(DOCUMENT_PART).is_none() {
            bail!("template has no {DOCUMENT_PART} part");
        }
        Ok(Docx {
            package,
            pattern: Pattern::default(),
        })
    }

    /// Override the default `${ }` placeholder delimiters.
    pub fn set_pattern(&mut self, pattern: Pattern) {
        self.pattern = pattern;
    }

    /// Main document plus any header and footer parts.
    fn target_parts(&self) -> Vec<String> {
        let mut targets = vec![DOCUMENT_PART.to_string()];
        for name in self.package.part_names() {
            if (name.starts_with("word/header") || name.starts_with("word/footer"))
                && name.ends_with(".xml")
            {
                targets.push(name.to_string());
            }
        }
        targets
    }

    fn part_xml(&self, name: &str) -> Result<String> {
        let data = self
            .package
            .part(name)
            .with_context(|| format!("missing part {name}"))?;
        String::from_utf8(data.to_vec()).with_context(|| format!("part {name} is not UTF-8"))
    }

    /// Paragraph text of the main document, one line per paragraph.
    pub fn read_text_content(&self) -> Result<String> {
        let xml = self.part_xml(DOCUMENT_PART)?;
        let mut lines = Vec::new();
        let mut pos = 0;
        while let Some(p) = replace::find_element(&xml, "w:p", pos) {
            lines.push(replace::element_text(&xml[p.start..p.end]));
            pos = p.end;
        }
        Ok(lines.join("\n"))
    }

    /// Distinct wrapped placeholders in the main document, in order of
    /// first appearance.
    pub fn find_variables(&self) -> Result<Vec<String>> {
        let text = self.read_text_content()?;
        let re = self.pattern.regex();
        let mut seen = BTreeSet::new();
        let mut found = Vec::new();
        for m in re.find_iter(&text) {
            if seen.insert(m.as_str().to_string()) {
                found.push(m.as_str().to_string());
            }
        }
        Ok(found)
    }

    /// Single substitution pass: expand table regions from the binding
    /// set's aligned columns, then replace scalar placeholders, across the
    /// main document and every header/footer part.
    #[instrument(level = "info", skip(self, vars))]
    pub fn fill(&mut self, vars: &Variables) -> Result<()> {
        let scalars: Vec<(String, String)> = vars
            .texts()
            .iter()
            .map(|t| (self.pattern.wrap(&t.key), t.value.clone()))
            .collect();
        let tables: Vec<&TableVar> = vars.tables().iter().collect();

        for name in self.target_parts() {
            let xml = self.part_xml(&name)?;
            let xml = replace::expand_tables(&xml, &tables)
                .with_context(|| format!("expanding table region in {name}"))?;
            let xml = if scalars.is_empty() {
                xml
            } else {
                replace::replace_in_text_nodes(&xml, &scalars)
            };
            self.package.set_part(&name, xml.into_bytes());
        }
        info!(parts = self.target_parts().len(), "filled");
        Ok(())
    }

    /// Wrapped table placeholders that appear in no processed part.
    pub fn validate_table_placeholders(&self, vars: &Variables) -> Result<Vec<String>> {
        let mut required: Vec<String> = Vec::new();
        for table in vars.tables() {
            for key in table.keys() {
                let token = self.pattern.wrap(key);
                if !required.contains(&token) {
                    required.push(token);
                }
            }
        }
        if required.is_empty() {
            return Ok(Vec::new());
        }

        let mut text = String::new();
        for name in self.target_parts() {
            text.push_str(&replace::element_text(&self.part_xml(&name)?));
            text.push('\n');
        }
        let missing: Vec<String> = required
            .into_iter()
            .filter(|token| !text.contains(token.as_str()))
            .collect();
        for token in &missing {
            warn!(token = %token, "template missing table placeholder");
        }
        Ok(missing)
    }

    /// Persist to `path`, overwriting if present.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.package.save(path)?;
        info!(output = %path.display(), "saved");
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.package.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::TextVar;
    use std::io::Cursor;

    fn body_docx(body: &str) -> Docx {
        parts_docx(&[(
            DOCUMENT_PART,
            format!(
                r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
            ),
        )])
    }

    fn parts_docx(parts: &[(&str, String)]) -> Docx {
        let mut package = Package::default();
        package.set_part(
            "[Content_Types].xml",
            br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#.to_vec(),
        );
        for (name, xml) in parts {
            package.set_part(name, xml.clone().into_bytes());
        }
        let bytes = package.to_bytes().unwrap();
        Docx::from_reader(Cursor::new(bytes)).unwrap()
    }

    fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn cell(text: &str) -> String {
        format!("<w:tc>{}</w:tc>", para(text))
    }

    fn reading_template_body() -> String {
        let header: String = ["device", "cpm", "uSv/h", "mR/h", "level", "alarm", "moment"]
            .iter()
            .map(|h| cell(h))
            .collect();
        let cells: String = crate::vars::READING_KEYS
            .iter()
            .map(|k| cell(&format!("${{{k}}}")))
            .collect();
        format!(
            "{}<w:tbl><w:tr>{header}</w:tr><w:tr>{cells}</w:tr></w:tbl>",
            para("Readings for ${reportDate}")
        )
    }

    #[test]
    fn missing_document_part_is_an_error() {
        let mut package = Package::default();
        package.set_part("word/other.xml", b"<x/>".to_vec());
        let bytes = package.to_bytes().unwrap();
        assert!(Docx::from_reader(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn finds_placeholders_in_first_appearance_order() {
        let docx = body_docx(&reading_template_body());
        let found = docx.find_variables().unwrap();
        assert_eq!(found[0], "${reportDate}");
        assert_eq!(found[1], "${deviceId}");
        assert_eq!(found.len(), 8);
    }

    #[test]
    fn scalar_fill_replaces_and_escapes() {
        let mut docx = body_docx(&para("Site: ${site}"));
        let mut vars = Variables::new();
        vars.push_text(TextVar::new("site", "R&D <lab>"));
        docx.fill(&vars).unwrap();
        let text = docx.read_text_content().unwrap();
        assert_eq!(text, "Site: R&D <lab>");
        let bytes = docx.to_bytes().unwrap();
        let reread = Docx::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(reread.read_text_content().unwrap(), "Site: R&D <lab>");
    }

    #[test]
    fn table_fill_produces_one_row_per_binding_index() {
        let mut docx = body_docx(&reading_template_body());
        let rows = vec![
            crate::store::Row {
                device_id: "gmc-1".into(),
                cpm: "18".into(),
                usvh: "0.11".into(),
                mrh: "0.011".into(),
                mrh_level: "low".into(),
                alarm: "".into(),
                moment: "01-01-2026 08:00:00".into(),
            },
            crate::store::Row {
                device_id: "gmc-2".into(),
                cpm: "44".into(),
                usvh: "0.29".into(),
                mrh: "0.029".into(),
                mrh_level: "elevated".into(),
                alarm: "true".into(),
                moment: "01-01-2026 08:05:00".into(),
            },
        ];
        let vars = crate::vars::reading_table(&rows, &Pattern::default());
        docx.fill(&vars).unwrap();

        let xml = docx.part_xml(DOCUMENT_PART).unwrap();
        // header row + one row per reading
        assert_eq!(xml.matches("<w:tr>").count(), 3);
        assert!(xml.contains("<w:t>gmc-1</w:t>"));
        assert!(xml.contains("<w:t>0.29</w:t>"));
        // absent alarm renders as an empty cell text
        assert!(xml.contains("<w:t></w:t>"));
        assert!(!xml.contains("${deviceId}"));
    }

    #[test]
    fn fill_reaches_header_and_footer_parts() {
        let doc = format!(
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            para("body")
        );
        let header = format!("<w:hdr>{}</w:hdr>", para("Run ${runId}"));
        let mut docx = parts_docx(&[
            (DOCUMENT_PART, doc),
            ("word/header1.xml", header),
        ]);
        let mut vars = Variables::new();
        vars.push_text(TextVar::new("runId", "42"));
        docx.fill(&vars).unwrap();
        let header = docx.part_xml("word/header1.xml").unwrap();
        assert!(header.contains("<w:t>Run 42</w:t>"));
    }

    #[test]
    fn custom_pattern_delimiters_are_honored() {
        let mut docx = body_docx(&para("Run #{runId} of ${runId}"));
        docx.set_pattern(Pattern {
            prefix: "#{".to_string(),
            suffix: "}".to_string(),
        });
        assert_eq!(docx.find_variables().unwrap(), vec!["#{runId}".to_string()]);

        let mut vars = Variables::new();
        vars.push_text(TextVar::new("runId", "42"));
        docx.fill(&vars).unwrap();
        // only the #{ } marker is live; the ${ } text is ordinary content
        assert_eq!(docx.read_text_content().unwrap(), "Run 42 of ${runId}");
    }

    #[test]
    fn validation_reports_placeholders_missing_from_template() {
        let docx = body_docx(&reading_template_body());
        let mut table = TableVar::new();
        table.push_column(vec![TextVar::new("${deviceId}", "x")]);
        table.push_column(vec![TextVar::new("${nowhere}", "y")]);
        let mut vars = Variables::new();
        vars.push_table(table);
        let missing = docx.validate_table_placeholders(&vars).unwrap();
        assert_eq!(missing, vec!["${nowhere}".to_string()]);
    }

    #[test]
    fn filling_identical_inputs_is_byte_identical() {
        let fill_once = || {
            let mut docx = body_docx(&reading_template_body());
            let rows = vec![crate::store::Row {
                device_id: "gmc-1".into(),
                moment: "01-01-2026 08:00:00".into(),
                ..Default::default()
            }];
            let vars = crate::vars::reading_table(&rows, &Pattern::default());
            docx.fill(&vars).unwrap();
            docx.to_bytes().unwrap()
        };
        assert_eq!(fill_once(), fill_once());
    }
}
