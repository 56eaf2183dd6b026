// src/docx/replace.rs
//
// Placeholder substitution over WordprocessingML. Tokens are matched
// against the concatenated run text of each paragraph, so a placeholder
// Word has split across adjacent runs is still found; the replacement is
// written back into the spanned `<w:t>` nodes. Element structure is never
// rewritten except when a table template row is cloned per data row.

use crate::vars::TableVar;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Matches a `<w:t>` element, capturing the open tag and its text.
static W_T: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(<w:t(?:\s[^>]*)?>)([^<]*)</w:t>").expect("w:t regex should be valid")
});

pub(crate) fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Concatenated `<w:t>` text within `xml`, entities decoded.
pub(crate) fn element_text(xml: &str) -> String {
    W_T.captures_iter(xml).map(|c| unescape_xml(&c[2])).collect()
}

/// Replace every occurrence of the mapped tokens in the run text of each
/// `<w:p>` paragraph. Matching never crosses a paragraph boundary, and
/// untouched text nodes are emitted byte-for-byte.
pub(crate) fn replace_in_text_nodes(xml: &str, bindings: &[(String, String)]) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut pos = 0;
    while let Some(p) = find_element(xml, "w:p", pos) {
        out.push_str(&xml[pos..p.start]);
        out.push_str(&replace_across_runs(&xml[p.start..p.end], bindings));
        pos = p.end;
    }
    out.push_str(&xml[pos..]);
    out
}

/// Substitute tokens over the joined `<w:t>` text of one paragraph. A
/// token spanning several runs lands its replacement in the first spanned
/// node; the covered remainder of the later nodes is cut out.
fn replace_across_runs(paragraph: &str, bindings: &[(String, String)]) -> String {
    let nodes: Vec<Captures> = W_T.captures_iter(paragraph).collect();
    if nodes.is_empty() {
        return paragraph.to_string();
    }
    let decoded: Vec<String> = nodes.iter().map(|c| unescape_xml(&c[2])).collect();
    let mut texts = decoded.clone();
    for (token, value) in bindings {
        replace_token_across(&mut texts, token, value);
    }
    if texts == decoded {
        return paragraph.to_string();
    }

    let mut out = String::with_capacity(paragraph.len());
    let mut pos = 0;
    for (i, caps) in nodes.iter().enumerate() {
        let whole = caps.get(0).expect("capture 0 always present");
        out.push_str(&paragraph[pos..whole.start()]);
        if texts[i] == decoded[i] {
            out.push_str(whole.as_str());
        } else {
            out.push_str(&caps[1]);
            out.push_str(&escape_xml(&texts[i]));
            out.push_str("</w:t>");
        }
        pos = whole.end();
    }
    out.push_str(&paragraph[pos..]);
    out
}

/// Replace `token` wherever it occurs in the concatenation of `texts`,
/// editing the underlying nodes in place.
fn replace_token_across(texts: &mut [String], token: &str, value: &str) {
    let mut from = 0;
    loop {
        let joined = texts.concat();
        let Some(rel) = joined[from..].find(token) else {
            break;
        };
        let start = from + rel;
        let end = start + token.len();
        let mut offset = 0;
        let mut placed = false;
        for text in texts.iter_mut() {
            let node_start = offset;
            let node_end = offset + text.len();
            offset = node_end;
            if node_end <= start || node_start >= end {
                continue;
            }
            let local_start = start.saturating_sub(node_start);
            let local_end = end.min(node_end) - node_start;
            if placed {
                text.replace_range(local_start..local_end, "");
            } else {
                text.replace_range(local_start..local_end, value);
                placed = true;
            }
        }
        from = start + value.len();
    }
}

/// Byte range of one XML element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ElementRange {
    pub start: usize,
    pub inner_start: usize,
    pub inner_end: usize,
    pub end: usize,
}

/// Locate the next `<tag> … </tag>` element at or after `from`. The tag
/// matches only on an exact name boundary, so searching for `w:tbl` skips
/// `<w:tblPr>`. Same-name nesting is not handled; the template grammar
/// here has none.
pub(crate) fn find_element(xml: &str, tag: &str, from: usize) -> Option<ElementRange> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let bytes = xml.as_bytes();
    let mut search = from;
    loop {
        let start = search + xml.get(search..)?.find(&open)?;
        let after = start + open.len();
        match bytes.get(after) {
            Some(b'>') | Some(b'/') | Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {}
            _ => {
                search = after;
                continue;
            }
        }
        let gt = start + xml.get(start..)?.find('>')?;
        if bytes[gt - 1] == b'/' {
            // self-closing, empty element
            return Some(ElementRange {
                start,
                inner_start: gt + 1,
                inner_end: gt + 1,
                end: gt + 1,
            });
        }
        let inner_start = gt + 1;
        let inner_end = inner_start + xml.get(inner_start..)?.find(&close)?;
        return Some(ElementRange {
            start,
            inner_start,
            inner_end,
            end: inner_end + close.len(),
        });
    }
}

/// Expand repeating table regions. For each table in the document, the
/// first row whose cell text contains every placeholder key of some table
/// variable is the template row: it is cloned once per data row with the
/// aligned column values substituted, then removed. One template row is
/// consumed per document table. Columns that disagree on length fail the
/// whole fill.
pub(crate) fn expand_tables(xml: &str, tables: &[&TableVar]) -> Result<String> {
    let live: Vec<&TableVar> = tables.iter().copied().filter(|t| !t.is_empty()).collect();
    if live.is_empty() {
        return Ok(xml.to_string());
    }

    let mut out = xml.to_string();
    let mut cursor = 0;
    while let Some(tbl) = find_element(&out, "w:tbl", cursor) {
        let mut expansion: Option<(usize, usize, String)> = None;
        let mut pos = tbl.inner_start;
        while pos < tbl.inner_end {
            let Some(tr) = find_element(&out[..tbl.inner_end], "w:tr", pos) else {
                break;
            };
            let row_xml = &out[tr.start..tr.end];
            let row_text = element_text(row_xml);
            let matched = live
                .iter()
                .copied()
                .find(|t| t.keys().iter().all(|k| row_text.contains(k.as_str())));
            if let Some(table) = matched {
                let (row_count, mismatch) = table.validated_row_count();
                if mismatch {
                    bail!("table columns for {:?} differ in length", table.keys());
                }
                let mut filled = String::with_capacity(row_xml.len() * row_count.max(1));
                for r in 0..row_count {
                    let bindings: Vec<(String, String)> = table
                        .keys()
                        .iter()
                        .enumerate()
                        .map(|(ci, key)| (key.clone(), table.columns()[ci][r].value.clone()))
                        .collect();
                    filled.push_str(&replace_in_text_nodes(row_xml, &bindings));
                }
                expansion = Some((tr.start, tr.end, filled));
                break;
            }
            pos = tr.end;
        }
        match expansion {
            Some((start, end, filled)) => {
                let next = tbl.end - (end - start) + filled.len();
                out.replace_range(start..end, &filled);
                cursor = next;
            }
            None => cursor = tbl.end,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::TextVar;

    #[test]
    fn escape_round_trips() {
        let raw = "a < b & c > \"d\"";
        assert_eq!(unescape_xml(&escape_xml(raw)), raw);
    }

    #[test]
    fn element_boundary_is_respected() {
        let xml = "<w:tblPr/><w:tbl><w:tr><w:t>x</w:t></w:tr></w:tbl>";
        let tbl = find_element(xml, "w:tbl", 0).unwrap();
        assert_eq!(&xml[tbl.start..tbl.end], "<w:tbl><w:tr><w:t>x</w:t></w:tr></w:tbl>");
    }

    #[test]
    fn self_closing_elements_are_empty() {
        let xml = "<w:body><w:p/><w:p><w:t>hi</w:t></w:p></w:body>";
        let first = find_element(xml, "w:p", 0).unwrap();
        assert_eq!(first.inner_start, first.inner_end);
        let second = find_element(xml, "w:p", first.end).unwrap();
        assert_eq!(element_text(&xml[second.start..second.end]), "hi");
    }

    #[test]
    fn replacement_touches_only_text_nodes() {
        let xml = r#"<w:p attr="${key}"><w:t>${key}</w:t></w:p>"#;
        let out = replace_in_text_nodes(xml, &[("${key}".to_string(), "v".to_string())]);
        assert_eq!(out, r#"<w:p attr="${key}"><w:t>v</w:t></w:p>"#);
    }

    #[test]
    fn substituted_values_are_escaped() {
        let xml = "<w:p><w:r><w:t>${v}</w:t></w:r></w:p>";
        let out = replace_in_text_nodes(xml, &[("${v}".to_string(), "a<b&c".to_string())]);
        assert_eq!(out, "<w:p><w:r><w:t>a&lt;b&amp;c</w:t></w:r></w:p>");
    }

    #[test]
    fn placeholder_split_across_runs_is_replaced() {
        // Word routinely breaks a typed placeholder into several runs
        let xml = "<w:p><w:r><w:t>${dev</w:t></w:r><w:r><w:t>iceId}</w:t></w:r></w:p>";
        let out =
            replace_in_text_nodes(xml, &[("${deviceId}".to_string(), "gmc-1".to_string())]);
        assert_eq!(element_text(&out), "gmc-1");
        assert!(out.contains("<w:t>gmc-1</w:t>"));
        assert!(out.contains("<w:t></w:t>"));
    }

    #[test]
    fn placeholder_split_over_three_runs_with_surrounding_text() {
        let xml = "<w:p><w:r><w:t>cpm: ${</w:t></w:r><w:r><w:t>cp</w:t></w:r>\
                   <w:r><w:t>m} counts</w:t></w:r></w:p>";
        let out = replace_in_text_nodes(xml, &[("${cpm}".to_string(), "44".to_string())]);
        assert_eq!(element_text(&out), "cpm: 44 counts");
    }

    #[test]
    fn matching_stops_at_paragraph_boundaries() {
        let xml = "<w:p><w:r><w:t>${de</w:t></w:r></w:p>\
                   <w:p><w:r><w:t>viceId}</w:t></w:r></w:p>";
        let out =
            replace_in_text_nodes(xml, &[("${deviceId}".to_string(), "gmc-1".to_string())]);
        assert_eq!(out, xml);
    }

    fn table_var(rows: &[(&str, &str)]) -> TableVar {
        let mut t = TableVar::new();
        t.push_column(
            rows.iter()
                .map(|(a, _)| TextVar::new("${a}", *a))
                .collect(),
        );
        t.push_column(
            rows.iter()
                .map(|(_, b)| TextVar::new("${b}", *b))
                .collect(),
        );
        t
    }

    fn template_table() -> &'static str {
        "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>head</w:t></w:r></w:p></w:tc></w:tr>\
         <w:tr><w:tc><w:p><w:r><w:t>${a}</w:t></w:r></w:p></w:tc>\
         <w:tc><w:p><w:r><w:t>${b}</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"
    }

    #[test]
    fn template_row_expands_once_per_data_row() {
        let table = table_var(&[("1", "x"), ("2", "y")]);
        let out = expand_tables(template_table(), &[&table]).unwrap();
        assert_eq!(out.matches("<w:tr>").count(), 3);
        assert!(out.contains("<w:t>1</w:t>"));
        assert!(out.contains("<w:t>y</w:t>"));
        assert!(!out.contains("${a}"));
    }

    #[test]
    fn zero_data_rows_leave_the_template_untouched() {
        let table = table_var(&[]);
        assert!(table.is_empty());
        let out = expand_tables(template_table(), &[&table]).unwrap();
        assert_eq!(out, template_table());
    }

    #[test]
    fn unmatched_keys_leave_the_document_alone() {
        let mut table = TableVar::new();
        table.push_column(vec![TextVar::new("${other}", "v")]);
        let out = expand_tables(template_table(), &[&table]).unwrap();
        assert_eq!(out, template_table());
    }

    #[test]
    fn table_cells_with_split_runs_are_filled() {
        let xml = "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>${</w:t></w:r>\
                   <w:r><w:t>a}</w:t></w:r></w:p></w:tc></w:tr></w:tbl>";
        let mut table = TableVar::new();
        table.push_column(vec![TextVar::new("${a}", "1"), TextVar::new("${a}", "2")]);
        let out = expand_tables(xml, &[&table]).unwrap();
        assert_eq!(out.matches("<w:tr>").count(), 2);
        assert!(out.contains("<w:t>1</w:t>"));
        assert!(out.contains("<w:t>2</w:t>"));
        assert!(!out.contains("${"));
    }

    #[test]
    fn column_length_mismatch_fails_the_fill() {
        let mut table = TableVar::new();
        table.push_column(vec![TextVar::new("${a}", "1"), TextVar::new("${a}", "2")]);
        table.push_column(vec![TextVar::new("${b}", "x")]);
        assert!(expand_tables(template_table(), &[&table]).is_err());
    }
}
