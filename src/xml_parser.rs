//! XML Parser Module
//!
//! This module parses one DMARC aggregate report into a [`ParsedReport`]. Missing
//! optional elements degrade to empty fields instead of failing the document, while
//! documents that are not well-formed XML are rejected as a whole.
//!
//! DOCTYPE declarations are never processed: a DOCTYPE block is removed from the input
//! before parsing, and if it contains two or more entity definitions the document is
//! rejected outright (Billion Laughs).

use crate::error::{DmarcError, Result};
use crate::models::{ParsedReport, PolicyInfo, ReportMetadata, Row};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::borrow::Cow;

/// Result recorded when `<spf>` or `<dkim>` is missing from `<policy_evaluated>`.
const ABSENT_RESULT: &str = "fail";

/// Parses the DMARC XML content of a single report.
///
/// # Errors
///
/// Returns an error if the document is empty or not well-formed, or if a DOCTYPE
/// block defines two or more entities.
pub fn parse_report(xml_content: &str) -> Result<ParsedReport> {
    let cleaned = strip_doctype(xml_content)?;
    let mut reader = Reader::from_str(&cleaned);
    reader.config_mut().trim_text(true);

    let mut report = None;
    loop {
        match reader.read_event()? {
            Event::Start(_) if report.is_some() => {
                return Err(DmarcError::Parse("multiple root elements".into()));
            }
            Event::Empty(_) if report.is_some() => {
                return Err(DmarcError::Parse("multiple root elements".into()));
            }
            Event::Start(_) => report = Some(parse_feedback(&mut reader)?),
            Event::Empty(_) => report = Some(ParsedReport::default()),
            Event::Text(_) | Event::CData(_) => {
                return Err(DmarcError::Parse("text outside the root element".into()));
            }
            Event::End(_) => {
                return Err(DmarcError::Parse("unexpected closing tag".into()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    report.ok_or_else(|| DmarcError::Parse("no root element".into()))
}

/// Removes a `<!DOCTYPE ... ]>` block, rejecting it when it defines two or more entities.
fn strip_doctype(xml_content: &str) -> Result<Cow<'_, str>> {
    let Some(start) = xml_content.find("<!DOCTYPE") else {
        return Ok(Cow::Borrowed(xml_content));
    };
    let Some(end) = xml_content[start..].find("]>") else {
        return Ok(Cow::Borrowed(xml_content));
    };
    let doctype = &xml_content[start..start + end + 2];
    if doctype.matches("<!ENTITY").count() >= 2 {
        return Err(DmarcError::Parse("Recursive entities detected".into()));
    }
    let before = &xml_content[..start];
    let after = &xml_content[start + end + 2..];
    Ok(Cow::Owned(format!("{}{}", before, after)))
}

/// A child element that has just been opened.
struct Child<'a> {
    start: BytesStart<'a>,
    empty: bool,
}

impl<'a> Child<'a> {
    fn is(&self, name: &[u8]) -> bool {
        self.start.local_name().as_ref() == name
    }

    /// Reads the text of a leaf element, CDATA sections included; a self-closing
    /// element yields "". Text inside nested child elements is not part of it.
    fn text(self, reader: &mut Reader<&'a [u8]>) -> Result<String> {
        if self.empty {
            return Ok(String::new());
        }
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            match reader.read_event()? {
                Event::Text(t) if depth == 0 => match t.unescape() {
                    Ok(s) => text.push_str(&s),
                    // unknown entity references are kept as written
                    Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
                },
                Event::CData(c) if depth == 0 => {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()))
                }
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Eof => {
                    return Err(DmarcError::Parse(format!(
                        "unexpected end of document inside <{}>",
                        String::from_utf8_lossy(self.start.local_name().as_ref())
                    )))
                }
                _ => {}
            }
        }
        Ok(text.trim().to_string())
    }

    fn skip(self, reader: &mut Reader<&'a [u8]>) -> Result<()> {
        if !self.empty {
            reader.read_to_end(self.start.name())?;
        }
        Ok(())
    }
}

/// Feeds every direct child of the element just opened to `visit`, up to its end tag.
/// `visit` must consume the child it is given, either by reading or skipping it.
fn for_each_child<'a, F>(reader: &mut Reader<&'a [u8]>, parent: &str, mut visit: F) -> Result<()>
where
    F: FnMut(&mut Reader<&'a [u8]>, Child<'a>) -> Result<()>,
{
    loop {
        match reader.read_event()? {
            Event::Start(start) => visit(reader, Child { start, empty: false })?,
            Event::Empty(start) => visit(reader, Child { start, empty: true })?,
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(DmarcError::Parse(format!(
                    "unexpected end of document inside <{}>",
                    parent
                )))
            }
            _ => {}
        }
    }
}

fn set_first(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

/// Parses the children of the root `<feedback>` element.
fn parse_feedback(reader: &mut Reader<&[u8]>) -> Result<ParsedReport> {
    let mut report = ParsedReport::default();
    let mut seen_metadata = false;
    let mut seen_policy = false;
    for_each_child(reader, "feedback", |reader, child| {
        if child.is(b"report_metadata") && !seen_metadata {
            seen_metadata = true;
            if !child.empty {
                report.metadata = parse_metadata(reader)?;
            }
            Ok(())
        } else if child.is(b"policy_published") && !seen_policy {
            seen_policy = true;
            if !child.empty {
                report.policy = parse_policy_published(reader)?;
            }
            Ok(())
        } else if child.is(b"record") {
            if !child.empty {
                if let Some(row) = parse_record(reader)? {
                    report.rows.push(row);
                }
            }
            Ok(())
        } else {
            child.skip(reader)
        }
    })?;
    Ok(report)
}

/// Parses the `<report_metadata>` element.
fn parse_metadata(reader: &mut Reader<&[u8]>) -> Result<ReportMetadata> {
    let mut metadata = ReportMetadata::default();
    let mut seen_range = false;
    for_each_child(reader, "report_metadata", |reader, child| {
        if child.is(b"org_name") {
            set_first(&mut metadata.org_name, child.text(reader)?);
        } else if child.is(b"email") {
            set_first(&mut metadata.email, child.text(reader)?);
        } else if child.is(b"report_id") {
            set_first(&mut metadata.report_id, child.text(reader)?);
        } else if child.is(b"date_range") && !seen_range {
            seen_range = true;
            if !child.empty {
                let (begin, end) = parse_date_range(reader)?;
                metadata.date_begin = begin;
                metadata.date_end = end;
            }
        } else {
            child.skip(reader)?;
        }
        Ok(())
    })?;
    Ok(metadata)
}

/// Parses `<date_range>`; a timestamp that is not a number reads as absent.
fn parse_date_range(reader: &mut Reader<&[u8]>) -> Result<(Option<i64>, Option<i64>)> {
    let mut begin = None;
    let mut end = None;
    for_each_child(reader, "date_range", |reader, child| {
        if child.is(b"begin") {
            set_first(&mut begin, child.text(reader)?);
        } else if child.is(b"end") {
            set_first(&mut end, child.text(reader)?);
        } else {
            child.skip(reader)?;
        }
        Ok(())
    })?;
    let timestamp = |s: Option<String>| s.and_then(|s| s.parse::<i64>().ok());
    Ok((timestamp(begin), timestamp(end)))
}

/// Parses the `<policy_published>` element.
fn parse_policy_published(reader: &mut Reader<&[u8]>) -> Result<PolicyInfo> {
    let mut policy = PolicyInfo::default();
    for_each_child(reader, "policy_published", |reader, child| {
        let slot = if child.is(b"domain") {
            &mut policy.domain
        } else if child.is(b"p") {
            &mut policy.p
        } else if child.is(b"sp") {
            &mut policy.sp
        } else if child.is(b"adkim") {
            &mut policy.adkim
        } else if child.is(b"aspf") {
            &mut policy.aspf
        } else if child.is(b"pct") {
            &mut policy.pct
        } else {
            return child.skip(reader);
        };
        set_first(slot, child.text(reader)?);
        Ok(())
    })?;
    Ok(policy)
}

/// Parses a `<record>`. Records without a `<row>` yield nothing.
fn parse_record(reader: &mut Reader<&[u8]>) -> Result<Option<Row>> {
    let mut row = None;
    let mut seen_row = false;
    for_each_child(reader, "record", |reader, child| {
        if child.is(b"row") && !seen_row {
            seen_row = true;
            if !child.empty {
                row = parse_row(reader)?;
            }
            Ok(())
        } else {
            child.skip(reader)
        }
    })?;
    Ok(row)
}

#[derive(Default)]
struct Evaluated {
    disposition: Option<String>,
    dkim: Option<String>,
    spf: Option<String>,
}

/// Parses a `<row>`. Rows without `<policy_evaluated>` yield nothing.
fn parse_row(reader: &mut Reader<&[u8]>) -> Result<Option<Row>> {
    let mut source_ip = None;
    let mut count = None;
    let mut evaluated = None;
    for_each_child(reader, "row", |reader, child| {
        if child.is(b"source_ip") {
            set_first(&mut source_ip, child.text(reader)?);
        } else if child.is(b"count") {
            set_first(&mut count, child.text(reader)?);
        } else if child.is(b"policy_evaluated") && evaluated.is_none() {
            evaluated = Some(if child.empty {
                Evaluated::default()
            } else {
                parse_policy_evaluated(reader)?
            });
        } else {
            child.skip(reader)?;
        }
        Ok(())
    })?;

    Ok(evaluated.map(|evaluated| Row {
        source_ip: source_ip.unwrap_or_default(),
        count: count.and_then(|c| c.parse().ok()).unwrap_or(0),
        spf_result: evaluated.spf.unwrap_or_else(|| ABSENT_RESULT.to_string()),
        dkim_result: evaluated.dkim.unwrap_or_else(|| ABSENT_RESULT.to_string()),
        disposition: evaluated.disposition.unwrap_or_default(),
    }))
}

/// Parses the `<policy_evaluated>` element.
fn parse_policy_evaluated(reader: &mut Reader<&[u8]>) -> Result<Evaluated> {
    let mut evaluated = Evaluated::default();
    for_each_child(reader, "policy_evaluated", |reader, child| {
        if child.is(b"disposition") {
            set_first(&mut evaluated.disposition, child.text(reader)?);
        } else if child.is(b"dkim") {
            set_first(&mut evaluated.dkim, child.text(reader)?);
        } else if child.is(b"spf") {
            set_first(&mut evaluated.spf, child.text(reader)?);
        } else {
            child.skip(reader)?;
        }
        Ok(())
    })?;
    Ok(evaluated)
}
