//! XML reading utilities shared by the `.xlsx` and `.ods` readers.
//! Wraps `quick_xml::Reader` with a reusable buffer and adds attribute and text helpers.

use crate::error::CandidateSheetError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Parse entity '{0}' failed")]
    ParseEntityError(String),

    #[error("Parse attribute value '{0}' failed")]
    ParseAttributeValueError(String),
}

/// Event reader configured for worksheet XML: end names are not checked and
/// empty elements are expanded so that `<c/>` yields a start and an end event.
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        let buffer = Vec::with_capacity(1024);
        XmlReader { reader, buffer }
    }

    /// Reads the next event, `None` at end of document.
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, CandidateSheetError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer) {
            Ok(Event::Eof) => Ok(None),
            Ok(event) => Ok(Some(event)),
            Err(error) => Err(CandidateSheetError::XmlError(error)),
        }
    }
}

pub(crate) trait XmlAttributeHelper<'a> {
    /// Gets the unescaped attribute value as a string
    fn get_value(&self) -> Result<Cow<'a, str>, CandidateSheetError>;

    /// Parses the attribute value to the specified type
    fn parse_value<T: FromStr>(&self) -> Result<T, CandidateSheetError>;
}

impl<'a> XmlAttributeHelper<'a> for Attribute<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, CandidateSheetError> {
        Ok(self.unescape_value()?)
    }

    fn parse_value<T: FromStr>(&self) -> Result<T, CandidateSheetError> {
        self.get_value()?
            .parse()
            .map_err(|_| match std::str::from_utf8(&self.value) {
                Ok(value) => CandidateSheetError::XmlHelperError(XmlError::ParseAttributeValueError(value.to_string())),
                Err(error) => CandidateSheetError::StringEncodingError(error),
            })
    }
}

pub(crate) trait XmlNodeHelper<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, CandidateSheetError>;

    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, CandidateSheetError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, CandidateSheetError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.get_value())
            .transpose()
    }

    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, CandidateSheetError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.parse_value())
            .transpose()
    }
}

/// Accumulates cell text from text and reference events.
pub(crate) trait XmlTextContextHelper {
    fn push_bytes_text(&mut self, text: &BytesText) -> Result<(), CandidateSheetError>;

    /// Resolves `&amp;`-style entities and `&#NN;` / `&#xNN;` character references.
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), CandidateSheetError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_text(&mut self, text: &BytesText) -> Result<(), CandidateSheetError> {
        self.push_str(&text.xml_content()?);
        Ok(())
    }

    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), CandidateSheetError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = if let Some(hex) = number.strip_prefix('x') {
                u32::from_str_radix(hex, 16)?
            } else {
                number.parse::<u32>()?
            };
            if let Some(character) = char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }

        Ok(())
    }
}

/// Drives an `XmlReader` until end of document, dispatching each event to the given arms.
/// Unmatched events are skipped; `break` inside an arm leaves the loop.
#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::name::QName;

    fn collect_text(xml: &str) -> Result<String, CandidateSheetError> {
        let mut reader = XmlReader::new(xml.as_bytes());
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Text(event) => text.push_bytes_text(&event)?,
            Event::GeneralRef(event) => text.push_bytes_ref(&event)?,
        });
        Ok(text)
    }

    #[test]
    fn resolves_entities_and_character_references() {
        let text = collect_text("<t>S&#237; &amp; s&#xED;</t>").unwrap();
        assert_eq!(text, "Sí & sí");
    }

    #[test]
    fn rejects_unknown_entity() {
        assert!(collect_text("<t>&bogus;</t>").is_err());
    }

    #[test]
    fn reads_and_parses_attributes() -> Result<(), CandidateSheetError> {
        let mut reader = XmlReader::new(r#"<c r="B2" s="3" t="s"/>"#.as_bytes());
        let mut found = None;
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == QName(b"c") => {
                let reference = event.get_attribute_value("r")?.map(|value| value.to_string());
                let style = event.parse_attribute_value::<usize>("s")?;
                let missing = event.get_attribute_value("x")?.map(|value| value.to_string());
                found = Some((reference, style, missing));
            }
        });
        assert_eq!(found, Some((Some("B2".to_string()), Some(3), None)));
        Ok(())
    }

    #[test]
    fn parse_attribute_reports_bad_value() {
        let mut reader = XmlReader::new(r#"<c s="abc"/>"#.as_bytes());
        let mut failed = false;
        while let Some(event) = reader.next().unwrap() {
            if let Event::Start(event) = event {
                failed = event.parse_attribute_value::<usize>("s").is_err();
            }
        }
        assert!(failed);
    }
}
