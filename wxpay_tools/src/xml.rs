//! Codec for the legacy channel's flat XML documents: a single `<xml>` root with one level of
//! `<field>value</field>` children. Values are rendered inside CDATA sections, which is what the
//! gateway itself emits.

use std::collections::BTreeMap;

use quick_xml::{events::Event, Reader};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum XmlError {
    #[error("Malformed XML document: {0}")]
    Malformed(String),
}

/// Render a field map as a flat XML document.
pub fn fields_to_xml(fields: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<xml>");
    for (field, value) in fields.iter() {
        xml.push_str(&format!("<{field}><![CDATA[{value}]]></{field}>"));
    }
    xml.push_str("</xml>");
    xml
}

/// Parse a flat XML document into a field map. Nested elements are not expected on this channel;
/// whatever text a tag carries, escaped or CDATA, becomes the field value.
pub fn xml_to_fields(xml: &str) -> Result<BTreeMap<String, String>, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut fields = BTreeMap::new();
    let mut buf = Vec::new();
    let mut current_field = String::new();
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if seen_root {
                    current_field = name;
                } else {
                    seen_root = true;
                }
            },
            Ok(Event::Text(e)) => {
                if !current_field.is_empty() {
                    let text = e.unescape().map_err(|e| XmlError::Malformed(e.to_string()))?;
                    fields.insert(current_field.clone(), text.to_string());
                }
            },
            Ok(Event::CData(e)) => {
                if !current_field.is_empty() {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    fields.insert(current_field.clone(), text);
                }
            },
            Ok(Event::End(_)) => {
                current_field.clear();
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(XmlError::Malformed(e.to_string())),
            _ => (),
        }
        buf.clear();
    }
    if !seen_root {
        return Err(XmlError::Malformed("document has no root element".to_string()));
    }
    Ok(fields)
}
