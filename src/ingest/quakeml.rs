//! QuakeML (XML) parsing.
//!
//! The document is read into a plain element tree (`XmlNode`) with
//! namespace prefixes stripped, then walked for the parts the pipeline
//! needs. Only focal mechanisms are extracted today.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::UpstreamError;
use crate::model::{FocalMechanism, NodalPlane};

/// One XML element: local name, attributes, concatenated text, children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// First direct child called `name`.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First descendant (depth-first, self included) called `name`.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Follow a chain of direct children.
    pub fn path(&self, names: &[&str]) -> Option<&XmlNode> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Trimmed text at the end of `names`, if non-empty.
    pub fn text_at(&self, names: &[&str]) -> Option<&str> {
        self.path(names)
            .map(|n| n.text.trim())
            .filter(|t| !t.is_empty())
    }
}

/// Parse a QuakeML document into its element tree.
pub fn parse_quakeml(xml: &str) -> Result<XmlNode, UpstreamError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            UpstreamError::XmlParse(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;
        match event {
            Event::Start(start) => stack.push(element(&start)?),
            Event::Empty(start) => {
                let node = element(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| UpstreamError::XmlParse("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| UpstreamError::XmlParse(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(UpstreamError::XmlParse(format!(
            "document ended inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| UpstreamError::XmlParse("document has no root element".to_string()))
}

fn element(start: &BytesStart<'_>) -> Result<XmlNode, UpstreamError> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        ..XmlNode::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| UpstreamError::XmlParse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| UpstreamError::XmlParse(e.to_string()))?
            .into_owned();
        node.attributes.insert(key, value);
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Public ids of every `event` element in the document.
pub fn event_ids(doc: &XmlNode) -> Vec<String> {
    let mut ids = Vec::new();
    collect_event_ids(doc, &mut ids);
    ids
}

fn collect_event_ids(node: &XmlNode, ids: &mut Vec<String>) {
    if node.name == "event" {
        if let Some(id) = node.attr("publicID") {
            ids.push(id.to_string());
        }
    }
    for child in &node.children {
        collect_event_ids(child, ids);
    }
}

/// First focal mechanism in the document with a usable first nodal plane.
pub fn extract_focal_mechanism(doc: &XmlNode) -> Option<FocalMechanism> {
    let mechanism = doc.find("focalMechanism")?;
    let planes = mechanism.child("nodalPlanes")?;
    let nodal_plane_1 = nodal_plane(planes.child("nodalPlane1")?)?;
    let nodal_plane_2 = planes.child("nodalPlane2").and_then(nodal_plane);

    Some(FocalMechanism {
        public_id: mechanism.attr("publicID").map(str::to_string),
        nodal_plane_1,
        nodal_plane_2,
    })
}

fn nodal_plane(node: &XmlNode) -> Option<NodalPlane> {
    let value = |name: &str| -> Option<f64> {
        node.text_at(&[name, "value"])?
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    };
    Some(NodalPlane {
        strike: value("strike")?,
        dip: value("dip")?,
        rake: value("rake")?,
    })
}
