//! Launch description parser
//!
//! Graphs are described as a linear chain of stages separated by `!`:
//!
//! ```text
//! videotestsrc num-buffers=300 ! video/x-raw,format=NV12,width=1280,height=720
//!     ! videoflip method=clockwise ! videoconvert ! appsink name=capturesink
//! ```
//!
//! A stage whose first token contains `/` is a caps filter (`media/type,field=value,...`),
//! anything else is an element factory name followed by `property=value` pairs.
//! Values may be double-quoted to include spaces or `!`. Caps values may carry a
//! type annotation such as `(int)1280`, which is dropped.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("empty launch description")]
    Empty,
    #[error("stage {0} is empty")]
    EmptyStage(usize),
    #[error("unterminated quote in stage {0}")]
    UnterminatedQuote(usize),
    #[error("malformed property '{token}' in stage {stage}")]
    MalformedProperty { stage: usize, token: String },
    #[error("malformed caps field '{field}' in stage {stage}")]
    MalformedCaps { stage: usize, field: String },
}

/// One element with its properties, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    pub factory: String,
    pub properties: Vec<(String, String)>,
}

impl ElementSpec {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Value of the `name` property, if any
    pub fn name(&self) -> Option<&str> {
        self.property("name")
    }
}

/// A caps filter restricting the frames flowing between two elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsSpec {
    pub media_type: String,
    pub fields: BTreeMap<String, String>,
}

impl CapsSpec {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchNode {
    Element(ElementSpec),
    Caps(CapsSpec),
}

impl LaunchNode {
    pub fn as_element(&self) -> Option<&ElementSpec> {
        match self {
            LaunchNode::Element(element) => Some(element),
            LaunchNode::Caps(_) => None,
        }
    }

    pub fn as_caps(&self) -> Option<&CapsSpec> {
        match self {
            LaunchNode::Caps(caps) => Some(caps),
            LaunchNode::Element(_) => None,
        }
    }
}

/// A parsed chain of stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescription {
    pub nodes: Vec<LaunchNode>,
}

impl LaunchDescription {
    pub fn elements(&self) -> impl Iterator<Item = &ElementSpec> {
        self.nodes.iter().filter_map(LaunchNode::as_element)
    }

    pub fn caps(&self) -> impl Iterator<Item = &CapsSpec> {
        self.nodes.iter().filter_map(LaunchNode::as_caps)
    }

    pub fn first_element(&self) -> Option<&ElementSpec> {
        self.elements().next()
    }

    pub fn last_element(&self) -> Option<&ElementSpec> {
        self.elements().last()
    }

    pub fn find_factory(&self, factory: &str) -> Option<&ElementSpec> {
        self.elements().find(|e| e.factory == factory)
    }
}

impl fmt::Display for LaunchDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ! ")?;
            }
            match node {
                LaunchNode::Element(element) => {
                    f.write_str(&element.factory)?;
                    for (key, value) in &element.properties {
                        if value.contains(char::is_whitespace) || value.contains('!') {
                            write!(f, " {key}=\"{value}\"")?;
                        } else {
                            write!(f, " {key}={value}")?;
                        }
                    }
                }
                LaunchNode::Caps(caps) => {
                    f.write_str(&caps.media_type)?;
                    for (key, value) in &caps.fields {
                        write!(f, ",{key}={value}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Split on `!` outside of double quotes
fn split_stages(description: &str) -> Result<Vec<&str>, LaunchError> {
    let mut stages = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in description.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '!' if !in_quotes => {
                stages.push(&description[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(LaunchError::UnterminatedQuote(stages.len()));
    }
    stages.push(&description[start..]);
    Ok(stages)
}

/// Split a stage into whitespace separated tokens, keeping quoted runs together
fn tokenize(stage: &str, index: usize) -> Result<Vec<String>, LaunchError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in stage.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(LaunchError::UnterminatedQuote(index));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn strip_type_annotation(value: &str) -> &str {
    let value = value.trim();
    if value.starts_with('(')
        && let Some(end) = value.find(')')
    {
        return value[end + 1..].trim();
    }
    value
}

fn parse_caps(stage: &str, index: usize) -> Result<CapsSpec, LaunchError> {
    let mut parts = stage.split(',');
    let media_type = parts.next().unwrap_or_default().trim().to_string();
    let mut fields = BTreeMap::new();
    for field in parts {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (key, value) = field
            .split_once('=')
            .filter(|(key, value)| !key.trim().is_empty() && !value.trim().is_empty())
            .ok_or_else(|| LaunchError::MalformedCaps {
                stage: index,
                field: field.to_string(),
            })?;
        fields.insert(
            key.trim().to_string(),
            strip_type_annotation(value).trim_matches('"').to_string(),
        );
    }
    Ok(CapsSpec { media_type, fields })
}

fn parse_element(tokens: Vec<String>, index: usize) -> Result<ElementSpec, LaunchError> {
    let mut tokens = tokens.into_iter();
    let factory = tokens.next().ok_or(LaunchError::EmptyStage(index))?;
    let mut properties = Vec::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                properties.push((key.to_string(), value.to_string()));
            }
            _ => {
                return Err(LaunchError::MalformedProperty {
                    stage: index,
                    token,
                });
            }
        }
    }
    Ok(ElementSpec {
        factory,
        properties,
    })
}

/// Parse a launch description into its chain of stages
pub fn parse(description: &str) -> Result<LaunchDescription, LaunchError> {
    if description.trim().is_empty() {
        return Err(LaunchError::Empty);
    }

    let mut nodes = Vec::new();
    for (index, stage) in split_stages(description)?.into_iter().enumerate() {
        let stage = stage.trim();
        if stage.is_empty() {
            return Err(LaunchError::EmptyStage(index));
        }
        let first = stage.split_whitespace().next().unwrap_or_default();
        if first.split(',').next().is_some_and(|t| t.contains('/')) {
            nodes.push(LaunchNode::Caps(parse_caps(stage, index)?));
        } else {
            nodes.push(LaunchNode::Element(parse_element(
                tokenize(stage, index)?,
                index,
            )?));
        }
    }

    Ok(LaunchDescription { nodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camera_chain() {
        let description = parse(
            "ahcsrc ! video/x-raw,width=1280,height=720 ! videoflip method=clockwise \
             ! videoconvert ! glimagesink name=videosink",
        )
        .unwrap();

        assert_eq!(description.nodes.len(), 5);
        assert_eq!(description.first_element().unwrap().factory, "ahcsrc");

        let caps = description.caps().next().unwrap();
        assert_eq!(caps.media_type, "video/x-raw");
        assert_eq!(caps.field("width"), Some("1280"));
        assert_eq!(caps.field("height"), Some("720"));

        let flip = description.find_factory("videoflip").unwrap();
        assert_eq!(flip.property("method"), Some("clockwise"));

        let sink = description.last_element().unwrap();
        assert_eq!(sink.factory, "glimagesink");
        assert_eq!(sink.name(), Some("videosink"));
    }

    #[test]
    fn test_quoted_values_and_type_annotations() {
        let description =
            parse("appsrc name=\"display src\" ! video/x-raw,width=(int)640,format=(string)NV12")
                .unwrap();
        let src = description.first_element().unwrap();
        assert_eq!(src.name(), Some("display src"));
        let caps = description.caps().next().unwrap();
        assert_eq!(caps.field("width"), Some("640"));
        assert_eq!(caps.field("format"), Some("NV12"));
    }

    #[test]
    fn test_bang_inside_quotes_is_not_a_separator() {
        let description = parse("fakesink name=\"a ! b\"").unwrap();
        assert_eq!(description.nodes.len(), 1);
        assert_eq!(description.first_element().unwrap().name(), Some("a ! b"));
    }

    #[test]
    fn test_rejects_malformed_descriptions() {
        assert_eq!(parse("   "), Err(LaunchError::Empty));
        assert_eq!(parse("videotestsrc ! ! fakesink"), Err(LaunchError::EmptyStage(1)));
        assert_eq!(
            parse("videotestsrc pattern"),
            Err(LaunchError::MalformedProperty {
                stage: 0,
                token: "pattern".to_string()
            })
        );
        assert!(matches!(
            parse("video/x-raw,width ! fakesink"),
            Err(LaunchError::MalformedCaps { stage: 0, .. })
        ));
        assert!(matches!(
            parse("appsrc name=\"open ! fakesink"),
            Err(LaunchError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn test_display_reparses_to_same_description() {
        let text = "appsrc name=displaysrc max-buffers=4 ! video/x-raw,format=RGBA ! glimagesink";
        let description = parse(text).unwrap();
        let again = parse(&description.to_string()).unwrap();
        assert_eq!(description, again);
    }
}
