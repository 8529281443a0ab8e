//! DTD loading and declaration tables.
//!
//! [`Dtd::load`] reads a `.dtd` file, expands its parameter entities, and
//! builds lookup tables of element and attribute-list declarations. The
//! validator walks fragment trees against these tables.

pub mod content_model;

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;

use crate::error::{Error, Result};

pub use content_model::{Occurs, Particle, parse_particle};

/// What an element may contain, per its `<!ELEMENT>` declaration.
#[derive(Debug, Clone)]
pub enum ContentModel {
    Empty,
    Any,
    /// `(#PCDATA | a | b)*` mixed content; the listed element names are
    /// allowed in any order alongside character data.
    Mixed(Vec<String>),
    /// Element content with an ordered particle grammar.
    Children(Particle),
}

/// A single declared element.
#[derive(Debug, Clone)]
pub struct ElementDecl {
    pub name: String,
    pub content: ContentModel,
}

/// Default behavior of a declared attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrDefault {
    Required,
    Implied,
    Fixed(String),
    Value(String),
}

/// One attribute from an `<!ATTLIST>` declaration.
#[derive(Debug, Clone)]
pub struct AttrDecl {
    pub name: String,
    /// `Some` for enumerated types; the attribute value must be one of these.
    pub values: Option<Vec<String>>,
    pub default: AttrDefault,
}

/// A parsed DTD: element declarations plus attribute lists.
#[derive(Debug, Clone, Default)]
pub struct Dtd {
    elements: HashMap<String, ElementDecl>,
    attlists: HashMap<String, Vec<AttrDecl>>,
}

impl Dtd {
    /// Load and parse a DTD file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "grammar file not found: {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        let text = crate::util::decode_text(crate::util::strip_bom(&bytes), None);
        Self::parse(&text)
    }

    /// Parse DTD declaration text.
    pub fn parse(text: &str) -> Result<Self> {
        let stripped = strip_comments(text);
        let expanded = expand_parameter_entities(&stripped)?;

        let mut dtd = Dtd::default();

        let element_re = Regex::new(r"(?s)<!ELEMENT\s+([^\s>]+)\s+(.+?)>")
            .map_err(|e| Error::InvalidGrammar(e.to_string()))?;
        for cap in element_re.captures_iter(&expanded) {
            let name = cap[1].to_string();
            let content = parse_content_model(cap[2].trim())?;
            dtd.elements
                .insert(name.clone(), ElementDecl { name, content });
        }

        let attlist_re = Regex::new(r"(?s)<!ATTLIST\s+([^\s>]+)\s+(.+?)>")
            .map_err(|e| Error::InvalidGrammar(e.to_string()))?;
        for cap in attlist_re.captures_iter(&expanded) {
            let element = cap[1].to_string();
            let decls = parse_attlist_body(&cap[2])?;
            dtd.attlists.entry(element).or_default().extend(decls);
        }

        if dtd.elements.is_empty() {
            return Err(Error::InvalidGrammar(
                "no element declarations found".to_string(),
            ));
        }
        Ok(dtd)
    }

    pub fn element(&self, name: &str) -> Option<&ElementDecl> {
        self.elements.get(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.elements.contains_key(name)
    }

    /// Attribute declarations for an element (empty slice if none declared).
    pub fn attributes(&self, element: &str) -> &[AttrDecl] {
        self.attlists.get(element).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Collect `<!ENTITY % name "...">` declarations and substitute `%name;`
/// references, repeating to resolve entities defined in terms of others.
fn expand_parameter_entities(text: &str) -> Result<String> {
    let decl_re = Regex::new(r#"<!ENTITY\s+%\s+([^\s>]+)\s+(?:"([^"]*)"|'([^']*)')\s*>"#)
        .map_err(|e| Error::InvalidGrammar(e.to_string()))?;

    let mut entities: HashMap<String, String> = HashMap::new();
    for cap in decl_re.captures_iter(text) {
        let value = cap
            .get(2)
            .or_else(|| cap.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        entities.insert(cap[1].to_string(), value);
    }

    let mut expanded = decl_re.replace_all(text, "").into_owned();
    for _ in 0..10 {
        let mut changed = false;
        for (name, value) in &entities {
            let reference = format!("%{};", name);
            if expanded.contains(&reference) {
                expanded = expanded.replace(&reference, value);
                changed = true;
            }
        }
        if !changed {
            return Ok(expanded);
        }
    }
    Err(Error::InvalidGrammar(
        "parameter entity expansion did not terminate".to_string(),
    ))
}

fn parse_content_model(text: &str) -> Result<ContentModel> {
    match text {
        "EMPTY" => Ok(ContentModel::Empty),
        "ANY" => Ok(ContentModel::Any),
        _ if text.contains("#PCDATA") => {
            let inner = text
                .trim_start_matches('(')
                .trim_end_matches('*')
                .trim_end_matches(')');
            let names = inner
                .split('|')
                .map(str::trim)
                .filter(|part| !part.is_empty() && *part != "#PCDATA")
                .map(String::from)
                .collect();
            Ok(ContentModel::Mixed(names))
        }
        _ => Ok(ContentModel::Children(parse_particle(text)?)),
    }
}

/// Tokenize and parse the body of an `<!ATTLIST element ...>` declaration.
fn parse_attlist_body(body: &str) -> Result<Vec<AttrDecl>> {
    let tokens = tokenize_attlist(body);
    let mut decls = Vec::new();
    let mut iter = tokens.into_iter().peekable();

    while let Some(name) = iter.next() {
        let ty = iter.next().ok_or_else(|| {
            Error::InvalidGrammar(format!("attribute {} has no type", name))
        })?;
        // NOTATION types carry a following enumeration group.
        let values = if ty == "NOTATION" {
            iter.next().as_deref().map(parse_enumeration)
        } else if ty.starts_with('(') {
            Some(parse_enumeration(&ty))
        } else {
            None
        };
        let default = match iter.next() {
            Some(tok) if tok == "#REQUIRED" => AttrDefault::Required,
            Some(tok) if tok == "#IMPLIED" => AttrDefault::Implied,
            Some(tok) if tok == "#FIXED" => {
                let value = iter.next().ok_or_else(|| {
                    Error::InvalidGrammar(format!("attribute {} #FIXED has no value", name))
                })?;
                AttrDefault::Fixed(unquote(&value))
            }
            Some(tok) => AttrDefault::Value(unquote(&tok)),
            None => {
                return Err(Error::InvalidGrammar(format!(
                    "attribute {} has no default declaration",
                    name
                )));
            }
        };
        decls.push(AttrDecl {
            name,
            values,
            default,
        });
    }
    Ok(decls)
}

/// Split an ATTLIST body into tokens: words, quoted strings, and
/// parenthesized groups each come out as one token.
fn tokenize_attlist(body: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = body.chars().collect();
    let mut pos = 0;
    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
        } else if c == '"' || c == '\'' {
            let quote = c;
            let start = pos;
            pos += 1;
            while pos < chars.len() && chars[pos] != quote {
                pos += 1;
            }
            pos = (pos + 1).min(chars.len());
            tokens.push(chars[start..pos].iter().collect());
        } else if c == '(' {
            let start = pos;
            let mut depth = 0;
            while pos < chars.len() {
                match chars[pos] {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            pos += 1;
                            break;
                        }
                    }
                    _ => {}
                }
                pos += 1;
            }
            tokens.push(chars[start..pos].iter().collect());
        } else {
            let start = pos;
            while pos < chars.len() && !chars[pos].is_whitespace() {
                pos += 1;
            }
            tokens.push(chars[start..pos].iter().collect());
        }
    }
    tokens
}

fn parse_enumeration(token: &str) -> Vec<String> {
    token
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split('|')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn unquote(token: &str) -> String {
    token
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}
