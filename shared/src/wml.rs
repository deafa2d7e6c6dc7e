//! Tag tree for the lobby's markup documents
//!
//! The lobby server speaks a small subset of WML: nested `[tag]`/`[/tag]`
//! blocks holding `key="value"` attributes. Quoted values may span several
//! lines and escape a literal quote by doubling it. This module provides the
//! tree type, a parser for incoming documents and a writer for outgoing ones.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WmlError {
    #[error("line {line}: malformed tag `{text}`")]
    MalformedTag { line: usize, text: String },

    #[error("line {line}: closing tag [/{found}] does not match [{expected}]")]
    MismatchedClose {
        line: usize,
        expected: String,
        found: String,
    },

    #[error("line {line}: closing tag [/{found}] without an open tag")]
    UnexpectedClose { line: usize, found: String },

    #[error("line {line}: expected a tag or an attribute, got `{text}`")]
    UnexpectedLine { line: usize, text: String },

    #[error("line {line}: unterminated string value")]
    UnterminatedString { line: usize },

    #[error("tag [{0}] is never closed")]
    Unclosed(String),
}

/// One tag of a document. The root of a parsed document has an empty name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Returns the value of the first attribute called `key`
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Like [`Node::attr`], but a missing attribute reads as the empty string
    pub fn attr_or_empty(&self, key: &str) -> &str {
        self.attr(key).unwrap_or("")
    }

    /// Children with the given tag name, in document order
    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |child| child.name == tag)
    }

    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == tag)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn push_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.push_child(child);
        self
    }

    /// Collects the attributes of every direct child into one map.
    ///
    /// Later children overwrite earlier ones on key collisions. Used for
    /// small control replies such as `[redirect]` where only the values
    /// matter.
    pub fn flatten_child_attributes(&self) -> HashMap<String, String> {
        let mut flat = HashMap::new();
        for child in &self.children {
            for (key, value) in &child.attributes {
                flat.insert(key.clone(), value.clone());
            }
        }
        flat
    }

    fn write_into(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = !self.name.is_empty();
        if named {
            writeln!(out, "[{}]", self.name)?;
        }
        for (key, value) in &self.attributes {
            writeln!(out, "{}=\"{}\"", key, value.replace('"', "\"\""))?;
        }
        for child in &self.children {
            child.write_into(out)?;
        }
        if named {
            writeln!(out, "[/{}]", self.name)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_into(f)
    }
}

/// Parses a whole document into a root node
pub fn parse(text: &str) -> Result<Node, WmlError> {
    let mut stack = vec![Node::root()];
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

    while let Some((number, raw)) = lines.next() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("[/") {
            let name = tag_name(rest, number, line)?;
            if stack.len() < 2 {
                return Err(WmlError::UnexpectedClose {
                    line: number,
                    found: name.to_string(),
                });
            }
            let node = stack.pop().unwrap_or_default();
            if node.name != name {
                return Err(WmlError::MismatchedClose {
                    line: number,
                    expected: node.name,
                    found: name.to_string(),
                });
            }
            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            }
        } else if let Some(rest) = line.strip_prefix('[') {
            let name = tag_name(rest, number, line)?;
            let name = name.strip_prefix('+').unwrap_or(name);
            stack.push(Node::new(name));
        } else if let Some((key, value)) = line.split_once('=') {
            let value = read_value(value.trim(), number, &mut lines)?;
            if let Some(current) = stack.last_mut() {
                current.attributes.push((key.trim().to_string(), value));
            }
        } else {
            return Err(WmlError::UnexpectedLine {
                line: number,
                text: line.to_string(),
            });
        }
    }

    if stack.len() > 1 {
        let open = stack.pop().unwrap_or_default();
        return Err(WmlError::Unclosed(open.name));
    }
    Ok(stack.pop().unwrap_or_default())
}

fn tag_name<'a>(rest: &'a str, line: usize, text: &str) -> Result<&'a str, WmlError> {
    match rest.strip_suffix(']') {
        Some(name) if !name.is_empty() && !name.contains(['[', ']']) => Ok(name),
        _ => Err(WmlError::MalformedTag {
            line,
            text: text.to_string(),
        }),
    }
}

/// Reads an attribute value, pulling further lines for multi-line strings
fn read_value<'a, I>(first: &str, start: usize, lines: &mut I) -> Result<String, WmlError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    // translatable marker: key=_"text"
    let first = match first.strip_prefix('_') {
        Some(rest) if rest.trim_start().starts_with('"') => rest.trim_start(),
        _ => first,
    };

    let Some(mut rest) = first.strip_prefix('"').map(str::to_string) else {
        return Ok(first.to_string());
    };

    let mut value = String::new();
    loop {
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '"' {
                value.push(c);
            } else if chars.peek() == Some(&'"') {
                chars.next();
                value.push('"');
            } else {
                return Ok(value);
            }
        }
        match lines.next() {
            Some((_, next)) => {
                value.push('\n');
                rest = next.to_string();
            }
            None => return Err(WmlError::UnterminatedString { line: start }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_tags() {
        let doc = parse(
            "[gamelist]\n[game]\nid=\"7\"\nname=\"2p duel\"\n[/game]\n[/gamelist]\n[user]\nname=\"alice\"\n[/user]\n",
        )
        .unwrap();

        assert_eq!(doc.name(), "");
        assert_eq!(doc.children().len(), 2);
        let game = doc.child("gamelist").unwrap().child("game").unwrap();
        assert_eq!(game.attr("id"), Some("7"));
        assert_eq!(game.attr("name"), Some("2p duel"));
        assert_eq!(doc.child("user").unwrap().attr("name"), Some("alice"));
    }

    #[test]
    fn test_parse_indented_and_unquoted_values() {
        let doc = parse("[version]\n\tversion=1.16.0\n[/version]").unwrap();
        assert_eq!(doc.child("version").unwrap().attr("version"), Some("1.16.0"));
    }

    #[test]
    fn test_parse_multiline_and_escaped_quotes() {
        let doc = parse("[message]\nmessage=\"say \"\"hi\"\"\nsecond line\"\nsender=\"bob\"\n[/message]").unwrap();
        let message = doc.child("message").unwrap();
        assert_eq!(message.attr("message"), Some("say \"hi\"\nsecond line"));
        assert_eq!(message.attr("sender"), Some("bob"));
    }

    #[test]
    fn test_parse_translatable_value() {
        let doc = parse("[error]\nmessage=_\"nope\"\n[/error]").unwrap();
        assert_eq!(doc.child("error").unwrap().attr("message"), Some("nope"));
    }

    #[test]
    fn test_parse_rejects_mismatched_close() {
        let err = parse("[a]\n[/b]").unwrap_err();
        assert!(matches!(err, WmlError::MismatchedClose { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_unclosed_tag() {
        assert_eq!(parse("[a]\nx=1").unwrap_err(), WmlError::Unclosed("a".into()));
    }

    #[test]
    fn test_parse_rejects_stray_close() {
        assert!(matches!(
            parse("[/a]").unwrap_err(),
            WmlError::UnexpectedClose { line: 1, .. }
        ));
    }

    #[test]
    fn test_parse_rejects_unterminated_string() {
        assert!(matches!(
            parse("[a]\nx=\"open\n[/a]").unwrap_err(),
            WmlError::UnterminatedString { line: 2 }
        ));
    }

    #[test]
    fn test_writer_escapes_quotes_and_keeps_order() {
        let node = Node::new("login")
            .with_attr("password", "")
            .with_attr("username", "say \"x\"");
        assert_eq!(
            node.to_string(),
            "[login]\npassword=\"\"\nusername=\"say \"\"x\"\"\"\n[/login]\n"
        );
    }

    #[test]
    fn test_written_document_parses_back() {
        let node = Node::new("gamelist_diff").with_child(
            Node::new("insert_child")
                .with_attr("index", "2")
                .with_child(Node::new("user").with_attr("name", "carol")),
        );
        let reparsed = parse(&node.to_string()).unwrap();
        assert_eq!(reparsed.children(), &[node]);
    }

    #[test]
    fn test_flatten_child_attributes() {
        let doc = parse("[redirect]\nhost=\"example.org\"\nport=\"15001\"\n[/redirect]").unwrap();
        let flat = doc.flatten_child_attributes();
        assert_eq!(flat.get("host").map(String::as_str), Some("example.org"));
        assert_eq!(flat.get("port").map(String::as_str), Some("15001"));
    }

    #[test]
    fn test_child_outlives_lookup_name() {
        let doc = parse("[join_lobby]\n[/join_lobby]\n[user]\nname=\"bob\"\n[/user]\n").unwrap();
        let user = {
            let tag = String::from("user");
            doc.child(&tag)
        };
        assert_eq!(user.and_then(|u| u.attr("name")), Some("bob"));
        assert!(doc.child("game").is_none());
    }
}
