//! Minimal Newick reading and writing.
//!
//! Grammar accepted by [`parse_newick`]:
//! * tree ::= subtree ';'
//! * subtree ::= '(' subtree (',' subtree)* ')' [label] [':' number] | label [':' number]
//!
//! Whitespace may appear between tokens and `[...]` comments are skipped.
//! Labels are unquoted or single-quoted (with `''` as an escaped quote).

use super::TreeError;
use super::arena::{NodeId, Tree};
use std::fmt::Write;

/// Characters ending an unquoted label.
const LABEL_DELIMITERS: &[u8] = b"()[],:; \n\t\r";

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn error(&self, message: impl Into<String>) -> TreeError {
        TreeError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), TreeError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    let start = self.pos;
                    while self.peek().is_some_and(|b| b != b']') {
                        self.pos += 1;
                    }
                    if self.peek().is_none() {
                        return Err(TreeError::Parse {
                            position: start,
                            message: "unterminated comment".into(),
                        });
                    }
                    self.pos += 1;
                }
                _ => return Ok(()),
            }
        }
    }

    fn consume(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn label(&mut self) -> Result<Option<String>, TreeError> {
        self.skip_whitespace_and_comments()?;
        if self.consume(b'\'') {
            let mut label = String::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated quoted label")),
                    Some(b'\'') => {
                        self.pos += 1;
                        if self.consume(b'\'') {
                            label.push('\'');
                        } else {
                            break;
                        }
                    }
                    Some(_) => {
                        let start = self.pos;
                        while self.peek().is_some_and(|b| b != b'\'') {
                            self.pos += 1;
                        }
                        label.push_str(&String::from_utf8_lossy(&self.bytes[start..self.pos]));
                    }
                }
            }
            return Ok(Some(label));
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| !LABEL_DELIMITERS.contains(&b))
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&self.bytes[start..self.pos]).replace('_', " "),
        ))
    }

    fn branch_length(&mut self) -> Result<Option<f64>, TreeError> {
        self.skip_whitespace_and_comments()?;
        if !self.consume(b':') {
            return Ok(None);
        }
        self.skip_whitespace_and_comments()?;
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
        {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]);
        text.parse::<f64>()
            .map(Some)
            .map_err(|_| TreeError::Parse {
                position: start,
                message: format!("invalid branch length '{text}'"),
            })
    }
}

/// Parses one Newick tree.
///
/// Node ids are assigned in pre-order starting from the root (id 0).
///
/// # Errors
///
/// Returns [`TreeError::Parse`] with the byte offset of the first problem.
pub fn parse_newick(text: &str) -> Result<Tree, TreeError> {
    let mut cursor = Cursor {
        bytes: text.as_bytes(),
        pos: 0,
    };
    let mut tree = Tree::new();
    let root = tree.root();
    cursor.skip_whitespace_and_comments()?;
    if cursor.peek() == Some(b'(') {
        parse_children(&mut cursor, &mut tree, root)?;
    }
    let name = cursor.label()?;
    let length = cursor.branch_length()?;
    {
        let node = tree.node_mut(root)?;
        node.name = name;
        node.branch_length = length;
    }
    cursor.skip_whitespace_and_comments()?;
    if !cursor.consume(b';') {
        return Err(cursor.error("expected ';' at end of tree"));
    }
    Ok(tree)
}

fn parse_children(cursor: &mut Cursor, tree: &mut Tree, parent: NodeId) -> Result<(), TreeError> {
    // Opening parenthesis.
    cursor.pos += 1;
    loop {
        cursor.skip_whitespace_and_comments()?;
        let child = tree.add_child(parent, None, None)?;
        if cursor.peek() == Some(b'(') {
            parse_children(cursor, tree, child)?;
        }
        let name = cursor.label()?;
        let length = cursor.branch_length()?;
        {
            let node = tree.node_mut(child)?;
            if node.is_leaf() && name.is_none() {
                return Err(cursor.error("leaf without a label"));
            }
            node.name = name;
            node.branch_length = length;
        }
        cursor.skip_whitespace_and_comments()?;
        if cursor.consume(b',') {
            continue;
        }
        if cursor.consume(b')') {
            return Ok(());
        }
        return Err(cursor.error("expected ',' or ')'"));
    }
}

/// Writes `tree` in Newick format, terminated by `;`.
///
/// Internal node names are omitted; branch lengths are written when present.
pub fn to_newick(tree: &Tree) -> String {
    let mut out = String::new();
    write_subtree(tree, tree.root(), &mut out);
    out.push(';');
    out
}

fn write_subtree(tree: &Tree, id: NodeId, out: &mut String) {
    let Ok(node) = tree.node(id) else {
        return;
    };
    if node.is_leaf() {
        out.push_str(&escape_label(node.name.as_deref().unwrap_or("")));
    } else {
        out.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_subtree(tree, child, out);
        }
        out.push(')');
    }
    if id != tree.root() {
        if let Some(length) = node.branch_length {
            let _ = write!(out, ":{length}");
        }
    }
}

fn escape_label(label: &str) -> String {
    if label
        .bytes()
        .any(|b| LABEL_DELIMITERS.contains(&b) || b == b'\'' || b == b'_')
    {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multifurcating_tree_with_lengths() {
        let t = parse_newick("((A:0.1,B:0.2):0.3,C:0.4,D:0.5);").unwrap();
        assert_eq!(t.number_of_leaves(), 4);
        let b = t.node_by_name("B").unwrap();
        assert_eq!(t.branch_length(b).unwrap(), Some(0.2));
        assert_eq!(t.children(t.root()).unwrap().len(), 3);
    }

    #[test]
    fn writer_output_parses_back_to_the_same_tree() {
        let text = "((A:0.1,B:0.2):0.3,C:0.4,D:0.5);";
        let t = parse_newick(text).unwrap();
        assert_eq!(to_newick(&t), text);
    }

    #[test]
    fn comments_whitespace_and_quotes_are_handled() {
        let t = parse_newick(" ( 'my leaf':1e-2 [note], B_x : 2 ) ; ").unwrap();
        assert!(t.node_by_name("my leaf").is_some());
        assert!(t.node_by_name("B x").is_some());
    }

    #[test]
    fn missing_semicolon_is_reported() {
        let result = parse_newick("(A,B)");
        assert!(matches!(result, Err(TreeError::Parse { position: 5, .. })));
    }

    #[test]
    fn bad_branch_length_is_reported() {
        assert!(matches!(
            parse_newick("(A:x,B);"),
            Err(TreeError::Parse { .. })
        ));
    }

    #[test]
    fn unlabeled_leaf_is_rejected() {
        assert!(parse_newick("(A,,B);").is_err());
    }
}
