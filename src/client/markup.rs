//! Minimal, deliberately non-conformant markup parser. It only has to cope
//! with the controlled, template-generated markup fed to `set_inner_html`,
//! not arbitrary web content, so anything surprising is a hard error instead
//! of best-effort recovery.

use html_escape::decode_html_entities;
use thiserror::Error;

use crate::client::{ChildSource, DomError, ElementHandle, FragmentHandle, RemoteDom};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("invalid markup (too many end tags)")]
    TooManyEndTags,
    #[error("invalid markup (no end of tag)")]
    UnterminatedTag,
    #[error("invalid markup (unexpected /)")]
    UnexpectedSlash,
    #[error("invalid markup (missing attribute value)")]
    MissingAttributeValue,
    #[error("invalid markup (unquoted attribute value)")]
    UnquotedAttributeValue,
    #[error("invalid markup (no end of attribute value)")]
    UnterminatedAttributeValue,
    #[error("invalid markup (too many start tags)")]
    TooManyStartTags,
}

/// Where parsed nodes are appended: the result fragment at the bottom of the
/// stack, open elements above it.
enum Container {
    Fragment(FragmentHandle),
    Element(ElementHandle),
}

impl RemoteDom {
    /// Parse a markup string into a document fragment.
    ///
    /// Streaming single pass: text runs become text nodes (with HTML-entity
    /// unescaping), start tags push onto a container stack, end tags pop.
    /// Text sitting immediately before an end tag becomes the element's
    /// `textContent` when it has no children yet, a trailing text node
    /// otherwise. End-tag names are not matched against start tags; balance
    /// is enforced by requiring the stack to be back at the fragment when the
    /// input ends.
    pub fn parse_markup(&mut self, input: &str) -> Result<FragmentHandle, DomError> {
        let frag = self.create_fragment();
        let mut stack: Vec<Container> = vec![Container::Fragment(frag)];
        let bytes = input.as_bytes();
        let len = bytes.len();
        let mut ind = 0;

        while ind < len {
            let ind2 = input[ind..].find('<').map_or(len, |off| ind + off);
            let dec = decode_html_entities(&input[ind..ind2]).into_owned();

            if ind2 + 1 < len && bytes[ind2 + 1] == b'/' {
                // End tag: skip to the next ">" and hand the accumulated text
                // to the element being closed.
                let gt = input[ind2 + 1..]
                    .find('>')
                    .ok_or(MarkupError::TooManyEndTags)?;
                ind = ind2 + 1 + gt + 1;
                if stack.len() <= 1 {
                    return Err(MarkupError::TooManyEndTags.into());
                }
                let Some(Container::Element(closed)) = stack.pop() else {
                    return Err(MarkupError::TooManyEndTags.into());
                };
                if !dec.is_empty() {
                    if self.child_nodes(closed)?.is_empty() {
                        self.set_text_content(closed, &dec)?;
                    } else {
                        let text = self.create_text_node(&dec)?;
                        self.append_child(closed, text)?;
                    }
                }
            } else {
                // Text run, then either end of input or a start tag.
                if !dec.is_empty() {
                    let text = self.create_text_node(&dec)?;
                    self.append_to_top(&stack, text.into())?;
                }
                if ind2 == len {
                    ind = ind2;
                    continue;
                }

                let mut cursor = ind2 + 1;
                while cursor < len && bytes[cursor].is_ascii_alphabetic() {
                    cursor += 1;
                }
                let el = self.create_element(&input[ind2 + 1..cursor])?;
                self.append_to_top(&stack, el.into())?;
                stack.push(Container::Element(el));

                loop {
                    while cursor < len && bytes[cursor] == b' ' {
                        cursor += 1;
                    }
                    if cursor == len {
                        return Err(MarkupError::UnterminatedTag.into());
                    }
                    if bytes[cursor] == b'>' {
                        break;
                    }
                    if bytes[cursor] == b'/' {
                        if cursor + 1 >= len || bytes[cursor + 1] != b'>' {
                            return Err(MarkupError::UnexpectedSlash.into());
                        }
                        cursor += 1;
                        stack.pop();
                        break;
                    }

                    // An attribute: name up to "=", then a quoted value.
                    let eq = input[cursor..]
                        .find('=')
                        .ok_or(MarkupError::MissingAttributeValue)?
                        + cursor;
                    let name = &input[cursor..eq];
                    cursor = eq + 1;
                    let quote = match bytes.get(cursor) {
                        Some(b'"') => '"',
                        Some(b'\'') => '\'',
                        _ => return Err(MarkupError::UnquotedAttributeValue.into()),
                    };
                    cursor += 1;
                    let end = input[cursor..]
                        .find(quote)
                        .ok_or(MarkupError::UnterminatedAttributeValue)?
                        + cursor;
                    let value = input[cursor..end].to_string();
                    cursor = end + 1;
                    self.set_attribute(el, name, &value)?;
                }
                ind = cursor + 1;
            }
        }

        if stack.len() != 1 {
            return Err(MarkupError::TooManyStartTags.into());
        }
        Ok(frag)
    }

    fn append_to_top(&mut self, stack: &[Container], node: ChildSource) -> Result<(), DomError> {
        match stack.last() {
            Some(Container::Fragment(frag)) => {
                if let ChildSource::Node(node) = node {
                    self.fragment_append(*frag, node)?;
                }
                Ok(())
            }
            Some(Container::Element(el)) => self.append_child(*el, node),
            None => Err(MarkupError::TooManyEndTags.into()),
        }
    }
}
