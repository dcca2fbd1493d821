// Tag scanner for the profile dialect.
//
// This only understands the small tag grammar used by profiles:
// `<NAME attr="value" ...>` or `<NAME attr="value" ... />`.
// Comments, CDATA, entities and escaped quotes are not handled.

use crate::profile::parser::ParseError;

// A single `name="value"` pair of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

// An opening tag read from the source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    pub name: &'a str,
    // Raw text between the tag name and the closing marker
    pub body: &'a str,
    pub self_closing: bool,

    // Offset of the '<' and offset right after the '>'
    pub start: usize,
    pub end: usize,
}

// Forward-only cursor over a profile document
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

#[derive(Debug, Clone, Copy)]
enum LexState<'a> {
    AttributeList,
    Slash { at: usize },
    Name { start: usize },
    AfterName { name: &'a str },
    BeforeValue { name: &'a str },
    QuotedValue { name: &'a str, start: usize },
    UnquotedValue { name: &'a str, start: usize },
}

#[derive(Debug, Clone, Copy)]
struct Close {
    // Offset of the closing marker, "/>" or ">"
    marker: usize,
    end: usize,
    self_closing: bool,
}

struct Lexed<'a> {
    attributes: Vec<Attribute<'a>>,
    close: Option<Close>,
}

impl<'a> Tag<'a> {
    // Return the value of the first attribute with the given name,
    // or an empty string when the attribute is absent
    pub fn attribute(&self, name: &str) -> &'a str {
        get_attribute(self.body, name)
    }
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    // Current cursor offset
    pub fn position(&self) -> usize {
        self.pos
    }

    // Move the cursor to the given offset, the cursor never moves back
    pub fn advance_to(&mut self, offset: usize) {
        self.pos = self.pos.max(offset.min(self.src.len()));
    }

    // Return the offset of the next occurrence of a literal
    // marker (e.g. a closing tag) at or after the cursor
    pub fn find_marker(&self, marker: &str) -> Option<usize> {
        self.src[self.pos..].find(marker).map(|found| self.pos + found)
    }

    // Return the offset of the next opening tag with the given name
    // at or after the cursor, without consuming it
    pub fn find_tag(&self, name: &str) -> Option<usize> {
        let mut offset = self.pos;

        while let Some(found) = self.src[offset..].find('<') {
            let start = offset + found;
            let rest = &self.src[start + 1..];

            if rest.starts_with(name)
                && is_name_boundary(rest[name.len()..].chars().next())
            {
                return Some(start);
            }

            offset = start + 1;
        }

        None
    }

    // Read the next opening tag with the given name if it starts
    // before `limit`. The cursor is moved right after the tag.
    pub fn next_tag(
        &mut self,
        name: &str,
        limit: usize,
    ) -> Result<Option<Tag<'a>>, ParseError> {
        let start = match self.find_tag(name) {
            Some(start) if start < limit => start,
            _ => return Ok(None),
        };

        let name_end = start + 1 + name.len();
        let lexed = lex_attributes(self.src, name_end);

        let close = lexed.close.ok_or_else(|| ParseError::UnterminatedTag {
            tag: name.to_string(),
            offset: start,
        })?;

        self.advance_to(close.end);

        Ok(Some(Tag {
            name: &self.src[start + 1..name_end],
            body: &self.src[name_end..close.marker],
            self_closing: close.self_closing,
            start,
            end: close.end,
        }))
    }
}

// Return the value of the first attribute called `name` in the given
// tag body, or an empty string if the attribute is absent
pub fn get_attribute<'a>(tag_body: &'a str, name: &str) -> &'a str {
    lex_attributes(tag_body, 0)
        .attributes
        .into_iter()
        .find(|attribute| attribute.name == name)
        .map(|attribute| attribute.value)
        .unwrap_or("")
}

fn is_name_boundary(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => c.is_whitespace() || c == '>' || c == '/',
    }
}

// Run the attribute list state machine starting at `from` until
// the tag closing marker or the end of the input
fn lex_attributes(src: &str, from: usize) -> Lexed<'_> {
    let mut attributes = Vec::new();
    let mut state = LexState::AttributeList;

    for (i, c) in src[from..].char_indices() {
        let i = from + i;

        // A new tag opening outside of quotes means this one never closed
        if c == '<' && !matches!(state, LexState::QuotedValue { .. }) {
            break;
        }

        state = match state {
            LexState::AttributeList => match c {
                '>' => return Lexed::closed(attributes, i, i + 1, false),
                '/' => LexState::Slash { at: i },
                c if c.is_whitespace() => LexState::AttributeList,
                _ => LexState::Name { start: i },
            },
            LexState::Slash { at } => match c {
                '>' => return Lexed::closed(attributes, at, i + 1, true),
                '/' => LexState::Slash { at: i },
                c if c.is_whitespace() => LexState::AttributeList,
                _ => LexState::Name { start: i },
            },
            LexState::Name { start } => match c {
                '=' => LexState::BeforeValue {
                    name: &src[start..i],
                },
                '>' => {
                    attributes.push(Attribute::bare(&src[start..i]));
                    return Lexed::closed(attributes, i, i + 1, false);
                }
                '/' => {
                    attributes.push(Attribute::bare(&src[start..i]));
                    LexState::Slash { at: i }
                }
                c if c.is_whitespace() => LexState::AfterName {
                    name: &src[start..i],
                },
                _ => LexState::Name { start },
            },
            LexState::AfterName { name } => match c {
                '=' => LexState::BeforeValue { name },
                '>' => {
                    attributes.push(Attribute::bare(name));
                    return Lexed::closed(attributes, i, i + 1, false);
                }
                '/' => {
                    attributes.push(Attribute::bare(name));
                    LexState::Slash { at: i }
                }
                c if c.is_whitespace() => LexState::AfterName { name },
                _ => {
                    attributes.push(Attribute::bare(name));
                    LexState::Name { start: i }
                }
            },
            LexState::BeforeValue { name } => match c {
                '"' => LexState::QuotedValue { name, start: i + 1 },
                '>' => {
                    attributes.push(Attribute::bare(name));
                    return Lexed::closed(attributes, i, i + 1, false);
                }
                c if c.is_whitespace() => LexState::BeforeValue { name },
                _ => LexState::UnquotedValue { name, start: i },
            },
            // A '>' inside quotes belongs to the value
            LexState::QuotedValue { name, start } => match c {
                '"' => {
                    attributes.push(Attribute {
                        name,
                        value: &src[start..i],
                    });
                    LexState::AttributeList
                }
                _ => LexState::QuotedValue { name, start },
            },
            LexState::UnquotedValue { name, start } => match c {
                '>' => {
                    attributes.push(Attribute {
                        name,
                        value: &src[start..i],
                    });
                    return Lexed::closed(attributes, i, i + 1, false);
                }
                '/' => {
                    attributes.push(Attribute {
                        name,
                        value: &src[start..i],
                    });
                    LexState::Slash { at: i }
                }
                c if c.is_whitespace() => {
                    attributes.push(Attribute {
                        name,
                        value: &src[start..i],
                    });
                    LexState::AttributeList
                }
                _ => LexState::UnquotedValue { name, start },
            },
        };
    }

    // Flush the attribute cut short by the end of the input
    match state {
        LexState::Name { start } => {
            attributes.push(Attribute::bare(&src[start..]));
        }
        LexState::AfterName { name } | LexState::BeforeValue { name } => {
            attributes.push(Attribute::bare(name));
        }
        LexState::QuotedValue { name, start }
        | LexState::UnquotedValue { name, start } => {
            attributes.push(Attribute {
                name,
                value: &src[start..],
            });
        }
        LexState::AttributeList | LexState::Slash { .. } => {}
    }

    Lexed {
        attributes,
        close: None,
    }
}

impl<'a> Lexed<'a> {
    fn closed(
        attributes: Vec<Attribute<'a>>,
        marker: usize,
        end: usize,
        self_closing: bool,
    ) -> Self {
        Self {
            attributes,
            close: Some(Close {
                marker,
                end,
                self_closing,
            }),
        }
    }
}

impl<'a> Attribute<'a> {
    // Attribute written without a value
    fn bare(name: &'a str) -> Self {
        Self { name, value: "" }
    }
}
