//! DB2 CLI keyword connection strings.
//!
//! Connection strings are `KEYWORD=value` pairs separated by `;`, e.g.
//! `HOST=db;PORT=50000;DATABASE=x`. Values containing a delimiter are
//! brace-quoted (`PWD={a;b}`), with `}` doubled inside the braces, so a
//! password can never inject an additional keyword into the string.
//!
//! # Security
//! - Strings carrying credentials are built in `Zeroizing` buffers
//! - [`redact_connection_string`] masks every password-bearing keyword

use std::borrow::Cow;
use zeroize::Zeroizing;

/// Keyword carrying the account name
pub const USER_KEYWORD: &str = "UID";
/// Keyword carrying the current password
pub const PASSWORD_KEYWORD: &str = "PWD";
/// Keyword instructing the server to adopt a new password during the handshake
pub const NEW_PASSWORD_KEYWORD: &str = "NEWPWD";

const SECRET_KEYWORDS: &[&str] = &[PASSWORD_KEYWORD, NEW_PASSWORD_KEYWORD, "PASSWORD"];

/// One `KEYWORD=value` pair as it appears in a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Keyword, trimmed, original case
    pub keyword: &'a str,
    raw_value: Option<&'a str>,
}

impl Attribute<'_> {
    /// Returns true if the keyword matches, ignoring ASCII case.
    pub fn is(&self, keyword: &str) -> bool {
        self.keyword.eq_ignore_ascii_case(keyword)
    }

    /// Returns the unquoted value, or `None` for a bare keyword.
    pub fn value(&self) -> Option<Zeroizing<String>> {
        let raw = self.raw_value?.trim();
        let unquoted = match raw.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
            Some(inner) => inner.replace("}}", "}"),
            None => raw.to_string(),
        };
        Some(Zeroizing::new(unquoted))
    }

    fn is_secret(&self) -> bool {
        SECRET_KEYWORDS.iter().any(|k| self.is(k))
    }
}

/// Splits a connection string into its attributes, honouring brace quoting.
///
/// Empty segments (e.g. a trailing `;`) are skipped.
pub fn attributes(connection_string: &str) -> Vec<Attribute<'_>> {
    let bytes = connection_string.as_bytes();
    let len = bytes.len();
    let mut attrs = Vec::new();
    let mut pos = 0;

    while pos < len {
        let segment_end = find_byte(bytes, pos, b';').unwrap_or(len);
        let Some(eq) = find_byte(&bytes[..segment_end], pos, b'=') else {
            let keyword = connection_string[pos..segment_end].trim();
            if !keyword.is_empty() {
                attrs.push(Attribute {
                    keyword,
                    raw_value: None,
                });
            }
            pos = segment_end.saturating_add(1);
            continue;
        };

        let keyword = connection_string[pos..eq].trim();
        let value_start = eq.saturating_add(1);
        let value_start_trimmed = skip_whitespace(bytes, value_start);

        let value_end = if bytes.get(value_start_trimmed) == Some(&b'{') {
            match find_closing_brace(bytes, value_start_trimmed.saturating_add(1)) {
                Some(close) => find_byte(bytes, close, b';').unwrap_or(len),
                None => len,
            }
        } else {
            segment_end
        };

        attrs.push(Attribute {
            keyword,
            raw_value: Some(&connection_string[value_start..value_end]),
        });
        pos = value_end.saturating_add(1);
    }

    attrs
}

/// Returns the value of the first attribute with the given keyword.
pub fn keyword_value(connection_string: &str, keyword: &str) -> Option<Zeroizing<String>> {
    attributes(connection_string)
        .into_iter()
        .find(|a| a.is(keyword))
        .and_then(|a| a.value())
}

/// Returns true if the string contains the keyword (case-insensitive).
pub fn contains_keyword(connection_string: &str, keyword: &str) -> bool {
    attributes(connection_string).iter().any(|a| a.is(keyword))
}

/// Returns true if the string carries any password-bearing keyword.
pub fn contains_secret(connection_string: &str) -> bool {
    attributes(connection_string).iter().any(Attribute::is_secret)
}

/// Appends `;UID=<username>;PWD=<password>` to a base connection string.
///
/// A trailing `;` on the base is not duplicated.
///
/// # Example
/// ```rust
/// use db2secrets_core::rotation::connection_string::with_credentials;
///
/// let primary = with_credentials("HOST=db;PORT=50000;DATABASE=x", "svc", "old1");
/// assert_eq!(primary.as_str(), "HOST=db;PORT=50000;DATABASE=x;UID=svc;PWD=old1");
/// ```
pub fn with_credentials(base: &str, username: &str, password: &str) -> Zeroizing<String> {
    let mut out = Zeroizing::new(String::with_capacity(
        base.len()
            .saturating_add(username.len())
            .saturating_add(password.len())
            .saturating_add(16),
    ));
    push_base(&mut out, base);
    push_attribute(&mut out, USER_KEYWORD, username);
    push_attribute(&mut out, PASSWORD_KEYWORD, password);
    out
}

/// Appends `;NEWPWD=<new_password>` to a connection string.
pub fn with_new_password(connection_string: &str, new_password: &str) -> Zeroizing<String> {
    let mut out = Zeroizing::new(String::with_capacity(
        connection_string
            .len()
            .saturating_add(new_password.len())
            .saturating_add(12),
    ));
    push_base(&mut out, connection_string);
    push_attribute(&mut out, NEW_PASSWORD_KEYWORD, new_password);
    out
}

/// Masks every password-bearing attribute in a connection string.
///
/// Safe to call on arbitrary input; attributes other than `PWD`, `NEWPWD`
/// and `PASSWORD` are preserved.
///
/// # Example
/// ```rust
/// use db2secrets_core::error::redact_connection_string;
///
/// let redacted = redact_connection_string("HOST=db;UID=svc;PWD=old1;NEWPWD=new2");
/// assert_eq!(redacted, "HOST=db;UID=svc;PWD=****;NEWPWD=****");
/// ```
pub fn redact_connection_string(connection_string: &str) -> String {
    attributes(connection_string)
        .iter()
        .map(|attr| match attr.raw_value {
            _ if attr.is_secret() => Cow::Owned(format!("{}=****", attr.keyword)),
            Some(raw) => Cow::Owned(format!("{}={}", attr.keyword, raw.trim())),
            None => Cow::Borrowed(attr.keyword),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn push_base(out: &mut String, base: &str) {
    out.push_str(base.trim_end().trim_end_matches(';'));
}

fn push_attribute(out: &mut String, keyword: &str, value: &str) {
    if !out.is_empty() {
        out.push(';');
    }
    out.push_str(keyword);
    out.push('=');
    if needs_quoting(value) {
        out.push('{');
        for c in value.chars() {
            if c == '}' {
                out.push_str("}}");
            } else {
                out.push(c);
            }
        }
        out.push('}');
    } else {
        out.push_str(value);
    }
}

fn needs_quoting(value: &str) -> bool {
    value.contains([';', '{', '}'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|b| *b == needle)
        .map(|i| i.saturating_add(from))
}

fn skip_whitespace(bytes: &[u8], from: usize) -> usize {
    let mut pos = from;
    while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
        pos = pos.saturating_add(1);
    }
    pos
}

fn find_closing_brace(bytes: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(b) = bytes.get(pos) {
        if *b == b'}' {
            if bytes.get(pos.saturating_add(1)) == Some(&b'}') {
                pos = pos.saturating_add(2);
                continue;
            }
            return Some(pos);
        }
        pos = pos.saturating_add(1);
    }
    None
}
