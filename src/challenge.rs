// src/challenge.rs

use std::fmt;

/// One authentication challenge from a `WWW-Authenticate` header.
///
/// Scheme names compare case-insensitively. Parameter names are stored lower-cased, in
/// header order; a repeated name keeps its first value.
#[derive(Clone, Debug)]
pub struct Challenge {
    scheme: String,
    parameters: Vec<(String, String)>,
}

impl Challenge {
    pub fn new<I, K, V>(scheme: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut ordered: Vec<(String, String)> = Vec::new();
        for (name, value) in parameters {
            let name = name.into().to_ascii_lowercase();
            if !ordered.iter().any(|(n, _)| *n == name) {
                ordered.push((name, value.into()));
            }
        }
        Self { scheme: scheme.into(), parameters: ordered }
    }

    /// A challenge with no parameters.
    pub fn of(scheme: impl Into<String>) -> Self {
        Self { scheme: scheme.into(), parameters: Vec::new() }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }
}

impl PartialEq for Challenge {
    fn eq(&self, other: &Self) -> bool {
        self.scheme.eq_ignore_ascii_case(&other.scheme) && self.parameters == other.parameters
    }
}

impl Eq for Challenge {}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scheme)?;
        for (i, (k, v)) in self.parameters.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            let escaped = v.replace('\\', r"\\").replace('"', r#"\""#);
            write!(f, "{sep}{k}=\"{escaped}\"")?;
        }
        Ok(())
    }
}

/// Parses a `WWW-Authenticate` header value into its challenges, in header order.
///
/// Accepts `auth-param` lists with token or quoted-string values and `token68`
/// credentials (whose value is not retained). Malformed fragments are skipped rather than
/// failing the whole header.
pub fn parse_www_authenticate(header: &str) -> Vec<Challenge> {
    let mut cursor = Cursor::new(header);
    let mut challenges = Vec::new();

    loop {
        cursor.skip_separators();
        if cursor.eof() {
            break;
        }

        let scheme = cursor.token();
        if scheme.is_empty() {
            cursor.bump();
            continue;
        }

        cursor.skip_ws();
        let mark = cursor.pos;
        if cursor.token68() {
            cursor.skip_ws();
            if cursor.eof() || cursor.peek() == Some(',') {
                challenges.push(Challenge::of(scheme));
                continue;
            }
            cursor.pos = mark;
        }

        let mut parameters = Vec::new();
        loop {
            cursor.skip_ws();
            let mark = cursor.pos;
            let name = cursor.token();
            if name.is_empty() {
                break;
            }
            cursor.skip_ws();
            if cursor.peek() != Some('=') {
                // Start of the next challenge.
                cursor.pos = mark;
                break;
            }
            cursor.bump();
            cursor.skip_ws();
            let value = if cursor.peek() == Some('"') {
                cursor.quoted_string()
            } else {
                cursor.token()
            };
            parameters.push((name, value));

            cursor.skip_ws();
            if cursor.peek() == Some(',') {
                cursor.skip_separators();
            } else {
                break;
            }
        }
        challenges.push(Challenge::new(scheme, parameters));
    }

    challenges
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
}

impl Cursor {
    fn new(input: &str) -> Self {
        Self { chars: input.chars().collect(), pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.bump();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | ',')) {
            self.bump();
        }
    }

    fn token(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_tchar) {
            self.bump();
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn token68(&mut self) -> bool {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || "-._~+/".contains(c))
        {
            self.bump();
        }
        if self.pos == start {
            return false;
        }
        while self.peek() == Some('=') {
            self.bump();
        }
        true
    }

    fn quoted_string(&mut self) -> String {
        let mut value = String::new();
        self.bump();
        while let Some(c) = self.peek() {
            self.bump();
            match c {
                '"' => break,
                '\\' => {
                    if let Some(escaped) = self.peek() {
                        value.push(escaped);
                        self.bump();
                    }
                }
                _ => value.push(c),
            }
        }
        value
    }
}

fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}
