//! Address parsing and pattern matching
//!
//! Addresses are concrete slash-delimited paths:
//! ```text
//! /tracking/trackers/3/position
//! /synth/osc/1/freq
//! ```
//!
//! Patterns may use OSC wildcards inside a segment:
//! - `*` matches any run of characters (including none)
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]`, `[!0-9]` match one character from (or outside) a class
//! - `{foo,bar}` matches any of the listed alternatives
//!
//! Wildcards never cross a `/`: a pattern and an address must have the same
//! number of segments to match.

use crate::error::PatternError;
use crate::{Error, Result};

/// Characters that make a string a pattern rather than an address
pub const WILDCARD_CHARS: &[char] = &['*', '?', '[', ']', '{', '}'];

/// Check that `s` is a concrete address: starts with '/' and has no wildcards
pub fn is_valid_address(s: &str) -> bool {
    s.starts_with('/') && !s.contains(WILDCARD_CHARS)
}

/// A validated concrete address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    raw: String,
}

impl Address {
    /// Parse an address string
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()));
        }
        if !s.starts_with('/') {
            return Err(Error::InvalidAddress(format!(
                "address must start with '/': {}",
                s
            )));
        }
        if let Some(c) = s.chars().find(|c| WILDCARD_CHARS.contains(c)) {
            return Err(Error::InvalidAddress(format!(
                "wildcard {:?} in address: {}",
                c, s
            )));
        }

        Ok(Self { raw: s.to_string() })
    }

    /// Get the raw address string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Iterate over the address segments
    pub fn segments(&self) -> std::str::Split<'_, char> {
        self.raw[1..].split('/')
    }

    /// Last segment, usually the property name
    pub fn property(&self) -> &str {
        self.segments().last().unwrap_or("")
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<&str> for Address {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// One element of a compiled segment
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// `*`, with its slot in the per-match [`StarMemo`]
    AnyRun(usize),
    /// `?`
    AnyChar,
    Class { negated: bool, ranges: Vec<(char, char)> },
    /// `{a,b}`; each alternative is itself a token sequence
    Alternation(Vec<Vec<Token>>),
}

impl Token {
    fn class_contains(negated: bool, ranges: &[(char, char)], c: char) -> bool {
        let hit = ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
        hit != negated
    }
}

/// A compiled pattern, parsed once and matched many times
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Vec<Token>>,
    /// Number of `*` tokens across all segments
    stars: usize,
    /// True when no segment contains a wildcard
    literal: bool,
}

impl Pattern {
    /// Compile a pattern string
    pub fn compile(s: &str) -> std::result::Result<Self, PatternError> {
        if s.is_empty() {
            return Err(PatternError::Empty);
        }
        if !s.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(s.to_string()));
        }

        let mut segments = Vec::new();
        let mut offset = 1;
        let mut stars = 0;
        for seg in s[1..].split('/') {
            let mut parser = Parser::new(seg, offset, stars);
            segments.push(parser.parse_segment()?);
            stars = parser.stars;
            offset += seg.len() + 1;
        }

        let literal = segments
            .iter()
            .all(|seg| seg.iter().all(|t| matches!(t, Token::Literal(_))));

        Ok(Self {
            raw: s.to_string(),
            segments,
            stars,
            literal,
        })
    }

    /// The source string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern has no wildcards and matches exactly one address
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// Check if an address string matches this pattern
    pub fn matches(&self, address: &str) -> bool {
        if self.literal {
            return address == self.raw;
        }
        let Some(rest) = address.strip_prefix('/') else {
            return false;
        };

        if rest.split('/').count() != self.segments.len() {
            return false;
        }

        let mut memo = StarMemo(vec![0; self.stars]);
        self.segments
            .iter()
            .zip(rest.split('/'))
            .all(|(seg, part)| match_tokens(Frame::root(seg), part, &mut memo))
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> std::result::Result<Self, PatternError> {
        Pattern::compile(s)
    }
}

// ============================================================================
// PARSER
// ============================================================================

/// Recursive-descent parser for a single segment
struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    /// Offset of this segment in the full pattern, for error reporting
    base: usize,
    /// Next free star slot
    stars: usize,
}

impl<'a> Parser<'a> {
    fn new(segment: &'a str, base: usize, stars: usize) -> Self {
        Self {
            chars: segment.char_indices().peekable(),
            base,
            stars,
        }
    }

    fn parse_segment(&mut self) -> std::result::Result<Vec<Token>, PatternError> {
        self.parse_sequence(false)
    }

    /// Parse tokens until end of input, or until ',' / '}' when inside braces
    fn parse_sequence(&mut self, in_braces: bool) -> std::result::Result<Vec<Token>, PatternError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();

        while let Some(&(i, c)) = self.chars.peek() {
            let token = match c {
                ',' | '}' if in_braces => break,
                '}' | ']' => {
                    return Err(PatternError::Unexpected {
                        ch: c,
                        offset: self.base + i,
                    })
                }
                '*' => {
                    self.chars.next();
                    // Consecutive stars collapse into one
                    if matches!(tokens.last(), Some(Token::AnyRun(_))) && literal.is_empty() {
                        continue;
                    }
                    self.stars += 1;
                    Token::AnyRun(self.stars - 1)
                }
                '?' => {
                    self.chars.next();
                    Token::AnyChar
                }
                '[' => {
                    self.chars.next();
                    self.parse_class(self.base + i)?
                }
                '{' => {
                    self.chars.next();
                    self.parse_alternation(self.base + i)?
                }
                _ => {
                    self.chars.next();
                    literal.push(c);
                    continue;
                }
            };

            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        Ok(tokens)
    }

    fn parse_class(&mut self, open: usize) -> std::result::Result<Token, PatternError> {
        let negated = matches!(self.chars.peek(), Some((_, '!')));
        if negated {
            self.chars.next();
        }

        let mut members = Vec::new();
        loop {
            match self.chars.next() {
                None => return Err(PatternError::UnclosedBracket(open)),
                Some((_, ']')) => break,
                Some((_, c)) => members.push(c),
            }
        }
        if members.is_empty() {
            return Err(PatternError::EmptyClass(open));
        }

        // '-' between two members forms a range; at either end it is literal
        let mut ranges = Vec::new();
        let mut i = 0;
        while i < members.len() {
            if i + 2 < members.len() && members[i + 1] == '-' {
                let (start, end) = (members[i], members[i + 2]);
                if start > end {
                    return Err(PatternError::InvalidRange { start, end });
                }
                ranges.push((start, end));
                i += 3;
            } else {
                ranges.push((members[i], members[i]));
                i += 1;
            }
        }

        Ok(Token::Class { negated, ranges })
    }

    fn parse_alternation(&mut self, open: usize) -> std::result::Result<Token, PatternError> {
        let mut alternatives = Vec::new();
        loop {
            alternatives.push(self.parse_sequence(true)?);
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, '}')) => break,
                _ => return Err(PatternError::UnclosedBrace(open)),
            }
        }
        Ok(Token::Alternation(alternatives))
    }
}

// ============================================================================
// MATCHER
// ============================================================================

/// Token sequence plus the continuation to match once it is exhausted.
///
/// Alternatives are matched by pushing the tokens after the `{...}` as the
/// continuation, so no token vectors are cloned at match time.
#[derive(Clone, Copy)]
struct Frame<'a> {
    tokens: &'a [Token],
    next: Option<&'a Frame<'a>>,
}

impl<'a> Frame<'a> {
    fn root(tokens: &'a [Token]) -> Self {
        Self { tokens, next: None }
    }
}

/// Suffix lengths already ruled out for each `*`, indexed by slot.
///
/// Every token sequence sits at one place in the pattern, so a star always
/// has the same continuation. A star matches a suffix of length `n` exactly
/// when its continuation matches some suffix no longer than `n`; once it fails
/// for `n` it fails for every shorter suffix too. Each slot holds the count
/// of suffix lengths (`0..count`) known to fail, which keeps every star's
/// scan linear in the segment length.
struct StarMemo(Vec<usize>);

fn match_tokens(frame: Frame<'_>, input: &str, memo: &mut StarMemo) -> bool {
    let Some((token, rest)) = frame.tokens.split_first() else {
        return match frame.next {
            Some(next) => match_tokens(*next, input, memo),
            None => input.is_empty(),
        };
    };
    let tail = Frame {
        tokens: rest,
        next: frame.next,
    };

    match token {
        Token::Literal(lit) => input
            .strip_prefix(lit.as_str())
            .is_some_and(|after| match_tokens(tail, after, memo)),
        Token::AnyChar => {
            let mut chars = input.chars();
            chars.next().is_some() && match_tokens(tail, chars.as_str(), memo)
        }
        Token::Class { negated, ranges } => {
            let mut chars = input.chars();
            match chars.next() {
                Some(c) => {
                    Token::class_contains(*negated, ranges, c)
                        && match_tokens(tail, chars.as_str(), memo)
                }
                None => false,
            }
        }
        Token::AnyRun(slot) => {
            // Trailing star swallows the rest of the segment
            if tail.tokens.is_empty() && tail.next.is_none() {
                return true;
            }
            let failed = memo.0[*slot];
            if input.len() < failed {
                return false;
            }

            // Greedy: try the longest run first, skipping suffixes already ruled out
            let mut cut = input.len() - failed;
            while !input.is_char_boundary(cut) {
                cut -= 1;
            }
            loop {
                if match_tokens(tail, &input[cut..], memo) {
                    return true;
                }
                if cut == 0 {
                    break;
                }
                cut -= 1;
                while !input.is_char_boundary(cut) {
                    cut -= 1;
                }
            }
            memo.0[*slot] = input.len() + 1;
            false
        }
        Token::Alternation(alternatives) => alternatives.iter().any(|alt| {
            let frame = Frame {
                tokens: alt,
                next: Some(&tail),
            };
            match_tokens(frame, input, memo)
        }),
    }
}
