//! USDA (ASCII) file parser.
//!
//! The text is split into tokens up front and then parsed with a small
//! recursive-descent parser over a token queue.
//!
//! # Supported Syntax
//!
//! - Layer header metadata, including `subLayers`
//! - `def`/`over`/`class` prims with optional type names
//! - Prim metadata, list-edited `references` and `payload`
//! - `variantSet "name" = { "variant" { ... } }`
//! - Attributes (`type[] name = value`), `.timeSamples`, `.connect`
//! - Relationships (`rel name = </Target>`)
//! - Values: numbers, strings, asset paths, paths, tuples, arrays,
//!   typed dictionaries and time-sample maps
//!
//! Binary crate files (`PXR-USDC`) are rejected with
//! [`ParseError::UnsupportedFormat`].
//!
//! Prims, variant sets and bracketed values may nest at most
//! [`MAX_NESTING_DEPTH`] levels; deeper input is a parse error.

use std::collections::VecDeque;

use thiserror::Error;

use super::layer::{
    Layer, ListEdit, MetadataEntry, PrimSpec, PropertyKind, PropertySpec, Reference, Specifier,
    VariantSetSpec, VariantSpec,
};
use super::path::{child_path, is_valid_prim_name};
use super::resolver::AssetLocation;
use super::value::{DictEntry, Value};

/// Errors that can occur during USDA parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid USDA header: expected '#usda', found {0:?}")]
    InvalidHeader(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unexpected end of file")]
    UnexpectedEof,

    #[error("Invalid number format: {0}")]
    InvalidNumber(String),

    #[error("Unclosed block starting at line {0}")]
    UnclosedBlock(usize),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

const USDC_MAGIC: &[u8] = b"PXR-USDC";

/// Deepest combined nesting of prims, variant sets and values accepted.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Parse raw layer bytes. Rejects binary crate files.
pub fn parse_layer_bytes(bytes: &[u8], location: AssetLocation) -> ParseResult<Layer> {
    if bytes.starts_with(USDC_MAGIC) {
        return Err(ParseError::UnsupportedFormat(format!(
            "{} is a binary crate file",
            location
        )));
    }
    let content = std::str::from_utf8(bytes).map_err(|e| ParseError::Parse {
        line: 0,
        message: format!("layer is not valid UTF-8: {}", e),
    })?;
    parse_usda(content, location)
}

/// Parse USDA text into a layer at `location`.
pub fn parse_usda(content: &str, location: AssetLocation) -> ParseResult<Layer> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let first_line = content.lines().next().unwrap_or("").trim_end();

    if first_line.starts_with("PXR-USDC") {
        return Err(ParseError::UnsupportedFormat(format!("{} is a binary crate file", location)));
    }
    if !first_line.starts_with("#usda") {
        return Err(ParseError::InvalidHeader(first_line.chars().take(32).collect()));
    }

    // The header line is a comment to the tokenizer.
    let tokens = tokenize(content)?;
    let mut parser = UsdaParser::new(tokens);
    parser.parse_layer(location)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    AssetPath(String),
    PathRef(String),
    Punct(char),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{}'", s),
            Token::Number(s) => format!("number '{}'", s),
            Token::Str(s) => format!("string {:?}", s),
            Token::AssetPath(s) => format!("asset path @{}@", s),
            Token::PathRef(s) => format!("path <{}>", s),
            Token::Punct(c) => format!("'{}'", c),
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
    line: usize,
}

fn tokenize(src: &str) -> ParseResult<VecDeque<(usize, Token)>> {
    let mut lexer = Lexer {
        chars: src.char_indices().peekable(),
        src,
        line: 1,
    };
    let mut tokens = VecDeque::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push_back(token);
    }
    Ok(tokens)
}

impl Lexer<'_> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn rest_starts_with(&mut self, pattern: &str) -> bool {
        match self.chars.peek() {
            Some(&(i, _)) => self.src[i..].starts_with(pattern),
            None => false,
        }
    }

    fn next_token(&mut self) -> ParseResult<Option<(usize, Token)>> {
        loop {
            match self.peek() {
                None => return Ok(None),
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(_) => break,
            }
        }

        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let token = match c {
            '"' | '\'' => Token::Str(self.lex_string(c)?),
            '@' => Token::AssetPath(self.lex_asset_path()?),
            '<' => {
                self.bump();
                let mut path = String::new();
                loop {
                    match self.bump() {
                        Some('>') => break,
                        Some(c) => path.push(c),
                        None => return Err(self.error("unterminated path reference")),
                    }
                }
                Token::PathRef(path)
            }
            '(' | ')' | '[' | ']' | '{' | '}' | '=' | ',' | ';' | ':' => {
                self.bump();
                Token::Punct(c)
            }
            c if c.is_ascii_digit() || c == '.' => Token::Number(self.lex_number()),
            '-' | '+' => {
                self.bump();
                match self.peek() {
                    Some(n) if n.is_ascii_digit() || n == '.' => {
                        let number = self.lex_number();
                        if c == '-' {
                            Token::Number(format!("-{}", number))
                        } else {
                            Token::Number(number)
                        }
                    }
                    Some(n) if n.is_alphabetic() => {
                        let ident = self.lex_ident();
                        Token::Ident(format!("{}{}", c, ident))
                    }
                    _ => return Err(self.error(format!("unexpected character '{}'", c))),
                }
            }
            c if c.is_alphabetic() || c == '_' => Token::Ident(self.lex_ident()),
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };

        Ok(Some((line, token)))
    }

    fn lex_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == ':' || (c == '.' && !ident.is_empty()) {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        ident
    }

    fn lex_number(&mut self) -> String {
        let mut number = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                self.bump();
            } else if (c == 'e' || c == 'E') && !number.contains(['e', 'E']) {
                number.push(c);
                self.bump();
                if let Some(sign @ ('-' | '+')) = self.peek() {
                    number.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        number
    }

    fn lex_string(&mut self, quote: char) -> ParseResult<String> {
        let triple: String = std::iter::repeat(quote).take(3).collect();
        let is_triple = self.rest_starts_with(&triple);
        let start_line = self.line;
        for _ in 0..if is_triple { 3 } else { 1 } {
            self.bump();
        }

        let mut out = String::new();
        loop {
            if is_triple && self.rest_starts_with(&triple) {
                for _ in 0..3 {
                    self.bump();
                }
                return Ok(out);
            }
            match self.bump() {
                None => {
                    return Err(ParseError::Parse {
                        line: start_line,
                        message: "unterminated string".to_string(),
                    })
                }
                Some(c) if c == quote && !is_triple => return Ok(out),
                Some('\n') if !is_triple => return Err(self.error("newline in string")),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('x') => {
                        let hex: String = [self.bump(), self.bump()].into_iter().flatten().collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| self.error(format!("invalid escape \\x{}", hex)))?;
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    Some(other) => out.push(other),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_asset_path(&mut self) -> ParseResult<String> {
        let delimiter = if self.rest_starts_with("@@@") { "@@@" } else { "@" };
        for _ in 0..delimiter.len() {
            self.bump();
        }
        let mut out = String::new();
        loop {
            if self.rest_starts_with(delimiter) {
                for _ in 0..delimiter.len() {
                    self.bump();
                }
                return Ok(out);
            }
            match self.bump() {
                Some('\n') | None => return Err(self.error("unterminated asset path")),
                Some(c) => out.push(c),
            }
        }
    }
}

/// USDA token-stream parser.
struct UsdaParser {
    tokens: VecDeque<(usize, Token)>,
    current_line: usize,
    depth: usize,
}

impl UsdaParser {
    fn new(tokens: VecDeque<(usize, Token)>) -> Self {
        Self {
            tokens,
            current_line: 1,
            depth: 0,
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error(format!("nesting deeper than {} levels", MAX_NESTING_DEPTH)));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Parse {
            line: self.current_line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.front().map(|(_, t)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(offset).map(|(_, t)| t)
    }

    fn next(&mut self) -> ParseResult<Token> {
        let (line, token) = self.tokens.pop_front().ok_or(ParseError::UnexpectedEof)?;
        self.current_line = line;
        Ok(token)
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn at_ident(&self, s: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(i)) if i == s)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.at_punct(c) {
            self.tokens.pop_front();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> ParseResult<()> {
        match self.next()? {
            Token::Punct(p) if p == c => Ok(()),
            other => Err(self.error(format!("expected '{}', found {}", c, other.describe()))),
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(self.error(format!("expected identifier, found {}", other.describe()))),
        }
    }

    fn expect_string(&mut self) -> ParseResult<String> {
        match self.next()? {
            Token::Str(s) => Ok(s),
            other => Err(self.error(format!("expected string, found {}", other.describe()))),
        }
    }

    fn skip_separators(&mut self) {
        while self.eat_punct(';') || self.eat_punct(',') {}
    }

    /// Consume an optional list-edit keyword when it precedes a statement.
    fn parse_list_edit(&mut self) -> Option<ListEdit> {
        let edit = match self.peek() {
            Some(Token::Ident(s)) => ListEdit::from_keyword(s)?,
            _ => return None,
        };
        // `add`/`delete` etc. are only keywords when followed by another identifier
        if matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.tokens.pop_front();
            Some(edit)
        } else {
            None
        }
    }

    fn parse_layer(&mut self, location: AssetLocation) -> ParseResult<Layer> {
        let mut layer = Layer::new(location);

        if self.eat_punct('(') {
            self.parse_layer_metadata(&mut layer)?;
        }

        while self.peek().is_some() {
            let prim = self.parse_prim("/")?;
            layer.root.children.push(prim);
        }

        Ok(layer)
    }

    fn parse_layer_metadata(&mut self, layer: &mut Layer) -> ParseResult<()> {
        loop {
            self.skip_separators();
            if self.eat_punct(')') {
                return Ok(());
            }
            if let Some(Token::Str(_)) = self.peek() {
                let doc = self.expect_string()?;
                layer.metadata.push(MetadataEntry::new("doc", Value::String(doc)));
                continue;
            }

            let list_edit = self.parse_list_edit();
            let key = self.expect_ident()?;
            self.expect_punct('=')?;

            if key == "subLayers" {
                layer.sub_layers = self.parse_sub_layers()?;
            } else {
                let value = self.parse_value()?;
                layer.metadata.push(MetadataEntry { list_edit, key, value });
            }
        }
    }

    fn parse_sub_layers(&mut self) -> ParseResult<Vec<String>> {
        let mut sub_layers = Vec::new();
        self.expect_punct('[')?;
        loop {
            self.skip_separators();
            if self.eat_punct(']') {
                return Ok(sub_layers);
            }
            match self.next()? {
                Token::AssetPath(path) => sub_layers.push(path),
                other => return Err(self.error(format!("expected sublayer asset path, found {}", other.describe()))),
            }
            // layer offsets are accepted but not applied
            if self.eat_punct('(') {
                self.skip_balanced(')')?;
            }
        }
    }

    /// Skip tokens up to and including the closing delimiter.
    fn skip_balanced(&mut self, close: char) -> ParseResult<()> {
        let start = self.current_line;
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.next().map_err(|_| ParseError::UnclosedBlock(start))?;
            match token {
                Token::Punct('(' | '[' | '{') => depth += 1,
                Token::Punct(c @ (')' | ']' | '}')) => {
                    depth -= 1;
                    if depth == 0 && c != close {
                        return Err(self.error(format!("expected '{}', found '{}'", close, c)));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Parse a `def|over|class [Type] "name" [(...)] { ... }` statement.
    fn parse_prim(&mut self, parent_path: &str) -> ParseResult<PrimSpec> {
        let keyword = self.expect_ident()?;
        let specifier = Specifier::from_keyword(&keyword)
            .ok_or_else(|| self.error(format!("expected def, over or class, found '{}'", keyword)))?;

        let type_name = match self.peek() {
            Some(Token::Ident(_)) => self.expect_ident()?,
            _ => String::new(),
        };
        let name = self.expect_string()?;
        if !is_valid_prim_name(&name) {
            log::debug!("Line {}: non-identifier prim name {:?}", self.current_line, name);
        }
        let path = child_path(parent_path, &name);
        let mut prim = PrimSpec::new(specifier, type_name, name, path);

        if self.eat_punct('(') {
            self.parse_prim_metadata(&mut prim)?;
        }

        self.expect_punct('{')?;
        self.parse_prim_body(&mut prim)?;
        Ok(prim)
    }

    fn parse_prim_metadata(&mut self, prim: &mut PrimSpec) -> ParseResult<()> {
        loop {
            self.skip_separators();
            if self.eat_punct(')') {
                return Ok(());
            }
            if let Some(Token::Str(_)) = self.peek() {
                let doc = self.expect_string()?;
                prim.metadata.push(MetadataEntry::new("doc", Value::String(doc)));
                continue;
            }

            let list_edit = self.parse_list_edit();
            let key = self.expect_ident()?;
            self.expect_punct('=')?;

            match key.as_str() {
                "references" => {
                    let items = self.parse_reference_list()?;
                    prim.references.set(list_edit, items);
                }
                "payload" | "payloads" => {
                    let items = self.parse_reference_list()?;
                    prim.payloads.set(list_edit, items);
                }
                _ => {
                    let value = self.parse_value()?;
                    prim.metadata.push(MetadataEntry { list_edit, key, value });
                }
            }
        }
    }

    /// `None`, a single reference, or a bracketed list of references.
    fn parse_reference_list(&mut self) -> ParseResult<Vec<Reference>> {
        if self.at_ident("None") {
            self.tokens.pop_front();
            return Ok(Vec::new());
        }
        if !self.eat_punct('[') {
            return Ok(vec![self.parse_reference()?]);
        }

        let mut items = Vec::new();
        loop {
            self.skip_separators();
            if self.eat_punct(']') {
                return Ok(items);
            }
            items.push(self.parse_reference()?);
        }
    }

    /// `[@asset@][</prim>][( ... )]`
    fn parse_reference(&mut self) -> ParseResult<Reference> {
        let mut reference = Reference::default();
        let mut found = false;

        if let Some(Token::AssetPath(_)) = self.peek() {
            if let Token::AssetPath(asset) = self.next()? {
                reference.asset_path = asset;
            }
            found = true;
        }
        if let Some(Token::PathRef(_)) = self.peek() {
            if let Token::PathRef(path) = self.next()? {
                reference.prim_path = path;
            }
            found = true;
        }
        if !found {
            let description = self.peek().map(Token::describe).unwrap_or_else(|| "end of file".into());
            return Err(self.error(format!("expected reference, found {}", description)));
        }
        // reference metadata (layer offsets, customData) is not kept
        if self.eat_punct('(') {
            self.skip_balanced(')')?;
        }
        Ok(reference)
    }

    fn parse_prim_body(&mut self, prim: &mut PrimSpec) -> ParseResult<()> {
        let start = self.current_line;
        loop {
            self.skip_separators();
            let Some(token) = self.peek() else {
                return Err(ParseError::UnclosedBlock(start));
            };

            match token {
                Token::Punct('}') => {
                    self.tokens.pop_front();
                    return Ok(());
                }
                Token::Ident(word) if Specifier::from_keyword(word).is_some() => {
                    let child = self.nested(|p| p.parse_prim(&prim.path))?;
                    if let Some(existing) = prim.children.iter_mut().find(|c| c.name == child.name) {
                        *existing = child;
                    } else {
                        prim.children.push(child);
                    }
                }
                Token::Ident(word) if word == "variantSet" => {
                    self.tokens.pop_front();
                    let variant_set = self.nested(|p| p.parse_variant_set(&prim.path))?;
                    prim.variant_sets.push(variant_set);
                }
                Token::Ident(word)
                    if word == "reorder"
                        && matches!(self.peek_at(1), Some(Token::Ident(n)) if n == "nameChildren" || n == "properties") =>
                {
                    self.tokens.pop_front();
                    self.tokens.pop_front();
                    self.expect_punct('=')?;
                    self.parse_value()?;
                }
                _ => self.parse_property(prim)?,
            }
        }
    }

    fn parse_variant_set(&mut self, prim_path: &str) -> ParseResult<VariantSetSpec> {
        let name = self.expect_string()?;
        self.expect_punct('=')?;
        self.expect_punct('{')?;

        let start = self.current_line;
        let mut variants = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => return Err(ParseError::UnclosedBlock(start)),
                Some(Token::Punct('}')) => {
                    self.tokens.pop_front();
                    break;
                }
                _ => {}
            }

            let variant_name = self.expect_string()?;
            // variant contents live at the owning prim's namespace location
            let mut variant = PrimSpec::new(Specifier::Over, "", variant_name.clone(), prim_path);
            if self.eat_punct('(') {
                self.parse_prim_metadata(&mut variant)?;
            }
            self.expect_punct('{')?;
            self.parse_prim_body(&mut variant)?;
            variants.push(VariantSpec {
                name: variant_name,
                prim: variant,
            });
        }

        Ok(VariantSetSpec { name, variants })
    }

    /// `[edit] [custom] [uniform] (rel name | type[[]] name)[.timeSamples|.connect] [= value] [( ... )]`
    fn parse_property(&mut self, prim: &mut PrimSpec) -> ParseResult<()> {
        let list_edit = self.parse_list_edit();

        let mut custom = false;
        if self.at_ident("custom") && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.tokens.pop_front();
            custom = true;
        }

        let mut variability = None;
        if let Some(Token::Ident(word)) = self.peek() {
            if matches!(word.as_str(), "uniform" | "config" | "varying")
                && matches!(self.peek_at(1), Some(Token::Ident(_)))
            {
                variability = Some(self.expect_ident()?);
            }
        }

        let type_word = self.expect_ident()?;
        let kind = if type_word == "rel" {
            PropertyKind::Relationship
        } else {
            let mut type_name = type_word;
            if self.at_punct('[') && self.peek_at(1) == Some(&Token::Punct(']')) {
                self.tokens.pop_front();
                self.tokens.pop_front();
                type_name.push_str("[]");
            }
            PropertyKind::Attribute { type_name }
        };

        let full_name = self.expect_ident()?;
        let (name, field) = if let Some(base) = full_name.strip_suffix(".timeSamples") {
            (base.to_string(), PropertyField::TimeSamples)
        } else if let Some(base) = full_name.strip_suffix(".connect") {
            (base.to_string(), PropertyField::Connections)
        } else {
            (full_name, PropertyField::Default)
        };

        let value = if self.eat_punct('=') {
            Some(match field {
                PropertyField::TimeSamples => self.parse_time_samples()?,
                _ => self.parse_value()?,
            })
        } else {
            None
        };

        let mut metadata = Vec::new();
        if self.eat_punct('(') {
            metadata = self.parse_property_metadata()?;
        }

        let index = match prim.properties.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                prim.properties.push(PropertySpec {
                    kind: kind.clone(),
                    ..PropertySpec::attribute(name.clone(), "")
                });
                prim.properties.len() - 1
            }
        };
        let property = &mut prim.properties[index];
        property.kind = kind;
        property.custom |= custom;
        if variability.is_some() {
            property.variability = variability;
        }
        if list_edit.is_some() {
            property.list_edit = list_edit;
        }
        property.metadata.extend(metadata);
        match field {
            PropertyField::Default => {
                if value.is_some() {
                    property.default = value;
                }
            }
            PropertyField::TimeSamples => property.time_samples = value,
            PropertyField::Connections => property.connections = value,
        }

        Ok(())
    }

    fn parse_property_metadata(&mut self) -> ParseResult<Vec<MetadataEntry>> {
        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            if self.eat_punct(')') {
                return Ok(entries);
            }
            if let Some(Token::Str(_)) = self.peek() {
                let doc = self.expect_string()?;
                entries.push(MetadataEntry::new("doc", Value::String(doc)));
                continue;
            }
            let list_edit = self.parse_list_edit();
            let key = self.expect_ident()?;
            self.expect_punct('=')?;
            let value = self.parse_value()?;
            entries.push(MetadataEntry { list_edit, key, value });
        }
    }

    /// `{ time: value, ... }`
    fn parse_time_samples(&mut self) -> ParseResult<Value> {
        if self.at_ident("None") {
            self.tokens.pop_front();
            return Ok(Value::None);
        }
        self.expect_punct('{')?;
        let mut samples = Vec::new();
        loop {
            self.skip_separators();
            if self.eat_punct('}') {
                return Ok(Value::TimeSamples(samples));
            }
            let time = match self.next()? {
                Token::Number(n) => n.parse::<f64>().map_err(|_| ParseError::InvalidNumber(n))?,
                other => return Err(self.error(format!("expected sample time, found {}", other.describe()))),
            };
            self.expect_punct(':')?;
            let value = self.parse_value()?;
            samples.push((time, value));
        }
    }

    fn parse_value(&mut self) -> ParseResult<Value> {
        match self.next()? {
            Token::Number(n) => parse_number(&n),
            Token::Str(s) => Ok(Value::String(s)),
            Token::AssetPath(s) => Ok(Value::AssetPath(s)),
            Token::PathRef(s) => Ok(Value::Path(s)),
            Token::Ident(word) => Ok(match word.as_str() {
                "None" => Value::None,
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Ident(word),
            }),
            Token::Punct('(') => Ok(Value::Tuple(self.nested(|p| p.parse_sequence(')'))?)),
            Token::Punct('[') => Ok(Value::Array(self.nested(|p| p.parse_sequence(']'))?)),
            Token::Punct('{') => self.nested(Self::parse_dictionary),
            other => Err(self.error(format!("expected value, found {}", other.describe()))),
        }
    }

    fn parse_sequence(&mut self, close: char) -> ParseResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            self.skip_separators();
            if self.eat_punct(close) {
                return Ok(items);
            }
            items.push(self.parse_value()?);
        }
    }

    /// Body of `{ type key = value ... }` after the opening brace.
    fn parse_dictionary(&mut self) -> ParseResult<Value> {
        let mut entries = Vec::new();
        loop {
            self.skip_separators();
            if self.eat_punct('}') {
                return Ok(Value::Dictionary(entries));
            }
            let mut type_name = self.expect_ident()?;
            if self.at_punct('[') && self.peek_at(1) == Some(&Token::Punct(']')) {
                self.tokens.pop_front();
                self.tokens.pop_front();
                type_name.push_str("[]");
            }
            let key = match self.next()? {
                Token::Ident(s) | Token::Str(s) => s,
                other => return Err(self.error(format!("expected dictionary key, found {}", other.describe()))),
            };
            self.expect_punct('=')?;
            let value = self.parse_value()?;
            entries.push(DictEntry { type_name, key, value });
        }
    }
}

#[derive(Clone, Copy)]
enum PropertyField {
    Default,
    TimeSamples,
    Connections,
}

fn parse_number(text: &str) -> ParseResult<Value> {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ParseError::InvalidNumber(text.to_string()))
    } else {
        match text.parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            // integers too wide for i64 still read as numbers
            Err(_) => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ParseError::InvalidNumber(text.to_string())),
        }
    }
}
