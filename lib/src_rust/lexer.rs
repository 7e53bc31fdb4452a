//! Input buffering and character decoding.
//!
//! The [`Lexer`] reads text chunk by chunk from the caller, decodes it in the
//! requested encoding, and confines reading to the parser's included ranges.
//! It is the interface external scanners are written against, and the lexer
//! automaton in `lex_table` drives it the same way.

use std::fmt;

use super::length::{Length, LENGTH_UNDEFINED};
use super::unicode::{decode, BYTE_ORDER_MARK, MAX_CHAR_BYTES};
use crate::{InputEncoding, LogType, Point, Range, Symbol};

/// Callback invoked with debug messages from the parser and lexer.
pub type Logger = Box<dyn FnMut(LogType, &str) + Send>;

/// A hand-written lexer for the tokens a grammar declares as external.
///
/// The scanner's entire state must round-trip through `serialize` and
/// `deserialize`: the parser restores it before every call to `scan`, using
/// the state recorded after the most recent external token.
pub trait ExternalScanner: Send {
    /// Tries to recognise one token. `valid_symbols[i]` tells whether
    /// external token `i` is acceptable in the current parse state. On
    /// success, set the token with [`Lexer::set_result_symbol`] and return
    /// `true`.
    fn scan(&mut self, lexer: &mut Lexer<'_>, valid_symbols: &[bool]) -> bool;

    fn serialize(&self, buffer: &mut Vec<u8>);

    fn deserialize(&mut self, buffer: &[u8]);
}

/// Where the text comes from.
pub(crate) enum TextSource<'a> {
    Slice(&'a [u8]),
    Callback(Box<dyn FnMut(usize, Point, &mut Vec<u8>) + 'a>),
}

pub(crate) const DEFAULT_RANGE: Range = Range {
    start_byte: 0,
    end_byte: usize::MAX,
    start_point: Point::ZERO,
    end_point: Point::MAX,
};

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

pub struct Lexer<'a> {
    source: TextSource<'a>,
    encoding: InputEncoding,
    buffer: Vec<u8>,
    chunk_start: usize,
    chunk_loaded: bool,

    lookahead: char,
    lookahead_size: usize,

    current_position: Length,
    token_start_position: Length,
    token_end_position: Length,
    examined_end: usize,

    included_ranges: &'a [Range],
    current_included_range_index: usize,

    column: Option<usize>,
    did_get_column: bool,
    result_symbol: Symbol,

    logger: Option<&'a mut Logger>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(
        source: TextSource<'a>,
        encoding: InputEncoding,
        included_ranges: &'a [Range],
        logger: Option<&'a mut Logger>,
    ) -> Self {
        let mut lexer = Self {
            source,
            encoding,
            buffer: Vec::new(),
            chunk_start: 0,
            chunk_loaded: false,
            lookahead: '\0',
            lookahead_size: 0,
            current_position: Length::ZERO,
            token_start_position: Length::ZERO,
            token_end_position: LENGTH_UNDEFINED,
            examined_end: 0,
            included_ranges: if included_ranges.is_empty() {
                std::slice::from_ref(&DEFAULT_RANGE)
            } else {
                included_ranges
            },
            current_included_range_index: 0,
            column: None,
            did_get_column: false,
            result_symbol: 0,
            logger,
        };
        lexer.goto(Length::ZERO);
        lexer
    }

    // -----------------------------------------------------------------------
    // Scanner-facing API
    // -----------------------------------------------------------------------

    /// The next character, or `'\0'` at the end of input.
    #[inline]
    pub fn lookahead(&mut self) -> char {
        self.ensure_lookahead();
        self.lookahead
    }

    /// Whether the lexer is past the end of the last included range.
    #[inline]
    pub fn eof(&self) -> bool {
        self.current_included_range_index >= self.included_ranges.len()
    }

    /// Moves past the current character. With `skip`, the character is
    /// treated as whitespace in front of the token.
    pub fn advance(&mut self, skip: bool) {
        if self.eof() {
            return;
        }
        self.ensure_lookahead();
        if self.logger.is_some() {
            let character = self.lookahead;
            let verb = if skip { "skip" } else { "consume" };
            if (' '..='~').contains(&character) {
                self.log(LogType::Lex, format_args!("{verb} character:'{character}'"));
            } else {
                self.log(LogType::Lex, format_args!("{verb} character:{}", character as u32));
            }
        }
        self.do_advance(skip);
    }

    /// Records the current position as the end of the token being scanned.
    pub fn mark_end(&mut self) {
        if !self.eof() && self.current_included_range_index > 0 {
            // At the very start of an included range the token ends where the
            // previous range did.
            let current = &self.included_ranges[self.current_included_range_index];
            if self.current_position.bytes == current.start_byte {
                let previous = &self.included_ranges[self.current_included_range_index - 1];
                self.token_end_position = Length::new(previous.end_byte, previous.end_point);
                return;
            }
        }
        self.token_end_position = self.current_position;
    }

    /// The number of characters between the start of the line and the
    /// current position.
    pub fn get_column(&mut self) -> usize {
        self.did_get_column = true;
        if let Some(column) = self.column {
            return column;
        }

        let goal = self.current_position;
        let line_start = Length::new(
            goal.bytes - goal.extent.column,
            Point::new(goal.extent.row, 0),
        );
        self.goto(line_start);
        self.column = Some(0);
        while self.current_position.bytes < goal.bytes && !self.eof() {
            self.ensure_lookahead();
            self.do_advance(false);
        }
        self.column.unwrap_or(0)
    }

    /// Whether the lexer sits at the first byte of a non-initial included
    /// range.
    pub fn is_at_included_range_start(&self) -> bool {
        self.included_ranges
            .get(self.current_included_range_index)
            .is_some_and(|range| self.current_position.bytes == range.start_byte)
    }

    /// Sets the token an external scanner recognised, as an index into the
    /// grammar's external tokens.
    pub fn set_result_symbol(&mut self, symbol: Symbol) {
        self.result_symbol = symbol;
    }

    /// Emits a message to the parser's logger.
    pub fn log(&mut self, log_type: LogType, message: fmt::Arguments<'_>) {
        match log_type {
            LogType::Parse => tracing::trace!(target: "canopy::parser", "{}", message),
            LogType::Lex => tracing::trace!(target: "canopy::lexer", "{}", message),
        }
        if let Some(logger) = self.logger.as_deref_mut() {
            logger(log_type, &message.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Parser-facing API
    // -----------------------------------------------------------------------

    #[inline]
    pub(crate) fn current_position(&self) -> Length {
        self.current_position
    }

    #[inline]
    pub(crate) fn token_start_position(&self) -> Length {
        self.token_start_position
    }

    #[inline]
    pub(crate) fn token_end_position(&self) -> Length {
        self.token_end_position
    }

    #[inline]
    pub(crate) fn result_symbol(&self) -> Symbol {
        self.result_symbol
    }

    #[inline]
    pub(crate) fn did_get_column(&self) -> bool {
        self.did_get_column
    }

    pub(crate) fn start_token_here(&mut self) {
        self.token_start_position = self.current_position;
    }

    /// Moves to `position` unless already there.
    pub(crate) fn reset(&mut self, position: Length) {
        if position.bytes != self.current_position.bytes {
            self.goto(position);
        }
    }

    /// Forgets how far previous scans looked ahead.
    pub(crate) fn reset_examined(&mut self) {
        self.examined_end = 0;
    }

    /// Prepares to scan a token at the current position.
    pub(crate) fn start(&mut self) {
        self.token_start_position = self.current_position;
        self.token_end_position = LENGTH_UNDEFINED;
        self.result_symbol = 0;
        self.did_get_column = false;
        if self.eof() {
            return;
        }
        self.ensure_lookahead();
        if self.current_position.bytes == 0 {
            if self.lookahead == BYTE_ORDER_MARK {
                self.advance(true);
            }
            self.column = Some(0);
        }
    }

    /// Completes a scan. Returns the end of the bytes the scan depended on.
    pub(crate) fn finish(&mut self) -> usize {
        if self.token_end_position.is_undefined() {
            self.mark_end();
        }
        // A token that ended on an included range boundary was moved back to
        // the end of the previous range. Its start follows.
        if self.token_end_position.bytes < self.token_start_position.bytes {
            self.token_start_position = self.token_end_position;
        }
        self.record_examined();
        self.examined_end
    }

    /// Moves to `position`, or to the next included byte after it.
    pub(crate) fn goto(&mut self, position: Length) {
        self.record_examined();
        if position.bytes != self.current_position.bytes {
            self.column = None;
        }
        self.current_position = position;

        let found = self
            .included_ranges
            .iter()
            .enumerate()
            .find(|(_, range)| range.end_byte > position.bytes && range.end_byte > range.start_byte);

        match found {
            Some((index, range)) => {
                if range.start_byte >= position.bytes {
                    self.current_position = Length::new(range.start_byte, range.start_point);
                }
                self.current_included_range_index = index;
                if !self.chunk_contains(self.current_position.bytes) {
                    self.clear_chunk();
                }
            }
            None => {
                self.current_included_range_index = self.included_ranges.len();
                if let Some(last) = self.included_ranges.last() {
                    self.current_position = Length::new(last.end_byte, last.end_point);
                }
                self.clear_chunk();
            }
        }
        self.lookahead = '\0';
        self.lookahead_size = 0;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn record_examined(&mut self) {
        if self.lookahead_size > 0 || self.eof() {
            let end = self.current_position.bytes + self.lookahead_size.max(1);
            self.examined_end = self.examined_end.max(end);
        }
    }

    fn chunk(&self) -> &[u8] {
        match &self.source {
            TextSource::Slice(text) => text,
            TextSource::Callback(_) => &self.buffer,
        }
    }

    fn chunk_contains(&self, byte: usize) -> bool {
        self.chunk_loaded
            && byte >= self.chunk_start
            && byte < self.chunk_start + self.chunk().len()
    }

    fn clear_chunk(&mut self) {
        self.chunk_loaded = false;
        self.chunk_start = 0;
        self.buffer.clear();
    }

    /// Fetches the chunk containing the current position.
    fn get_chunk(&mut self) {
        let position = self.current_position;
        match &mut self.source {
            TextSource::Slice(_) => self.chunk_start = 0,
            TextSource::Callback(read) => {
                self.buffer.clear();
                read(position.bytes, position.extent, &mut self.buffer);
                self.chunk_start = position.bytes;
            }
        }
        self.chunk_loaded = true;
        if !self.chunk_contains(position.bytes) {
            self.current_included_range_index = self.included_ranges.len();
        }
    }

    /// Refetches the chunk starting at the current character, for characters
    /// that straddle a chunk boundary. Returns whether more bytes arrived.
    fn extend_chunk(&mut self) -> bool {
        let position = self.current_position;
        let TextSource::Callback(read) = &mut self.source else {
            return false;
        };
        let available = self.buffer.len().saturating_sub(position.bytes - self.chunk_start);
        let mut fresh = Vec::new();
        read(position.bytes, position.extent, &mut fresh);
        if fresh.len() <= available {
            return false;
        }
        self.buffer = fresh;
        self.chunk_start = position.bytes;
        true
    }

    fn ensure_lookahead(&mut self) {
        if self.lookahead_size > 0 || self.eof() {
            return;
        }
        if !self.chunk_contains(self.current_position.bytes) {
            self.get_chunk();
            if self.eof() {
                self.lookahead = '\0';
                self.lookahead_size = 1;
                return;
            }
        }
        self.decode_lookahead();
    }

    fn decode_lookahead(&mut self) {
        let offset = self.current_position.bytes - self.chunk_start;
        let mut decoded = decode(self.encoding, &self.chunk()[offset..]);
        if decoded.character.is_none()
            && self.chunk().len() - offset < MAX_CHAR_BYTES
            && self.extend_chunk()
        {
            decoded = decode(self.encoding, self.chunk());
        }
        self.lookahead = decoded.character.unwrap_or(char::REPLACEMENT_CHARACTER);
        self.lookahead_size = decoded.size;
    }

    fn do_advance(&mut self, skip: bool) {
        if self.lookahead_size > 0 {
            if self.lookahead == '\n' {
                self.current_position.extent.row += 1;
                self.current_position.extent.column = 0;
                self.column = Some(0);
            } else {
                let is_bom =
                    self.current_position.bytes == 0 && self.lookahead == BYTE_ORDER_MARK;
                if !is_bom {
                    if let Some(column) = self.column.as_mut() {
                        *column += 1;
                    }
                }
                self.current_position.extent.column += self.lookahead_size;
            }
            self.current_position.bytes += self.lookahead_size;
        }
        self.record_examined();

        // Hop over gaps between included ranges.
        while let Some(range) = self.included_ranges.get(self.current_included_range_index) {
            if self.current_position.bytes < range.end_byte && range.end_byte != range.start_byte {
                break;
            }
            self.current_included_range_index += 1;
            if let Some(next) = self.included_ranges.get(self.current_included_range_index) {
                self.current_position = Length::new(next.start_byte, next.start_point);
            }
        }

        if skip {
            self.token_start_position = self.current_position;
        }

        self.lookahead = '\0';
        self.lookahead_size = 0;
        if self.eof() {
            self.clear_chunk();
            self.lookahead_size = 1;
        } else {
            self.ensure_lookahead();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(lexer: &mut Lexer<'_>) -> String {
        let mut text = String::new();
        lexer.start();
        while !lexer.eof() {
            text.push(lexer.lookahead());
            lexer.advance(false);
        }
        text
    }

    #[test]
    fn reads_across_chunks() {
        let text = "let é = 1;\nx".as_bytes();
        // One-byte chunks split every multi-byte character.
        let read = |offset: usize, _: Point, buffer: &mut Vec<u8>| {
            let end = (offset + 1).min(text.len());
            buffer.extend_from_slice(&text[offset.min(end)..end]);
        };
        let mut lexer = Lexer::new(
            TextSource::Callback(Box::new(read)),
            InputEncoding::Utf8,
            &[],
            None,
        );
        assert_eq!(drain(&mut lexer), "let é = 1;\nx");
        assert_eq!(lexer.current_position().bytes, text.len());
        assert_eq!(lexer.current_position().extent, Point::new(1, 1));
    }

    #[test]
    fn included_ranges_skip_gaps() {
        let text = b"aaXXbbYYcc";
        let ranges = [
            Range {
                start_byte: 0,
                end_byte: 2,
                start_point: Point::new(0, 0),
                end_point: Point::new(0, 2),
            },
            Range {
                start_byte: 4,
                end_byte: 6,
                start_point: Point::new(0, 4),
                end_point: Point::new(0, 6),
            },
        ];
        let mut lexer = Lexer::new(TextSource::Slice(text), InputEncoding::Utf8, &ranges, None);
        assert_eq!(drain(&mut lexer), "aabb");
        assert!(lexer.eof());
    }

    #[test]
    fn utf16_input() {
        let bytes: Vec<u8> = "if x".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut lexer =
            Lexer::new(TextSource::Slice(&bytes), InputEncoding::Utf16Le, &[], None);
        assert_eq!(drain(&mut lexer), "if x");
        assert_eq!(lexer.current_position().bytes, 8);
    }

    #[test]
    fn column_is_recomputed_after_goto() {
        let text = "ab\n  éf".as_bytes();
        let mut lexer = Lexer::new(TextSource::Slice(text), InputEncoding::Utf8, &[], None);
        lexer.start();
        while lexer.lookahead() != 'f' {
            lexer.advance(false);
        }
        let position = lexer.current_position();
        lexer.goto(Length::ZERO);
        lexer.goto(position);
        assert_eq!(lexer.get_column(), 3);
        assert!(lexer.did_get_column());
    }

    #[test]
    fn invalid_bytes_at_the_end_become_replacement_characters() {
        let text = b"a\xe2\x82";
        let mut lexer = Lexer::new(TextSource::Slice(text), InputEncoding::Utf8, &[], None);
        assert_eq!(drain(&mut lexer), "a\u{FFFD}\u{FFFD}");
        assert_eq!(lexer.current_position().bytes, 3);

        let bytes = [0x41, 0x00, 0x00, 0xD8];
        let mut lexer =
            Lexer::new(TextSource::Slice(&bytes), InputEncoding::Utf16Le, &[], None);
        assert_eq!(drain(&mut lexer), "A\u{FFFD}");
    }

    #[test]
    fn byte_order_mark_is_skipped() {
        let text = "\u{FEFF}x".as_bytes();
        let mut lexer = Lexer::new(TextSource::Slice(text), InputEncoding::Utf8, &[], None);
        lexer.start();
        assert_eq!(lexer.lookahead(), 'x');
        assert_eq!(lexer.token_start_position().bytes, 3);
    }

    #[test]
    fn mark_end_and_finish_track_examined_bytes() {
        let text = b"abcdef";
        let mut lexer = Lexer::new(TextSource::Slice(text), InputEncoding::Utf8, &[], None);
        lexer.start();
        lexer.advance(false);
        lexer.advance(false);
        lexer.mark_end();
        lexer.advance(false);
        let examined = lexer.finish();
        assert_eq!(lexer.token_end_position().bytes, 2);
        assert_eq!(examined, 4);
    }
}
