//! The external scanner for nested `/* ... */` comments.

use canopy::{ExternalScanner, Lexer};

/// Index of `block_comment` among the grammar's external tokens.
const BLOCK_COMMENT: u16 = 0;

pub(crate) fn new_scanner() -> Box<dyn ExternalScanner> {
    Box::new(Scanner)
}

/// Block comments carry no state from one token to the next.
struct Scanner;

impl ExternalScanner for Scanner {
    fn scan(&mut self, lexer: &mut Lexer<'_>, valid_symbols: &[bool]) -> bool {
        if !valid_symbols
            .get(usize::from(BLOCK_COMMENT))
            .copied()
            .unwrap_or(false)
        {
            return false;
        }

        while !lexer.eof() && lexer.lookahead().is_whitespace() {
            lexer.advance(true);
        }
        if lexer.lookahead() != '/' {
            return false;
        }
        lexer.advance(false);
        if lexer.lookahead() != '*' {
            return false;
        }
        lexer.advance(false);

        let mut depth = 1_usize;
        while !lexer.eof() {
            match lexer.lookahead() {
                '*' => {
                    lexer.advance(false);
                    if lexer.lookahead() == '/' {
                        lexer.advance(false);
                        depth -= 1;
                        if depth == 0 {
                            lexer.mark_end();
                            lexer.set_result_symbol(BLOCK_COMMENT);
                            return true;
                        }
                    }
                }
                '/' => {
                    lexer.advance(false);
                    if lexer.lookahead() == '*' {
                        lexer.advance(false);
                        depth += 1;
                    }
                }
                _ => lexer.advance(false),
            }
        }
        false
    }

    fn serialize(&self, _buffer: &mut Vec<u8>) {}

    fn deserialize(&mut self, _buffer: &[u8]) {}
}
