//! The lexer automaton: a Thompson NFA over Unicode scalar ranges, shared by
//! every token of a grammar, and the routines that run it over a [`Lexer`].

use super::language::{LanguageData, BUILTIN_SYM_END};
use super::lexer::Lexer;
use crate::Symbol;

/// An inclusive range of characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharRange {
    pub start: char,
    pub end: char,
}

impl CharRange {
    #[inline]
    pub fn contains(self, c: char) -> bool {
        self.start <= c && c <= self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NfaState {
    /// Consumes one character in `lex_char_ranges[ranges_start..ranges_end]`.
    Advance {
        ranges_start: u32,
        ranges_end: u32,
        next: u32,
    },
    /// Continues in both states without consuming input.
    Split { left: u32, right: u32 },
    /// A complete match of `symbol`. Separator automata accept with symbol `0`.
    Accept { symbol: Symbol },
}

/// How the lexer ranks one token against another.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LexTokenInfo {
    /// Entry state in `lex_nfa_states`. `None` for the end symbol and for
    /// external tokens.
    pub start: Option<u32>,
    pub precedence: i16,
    /// Whether the token was written as a string literal.
    pub is_literal: bool,
}

// ---------------------------------------------------------------------------
// NFA simulation
// ---------------------------------------------------------------------------

/// The set of live automaton states during one scan.
pub(crate) struct NfaSimulation<'a> {
    states: &'a [NfaState],
    ranges: &'a [CharRange],
    current: Vec<u32>,
    next: Vec<u32>,
    marks: Vec<u32>,
    generation: u32,
}

impl<'a> NfaSimulation<'a> {
    pub(crate) fn new(language: &'a LanguageData) -> Self {
        Self {
            states: &language.lex_nfa_states,
            ranges: &language.lex_char_ranges,
            current: Vec::new(),
            next: Vec::new(),
            marks: vec![0; language.lex_nfa_states.len()],
            generation: 0,
        }
    }

    pub(crate) fn start(&mut self, starts: impl IntoIterator<Item = u32>) {
        self.generation += 1;
        self.current.clear();
        let mut set = std::mem::take(&mut self.current);
        for start in starts {
            self.add_closure(start, &mut set);
        }
        self.current = set;
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        !self.current.is_empty()
    }

    /// Symbols whose automata accept at the current position.
    pub(crate) fn accepting(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.current
            .iter()
            .filter_map(|&index| match self.states[index as usize] {
                NfaState::Accept { symbol } => Some(symbol),
                _ => None,
            })
    }

    /// Consumes `c`. Returns whether any state survived.
    pub(crate) fn step(&mut self, c: char) -> bool {
        self.generation += 1;
        let current = std::mem::take(&mut self.current);
        let mut next = std::mem::take(&mut self.next);
        next.clear();
        for &index in &current {
            if let NfaState::Advance {
                ranges_start,
                ranges_end,
                next: target,
            } = self.states[index as usize]
            {
                let ranges = &self.ranges[ranges_start as usize..ranges_end as usize];
                if ranges.iter().any(|range| range.contains(c)) {
                    self.add_closure(target, &mut next);
                }
            }
        }
        self.next = current;
        self.current = next;
        self.is_alive()
    }

    fn add_closure(&mut self, start: u32, set: &mut Vec<u32>) {
        let mut pending = vec![start];
        while let Some(index) = pending.pop() {
            let slot = index as usize;
            if self.marks[slot] == self.generation {
                continue;
            }
            self.marks[slot] = self.generation;
            match self.states[slot] {
                NfaState::Split { left, right } => {
                    pending.push(right);
                    pending.push(left);
                }
                NfaState::Advance { .. } | NfaState::Accept { .. } => set.push(index),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// The outcome of one internal scan, positions relative to the lexer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Scan {
    /// A token was recognised and the lexer's token end was marked.
    Token(Symbol),
    /// Nothing matched. The lexer's token end covers the longest prefix over
    /// which some automaton stayed alive (at least one character).
    Error,
}

/// Skips the grammar's separator characters in front of the next token.
pub(crate) fn skip_separators(language: &LanguageData, lexer: &mut Lexer<'_>) {
    let Some(start) = language.separator_start else {
        return;
    };
    let mut simulation = NfaSimulation::new(language);
    loop {
        if lexer.eof() {
            return;
        }
        simulation.start([start]);
        let origin = lexer.current_position();
        let mut matched = None;
        while !lexer.eof() && simulation.step(lexer.lookahead()) {
            lexer.advance(false);
            if simulation.accepting().next().is_some() {
                matched = Some(lexer.current_position());
            }
        }
        match matched {
            Some(end) if end.bytes > origin.bytes => {
                lexer.goto(end);
                lexer.start_token_here();
            }
            _ => {
                lexer.goto(origin);
                return;
            }
        }
    }
}

/// Rank of a candidate match. Higher wins.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    precedence: i16,
    length: usize,
    is_literal: bool,
    order: std::cmp::Reverse<Symbol>,
}

/// Finds the best token starting at the lexer's position among the symbols
/// flagged in `valid`. Returns `None` without moving the token end when no
/// valid token matches.
pub(crate) fn scan_tokens(
    language: &LanguageData,
    lexer: &mut Lexer<'_>,
    valid: &[bool],
) -> Option<Symbol> {
    let start_position = lexer.current_position();
    let starts = language
        .lex_tokens
        .iter()
        .enumerate()
        .filter(|(symbol, _)| valid.get(*symbol).copied().unwrap_or(false))
        .filter_map(|(_, token)| token.start);

    let mut simulation = NfaSimulation::new(language);
    simulation.start(starts);

    let mut best: Option<(Rank, Symbol)> = None;
    while !lexer.eof() && simulation.step(lexer.lookahead()) {
        lexer.advance(false);
        let length = lexer.current_position().bytes - start_position.bytes;
        for symbol in simulation.accepting() {
            let Some(info) = language.lex_tokens.get(usize::from(symbol)) else {
                continue;
            };
            let rank = Rank {
                precedence: info.precedence,
                length,
                is_literal: info.is_literal,
                order: std::cmp::Reverse(symbol),
            };
            if best.map_or(true, |(current, _)| rank > current) {
                best = Some((rank, symbol));
                lexer.mark_end();
            }
        }
    }

    best.map(|(_, symbol)| symbol)
}

/// Scans one token: valid tokens first, then every token, then an error.
pub(crate) fn scan(language: &LanguageData, lexer: &mut Lexer<'_>, valid: &[bool]) -> Scan {
    let start_position = lexer.current_position();
    if lexer.eof() {
        lexer.mark_end();
        return Scan::Token(BUILTIN_SYM_END);
    }

    if let Some(symbol) = scan_tokens(language, lexer, valid) {
        return Scan::Token(symbol);
    }

    lexer.goto(start_position);
    let all = vec![true; language.token_count as usize];
    if let Some(symbol) = scan_tokens(language, lexer, &all) {
        return Scan::Token(symbol);
    }

    // Measure how far any token rule stayed viable.
    lexer.goto(start_position);
    let mut simulation = NfaSimulation::new(language);
    simulation.start(language.lex_tokens.iter().filter_map(|token| token.start));
    let mut viable_end = None;
    while !lexer.eof() && simulation.step(lexer.lookahead()) {
        lexer.advance(false);
        viable_end = Some(lexer.current_position());
    }
    match viable_end {
        Some(end) => {
            lexer.goto(end);
            lexer.mark_end();
        }
        None => {
            lexer.goto(start_position);
            lexer.advance(false);
            lexer.mark_end();
        }
    }
    Scan::Error
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: char, end: char) -> CharRange {
        CharRange { start, end }
    }

    // ab* accepting symbol 1, built by hand.
    fn automaton() -> (Vec<NfaState>, Vec<CharRange>) {
        let states = vec![
            NfaState::Advance {
                ranges_start: 0,
                ranges_end: 1,
                next: 1,
            },
            NfaState::Split { left: 2, right: 3 },
            NfaState::Advance {
                ranges_start: 1,
                ranges_end: 2,
                next: 1,
            },
            NfaState::Accept { symbol: 1 },
        ];
        (states, vec![range('a', 'a'), range('b', 'b')])
    }

    fn run(input: &str) -> Vec<bool> {
        let (states, ranges) = automaton();
        let mut simulation = NfaSimulation {
            marks: vec![0; states.len()],
            states: &states,
            ranges: &ranges,
            current: Vec::new(),
            next: Vec::new(),
            generation: 0,
        };
        simulation.start([0]);
        input
            .chars()
            .map(|c| simulation.step(c) && simulation.accepting().next().is_some())
            .collect()
    }

    #[test]
    fn star_loops_and_accepts_after_each_step() {
        assert_eq!(run("abb"), vec![true, true, true]);
    }

    #[test]
    fn dead_states_stay_dead() {
        assert_eq!(run("bab"), vec![false, false, false]);
    }

    #[test]
    fn ranks_prefer_precedence_then_length_then_literals() {
        let rank = |precedence, length, is_literal, symbol| Rank {
            precedence,
            length,
            is_literal,
            order: std::cmp::Reverse(symbol),
        };
        assert!(rank(1, 1, false, 5) > rank(0, 9, true, 1));
        assert!(rank(0, 3, false, 5) > rank(0, 2, true, 1));
        assert!(rank(0, 3, true, 5) > rank(0, 3, false, 1));
        assert!(rank(0, 3, false, 1) > rank(0, 3, false, 2));
    }
}
