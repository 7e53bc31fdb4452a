//! Compiles token rules into the runtime's lexer automaton.
//!
//! Every token gets its own entry state inside one shared array of
//! [`NfaState`]s. Rules are compiled back to front: each fragment is built
//! with the state it continues into already known, so no patching of
//! dangling edges is needed except for the split state that closes a loop.

use canopy::{CharRange, NfaState, Symbol};
use regex_syntax::hir::{Class, Hir, HirKind};
use rustc_hash::FxHashMap;

use crate::error::GenerateError;
use crate::grammar::Rule;

#[derive(Default)]
pub(crate) struct NfaBuilder {
    pub states: Vec<NfaState>,
    pub ranges: Vec<CharRange>,
    interned_ranges: FxHashMap<Vec<CharRange>, (u32, u32)>,
}

impl NfaBuilder {
    /// Adds a token and returns its entry state.
    pub(crate) fn add_token(
        &mut self,
        name: &str,
        rule: &Rule,
        symbol: Symbol,
    ) -> Result<u32, GenerateError> {
        let accept = self.push(NfaState::Accept { symbol });
        let start = self.compile_rule(rule, accept)?;
        if self.accepts_empty(start) {
            return Err(GenerateError::EmptyToken(name.to_owned()));
        }
        Ok(start)
    }

    /// Adds the automaton for the separators skipped between tokens.
    pub(crate) fn add_separators(&mut self, rules: &[Rule]) -> Result<Option<u32>, GenerateError> {
        if rules.is_empty() {
            return Ok(None);
        }
        let accept = self.push(NfaState::Accept { symbol: 0 });
        let start = self.compile_choice(rules.iter(), accept, |builder, rule, next| {
            builder.compile_rule(rule, next)
        })?;
        if self.accepts_empty(start) {
            return Err(GenerateError::EmptyToken("extras".to_owned()));
        }
        Ok(Some(start))
    }

    fn push(&mut self, state: NfaState) -> u32 {
        self.states.push(state);
        (self.states.len() - 1) as u32
    }

    fn advance(&mut self, mut ranges: Vec<CharRange>, next: u32) -> u32 {
        ranges.sort_unstable();
        let (ranges_start, ranges_end) = match self.interned_ranges.get(&ranges) {
            Some(&slice) => slice,
            None => {
                let start = self.ranges.len() as u32;
                self.ranges.extend_from_slice(&ranges);
                let slice = (start, self.ranges.len() as u32);
                self.interned_ranges.insert(ranges, slice);
                slice
            }
        };
        self.push(NfaState::Advance {
            ranges_start,
            ranges_end,
            next,
        })
    }

    fn literal(&mut self, text: &str, next: u32) -> u32 {
        text.chars().rev().fold(next, |next, c| {
            self.advance(vec![CharRange { start: c, end: c }], next)
        })
    }

    /// Builds a chain of split states trying each alternative in order.
    fn compile_choice<'r, T: 'r>(
        &mut self,
        items: impl DoubleEndedIterator<Item = &'r T>,
        next: u32,
        mut compile: impl FnMut(&mut Self, &'r T, u32) -> Result<u32, GenerateError>,
    ) -> Result<u32, GenerateError> {
        let mut starts = Vec::new();
        for item in items {
            starts.push(compile(self, item, next)?);
        }
        let Some(mut start) = starts.pop() else {
            return Ok(next);
        };
        while let Some(left) = starts.pop() {
            start = self.push(NfaState::Split { left, right: start });
        }
        Ok(start)
    }

    /// Loops over a fragment: `*` when `at_least_once` is false, `+` otherwise.
    fn compile_loop(
        &mut self,
        next: u32,
        at_least_once: bool,
        mut body: impl FnMut(&mut Self, u32) -> Result<u32, GenerateError>,
    ) -> Result<u32, GenerateError> {
        let split = self.push(NfaState::Split { left: 0, right: 0 });
        let body_start = body(self, split)?;
        self.states[split as usize] = NfaState::Split {
            left: body_start,
            right: next,
        };
        Ok(if at_least_once { body_start } else { split })
    }

    fn compile_rule(&mut self, rule: &Rule, next: u32) -> Result<u32, GenerateError> {
        match rule {
            Rule::Blank => Ok(next),
            Rule::String(text) => Ok(self.literal(text, next)),
            Rule::Pattern(pattern) => {
                let hir = regex_syntax::ParserBuilder::new()
                    .build()
                    .parse(pattern)
                    .map_err(|error| GenerateError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: error.to_string(),
                    })?;
                self.compile_hir(&hir, pattern, next)
            }
            Rule::Seq(rules) => rules
                .iter()
                .rev()
                .try_fold(next, |next, rule| self.compile_rule(rule, next)),
            Rule::Choice(rules) => {
                self.compile_choice(rules.iter(), next, |builder, rule, next| {
                    builder.compile_rule(rule, next)
                })
            }
            Rule::Repeat(rule) => {
                self.compile_loop(next, true, |builder, next| builder.compile_rule(rule, next))
            }
            Rule::Prec { rule, .. }
            | Rule::DynamicPrec { rule, .. }
            | Rule::Field { rule, .. }
            | Rule::Token(rule) => self.compile_rule(rule, next),
            Rule::Symbol(name) => Err(GenerateError::SymbolInToken(name.clone())),
        }
    }

    fn compile_hir(&mut self, hir: &Hir, pattern: &str, next: u32) -> Result<u32, GenerateError> {
        match hir.kind() {
            HirKind::Empty => Ok(next),
            HirKind::Literal(literal) => {
                let text = std::str::from_utf8(&literal.0).map_err(|_| {
                    GenerateError::UnsupportedPattern {
                        pattern: pattern.to_owned(),
                        feature: "non-UTF-8 literal",
                    }
                })?;
                Ok(self.literal(text, next))
            }
            HirKind::Class(Class::Unicode(class)) => {
                let ranges = class
                    .ranges()
                    .iter()
                    .map(|range| CharRange {
                        start: range.start(),
                        end: range.end(),
                    })
                    .collect();
                Ok(self.advance(ranges, next))
            }
            HirKind::Class(Class::Bytes(class)) => {
                let mut ranges = Vec::new();
                for range in class.ranges() {
                    if !range.end().is_ascii() {
                        return Err(GenerateError::UnsupportedPattern {
                            pattern: pattern.to_owned(),
                            feature: "non-ASCII byte class",
                        });
                    }
                    ranges.push(CharRange {
                        start: char::from(range.start()),
                        end: char::from(range.end()),
                    });
                }
                Ok(self.advance(ranges, next))
            }
            HirKind::Look(_) => Err(GenerateError::UnsupportedPattern {
                pattern: pattern.to_owned(),
                feature: "anchors and word boundaries",
            }),
            HirKind::Repetition(repetition) => {
                let sub = &repetition.sub;
                let mut start = match repetition.max {
                    None => self.compile_loop(next, false, |builder, next| {
                        builder.compile_hir(sub, pattern, next)
                    })?,
                    Some(max) => {
                        let mut start = next;
                        for _ in repetition.min..max {
                            let body = self.compile_hir(sub, pattern, start)?;
                            start = self.push(NfaState::Split {
                                left: body,
                                right: next,
                            });
                        }
                        start
                    }
                };
                for _ in 0..repetition.min {
                    start = self.compile_hir(sub, pattern, start)?;
                }
                Ok(start)
            }
            HirKind::Capture(capture) => self.compile_hir(&capture.sub, pattern, next),
            HirKind::Concat(hirs) => hirs
                .iter()
                .rev()
                .try_fold(next, |next, hir| self.compile_hir(hir, pattern, next)),
            HirKind::Alternation(hirs) => {
                self.compile_choice(hirs.iter(), next, |builder, hir, next| {
                    builder.compile_hir(hir, pattern, next)
                })
            }
        }
    }

    /// Whether an accept state is reachable without consuming input.
    fn accepts_empty(&self, start: u32) -> bool {
        let mut visited = vec![false; self.states.len()];
        let mut pending = vec![start];
        while let Some(index) = pending.pop() {
            let slot = index as usize;
            if std::mem::replace(&mut visited[slot], true) {
                continue;
            }
            match self.states[slot] {
                NfaState::Accept { .. } => return true,
                NfaState::Split { left, right } => pending.extend([left, right]),
                NfaState::Advance { .. } => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{pattern, repeat1, seq, string};

    /// Runs the automaton over `input`, returning the longest accepted prefix.
    fn longest_match(builder: &NfaBuilder, start: u32, input: &str) -> Option<usize> {
        fn closure(builder: &NfaBuilder, states: Vec<u32>) -> Vec<u32> {
            let mut result = Vec::new();
            let mut pending = states;
            while let Some(index) = pending.pop() {
                if result.contains(&index) {
                    continue;
                }
                result.push(index);
                if let NfaState::Split { left, right } = builder.states[index as usize] {
                    pending.extend([left, right]);
                }
            }
            result
        }
        let accepting = |states: &[u32]| {
            states
                .iter()
                .any(|&s| matches!(builder.states[s as usize], NfaState::Accept { .. }))
        };

        let mut current = closure(builder, vec![start]);
        let mut best = accepting(&current).then_some(0);
        for (offset, c) in input.char_indices() {
            let next = current
                .iter()
                .filter_map(|&s| match builder.states[s as usize] {
                    NfaState::Advance {
                        ranges_start,
                        ranges_end,
                        next,
                    } => builder.ranges[ranges_start as usize..ranges_end as usize]
                        .iter()
                        .any(|range| range.contains(c))
                        .then_some(next),
                    _ => None,
                })
                .collect();
            current = closure(builder, next);
            if current.is_empty() {
                break;
            }
            if accepting(&current) {
                best = Some(offset + c.len_utf8());
            }
        }
        best
    }

    fn compile(rule: &Rule) -> (NfaBuilder, u32) {
        let mut builder = NfaBuilder::default();
        let start = builder.add_token("t", rule, 1).unwrap();
        (builder, start)
    }

    #[test]
    fn patterns_match_their_longest_prefix() {
        let (builder, start) = compile(&pattern(r"[a-z_][a-z0-9_]*"));
        assert_eq!(longest_match(&builder, start, "foo_1 bar"), Some(5));
        assert_eq!(longest_match(&builder, start, "1abc"), None);
    }

    #[test]
    fn bounded_repetitions() {
        let (builder, start) = compile(&pattern(r"x{2,3}"));
        assert_eq!(longest_match(&builder, start, "x"), None);
        assert_eq!(longest_match(&builder, start, "xx"), Some(2));
        assert_eq!(longest_match(&builder, start, "xxxxx"), Some(3));
    }

    #[test]
    fn composite_tokens() {
        let rule = seq([string("//"), pattern(".*")]);
        let (builder, start) = compile(&rule);
        assert_eq!(longest_match(&builder, start, "// hi\nnext"), Some(5));

        let (builder, start) = compile(&repeat1(string("ab")));
        assert_eq!(longest_match(&builder, start, "ababa"), Some(4));
    }

    #[test]
    fn unicode_classes_are_preserved() {
        let (builder, start) = compile(&pattern(r"\p{Greek}+"));
        assert_eq!(longest_match(&builder, start, "αβγ!"), Some(6));
    }

    #[test]
    fn identical_classes_share_ranges() {
        let mut builder = NfaBuilder::default();
        builder.add_token("a", &pattern(r"\s+"), 1).unwrap();
        let before = builder.ranges.len();
        builder.add_token("b", &pattern(r"\s"), 2).unwrap();
        assert_eq!(builder.ranges.len(), before);
    }

    #[test]
    fn rejected_patterns() {
        let mut builder = NfaBuilder::default();
        assert!(matches!(
            builder.add_token("t", &pattern("a*"), 1),
            Err(GenerateError::EmptyToken(_))
        ));
        assert!(matches!(
            builder.add_token("t", &pattern("^a"), 1),
            Err(GenerateError::UnsupportedPattern { .. })
        ));
        assert!(matches!(
            builder.add_token("t", &pattern("(a"), 1),
            Err(GenerateError::InvalidPattern { .. })
        ));
    }
}
