//! Turns a [`Grammar`] into numbered symbols, lexical token definitions and
//! flat productions.
//!
//! Symbols are numbered in table order: the end symbol, the internal tokens,
//! the external tokens, then the non-terminals (start rule first) and the
//! helper rules introduced for repetitions.

use canopy::{FieldMapEntry, Symbol, BUILTIN_SYM_ERROR_REPEAT};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::GenerateError;
use crate::grammar::{Associativity, Grammar, Rule};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SymbolKind {
    End,
    Token,
    External,
    NonTerminal,
    /// A hidden helper rule created for a repetition.
    Auxiliary,
}

#[derive(Clone, Debug)]
pub(crate) struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    pub visible: bool,
    pub named: bool,
}

/// A token recognised by the generated lexer.
#[derive(Clone, Debug)]
pub(crate) struct LexicalToken {
    pub symbol: Symbol,
    pub rule: Rule,
    pub precedence: i16,
    pub is_literal: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ProductionStep {
    pub symbol: Symbol,
    pub precedence: i32,
    pub associativity: Option<Associativity>,
    pub field: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Production {
    pub lhs: Symbol,
    pub steps: Vec<ProductionStep>,
    pub dynamic_precedence: i16,
}

impl Production {
    /// The precedence this production is reduced with.
    pub(crate) fn precedence(&self) -> (i32, Option<Associativity>) {
        self.steps
            .last()
            .map_or((0, None), |step| (step.precedence, step.associativity))
    }
}

#[derive(Debug)]
pub(crate) struct PreparedGrammar {
    pub name: String,
    pub symbols: Vec<SymbolInfo>,
    pub token_count: usize,
    pub external_count: usize,
    /// Internal tokens, ordered by symbol.
    pub tokens: Vec<LexicalToken>,
    /// Patterns skipped between tokens.
    pub separators: Vec<Rule>,
    /// Tokens that may appear anywhere as extra nodes.
    pub extra_symbols: Vec<Symbol>,
    pub productions: Vec<Production>,
    pub start_symbol: Symbol,
}

impl PreparedGrammar {
    pub(crate) fn first_external(&self) -> usize {
        self.token_count - self.external_count
    }

    pub(crate) fn is_token(&self, symbol: Symbol) -> bool {
        usize::from(symbol) < self.token_count
    }

    /// Field names in id order. Ids start at 1.
    pub(crate) fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .productions
            .iter()
            .flat_map(|production| production.steps.iter())
            .filter_map(|step| step.field.clone())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// The field map of every production, including the fields each hidden
    /// child passes up to its parent.
    pub(crate) fn field_maps(&self, field_names: &[String]) -> Vec<Vec<FieldMapEntry>> {
        let field_id = |name: &str| {
            field_names
                .iter()
                .position(|candidate| candidate == name)
                .map_or(0, |index| index as u16 + 1)
        };

        // Fields reachable through each hidden non-terminal, to a fixpoint.
        let mut inherited: Vec<FxHashSet<u16>> = vec![FxHashSet::default(); self.symbols.len()];
        loop {
            let mut changed = false;
            for production in &self.productions {
                if self.symbols[usize::from(production.lhs)].visible {
                    continue;
                }
                let mut found = Vec::new();
                for step in &production.steps {
                    if let Some(name) = &step.field {
                        found.push(field_id(name));
                    }
                    if self.is_hidden_rule(step.symbol) {
                        found.extend(inherited[usize::from(step.symbol)].iter().copied());
                    }
                }
                let set = &mut inherited[usize::from(production.lhs)];
                for id in found {
                    changed |= set.insert(id);
                }
            }
            if !changed {
                break;
            }
        }

        self.productions
            .iter()
            .map(|production| {
                let mut entries = Vec::new();
                for (index, step) in production.steps.iter().enumerate() {
                    if let Some(name) = &step.field {
                        entries.push(FieldMapEntry {
                            field_id: field_id(name),
                            child_index: index as u8,
                            inherited: false,
                        });
                    }
                    if self.is_hidden_rule(step.symbol) {
                        let mut ids: Vec<u16> =
                            inherited[usize::from(step.symbol)].iter().copied().collect();
                        ids.sort_unstable();
                        entries.extend(ids.into_iter().map(|field_id| FieldMapEntry {
                            field_id,
                            child_index: index as u8,
                            inherited: true,
                        }));
                    }
                }
                entries.sort_by_key(|entry| (entry.field_id, entry.child_index));
                entries
            })
            .collect()
    }

    fn is_hidden_rule(&self, symbol: Symbol) -> bool {
        let info = &self.symbols[usize::from(symbol)];
        !info.visible && matches!(info.kind, SymbolKind::NonTerminal | SymbolKind::Auxiliary)
    }
}

/// The precedence and field applied to the steps below a rule.
#[derive(Clone, Default)]
struct Context {
    precedence: i32,
    associativity: Option<Associativity>,
    field: Option<String>,
}

#[derive(Clone, Default)]
struct Alternative {
    steps: Vec<ProductionStep>,
    dynamic_precedence: i16,
}

impl Alternative {
    fn append(&self, other: &Self) -> Self {
        let mut steps = self.steps.clone();
        steps.extend(other.steps.iter().cloned());
        let dynamic_precedence =
            if other.dynamic_precedence.abs() > self.dynamic_precedence.abs() {
                other.dynamic_precedence
            } else {
                self.dynamic_precedence
            };
        Self {
            steps,
            dynamic_precedence,
        }
    }
}

struct Preparer<'g> {
    grammar: &'g Grammar,
    symbols: Vec<SymbolInfo>,
    tokens: Vec<LexicalToken>,
    /// Inline tokens, keyed by their rule.
    inline_tokens: FxHashMap<Rule, Symbol>,
    names: FxHashMap<String, Symbol>,
    productions: Vec<Production>,
    current_rule: String,
    repeat_count: usize,
}

pub(crate) fn prepare(grammar: &Grammar) -> Result<PreparedGrammar, GenerateError> {
    let Some((start_name, start_rule)) = grammar.rules.first() else {
        return Err(GenerateError::NoRules);
    };
    if start_rule.is_lexical() {
        return Err(GenerateError::LexicalStartRule(start_name.clone()));
    }

    let mut seen = FxHashSet::default();
    for name in grammar
        .rules
        .iter()
        .map(|(name, _)| name)
        .chain(grammar.externals.iter())
    {
        if !seen.insert(name.as_str()) {
            return Err(GenerateError::DuplicateRule(name.clone()));
        }
    }

    let mut preparer = Preparer {
        grammar,
        symbols: vec![SymbolInfo {
            name: "end".to_owned(),
            kind: SymbolKind::End,
            visible: false,
            named: true,
        }],
        tokens: Vec::new(),
        inline_tokens: FxHashMap::default(),
        names: FxHashMap::default(),
        productions: Vec::new(),
        current_rule: String::new(),
        repeat_count: 0,
    };
    preparer.number_tokens()?;
    let token_count = preparer.symbols.len();

    for name in &grammar.externals {
        preparer.add_symbol(name, SymbolKind::External);
    }
    let external_count = grammar.externals.len();
    let token_count = token_count + external_count;

    for (name, rule) in &grammar.rules {
        if !rule.is_lexical() {
            preparer.add_symbol(name, SymbolKind::NonTerminal);
        }
    }
    let start_symbol = preparer.names[start_name.as_str()];

    let (separators, extra_symbols) = preparer.split_extras()?;

    for (name, rule) in &grammar.rules {
        if rule.is_lexical() {
            continue;
        }
        let lhs = preparer.names[name.as_str()];
        preparer.current_rule.clone_from(name);
        preparer.repeat_count = 0;
        let alternatives = preparer.flatten(rule, &Context::default())?;
        preparer.add_productions(lhs, alternatives)?;
    }

    if preparer.symbols.len() >= usize::from(BUILTIN_SYM_ERROR_REPEAT) {
        return Err(GenerateError::TooManySymbols(preparer.symbols.len()));
    }

    let Preparer {
        symbols,
        tokens,
        productions,
        ..
    } = preparer;
    Ok(PreparedGrammar {
        name: grammar.name.clone(),
        symbols,
        token_count,
        external_count,
        tokens,
        separators,
        extra_symbols,
        productions,
        start_symbol,
    })
}

/// Removes precedence wrappers from a token rule, returning the outermost
/// precedence.
fn peel_token(rule: &Rule) -> (&Rule, i16) {
    let mut precedence = None;
    let mut current = rule;
    loop {
        match current {
            Rule::Prec { value, rule, .. } => {
                precedence.get_or_insert(*value);
                current = rule;
            }
            Rule::Token(inner) => current = inner,
            _ => break,
        }
    }
    let precedence = precedence.unwrap_or(0).clamp(i32::from(i16::MIN), i32::from(i16::MAX));
    (current, precedence as i16)
}

impl Preparer<'_> {
    fn add_symbol(&mut self, name: &str, kind: SymbolKind) -> Symbol {
        let symbol = self.symbols.len() as Symbol;
        let hidden = name.starts_with('_');
        self.symbols.push(SymbolInfo {
            name: name.to_owned(),
            kind,
            visible: !hidden,
            named: true,
        });
        self.names.insert(name.to_owned(), symbol);
        symbol
    }

    /// Numbers every internal token in order of first appearance.
    fn number_tokens(&mut self) -> Result<(), GenerateError> {
        let grammar = self.grammar;
        for (name, rule) in &grammar.rules {
            self.current_rule.clone_from(name);
            if rule.is_lexical() {
                let symbol = self.add_symbol(name, SymbolKind::Token);
                self.add_token(symbol, rule)?;
            } else {
                self.collect_inline_tokens(rule)?;
            }
        }
        for extra in &grammar.extras {
            if let Rule::Token(_) = extra {
                self.current_rule = "extras".to_owned();
                self.collect_inline_tokens(extra)?;
            }
        }
        Ok(())
    }

    fn add_token(&mut self, symbol: Symbol, rule: &Rule) -> Result<(), GenerateError> {
        let (inner, precedence) = peel_token(rule);
        check_token_content(inner, &self.current_rule)?;
        self.tokens.push(LexicalToken {
            symbol,
            rule: inner.clone(),
            precedence,
            is_literal: matches!(inner, Rule::String(_)),
        });
        Ok(())
    }

    fn collect_inline_tokens(&mut self, rule: &Rule) -> Result<(), GenerateError> {
        match rule {
            Rule::String(_) | Rule::Pattern(_) | Rule::Token(_) => {
                if self.inline_tokens.contains_key(rule) {
                    return Ok(());
                }
                let symbol = self.symbols.len() as Symbol;
                let (inner, _) = peel_token(rule);
                let (name, visible) = match inner {
                    Rule::String(value) => (value.clone(), true),
                    _ => (format!("_token{}", self.tokens.len() + 1), false),
                };
                self.symbols.push(SymbolInfo {
                    name,
                    kind: SymbolKind::Token,
                    visible,
                    named: false,
                });
                self.inline_tokens.insert(rule.clone(), symbol);
                self.add_token(symbol, rule)
            }
            Rule::Seq(rules) | Rule::Choice(rules) => rules
                .iter()
                .try_for_each(|rule| self.collect_inline_tokens(rule)),
            Rule::Repeat(rule)
            | Rule::Prec { rule, .. }
            | Rule::DynamicPrec { rule, .. }
            | Rule::Field { rule, .. } => self.collect_inline_tokens(rule),
            Rule::Blank | Rule::Symbol(_) => Ok(()),
        }
    }

    fn split_extras(&mut self) -> Result<(Vec<Rule>, Vec<Symbol>), GenerateError> {
        let mut separators = Vec::new();
        let mut symbols = Vec::new();
        for extra in &self.grammar.extras {
            match extra {
                Rule::String(_) | Rule::Pattern(_) => separators.push(extra.clone()),
                Rule::Token(_) => symbols.push(self.inline_tokens[extra]),
                Rule::Symbol(name) => match self.names.get(name) {
                    Some(&symbol) if usize::from(symbol) != 0 => {
                        let kind = self.symbols[usize::from(symbol)].kind;
                        if !matches!(kind, SymbolKind::Token | SymbolKind::External) {
                            return Err(GenerateError::NonTokenExtra(name.clone()));
                        }
                        symbols.push(symbol);
                    }
                    _ => {
                        return Err(GenerateError::UndefinedSymbol {
                            rule: "extras".to_owned(),
                            symbol: name.clone(),
                        })
                    }
                },
                other => return Err(GenerateError::NonTokenExtra(format!("{other:?}"))),
            }
        }
        Ok((separators, symbols))
    }

    fn step(&self, symbol: Symbol, context: &Context) -> Alternative {
        Alternative {
            steps: vec![ProductionStep {
                symbol,
                precedence: context.precedence,
                associativity: context.associativity,
                field: context.field.clone(),
            }],
            dynamic_precedence: 0,
        }
    }

    /// Expands a rule into the sequences of symbols it can match.
    fn flatten(&mut self, rule: &Rule, context: &Context) -> Result<Vec<Alternative>, GenerateError> {
        Ok(match rule {
            Rule::Blank => vec![Alternative::default()],
            Rule::String(_) | Rule::Pattern(_) | Rule::Token(_) => {
                vec![self.step(self.inline_tokens[rule], context)]
            }
            Rule::Symbol(name) => {
                let Some(&symbol) = self.names.get(name) else {
                    return Err(GenerateError::UndefinedSymbol {
                        rule: self.current_rule.clone(),
                        symbol: name.clone(),
                    });
                };
                vec![self.step(symbol, context)]
            }
            Rule::Seq(rules) => {
                let mut result = vec![Alternative::default()];
                for rule in rules {
                    let tails = self.flatten(rule, context)?;
                    result = result
                        .iter()
                        .flat_map(|head| tails.iter().map(|tail| head.append(tail)))
                        .collect();
                }
                result
            }
            Rule::Choice(rules) => {
                let mut result = Vec::new();
                for rule in rules {
                    result.extend(self.flatten(rule, context)?);
                }
                result
            }
            Rule::Repeat(inner) => {
                let symbol = self.add_repeat(inner, context)?;
                vec![self.step(symbol, &Context::default())]
            }
            Rule::Prec {
                value,
                associativity,
                rule,
            } => {
                let context = Context {
                    precedence: *value,
                    associativity: *associativity,
                    field: context.field.clone(),
                };
                self.flatten(rule, &context)?
            }
            Rule::DynamicPrec { value, rule } => {
                let mut alternatives = self.flatten(rule, context)?;
                for alternative in &mut alternatives {
                    alternative.dynamic_precedence = *value;
                }
                alternatives
            }
            Rule::Field { name, rule } => {
                let context = Context {
                    field: Some(name.clone()),
                    ..context.clone()
                };
                self.flatten(rule, &context)?
            }
        })
    }

    /// Creates the left-recursive helper rule for one or more `inner`.
    fn add_repeat(&mut self, inner: &Rule, context: &Context) -> Result<Symbol, GenerateError> {
        self.repeat_count += 1;
        let symbol = self.symbols.len() as Symbol;
        self.symbols.push(SymbolInfo {
            name: format!("{}_repeat{}", self.current_rule, self.repeat_count),
            kind: SymbolKind::Auxiliary,
            visible: false,
            named: false,
        });
        let items: Vec<Alternative> = self
            .flatten(inner, context)?
            .into_iter()
            .filter(|alternative| !alternative.steps.is_empty())
            .collect();
        let recursive = Alternative {
            steps: vec![ProductionStep {
                symbol,
                precedence: 0,
                associativity: None,
                field: None,
            }],
            dynamic_precedence: 0,
        };
        let mut alternatives: Vec<Alternative> =
            items.iter().map(|item| recursive.append(item)).collect();
        alternatives.extend(items);
        self.add_productions(symbol, alternatives)?;
        Ok(symbol)
    }

    fn add_productions(
        &mut self,
        lhs: Symbol,
        alternatives: Vec<Alternative>,
    ) -> Result<(), GenerateError> {
        for alternative in alternatives {
            if alternative.steps.len() > usize::from(u8::MAX) {
                return Err(GenerateError::TooManyChildren(
                    self.symbols[usize::from(lhs)].name.clone(),
                ));
            }
            let production = Production {
                lhs,
                steps: alternative.steps,
                dynamic_precedence: alternative.dynamic_precedence,
            };
            if !self.productions.contains(&production) {
                self.productions.push(production);
            }
        }
        Ok(())
    }
}

fn check_token_content(rule: &Rule, rule_name: &str) -> Result<(), GenerateError> {
    match rule {
        Rule::Symbol(_) => Err(GenerateError::SymbolInToken(rule_name.to_owned())),
        Rule::Seq(rules) | Rule::Choice(rules) => rules
            .iter()
            .try_for_each(|rule| check_token_content(rule, rule_name)),
        Rule::Repeat(rule)
        | Rule::Prec { rule, .. }
        | Rule::DynamicPrec { rule, .. }
        | Rule::Field { rule, .. }
        | Rule::Token(rule) => check_token_content(rule, rule_name),
        Rule::Blank | Rule::String(_) | Rule::Pattern(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{choice, field, optional, pattern, prec_left, repeat, seq, string, sym};

    fn names(prepared: &PreparedGrammar) -> Vec<&str> {
        prepared.symbols.iter().map(|info| info.name.as_str()).collect()
    }

    #[test]
    fn symbols_are_numbered_tokens_first() {
        let grammar = Grammar::new("list")
            .rule("list", seq([string("["), repeat(sym("item")), string("]")]))
            .rule("item", choice([sym("word"), sym("_quoted")]))
            .rule("_quoted", seq([string("'"), sym("word"), string("'")]))
            .rule("word", pattern("[a-z]+"));
        let prepared = prepare(&grammar).unwrap();
        assert_eq!(
            names(&prepared),
            ["end", "[", "]", "'", "word", "list", "item", "_quoted", "list_repeat1"]
        );
        assert_eq!(prepared.token_count, 5);
        assert_eq!(prepared.start_symbol, 5);
        assert!(!prepared.symbols[7].visible);
        assert!(prepared.symbols[7].named);
        assert_eq!(prepared.symbols[8].kind, SymbolKind::Auxiliary);
    }

    #[test]
    fn choices_and_repeats_are_flattened() {
        let grammar = Grammar::new("g")
            .rule("list", seq([string("("), repeat(sym("x")), string(")")]))
            .rule("x", string("x"));
        let prepared = prepare(&grammar).unwrap();
        let shapes: Vec<(Symbol, Vec<Symbol>)> = prepared
            .productions
            .iter()
            .map(|production| {
                let steps = production.steps.iter().map(|step| step.symbol).collect();
                (production.lhs, steps)
            })
            .collect();
        // end ( ) x | list list_repeat1
        assert_eq!(
            shapes,
            [(5, vec![5, 3]), (5, vec![3]), (4, vec![1, 5, 2]), (4, vec![1, 2])]
        );
    }

    #[test]
    fn precedence_and_fields_reach_every_step() {
        let grammar = Grammar::new("g")
            .rule(
                "sum",
                prec_left(
                    2,
                    seq([
                        field("left", sym("n")),
                        string("+"),
                        field("right", optional(sym("n"))),
                    ]),
                ),
            )
            .rule("n", pattern("[0-9]+"));
        let prepared = prepare(&grammar).unwrap();
        assert_eq!(prepared.productions.len(), 2);
        let full = &prepared.productions[0];
        assert_eq!(full.precedence(), (2, Some(Associativity::Left)));
        assert_eq!(full.steps[0].field.as_deref(), Some("left"));
        assert_eq!(full.steps[1].field, None);
        assert_eq!(full.steps[2].field.as_deref(), Some("right"));
    }

    #[test]
    fn hidden_children_pass_their_fields_up() {
        let grammar = Grammar::new("g")
            .rule("pair", seq([sym("_key"), string(":"), field("value", sym("word"))]))
            .rule("_key", field("key", sym("word")))
            .rule("word", pattern("[a-z]+"));
        let prepared = prepare(&grammar).unwrap();
        let field_names = prepared.field_names();
        assert_eq!(field_names, ["key", "value"]);
        let maps = prepared.field_maps(&field_names);
        assert_eq!(
            maps[0],
            [
                FieldMapEntry {
                    field_id: 1,
                    child_index: 0,
                    inherited: true
                },
                FieldMapEntry {
                    field_id: 2,
                    child_index: 2,
                    inherited: false
                },
            ]
        );
    }

    #[test]
    fn malformed_grammars_are_rejected() {
        let undefined = Grammar::new("g").rule("a", seq([sym("b"), string("x")]));
        assert!(matches!(
            prepare(&undefined),
            Err(GenerateError::UndefinedSymbol { symbol, .. }) if symbol == "b"
        ));

        let lexical_start = Grammar::new("g").rule("a", pattern("x"));
        assert!(matches!(
            prepare(&lexical_start),
            Err(GenerateError::LexicalStartRule(_))
        ));

        let duplicate = Grammar::new("g")
            .rule("a", seq([string("x")]))
            .rule("a", seq([string("y")]));
        assert!(matches!(prepare(&duplicate), Err(GenerateError::DuplicateRule(_))));

        let nonterminal_extra = Grammar::new("g")
            .rule("a", seq([string("x")]))
            .extras([sym("a")]);
        assert!(matches!(
            prepare(&nonterminal_extra),
            Err(GenerateError::NonTokenExtra(_))
        ));

        assert!(matches!(
            prepare(&Grammar::new("g")),
            Err(GenerateError::NoRules)
        ));
    }
}
