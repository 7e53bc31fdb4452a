//! LALR(1) parse table construction.
//!
//! The LR(0) automaton is built first, then lookaheads are propagated through
//! it until they stop changing. Conflicts are resolved with the precedence
//! and associativity recorded on production steps; the ones precedence can't
//! settle keep every action, reductions first.

use std::borrow::Cow;
use std::collections::{BTreeMap, VecDeque};

use canopy::{
    FieldMapEntry, LanguageData, LexMode, LexTokenInfo, MapSlice, ParseAction, ParseActionEntry,
    StateId, Symbol, SymbolMetadata, BUILTIN_SYM_END, LANGUAGE_VERSION,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::error::GenerateError;
use crate::grammar::Associativity;
use crate::nfa::NfaBuilder;
use crate::prepare::{PreparedGrammar, Production, ProductionStep, SymbolKind};

// ---------------------------------------------------------------------------
// Terminal sets
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct TokenSet {
    words: Vec<u64>,
}

impl TokenSet {
    fn insert(&mut self, symbol: Symbol) -> bool {
        let (word, bit) = (usize::from(symbol) / 64, usize::from(symbol) % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        let mask = 1_u64 << bit;
        let added = self.words[word] & mask == 0;
        self.words[word] |= mask;
        added
    }

    fn contains(&self, symbol: Symbol) -> bool {
        let (word, bit) = (usize::from(symbol) / 64, usize::from(symbol) % 64);
        self.words.get(word).is_some_and(|&word| word & (1_u64 << bit) != 0)
    }

    /// Adds every member of `other`. Returns whether anything was added.
    fn union(&mut self, other: &Self) -> bool {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            let merged = *word | other;
            changed |= merged != *word;
            *word = merged;
        }
        changed
    }

    fn iter(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            (0..64_usize)
                .filter(move |&bit| word & (1_u64 << bit) != 0)
                .map(move |bit| (index * 64 + bit) as Symbol)
        })
    }
}

// ---------------------------------------------------------------------------
// LR(0) automaton
// ---------------------------------------------------------------------------

/// A production with a position in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Item {
    production: u32,
    step: u32,
}

impl Item {
    fn advance(self) -> Self {
        Self {
            production: self.production,
            step: self.step + 1,
        }
    }
}

struct ItemSet {
    kernel: Vec<Item>,
    transitions: BTreeMap<Symbol, usize>,
}

struct TableBuilder<'g> {
    grammar: &'g PreparedGrammar,
    /// The grammar's productions plus the augmented start production, last.
    productions: Vec<Production>,
    by_lhs: Vec<Vec<u32>>,
    first: Vec<TokenSet>,
    nullable: Vec<bool>,
    item_sets: Vec<ItemSet>,
    lookaheads: Vec<FxHashMap<Item, TokenSet>>,
}

/// The actions competing for one terminal in one state.
#[derive(Default)]
struct Candidate {
    shift: Option<(usize, i32, bool)>,
    reduces: Vec<u32>,
    accept: bool,
}

impl<'g> TableBuilder<'g> {
    fn new(grammar: &'g PreparedGrammar) -> Self {
        let mut productions = grammar.productions.clone();
        productions.push(Production {
            lhs: Symbol::MAX,
            steps: vec![ProductionStep {
                symbol: grammar.start_symbol,
                precedence: 0,
                associativity: None,
                field: None,
            }],
            dynamic_precedence: 0,
        });
        let mut by_lhs = vec![Vec::new(); grammar.symbols.len()];
        for (index, production) in grammar.productions.iter().enumerate() {
            by_lhs[usize::from(production.lhs)].push(index as u32);
        }
        let mut builder = Self {
            grammar,
            productions,
            by_lhs,
            first: Vec::new(),
            nullable: Vec::new(),
            item_sets: Vec::new(),
            lookaheads: Vec::new(),
        };
        builder.compute_first_sets();
        builder
    }

    fn augmented(&self) -> u32 {
        (self.productions.len() - 1) as u32
    }

    fn next_symbol(&self, item: Item) -> Option<Symbol> {
        self.productions[item.production as usize]
            .steps
            .get(item.step as usize)
            .map(|step| step.symbol)
    }

    fn compute_first_sets(&mut self) {
        let count = self.grammar.symbols.len();
        self.first = vec![TokenSet::default(); count];
        self.nullable = vec![false; count];
        for symbol in 0..self.grammar.token_count {
            self.first[symbol].insert(symbol as Symbol);
        }
        loop {
            let mut changed = false;
            for production in &self.grammar.productions {
                let lhs = usize::from(production.lhs);
                let mut all_nullable = true;
                for step in &production.steps {
                    let symbol = usize::from(step.symbol);
                    if symbol != lhs {
                        let first = self.first[symbol].clone();
                        changed |= self.first[lhs].union(&first);
                    }
                    if !self.nullable[symbol] {
                        all_nullable = false;
                        break;
                    }
                }
                if all_nullable && !self.nullable[lhs] {
                    self.nullable[lhs] = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// The terminals that can begin `steps`, and whether all of them can be
    /// empty.
    fn first_of(&self, steps: &[ProductionStep]) -> (TokenSet, bool) {
        let mut set = TokenSet::default();
        for step in steps {
            set.union(&self.first[usize::from(step.symbol)]);
            if !self.nullable[usize::from(step.symbol)] {
                return (set, false);
            }
        }
        (set, true)
    }

    fn closure(&self, kernel: &[Item]) -> Vec<Item> {
        let mut items = kernel.to_vec();
        let mut seen: FxHashSet<Item> = kernel.iter().copied().collect();
        let mut index = 0;
        while let Some(&item) = items.get(index) {
            index += 1;
            let Some(symbol) = self.next_symbol(item) else {
                continue;
            };
            if self.grammar.is_token(symbol) {
                continue;
            }
            for &production in &self.by_lhs[usize::from(symbol)] {
                let item = Item {
                    production,
                    step: 0,
                };
                if seen.insert(item) {
                    items.push(item);
                }
            }
        }
        items
    }

    fn build_item_sets(&mut self) {
        let start = vec![Item {
            production: self.augmented(),
            step: 0,
        }];
        let mut index_of: FxHashMap<Vec<Item>, usize> = FxHashMap::default();
        index_of.insert(start.clone(), 0);
        self.item_sets.push(ItemSet {
            kernel: start,
            transitions: BTreeMap::new(),
        });

        let mut next = 0;
        while next < self.item_sets.len() {
            let items = self.closure(&self.item_sets[next].kernel);
            let mut successors: BTreeMap<Symbol, Vec<Item>> = BTreeMap::new();
            for item in items {
                if let Some(symbol) = self.next_symbol(item) {
                    successors.entry(symbol).or_default().push(item.advance());
                }
            }
            for (symbol, mut kernel) in successors {
                kernel.sort_unstable();
                kernel.dedup();
                let target = match index_of.get(&kernel) {
                    Some(&target) => target,
                    None => {
                        let target = self.item_sets.len();
                        index_of.insert(kernel.clone(), target);
                        self.item_sets.push(ItemSet {
                            kernel,
                            transitions: BTreeMap::new(),
                        });
                        target
                    }
                };
                self.item_sets[next].transitions.insert(symbol, target);
            }
            next += 1;
        }
    }

    /// The closure of a state's kernel, with lookaheads.
    fn closure_lookaheads(&self, state: usize) -> Vec<(Item, TokenSet)> {
        let mut items: Vec<(Item, TokenSet)> = self.item_sets[state]
            .kernel
            .iter()
            .map(|item| {
                let lookahead = self.lookaheads[state].get(item).cloned().unwrap_or_default();
                (*item, lookahead)
            })
            .collect();
        let mut position: FxHashMap<Item, usize> = items
            .iter()
            .enumerate()
            .map(|(index, (item, _))| (*item, index))
            .collect();
        let mut pending: VecDeque<usize> = (0..items.len()).collect();

        while let Some(index) = pending.pop_front() {
            let (item, lookahead) = items[index].clone();
            let Some(symbol) = self.next_symbol(item) else {
                continue;
            };
            if self.grammar.is_token(symbol) {
                continue;
            }
            let rest = &self.productions[item.production as usize].steps[item.step as usize + 1..];
            let (mut follow, nullable) = self.first_of(rest);
            if nullable {
                follow.union(&lookahead);
            }
            for &production in &self.by_lhs[usize::from(symbol)] {
                let child = Item {
                    production,
                    step: 0,
                };
                match position.get(&child) {
                    Some(&existing) => {
                        if items[existing].1.union(&follow) {
                            pending.push_back(existing);
                        }
                    }
                    None => {
                        position.insert(child, items.len());
                        pending.push_back(items.len());
                        items.push((child, follow.clone()));
                    }
                }
            }
        }
        items
    }

    fn propagate_lookaheads(&mut self) {
        self.lookaheads = vec![FxHashMap::default(); self.item_sets.len()];
        let mut end = TokenSet::default();
        end.insert(BUILTIN_SYM_END);
        let start = Item {
            production: self.augmented(),
            step: 0,
        };
        self.lookaheads[0].insert(start, end);

        let mut queued = vec![true; self.item_sets.len()];
        let mut pending: VecDeque<usize> = (0..self.item_sets.len()).collect();
        while let Some(state) = pending.pop_front() {
            queued[state] = false;
            for (item, lookahead) in self.closure_lookaheads(state) {
                let Some(symbol) = self.next_symbol(item) else {
                    continue;
                };
                let target = self.item_sets[state].transitions[&symbol];
                let changed = self.lookaheads[target]
                    .entry(item.advance())
                    .or_default()
                    .union(&lookahead);
                if changed && !queued[target] {
                    queued[target] = true;
                    pending.push_back(target);
                }
            }
        }
    }

    fn symbol_name(&self, symbol: Symbol) -> &str {
        &self.grammar.symbols[usize::from(symbol)].name
    }

    fn candidates(&self, state: usize) -> BTreeMap<Symbol, Candidate> {
        let mut candidates: BTreeMap<Symbol, Candidate> = BTreeMap::new();
        for (item, lookahead) in self.closure_lookaheads(state) {
            let production = &self.productions[item.production as usize];
            match self.next_symbol(item) {
                Some(symbol) if self.grammar.is_token(symbol) => {
                    let target = self.item_sets[state].transitions[&symbol];
                    let precedence = match item.step {
                        0 => i32::MIN,
                        step => production.steps[step as usize - 1].precedence,
                    };
                    let repetition = production.lhs != Symbol::MAX
                        && self.grammar.symbols[usize::from(production.lhs)].kind
                            == SymbolKind::Auxiliary;
                    let candidate = candidates.entry(symbol).or_default();
                    let (_, best, repeats) =
                        candidate.shift.get_or_insert((target, i32::MIN, false));
                    *best = (*best).max(precedence);
                    *repeats |= repetition;
                }
                Some(_) => {}
                None if item.production == self.augmented() => {
                    if lookahead.contains(BUILTIN_SYM_END) {
                        candidates.entry(BUILTIN_SYM_END).or_default().accept = true;
                    }
                }
                None => {
                    for symbol in lookahead.iter() {
                        candidates
                            .entry(symbol)
                            .or_default()
                            .reduces
                            .push(item.production);
                    }
                }
            }
        }
        candidates
    }

    /// Picks the actions for one terminal, in the order the parser tries them.
    fn resolve(
        &self,
        state: usize,
        symbol: Symbol,
        candidate: Candidate,
        production_ids: &[u16],
    ) -> Vec<ParseAction> {
        if candidate.accept {
            return vec![ParseAction::Accept];
        }

        let mut reduces = candidate.reduces;
        reduces.sort_unstable();
        reduces.dedup();
        if reduces.len() > 1 {
            let highest = reduces
                .iter()
                .map(|&production| self.productions[production as usize].precedence().0)
                .max()
                .unwrap_or(0);
            reduces.retain(|&production| {
                self.productions[production as usize].precedence().0 == highest
            });
            if reduces.len() > 1 {
                let rules: Vec<&str> = reduces
                    .iter()
                    .map(|&production| self.symbol_name(self.productions[production as usize].lhs))
                    .collect();
                warn!(
                    target: "canopy::generate",
                    state,
                    lookahead = self.symbol_name(symbol),
                    rules = ?rules,
                    "unresolved reduce/reduce conflict"
                );
            }
        }

        let mut shift = candidate.shift.map(|(target, precedence, repetition)| {
            (
                ParseAction::Shift {
                    state: (target + 1) as StateId,
                    extra: false,
                    repetition,
                },
                precedence,
            )
        });

        let first_reduce = reduces.first().copied();
        if let (Some((_, shift_precedence)), Some(first)) = (shift, first_reduce) {
            let (reduce_precedence, associativity) =
                self.productions[first as usize].precedence();
            let shift_precedence = shift_precedence.max(0);
            let lookahead = self.symbol_name(symbol);
            if shift_precedence > reduce_precedence {
                debug!(target: "canopy::generate", state, lookahead, "shift wins by precedence");
                reduces.clear();
            } else if shift_precedence < reduce_precedence {
                debug!(target: "canopy::generate", state, lookahead, "reduce wins by precedence");
                shift = None;
            } else {
                match associativity {
                    Some(Associativity::Left) => {
                        debug!(target: "canopy::generate", state, lookahead, "reduce wins by left associativity");
                        shift = None;
                    }
                    Some(Associativity::Right) => {
                        debug!(target: "canopy::generate", state, lookahead, "shift wins by right associativity");
                        reduces.clear();
                    }
                    None => warn!(
                        target: "canopy::generate",
                        state,
                        lookahead,
                        rule = self.symbol_name(self.productions[first as usize].lhs),
                        "unresolved shift/reduce conflict"
                    ),
                }
            }
        }

        let mut actions: Vec<ParseAction> = reduces
            .into_iter()
            .map(|production| {
                let production_id = production_ids[production as usize];
                let production = &self.productions[production as usize];
                ParseAction::Reduce {
                    symbol: production.lhs,
                    child_count: production.steps.len() as u8,
                    dynamic_precedence: production.dynamic_precedence,
                    production_id,
                }
            })
            .collect();
        actions.extend(shift.map(|(action, _)| action));
        actions
    }
}

// ---------------------------------------------------------------------------
// Table assembly
// ---------------------------------------------------------------------------

/// Interns rows of flags, returning each row's index.
struct RowInterner {
    rows: Vec<Vec<bool>>,
    index: FxHashMap<Vec<bool>, u16>,
}

impl RowInterner {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    fn intern(&mut self, row: Vec<bool>) -> u16 {
        if let Some(&index) = self.index.get(&row) {
            return index;
        }
        let index = self.rows.len() as u16;
        self.index.insert(row.clone(), index);
        self.rows.push(row);
        index
    }

    fn into_flat(self) -> Vec<bool> {
        self.rows.into_iter().flatten().collect()
    }
}

/// Assigns production ids by field map and lays the maps out flat.
fn intern_field_maps(
    maps: Vec<Vec<FieldMapEntry>>,
) -> (Vec<u16>, Vec<MapSlice>, Vec<FieldMapEntry>) {
    let mut ids = Vec::with_capacity(maps.len());
    let mut slices = vec![MapSlice::default()];
    let mut entries = Vec::new();
    let mut index: FxHashMap<Vec<FieldMapEntry>, u16> = FxHashMap::default();
    index.insert(Vec::new(), 0);
    for map in maps {
        let id = match index.get(&map) {
            Some(&id) => id,
            None => {
                let id = slices.len() as u16;
                slices.push(MapSlice {
                    index: entries.len() as u16,
                    length: map.len() as u16,
                });
                entries.extend_from_slice(&map);
                index.insert(map, id);
                id
            }
        };
        ids.push(id);
    }
    (ids, slices, entries)
}

pub(crate) fn build(grammar: &PreparedGrammar) -> Result<LanguageData, GenerateError> {
    let mut builder = TableBuilder::new(grammar);
    builder.build_item_sets();
    builder.propagate_lookaheads();

    let state_count = builder.item_sets.len() + 1;
    if state_count > usize::from(StateId::MAX) {
        return Err(GenerateError::TooManyStates(state_count));
    }
    let symbol_count = grammar.symbols.len();
    let token_count = grammar.token_count;
    let first_external = grammar.first_external();

    let field_names = grammar.field_names();
    let (production_ids, field_map_slices, field_map_entries) =
        intern_field_maps(grammar.field_maps(&field_names));

    let mut parse_table = vec![0_u16; state_count * symbol_count];
    let mut parse_actions = vec![ParseActionEntry::Header {
        count: 0,
        reusable: false,
    }];
    let mut action_index: FxHashMap<Vec<ParseAction>, u16> = FxHashMap::default();
    let mut lex_rows = RowInterner::new();
    let mut external_rows = RowInterner::new();
    external_rows.intern(vec![false; grammar.external_count]);
    let mut lex_modes = Vec::with_capacity(state_count);

    // State 0 is the error state: every token is valid and nothing has an
    // action.
    lex_modes.push(LexMode {
        lex_state: lex_rows.intern(vec![true; token_count]),
        external_lex_state: if grammar.external_count == 0 {
            0
        } else {
            external_rows.intern(vec![true; grammar.external_count])
        },
    });

    for state in 0..builder.item_sets.len() {
        let row = (state + 1) * symbol_count;
        let mut valid = vec![false; token_count];

        let mut runs: BTreeMap<Symbol, Vec<ParseAction>> = builder
            .candidates(state)
            .into_iter()
            .map(|(symbol, candidate)| {
                (symbol, builder.resolve(state, symbol, candidate, &production_ids))
            })
            .collect();
        for &extra in &grammar.extra_symbols {
            runs.entry(extra).or_insert_with(|| {
                vec![ParseAction::Shift {
                    state: (state + 1) as StateId,
                    extra: true,
                    repetition: false,
                }]
            });
        }

        for (symbol, actions) in runs {
            if actions.is_empty() {
                continue;
            }
            valid[usize::from(symbol)] = true;
            let index = match action_index.get(&actions) {
                Some(&index) => index,
                None => {
                    let index = u16::try_from(parse_actions.len())
                        .map_err(|_| GenerateError::TooManyActions(parse_actions.len()))?;
                    parse_actions.push(ParseActionEntry::Header {
                        count: actions.len() as u8,
                        reusable: actions.len() == 1,
                    });
                    parse_actions.extend(actions.iter().copied().map(ParseActionEntry::Action));
                    action_index.insert(actions, index);
                    index
                }
            };
            parse_table[row + usize::from(symbol)] = index;
        }

        for (&symbol, &target) in &builder.item_sets[state].transitions {
            if !grammar.is_token(symbol) {
                parse_table[row + usize::from(symbol)] = (target + 1) as u16;
            }
        }

        let externals = valid[first_external..].to_vec();
        let external_lex_state = if externals.iter().any(|&valid| valid) {
            external_rows.intern(externals)
        } else {
            0
        };
        lex_modes.push(LexMode {
            lex_state: lex_rows.intern(valid),
            external_lex_state,
        });
    }

    let mut nfa = NfaBuilder::default();
    let mut lex_tokens = vec![LexTokenInfo::default(); token_count];
    for token in &grammar.tokens {
        let name = &grammar.symbols[usize::from(token.symbol)].name;
        lex_tokens[usize::from(token.symbol)] = LexTokenInfo {
            start: Some(nfa.add_token(name, &token.rule, token.symbol)?),
            precedence: token.precedence,
            is_literal: token.is_literal,
        };
    }
    let separator_start = nfa.add_separators(&grammar.separators)?;

    let external_lex_state_count = external_rows.rows.len();
    let lex_state_count = lex_rows.rows.len();
    info!(
        target: "canopy::generate",
        grammar = %grammar.name,
        states = state_count,
        symbols = symbol_count,
        tokens = token_count,
        lex_states = lex_state_count,
        external_lex_states = external_lex_state_count,
        actions = parse_actions.len(),
        nfa_states = nfa.states.len(),
        "built parse tables"
    );

    let mut all_field_names = vec![Cow::Borrowed("")];
    all_field_names.extend(field_names.into_iter().map(Cow::Owned));

    Ok(LanguageData {
        abi_version: LANGUAGE_VERSION,
        name: Cow::Owned(grammar.name.clone()),
        symbol_count: symbol_count as u32,
        token_count: token_count as u32,
        external_token_count: grammar.external_count as u32,
        state_count: state_count as u32,
        field_count: (all_field_names.len() - 1) as u32,
        production_id_count: field_map_slices.len() as u32,
        parse_table: Cow::Owned(parse_table),
        parse_actions: Cow::Owned(parse_actions),
        lex_modes: Cow::Owned(lex_modes),
        lex_valid_tokens: Cow::Owned(lex_rows.into_flat()),
        lex_nfa_states: Cow::Owned(nfa.states),
        lex_char_ranges: Cow::Owned(nfa.ranges),
        lex_tokens: Cow::Owned(lex_tokens),
        separator_start,
        symbol_names: Cow::Owned(
            grammar
                .symbols
                .iter()
                .map(|info| Cow::Owned(info.name.clone()))
                .collect(),
        ),
        symbol_metadata: Cow::Owned(
            grammar
                .symbols
                .iter()
                .map(|info| SymbolMetadata {
                    visible: info.visible,
                    named: info.named,
                })
                .collect(),
        ),
        field_names: Cow::Owned(all_field_names),
        field_map_slices: Cow::Owned(field_map_slices),
        field_map_entries: Cow::Owned(field_map_entries),
        external_scanner_states: Cow::Owned(if grammar.external_count == 0 {
            Vec::new()
        } else {
            external_rows.into_flat()
        }),
        external_symbol_map: Cow::Owned(
            (first_external..token_count).map(|symbol| symbol as Symbol).collect(),
        ),
        external_scanner: None,
    })
}
