//! The grammar description language.
//!
//! A [`Grammar`] is a list of named rules built from the combinators in this
//! module, mirroring the usual `grammar.js` vocabulary:
//!
//! ```
//! use canopy_generate::grammar::{choice, field, pattern, prec_left, seq, string, sym, Grammar};
//!
//! let grammar = Grammar::new("sum")
//!     .rule("expression", choice([sym("sum"), sym("number")]))
//!     .rule(
//!         "sum",
//!         prec_left(1, seq([field("left", sym("expression")), string("+"), field("right", sym("expression"))])),
//!     )
//!     .rule("number", pattern(r"\d+"));
//! # let _ = grammar;
//! ```
//!
//! The first rule is the start rule. Rules whose names begin with `_` are
//! hidden: their nodes never appear in the tree and their children are
//! promoted to the parent.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Matches nothing.
    Blank,
    /// A literal token.
    String(String),
    /// A token described by a regular expression.
    Pattern(String),
    /// A reference to another rule or external token.
    Symbol(String),
    Seq(Vec<Rule>),
    Choice(Vec<Rule>),
    /// One or more repetitions.
    Repeat(Box<Rule>),
    Prec {
        value: i32,
        associativity: Option<Associativity>,
        rule: Box<Rule>,
    },
    DynamicPrec {
        value: i16,
        rule: Box<Rule>,
    },
    Field {
        name: String,
        rule: Box<Rule>,
    },
    /// Lexes the whole content as a single token.
    Token(Box<Rule>),
}

pub fn blank() -> Rule {
    Rule::Blank
}

pub fn string(value: impl Into<String>) -> Rule {
    Rule::String(value.into())
}

pub fn pattern(value: impl Into<String>) -> Rule {
    Rule::Pattern(value.into())
}

pub fn sym(name: impl Into<String>) -> Rule {
    Rule::Symbol(name.into())
}

pub fn seq(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::Seq(rules.into_iter().collect())
}

pub fn choice(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::Choice(rules.into_iter().collect())
}

pub fn optional(rule: Rule) -> Rule {
    Rule::Choice(vec![rule, Rule::Blank])
}

pub fn repeat(rule: Rule) -> Rule {
    optional(repeat1(rule))
}

pub fn repeat1(rule: Rule) -> Rule {
    Rule::Repeat(Box::new(rule))
}

pub fn prec(value: i32, rule: Rule) -> Rule {
    Rule::Prec {
        value,
        associativity: None,
        rule: Box::new(rule),
    }
}

pub fn prec_left(value: i32, rule: Rule) -> Rule {
    Rule::Prec {
        value,
        associativity: Some(Associativity::Left),
        rule: Box::new(rule),
    }
}

pub fn prec_right(value: i32, rule: Rule) -> Rule {
    Rule::Prec {
        value,
        associativity: Some(Associativity::Right),
        rule: Box::new(rule),
    }
}

/// Prefers this rule's nodes when the runtime compares competing parses.
pub fn prec_dynamic(value: i16, rule: Rule) -> Rule {
    Rule::DynamicPrec {
        value,
        rule: Box::new(rule),
    }
}

pub fn field(name: impl Into<String>, rule: Rule) -> Rule {
    Rule::Field {
        name: name.into(),
        rule: Box::new(rule),
    }
}

pub fn token(rule: Rule) -> Rule {
    Rule::Token(Box::new(rule))
}

impl Rule {
    /// Whether the rule describes a single token on its own.
    pub(crate) fn is_lexical(&self) -> bool {
        match self {
            Self::String(_) | Self::Pattern(_) | Self::Token(_) => true,
            Self::Prec { rule, .. } => rule.is_lexical(),
            _ => false,
        }
    }
}

/// A grammar: named rules plus the tokens allowed anywhere and the tokens
/// produced by an external scanner.
#[derive(Clone, Debug)]
pub struct Grammar {
    pub name: String,
    pub rules: Vec<(String, Rule)>,
    /// Tokens that may appear between any two tokens. Patterns and strings
    /// become separators that are skipped as padding; references to token
    /// rules or external tokens become extra nodes in the tree.
    pub extras: Vec<Rule>,
    /// Names of the tokens produced by the grammar's external scanner, in
    /// the order the scanner reports them.
    pub externals: Vec<String>,
}

impl Grammar {
    /// A grammar with no rules whose only extra is whitespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            extras: vec![pattern(r"\s")],
            externals: Vec::new(),
        }
    }

    #[must_use]
    pub fn rule(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.rules.push((name.into(), rule));
        self
    }

    #[must_use]
    pub fn extras(mut self, extras: impl IntoIterator<Item = Rule>) -> Self {
        self.extras = extras.into_iter().collect();
        self
    }

    #[must_use]
    pub fn externals<S: Into<String>>(mut self, externals: impl IntoIterator<Item = S>) -> Self {
        self.externals = externals.into_iter().map(Into::into).collect();
        self
    }
}
