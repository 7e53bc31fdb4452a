use canopy::LanguageError;

/// Why a grammar could not be turned into tables.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("the grammar defines no rules")]
    NoRules,
    #[error("rule `{0}` is defined more than once")]
    DuplicateRule(String),
    #[error("undefined symbol `{symbol}` referenced in rule `{rule}`")]
    UndefinedSymbol { rule: String, symbol: String },
    #[error("the start rule `{0}` must not be a token")]
    LexicalStartRule(String),
    #[error("extra `{0}` must be a token, a pattern or an external token")]
    NonTokenExtra(String),
    #[error("invalid pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("pattern `{pattern}` uses an unsupported feature: {feature}")]
    UnsupportedPattern {
        pattern: String,
        feature: &'static str,
    },
    #[error("token `{0}` matches the empty string")]
    EmptyToken(String),
    #[error("rule `{0}` refers to other rules inside `token(..)`")]
    SymbolInToken(String),
    #[error("a production of `{0}` has more than 255 children")]
    TooManyChildren(String),
    #[error("the grammar needs {0} symbols, more than the table format allows")]
    TooManySymbols(usize),
    #[error("the grammar needs {0} parse states, more than the table format allows")]
    TooManyStates(usize),
    #[error("the parse table needs {0} action entries, more than the table format allows")]
    TooManyActions(usize),
    #[error(transparent)]
    Language(#[from] LanguageError),
}
