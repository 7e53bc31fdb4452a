// Weights used to rank error recoveries and summarise how broken a subtree is.

use crate::StateId;

/// Parse state reserved for error recovery. Every token is valid in its lex
/// mode and it has no actions.
pub const ERROR_STATE: StateId = 0;

pub const ERROR_COST_PER_RECOVERY: u32 = 500;
pub const ERROR_COST_PER_MISSING_TREE: u32 = 110;
pub const ERROR_COST_PER_SKIPPED_TREE: u32 = 100;
pub const ERROR_COST_PER_SKIPPED_LINE: u32 = 30;
pub const ERROR_COST_PER_SKIPPED_CHAR: u32 = 1;

/// Popping the stack is preferred over skipping the lookahead unless it costs
/// more than this much extra.
pub const MAX_COST_DIFFERENCE: u32 = 16 * ERROR_COST_PER_SKIPPED_TREE;
