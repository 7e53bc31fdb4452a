// Runtime internals. Leaf utilities first, then the data structures built on
// them, then tree access and the parse loop.

// Leaf utilities
pub mod error_costs;
pub mod length;
pub mod point;
pub mod unicode;

// Core data structure
pub mod subtree;

// Tables and scanning
pub mod language;
pub mod lex_table;
pub mod lexer;
pub mod stack;

// Tree access
pub mod get_changed_ranges;
pub mod node;
pub mod query;
pub mod tree;
pub mod tree_cursor;

// The engine
pub mod parser;
pub mod reusable_node;
