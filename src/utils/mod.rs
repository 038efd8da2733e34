pub mod symbol_set;

pub use symbol_set::{RedBlackSet, SymbolSet};
