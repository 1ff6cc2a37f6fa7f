// Assist module - Completion candidates and input-line highlighting
pub mod completion;
pub mod grammar;
pub mod highlight;

pub use completion::{Candidate, CandidateSource, CompletionEngine, DynamicItems, LineCompletion};
pub use grammar::Grammar;
pub use highlight::{tokenize, Token, TokenKind};
