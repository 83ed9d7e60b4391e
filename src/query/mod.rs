// Lexical statement analysis: classification and the safety denylist
pub mod classifier;
pub mod normalize;
pub mod safety;

pub use classifier::{
    ClassifiedQuery, LexicalClassifier, QueryType, StatementClassifier, classify,
    extract_where_conditions,
};
pub use normalize::normalize_sql;
pub use safety::{SecurityRejection, is_safe};
