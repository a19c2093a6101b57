//! Response-line filtering for the server→client direction

mod rules;

pub use rules::FilterRuleSet;
