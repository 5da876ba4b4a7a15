//! Concrete stages built on the three stage shapes.

pub mod linguistic;
pub mod regex_tag;
pub mod sentiment;

pub use linguistic::{
    Annotator, Document, Entity, LinguisticEnrichment, PosCounts, RuleAnnotator, Token,
    VectorOutput,
};
pub use regex_tag::RegexTag;
pub use sentiment::LexiconSentiment;
