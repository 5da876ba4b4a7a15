//! Linguistic enrichment: entities, subjects, verbs, part-of-speech counts.
//!
//! The heavy lifting (tokenization, tagging, parsing) is delegated to an
//! [`Annotator`], normally a binding to an external language model. The
//! stage turns each annotated document into named tag columns.
//! [`RuleAnnotator`] is a dependency-free stand-in based on token shape.

use std::sync::LazyLock;

use regex::Regex;
use textsift_shared::{Result, Value};

use crate::stage::{Annotations, MapToNamedTags, NamedTagAnnotator, StageContext};

/// Tags produced by default.
pub const DEFAULT_TAGS: [&str; 3] = ["ents", "subj", "verb"];

/// Keys never sent to the search index (large or non-indexable values).
pub const SINK_EXCLUDED_KEYS: [&str; 3] = ["doc", "vec", "vec_normalized"];

/// Dependency labels treated as nominal subjects.
const SUBJECT_DEPS: [&str; 2] = ["nsubj", "sb"];

// ---------------------------------------------------------------------------
// Annotated documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    pub lemma: String,
    /// Universal POS tag, e.g. `NOUN`, `VERB`, `PROPN`.
    pub pos: String,
    /// Dependency label, e.g. `nsubj`; empty when unknown.
    pub dep: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub text: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub tokens: Vec<Token>,
    pub entities: Vec<Entity>,
    pub vector: Option<Vec<f32>>,
}

/// Annotates a batch of texts. Implementations may parallelize internally.
pub trait Annotator {
    fn annotate(&self, texts: &[String]) -> Result<Vec<Document>>;
}

// ---------------------------------------------------------------------------
// Enrichment options
// ---------------------------------------------------------------------------

/// Which part-of-speech counts to emit as `num_{POS}` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PosCounts {
    /// Every tag present in the document.
    All,
    /// Only these tags; absent tags count zero.
    Only(Vec<String>),
    None,
}

/// Which document vectors to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOutput {
    None,
    /// `vec`: the raw vector.
    Raw,
    /// `vec_normalized`: the vector scaled to unit length.
    Normalized,
    Both,
}

/// [`NamedTagAnnotator`] that maps annotated documents to keyed outputs.
pub struct LinguisticEnrichment<A> {
    annotator: A,
    tags: Vec<String>,
    pos_counts: PosCounts,
    vectors: VectorOutput,
}

impl<A: Annotator> LinguisticEnrichment<A> {
    pub fn new(annotator: A) -> Self {
        Self {
            annotator,
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            pos_counts: PosCounts::All,
            vectors: VectorOutput::None,
        }
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pos_counts(mut self, pos_counts: PosCounts) -> Self {
        self.pos_counts = pos_counts;
        self
    }

    pub fn with_vectors(mut self, vectors: VectorOutput) -> Self {
        self.vectors = vectors;
        self
    }

    /// Wrap into a named-tag stage over `columns`.
    pub fn stage<S: Into<String>>(
        self,
        columns: impl IntoIterator<Item = S>,
    ) -> MapToNamedTags<Self> {
        let tags = self.tags.clone();
        MapToNamedTags::new(self, columns, tags)
            .named(format!("LinguisticEnrichment({})", crate::stage::short_type_name::<A>()))
            .excluding_from_sink(SINK_EXCLUDED_KEYS)
    }

    fn wants(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn annotations(&self, doc: &Document) -> Annotations {
        let mut out: Annotations = vec![("wc".to_string(), Value::from(doc.tokens.len()))];
        if doc.tokens.is_empty() {
            return out;
        }

        if self.wants("ents") {
            let mut by_label: Vec<(String, Vec<String>)> = Vec::new();
            for e in &doc.entities {
                match by_label.iter_mut().find(|(l, _)| *l == e.label) {
                    Some((_, texts)) => texts.push(e.text.clone()),
                    None => by_label.push((e.label.clone(), vec![e.text.clone()])),
                }
            }
            for (label, texts) in by_label {
                out.push((format!("entity_{label}"), Value::from(texts)));
            }
            if !doc.entities.is_empty() {
                let ents: Vec<String> = doc.entities.iter().map(|e| e.text.clone()).collect();
                out.push(("ents".to_string(), Value::from(ents)));
            }
        }

        if self.wants("subj") {
            let subj: Vec<String> = doc
                .tokens
                .iter()
                .filter(|t| SUBJECT_DEPS.contains(&t.dep.as_str()))
                .map(|t| t.lemma.clone())
                .collect();
            out.push(("subj".to_string(), Value::from(subj)));
        }

        if self.wants("verb") {
            let verbs: Vec<String> = doc
                .tokens
                .iter()
                .filter(|t| t.pos == "VERB")
                .map(|t| t.lemma.clone())
                .collect();
            out.push(("verb".to_string(), Value::from(verbs)));
        }

        let selected: Vec<String> = match &self.pos_counts {
            PosCounts::None => Vec::new(),
            PosCounts::Only(tags) => tags.clone(),
            PosCounts::All => {
                let mut seen: Vec<String> = Vec::new();
                for t in &doc.tokens {
                    if !seen.contains(&t.pos) {
                        seen.push(t.pos.clone());
                    }
                }
                seen
            }
        };
        for pos in selected {
            let n = doc.tokens.iter().filter(|t| t.pos == pos).count();
            out.push((format!("num_{pos}"), Value::from(n)));
        }

        if let Some(vector) = &doc.vector {
            if matches!(self.vectors, VectorOutput::Raw | VectorOutput::Both) {
                out.push(("vec".to_string(), Value::Vector(vector.clone())));
            }
            if matches!(self.vectors, VectorOutput::Normalized | VectorOutput::Both) {
                let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                let normalized = if norm == 0.0 {
                    vector.clone()
                } else {
                    vector.iter().map(|x| x / norm).collect()
                };
                out.push(("vec_normalized".to_string(), Value::Vector(normalized)));
            }
        }

        out
    }
}

impl<A: Annotator> NamedTagAnnotator for LinguisticEnrichment<A> {
    fn annotate(&self, texts: &[String], ctx: &StageContext<'_>) -> Result<Vec<Annotations>> {
        ctx.tic("annotate batch");
        let docs = self.annotator.annotate(texts);
        ctx.toc()?;
        let docs = docs?;

        let mut out = Vec::with_capacity(docs.len());
        for doc in ctx.wrap(&docs, "documents") {
            ctx.tic("process docs");
            out.push(self.annotations(doc));
            ctx.toc()?;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// RuleAnnotator
// ---------------------------------------------------------------------------

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+(?:['’]\w+)*|[^\w\s]").expect("valid regex")
});

const DETERMINERS: &[&str] = &["a", "an", "the", "this", "that", "these", "those", "every", "some"];
const PRONOUNS: &[&str] = &[
    "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
];
const ADPOSITIONS: &[&str] = &[
    "in", "on", "at", "of", "to", "for", "from", "with", "by", "about", "into", "over",
];
const CONJUNCTIONS: &[&str] = &["and", "or", "but", "nor", "yet"];
const AUXILIARIES: &[&str] = &[
    "is", "are", "was", "were", "be", "been", "am", "has", "have", "had", "do", "does",
    "did", "will", "would", "can", "could", "should", "may", "might", "must",
];
const COMMON_VERBS: &[&str] = &[
    "go", "goes", "went", "make", "makes", "made", "say", "says", "said", "get", "gets",
    "got", "see", "sees", "saw", "know", "knows", "knew", "take", "takes", "took", "think",
    "thinks", "thought", "come", "comes", "came", "give", "gives", "gave", "find", "finds",
    "found", "run", "runs", "ran", "use", "uses", "want", "wants", "like", "likes", "love",
    "loves", "meet", "meets", "met", "write", "writes", "wrote",
];

/// Shape-based annotator: regex tokenization, closed-class word lists and
/// suffix heuristics for POS, the first nominal before the first verb of a
/// sentence as its subject, and runs of capitalised words as entities.
#[derive(Debug, Clone, Default)]
pub struct RuleAnnotator {
    /// Dimension of a hashed bag-of-words vector; `0` disables vectors.
    vector_dim: usize,
}

impl RuleAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector_dim(mut self, dim: usize) -> Self {
        self.vector_dim = dim;
        self
    }

    pub fn annotate_one(&self, text: &str) -> Document {
        let raw: Vec<&str> = TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect();
        let mut tokens: Vec<Token> = Vec::with_capacity(raw.len());
        let mut sentence_start = true;
        for word in &raw {
            let pos = tag_pos(word, sentence_start);
            sentence_start = matches!(*word, "." | "!" | "?");
            tokens.push(Token {
                text: word.to_string(),
                lemma: lemmatize(word, pos),
                pos: pos.to_string(),
                dep: String::new(),
            });
        }
        mark_subjects(&mut tokens);

        let entities = entity_runs(&tokens);
        let vector = (self.vector_dim > 0).then(|| hashed_vector(&tokens, self.vector_dim));
        Document {
            tokens,
            entities,
            vector,
        }
    }
}

impl Annotator for RuleAnnotator {
    fn annotate(&self, texts: &[String]) -> Result<Vec<Document>> {
        Ok(texts.iter().map(|t| self.annotate_one(t)).collect())
    }
}

fn tag_pos(word: &str, sentence_start: bool) -> &'static str {
    let lower = word.to_lowercase();
    let first = word.chars().next().unwrap_or(' ');
    if word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') && first.is_ascii_digit() {
        "NUM"
    } else if !first.is_alphanumeric() && first != '_' {
        "PUNCT"
    } else if DETERMINERS.contains(&lower.as_str()) {
        "DET"
    } else if PRONOUNS.contains(&lower.as_str()) {
        "PRON"
    } else if ADPOSITIONS.contains(&lower.as_str()) {
        "ADP"
    } else if CONJUNCTIONS.contains(&lower.as_str()) {
        "CCONJ"
    } else if AUXILIARIES.contains(&lower.as_str()) {
        "AUX"
    } else if first.is_uppercase() && !sentence_start {
        "PROPN"
    } else if COMMON_VERBS.contains(&lower.as_str())
        || (lower.len() > 4 && (lower.ends_with("ing") || lower.ends_with("ed")))
    {
        "VERB"
    } else if lower.len() > 3 && lower.ends_with("ly") {
        "ADV"
    } else {
        "NOUN"
    }
}

fn lemmatize(word: &str, pos: &str) -> String {
    let lower = word.to_lowercase();
    match pos {
        "VERB" => {
            for suffix in ["ing", "ed", "es", "s"] {
                if let Some(stem) = lower.strip_suffix(suffix) {
                    if stem.len() >= 3 {
                        return stem.to_string();
                    }
                }
            }
            lower
        }
        "NOUN" if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") => {
            lower[..lower.len() - 1].to_string()
        }
        "PROPN" => word.to_string(),
        _ => lower,
    }
}

/// Label the first nominal preceding the first verb of each sentence as `nsubj`.
fn mark_subjects(tokens: &mut [Token]) {
    let mut candidate: Option<usize> = None;
    let mut done = false;
    for i in 0..tokens.len() {
        match tokens[i].pos.as_str() {
            "PUNCT" if matches!(tokens[i].text.as_str(), "." | "!" | "?") => {
                candidate = None;
                done = false;
            }
            "NOUN" | "PROPN" | "PRON" if !done && candidate.is_none() => candidate = Some(i),
            "VERB" | "AUX" if !done => {
                if let Some(c) = candidate {
                    tokens[c].dep = "nsubj".to_string();
                }
                done = true;
            }
            _ => {}
        }
    }
}

fn entity_runs(tokens: &[Token]) -> Vec<Entity> {
    tokens
        .split(|t| t.pos != "PROPN")
        .filter(|run| !run.is_empty())
        .map(|run| Entity {
            text: run.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" "),
            label: "NAME".to_string(),
        })
        .collect()
}

fn hashed_vector(tokens: &[Token], dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    for t in tokens.iter().filter(|t| t.pos != "PUNCT") {
        // FNV-1a
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in t.lemma.bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        v[(h % dim as u64) as usize] += 1.0;
    }
    v
}
