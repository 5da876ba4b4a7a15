//! Lexicon and rule based sentiment scoring.
//!
//! Scores follow the VADER approach: each known word carries a valence in
//! roughly `[-4, 4]`, adjusted by preceding booster and negation words, by
//! shouting (all caps) and by a contrastive "but". Word scores are summed,
//! emphasised by `!`/`?`, and squashed into a compound score in `[-1, 1]`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use textsift_shared::{ColumnRole, Result, Value};

use crate::stage::{MapToSingle, ValueMapper};

/// Squashing constant of the compound score.
const ALPHA: f64 = 15.0;
const BOOSTER_INCR: f64 = 0.293;
const CAPS_INCR: f64 = 0.733;
const NEGATION_SCALAR: f64 = -0.74;
const EXCLAMATION_INCR: f64 = 0.292;
const QUESTION_INCR: f64 = 0.18;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]+(?:'[A-Za-z]+)?").expect("valid regex"));

/// A small general-purpose English lexicon.
const LEXICON: &[(&str, f64)] = &[
    ("amazing", 2.8),
    ("awesome", 3.1),
    ("awful", -2.0),
    ("bad", -2.5),
    ("beautiful", 2.9),
    ("best", 3.2),
    ("better", 1.9),
    ("boring", -1.3),
    ("brilliant", 2.8),
    ("broken", -1.8),
    ("calm", 1.3),
    ("cool", 1.3),
    ("crap", -1.6),
    ("cry", -2.1),
    ("dead", -3.3),
    ("delight", 2.9),
    ("disappointed", -1.9),
    ("disaster", -3.1),
    ("dislike", -1.6),
    ("enjoy", 2.2),
    ("error", -1.4),
    ("evil", -3.4),
    ("excellent", 2.7),
    ("fail", -2.5),
    ("failure", -2.3),
    ("fantastic", 2.6),
    ("fear", -2.2),
    ("fine", 0.8),
    ("fun", 2.3),
    ("glad", 2.0),
    ("good", 1.9),
    ("great", 3.1),
    ("happy", 2.7),
    ("hate", -2.7),
    ("helpful", 1.8),
    ("hope", 1.9),
    ("horrible", -2.5),
    ("hurt", -2.4),
    ("interesting", 1.7),
    ("joy", 2.8),
    ("kill", -3.7),
    ("like", 1.5),
    ("lose", -1.6),
    ("love", 3.2),
    ("lovely", 2.8),
    ("nice", 1.8),
    ("ok", 0.9),
    ("okay", 0.9),
    ("pain", -2.3),
    ("perfect", 2.7),
    ("pleasant", 2.3),
    ("poor", -2.1),
    ("problem", -1.7),
    ("sad", -2.1),
    ("safe", 1.9),
    ("stupid", -2.4),
    ("success", 2.7),
    ("terrible", -2.1),
    ("thanks", 1.9),
    ("ugly", -2.3),
    ("useful", 1.9),
    ("useless", -1.8),
    ("win", 2.8),
    ("wonderful", 2.7),
    ("worse", -2.1),
    ("worst", -3.1),
    ("wrong", -2.1),
];

const BOOSTERS: &[(&str, f64)] = &[
    ("absolutely", BOOSTER_INCR),
    ("completely", BOOSTER_INCR),
    ("extremely", BOOSTER_INCR),
    ("highly", BOOSTER_INCR),
    ("incredibly", BOOSTER_INCR),
    ("really", BOOSTER_INCR),
    ("so", BOOSTER_INCR),
    ("totally", BOOSTER_INCR),
    ("very", BOOSTER_INCR),
    ("barely", -BOOSTER_INCR),
    ("hardly", -BOOSTER_INCR),
    ("kinda", -BOOSTER_INCR),
    ("marginally", -BOOSTER_INCR),
    ("slightly", -BOOSTER_INCR),
    ("somewhat", -BOOSTER_INCR),
];

const NEGATIONS: &[&str] = &[
    "aint", "cannot", "cant", "dont", "doesnt", "didnt", "isnt", "wasnt", "neither",
    "never", "no", "nobody", "none", "nor", "not", "nothing", "nowhere", "without",
    "wont", "wouldnt",
];

/// VADER-style compound polarity of a text.
#[derive(Debug, Clone)]
pub struct LexiconSentiment {
    lexicon: HashMap<String, f64>,
    boosters: HashMap<&'static str, f64>,
}

impl Default for LexiconSentiment {
    fn default() -> Self {
        Self::new()
    }
}

impl LexiconSentiment {
    pub fn new() -> Self {
        Self {
            lexicon: LEXICON.iter().map(|(w, v)| (w.to_string(), *v)).collect(),
            boosters: BOOSTERS.iter().copied().collect(),
        }
    }

    /// Add or override word valences. Words are matched case-insensitively.
    pub fn with_lexicon<S: AsRef<str>>(mut self, entries: impl IntoIterator<Item = (S, f64)>) -> Self {
        for (word, valence) in entries {
            self.lexicon.insert(word.as_ref().to_lowercase(), valence);
        }
        self
    }

    /// A numeric stage scoring `column` into `out_column`.
    pub fn stage(column: impl Into<String>, out_column: impl Into<String>) -> MapToSingle<Self> {
        MapToSingle::new(Self::new(), column, out_column, Some(ColumnRole::Numeric))
    }

    /// Compound score in `[-1, 1]`, rounded to four decimals. Texts without
    /// any known word score `0`.
    pub fn compound(&self, text: &str) -> f64 {
        let words: Vec<&str> = WORD_RE.find_iter(text).map(|m| m.as_str()).collect();
        let lower: Vec<String> = words.iter().map(|w| w.to_lowercase().replace('\'', "")).collect();
        let mixed_case = words.iter().any(|w| !is_shouted(w));

        let mut scores: Vec<f64> = Vec::with_capacity(words.len());
        for (i, word) in lower.iter().enumerate() {
            let Some(&base) = self.lexicon.get(word.as_str()) else {
                scores.push(0.0);
                continue;
            };
            let mut valence = base;
            if mixed_case && is_shouted(words[i]) {
                valence += CAPS_INCR * valence.signum();
            }
            for back in 1..=3 {
                let Some(j) = i.checked_sub(back) else { break };
                if let Some(&boost) = self.boosters.get(lower[j].as_str()) {
                    let decay = match back {
                        1 => 1.0,
                        2 => 0.95,
                        _ => 0.9,
                    };
                    valence += boost * decay * valence.signum();
                }
                if NEGATIONS.contains(&lower[j].as_str()) || is_contraction(words[j]) {
                    valence *= NEGATION_SCALAR;
                }
            }
            scores.push(valence);
        }

        if let Some(but) = lower.iter().position(|w| w == "but") {
            for (i, s) in scores.iter_mut().enumerate() {
                match i.cmp(&but) {
                    std::cmp::Ordering::Less => *s *= 0.5,
                    std::cmp::Ordering::Greater => *s *= 1.5,
                    std::cmp::Ordering::Equal => {}
                }
            }
        }

        let mut sum: f64 = scores.iter().sum();
        if sum == 0.0 {
            return 0.0;
        }
        sum += punctuation_emphasis(text) * sum.signum();

        let compound = (sum / (sum * sum + ALPHA).sqrt()).clamp(-1.0, 1.0);
        (compound * 10_000.0).round() / 10_000.0
    }
}

fn is_shouted(word: &str) -> bool {
    word.len() > 1 && word.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
}

fn is_contraction(word: &str) -> bool {
    word.to_lowercase().ends_with("n't")
}

fn punctuation_emphasis(text: &str) -> f64 {
    let exclamations = text.matches('!').count().min(4) as f64 * EXCLAMATION_INCR;
    let questions = text.matches('?').count();
    let questions = if questions > 1 {
        (questions as f64 * QUESTION_INCR).min(0.96)
    } else {
        0.0
    };
    exclamations + questions
}

impl ValueMapper for LexiconSentiment {
    fn map(&self, text: &str) -> Result<Value> {
        Ok(Value::Number(self.compound(text)))
    }
}
