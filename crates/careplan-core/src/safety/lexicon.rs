//! Lexical crisis screen run before the model classifier.
//!
//! The screen only ever raises risk. A model verdict can lower nothing the
//! screen flagged as high severity.

use careplan_db::models::RiskLevel;

/// A phrase the screen looks for, with the flag and level it implies.
#[derive(Debug, Clone)]
pub struct RiskTerm {
    pub phrase: &'static str,
    pub flag: &'static str,
    pub level: RiskLevel,
}

const fn term(phrase: &'static str, flag: &'static str, level: RiskLevel) -> RiskTerm {
    RiskTerm {
        phrase,
        flag,
        level,
    }
}

/// First-person phrasings, to keep clinician questions such as "any
/// thoughts of suicide?" from matching on their own.
const DEFAULT_TERMS: &[RiskTerm] = &[
    term("kill myself", "suicidal_ideation", RiskLevel::High),
    term("end my life", "suicidal_ideation", RiskLevel::High),
    term("take my own life", "suicidal_ideation", RiskLevel::High),
    term("want to die", "suicidal_ideation", RiskLevel::High),
    term("better off dead", "suicidal_ideation", RiskLevel::High),
    term("no reason to live", "suicidal_ideation", RiskLevel::High),
    term("i have a plan to", "stated_plan", RiskLevel::High),
    term("going to hurt him", "harm_to_others", RiskLevel::High),
    term("going to hurt her", "harm_to_others", RiskLevel::High),
    term("going to hurt them", "harm_to_others", RiskLevel::High),
    term("want to kill", "harm_to_others", RiskLevel::High),
    term("hurt myself", "self_harm", RiskLevel::Medium),
    term("cutting myself", "self_harm", RiskLevel::Medium),
    term("self-harm", "self_harm", RiskLevel::Medium),
    term("hopeless", "hopelessness", RiskLevel::Medium),
    term("started using again", "substance_relapse", RiskLevel::Medium),
    term("relapsed", "substance_relapse", RiskLevel::Medium),
];

/// Outcome of a lexical screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenResult {
    /// Highest level among matched terms; `Low` when nothing matched.
    pub level: RiskLevel,
    /// Distinct flags, in lexicon order.
    pub flags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RiskLexicon {
    terms: Vec<RiskTerm>,
}

impl RiskLexicon {
    pub fn new(terms: Vec<RiskTerm>) -> Self {
        Self { terms }
    }

    /// A lexicon that matches nothing.
    pub fn empty() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn screen(&self, transcript: &str) -> ScreenResult {
        let haystack = transcript.to_lowercase();
        let mut level = RiskLevel::Low;
        let mut flags: Vec<String> = Vec::new();

        for t in self.terms.iter().filter(|t| haystack.contains(t.phrase)) {
            level = level.max(t.level);
            if !flags.iter().any(|f| f == t.flag) {
                flags.push(t.flag.to_owned());
            }
        }

        ScreenResult { level, flags }
    }
}

impl Default for RiskLexicon {
    fn default() -> Self {
        Self::new(DEFAULT_TERMS.to_vec())
    }
}
