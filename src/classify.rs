use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::parser::text::{match_key, normalize};

/// Competitive-funding terms. Lists are searched in order, so more specific
/// entries (e.g. `基盤研究(C)`) come before the generic ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub institutions: Vec<String>,
    pub programs: Vec<String>,
    pub categories: Vec<String>,
    pub indicators: Vec<String>,
}

fn owned(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|s| s.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            institutions: owned(&[
                "日本学術振興会",
                "国立研究開発法人科学技術振興機構",
                "JST",
                "国立研究開発法人新エネルギー・産業技術総合開発機構",
                "独立行政法人新エネルギー・産業技術総合開発機構",
                "NEDO",
                "鉄鋼環境基金",
                "文部科学省",
                "厚生労働省",
                "経済産業省",
            ]),
            programs: owned(&[
                "科学研究費助成事業",
                "科学研究費補助金",
                "科学研究費",
                "基盤研究",
                "若手研究",
                "挑戦的萌芽研究",
                "萌芽研究",
                "挑戦的研究",
                "特別推進研究",
                "新学術領域研究",
                "特別研究員",
                "地熱発電技術研究開発",
                "新エネルギーベンチャー技術革新事業",
            ]),
            categories: owned(&[
                "基盤研究(S)",
                "基盤研究(A)",
                "基盤研究(B)",
                "基盤研究(C)",
                "若手研究(A)",
                "若手研究(B)",
                "若手研究(C)",
                "挑戦的萌芽研究",
                "萌芽研究",
                "特別推進研究",
                "新学術領域研究",
                "特別研究員",
            ]),
            indicators: owned(&["科研費", "助成事業", "補助金", "競争的資金"]),
        }
    }
}

impl Vocabulary {
    /// Load a vocabulary file; lists missing from the file keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading vocabulary {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing vocabulary {}", path.display()))
    }

    pub fn term_count(&self) -> usize {
        self.institutions.len() + self.programs.len() + self.categories.len() + self.indicators.len()
    }

    fn all(&self) -> impl Iterator<Item = &String> {
        self.institutions
            .iter()
            .chain(&self.programs)
            .chain(&self.categories)
            .chain(&self.indicators)
    }
}

/// First vocabulary hit per list, as shown on a project record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FundingAnalysis {
    pub institution: String,
    pub program: String,
    pub category: String,
}

/// Stateless keyword classifier over a folded [`Vocabulary`].
pub struct FundingClassifier {
    vocabulary: Vocabulary,
    folded: Vec<String>,
}

impl Default for FundingClassifier {
    fn default() -> Self {
        Self::new(Vocabulary::default())
    }
}

impl FundingClassifier {
    pub fn new(vocabulary: Vocabulary) -> Self {
        let folded = vocabulary
            .all()
            .map(|t| match_key(t))
            .filter(|t| !t.is_empty())
            .collect();
        Self { vocabulary, folded }
    }

    /// Competitive when funding text plus title contains any vocabulary term.
    /// A project with no funding text is never competitive.
    pub fn classify(&self, funding: &str, title: &str) -> bool {
        if normalize(funding).is_empty() {
            return false;
        }
        let haystack = match_key(&format!("{} {}", funding, title));
        self.folded.iter().any(|term| haystack.contains(term.as_str()))
    }

    pub fn analyze(&self, funding: &str) -> FundingAnalysis {
        let haystack = match_key(funding);
        let first = |terms: &[String]| {
            terms
                .iter()
                .find(|t| {
                    let k = match_key(t);
                    !k.is_empty() && haystack.contains(&k)
                })
                .cloned()
                .unwrap_or_default()
        };
        FundingAnalysis {
            institution: first(&self.vocabulary.institutions),
            program: first(&self.vocabulary.programs),
            category: first(&self.vocabulary.categories),
        }
    }
}
