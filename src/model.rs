use serde::{Deserialize, Serialize};

use crate::classify::FundingClassifier;
use crate::parser::text::{match_key, normalize, Period};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearcherRecord {
    pub identifier: String,
    pub url: String,
    pub name: String,
    pub english_name: String,
    pub kana_name: String,
    pub affiliations: Vec<String>,
    pub position: String,
    pub orcid_id: String,
    pub jglobal_id: String,
    pub member_id: String,
    pub keywords: Vec<String>,
    pub areas: Vec<String>,
    pub education: Vec<String>,
    pub projects: Vec<ProjectRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub funding: String,
    pub period: Period,
    pub researchers: String,
    pub institution: String,
    pub program: String,
    pub category: String,
    pub budget: String,
    pub is_competitive: bool,
}

impl ResearcherRecord {
    pub fn new(identifier: &str, url: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn competitive_projects(&self) -> usize {
        self.projects.iter().filter(|p| p.is_competitive).count()
    }

    /// Fold `other` into `self`: lists are unioned, scalars keep the
    /// non-empty (or the deterministic winner), projects are unioned by id.
    pub fn merge(&mut self, other: ResearcherRecord, classifier: &FundingClassifier) {
        merge_scalar(&mut self.identifier, other.identifier);
        merge_scalar(&mut self.url, other.url);
        merge_scalar(&mut self.name, other.name);
        merge_scalar(&mut self.english_name, other.english_name);
        merge_scalar(&mut self.kana_name, other.kana_name);
        merge_scalar(&mut self.position, other.position);
        merge_scalar(&mut self.orcid_id, other.orcid_id);
        merge_scalar(&mut self.jglobal_id, other.jglobal_id);
        merge_scalar(&mut self.member_id, other.member_id);
        merge_list(&mut self.affiliations, other.affiliations);
        merge_list(&mut self.keywords, other.keywords);
        merge_list(&mut self.areas, other.areas);
        merge_list(&mut self.education, other.education);

        for project in other.projects {
            self.add_project(project, classifier);
        }
    }

    /// Append a project, merging it into an existing one with the same key.
    pub fn add_project(&mut self, project: ProjectRecord, classifier: &FundingClassifier) {
        let key = project.key();
        match self.projects.iter_mut().find(|p| p.key() == key) {
            Some(existing) => existing.merge(project, classifier),
            None => self.projects.push(project),
        }
    }
}

impl ProjectRecord {
    /// Union key: the project id, or the folded title when there is none.
    pub fn key(&self) -> String {
        if self.id.is_empty() {
            match_key(&self.title)
        } else {
            self.id.clone()
        }
    }

    pub fn merge(&mut self, other: ProjectRecord, classifier: &FundingClassifier) {
        merge_scalar(&mut self.id, other.id);
        merge_scalar(&mut self.title, other.title);
        merge_scalar(&mut self.url, other.url);
        merge_scalar(&mut self.funding, other.funding);
        merge_scalar(&mut self.researchers, other.researchers);
        merge_scalar(&mut self.institution, other.institution);
        merge_scalar(&mut self.program, other.program);
        merge_scalar(&mut self.category, other.category);
        merge_scalar(&mut self.budget, other.budget);
        if wins(&other.period.text, &self.period.text) {
            self.period = other.period;
        }
        self.is_competitive = classifier.classify(&self.funding, &self.title);
    }
}

/// `candidate` replaces `current` when current is empty, or when both are set
/// and candidate is longer (then lexicographically greater) after normalizing.
fn wins(candidate: &str, current: &str) -> bool {
    let (c, k) = (normalize(candidate), normalize(current));
    if c.is_empty() || c == k {
        return false;
    }
    if k.is_empty() {
        return true;
    }
    (c.chars().count(), c.as_str()) > (k.chars().count(), k.as_str())
}

fn merge_scalar(current: &mut String, candidate: String) {
    if wins(&candidate, current) {
        *current = candidate;
    }
}

fn merge_list(current: &mut Vec<String>, incoming: Vec<String>) {
    for item in incoming {
        let key = match_key(&item);
        if key.is_empty() {
            continue;
        }
        if !current.iter().any(|c| match_key(c) == key) {
            current.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FundingClassifier {
        FundingClassifier::default()
    }

    fn record(name: &str, keywords: &[&str]) -> ResearcherRecord {
        ResearcherRecord {
            identifier: "taro".into(),
            name: name.into(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn populated_field_never_overwritten_by_empty() {
        let mut a = record("山田 太郎", &[]);
        a.merge(record("", &["x"]), &classifier());
        assert_eq!(a.name, "山田 太郎");
        assert_eq!(a.keywords, vec!["x"]);

        let mut b = record("", &[]);
        b.merge(record("山田 太郎", &[]), &classifier());
        assert_eq!(b.name, "山田 太郎");
    }

    #[test]
    fn merge_is_idempotent() {
        let a = record("山田 太郎", &["3Dプリンティング", "表面汚れ"]);
        let mut merged = a.clone();
        merged.merge(a.clone(), &classifier());
        assert_eq!(merged, a);
    }

    #[test]
    fn merge_commutes() {
        let a = record("山田", &["a", "B"]);
        let b = record("山田 太郎", &["b", "c"]);

        let mut ab = a.clone();
        ab.merge(b.clone(), &classifier());
        let mut ba = b.clone();
        ba.merge(a.clone(), &classifier());

        assert_eq!(ab.name, ba.name);
        assert_eq!(ab.name, "山田 太郎");
        let sorted = |r: &ResearcherRecord| {
            let mut k: Vec<_> = r.keywords.iter().map(|s| match_key(s)).collect();
            k.sort();
            k
        };
        assert_eq!(sorted(&ab), sorted(&ba));
        assert_eq!(sorted(&ab), vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_is_associative() {
        let a = record("A", &["x"]);
        let b = record("BB", &["y"]);
        let c = record("", &["x", "z"]);

        let mut left = a.clone();
        left.merge(b.clone(), &classifier());
        left.merge(c.clone(), &classifier());

        let mut bc = b.clone();
        bc.merge(c.clone(), &classifier());
        let mut right = a.clone();
        right.merge(bc, &classifier());

        assert_eq!(left, right);
    }

    #[test]
    fn projects_union_by_id_and_reclassify() {
        let p1 = ProjectRecord {
            id: "101".into(),
            title: "表面汚れの研究".into(),
            ..Default::default()
        };
        let p2 = ProjectRecord {
            id: "101".into(),
            funding: "日本学術振興会 科学研究費助成事業".into(),
            ..Default::default()
        };
        let p3 = ProjectRecord {
            title: "社内プロジェクト".into(),
            ..Default::default()
        };

        let mut a = ResearcherRecord {
            projects: vec![p1],
            ..Default::default()
        };
        let b = ResearcherRecord {
            projects: vec![p2, p3],
            ..Default::default()
        };
        a.merge(b, &classifier());

        assert_eq!(a.projects.len(), 2);
        assert_eq!(a.projects[0].title, "表面汚れの研究");
        assert!(a.projects[0].is_competitive);
        assert_eq!(a.competitive_projects(), 1);
    }
}
