use std::collections::HashMap;

use scraper::ElementRef;
use tracing::debug;

use super::field::{extract, ExtractedValue, Field};
use super::locator::element_text;
use super::specs;
use super::text::{extract_budget, match_key, parse_period, strip_period, Period};
use crate::classify::FundingClassifier;
use crate::error::SpecError;
use crate::model::{ProjectRecord, ResearcherRecord};
use crate::ocr::Recognizer;

/// Field name to extracted values, for one scope.
pub type FieldResults = HashMap<&'static str, Vec<ExtractedValue>>;

pub fn extract_fields(scope: ElementRef<'_>, fields: &[Field]) -> Result<FieldResults, SpecError> {
    fields
        .iter()
        .map(|f| Ok((f.name, extract(scope, f)?)))
        .collect()
}

fn first_text(results: &FieldResults, field: &str) -> String {
    results
        .get(field)
        .and_then(|v| v.iter().find(|x| !x.text.is_empty()))
        .map(|x| x.text.clone())
        .unwrap_or_default()
}

/// Identifier text; when the value is a link, its trailing path segment.
fn first_identifier(results: &FieldResults, field: &str) -> String {
    let text = first_text(results, field);
    if !text.contains("://") {
        return text;
    }
    results
        .get(field)
        .and_then(|v| v.iter().find_map(|x| x.id.clone()))
        .unwrap_or(text)
}

fn texts(results: &FieldResults, field: &str) -> Vec<String> {
    results
        .get(field)
        .map(|v| {
            v.iter()
                .filter(|x| !x.text.is_empty())
                .map(|x| x.text.clone())
                .collect()
        })
        .unwrap_or_default()
}

// ── Researchers ──

pub fn assemble_researcher(
    identifier: &str,
    url: &str,
    results: &FieldResults,
    ocr: &dyn Recognizer,
) -> ResearcherRecord {
    let mut affiliations: Vec<String> = Vec::new();
    for value in results.get(specs::AFFILIATIONS).into_iter().flatten() {
        let text = if value.text.is_empty() {
            match &value.image {
                Some(image) => ocr
                    .recognize(image)
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| image.alt.clone()),
                None => continue,
            }
        } else {
            value.text.clone()
        };
        if !text.is_empty() && !affiliations.iter().any(|a| match_key(a) == match_key(&text)) {
            affiliations.push(text);
        }
    }

    ResearcherRecord {
        identifier: identifier.to_string(),
        url: url.to_string(),
        name: first_text(results, specs::NAME),
        english_name: first_text(results, specs::ENGLISH_NAME),
        kana_name: String::new(),
        affiliations,
        position: first_text(results, specs::POSITION),
        orcid_id: first_identifier(results, specs::ORCID),
        jglobal_id: first_identifier(results, specs::JGLOBAL),
        member_id: first_identifier(results, specs::MEMBER_ID),
        keywords: texts(results, specs::KEYWORDS),
        areas: texts(results, specs::AREAS),
        education: texts(results, specs::EDUCATION),
        projects: Vec::new(),
    }
}

// ── Projects ──

/// Build one project from a list entry. Entries without a title are not projects.
pub fn assemble_project(
    fragment: ElementRef<'_>,
    results: &FieldResults,
    classifier: &FundingClassifier,
    details: bool,
) -> Option<ProjectRecord> {
    let title_value = results.get(specs::TITLE)?.iter().find(|v| !v.text.is_empty())?;
    let title = title_value.text.clone();
    let url = title_value.link.clone().unwrap_or_default();
    let id = title_value
        .id
        .clone()
        .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or_else(|| match_key(&title));

    let raw_funding = first_text(results, specs::FUNDING);
    let researchers = first_text(results, specs::RESEARCHERS);
    let whole = element_text(fragment);

    let (period, funding) = match parse_period(&raw_funding) {
        Some(p) => {
            let stripped = strip_period(&raw_funding, &p);
            (p, stripped)
        }
        None => (parse_period(&whole).unwrap_or_else(Period::default), raw_funding),
    };

    let mut project = ProjectRecord {
        id,
        title,
        url,
        funding,
        period,
        researchers,
        ..Default::default()
    };

    if details {
        let analysis = classifier.analyze(&project.funding);
        project.institution = analysis.institution;
        project.program = analysis.program;
        project.category = analysis.category;
        project.budget = extract_budget(&whole).unwrap_or_default();
    }
    project.is_competitive = classifier.classify(&project.funding, &project.title);

    debug!(
        "project {} competitive={} funding={:?}",
        project.id, project.is_competitive, project.funding
    );
    Some(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{ImageRef, NoopRecognizer};
    use crate::parser::specs::{profile_specs, project_specs, Mode, PROJECT_ITEM};
    use scraper::{Html, Selector};

    const BASE: &str = "https://researchmap.jp";

    fn compile(specs: Vec<crate::parser::field::FieldSpec>) -> Vec<Field> {
        specs.iter().map(|s| s.compile(BASE).unwrap()).collect()
    }

    fn profile(path: &str, mode: Mode) -> ResearcherRecord {
        let html = std::fs::read_to_string(path).unwrap();
        let doc = Html::parse_document(&html);
        let fields = compile(profile_specs(mode));
        let results = extract_fields(doc.root_element(), &fields).unwrap();
        assemble_researcher("kanematsu", "https://researchmap.jp/kanematsu", &results, &NoopRecognizer)
    }

    #[test]
    fn primary_layout_keywords_in_order() {
        let r = profile("tests/fixtures/profile_primary.html", Mode::Basic);
        assert_eq!(r.keywords, vec!["3Dプリンティング", "表面汚れ"]);
        assert_eq!(r.name, "兼松 秀行");
        assert_eq!(r.english_name, "Hideyuki Kanematsu");
        assert_eq!(r.affiliations, vec!["鈴鹿工業高等専門学校 材料工学科", "三重大学 大学院工学研究科"]);
        assert_eq!(r.areas, vec!["ナノテク・材料 / 金属材料物性"]);
        assert_eq!(r.orcid_id, "");
    }

    #[test]
    fn enhanced_reads_identifiers_and_education() {
        let r = profile("tests/fixtures/profile_primary.html", Mode::Enhanced);
        assert_eq!(r.orcid_id, "0000-0002-1234-5678");
        assert_eq!(r.jglobal_id, "200901012345678901");
        assert_eq!(r.member_id, "1000012345");
        assert_eq!(r.education.len(), 2);
        assert!(r.education[0].contains("名古屋大学"));
    }

    #[test]
    fn orcid_badge_link_is_read_from_href() {
        let html = r#"<html><body><h1 class="rm-cv-basic-name">兼松 秀行</h1>
            <p class="links"><a href="https://orcid.org/0000-0001-9999-0000"><img src="/images/orcid.png" alt=""></a></p>
            </body></html>"#;
        let doc = Html::parse_document(html);
        let fields = compile(profile_specs(Mode::Enhanced));
        let results = extract_fields(doc.root_element(), &fields).unwrap();
        let r = assemble_researcher("kanematsu", "https://researchmap.jp/kanematsu", &results, &NoopRecognizer);
        assert_eq!(r.orcid_id, "0000-0001-9999-0000");
        assert_eq!(r.jglobal_id, "");
    }

    #[test]
    fn panel_layout_falls_back() {
        let r = profile("tests/fixtures/profile_panel.html", Mode::Basic);
        assert_eq!(r.keywords, vec!["バイオフィルム", "腐食"]);
        assert_eq!(r.areas, vec!["環境・農学 / 環境材料"]);
        assert_eq!(r.name, "兼松 秀行");
        assert_eq!(r.affiliations, vec!["鈴鹿工業高等専門学校"]);
        assert_eq!(r.position, "教授");
    }

    #[test]
    fn missing_fields_are_empty_not_absent() {
        let doc = Html::parse_document("<html><body><p>x</p></body></html>");
        let fields = compile(profile_specs(Mode::Enhanced));
        let results = extract_fields(doc.root_element(), &fields).unwrap();
        let r = assemble_researcher("x", "u", &results, &NoopRecognizer);
        assert!(r.keywords.is_empty() && r.affiliations.is_empty() && r.education.is_empty());
        assert_eq!(r.name, "");
    }

    struct FixedOcr;
    impl Recognizer for FixedOcr {
        fn recognize(&self, image: &ImageRef) -> Option<String> {
            image.src.ends_with("ocr.png").then(|| "理化学研究所".to_string())
        }
    }

    #[test]
    fn image_affiliations_use_ocr_then_alt() {
        let html = r#"<div id="profile"><dl>
            <dt>所属</dt><dd><img src="/ocr.png" alt=""></dd>
            <dt></dt><dd><img src="/logo.png" alt="東北大学"></dd>
            <dt></dt><dd><img src="/blank.png"></dd>
        </dl></div>"#;
        let doc = Html::parse_document(html);
        let fields = compile(profile_specs(Mode::Basic));
        let results = extract_fields(doc.root_element(), &fields).unwrap();

        let r = assemble_researcher("x", "u", &results, &FixedOcr);
        assert_eq!(r.affiliations, vec!["理化学研究所", "東北大学"]);

        let r = assemble_researcher("x", "u", &results, &NoopRecognizer);
        assert_eq!(r.affiliations, vec!["東北大学"]);
    }

    #[test]
    fn projects_from_listing() {
        let html = std::fs::read_to_string("tests/fixtures/projects.html").unwrap();
        let doc = Html::parse_document(&html);
        let fields = compile(project_specs());
        let item = Selector::parse(PROJECT_ITEM).unwrap();
        let classifier = FundingClassifier::default();

        let projects: Vec<ProjectRecord> = doc
            .select(&item)
            .filter_map(|li| {
                let results = extract_fields(li, &fields).unwrap();
                assemble_project(li, &results, &classifier, true)
            })
            .collect();

        assert_eq!(projects.len(), 3);

        let p = &projects[0];
        assert_eq!(p.id, "31234567");
        assert_eq!(p.url, "https://researchmap.jp/kanematsu/research_projects/31234567");
        assert_eq!(p.funding, "日本学術振興会 科学研究費助成事業 基盤研究(C)");
        assert_eq!(p.period.start, "2019-04");
        assert_eq!(p.period.end, "2022-03");
        assert_eq!(p.researchers, "兼松 秀行, 平井 信充");
        assert_eq!(p.institution, "日本学術振興会");
        assert_eq!(p.category, "基盤研究(C)");
        assert_eq!(p.budget, "4,160千円");
        assert!(p.is_competitive);

        assert!(projects[1].is_competitive);
        assert_eq!(projects[1].period.start, "2018");

        let internal = &projects[2];
        assert_eq!(internal.funding, "社内研究費");
        assert!(!internal.is_competitive);
        assert!(internal.period.is_empty());
    }

    #[test]
    fn basic_projects_skip_details() {
        let html = std::fs::read_to_string("tests/fixtures/projects.html").unwrap();
        let doc = Html::parse_document(&html);
        let fields = compile(project_specs());
        let item = Selector::parse(PROJECT_ITEM).unwrap();
        let li = doc.select(&item).next().unwrap();
        let results = extract_fields(li, &fields).unwrap();
        let p = assemble_project(li, &results, &FundingClassifier::default(), false).unwrap();
        assert_eq!(p.institution, "");
        assert_eq!(p.budget, "");
        assert!(p.is_competitive);
    }
}
