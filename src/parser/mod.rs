pub mod assemble;
pub mod field;
pub mod locator;
pub mod specs;
pub mod text;

use scraper::Html;
use tracing::debug;

use crate::classify::FundingClassifier;
use crate::error::ParseError;
use crate::model::ResearcherRecord;
use crate::ocr::Recognizer;
use assemble::{assemble_project, assemble_researcher, extract_fields};
use specs::Catalog;

/// Raw HTML fetched for one researcher.
#[derive(Debug, Clone)]
pub struct PageSet {
    pub identifier: String,
    pub url: String,
    pub profile: String,
    pub projects: Option<String>,
}

/// Parse a researcher's pages with every mode in the catalog and merge the
/// per-mode records into one.
pub fn process_researcher(
    pages: &PageSet,
    catalog: &Catalog,
    classifier: &FundingClassifier,
    ocr: &dyn Recognizer,
) -> Result<ResearcherRecord, ParseError> {
    if pages.profile.trim().is_empty() {
        return Err(ParseError::Empty {
            url: pages.url.clone(),
        });
    }

    let profile = Html::parse_document(&pages.profile);
    let listing = pages.projects.as_deref().map(Html::parse_document);

    let mut merged = ResearcherRecord::new(&pages.identifier, &pages.url);
    for mode in &catalog.modes {
        let results = extract_fields(profile.root_element(), &mode.profile)?;
        let mut record = assemble_researcher(&pages.identifier, &pages.url, &results, ocr);

        if let Some(listing) = &listing {
            for item in listing.select(&catalog.project_item) {
                let results = extract_fields(item, &catalog.project)?;
                if let Some(project) = assemble_project(item, &results, classifier, mode.project_details) {
                    record.add_project(project, classifier);
                }
            }
        }

        debug!(
            "{} [{}]: {} keywords, {} areas, {} projects",
            pages.identifier,
            mode.mode.as_str(),
            record.keywords.len(),
            record.areas.len(),
            record.projects.len()
        );
        merged.merge(record, classifier);
    }

    if merged.name.is_empty()
        && merged.affiliations.is_empty()
        && merged.keywords.is_empty()
        && merged.areas.is_empty()
    {
        return Err(ParseError::NotAProfile {
            url: pages.url.clone(),
        });
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::NoopRecognizer;
    use specs::Mode;

    fn pages(profile: &str, projects: Option<&str>) -> PageSet {
        PageSet {
            identifier: "kanematsu".into(),
            url: "https://researchmap.jp/kanematsu".into(),
            profile: std::fs::read_to_string(profile).unwrap(),
            projects: projects.map(|p| std::fs::read_to_string(p).unwrap()),
        }
    }

    #[test]
    fn both_modes_merge_into_one_record() {
        let catalog = Catalog::compile(&[Mode::Basic, Mode::Enhanced], "https://researchmap.jp").unwrap();
        let record = process_researcher(
            &pages("tests/fixtures/profile_primary.html", Some("tests/fixtures/projects.html")),
            &catalog,
            &FundingClassifier::default(),
            &NoopRecognizer,
        )
        .unwrap();

        assert_eq!(record.identifier, "kanematsu");
        assert_eq!(record.keywords, vec!["3Dプリンティング", "表面汚れ"]);
        assert_eq!(record.orcid_id, "0000-0002-1234-5678");
        assert_eq!(record.projects.len(), 3);
        assert_eq!(record.projects[0].institution, "日本学術振興会");
        assert_eq!(record.competitive_projects(), 2);
    }

    #[test]
    fn missing_listing_means_no_projects() {
        let catalog = Catalog::compile(&[Mode::Basic], "https://researchmap.jp").unwrap();
        let record = process_researcher(
            &pages("tests/fixtures/profile_panel.html", None),
            &catalog,
            &FundingClassifier::default(),
            &NoopRecognizer,
        )
        .unwrap();
        assert!(record.projects.is_empty());
        assert_eq!(record.keywords, vec!["バイオフィルム", "腐食"]);
    }

    #[test]
    fn unreadable_pages_are_parse_errors() {
        let catalog = Catalog::compile(&[Mode::Basic], "https://researchmap.jp").unwrap();
        let classifier = FundingClassifier::default();
        let mut set = PageSet {
            identifier: "x".into(),
            url: "https://researchmap.jp/x".into(),
            profile: "  \n".into(),
            projects: None,
        };
        let err = process_researcher(&set, &catalog, &classifier, &NoopRecognizer).unwrap_err();
        assert!(matches!(err, ParseError::Empty { .. }));

        set.profile = "<html><body><p>404 Not Found</p></body></html>".into();
        let err = process_researcher(&set, &catalog, &classifier, &NoopRecognizer).unwrap_err();
        assert!(matches!(err, ParseError::NotAProfile { .. }));
    }
}
