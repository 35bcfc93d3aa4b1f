use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::crawler::AggregateResult;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id                   INTEGER PRIMARY KEY,
            source               TEXT NOT NULL,
            modes                TEXT NOT NULL,
            scraped_at           TEXT NOT NULL,
            total_identifiers    INTEGER NOT NULL,
            processed            INTEGER NOT NULL,
            skipped              INTEGER NOT NULL,
            failed               INTEGER NOT NULL,
            total_projects       INTEGER NOT NULL,
            competitive_projects INTEGER NOT NULL,
            created_at           TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Latest run wins per researcher
        CREATE TABLE IF NOT EXISTS researchers (
            identifier        TEXT PRIMARY KEY,
            run_id            INTEGER NOT NULL REFERENCES runs(id),
            url               TEXT NOT NULL,
            name              TEXT NOT NULL,
            english_name      TEXT NOT NULL,
            kana_name         TEXT NOT NULL,
            position          TEXT NOT NULL,
            affiliations      TEXT NOT NULL,
            orcid_id          TEXT NOT NULL,
            jglobal_id        TEXT NOT NULL,
            member_id         TEXT NOT NULL,
            keywords          TEXT NOT NULL,
            areas             TEXT NOT NULL,
            education         TEXT NOT NULL,
            project_count     INTEGER NOT NULL,
            competitive_count INTEGER NOT NULL,
            updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS projects (
            id             INTEGER PRIMARY KEY,
            researcher     TEXT NOT NULL REFERENCES researchers(identifier),
            project_id     TEXT NOT NULL,
            title          TEXT NOT NULL,
            url            TEXT NOT NULL,
            funding        TEXT NOT NULL,
            period_text    TEXT NOT NULL,
            period_start   TEXT NOT NULL,
            period_end     TEXT NOT NULL,
            researchers    TEXT NOT NULL,
            institution    TEXT NOT NULL,
            program        TEXT NOT NULL,
            category       TEXT NOT NULL,
            budget         TEXT NOT NULL,
            is_competitive BOOLEAN NOT NULL,
            UNIQUE(researcher, project_id)
        );
        CREATE INDEX IF NOT EXISTS idx_projects_researcher ON projects(researcher);
        CREATE INDEX IF NOT EXISTS idx_projects_competitive ON projects(is_competitive);

        CREATE TABLE IF NOT EXISTS failures (
            id         INTEGER PRIMARY KEY,
            run_id     INTEGER NOT NULL REFERENCES runs(id),
            identifier TEXT NOT NULL,
            stage      TEXT NOT NULL,
            reason     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_failures_run ON failures(run_id);
        ",
    )?;
    Ok(())
}

fn json_list(items: &[String]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}

/// Store one run and its researchers, projects and failures. Returns the run id.
pub fn save_run(conn: &Connection, result: &AggregateResult) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    let modes: Vec<&str> = result.modes.iter().map(|m| m.as_str()).collect();
    tx.execute(
        "INSERT INTO runs (source, modes, scraped_at, total_identifiers, processed, skipped,
                           failed, total_projects, competitive_projects)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            result.source,
            modes.join(","),
            result.scraped_at,
            result.total_identifiers,
            result.processed,
            result.skipped,
            result.failures.len(),
            result.total_projects,
            result.total_competitive_projects,
        ],
    )?;
    let run_id = tx.last_insert_rowid();

    {
        let mut clear_stmt = tx.prepare("DELETE FROM projects WHERE researcher = ?1")?;
        let mut r_stmt = tx.prepare(
            "INSERT OR REPLACE INTO researchers
             (identifier, run_id, url, name, english_name, kana_name, position, affiliations,
              orcid_id, jglobal_id, member_id, keywords, areas, education,
              project_count, competitive_count)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
        )?;
        let mut p_stmt = tx.prepare(
            "INSERT OR REPLACE INTO projects
             (researcher, project_id, title, url, funding, period_text, period_start, period_end,
              researchers, institution, program, category, budget, is_competitive)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
        )?;

        for r in &result.researchers {
            clear_stmt.execute(rusqlite::params![r.identifier])?;
            r_stmt.execute(rusqlite::params![
                r.identifier,
                run_id,
                r.url,
                r.name,
                r.english_name,
                r.kana_name,
                r.position,
                json_list(&r.affiliations)?,
                r.orcid_id,
                r.jglobal_id,
                r.member_id,
                json_list(&r.keywords)?,
                json_list(&r.areas)?,
                json_list(&r.education)?,
                r.projects.len(),
                r.competitive_projects(),
            ])?;
            for p in &r.projects {
                p_stmt.execute(rusqlite::params![
                    r.identifier,
                    p.key(),
                    p.title,
                    p.url,
                    p.funding,
                    p.period.text,
                    p.period.start,
                    p.period.end,
                    p.researchers,
                    p.institution,
                    p.program,
                    p.category,
                    p.budget,
                    p.is_competitive,
                ])?;
            }
        }

        let mut f_stmt = tx.prepare(
            "INSERT INTO failures (run_id, identifier, stage, reason) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for f in &result.failures {
            f_stmt.execute(rusqlite::params![run_id, f.identifier, f.stage.as_str(), f.reason])?;
        }
    }

    tx.commit()?;
    Ok(run_id)
}

/// Open (or create) the database at `path` and store one run in it.
pub fn store_run(path: &Path, result: &AggregateResult) -> Result<i64> {
    let conn = connect(path)?;
    init_schema(&conn)?;
    save_run(&conn, result)
}

// ── Queries ──

pub struct Stats {
    pub runs: usize,
    pub researchers: usize,
    pub projects: usize,
    pub competitive: usize,
    pub failures: usize,
    pub last_run: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let last_run: Option<String> = conn
        .query_row("SELECT MAX(scraped_at) FROM runs", [], |r| r.get(0))?;
    Ok(Stats {
        runs: count("SELECT COUNT(*) FROM runs")?,
        researchers: count("SELECT COUNT(*) FROM researchers")?,
        projects: count("SELECT COUNT(*) FROM projects")?,
        competitive: count("SELECT COUNT(*) FROM projects WHERE is_competitive = 1")?,
        failures: count("SELECT COUNT(*) FROM failures")?,
        last_run,
    })
}

pub struct OverviewRow {
    pub identifier: String,
    pub name: String,
    pub affiliation: String,
    pub position: String,
    pub keywords: usize,
    pub projects: usize,
    pub competitive: usize,
}

pub fn fetch_overview(
    conn: &Connection,
    competitive_only: bool,
    keyword: Option<&str>,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if competitive_only {
        conditions.push("competitive_count > 0".to_string());
    }
    if let Some(k) = keyword {
        conditions.push(format!("keywords LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", k)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT identifier, name, COALESCE(json_extract(affiliations, '$[0]'), ''), position,
                json_array_length(keywords), project_count, competitive_count
         FROM researchers{}
         ORDER BY competitive_count DESC, identifier
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(OverviewRow {
                identifier: row.get(0)?,
                name: row.get(1)?,
                affiliation: row.get(2)?,
                position: row.get(3)?,
                keywords: row.get(4)?,
                projects: row.get(5)?,
                competitive: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{CrawlState, Failure};
    use crate::model::{ProjectRecord, ResearcherRecord};
    use crate::parser::specs::Mode;

    fn aggregate() -> AggregateResult {
        let project = |id: &str, competitive: bool| ProjectRecord {
            id: id.into(),
            title: format!("課題{}", id),
            is_competitive: competitive,
            ..Default::default()
        };
        let researchers = vec![
            ResearcherRecord {
                identifier: "kanematsu".into(),
                name: "兼松 秀行".into(),
                affiliations: vec!["鈴鹿工業高等専門学校".into()],
                keywords: vec!["3Dプリンティング".into(), "表面汚れ".into()],
                projects: vec![project("1", true), project("2", false)],
                ..Default::default()
            },
            ResearcherRecord {
                identifier: "yamada_t".into(),
                name: "山田 太郎".into(),
                projects: vec![project("3", false)],
                ..Default::default()
            },
        ];
        AggregateResult {
            total_identifiers: 3,
            processed: 2,
            skipped: 0,
            failures: vec![Failure {
                identifier: "gone".into(),
                stage: CrawlState::Fetching,
                reason: "HTTP 404".into(),
            }],
            total_projects: 3,
            total_competitive_projects: 1,
            modes: vec![Mode::Basic],
            source: "ids".into(),
            scraped_at: "2026-10-19T10:00:00".into(),
            researchers,
        }
    }

    #[test]
    fn save_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir.path().join("nested/rmap.sqlite")).unwrap();
        init_schema(&conn).unwrap();

        save_run(&conn, &aggregate()).unwrap();
        let s = get_stats(&conn).unwrap();
        assert_eq!((s.runs, s.researchers, s.projects, s.competitive, s.failures), (1, 2, 3, 1, 1));
        assert_eq!(s.last_run.as_deref(), Some("2026-10-19T10:00:00"));

        // Re-running replaces researchers and their projects
        save_run(&conn, &aggregate()).unwrap();
        let s = get_stats(&conn).unwrap();
        assert_eq!((s.runs, s.researchers, s.projects, s.failures), (2, 2, 3, 2));

        let stage: String = conn
            .query_row("SELECT stage FROM failures LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stage, "fetching");
    }

    #[test]
    fn store_run_reports_unusable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rmap.sqlite");
        assert_eq!(store_run(&path, &aggregate()).unwrap(), 1);
        assert_eq!(store_run(&path, &aggregate()).unwrap(), 2);

        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();
        assert!(store_run(&blocker.join("rmap.sqlite"), &aggregate()).is_err());
    }

    #[test]
    fn overview_filters() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir.path().join("rmap.sqlite")).unwrap();
        init_schema(&conn).unwrap();
        save_run(&conn, &aggregate()).unwrap();

        let all = fetch_overview(&conn, false, None, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].identifier, "kanematsu");
        assert_eq!(all[0].affiliation, "鈴鹿工業高等専門学校");
        assert_eq!(all[0].keywords, 2);
        assert_eq!(all[1].affiliation, "");

        let competitive = fetch_overview(&conn, true, None, 10).unwrap();
        assert_eq!(competitive.len(), 1);

        let by_keyword = fetch_overview(&conn, false, Some("表面"), 10).unwrap();
        assert_eq!(by_keyword.len(), 1);
        assert_eq!(by_keyword[0].name, "兼松 秀行");
    }
}
