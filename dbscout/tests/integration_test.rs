use anyhow::Result;
use dbscout::{EngineConfig, FileFormat, Match, SearchEngine, SearchError, SearchOptions};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn engine(root: &Path) -> SearchEngine {
    engine_with(EngineConfig {
        root_path: root.to_path_buf(),
        ..Default::default()
    })
}

fn engine_with(config: EngineConfig) -> SearchEngine {
    SearchEngine::new(config).expect("valid config")
}

/// The three-file layout used throughout the docs
fn create_scenario(root: &Path) -> Result<()> {
    fs::write(root.join("a.txt"), "phone: 19000000000\n")?;
    fs::write(root.join("b.csv"), "id,name\n556343434,John\n")?;
    fs::write(
        root.join("c.sql"),
        "INSERT INTO u VALUES (1,'example@mail.eg');\n",
    )?;
    Ok(())
}

fn create_test_files(root: &Path, file_count: usize, lines_per_file: usize) -> Result<()> {
    for i in 0..file_count {
        let mut file = File::create(root.join(format!("log_{:02}.txt", i)))?;
        for j in 0..lines_per_file {
            writeln!(file, "Line {} in file {}: customer John Doe", j, i)?;
            writeln!(file, "Another line {} in file {}: nothing special", j, i)?;
        }
    }
    Ok(())
}

fn file_name(m: &Match) -> String {
    m.path.file_name().unwrap().to_string_lossy().into_owned()
}

#[test]
fn test_end_to_end_scenario() -> Result<()> {
    let dir = tempdir()?;
    create_scenario(dir.path())?;
    let engine = engine(dir.path());

    let output = engine.search_default("john")?;
    assert_eq!(output.len(), 1);
    let m = &output.matches[0];
    assert_eq!(file_name(m), "b.csv");
    assert_eq!(m.line_number, 2);
    assert_eq!(m.format, FileFormat::Delimited);
    assert_eq!(m.highlighted(), "John");
    assert_eq!(m.matched_field.as_deref(), Some("name"));

    let output = engine.search_default("19000000000")?;
    assert_eq!(output.len(), 1);
    assert_eq!(file_name(&output.matches[0]), "a.txt");
    assert_eq!(output.matches[0].matched_text, "phone: 19000000000");
    assert_eq!(output.matches[0].highlight(), 7..18);

    let output = engine.search_default("mail.eg")?;
    assert_eq!(output.len(), 1);
    assert_eq!(file_name(&output.matches[0]), "c.sql");
    assert_eq!(output.matches[0].matched_text, "(1,'example@mail.eg')");
    assert_eq!(output.summary.files_scanned, 3);
    assert!(!output.summary.truncated);
    Ok(())
}

#[test]
fn test_deterministic_results() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(dir.path(), 12, 50)?;

    let first = engine(dir.path()).search_default("john")?;
    let second = engine(dir.path()).search_default("john")?;
    assert_eq!(first.len(), 600);
    assert_eq!(first.matches.to_vec(), second.matches.to_vec());
    Ok(())
}

#[test]
fn test_repeated_search_does_not_rescan() -> Result<()> {
    let dir = tempdir()?;
    create_scenario(dir.path())?;
    let engine = engine(dir.path());

    let first = engine.search_default("john")?;
    let scanned = engine.metrics().get_stats().files_scanned();
    assert_eq!(scanned, 3);

    let second = engine.search_default("john")?;
    assert_eq!(engine.metrics().get_stats().files_scanned(), scanned);
    assert_eq!(second.summary.files_scanned, 0);
    assert!(second.summary.cache_hit);
    assert_eq!(first.matches, second.matches);
    assert_eq!(engine.metrics().get_stats().cache_hits, 1);
    Ok(())
}

#[test]
fn test_casing_invariance() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(dir.path(), 3, 10)?;

    let results: Vec<Vec<Match>> = ["John", "john", "JOHN", " jOhN "]
        .iter()
        .map(|term| {
            engine(dir.path())
                .search_default(term)
                .map(|o| o.matches.to_vec())
        })
        .collect::<Result<_, _>>()?;
    assert_eq!(results[0].len(), 30);
    assert!(results.iter().all(|r| *r == results[0]));

    // All casings share one cache entry
    let engine = engine(dir.path());
    engine.search_default("John")?;
    assert!(engine.search_default("JOHN")?.summary.cache_hit);
    assert_eq!(engine.cached_queries(), 1);
    Ok(())
}

#[test]
fn test_result_cap() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(dir.path(), 5, 20)?;
    let engine = engine(dir.path());

    let all = engine.search_default("john")?;
    assert_eq!(all.len(), 100);
    assert!(!all.summary.truncated);

    for k in [1, 7, 20, 21, 99] {
        let options = SearchOptions::new(dir.path()).max_results(k);
        let capped = engine.search("john", &options)?;
        assert_eq!(capped.len(), k);
        assert!(capped.summary.truncated);
        assert_eq!(capped.matches[..], all.matches[..k]);
    }

    let options = SearchOptions::new(dir.path()).max_results(500);
    let under = engine.search("john", &options)?;
    assert_eq!(under.len(), 100);
    assert!(!under.summary.truncated);
    Ok(())
}

#[test]
fn test_worker_count_does_not_change_results() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(dir.path(), 16, 25)?;

    let single = engine(dir.path())
        .search("doe", &SearchOptions::new(dir.path()).parallel_workers(1).max_results(60))?;
    for workers in [2, 4, 8] {
        let options = SearchOptions::new(dir.path())
            .parallel_workers(workers)
            .max_results(60);
        let parallel = engine(dir.path()).search("doe", &options)?;
        assert_eq!(parallel.matches, single.matches);
        assert_eq!(parallel.summary.truncated, single.summary.truncated);
    }
    Ok(())
}

#[test]
fn test_mmap_and_buffered_agree() -> Result<()> {
    let dir = tempdir()?;
    create_scenario(dir.path())?;
    fs::write(
        dir.path().join("crlf.txt"),
        b"first John\r\nbad \xff byte John\r\nlast\r\n",
    )?;

    let buffered = engine_with(EngineConfig {
        root_path: dir.path().to_path_buf(),
        mmap_threshold: u64::MAX,
        ..Default::default()
    });
    let mapped = engine_with(EngineConfig {
        root_path: dir.path().to_path_buf(),
        mmap_threshold: 0,
        ..Default::default()
    });

    let a = buffered.search_default("john")?;
    let b = mapped.search_default("john")?;
    assert_eq!(a.matches, b.matches);
    assert_eq!(a.len(), 3);
    assert_eq!(a.matches[2].matched_text, "bad \u{fffd} byte John");

    assert_eq!(buffered.metrics().get_stats().mmap_files, 0);
    assert_eq!(mapped.metrics().get_stats().buffered_files, 0);
    Ok(())
}

#[test]
fn test_quoted_delimited_field() -> Result<()> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("people.csv"),
        "id,address,name\n1,\"12 Main St, Springfield\",Homer\n2,Elm St,Marge\n",
    )?;

    let output = engine(dir.path()).search_default("main st, spring")?;
    assert_eq!(output.len(), 1);
    assert_eq!(output.matches[0].line_number, 2);
    assert_eq!(output.matches[0].matched_field.as_deref(), Some("address"));
    Ok(())
}

#[test]
fn test_sql_multi_tuple_statement() -> Result<()> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("dump.sql"),
        "CREATE TABLE t (id int, v text);\nINSERT INTO t VALUES (1,'a'),(2,'b');\n",
    )?;

    let output = engine(dir.path()).search_default("'b'")?;
    assert_eq!(output.len(), 1);
    assert_eq!(output.matches[0].line_number, 2);
    assert_eq!(output.matches[0].matched_text, "(2,'b')");
    Ok(())
}

#[test]
fn test_malformed_csv_row_keeps_later_matches() -> Result<()> {
    let dir = tempdir()?;
    let mut csv = File::create(dir.path().join("b.csv"))?;
    writeln!(csv, "id,name")?;
    writeln!(csv, "1,\"oops")?;
    for i in 2..100 {
        writeln!(csv, "{},needle{}", i, i)?;
    }
    drop(csv);

    let output = engine(dir.path()).search_default("needle")?;
    assert_eq!(output.len(), 98);
    assert_eq!(output.summary.records_skipped, 1);
    assert_eq!(output.matches[0].line_number, 3);
    assert_eq!(output.matches[0].matched_field.as_deref(), Some("name"));
    assert!(output.summary.skipped.is_empty());
    Ok(())
}

#[test]
fn test_malformed_sql_statement_keeps_later_matches() -> Result<()> {
    let dir = tempdir()?;
    let mut sql = File::create(dir.path().join("c.sql"))?;
    writeln!(sql, "INSERT INTO t VALUES (1,'it's');")?;
    for i in 2..100 {
        writeln!(sql, "INSERT INTO t VALUES ({},'needle');", i)?;
    }
    drop(sql);

    let output = engine(dir.path()).search_default("needle")?;
    assert_eq!(output.len(), 98);
    assert_eq!(output.summary.records_skipped, 1);
    assert_eq!(output.matches[0].line_number, 2);
    assert_eq!(output.matches[97].line_number, 99);
    Ok(())
}

#[test]
fn test_empty_index_and_empty_query() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());

    let output = engine.search_default("john")?;
    assert!(output.is_empty());
    assert!(output.summary.empty_index);

    let missing = SearchOptions::new(dir.path().join("nope"));
    assert!(engine.search("john", &missing)?.summary.empty_index);

    assert!(matches!(engine.search_default(""), Err(SearchError::EmptyQuery)));
    Ok(())
}

#[test]
fn test_new_file_invalidates_cache_key() -> Result<()> {
    let dir = tempdir()?;
    create_scenario(dir.path())?;
    let engine = engine(dir.path());

    assert_eq!(engine.search_default("john")?.len(), 1);
    fs::write(dir.path().join("d.txt"), "john again\n")?;

    let output = engine.search_default("john")?;
    assert!(!output.summary.cache_hit);
    assert_eq!(output.len(), 2);
    assert_eq!(engine.cached_queries(), 2);
    Ok(())
}

#[test]
fn test_extensions_and_ignore_patterns() -> Result<()> {
    let dir = tempdir()?;
    create_scenario(dir.path())?;
    fs::create_dir(dir.path().join("archive"))?;
    fs::write(dir.path().join("archive/old.txt"), "John\n")?;
    fs::write(dir.path().join("notes.md"), "John\n")?;

    let engine = engine_with(EngineConfig {
        root_path: dir.path().to_path_buf(),
        ignore_patterns: vec!["archive/*".to_string()],
        ..Default::default()
    });
    assert_eq!(engine.search_default("john")?.len(), 1);

    let options = SearchOptions::new(dir.path()).extensions(["md"]);
    let output = engine.search("john", &options)?;
    assert_eq!(output.len(), 1);
    assert_eq!(file_name(&output.matches[0]), "notes.md");
    assert_eq!(output.matches[0].format, FileFormat::LineText);

    let (files, size) = engine.file_stats(&SearchOptions::new(dir.path()))?;
    assert_eq!(files, 3);
    assert!(size > 0);
    Ok(())
}

#[test]
fn test_concurrent_searches_share_one_scan() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(dir.path(), 8, 200)?;
    let engine = Arc::new(engine(dir.path()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.search_default("john").map(|o| o.matches))
        })
        .collect();

    let results = handles
        .into_iter()
        .map(|h| h.join().expect("search thread panicked"))
        .collect::<Result<Vec<_>, _>>()?;
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    assert_eq!(engine.metrics().get_stats().files_scanned(), 8);
    Ok(())
}
