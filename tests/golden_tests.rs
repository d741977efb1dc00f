//! Golden tests - fixture-based tests that lock expected behavior
//!
//! These tests use JSON fixtures to verify that critical functions produce
//! expected outputs. Any change in behavior will cause these tests to fail,
//! signaling a potential breaking change.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

fn load_fixture<T: for<'de> Deserialize<'de>>(name: &str) -> T {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    let content =
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e));
    serde_json::from_str(&content).unwrap_or_else(|e| panic!("Failed to parse {}: {}", path, e))
}

fn error_name(err: &recollect::RecollectError) -> &'static str {
    use recollect::RecollectError::*;
    match err {
        MalformedResponse(_) => "MalformedResponse",
        Transport(_) => "Transport",
        Serialization(_) => "Serialization",
        _ => "Other",
    }
}

// ============================================================================
// FACT EXTRACTION GOLDEN TESTS
// ============================================================================

mod fact_extraction_golden {
    use super::*;
    use recollect::intelligence::parse_facts;

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        response: String,
        expected: Expected,
    }

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum Expected {
        Ok { ok: Vec<String> },
        Err { err: String },
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        test_cases: Vec<TestCase>,
    }

    #[test]
    fn test_fact_extraction_golden() {
        let fixture: Fixture = load_fixture("fact_extraction.json");

        for case in fixture.test_cases {
            let result = parse_facts(&case.response);

            match case.expected {
                Expected::Ok { ok } => match result {
                    Ok(facts) => assert_eq!(facts, ok, "Case '{}': facts mismatch", case.name),
                    Err(e) => panic!("Case '{}': expected Ok({:?}), got Err({})", case.name, ok, e),
                },
                Expected::Err { err } => match result {
                    Ok(facts) => panic!(
                        "Case '{}': expected Err({}), got Ok({:?})",
                        case.name, err, facts
                    ),
                    Err(e) => assert_eq!(
                        error_name(&e),
                        err,
                        "Case '{}': error kind mismatch",
                        case.name
                    ),
                },
            }
        }
    }
}

// ============================================================================
// RECONCILIATION ANSWER GOLDEN TESTS
// ============================================================================

mod reconcile_golden {
    use super::*;
    use recollect::intelligence::parse_reconcile_answer;
    use recollect::{DecisionKind, FactId};

    #[derive(Debug, Deserialize)]
    struct Decision {
        kind: String,
        index: Option<usize>,
    }

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        response: String,
        expected: Expected,
    }

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum Expected {
        Ok { ok: Decision },
        Err { err: String },
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        shortlist_size: usize,
        test_cases: Vec<TestCase>,
    }

    #[test]
    fn test_reconcile_answer_golden() {
        let fixture: Fixture = load_fixture("reconcile_answers.json");
        let shortlist: Vec<FactId> = (0..fixture.shortlist_size).map(|_| FactId::new_v4()).collect();

        for case in fixture.test_cases {
            let result = parse_reconcile_answer(&case.response, &shortlist);

            match case.expected {
                Expected::Ok { ok } => {
                    let (kind, id) = result.unwrap_or_else(|e| {
                        panic!("Case '{}': expected Ok, got Err({})", case.name, e)
                    });
                    let expected_kind: DecisionKind = ok.kind.parse().unwrap();
                    assert_eq!(kind, expected_kind, "Case '{}': kind mismatch", case.name);
                    assert_eq!(
                        id,
                        ok.index.map(|i| shortlist[i]),
                        "Case '{}': target mismatch",
                        case.name
                    );
                }
                Expected::Err { err } => {
                    let e = result.err().unwrap_or_else(|| {
                        panic!("Case '{}': expected Err({})", case.name, err)
                    });
                    assert_eq!(error_name(&e), err, "Case '{}': error kind mismatch", case.name);
                }
            }
        }
    }
}

// ============================================================================
// CONTENT HASH GOLDEN TESTS
// ============================================================================

mod content_hash_golden {
    use super::*;
    use recollect::storage::queries::compute_content_hash;

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        a: String,
        b: String,
        same: bool,
    }

    #[derive(Debug, Deserialize)]
    struct Fixture {
        test_cases: Vec<TestCase>,
    }

    #[test]
    fn test_content_hash_golden() {
        let fixture: Fixture = load_fixture("content_hash.json");

        for case in fixture.test_cases {
            let same = compute_content_hash(&case.a) == compute_content_hash(&case.b);
            assert_eq!(
                same, case.same,
                "Case '{}': {:?} vs {:?}",
                case.name, case.a, case.b
            );
        }
    }
}
