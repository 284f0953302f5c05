//! Golden tests - fixture-based tests that lock expected behavior
//!
//! These tests use JSON fixtures to verify that critical functions produce
//! expected outputs. Any change in behavior will cause these tests to fail,
//! signaling a potential breaking change (document ids in particular are
//! persisted, so a changed id orphans every stored document).
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

fn read_fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e))
}

#[derive(Debug, Deserialize)]
struct Fixture<T> {
    test_cases: Vec<T>,
}

// ============================================================================
// DOCUMENT ID GOLDEN TESTS
// ============================================================================

mod document_id_golden {
    use super::*;
    use brainprep::types::document_id;

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        entity_type: String,
        source_key: String,
        project_id: String,
        expected: String,
    }

    #[test]
    fn test_document_ids_golden() {
        let fixture: Fixture<TestCase> = serde_json::from_str(&read_fixture("document_ids.json"))
            .expect("Failed to parse fixture JSON");

        for case in fixture.test_cases {
            assert_eq!(
                document_id(&case.entity_type, &case.source_key, &case.project_id),
                case.expected,
                "Case '{}': document id changed",
                case.name
            );
        }
    }
}

// ============================================================================
// TRUNCATION GOLDEN TESTS
// ============================================================================

mod truncation_golden {
    use super::*;
    use brainprep::intelligence::metadata::truncate_text;

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        input: String,
        max_chars: usize,
        expected: String,
    }

    #[test]
    fn test_truncation_golden() {
        let fixture: Fixture<TestCase> = serde_json::from_str(&read_fixture("truncation.json"))
            .expect("Failed to parse fixture JSON");

        for case in fixture.test_cases {
            let result = truncate_text(&case.input, case.max_chars);
            assert_eq!(result, case.expected, "Case '{}'", case.name);
            assert!(
                result.chars().count() <= case.max_chars,
                "Case '{}': result exceeds limit",
                case.name
            );
        }
    }
}

// ============================================================================
// VALIDATION GOLDEN TESTS
// ============================================================================

mod validation_golden {
    use super::*;
    use std::sync::Arc;

    use brainprep::config::ConfigRegistry;
    use brainprep::intelligence::Validator;
    use brainprep::types::EnrichedDocument;

    #[derive(Debug, Deserialize)]
    struct Expected {
        valid: bool,
        errors: Vec<String>,
        warnings: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    struct TestCase {
        name: String,
        document: EnrichedDocument,
        expected: Expected,
    }

    #[test]
    fn test_validation_golden() {
        let fixture: Fixture<TestCase> =
            serde_json::from_str(&read_fixture("validation_cases.json"))
                .expect("Failed to parse fixture JSON");
        let validator = Validator::new(Arc::new(ConfigRegistry::with_defaults()));

        for case in fixture.test_cases {
            let result = validator.validate(&case.document);
            let errors: Vec<&str> = result.errors.iter().map(|i| i.field.as_str()).collect();
            let warnings: Vec<&str> = result.warnings.iter().map(|i| i.field.as_str()).collect();

            assert_eq!(result.valid, case.expected.valid, "Case '{}': validity", case.name);
            assert_eq!(errors, case.expected.errors, "Case '{}': errors", case.name);
            assert_eq!(warnings, case.expected.warnings, "Case '{}': warnings", case.name);
            assert_eq!(
                validator.ensure_valid(&case.document).is_ok(),
                case.expected.valid,
                "Case '{}': ensure_valid",
                case.name
            );
        }
    }
}
