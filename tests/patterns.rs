mod common;

use common::{FakeDoc, page};
use question_splitter::{
    config::Config,
    patterns::{PatternSet, find_matches},
};

fn default_set() -> PatternSet {
    PatternSet::from_config(&Config::default()).expect("default patterns compile")
}

#[test]
fn recognises_common_marker_styles() {
    let set = default_set();
    assert_eq!(set.match_text("1. Define entropy").map(|m| m.1), Some(1));
    assert_eq!(set.match_text("12) Prove it").map(|m| m.1), Some(12));
    assert_eq!(set.match_text("Q3: Explain").map(|m| m.1), Some(3));
    assert_eq!(set.match_text("Q.4 Explain").map(|m| m.1), Some(4));
    assert_eq!(set.match_text("question 5. Compute").map(|m| m.1), Some(5));
    assert_eq!(set.match_text("Problem 6").map(|m| m.1), Some(6));
    assert_eq!(set.match_text("[7] Sketch").map(|m| m.1), Some(7));
    assert_eq!(set.match_text("Part 8: Bonus").map(|m| m.1), Some(8));
    assert_eq!(set.match_text("  2. leading space").map(|m| m.1), Some(2));
}

#[test]
fn rejects_plain_text() {
    let set = default_set();
    assert!(set.match_text("Answer all questions").is_none());
    assert!(set.match_text("2024 Final Examination").is_none());
    assert!(set.match_text("").is_none());
}

#[test]
fn non_numeric_part_yields_zero() {
    let set = default_set();
    let (pattern, number) = set.match_text("Part A").unwrap();
    assert_eq!(number, 0);
    assert!(pattern.starts_with("^Part"));
}

#[test]
fn first_pattern_wins() {
    let set = default_set();
    let (pattern, number) = set.match_text("1. Part A").unwrap();
    assert_eq!(number, 1);
    assert_eq!(pattern, r"^(\d+)[\.\)]\s*");
}

#[test]
fn fullwidth_digits_normalize() {
    let set = default_set();
    assert_eq!(set.match_text("Ｑ２． Explain").map(|m| m.1), Some(2));

    let raw = PatternSet::new(&[r"^Q\.?\s*(\d+)"], true, false).unwrap();
    assert!(raw.match_text("Ｑ２． Explain").is_none());
}

#[test]
fn invalid_pattern_is_a_config_error() {
    let err = PatternSet::new(&["^(unclosed"], true, true).unwrap_err();
    assert!(format!("{err:#}").contains("compiling boundary pattern"));
}

#[test]
fn matches_sorted_by_position_not_number() {
    let doc = FakeDoc {
        pages: vec![
            page(800.0, &[(400.0, "3. later on page"), (100.0, "5. top of page")]),
            page(800.0, &[(50.0, "1. restarted numbering"), (300.0, "just text")]),
        ],
        ..Default::default()
    };
    let matches = find_matches(&doc, &default_set());
    let seen: Vec<(usize, f64, u32)> = matches
        .iter()
        .map(|m| (m.page, m.y_pos, m.question_number))
        .collect();
    assert_eq!(seen, vec![(0, 100.0, 5), (0, 400.0, 3), (1, 50.0, 1)]);
    assert_eq!(matches[0].page_height, 800.0);
    assert_eq!(matches[2].text, "1. restarted numbering");
}

#[test]
fn repeated_numbers_are_kept() {
    let doc = FakeDoc {
        pages: vec![page(800.0, &[(100.0, "1. a"), (300.0, "1. b")])],
        ..Default::default()
    };
    assert_eq!(find_matches(&doc, &default_set()).len(), 2);
}

#[test]
fn no_markers_is_empty_not_error() {
    let doc = FakeDoc {
        pages: vec![page(800.0, &[(100.0, "Instructions"), (200.0, "Good luck")])],
        ..Default::default()
    };
    assert!(find_matches(&doc, &default_set()).is_empty());
}
