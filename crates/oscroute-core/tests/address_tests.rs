//! Address parsing and pattern matching tests

use oscroute_core::{Address, Pattern, PatternError};
use std::time::{Duration, Instant};

#[test]
fn test_address_parse() {
    let addr = Address::parse("/tracking/trackers/3/position").unwrap();
    assert_eq!(addr.as_str(), "/tracking/trackers/3/position");
    let segments: Vec<_> = addr.segments().collect();
    assert_eq!(segments, vec!["tracking", "trackers", "3", "position"]);
}

#[test]
fn test_address_root() {
    let addr = Address::parse("/").unwrap();
    assert_eq!(addr.segments().collect::<Vec<_>>(), vec![""]);
}

#[test]
fn test_address_rejects_wildcards() {
    for bad in ["/a/?", "/a/[0-9]", "/{a,b}", "/a*"] {
        assert!(Address::parse(bad).is_err(), "{} should be rejected", bad);
    }
}

#[test]
fn test_star_matches_one_segment() {
    let pattern = Pattern::compile("/foo/*").unwrap();
    assert!(pattern.matches("/foo/bar"));
    assert!(!pattern.matches("/foo/bar/baz"));
}

#[test]
fn test_character_class_range() {
    let pattern = Pattern::compile("/foo/[0-9]").unwrap();
    assert!(pattern.matches("/foo/1"));
    assert!(!pattern.matches("/foo/10"));
}

#[test]
fn test_alternation_of_literals() {
    let pattern = Pattern::compile("/foo/{red,green,blue}").unwrap();
    assert!(pattern.matches("/foo/red"));
    assert!(pattern.matches("/foo/green"));
    assert!(!pattern.matches("/foo/purple"));
}

#[test]
fn test_negated_class() {
    let pattern = Pattern::compile("/foo/[!X]").unwrap();
    assert!(!pattern.matches("/foo/X"));
    assert!(pattern.matches("/foo/x"));
}

#[test]
fn test_multiple_wildcards_per_segment() {
    let pattern = Pattern::compile("/tracking/trackers/*_controller/{position,rotation}").unwrap();
    assert!(pattern.matches("/tracking/trackers/left_controller/position"));
    assert!(pattern.matches("/tracking/trackers/right_controller/rotation"));
    assert!(!pattern.matches("/tracking/trackers/head/position"));
    assert!(!pattern.matches("/tracking/trackers/left_controller/velocity"));
}

#[test]
fn test_wildcard_in_every_segment() {
    let pattern = Pattern::compile("/*/?/[a-c]*").unwrap();
    assert!(pattern.matches("/x/1/apple"));
    assert!(pattern.matches("/long-name/z/c"));
    assert!(!pattern.matches("/x/12/apple"));
    assert!(!pattern.matches("/x/1/dog"));
}

#[test]
fn test_segment_count_must_agree() {
    let pattern = Pattern::compile("/a/*/c").unwrap();
    assert!(pattern.matches("/a/b/c"));
    assert!(!pattern.matches("/a/c"));
    assert!(!pattern.matches("/a/b/b/c"));
}

#[test]
fn test_star_against_unicode() {
    let pattern = Pattern::compile("/name/*é").unwrap();
    assert!(pattern.matches("/name/café"));
    assert!(!pattern.matches("/name/cafe"));

    let one = Pattern::compile("/name/caf?").unwrap();
    assert!(one.matches("/name/café"));
}

#[test]
fn test_invalid_patterns_never_compile() {
    assert!(matches!(
        Pattern::compile("/a/[0-9"),
        Err(PatternError::UnclosedBracket(_))
    ));
    assert!(matches!(
        Pattern::compile("/a/{x,y"),
        Err(PatternError::UnclosedBrace(_))
    ));
    assert!(matches!(
        Pattern::compile("/a/b]"),
        Err(PatternError::Unexpected { ch: ']', .. })
    ));
}

#[test]
fn test_pattern_from_str() {
    let pattern: Pattern = "/mixer/ch[1-8]/fader".parse().unwrap();
    assert_eq!(pattern.to_string(), "/mixer/ch[1-8]/fader");
    assert!(pattern.matches("/mixer/ch4/fader"));
    assert!(!pattern.matches("/mixer/ch9/fader"));
}

#[test]
fn test_long_segment_matches_in_linear_time() {
    // Two stars against a long run that never ends in the final literal
    let pattern = Pattern::compile("/*a*b").unwrap();
    let address = format!("/{}", "a".repeat(60_000));

    let start = Instant::now();
    assert!(!pattern.matches(&address));
    assert!(pattern.matches(&format!("{}b", address)));
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "matching took {:?}",
        start.elapsed()
    );

    let classes = Pattern::compile("/*[a-c]*{x,y}*z").unwrap();
    let start = Instant::now();
    assert!(!classes.matches(&format!("/{}", "ax".repeat(30_000))));
    assert!(start.elapsed() < Duration::from_secs(2));
}
