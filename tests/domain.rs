use assert_matches::assert_matches;
use regex::Regex;
use serde_json::{Value, json};

use catalog_harvester::domain::{Dataset, FormatFilter, ObjectKey, Resource, normalize_name};
use catalog_harvester::error::HarvestError;
use catalog_harvester::sanitize::{is_falsy, sanitize};

#[test]
fn normalized_names_are_path_safe() {
    let allowed = Regex::new(r"^[a-z0-9._-]*$").unwrap();
    let titles = [
        "Road Traffic Counts 2019",
        "  Leading and trailing  ",
        "Ünïcödé — Title / with: punctuation!",
        "tabs\tand\nnewlines",
        "a -- b --- c ---------- d",
        "UPPER_case.csv",
        "数据集",
        "",
    ];
    for title in titles {
        let name = normalize_name(title);
        assert!(allowed.is_match(&name), "{title:?} -> {name:?}");
        assert!(!name.contains("--"), "{title:?} -> {name:?}");
    }
    assert_eq!(normalize_name("Road Traffic Counts 2019"), "road-traffic-counts-2019");
    assert_eq!(normalize_name("UPPER_case.csv"), "upper_case.csv");
}

#[test]
fn format_filter_accepts_declared_format_only() {
    let filter = FormatFilter::ckan_default();
    let cases = [
        (Some("CSV"), true),
        (Some("csv"), true),
        (Some("XLSX"), true),
        (Some("xls"), true),
        (Some("json"), false),
        (Some("PDF"), false),
        (Some(""), false),
        (None, false),
    ];
    for (format, expected) in cases {
        let resource = Resource::new("https://example.org/data.csv", format);
        assert_eq!(filter.accepts(&resource), expected, "{format:?}");
    }
    assert_eq!(filter.to_string(), "csv,xls,xlsx");
}

#[test]
fn file_name_filter_uses_extension() {
    let filter = FormatFilter::harvest_default();
    assert!(filter.accepts_file_name("trips.CSV"));
    assert!(filter.accepts_file_name("raw.notes.txt"));
    assert!(!filter.accepts_file_name("readme.pdf"));
    assert!(!filter.accepts_file_name("Makefile"));
}

#[test]
fn dataset_without_title_or_name_is_rejected() {
    assert_matches!(
        Dataset::from_record(json!({"resources": []})),
        Err(HarvestError::InvalidRecord(_))
    );
    assert_matches!(
        Dataset::from_record(json!("just a string")),
        Err(HarvestError::InvalidRecord(_))
    );
}

#[test]
fn accepted_resources_follow_filter() {
    let dataset = Dataset::from_record(json!({
        "name": "budget",
        "title": "City Budget",
        "resources": [
            {"url": "https://x.org/budget.xlsx", "format": "XLSX"},
            {"url": "https://x.org/budget.pdf", "format": "PDF"},
            {"url": "https://x.org/budget.csv"}
        ]
    }))
    .unwrap();
    let accepted = dataset.accepted_resources(&FormatFilter::ckan_default());
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].file_name().as_deref(), Some("budget.xlsx"));
    assert_eq!(dataset.identifier().unwrap(), "city-budget");
}

#[test]
fn object_keys_flatten_nested_paths() {
    let key: ObjectKey = "derived/bob/rain/2020/daily/readings.csv".parse().unwrap();
    assert_eq!(key.owner(), "bob");
    assert_eq!(key.dataset(), "rain");
    assert_eq!(key.dataset_id(), "bob.rain");
    assert_eq!(key.file_name(), "2020.daily.readings.csv");
    assert_eq!(key.to_string(), "derived/bob/rain/2020/daily/readings.csv");

    assert_matches!(
        "derived/bob//x.csv".parse::<ObjectKey>(),
        Err(HarvestError::InvalidObjectKey(_))
    );
}

fn has_falsy_descendant(value: &Value) -> bool {
    match value {
        Value::Array(items) => items
            .iter()
            .any(|item| is_falsy(item) || has_falsy_descendant(item)),
        Value::Object(map) => map
            .values()
            .any(|item| is_falsy(item) || has_falsy_descendant(item)),
        _ => false,
    }
}

#[test]
fn sanitize_reaches_fixpoint() {
    let inputs = [
        json!({"a": {"b": {"c": {"d": [null, [], {}]}}}, "keep": "x"}),
        json!([[[[]]], 0, 1, "", "y", {"z": false}]),
        json!({"num": 0.0, "neg": -1, "flag": true, "text": " "}),
        json!({"nested": [{"only": null}], "list": [{"k": [0]}]}),
    ];
    for input in inputs {
        let once = sanitize(input.clone()).unwrap();
        assert!(!has_falsy_descendant(&once), "{input} -> {once}");
        let twice = sanitize(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
    assert_eq!(
        sanitize(json!({"a": {"b": {"c": {"d": [null, [], {}]}}}, "keep": "x"})).unwrap(),
        json!({"keep": "x"})
    );
    assert_eq!(sanitize(json!({"only": {}})).unwrap(), json!({}));
}

#[test]
fn sanitize_preserves_key_order() {
    let output = sanitize(json!({"zeta": 1, "empty": "", "alpha": 2})).unwrap();
    let keys = output
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["zeta", "alpha"]);
}
