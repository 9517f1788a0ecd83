use proptest::prelude::*;
use webhook_relay::{validate, InvalidUrlReason};

fn reason(url: &str) -> InvalidUrlReason {
    validate(url).unwrap_err().reason
}

#[test]
fn test_accepts_well_formed_destinations() {
    let accepted = [
        "http://localhost:8000",
        "https://google.com",
        "https://example.com/hook",
        "http://127.0.0.1:8080/hook?x=1",
        "HTTPS://Example.COM/Path",
        "ftp://files.example.org/",
        "ftps://files.example.org/pub",
        "https://example.com.",
        "https://api.eu-west.example.co.uk/v1/hooks?id=7&token=abc",
        "https://example.com?query=only",
        "http://LOCALHOST",
    ];

    for url in accepted {
        let valid = validate(url).unwrap_or_else(|err| panic!("{url} rejected: {err}"));
        assert!(!valid.as_str().is_empty());
    }
}

#[test]
fn test_rejects_missing_or_broken_scheme() {
    assert_eq!(reason(""), InvalidUrlReason::Empty);
    assert_eq!(reason("not-a-url"), InvalidUrlReason::MissingScheme);
    assert_eq!(reason("https:sfsdfdsff"), InvalidUrlReason::MissingScheme);
    assert_eq!(reason("http:google.com"), InvalidUrlReason::MissingScheme);
    assert_eq!(reason("://example.com"), InvalidUrlReason::MissingScheme);
    assert_eq!(reason("gopher://example.com"), InvalidUrlReason::UnsupportedScheme);
    assert_eq!(reason("ws://example.com"), InvalidUrlReason::UnsupportedScheme);
}

#[test]
fn test_rejects_malformed_hosts() {
    assert_eq!(reason("https://sfsdfdsff"), InvalidUrlReason::InvalidHost);
    assert_eq!(reason("https://-bad.com"), InvalidUrlReason::InvalidHost);
    assert_eq!(reason("https://bad-.com"), InvalidUrlReason::InvalidHost);
    assert_eq!(reason("https://example.c"), InvalidUrlReason::InvalidHost);
    assert_eq!(reason("https://exa mple.com"), InvalidUrlReason::InvalidHost);
    assert_eq!(reason("https://example..com"), InvalidUrlReason::InvalidHost);
    assert_eq!(reason("https://1.2.3/hook"), InvalidUrlReason::InvalidHost);
    assert_eq!(reason("https:///hook"), InvalidUrlReason::InvalidHost);
}

#[test]
fn test_rejects_malformed_port_and_path() {
    assert_eq!(reason("https://example.com:"), InvalidUrlReason::InvalidPort);
    assert_eq!(reason("https://example.com:abc"), InvalidUrlReason::InvalidPort);
    assert_eq!(reason("https://example.com/pa th"), InvalidUrlReason::InvalidPath);
    assert_eq!(reason("https://example.com:80x"), InvalidUrlReason::InvalidPath);
}

#[test]
fn test_rejects_what_the_parser_refuses() {
    assert_eq!(reason("https://999.999.999.999/"), InvalidUrlReason::Unparseable);
    assert_eq!(reason("https://example.com:99999/"), InvalidUrlReason::Unparseable);
}

#[test]
fn test_error_names_the_input() {
    let err = validate("not-a-url").unwrap_err();
    assert_eq!(err.url, "not-a-url");
    assert!(err.to_string().contains("not-a-url"));
}

proptest! {
    #[test]
    fn prop_validation_is_deterministic(input in ".{0,64}") {
        prop_assert_eq!(validate(&input), validate(&input));
    }

    #[test]
    fn prop_generated_domains_are_accepted(
        scheme in "(http|https|ftp|ftps)",
        label in "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?",
        tld in "(com|org|io|dev)",
        path in "(/[a-zA-Z0-9_.~-]{1,12}){0,3}",
    ) {
        let url = format!("{scheme}://{label}.{tld}{path}");
        prop_assert!(validate(&url).is_ok(), "{} rejected", url);
    }

    #[test]
    fn prop_inputs_without_separator_are_rejected(input in "[^:]{0,40}") {
        prop_assert!(validate(&input).is_err());
    }
}
