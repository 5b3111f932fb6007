//! Cross-component end-to-end scenario tests, kept as a repo-level test
//! module alongside the per-file inline `#[test]`s.

mod scenarios;
