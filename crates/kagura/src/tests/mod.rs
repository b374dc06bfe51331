//! Behavioural and bootstrap suites for the dispatch engine.
