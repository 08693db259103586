//! Synchronous matchers.
//!
//! ```ignore
//! expect(&stdout).to(equal("hello"));
//! expect(&ids).to(contain(id.clone()));
//! expect(&status.reason).not_to(be_empty());
//! ```
//!
//! A failed expectation fails the running spec through
//! [`fail`](crate::failure::fail), which short-circuits the spec body.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Display};

use regex::Regex;

use crate::failure::fail;

/// A predicate over an actual value, with a description for failure messages.
pub trait Matcher<T: ?Sized> {
    /// Returns whether `actual` satisfies the matcher.
    fn matches(&self, actual: &T) -> bool;

    /// Describes the expectation, e.g. `equal "hello"`.
    fn describe(&self) -> String;
}

/// An actual value awaiting a matcher.
#[derive(Debug)]
pub struct Expectation<T> {
    actual: T,
    context: Option<String>,
}

/// Starts an expectation on `actual`.
pub const fn expect<T: Debug>(actual: T) -> Expectation<T> {
    Expectation {
        actual,
        context: None,
    }
}

impl<T: Debug> Expectation<T> {
    /// Adds a description printed before the failure message.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Fails the spec unless `matcher` holds.
    #[track_caller]
    pub fn to<M: Matcher<T>>(self, matcher: M) {
        if !matcher.matches(&self.actual) {
            fail(self.message("to", &matcher));
        }
    }

    /// Fails the spec if `matcher` holds.
    #[track_caller]
    pub fn not_to<M: Matcher<T>>(self, matcher: M) {
        if matcher.matches(&self.actual) {
            fail(self.message("not to", &matcher));
        }
    }

    fn message<M: Matcher<T>>(&self, verb: &str, matcher: &M) -> String {
        let body = failure_message(&self.actual, verb, &matcher.describe());
        match &self.context {
            Some(context) => format!("{context}\n{body}"),
            None => body,
        }
    }
}

/// Formats the canonical "Expected ... to ..." failure message.
pub fn failure_message<T: Debug + ?Sized>(actual: &T, verb: &str, description: &str) -> String {
    format!("Expected\n    {actual:?}\n{verb} {description}")
}

/// Unwraps `result`, failing the spec with `context` and the error otherwise.
#[track_caller]
pub fn expect_ok<T, E: Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => fail(format!("{context}: {e}")),
    }
}

/// Returns the error of `result`, failing the spec if it succeeded.
#[track_caller]
pub fn expect_err<T: Debug, E>(result: Result<T, E>, context: &str) -> E {
    match result {
        Ok(value) => fail(format!("{context}: expected an error, got {value:?}")),
        Err(e) => e,
    }
}

// ── equal ────────────────────────────────────────────────────────────

/// Matches values equal to the expected one.
#[derive(Debug, Clone)]
pub struct Equal<E>(E);

/// Matches values equal to `expected`.
pub const fn equal<E>(expected: E) -> Equal<E> {
    Equal(expected)
}

impl<T, E> Matcher<T> for Equal<E>
where
    T: PartialEq<E> + ?Sized,
    E: Debug,
{
    fn matches(&self, actual: &T) -> bool {
        actual == &self.0
    }

    fn describe(&self) -> String {
        format!("equal {:?}", self.0)
    }
}

// ── contain ──────────────────────────────────────────────────────────

/// Collections and strings that can be searched for a needle.
pub trait Haystack<N: ?Sized> {
    /// Returns whether `needle` occurs in `self`.
    fn has(&self, needle: &N) -> bool;
}

impl Haystack<&str> for String {
    fn has(&self, needle: &&str) -> bool {
        self.contains(*needle)
    }
}

impl Haystack<String> for String {
    fn has(&self, needle: &String) -> bool {
        self.contains(needle.as_str())
    }
}

impl Haystack<&str> for &str {
    fn has(&self, needle: &&str) -> bool {
        self.contains(*needle)
    }
}

impl Haystack<String> for &str {
    fn has(&self, needle: &String) -> bool {
        self.contains(needle.as_str())
    }
}

impl<T: PartialEq> Haystack<T> for Vec<T> {
    fn has(&self, needle: &T) -> bool {
        self.contains(needle)
    }
}

impl<T: PartialEq> Haystack<T> for &[T] {
    fn has(&self, needle: &T) -> bool {
        self.contains(needle)
    }
}

impl<T: PartialEq> Haystack<T> for &Vec<T> {
    fn has(&self, needle: &T) -> bool {
        self.contains(needle)
    }
}

impl Haystack<&str> for &String {
    fn has(&self, needle: &&str) -> bool {
        self.contains(*needle)
    }
}

/// Matches strings containing a substring or collections containing an element.
#[derive(Debug, Clone)]
pub struct Contain<N>(N);

/// Matches haystacks containing `needle`.
pub const fn contain<N>(needle: N) -> Contain<N> {
    Contain(needle)
}

impl<H, N> Matcher<H> for Contain<N>
where
    H: Haystack<N>,
    N: Debug,
{
    fn matches(&self, actual: &H) -> bool {
        actual.has(&self.0)
    }

    fn describe(&self) -> String {
        format!("contain {:?}", self.0)
    }
}

// ── match_regex ──────────────────────────────────────────────────────

/// Matches strings against a regular expression.
#[derive(Debug, Clone)]
pub struct MatchRegex(Regex);

/// Matches strings against `pattern`.
///
/// An invalid pattern fails the spec immediately.
#[track_caller]
pub fn match_regex(pattern: &str) -> MatchRegex {
    match Regex::new(pattern) {
        Ok(re) => MatchRegex(re),
        Err(e) => fail(format!("invalid regular expression {pattern:?}: {e}")),
    }
}

impl<T: AsRef<str> + ?Sized> Matcher<T> for MatchRegex {
    fn matches(&self, actual: &T) -> bool {
        self.0.is_match(actual.as_ref())
    }

    fn describe(&self) -> String {
        format!("match regular expression {:?}", self.0.as_str())
    }
}

// ── be_empty / have_length ───────────────────────────────────────────

/// Values with a length.
pub trait Length {
    /// Number of elements, bytes, or entries.
    fn length(&self) -> usize;
}

impl Length for str {
    fn length(&self) -> usize {
        self.len()
    }
}

impl Length for String {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> Length for [T] {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> Length for Vec<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V> Length for HashMap<K, V> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V> Length for BTreeMap<K, V> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<L: Length + ?Sized> Length for &L {
    fn length(&self) -> usize {
        (**self).length()
    }
}

/// Matches values of length zero.
#[derive(Debug, Clone, Copy)]
pub struct BeEmpty;

/// Matches empty strings, collections, and maps.
pub const fn be_empty() -> BeEmpty {
    BeEmpty
}

impl<T: Length + ?Sized> Matcher<T> for BeEmpty {
    fn matches(&self, actual: &T) -> bool {
        actual.length() == 0
    }

    fn describe(&self) -> String {
        "be empty".to_string()
    }
}

/// Matches values of an exact length.
#[derive(Debug, Clone, Copy)]
pub struct HaveLength(usize);

/// Matches values whose length is `n`.
pub const fn have_length(n: usize) -> HaveLength {
    HaveLength(n)
}

impl<T: Length + ?Sized> Matcher<T> for HaveLength {
    fn matches(&self, actual: &T) -> bool {
        actual.length() == self.0
    }

    fn describe(&self) -> String {
        format!("have length {}", self.0)
    }
}

// ── succeed / options / booleans ─────────────────────────────────────

/// Matches `Ok` results.
#[derive(Debug, Clone, Copy)]
pub struct Succeed;

/// Matches `Ok` results.
pub const fn succeed() -> Succeed {
    Succeed
}

impl<T, E> Matcher<Result<T, E>> for Succeed {
    fn matches(&self, actual: &Result<T, E>) -> bool {
        actual.is_ok()
    }

    fn describe(&self) -> String {
        "succeed".to_string()
    }
}

/// Matches `None`.
#[derive(Debug, Clone, Copy)]
pub struct BeNone;

/// Matches `None`.
pub const fn be_none() -> BeNone {
    BeNone
}

impl<T> Matcher<Option<T>> for BeNone {
    fn matches(&self, actual: &Option<T>) -> bool {
        actual.is_none()
    }

    fn describe(&self) -> String {
        "be None".to_string()
    }
}

/// Matches a specific boolean.
#[derive(Debug, Clone, Copy)]
pub struct BeBool(bool);

/// Matches `true`.
pub const fn be_true() -> BeBool {
    BeBool(true)
}

/// Matches `false`.
pub const fn be_false() -> BeBool {
    BeBool(false)
}

impl Matcher<bool> for BeBool {
    fn matches(&self, actual: &bool) -> bool {
        *actual == self.0
    }

    fn describe(&self) -> String {
        format!("be {}", self.0)
    }
}

/// Matches integers greater than or equal to a bound.
#[derive(Debug, Clone, Copy)]
pub struct BeAtLeast<N>(N);

/// Matches values `>= bound`.
pub const fn be_at_least<N>(bound: N) -> BeAtLeast<N> {
    BeAtLeast(bound)
}

impl<N: PartialOrd + Debug> Matcher<N> for BeAtLeast<N> {
    fn matches(&self, actual: &N) -> bool {
        actual >= &self.0
    }

    fn describe(&self) -> String {
        format!("be at least {:?}", self.0)
    }
}

/// Matches values satisfying an arbitrary predicate.
pub struct Satisfy<F> {
    predicate: F,
    description: String,
}

impl<F> Debug for Satisfy<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Satisfy")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Matches values for which `predicate` returns `true`.
pub fn satisfy<T: ?Sized, F: Fn(&T) -> bool>(
    description: impl Into<String>,
    predicate: F,
) -> Satisfy<F> {
    Satisfy {
        predicate,
        description: description.into(),
    }
}

impl<T: ?Sized, F: Fn(&T) -> bool> Matcher<T> for Satisfy<F> {
    fn matches(&self, actual: &T) -> bool {
        (self.predicate)(actual)
    }

    fn describe(&self) -> String {
        format!("satisfy \"{}\"", self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{Interruption, recover};

    fn failure_of(f: impl FnOnce()) -> String {
        match recover(f) {
            Err(Interruption::Failed(message)) => message,
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn equal_passes_and_fails() {
        expect("hello".to_string()).to(equal("hello"));
        expect(137).to(equal(137));
        let message = failure_of(|| expect("hello".to_string()).to(equal("world")));
        assert!(message.starts_with("Expected\n    \"hello\"\nto equal \"world\""));
    }

    #[test]
    fn contain_searches_strings_and_vectors() {
        expect("hello World".to_string()).to(contain("World"));
        expect(vec!["a".to_string(), "b".to_string()]).to(contain("b".to_string()));
        expect(vec![1, 2, 3]).not_to(contain(4));
        let message = failure_of(|| expect(vec![1, 2]).to(contain(9)));
        assert!(message.contains("to contain 9"));
    }

    #[test]
    fn regex_and_lengths() {
        expect("uid=1000 gid=1000").to(match_regex(r"uid=\d+"));
        expect(String::new()).to(be_empty());
        expect(vec![1, 2, 3]).to(have_length(3));
        expect(HashMap::<String, String>::new()).to(be_empty());
        let message = failure_of(|| expect(vec![1]).to(be_empty()));
        assert!(message.contains("to be empty"));
    }

    #[test]
    fn invalid_regex_fails_the_spec() {
        let message = failure_of(|| {
            let _ = match_regex("(");
        });
        assert!(message.contains("invalid regular expression"));
    }

    #[test]
    fn succeed_and_options() {
        expect(Ok::<u8, String>(1)).to(succeed());
        expect(Err::<u8, String>("nope".into())).not_to(succeed());
        expect(None::<u8>).to(be_none());
        expect(Some(3)).not_to(be_none());
        expect(true).to(be_true());
        expect(false).to(be_false());
        expect(5).to(be_at_least(5));
    }

    #[test]
    fn satisfy_uses_description() {
        expect(4).to(satisfy("is even", |n: &i32| n % 2 == 0));
        let message = failure_of(|| expect(3).to(satisfy("is even", |n: &i32| n % 2 == 0)));
        assert!(message.contains("to satisfy \"is even\""));
    }

    #[test]
    fn context_prefixes_the_message() {
        let message =
            failure_of(|| expect(1).with_context("exit code of touch").to(equal(0)));
        assert!(message.starts_with("exit code of touch\nExpected"));
    }

    #[test]
    fn expect_ok_and_err() {
        assert_eq!(expect_ok(Ok::<_, String>(7), "ctx"), 7);
        let message = failure_of(|| {
            let _ = expect_ok(Err::<u8, _>("connection refused"), "list sandboxes");
        });
        assert!(message.starts_with("list sandboxes: connection refused"));
        assert_eq!(expect_err(Err::<u8, _>("boom"), "ctx"), "boom");
    }
}
