//! Session-scoped reflection buffer
//!
//! Lessons learned during one refine loop, injected into later prompts so
//! an iteration does not repeat an earlier iteration's mistake. Bounded to
//! the last few entries and discarded with the session; only the learner
//! can promote a lesson into the durable store.

use tracing::debug;

use crate::types::ReflectionEntry;

/// Keep only the most recent entries to avoid context bloat
const MAX_REFLECTIONS: usize = 5;

/// Generic error classes with canned lessons
const ERROR_LESSONS: &[(&str, &str)] = &[
    ("index", "Check collection bounds before accessing elements"),
    ("bounds", "Check collection bounds before accessing elements"),
    ("key", "Verify the key exists before looking it up"),
    ("type", "Ensure types are compatible before operating on them"),
    ("import", "Use only standard library imports, define helpers inline"),
    ("module", "Do not import project-local modules, implement inline"),
    ("name", "Define every variable before using it"),
    ("undefined", "Define every variable before using it"),
    ("syntax", "Check parentheses, quotes, and indentation"),
    ("attribute", "Verify the object has the method before calling it"),
    ("value", "Validate input data format and range"),
    ("division", "Check the divisor is not zero before dividing"),
    ("zero", "Check the divisor is not zero before dividing"),
    ("timeout", "Avoid unbounded loops; cap iteration counts"),
];

/// Bounded buffer of lessons learned within one session
#[derive(Debug, Default)]
pub struct ReflectionBuffer {
    entries: Vec<ReflectionEntry>,
}

impl ReflectionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reflection with an explicit lesson
    pub fn add(&mut self, iteration: u32, error: &str, lesson: impl Into<String>) {
        let error_type = classify_error(error);
        let lesson = lesson.into();
        debug!(iteration, error_type = %error_type, "reflection added");

        self.entries.push(ReflectionEntry {
            iteration,
            error_type,
            error_summary: truncate(error, 100),
            lesson,
        });

        if self.entries.len() > MAX_REFLECTIONS {
            let drop = self.entries.len() - MAX_REFLECTIONS;
            self.entries.drain(..drop);
        }
    }

    /// Derive a lesson from the error text itself
    ///
    /// Heuristic matching of common runtime error classes; unknown errors
    /// get a generic review lesson.
    pub fn add_from_error(&mut self, iteration: u32, error: &str) {
        let lower = error.to_lowercase();
        let lesson = ERROR_LESSONS
            .iter()
            .find(|(marker, _)| lower.contains(marker))
            .map(|(_, lesson)| *lesson)
            .unwrap_or("Review the error and fix the root cause");
        self.add(iteration, error, lesson);
    }

    /// Reflections formatted for prompt injection, empty string when none
    pub fn context(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut lines = vec!["## LESSONS FROM THIS SESSION (do NOT repeat these errors):".to_string()];
        for r in &self.entries {
            lines.push(format!("- Iter {}: {}: {}", r.iteration, r.error_type, r.lesson));
        }
        lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ReflectionEntry] {
        &self.entries
    }
}

/// Pull an error class out of a message like "IndexError: out of range"
fn classify_error(error: &str) -> String {
    error
        .split(':')
        .next()
        .map(|head| head.split_whitespace().last().unwrap_or("Error"))
        .unwrap_or("Error")
        .to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
