//! Recursive template composition.
//!
//! A template body may reference other templates as `{{name}}`. Resolution
//! replaces each reference with the referenced template's resolved body.
//! Text between braces that is not a valid template name is left as is.

use std::collections::HashMap;

use parley_store::{Store, StoreError};
use thiserror::Error;

const MAX_DEPTH: usize = 32;
const MAX_OUTPUT_BYTES: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("template `{0}` not found")]
    NotFound(String),

    #[error("template cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("templates nest deeper than {max} levels", max = MAX_DEPTH)]
    TooDeep,

    #[error("template `{0}` expands to more than {max} bytes", max = MAX_OUTPUT_BYTES)]
    TooLarge(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Expand the template `name` into its final text. Reads a fresh snapshot of
/// the templates on every call.
pub async fn resolve_template(store: &Store, name: &str) -> Result<String, ResolveError> {
    let bodies: HashMap<String, String> = store
        .templates()
        .await?
        .into_iter()
        .map(|t| (t.name, t.body))
        .collect();
    Expander::new(&bodies).expand(name)
}

/// Expansion state for one resolve call. Finished expansions are cached
/// per name, so a template referenced many times is expanded once.
struct Expander<'a> {
    bodies: &'a HashMap<String, String>,
    resolved: HashMap<String, String>,
    stack: Vec<String>,
}

impl<'a> Expander<'a> {
    fn new(bodies: &'a HashMap<String, String>) -> Self {
        Self {
            bodies,
            resolved: HashMap::new(),
            stack: Vec::new(),
        }
    }

    fn expand(&mut self, name: &str) -> Result<String, ResolveError> {
        if let Some(done) = self.resolved.get(name) {
            return Ok(done.clone());
        }
        if self.stack.iter().any(|n| n == name) {
            let mut chain = self.stack.clone();
            chain.push(name.to_string());
            return Err(ResolveError::Cycle(chain));
        }
        if self.stack.len() >= MAX_DEPTH {
            return Err(ResolveError::TooDeep);
        }
        let bodies = self.bodies;
        let body = bodies
            .get(name)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;

        self.stack.push(name.to_string());
        let mut out = String::with_capacity(body.len());
        let mut rest = body.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let reference = after[..end].trim();
            if is_template_name(reference) {
                out.push_str(&self.expand(reference)?);
            } else {
                out.push_str(&rest[start..start + 2 + end + 2]);
            }
            if out.len() > MAX_OUTPUT_BYTES {
                return Err(ResolveError::TooLarge(self.stack[0].clone()));
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        if out.len() > MAX_OUTPUT_BYTES {
            return Err(ResolveError::TooLarge(self.stack[0].clone()));
        }
        self.stack.pop();
        self.resolved.insert(name.to_string(), out.clone());
        Ok(out)
    }
}

/// Names are non-empty and made of ASCII letters, digits, `-`, `_` and `.`.
pub fn is_template_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bodies(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(n, b)| (n.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn expands_nested_references() {
        let b = bodies(&[
            ("review", "{{ persona }}\n\nReview this: {{style}}"),
            ("persona", "You are {{tone}} reviewer."),
            ("tone", "a careful"),
            ("style", "be brief"),
        ]);
        let out = Expander::new(&b).expand("review").unwrap();
        assert_eq!(out, "You are a careful reviewer.\n\nReview this: be brief");
    }

    #[test]
    fn leaves_non_names_and_unterminated_braces_alone() {
        let b = bodies(&[("t", "json {{ not a name }} and {{open")]);
        let out = Expander::new(&b).expand("t").unwrap();
        assert_eq!(out, "json {{ not a name }} and {{open");
    }

    #[test]
    fn same_template_twice_is_not_a_cycle() {
        let b = bodies(&[("t", "{{x}}-{{x}}"), ("x", "ok")]);
        assert_eq!(Expander::new(&b).expand("t").unwrap(), "ok-ok");
    }

    #[test]
    fn detects_cycles() {
        let b = bodies(&[("a", "{{b}}"), ("b", "{{a}}")]);
        let err = Expander::new(&b).expand("a").unwrap_err();
        assert_eq!(err.to_string(), "template cycle: a -> b -> a");
    }

    #[test]
    fn missing_reference_is_an_error() {
        let b = bodies(&[("a", "{{ghost}}")]);
        assert!(matches!(
            Expander::new(&b).expand("a"),
            Err(ResolveError::NotFound(ref n)) if n == "ghost"
        ));
    }

    #[test]
    fn doubling_chain_is_rejected_once_output_grows_too_large() {
        let names: Vec<String> = (0..=24).map(|i| format!("t{i}")).collect();
        let mut entries: Vec<(String, String)> = names
            .windows(2)
            .map(|w| (w[0].clone(), format!("{{{{{0}}}}}{{{{{0}}}}}", w[1])))
            .collect();
        entries.push(("t24".into(), "xxxxxxxx".into()));
        let b: HashMap<String, String> = entries.into_iter().collect();

        let err = Expander::new(&b).expand("t0").unwrap_err();
        assert!(matches!(err, ResolveError::TooLarge(ref n) if n == "t0"));
    }

    #[test]
    fn repeated_references_are_expanded_once() {
        let b = bodies(&[("t", "{{x}}{{x}}{{x}}"), ("x", "{{y}}"), ("y", "ok")]);
        let mut expander = Expander::new(&b);
        assert_eq!(expander.expand("t").unwrap(), "okokok");
        assert_eq!(expander.resolved.len(), 3);
    }

    #[tokio::test]
    async fn resolves_from_the_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path().join("parley.db")).unwrap();
        store
            .create_template("greet".into(), "Hello {{who}}".into())
            .await
            .unwrap();
        store
            .create_template("who".into(), "world".into())
            .await
            .unwrap();
        assert_eq!(resolve_template(&store, "greet").await.unwrap(), "Hello world");
    }
}
