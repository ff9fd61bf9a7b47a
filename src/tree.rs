//! Route table.
//!
//! One radix tree per HTTP method, so a path registered under another
//! method is simply not found. Patterns use `:name` for a parameter that
//! matches one non-empty segment and `*name` for a final catch-all; they are
//! rewritten into [`matchit`] syntax on insert. At every node a literal
//! segment beats a parameter, and a parameter beats a catch-all.
//!
//! Matching is case-sensitive and segment-exact: `/users/` does not match
//! `/users`.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::Endpoint;
use crate::method::Method;

/// A registered route: the original pattern and its composed endpoint.
pub(crate) struct Route {
    pub pattern: Arc<str>,
    pub endpoint: Endpoint,
}

/// A successful lookup.
pub(crate) struct Matched<'t> {
    pub route: &'t Route,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum RouteError {
    #[error("pattern must start with `/`")]
    NotAbsolute,
    #[error("empty parameter name in segment `{0}`")]
    EmptyName(String),
    #[error("invalid character in parameter name `{0}`")]
    InvalidName(String),
    #[error("catch-all `{0}` must be the last segment")]
    CatchAllNotLast(String),
    #[error(transparent)]
    Insert(#[from] matchit::InsertError),
}

#[derive(Default)]
pub(crate) struct RouteTable {
    trees: HashMap<Method, MatchitRouter<Route>>,
}

impl RouteTable {
    pub(crate) fn insert(
        &mut self,
        method: Method,
        pattern: &str,
        endpoint: Endpoint,
    ) -> Result<(), RouteError> {
        let path = to_matchit(pattern)?;
        let route = Route { pattern: Arc::from(pattern), endpoint };
        self.trees.entry(method).or_default().insert(path, route)?;
        Ok(())
    }

    /// matchit never binds a parameter or catch-all to an empty value, so a
    /// path with an empty segment where a parameter sits is not found.
    pub(crate) fn at(&self, method: Method, path: &str) -> Option<Matched<'_>> {
        let tree = self.trees.get(&method)?;
        let matched = tree.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(Matched { route: matched.value, params })
    }
}

/// Rewrites `/users/:id/*rest` into `/users/{id}/{*rest}`, escaping braces
/// in literal segments.
fn to_matchit(pattern: &str) -> Result<String, RouteError> {
    let rest = pattern.strip_prefix('/').ok_or(RouteError::NotAbsolute)?;
    let segments: Vec<&str> = rest.split('/').collect();
    let mut out = String::with_capacity(pattern.len() + 2 * segments.len());

    for (i, segment) in segments.iter().enumerate() {
        out.push('/');
        if let Some(name) = segment.strip_prefix(':') {
            check_name(segment, name)?;
            out.push('{');
            out.push_str(name);
            out.push('}');
        } else if let Some(name) = segment.strip_prefix('*') {
            check_name(segment, name)?;
            if i + 1 != segments.len() {
                return Err(RouteError::CatchAllNotLast((*segment).to_owned()));
            }
            out.push_str("{*");
            out.push_str(name);
            out.push('}');
        } else {
            for c in segment.chars() {
                match c {
                    '{' => out.push_str("{{"),
                    '}' => out.push_str("}}"),
                    c => out.push(c),
                }
            }
        }
    }
    Ok(out)
}

fn check_name(segment: &str, name: &str) -> Result<(), RouteError> {
    if name.is_empty() {
        return Err(RouteError::EmptyName(segment.to_owned()));
    }
    if name.contains(['{', '}', ':', '*']) {
        return Err(RouteError::InvalidName(segment.to_owned()));
    }
    Ok(())
}
