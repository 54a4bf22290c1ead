//! Cache key definitions.
//!
//! Every key lives in one of three namespaces of the shared store:
//!
//! - `cache:<principal>:<path>?<query>` for replayable HTTP responses
//! - `user_stats:<user>` for aggregated habit statistics
//! - `rate:<client>` for fixed-window request counters

use url::form_urlencoded;

use crate::domain::entities::UserId;

pub const RESPONSE_PREFIX: &str = "cache";
pub const STATS_PREFIX: &str = "user_stats";
pub const RATE_PREFIX: &str = "rate";

/// Principal marker used for requests without an authenticated user.
pub const ANONYMOUS: &str = "anon";

/// Routes whose cached list views depend on a user's habits.
pub const HABIT_LIST_PATHS: &[&str] = &["/api/habits"];

/// Query parameter through which an admin reads another user's views.
pub const OWNER_PARAM: &str = "user_id";

/// Identity segment of a response cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKey {
    User(UserId),
    Anonymous,
}

impl PrincipalKey {
    fn segment(&self) -> String {
        match self {
            PrincipalKey::User(id) => id.to_string(),
            PrincipalKey::Anonymous => ANONYMOUS.to_string(),
        }
    }
}

/// Build the response cache key for a request.
pub fn response_key(principal: PrincipalKey, path: &str, query: Option<&str>) -> String {
    format!(
        "{RESPONSE_PREFIX}:{}:{}?{}",
        principal.segment(),
        normalize_path(path),
        canonical_query(query.unwrap_or(""))
    )
}

/// Response key namespaced by the user whose data the request reads.
///
/// A request naming an owner through [`OWNER_PARAM`] is filed under that
/// owner with the parameter dropped from the query, so owner invalidation
/// also reaches admin views of the same list. Returns `None` when the request
/// must bypass the cache: the owner is malformed, repeated, or not readable
/// by the caller.
pub fn owner_scoped_key(
    caller: Option<UserId>,
    is_admin: bool,
    path: &str,
    query: Option<&str>,
) -> Option<String> {
    let mut target = None;
    let mut remaining = form_urlencoded::Serializer::new(String::new());
    for (name, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        if name == OWNER_PARAM {
            if target.is_some() {
                return None;
            }
            target = Some(value.parse::<UserId>().ok().filter(|id| *id > 0)?);
        } else {
            remaining.append_pair(&name, &value);
        }
    }
    let remaining = remaining.finish();

    let owner = match (target, caller) {
        (None, Some(user)) => PrincipalKey::User(user),
        (None, None) => PrincipalKey::Anonymous,
        (Some(owner), Some(user)) if owner == user || is_admin => PrincipalKey::User(owner),
        (Some(_), _) => return None,
    };
    Some(response_key(owner, path, Some(&remaining)))
}

/// Prefix shared by every cached response of `principal` under `path`.
pub fn response_prefix(principal: PrincipalKey, path: &str) -> String {
    format!(
        "{RESPONSE_PREFIX}:{}:{}",
        principal.segment(),
        normalize_path(path)
    )
}

/// Prefix shared by every cached response of `principal`.
pub fn owner_prefix(principal: PrincipalKey) -> String {
    format!("{RESPONSE_PREFIX}:{}:", principal.segment())
}

pub fn stats_key(user_id: UserId) -> String {
    format!("{STATS_PREFIX}:{user_id}")
}

pub fn rate_key(client_id: &str) -> String {
    format!("{RATE_PREFIX}:{client_id}")
}

/// Collapse repeated slashes and drop a trailing slash (except for `/`).
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Sort query pairs so that equivalent query strings map to one key.
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in &pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

/// Escape glob metacharacters so `prefix` matches literally.
pub fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Glob pattern matching every key that starts with `prefix`.
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{}*", escape_glob(prefix))
}

/// Match `candidate` against a glob `pattern` supporting `*`, `?`, `[...]`
/// classes and backslash escapes.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    glob_match_from(&pattern, &candidate)
}

fn glob_match_from(pattern: &[char], candidate: &[char]) -> bool {
    let Some((&head, rest)) = pattern.split_first() else {
        return candidate.is_empty();
    };

    match head {
        '*' => (0..=candidate.len()).any(|skip| glob_match_from(rest, &candidate[skip..])),
        '?' => !candidate.is_empty() && glob_match_from(rest, &candidate[1..]),
        '[' => {
            let Some((&ch, remaining)) = candidate.split_first() else {
                return false;
            };
            match match_class(rest, ch) {
                Some((matched, after_class)) => matched && glob_match_from(after_class, remaining),
                None => ch == '[' && glob_match_from(rest, remaining),
            }
        }
        '\\' => match rest.split_first() {
            Some((&literal, after)) => {
                candidate.first() == Some(&literal) && glob_match_from(after, &candidate[1..])
            }
            None => candidate.first() == Some(&'\\') && candidate.len() == 1,
        },
        literal => candidate.first() == Some(&literal) && glob_match_from(rest, &candidate[1..]),
    }
}

/// Evaluate a `[...]` class whose body starts at `class`. Returns whether `ch`
/// matched and the pattern remaining after `]`, or `None` if unterminated.
fn match_class(class: &[char], ch: char) -> Option<(bool, &[char])> {
    let (negated, mut idx) = match class.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;
    let mut first = true;

    while idx < class.len() {
        let current = class[idx];
        if current == ']' && !first {
            return Some((matched != negated, &class[idx + 1..]));
        }
        first = false;

        let (low, consumed) = if current == '\\' && idx + 1 < class.len() {
            (class[idx + 1], 2)
        } else {
            (current, 1)
        };
        idx += consumed;

        if idx + 1 < class.len() && class[idx] == '-' && class[idx + 1] != ']' {
            let high = class[idx + 1];
            idx += 2;
            if low <= ch && ch <= high {
                matched = true;
            }
        } else if low == ch {
            matched = true;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_key_is_stable_across_query_order() {
        let a = response_key(PrincipalKey::User(4), "/api/habits", Some("b=2&a=1"));
        let b = response_key(PrincipalKey::User(4), "/api/habits/", Some("a=1&b=2"));
        assert_eq!(a, b);
        assert_eq!(a, "cache:4:/api/habits?a=1&b=2");
    }

    #[test]
    fn anonymous_and_empty_query() {
        let key = response_key(PrincipalKey::Anonymous, "//health", None);
        assert_eq!(key, "cache:anon:/health?");
    }

    #[test]
    fn different_principals_never_share_keys() {
        let a = response_key(PrincipalKey::User(1), "/api/habits", None);
        let b = response_key(PrincipalKey::User(12), "/api/habits", None);
        assert_ne!(a, b);
        assert!(!b.starts_with(&owner_prefix(PrincipalKey::User(1))));
    }

    #[test]
    fn admin_views_are_filed_under_the_owner() {
        let own = owner_scoped_key(Some(5), false, "/api/habits", Some("a=1"));
        let admin = owner_scoped_key(Some(1), true, "/api/habits", Some("user_id=5&a=1"));
        let self_named = owner_scoped_key(Some(5), false, "/api/habits", Some("a=1&user_id=5"));
        assert_eq!(own.as_deref(), Some("cache:5:/api/habits?a=1"));
        assert_eq!(admin, own);
        assert_eq!(self_named, own);
    }

    #[test]
    fn foreign_or_malformed_owners_bypass_the_cache() {
        assert_eq!(owner_scoped_key(Some(2), false, "/api/habits", Some("user_id=5")), None);
        assert_eq!(owner_scoped_key(None, false, "/api/habits", Some("user_id=5")), None);
        assert_eq!(owner_scoped_key(Some(1), true, "/api/habits", Some("user_id=x")), None);
        assert_eq!(owner_scoped_key(Some(1), true, "/api/habits", Some("user_id=0")), None);
        assert_eq!(
            owner_scoped_key(Some(1), true, "/api/habits", Some("user_id=5&user_id=6")),
            None
        );
        assert_eq!(
            owner_scoped_key(None, false, "/health", None).as_deref(),
            Some("cache:anon:/health?")
        );
    }

    #[test]
    fn normalize_root_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/a//b/"), "/a/b");
    }

    #[test]
    fn prefix_pattern_escapes_metacharacters() {
        let pattern = prefix_pattern("cache:1:/api/habits?");
        assert_eq!(pattern, "cache:1:/api/habits\\?*");
        assert!(glob_match(&pattern, "cache:1:/api/habits?page=2"));
        assert!(!glob_match(&pattern, "cache:1:/api/habitsXpage=2"));
    }

    #[test]
    fn glob_supports_wildcards_and_classes() {
        assert!(glob_match("rate:*", "rate:10.0.0.1"));
        assert!(glob_match("user_stats:?", "user_stats:7"));
        assert!(!glob_match("user_stats:?", "user_stats:17"));
        assert!(glob_match("cache:[0-9]:*", "cache:3:/api"));
        assert!(!glob_match("cache:[^0-9]:*", "cache:3:/api"));
        assert!(!glob_match("cache:*", "user_stats:1"));
    }
}
