//! Environment-backed configuration maps.

use std::collections::HashMap;

use tracing::debug;

/// Build a flat configuration map from environment variables named
/// `{prefix}{KEY}`, after loading a `.env` file if one exists.
///
/// `NEX_THREAD_COUNT=8` with prefix `NEX_` becomes `thread_count -> 8`.
#[must_use]
pub fn config_map_from_env(prefix: &str) -> HashMap<String, String> {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => debug!(error = %e, "failed to load .env"),
    }
    config_map_from_vars(prefix, std::env::vars())
}

/// Same as [`config_map_from_env`] over an explicit variable list.
pub fn config_map_from_vars<I>(prefix: &str, vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.to_ascii_lowercase(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_vars_are_lowercased() {
        let vars = vec![
            ("NEX_THREAD_COUNT".to_owned(), "8".to_owned()),
            ("NEX_ALLOCATOR_POOL_SIZE_MB".to_owned(), "16".to_owned()),
            ("NEX_".to_owned(), "ignored".to_owned()),
            ("PATH".to_owned(), "/usr/bin".to_owned()),
        ];
        let map = config_map_from_vars("NEX_", vars);
        assert_eq!(map.len(), 2);
        assert_eq!(map["thread_count"], "8");
        assert_eq!(map["allocator_pool_size_mb"], "16");
    }
}
