use std::str::FromStr;

/// Top level configuration. Each component takes its own section by value at
/// construction; nothing in the crate reads configuration at runtime.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub documents: DocumentCacheConfig,
    pub views: ViewConfig,
    pub json: JsonOptions,
}

#[derive(Debug, Clone)]
pub struct DocumentCacheConfig {
    /// Name used in log output.
    pub name: String,
    /// Maximum number of checked-in documents kept. Least recently used
    /// entries are evicted first.
    pub capacity: usize,
}

impl Default for DocumentCacheConfig {
    fn default() -> Self {
        Self {
            name: "documents".to_string(),
            capacity: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Maximum number of rows materialized per selection. `None` means
    /// unlimited.
    pub query_limit: Option<usize>,
    pub default_page_length: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            query_limit: None,
            default_page_length: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JsonOptions {
    /// Adds `debug-*` properties to serialized documents.
    pub protocol_debugging: bool,
}

impl Config {
    /// Builds a configuration from `DOCVIEW_*` environment variables, using
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(capacity) = env_value::<usize>("DOCVIEW_CACHE_CAPACITY") {
            config.documents.capacity = capacity;
        }
        if let Some(limit) = env_value::<usize>("DOCVIEW_QUERY_LIMIT") {
            config.views.query_limit = if limit == 0 { None } else { Some(limit) };
        }
        if let Some(page_length) = env_value::<usize>("DOCVIEW_PAGE_LENGTH") {
            if page_length > 0 {
                config.views.default_page_length = page_length;
            }
        }
        if let Some(debugging) = env_value::<bool>("DOCVIEW_PROTOCOL_DEBUGGING") {
            config.json.protocol_debugging = debugging;
        }
        config
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring unparsable {}='{}'", name, raw);
            None
        }
    }
}
