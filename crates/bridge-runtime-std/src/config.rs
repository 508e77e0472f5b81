use std::str::FromStr;

use bridge_core::{BridgeError, BridgeOptions, BridgeResult};

/// Prefix of the environment variables read by [`options_from_env`].
pub const ENV_PREFIX: &str = "NATIVE_BRIDGE_";

/// Default options overridden by `NATIVE_BRIDGE_*` environment variables.
///
/// Recognised suffixes: `REQUEST_TIMEOUT_MS`, `FLUSH_INTERVAL_MS`,
/// `BATCH_SIZE`, `POOL_CAPACITY`, `MAX_FLUSH_ATTEMPTS`,
/// `DEAD_LETTER_CAPACITY`, `STYLE_CACHE_CAPACITY` and `DEV_SERVER_ADDR`.
pub fn options_from_env() -> BridgeResult<BridgeOptions> {
    options_from_vars(std::env::vars())
}

/// Same as [`options_from_env`] over an explicit variable list.
pub fn options_from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> BridgeResult<BridgeOptions>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut options = BridgeOptions::default();
    for (key, value) in vars {
        let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let value = value.as_ref().trim();
        match name {
            "REQUEST_TIMEOUT_MS" => options.request_timeout_ms = parse(name, value)?,
            "FLUSH_INTERVAL_MS" => options.flush_interval_ms = parse(name, value)?,
            "BATCH_SIZE" => options.batch_size = parse(name, value)?,
            "POOL_CAPACITY" => options.pool_capacity = parse(name, value)?,
            "MAX_FLUSH_ATTEMPTS" => options.max_flush_attempts = parse(name, value)?,
            "DEAD_LETTER_CAPACITY" => options.dead_letter_capacity = parse(name, value)?,
            "STYLE_CACHE_CAPACITY" => options.style_cache_capacity = parse(name, value)?,
            "DEV_SERVER_ADDR" => options.dev_server_addr = value.to_string(),
            _ => log::warn!("ignoring unknown setting {ENV_PREFIX}{name}"),
        }
    }
    options.validate()?;
    Ok(options)
}

fn parse<T>(name: &str, value: &str) -> BridgeResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err| BridgeError::Config(format!("{ENV_PREFIX}{name}={value:?}: {err}")))
}
