use std::time::Duration;

const DEFAULT_MAX_MEMORY: i64 = 10 * 1024 * 1024;
const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 2;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

/// Presupuesto de memoria de la cache de particiones, en bytes.
/// Se puede sobreescribir con la env var MAX_MEMORY.
pub fn max_memory_bytes() -> i64 {
    env_parse("MAX_MEMORY", DEFAULT_MAX_MEMORY)
}

/// Sin heartbeat durante este tiempo, el worker se da por caído.
pub fn worker_timeout() -> Duration {
    Duration::from_secs(env_parse(
        "WORKER_TIMEOUT_SECONDS",
        DEFAULT_WORKER_TIMEOUT_SECS,
    ))
}

pub fn heartbeat_interval() -> Duration {
    Duration::from_secs(env_parse(
        "HEARTBEAT_INTERVAL_SECONDS",
        DEFAULT_HEARTBEAT_INTERVAL_SECS,
    ))
}

pub fn max_retries() -> u32 {
    env_parse("MAX_RETRIES", DEFAULT_MAX_RETRIES)
}

/// Timeout por llamada cliente → driver.
pub fn rpc_timeout() -> Duration {
    Duration::from_secs(env_parse("RPC_TIMEOUT_SECONDS", DEFAULT_RPC_TIMEOUT_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_memory_respeta_env_var() {
        std::env::set_var("MAX_MEMORY", "1024");
        assert_eq!(max_memory_bytes(), 1024);
        std::env::remove_var("MAX_MEMORY");
        assert_eq!(max_memory_bytes(), DEFAULT_MAX_MEMORY);
    }

    #[test]
    fn valores_invalidos_caen_al_default() {
        std::env::set_var("MAX_RETRIES", "no-numerico");
        assert_eq!(max_retries(), DEFAULT_MAX_RETRIES);
        std::env::remove_var("MAX_RETRIES");
    }
}
