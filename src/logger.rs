//! logger.rs
//! Configuración del logger usando env_logger.

/// `sqlx` loguea cada query a nivel info; con workers sondeando la cola eso
/// tapa todo lo demás.
const QUIET_MODULES: &[(&str, &str)] = &[("sqlx::query", "warn")];

/// Filtro efectivo: `RUST_LOG` si está definido (manda el operador), si no
/// "info" con los módulos ruidosos bajados.
pub fn log_filter(rust_log: Option<String>) -> String {
    match rust_log {
        Some(filter) if !filter.trim().is_empty() => filter,
        _ => {
            let mut filter = String::from("info");
            for (module, level) in QUIET_MODULES {
                filter.push_str(&format!(",{module}={level}"));
            }
            filter
        }
    }
}

pub fn init_logger() {
    let filter = log_filter(std::env::var("RUST_LOG").ok());

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_secs()
        .init();
}
