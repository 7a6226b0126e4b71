//! config/mod.rs
//! Configuración del motor (valores por defecto + variables de entorno).

pub mod engine_config;
