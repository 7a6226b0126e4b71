//! services/mod.rs
//! Capas de negocio del motor: campañas, ledger, remitentes, cola y procesos
//! de fondo (workers, sweeper, entrenamiento).

pub mod campaign_service;
pub mod dispatch_service;
pub mod queue_service;
pub mod sender_service;
pub mod sweeper_service;
pub mod tracking_service;
pub mod training_service;
pub mod worker_service;
