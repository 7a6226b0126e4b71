//! tests/training_tests.rs
//! Entrenamiento de capacidad de remitentes.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use actix_rt::test;
    use chrono::{Duration, Utc};

    use crate::collaborators::{
        reputation::{classify_failure_rate, HttpReputationSignal, LedgerReputationSignal},
        ReputationSignal,
    };
    use crate::errors::EngineError;
    use crate::models::sender_model::{CreateSenderRequest, HealthScore, TrainingDecision, TrainingMode};
    use crate::services::training_service::{
        manual_next_limit, ReputationCurve, TrainingPolicy, TrainingService,
    };
    use crate::tests::support::*;

    fn trainer(engine: &TestEngine, default_mode: TrainingMode) -> TrainingService {
        TrainingService::new(
            engine.senders.clone(),
            engine.reputation.clone(),
            Arc::new(ReputationCurve {
                healthy_increase_pct: 10,
                critical_decrease_pct: 20,
            }),
            default_mode,
        )
    }

    async fn sender_with_mode(engine: &TestEngine, current: i64, mode: TrainingMode) -> String {
        engine
            .senders
            .create_sender(CreateSenderRequest {
                owner_id: "owner-1".to_string(),
                from_address: "promo@example.com".to_string(),
                smtp_host: "smtp.example.com".to_string(),
                smtp_port: 465,
                smtp_user: "promo".to_string(),
                smtp_pass: "secret".to_string(),
                current_daily_limit: current,
                max_daily_limit: Some(500),
                training_mode: Some(mode),
                manual_daily_increase_pct: None,
            })
            .await
            .unwrap()
            .id
    }

    #[test]
    async fn test_manual_increment_uses_floor_and_max() {
        assert_eq!(manual_next_limit(100, 10, 500), 110);
        assert_eq!(manual_next_limit(15, 10, 500), 16);
        assert_eq!(manual_next_limit(5, 10, 500), 5);
        assert_eq!(manual_next_limit(490, 10, 500), 500);
        assert_eq!(manual_next_limit(500, 10, 500), 500);
    }

    #[test]
    async fn test_reputation_curve() {
        let curve = ReputationCurve {
            healthy_increase_pct: 10,
            critical_decrease_pct: 0,
        };
        assert_eq!(curve.next_limit(200, 500, HealthScore::Healthy), 220);
        assert_eq!(curve.next_limit(200, 500, HealthScore::Degraded), 200);
        assert_eq!(curve.next_limit(200, 500, HealthScore::Critical), 200);
    }

    #[test]
    async fn test_failure_rate_classification() {
        assert_eq!(classify_failure_rate(10, 5), HealthScore::Degraded);
        assert_eq!(classify_failure_rate(1000, 5), HealthScore::Healthy);
        assert_eq!(classify_failure_rate(1000, 30), HealthScore::Degraded);
        assert_eq!(classify_failure_rate(1000, 80), HealthScore::Critical);
    }

    #[test]
    async fn test_manual_training_once_per_window() {
        let engine = engine().await;
        let sender_id = seed_sender(&engine, 100, 500).await;
        let trainer = trainer(&engine, TrainingMode::Manual);

        let day0 = Utc::now();
        let decision = trainer.train_sender(&sender_id, day0).await.unwrap();
        assert_eq!(decision, TrainingDecision::Increased { from: 100, to: 110 });

        // Segunda pasada dentro de las 24h: no-op
        let decision = trainer
            .train_sender(&sender_id, day0 + Duration::hours(6))
            .await
            .unwrap();
        assert_eq!(decision, TrainingDecision::NotDue);
        let capacity = engine.senders.get_capacity(&sender_id).await.unwrap();
        assert_eq!(capacity.current_daily_limit, 110);

        let decision = trainer
            .train_sender(&sender_id, day0 + Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(decision, TrainingDecision::Increased { from: 110, to: 121 });
    }

    #[test]
    async fn test_growth_halts_exactly_at_max() {
        let engine = engine().await;
        let sender_id = seed_sender(&engine, 100, 500).await;
        let trainer = trainer(&engine, TrainingMode::Manual);

        let day0 = Utc::now();
        let mut limits = vec![100];
        for day in 1..=40 {
            trainer
                .train_sender(&sender_id, day0 + Duration::days(day))
                .await
                .unwrap();
            let capacity = engine.senders.get_capacity(&sender_id).await.unwrap();
            assert!(capacity.current_daily_limit <= 500);
            limits.push(capacity.current_daily_limit);
        }

        assert_eq!(*limits.last().unwrap(), 500);
        assert!(limits.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(&limits[..4], &[100, 110, 121, 133]);

        let decision = trainer
            .train_sender(&sender_id, day0 + Duration::days(41))
            .await
            .unwrap();
        assert_eq!(decision, TrainingDecision::AtMaximum);
    }

    #[test]
    async fn test_concurrent_training_applies_once() {
        let engine = engine().await;
        let sender_id = seed_sender(&engine, 100, 500).await;
        let trainer = trainer(&engine, TrainingMode::Manual);
        let now = Utc::now();

        let (a, b) = futures::join!(
            trainer.train_sender(&sender_id, now),
            trainer.train_sender(&sender_id, now)
        );
        let decisions = [a.unwrap(), b.unwrap()];
        let increased = decisions
            .iter()
            .filter(|d| matches!(d, TrainingDecision::Increased { .. }))
            .count();
        assert_eq!(increased, 1);

        let capacity = engine.senders.get_capacity(&sender_id).await.unwrap();
        assert_eq!(capacity.current_daily_limit, 110);
    }

    #[test]
    async fn test_automatic_training_follows_reputation() {
        let engine = engine().await;
        let sender_id = sender_with_mode(&engine, 200, TrainingMode::Automatic).await;
        let trainer = trainer(&engine, TrainingMode::Manual);
        let day0 = Utc::now();

        engine.reputation.set(HealthScore::Degraded);
        assert_eq!(
            trainer.train_sender(&sender_id, day0).await.unwrap(),
            TrainingDecision::Held
        );

        engine.reputation.set(HealthScore::Healthy);
        assert_eq!(
            trainer.train_sender(&sender_id, day0).await.unwrap(),
            TrainingDecision::Increased { from: 200, to: 220 }
        );

        engine.reputation.set(HealthScore::Critical);
        assert_eq!(
            trainer
                .train_sender(&sender_id, day0 + Duration::days(1))
                .await
                .unwrap(),
            TrainingDecision::Decreased { from: 220, to: 176 }
        );
    }

    #[test]
    async fn test_training_pass_skips_disabled_senders() {
        let engine = engine().await;
        let manual = seed_sender(&engine, 100, 500).await;
        let disabled = sender_with_mode(&engine, 100, TrainingMode::Disabled).await;
        let trainer = trainer(&engine, TrainingMode::Manual);

        let report = trainer.run_sender_training(Utc::now()).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.increased, 1);
        assert_eq!(report.errors, 0);

        assert_eq!(
            trainer.train_sender(&disabled, Utc::now()).await.unwrap(),
            TrainingDecision::Disabled
        );
        let manual_cap = engine.senders.get_capacity(&manual).await.unwrap();
        let disabled_cap = engine.senders.get_capacity(&disabled).await.unwrap();
        assert_eq!(manual_cap.current_daily_limit, 110);
        assert_eq!(disabled_cap.current_daily_limit, 100);
    }

    #[test]
    async fn test_default_mode_applies_to_senders_without_one() {
        let engine = engine().await;
        let sender_id = seed_sender(&engine, 100, 500).await;
        let trainer = trainer(&engine, TrainingMode::Disabled);

        assert_eq!(
            trainer.train_sender(&sender_id, Utc::now()).await.unwrap(),
            TrainingDecision::Disabled
        );
    }

    #[test]
    async fn test_admin_reset_is_bounded_by_max() {
        let engine = engine().await;
        let sender_id = seed_sender(&engine, 300, 500).await;

        let capacity = engine.senders.reset_limit(&sender_id, 50).await.unwrap();
        assert_eq!(capacity.current_daily_limit, 50);

        let err = engine.senders.reset_limit(&sender_id, 501).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = engine.senders.reset_limit("ghost", 10).await.unwrap_err();
        assert!(matches!(err, EngineError::SenderNotFound(_)));
    }

    #[test]
    async fn test_ledger_signal_needs_a_sample() {
        let engine = engine().await;
        let (_, sender_id) = started_campaign(&engine, 3, 100).await;
        drain(&engine).await;

        let signal = LedgerReputationSignal::new(engine.pool.clone());
        assert_eq!(
            signal.get_health_score(&sender_id).await.unwrap(),
            HealthScore::Degraded
        );
    }

    #[test]
    async fn test_http_signal_gives_up_on_a_silent_api() {
        // Acepta conexiones y nunca responde
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let signal =
            HttpReputationSignal::new(format!("http://{addr}"), StdDuration::from_millis(200))
                .unwrap();
        let result = tokio::time::timeout(
            StdDuration::from_secs(5),
            signal.get_health_score("sender-1"),
        )
        .await
        .expect("reputation call must not hang");
        assert!(result.is_err());

        server.abort();
    }
}
