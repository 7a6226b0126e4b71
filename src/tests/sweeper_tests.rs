//! tests/sweeper_tests.rs
//! Sweeper de reconciliación: autocuración de campañas huérfanas.

#[cfg(test)]
mod tests {
    use actix_rt::test;
    use chrono::{Duration, Utc};

    use crate::models::{
        campaign_model::CampaignStatus, queue_model::SendTask, tracking_model::DeliveryOutcome,
    };
    use crate::tests::support::*;

    /// Procesa los envíos como un worker que se cae justo después de escribir
    /// el ledger, antes del chequeo de finalización.
    async fn send_without_completion_check(engine: &TestEngine, limit: usize) {
        for _ in 0..limit {
            let Some(job) = engine.queue.claim_next(Utc::now()).await.unwrap() else {
                return;
            };
            let task: SendTask = serde_json::from_str(&job.payload).unwrap();
            engine
                .tracking
                .record_outcome(
                    &task.campaign_id,
                    &task.tracking_id,
                    &DeliveryOutcome::Sent,
                    Utc::now(),
                )
                .await
                .unwrap();
            engine.queue.complete(&job.id).await.unwrap();
        }
    }

    async fn dispatched_campaign(engine: &TestEngine, count: usize) -> String {
        let (campaign_id, _) = started_campaign(engine, count, 100).await;
        assert!(engine.worker.process_next(Utc::now()).await.unwrap());
        assert_eq!(status_of(engine, &campaign_id).await, CampaignStatus::Sending);
        campaign_id
    }

    #[test]
    async fn test_crash_before_completion_check_is_completed_by_sweep() {
        let engine = engine().await;
        let campaign_id = dispatched_campaign(&engine, 3).await;
        send_without_completion_check(&engine, 3).await;
        assert_eq!(status_of(&engine, &campaign_id).await, CampaignStatus::Sending);

        let report = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        assert_eq!(report.completed, 1);

        let campaign = engine.campaigns.get_campaign(&campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert!(campaign.completed_at.is_some());

        let audit = engine.sweeper.list_audit(&campaign_id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].0, "completed_by_sweep");
    }

    #[test]
    async fn test_sweep_is_idempotent() {
        let engine = engine().await;
        let campaign_id = dispatched_campaign(&engine, 2).await;
        send_without_completion_check(&engine, 2).await;

        let first = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        assert_eq!(first.corrective_actions(), 1);
        let second = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        assert_eq!(second.corrective_actions(), 0);
        assert_eq!(second.campaigns_examined, 0);

        assert_eq!(engine.sweeper.list_audit(&campaign_id).await.unwrap().len(), 1);
    }

    #[test]
    async fn test_consistent_campaign_is_left_alone() {
        let engine = engine().await;
        let campaign_id = dispatched_campaign(&engine, 2).await;
        send_without_completion_check(&engine, 1).await;

        let before = engine.campaigns.get_campaign(&campaign_id).await.unwrap();
        let report = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        let after = engine.campaigns.get_campaign(&campaign_id).await.unwrap();

        assert_eq!(report.campaigns_examined, 1);
        assert_eq!(report.corrective_actions(), 0);
        assert_eq!(before.version, after.version);
        assert_eq!(after.status, CampaignStatus::Sending);
    }

    #[test]
    async fn test_stalled_campaign_with_lost_sends_fails() {
        let engine = engine().await;
        let campaign_id = dispatched_campaign(&engine, 2).await;
        send_without_completion_check(&engine, 1).await;
        // El job restante se pierde
        assert_eq!(engine.queue.purge_campaign(&campaign_id).await.unwrap(), 1);

        // Todavía dentro del umbral: nada que hacer
        let report = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        assert_eq!(report.corrective_actions(), 0);

        let later = Utc::now() + Duration::hours(3);
        let report = engine.sweeper.run_reconciliation_sweep(later).await.unwrap();
        assert_eq!(report.failed, 1);

        let campaign = engine.campaigns.get_campaign(&campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert!(campaign.completed_at.is_none());
        let audit = engine.sweeper.list_audit(&campaign_id).await.unwrap();
        assert_eq!(audit[0].0, "failed_stalled");
    }

    #[test]
    async fn test_stalled_campaign_with_open_jobs_is_not_touched() {
        let engine = engine().await;
        let campaign_id = dispatched_campaign(&engine, 2).await;

        let later = Utc::now() + Duration::hours(3);
        let report = engine.sweeper.run_reconciliation_sweep(later).await.unwrap();
        assert_eq!(report.corrective_actions(), 0);
        assert_eq!(status_of(&engine, &campaign_id).await, CampaignStatus::Sending);
    }

    #[test]
    async fn test_counters_are_rederived_from_the_ledger() {
        let engine = engine().await;
        let campaign_id = dispatched_campaign(&engine, 3).await;
        send_without_completion_check(&engine, 2).await;

        sqlx::query("UPDATE campaigns SET total_sent = 0 WHERE id = ?1")
            .bind(&campaign_id)
            .execute(&engine.pool)
            .await
            .unwrap();

        let report = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        assert_eq!(report.counters_repaired, 1);
        assert_eq!(report.completed, 0);

        let campaign = engine.campaigns.get_campaign(&campaign_id).await.unwrap();
        assert_eq!(campaign.total_sent, 2);
        assert_eq!(campaign.status, CampaignStatus::Sending);
        let audit = engine.sweeper.list_audit(&campaign_id).await.unwrap();
        assert_eq!(audit[0].0, "counters_repaired");
    }

    #[test]
    async fn test_completed_without_timestamp_is_backfilled() {
        let engine = engine().await;
        let (campaign_id, _) = started_campaign(&engine, 2, 100).await;
        drain(&engine).await;

        sqlx::query("UPDATE campaigns SET completed_at = NULL WHERE id = ?1")
            .bind(&campaign_id)
            .execute(&engine.pool)
            .await
            .unwrap();

        let report = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        assert_eq!(report.completed_at_backfilled, 1);

        let campaign = engine.campaigns.get_campaign(&campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.completed_at, Some(campaign.updated_at));
    }

    #[test]
    async fn test_lost_dispatch_is_requeued() {
        let engine = engine().await;
        let (campaign_id, _) = started_campaign(&engine, 4, 100).await;
        // El job de dispatch se pierde antes de correr
        assert_eq!(engine.queue.purge_campaign(&campaign_id).await.unwrap(), 1);

        let report = engine.sweeper.run_reconciliation_sweep(Utc::now()).await.unwrap();
        assert_eq!(report.dispatch_requeued, 1);

        drain(&engine).await;
        let campaign = engine.campaigns.get_campaign(&campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.total_sent, 4);
    }

    #[test]
    async fn test_expired_lease_is_released() {
        let engine = engine().await;
        let (campaign_id, _) = started_campaign(&engine, 1, 100).await;

        // Un worker reclama el dispatch y muere
        let job = engine.queue.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);

        let later = Utc::now() + Duration::minutes(30);
        let report = engine.sweeper.run_reconciliation_sweep(later).await.unwrap();
        assert_eq!(report.stale_jobs_released, 1);

        drain_at(&engine, later).await;
        assert_eq!(status_of(&engine, &campaign_id).await, CampaignStatus::Completed);
    }

    #[test]
    async fn test_paused_campaign_is_completed_only_after_resume() {
        let engine = engine().await;
        let campaign_id = dispatched_campaign(&engine, 2).await;
        engine.campaigns.pause_campaign(&campaign_id).await.unwrap();
        drain(&engine).await;

        let report = engine
            .sweeper
            .run_reconciliation_sweep(Utc::now() + Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(report.corrective_actions(), 0);
        assert_eq!(status_of(&engine, &campaign_id).await, CampaignStatus::Paused);

        let resumed = engine.campaigns.resume_campaign(&campaign_id).await.unwrap();
        assert_eq!(resumed.status, CampaignStatus::Completed);
    }
}
