//! tests/tracking_tests.rs
//! Ledger de tracking: resultados idempotentes y beacons.

#[cfg(test)]
mod tests {
    use actix_rt::test;
    use chrono::{Duration, Utc};

    use crate::collaborators::{
        content::{render_template, TemplateContentResolver},
        suppression::DbSuppressionOracle,
        ContentResolver, SuppressionOracle,
    };
    use crate::errors::EngineError;
    use crate::models::tracking_model::{BeaconKind, DeliveryOutcome};
    use crate::tests::support::*;

    #[test]
    async fn test_outcome_is_written_once() {
        let engine = engine().await;
        let (campaign_id, _) = started_campaign(&engine, 2, 100).await;
        let record = engine
            .tracking
            .get(&campaign_id, "user000@example.com")
            .await
            .unwrap()
            .unwrap();

        let now = Utc::now();
        assert!(engine
            .tracking
            .record_outcome(&campaign_id, &record.id, &DeliveryOutcome::Sent, now)
            .await
            .unwrap());
        assert!(!engine
            .tracking
            .record_outcome(&campaign_id, &record.id, &DeliveryOutcome::Sent, now)
            .await
            .unwrap());
        assert!(!engine
            .tracking
            .record_outcome(
                &campaign_id,
                &record.id,
                &DeliveryOutcome::Failed("late".to_string()),
                now
            )
            .await
            .unwrap());

        let campaign = engine.campaigns.get_campaign(&campaign_id).await.unwrap();
        assert_eq!((campaign.total_sent, campaign.total_failed), (1, 0));

        let record = engine.tracking.get_by_tracking_id(&record.id).await.unwrap().unwrap();
        assert!(record.sent_at.is_some());
        assert!(record.failed_at.is_none());
    }

    #[test]
    async fn test_beacon_before_send_is_rejected() {
        let engine = engine().await;
        let (campaign_id, _) = started_campaign(&engine, 1, 100).await;
        let record = engine
            .tracking
            .get(&campaign_id, "user000@example.com")
            .await
            .unwrap()
            .unwrap();

        let err = engine
            .tracking
            .record_beacon(&record.id, BeaconKind::Open, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BeaconBeforeSend(_)));

        let err = engine
            .tracking
            .record_beacon("missing", BeaconKind::Open, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TrackingNotFound(_)));
    }

    #[test]
    async fn test_open_keeps_first_timestamp_and_click_implies_open() {
        let engine = engine().await;
        let (campaign_id, _) = started_campaign(&engine, 2, 100).await;
        drain(&engine).await;
        let record = engine
            .tracking
            .get(&campaign_id, "user000@example.com")
            .await
            .unwrap()
            .unwrap();

        let first = Utc::now();
        let opened = engine
            .tracking
            .record_beacon(&record.id, BeaconKind::Open, first)
            .await
            .unwrap();
        let reopened = engine
            .tracking
            .record_beacon(&record.id, BeaconKind::Open, first + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(opened.opened_at, reopened.opened_at);

        let other = engine
            .tracking
            .get(&campaign_id, "user001@example.com")
            .await
            .unwrap()
            .unwrap();
        let clicked = engine
            .tracking
            .record_beacon(&other.id, BeaconKind::Click, Utc::now())
            .await
            .unwrap();
        assert!(clicked.clicked_at.is_some());
        assert_eq!(clicked.opened_at, clicked.clicked_at);
    }

    #[test]
    async fn test_unsubscribe_adds_to_suppression_list() {
        let engine = engine().await;
        let (campaign_id, _) = started_campaign(&engine, 1, 100).await;
        drain(&engine).await;
        let record = engine
            .tracking
            .get(&campaign_id, "user000@example.com")
            .await
            .unwrap()
            .unwrap();

        let updated = engine
            .tracking
            .record_beacon(&record.id, BeaconKind::Unsubscribe, Utc::now())
            .await
            .unwrap();
        assert!(updated.unsubscribed_at.is_some());

        let oracle = DbSuppressionOracle::new(engine.pool.clone());
        assert!(oracle.is_suppressed("USER000@example.com ").await.unwrap());

        let totals = engine.tracking.ledger_totals(&campaign_id).await.unwrap();
        assert_eq!(totals.unsubscribed, 1);
        assert_eq!(totals.sent, 1);
    }

    #[test]
    async fn test_outstanding_for_sender_counts_unresolved_assignments() {
        let engine = engine().await;
        let (campaign_id, sender_id) = started_campaign(&engine, 3, 100).await;
        assert_eq!(engine.tracking.outstanding_for_sender(&sender_id).await.unwrap(), 0);

        engine
            .dispatcher
            .dispatch_campaign(&campaign_id, Utc::now())
            .await
            .unwrap();
        assert_eq!(engine.tracking.outstanding_for_sender(&sender_id).await.unwrap(), 3);

        drain(&engine).await;
        assert_eq!(engine.tracking.outstanding_for_sender(&sender_id).await.unwrap(), 0);
    }

    #[test]
    async fn test_rendered_content_carries_tracking_links() {
        let html = render_template(
            "<p>Hola {{email}}</p><a href=\"{{unsubscribe_url}}\">baja</a>",
            "ana@example.com",
            "https://t.example.com",
            "abc123",
        );
        assert!(html.contains("Hola ana@example.com"));
        assert!(html.contains("https://t.example.com/api/tracking/abc123/unsubscribe"));
        assert!(html.contains("<img src=\"https://t.example.com/api/tracking/abc123/open\""));
    }

    #[test]
    async fn test_template_resolver_renders_campaign_and_variant() {
        let engine = engine().await;
        let sender_id = seed_sender(&engine, 100, 500).await;
        let mut request = campaign_request(recipients(1), vec![sender_id]);
        request.variants = Some(vec![variant("Oferta B", 1)]);
        let campaign = engine.campaigns.create_campaign(request).await.unwrap();
        let variants = engine.campaigns.variants(&campaign.id).await.unwrap();

        let resolver = TemplateContentResolver::new(engine.pool.clone(), "http://localhost:5022/");
        let base = resolver
            .render(&campaign.id, None, "ana@example.com", "t1")
            .await
            .unwrap();
        assert_eq!(base.subject, "Hello ana@example.com");
        assert!(base.html.contains("<p>Hi ana@example.com</p>"));
        assert!(base.html.contains("http://localhost:5022/api/tracking/t1/open"));

        let b = resolver
            .render(&campaign.id, Some(variants[0].id.as_str()), "ana@example.com", "t1")
            .await
            .unwrap();
        assert_eq!(b.subject, "Oferta B");
        assert!(b.html.contains("<p>Oferta B</p>"));
    }
}
