//! collaborators/content.rs
//! Render simple de plantillas: sustitución de variables + pixel de apertura
//! + link de unsubscribe.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};

use super::{ContentResolver, RenderedContent};

#[derive(Debug, Clone)]
pub struct TemplateContentResolver {
    db_pool: Pool<Sqlite>,
    tracking_base_url: String,
}

impl TemplateContentResolver {
    pub fn new(db_pool: Pool<Sqlite>, tracking_base_url: impl Into<String>) -> Self {
        Self {
            db_pool,
            tracking_base_url: tracking_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

pub fn render_template(
    template: &str,
    recipient: &str,
    tracking_base_url: &str,
    tracking_id: &str,
) -> String {
    let body = template.replace("{{email}}", recipient);
    let unsubscribe_url = format!("{tracking_base_url}/api/tracking/{tracking_id}/unsubscribe");
    let pixel_url = format!("{tracking_base_url}/api/tracking/{tracking_id}/open");
    let body = body.replace("{{unsubscribe_url}}", &unsubscribe_url);

    format!(
        "{body}\n<p style=\"font-size:11px\"><a href=\"{unsubscribe_url}\">Unsubscribe</a></p>\
         \n<img src=\"{pixel_url}\" width=\"1\" height=\"1\" alt=\"\" />"
    )
}

#[async_trait]
impl ContentResolver for TemplateContentResolver {
    async fn render(
        &self,
        campaign_id: &str,
        variant_id: Option<&str>,
        recipient: &str,
        tracking_id: &str,
    ) -> Result<RenderedContent> {
        let (subject, content): (String, String) = match variant_id {
            Some(variant_id) => sqlx::query_as(
                "SELECT subject, content FROM campaign_variants WHERE id = ?1 AND campaign_id = ?2",
            )
            .bind(variant_id)
            .bind(campaign_id)
            .fetch_one(&self.db_pool)
            .await
            .context("Variant not found")?,
            None => sqlx::query_as("SELECT subject, content FROM campaigns WHERE id = ?1")
                .bind(campaign_id)
                .fetch_one(&self.db_pool)
                .await
                .context("Campaign not found")?,
        };

        Ok(RenderedContent {
            subject: subject.replace("{{email}}", recipient),
            html: render_template(&content, recipient, &self.tracking_base_url, tracking_id),
        })
    }
}
