//! Article listing backed by the headless CMS.
//!
//! One parameterized query per page; the CMS does filtering, ordering and counting.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;

pub const MAX_PAGE_SIZE: usize = 100;

const ARTICLE_FILTER: &str = r#"_type == "article" && defined(slug.current) && ($category == "" || category->slug.current == $category) && ($tag == "" || $tag in tags[]->slug.current)"#;

const ARTICLE_PROJECTION: &str = r#"{ "id": _id, title, "slug": slug.current, excerpt, publishedAt, "category": category->title, "tags": coalesce(tags[]->title, []), "coverImage": mainImage.asset->url }"#;

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("CMS is not configured")]
    Disabled,

    #[error("CMS request failed: {0}")]
    Network(String),

    #[error("CMS returned status {0}")]
    Status(u16),

    #[error("unexpected CMS response: {0}")]
    Parse(String),
}

impl From<ureq::Error> for CmsError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => CmsError::Status(code),
            ureq::Error::Transport(transport) => CmsError::Network(transport.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleQuery {
    pub offset: usize,
    pub limit: usize,
    /// category slug; empty means no filter
    pub category: Option<String>,
    /// tag slug; empty means no filter
    pub tag: Option<String>,
}

impl ArticleQuery {
    fn filter_value(value: &Option<String>) -> String {
        value
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }

    /// `(name, JSON-encoded value)` pairs for the query string.
    pub fn params(&self) -> Vec<(String, String)> {
        let limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        let json = |v: serde_json::Value| v.to_string();
        vec![
            ("query".into(), article_query()),
            ("$start".into(), json(self.offset.into())),
            ("$end".into(), json((self.offset + limit).into())),
            ("$category".into(), json(Self::filter_value(&self.category).into())),
            ("$tag".into(), json(Self::filter_value(&self.tag).into())),
        ]
    }
}

pub fn article_query() -> String {
    format!(
        r#"{{ "articles": *[{ARTICLE_FILTER}] | order(publishedAt desc) [$start...$end] {ARTICLE_PROJECTION}, "total": count(*[{ARTICLE_FILTER}]) }}"#
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub excerpt: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticlePage {
    pub articles: Vec<Article>,
    pub total: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    result: ArticlePage,
}

pub struct CmsClient {
    agent: ureq::Agent,
    query_url: String,
    token: Option<String>,
    page_size: usize,
}

impl CmsClient {
    pub fn new(config: &config::Cms, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            query_url: config.query_url.clone(),
            token: config.token.clone(),
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn articles(&self, query: &ArticleQuery) -> Result<ArticlePage, CmsError> {
        let mut request = self
            .agent
            .get(&self.query_url)
            .set("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        for (name, value) in query.params() {
            request = request.query(&name, &value);
        }

        let response: QueryResponse = request
            .call()?
            .into_json()
            .map_err(|e| CmsError::Parse(e.to_string()))?;
        debug!(
            "CMS returned {} of {} articles",
            response.result.articles.len(),
            response.result.total
        );
        Ok(response.result)
    }
}

#[cfg(test)]
mod tests {
    use rouille::{Response, Server};
    use serde_json::json;

    use super::*;

    fn param<'a>(params: &'a [(String, String)], name: &str) -> &'a str {
        params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn test_params_are_json_encoded() {
        let query = ArticleQuery {
            offset: 20,
            limit: 10,
            category: Some("news".into()),
            tag: None,
        };

        let params = query.params();

        assert_eq!(param(&params, "$start"), "20");
        assert_eq!(param(&params, "$end"), "30");
        assert_eq!(param(&params, "$category"), "\"news\"");
        assert_eq!(param(&params, "$tag"), "\"\"");
        assert!(param(&params, "query").contains("order(publishedAt desc)"));
    }

    #[test]
    fn test_limit_is_clamped() {
        let params = ArticleQuery {
            offset: 0,
            limit: 1000,
            ..Default::default()
        }
        .params();
        assert_eq!(param(&params, "$end"), "100");

        let params = ArticleQuery::default().params();
        assert_eq!(param(&params, "$end"), "1");
    }

    #[test]
    fn test_blank_filters_mean_no_filter() {
        let params = ArticleQuery {
            category: Some("  ".into()),
            tag: Some(String::new()),
            ..Default::default()
        }
        .params();

        assert_eq!(param(&params, "$category"), "\"\"");
        assert_eq!(param(&params, "$tag"), "\"\"");
    }

    #[test]
    fn test_client_decodes_page() -> anyhow::Result<()> {
        let server = Server::new("127.0.0.1:0", |request| {
            if request.header("Authorization") != Some("Bearer secret") {
                return Response::text("unauthorized").with_status_code(401);
            }
            let title = if request.raw_query_string().contains("%22live%22") {
                "Tagged"
            } else {
                "Untagged"
            };
            Response::json(&json!({
                "result": {
                    "articles": [{
                        "id": "a1",
                        "title": title,
                        "slug": "first-post",
                        "excerpt": null,
                        "publishedAt": "2024-05-01T10:00:00Z",
                        "category": "News",
                        "tags": ["Live"],
                        "coverImage": null
                    }],
                    "total": 41
                }
            }))
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;
        let addr = server.server_addr();
        let (handle, stop) = server.stoppable();

        let client = CmsClient::new(
            &config::Cms {
                query_url: format!("http://{addr}/query"),
                token: Some("secret".into()),
                page_size: 10,
            },
            Duration::from_secs(2),
        );
        let page = client.articles(&ArticleQuery {
            offset: 0,
            limit: 10,
            category: None,
            tag: Some("live".into()),
        });

        let _ = stop.send(());
        let _ = handle.join();

        let page = page?;
        assert_eq!(page.total, 41);
        assert_eq!(page.articles.len(), 1);
        assert_eq!(page.articles[0].title, "Tagged");
        assert_eq!(page.articles[0].tags, vec!["Live".to_string()]);
        assert!(page.articles[0].published_at.is_some());
        Ok(())
    }

    #[test]
    fn test_client_maps_status() -> anyhow::Result<()> {
        let server = Server::new("127.0.0.1:0", |_request| {
            Response::text("nope").with_status_code(500)
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;
        let addr = server.server_addr();
        let (handle, stop) = server.stoppable();

        let client = CmsClient::new(
            &config::Cms {
                query_url: format!("http://{addr}/query"),
                token: None,
                page_size: 10,
            },
            Duration::from_secs(2),
        );
        let result = client.articles(&ArticleQuery::default());

        let _ = stop.send(());
        let _ = handle.join();

        assert!(matches!(result, Err(CmsError::Status(500))));
        Ok(())
    }
}
