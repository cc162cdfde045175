//! Production HTTP implementation of [`RecipeApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{Config, CONNECTION_POOL_SIZE};
use crate::error::ApiError;
use crate::types::{Food, IngredientPatch, ParsedHint, Recipe, Unit};

use super::backoff::BackoffPolicy;
use super::{NewFood, NewUnit, RecipeApi};

/// Page size for catalog and recipe listings.
const PAGE_SIZE: u32 = 100;

/// Configuration for [`HttpRecipeClient`].
#[derive(Clone)]
pub struct HttpRecipeClientBuilder {
    base_url: String,
    token: String,
    timeout: Duration,
    max_retries: u32,
    max_in_flight: usize,
}

impl HttpRecipeClientBuilder {
    /// Start a builder for the given server and bearer token.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            max_in_flight: CONNECTION_POOL_SIZE,
        }
    }

    /// Set the per-request total deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the transient retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<HttpRecipeClient, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        Ok(HttpRecipeClient {
            inner: Arc::new(ClientInner {
                http,
                base_url: self.base_url.trim_end_matches('/').to_string(),
                token: self.token,
                timeout: self.timeout,
                backoff: BackoffPolicy::new(self.max_retries),
                pool: Semaphore::new(self.max_in_flight),
            }),
        })
    }
}

/// HTTP client for the recipe server.
///
/// Cheap to clone; all clones share one connection pool, bounded to at most
/// [`CONNECTION_POOL_SIZE`] simultaneous requests. The bearer token is
/// injected once at construction and never logged.
#[derive(Clone)]
pub struct HttpRecipeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
    backoff: BackoffPolicy,
    pool: Semaphore,
}

/// One page of a paginated listing.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

/// Recipe summary as returned by the list endpoint (no ingredients).
#[derive(Debug, Clone, Deserialize)]
struct RecipeSummary {
    slug: String,
}

#[derive(Debug, serde::Serialize)]
struct ParseRequest<'a> {
    parser: &'a str,
    ingredients: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ParsedItem {
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    confidence: Option<ParseConfidence>,
    #[serde(default)]
    ingredient: Option<ParsedIngredientBody>,
}

#[derive(Debug, Deserialize)]
struct ParseConfidence {
    #[serde(default)]
    average: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ParsedIngredientBody {
    #[serde(default)]
    unit: Option<ParsedName>,
    #[serde(default)]
    food: Option<ParsedName>,
}

#[derive(Debug, Deserialize)]
struct ParsedName {
    #[serde(default)]
    name: Option<String>,
}

impl HttpRecipeClient {
    /// Build a client from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        HttpRecipeClientBuilder::new(&config.server_url, &config.api_token)
            .timeout(config.request_timeout)
            .max_retries(config.max_retries)
            .build()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    /// Send a request, retrying transient failures with jittered backoff.
    ///
    /// `make` rebuilds the request for each attempt. When `idempotent` is set
    /// a single `Idempotency-Key` is generated up front and reused across
    /// retries so a duplicate delivery cannot create a second entity.
    async fn send<F>(
        &self,
        operation: &'static str,
        idempotent: bool,
        make: F,
    ) -> Result<reqwest::Response, ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let _permit = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|_| ApiError::Network("connection pool closed".to_string()))?;

        let idempotency_key = idempotent.then(|| Uuid::new_v4().to_string());
        let mut attempt: u32 = 0;

        loop {
            let mut request = make().bearer_auth(&self.inner.token);
            if let Some(key) = &idempotency_key {
                request = request.header("Idempotency-Key", key.clone());
            }

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if attempt > 0 {
                            tracing::debug!(operation, attempt, "request succeeded after retry");
                        }
                        return Ok(response);
                    }

                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);

                    let body = response.text().await.unwrap_or_default();
                    let error = ApiError::Status {
                        operation,
                        status: status.as_u16(),
                        body,
                    };

                    if error.kind().is_transient() && attempt < self.inner.backoff.max_retries {
                        let delay = self.inner.backoff.delay(attempt, retry_after);
                        tracing::warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    error
                }
                Err(e) => {
                    let error = if e.is_timeout() {
                        ApiError::Timeout(self.inner.timeout)
                    } else {
                        ApiError::Network(e.to_string())
                    };
                    if attempt < self.inner.backoff.max_retries {
                        let delay = self.inner.backoff.delay(attempt, None);
                        tracing::warn!(
                            operation,
                            error = %error,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "network failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    error
                }
            };

            tracing::error!(operation, attempts = attempt + 1, error = %error, "request failed");
            return Err(error);
        }
    }

    /// Send and decode a JSON response.
    async fn send_json<T, F>(
        &self,
        operation: &'static str,
        idempotent: bool,
        make: F,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let response = self.send(operation, idempotent, make).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Walk every page of a listing endpoint.
    async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut page: u32 = 1;
        loop {
            let url = self.url(path);
            let body: Page<T> = self
                .send_json(operation, false, || {
                    self.inner.http.get(url.as_str()).query(&[
                        ("page", page.to_string()),
                        ("perPage", PAGE_SIZE.to_string()),
                    ])
                })
                .await?;
            let fetched = body.items.len();
            items.extend(body.items);
            tracing::debug!(operation, page, fetched, "fetched page");
            if body.next.is_none() || fetched == 0 {
                break;
            }
            page += 1;
        }
        Ok(items)
    }
}

#[async_trait]
impl RecipeApi for HttpRecipeClient {
    async fn list_recipes(&self) -> Result<Vec<Recipe>, ApiError> {
        // The list endpoint returns summaries without ingredients, so every
        // recipe is hydrated via its detail endpoint. Concurrency is bounded
        // by the shared connection pool.
        let summaries: Vec<RecipeSummary> = self.fetch_all_pages("list recipes", "/recipes").await?;
        tracing::info!(count = summaries.len(), "fetched recipe listing");

        let mut tasks = JoinSet::new();
        for summary in summaries {
            let client = self.clone();
            tasks.spawn(async move { client.get_recipe(&summary.slug).await });
        }

        let mut recipes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let recipe = joined
                .map_err(|e| ApiError::Network(format!("detail fetch task failed: {}", e)))??;
            recipes.push(recipe);
        }
        Ok(recipes)
    }

    async fn get_recipe(&self, slug: &str) -> Result<Recipe, ApiError> {
        let url = self.url(&format!("/recipes/{}", slug));
        self.send_json("get recipe", false, || self.inner.http.get(url.as_str()))
            .await
    }

    async fn list_units(&self) -> Result<Vec<Unit>, ApiError> {
        self.fetch_all_pages("list units", "/units").await
    }

    async fn list_foods(&self) -> Result<Vec<Food>, ApiError> {
        self.fetch_all_pages("list foods", "/foods").await
    }

    async fn create_unit(&self, unit: &NewUnit) -> Result<Unit, ApiError> {
        let url = self.url("/units");
        let result = self
            .send_json("create unit", true, || {
                self.inner.http.post(url.as_str()).json(unit)
            })
            .await;

        match result {
            Ok(created) => {
                tracing::info!(name = %unit.name, "created unit");
                Ok(created)
            }
            // A retried create can conflict with its own first delivery; if
            // the server echoes the existing entity, that is our result.
            Err(ApiError::Status {
                operation,
                status: 409,
                body,
            }) => match serde_json::from_str::<Unit>(&body) {
                Ok(existing) => {
                    tracing::info!(name = %unit.name, id = %existing.id, "unit already existed");
                    Ok(existing)
                }
                Err(_) => Err(ApiError::Status {
                    operation,
                    status: 409,
                    body,
                }),
            },
            Err(e) => Err(e),
        }
    }

    async fn create_food(&self, food: &NewFood) -> Result<Food, ApiError> {
        let url = self.url("/foods");
        let result = self
            .send_json("create food", true, || {
                self.inner.http.post(url.as_str()).json(food)
            })
            .await;

        match result {
            Ok(created) => {
                tracing::info!(name = %food.name, "created food");
                Ok(created)
            }
            Err(ApiError::Status {
                operation,
                status: 409,
                body,
            }) => match serde_json::from_str::<Food>(&body) {
                Ok(existing) => {
                    tracing::info!(name = %food.name, id = %existing.id, "food already existed");
                    Ok(existing)
                }
                Err(_) => Err(ApiError::Status {
                    operation,
                    status: 409,
                    body,
                }),
            },
            Err(e) => Err(e),
        }
    }

    async fn add_food_alias(&self, food_id: &str, alias: &str) -> Result<Food, ApiError> {
        let url = self.url(&format!("/foods/{}", food_id));
        let mut food: Food = self
            .send_json("get food", false, || self.inner.http.get(url.as_str()))
            .await?;

        if food.has_alias(alias) {
            tracing::debug!(food = %food.name, alias, "alias already present");
            return Ok(food);
        }

        food.aliases.push(crate::types::EntityAlias::new(alias));
        let updated: Food = self
            .send_json("update food", true, || {
                self.inner.http.put(url.as_str()).json(&food)
            })
            .await?;
        tracing::info!(food = %updated.name, alias, "added food alias");
        Ok(updated)
    }

    async fn update_ingredient(
        &self,
        recipe_id: &str,
        ingredient_id: &str,
        patch: &IngredientPatch,
    ) -> Result<(), ApiError> {
        // Read-modify-write against the per-ingredient endpoint: fetch the
        // current document, splice in the new references, and put it back.
        let url = self.url(&format!("/recipes/ingredients/{}", ingredient_id));
        let mut body: serde_json::Value = self
            .send_json("get ingredient", false, || self.inner.http.get(url.as_str()))
            .await?;

        if let Some(unit_id) = &patch.unit_id {
            body["unit"] = serde_json::json!({ "id": unit_id });
        }
        if let Some(food_id) = &patch.food_id {
            body["food"] = serde_json::json!({ "id": food_id });
        }

        self.send("update ingredient", true, || {
            self.inner.http.put(url.as_str()).json(&body)
        })
        .await?;
        tracing::debug!(recipe_id, ingredient_id, "updated ingredient");
        Ok(())
    }

    async fn parse_note(&self, text: &str) -> Result<ParsedHint, ApiError> {
        let url = self.url("/parser/ingredients");
        let request = ParseRequest {
            parser: "nlp",
            ingredients: vec![text],
        };
        let items: Vec<ParsedItem> = self
            .send_json("parse note", false, || {
                self.inner.http.post(url.as_str()).json(&request)
            })
            .await?;

        let item = items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::InvalidResponse("empty parser response".to_string()))?;

        let body = item.ingredient.unwrap_or(ParsedIngredientBody {
            unit: None,
            food: None,
        });
        Ok(ParsedHint {
            input: item.input.unwrap_or_else(|| text.to_string()),
            unit_name: body.unit.and_then(|u| u.name),
            food_name: body.food.and_then(|f| f.name),
            confidence: item.confidence.and_then(|c| c.average),
        })
    }
}
