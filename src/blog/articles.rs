use crate::auth::is_admin;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::state::AppState;
use crate::types::{is_valid_id, now_rfc3339};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const WORDS_PER_MINUTE: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlogArticle {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub read_minutes: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInput {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
    pub cover_image: Option<String>,
    pub published: Option<bool>,
}

/// Estimated reading time in whole minutes, never below one.
pub fn read_minutes(content: &str) -> u32 {
    let words = content.split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

/// Derive a slug from a title: lowercase ASCII alphanumerics joined by '-'.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').chars().take(96).collect()
}

impl BlogArticle {
    /// Set `published_at` the first time the article is published.
    fn apply_publish(&mut self, published: bool, now: &str) {
        self.published = published;
        if published && self.published_at.is_none() {
            self.published_at = Some(now.to_string());
        }
    }

    fn sort_key(&self) -> &str {
        self.published_at.as_deref().unwrap_or(&self.created_at)
    }
}

/// Newest first by publication date, drafts by creation date.
pub fn sort_newest_first(articles: &mut [BlogArticle]) {
    articles.sort_by(|a, b| b.sort_key().cmp(a.sort_key()));
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub drafts: bool,
    pub tag: Option<String>,
}

/// GET /api/blog - Published articles, newest first. Admins may pass
/// `?drafts=true` to include unpublished ones.
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<BlogArticle>>> {
    let include_drafts = params.drafts && is_admin(&headers, &state);
    let mut articles: Vec<BlogArticle> = state.articles.list().await?;
    articles.retain(|a| include_drafts || a.published);
    if let Some(tag) = params.tag.as_deref().filter(|t| !t.is_empty()) {
        articles.retain(|a| a.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)));
    }
    sort_newest_first(&mut articles);
    Ok(Json(articles))
}

/// GET /api/blog/{slug} - Drafts are only visible to admins.
pub async fn get_article(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> AppResult<Json<BlogArticle>> {
    let article: BlogArticle = state.articles.require(&slug).await?;
    if !article.published && !is_admin(&headers, &state) {
        return Err(AppError::NotFound(format!("article {slug} not found")));
    }
    Ok(Json(article))
}

/// POST /api/blog
pub async fn create_article(
    State(state): State<Arc<AppState>>,
    LoggedJson(input): LoggedJson<ArticleInput>,
) -> AppResult<(StatusCode, Json<BlogArticle>)> {
    let title = input.title.unwrap_or_default().trim().to_string();
    if title.is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    let slug = match input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.to_string(),
        None => slugify(&title),
    };
    if !is_valid_id(&slug) {
        return Err(AppError::Validation(format!("invalid slug: {slug:?}")));
    }
    if state.articles.exists(&slug).await? {
        return Err(AppError::Validation(format!("article {slug} already exists")));
    }

    let now = now_rfc3339();
    let content = input.content.unwrap_or_default();
    let mut article = BlogArticle {
        slug,
        title,
        excerpt: input.excerpt.unwrap_or_default(),
        read_minutes: read_minutes(&content),
        content,
        author: input.author.unwrap_or_default(),
        tags: input.tags.unwrap_or_default(),
        cover_image: input.cover_image,
        published: false,
        published_at: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };
    article.apply_publish(input.published.unwrap_or(false), &now);

    state.articles.put(&article.slug, &article).await?;
    Ok((StatusCode::CREATED, Json(article)))
}

/// PUT /api/blog/{slug} - Partial update. The slug itself cannot change.
pub async fn update_article(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    LoggedJson(input): LoggedJson<ArticleInput>,
) -> AppResult<Json<BlogArticle>> {
    let mut article: BlogArticle = state.articles.require(&slug).await?;
    let now = now_rfc3339();

    if let Some(title) = input.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("title cannot be empty".to_string()));
        }
        article.title = title;
    }
    if let Some(excerpt) = input.excerpt {
        article.excerpt = excerpt;
    }
    if let Some(content) = input.content {
        article.read_minutes = read_minutes(&content);
        article.content = content;
    }
    if let Some(author) = input.author {
        article.author = author;
    }
    if let Some(tags) = input.tags {
        article.tags = tags;
    }
    if input.cover_image.is_some() {
        article.cover_image = input.cover_image;
    }
    if let Some(published) = input.published {
        article.apply_publish(published, &now);
    }
    article.updated_at = now;

    state.articles.put(&slug, &article).await?;
    Ok(Json(article))
}

/// DELETE /api/blog/{slug}
pub async fn delete_article(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<Value>> {
    state.articles.delete(&slug).await?;
    Ok(Json(serde_json::json!({ "deleted": slug })))
}
