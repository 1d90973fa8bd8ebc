//! Workspace Service - projects and pages
//!
//! A user owns ordered projects; a project owns ordered pages. Listing an
//! empty container creates its default child, so the editor always has a
//! page to open. Deletes cascade in the store (project → pages → blocks and
//! history) and the last project, or the last page of a project, is kept.

use crate::db::{from_rows, to_row, Filter, PersistenceService, Query, Row, Table};
use crate::models::{Page, Project, DEFAULT_PAGE_NAME, DEFAULT_PROJECT_NAME};
use crate::services::error::{KeyThoughtsError, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Name for a page created without one
pub const UNTITLED_PAGE_NAME: &str = "Untitled";

/// Name for a project created without one
pub const UNTITLED_PROJECT_NAME: &str = "Untitled Project";

fn require_user(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(KeyThoughtsError::NotAuthenticated);
    }
    Ok(())
}

fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(KeyThoughtsError::invalid_input("name must not be empty"));
    }
    Ok(name.to_string())
}

fn patch(fields: &[(&str, Value)]) -> Row {
    let mut row: Row = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    row.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
    row
}

pub struct WorkspaceService {
    store: Arc<dyn PersistenceService>,
}

impl WorkspaceService {
    pub fn new(store: Arc<dyn PersistenceService>) -> Self {
        Self { store }
    }

    async fn select_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let rows = self
            .store
            .select(
                Table::Projects,
                &Query::new().eq("user_id", user_id).order_by("position", true),
            )
            .await?;
        Ok(from_rows(rows)?)
    }

    async fn select_pages(&self, user_id: &str, project_id: &str) -> Result<Vec<Page>> {
        let rows = self
            .store
            .select(
                Table::Pages,
                &Query::new()
                    .eq("user_id", user_id)
                    .eq("project_id", project_id)
                    .order_by("position", true),
            )
            .await?;
        Ok(from_rows(rows)?)
    }

    /// The user's projects by position; creates "My Project" when there are none
    pub async fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        require_user(user_id)?;
        let projects = self.select_projects(user_id).await?;
        if !projects.is_empty() {
            return Ok(projects);
        }

        tracing::info!("Creating default project for user {}", user_id);
        let project = Project::new(user_id, DEFAULT_PROJECT_NAME, 0);
        self.store.insert(Table::Projects, vec![to_row(&project)?]).await?;
        Ok(vec![project])
    }

    /// Append a project after the existing ones
    pub async fn create_project(&self, user_id: &str, name: Option<&str>) -> Result<Project> {
        require_user(user_id)?;
        let name = match name {
            Some(name) => clean_name(name)?,
            None => UNTITLED_PROJECT_NAME.to_string(),
        };
        let position = self.select_projects(user_id).await?.len() as i64;
        let project = Project::new(user_id, name, position);
        self.store.insert(Table::Projects, vec![to_row(&project)?]).await?;
        Ok(project)
    }

    pub async fn rename_project(&self, user_id: &str, project_id: &str, name: &str) -> Result<()> {
        require_user(user_id)?;
        let name = clean_name(name)?;
        let touched = self
            .store
            .update(
                Table::Projects,
                patch(&[("name", Value::String(name))]),
                &[Filter::eq("id", project_id), Filter::eq("user_id", user_id)],
            )
            .await?;
        if touched == 0 {
            return Err(KeyThoughtsError::project_not_found(project_id));
        }
        Ok(())
    }

    /// Delete a project with its pages and their blocks. The last project stays.
    pub async fn delete_project(&self, user_id: &str, project_id: &str) -> Result<()> {
        require_user(user_id)?;
        let projects = self.select_projects(user_id).await?;
        if !projects.iter().any(|p| p.id == project_id) {
            return Err(KeyThoughtsError::project_not_found(project_id));
        }
        if projects.len() <= 1 {
            return Err(KeyThoughtsError::last_project());
        }

        self.store
            .delete(
                Table::Projects,
                &[Filter::eq("id", project_id), Filter::eq("user_id", user_id)],
            )
            .await?;
        tracing::info!("Deleted project {}", project_id);
        Ok(())
    }

    /// Set project positions to their index in `ordered_ids`
    pub async fn reorder_projects(&self, user_id: &str, ordered_ids: &[String]) -> Result<()> {
        require_user(user_id)?;
        let known: HashSet<String> = self
            .select_projects(user_id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if let Some(unknown) = ordered_ids.iter().find(|id| !known.contains(*id)) {
            return Err(KeyThoughtsError::project_not_found(unknown.as_str()));
        }
        self.write_positions(Table::Projects, user_id, ordered_ids).await
    }

    /// Pages of a project by position; creates "Main" when there are none
    pub async fn list_pages(&self, user_id: &str, project_id: &str) -> Result<Vec<Page>> {
        require_user(user_id)?;
        let pages = self.select_pages(user_id, project_id).await?;
        if !pages.is_empty() {
            return Ok(pages);
        }

        tracing::info!("Creating default page for project {}", project_id);
        let page = Page::new(user_id, project_id, DEFAULT_PAGE_NAME, 0);
        self.store.insert(Table::Pages, vec![to_row(&page)?]).await?;
        Ok(vec![page])
    }

    /// Append a page to a project
    pub async fn create_page(&self, user_id: &str, project_id: &str, name: Option<&str>) -> Result<Page> {
        require_user(user_id)?;
        let name = match name {
            Some(name) => clean_name(name)?,
            None => UNTITLED_PAGE_NAME.to_string(),
        };
        let position = self.select_pages(user_id, project_id).await?.len() as i64;
        let page = Page::new(user_id, project_id, name, position);
        self.store.insert(Table::Pages, vec![to_row(&page)?]).await?;
        Ok(page)
    }

    pub async fn rename_page(&self, user_id: &str, page_id: &str, name: &str) -> Result<()> {
        require_user(user_id)?;
        let name = clean_name(name)?;
        let touched = self
            .store
            .update(
                Table::Pages,
                patch(&[("name", Value::String(name))]),
                &[Filter::eq("id", page_id), Filter::eq("user_id", user_id)],
            )
            .await?;
        if touched == 0 {
            return Err(KeyThoughtsError::page_not_found(page_id));
        }
        Ok(())
    }

    /// Delete a page with its blocks and history. The project's last page stays.
    pub async fn delete_page(&self, user_id: &str, page_id: &str) -> Result<()> {
        require_user(user_id)?;
        let rows = self
            .store
            .select(
                Table::Pages,
                &Query::new().eq("id", page_id).eq("user_id", user_id).limit(1),
            )
            .await?;
        let page = from_rows::<Page>(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| KeyThoughtsError::page_not_found(page_id))?;

        if self.select_pages(user_id, &page.project_id).await?.len() <= 1 {
            return Err(KeyThoughtsError::last_page());
        }

        self.store
            .delete(
                Table::Pages,
                &[Filter::eq("id", page_id), Filter::eq("user_id", user_id)],
            )
            .await?;
        tracing::info!("Deleted page {}", page_id);
        Ok(())
    }

    /// Set page positions within a project to their index in `ordered_ids`
    pub async fn reorder_pages(&self, user_id: &str, project_id: &str, ordered_ids: &[String]) -> Result<()> {
        require_user(user_id)?;
        let known: HashSet<String> = self
            .select_pages(user_id, project_id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if let Some(unknown) = ordered_ids.iter().find(|id| !known.contains(*id)) {
            return Err(KeyThoughtsError::page_not_found(unknown.as_str()));
        }
        self.write_positions(Table::Pages, user_id, ordered_ids).await
    }

    async fn write_positions(&self, table: Table, user_id: &str, ordered_ids: &[String]) -> Result<()> {
        for (index, id) in ordered_ids.iter().enumerate() {
            self.store
                .update(
                    table,
                    patch(&[("position", Value::from(index as i64))]),
                    &[Filter::eq("id", id.as_str()), Filter::eq("user_id", user_id)],
                )
                .await?;
        }
        tracing::debug!("Reordered {} rows in {}", ordered_ids.len(), table);
        Ok(())
    }
}
